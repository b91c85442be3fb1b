//! Coherent memory regions
//!
//! A [`CoherentRegion`] is a page-aligned, zero-initialised block of memory
//! with a (simulated) physical address, shared between a driver and any user
//! mappings of it. This is the one place that touches raw memory: the block
//! is viewed as `[AtomicU8]`, so the driver and mapping holders may access it
//! concurrently without a lock. Individual byte accesses are relaxed; writers
//! publish with a release fence and readers pick up with an acquire fence.
//!
//! All accessors are length-checked and report [`RegionError`] instead of
//! touching memory outside the region.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{fence, AtomicU8, Ordering};

use thiserror::Error;

use crate::error::DriverError;

/// Page size
pub const PAGE_SIZE: usize = 4096;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: u32 = 12;

/// Round `size` up to a multiple of `align` (a power of two)
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Round `size` up to a whole number of pages
pub const fn page_align(size: usize) -> usize {
    align_up(size, PAGE_SIZE)
}

/// Errors from region accessors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// Requested range does not lie inside the region
    #[error("range {offset:#x}+{len:#x} outside region of {size:#x} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },
}

impl From<RegionError> for DriverError {
    fn from(_: RegionError) -> Self {
        DriverError::InvalidArgument
    }
}

/// Page-aligned block of coherent memory
pub struct CoherentRegion {
    base: NonNull<AtomicU8>,
    len: usize,
    align: usize,
    phys: u64,
}

// SAFETY: the block is only ever accessed through `&[AtomicU8]`, which is
// Sync, and the allocation is owned exclusively by this value.
unsafe impl Send for CoherentRegion {}
unsafe impl Sync for CoherentRegion {}

impl CoherentRegion {
    /// Allocate `len` bytes (rounded up to `align`) of zeroed memory
    ///
    /// Returns `None` when `len` is zero or the allocator refuses.
    pub fn allocate(len: usize, align: usize, phys: u64) -> Option<Self> {
        if len == 0 || !align.is_power_of_two() {
            return None;
        }
        let len = align_up(len, align);
        let layout = Layout::from_size_align(len, align).ok()?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(raw.cast::<AtomicU8>())?;
        Some(Self {
            base,
            len,
            align,
            phys,
        })
    }

    /// Size of the region in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the region is empty (never, for an allocated region)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Simulated physical base address
    pub fn phys_addr(&self) -> u64 {
        self.phys
    }

    /// Virtual base address of the block inside this process
    pub fn virt_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Page frame number of the base
    pub fn pfn(&self) -> u64 {
        self.phys >> PAGE_SHIFT
    }

    fn bytes(&self) -> &[AtomicU8] {
        // SAFETY: base points to `len` initialised bytes owned by self for
        // its whole lifetime; AtomicU8 has the same layout as u8.
        unsafe { core::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    fn range(&self, offset: usize, len: usize) -> Result<&[AtomicU8], RegionError> {
        let oob = RegionError::OutOfBounds {
            offset,
            len,
            size: self.len,
        };
        let end = offset.checked_add(len).ok_or(oob)?;
        self.bytes().get(offset..end).ok_or(oob)
    }

    /// Copy bytes out of the region
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), RegionError> {
        let src = self.range(offset, dst.len())?;
        fence(Ordering::Acquire);
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s.load(Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy bytes into the region
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<(), RegionError> {
        let dst = self.range(offset, src.len())?;
        for (d, s) in dst.iter().zip(src) {
            d.store(*s, Ordering::Relaxed);
        }
        fence(Ordering::Release);
        Ok(())
    }

    /// Set `len` bytes starting at `offset` to `value`
    pub fn fill(&self, offset: usize, len: usize, value: u8) -> Result<(), RegionError> {
        for b in self.range(offset, len)? {
            b.store(value, Ordering::Relaxed);
        }
        fence(Ordering::Release);
        Ok(())
    }

    /// Zero the whole region
    pub fn zero(&self) {
        for b in self.bytes() {
            b.store(0, Ordering::Relaxed);
        }
        fence(Ordering::Release);
    }

    /// Move `len` bytes from `src` to `dst` inside the region
    ///
    /// Overlapping ranges are handled like `memmove`.
    pub fn copy_within(&self, src: usize, dst: usize, len: usize) -> Result<(), RegionError> {
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        fence(Ordering::Acquire);
        if dst <= src {
            for (d, s) in to.iter().zip(from) {
                d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
            }
        } else {
            for (d, s) in to.iter().zip(from).rev() {
                d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
            }
        }
        fence(Ordering::Release);
        Ok(())
    }

    /// Read a little-endian pixel of `bytes_pp` bytes (1..=4)
    pub fn read_pixel(&self, offset: usize, bytes_pp: usize) -> Result<u32, RegionError> {
        let mut buf = [0u8; 4];
        let n = bytes_pp.min(4);
        self.read(offset, &mut buf[..n])?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write the low `bytes_pp` bytes (1..=4) of `value` little-endian
    pub fn write_pixel(&self, offset: usize, bytes_pp: usize, value: u32) -> Result<(), RegionError> {
        let n = bytes_pp.min(4);
        self.write(offset, &value.to_le_bytes()[..n])
    }

    /// True if every byte is zero
    pub fn is_zeroed(&self) -> bool {
        fence(Ordering::Acquire);
        self.bytes().iter().all(|b| b.load(Ordering::Relaxed) == 0)
    }
}

impl Drop for CoherentRegion {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.len, self.align) {
            // SAFETY: base was produced by alloc_zeroed with exactly this layout.
            unsafe { dealloc(self.base.as_ptr().cast::<u8>(), layout) };
        }
    }
}

impl fmt::Debug for CoherentRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoherentRegion")
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}
