//! Emulated user address spaces
//!
//! Each simulated process owns a [`UserAddressSpace`]: a window of user
//! addresses populated by segments. Anonymous segments are plain memory the
//! process can fill with arguments and buffers. Device segments alias a
//! [`CoherentRegion`] so a store and every mapping of it see the same bytes.
//!
//! Copies stop at the first unmapped byte and report how much was left,
//! matching what a faulting `copy_{from,to}_user` does.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::error::{DevResult, DriverError};
use crate::kern::coherent::{page_align, CoherentRegion};
use crate::kern::copyio::{UserMemory, UserPtr};
use crate::kern::host::CachePolicy;

enum Backing {
    /// Address range claimed for a mapping still being set up; faults
    Reserved,
    Anon(Vec<u8>),
    Device {
        region: Arc<CoherentRegion>,
        offset: usize,
        policy: CachePolicy,
    },
}

struct Segment {
    len: usize,
    backing: Backing,
}

impl Segment {
    fn is_mapped(&self) -> bool {
        !matches!(self.backing, Backing::Reserved)
    }
}

/// Address space of one simulated process
pub struct UserAddressSpace {
    base: usize,
    end: usize,
    segments: Mutex<BTreeMap<usize, Segment>>,
    signal: AtomicBool,
}

impl UserAddressSpace {
    /// Create an empty address space covering `[base, base + size)`
    pub fn new(base: usize, size: usize) -> Self {
        Self {
            base,
            end: base.saturating_add(size),
            segments: Mutex::new(BTreeMap::new()),
            signal: AtomicBool::new(false),
        }
    }

    /// Claim the lowest free range of `len` bytes (rounded to pages)
    fn claim(&self, len: usize, backing: impl FnOnce(usize) -> Backing) -> DevResult<UserPtr> {
        if len == 0 {
            return Err(DriverError::InvalidArgument);
        }
        let len = page_align(len);
        let mut segments = self.segments.lock();
        let start = first_fit(&segments, self.base, self.end, len).ok_or(DriverError::OutOfMemory)?;
        segments.insert(
            start,
            Segment {
                len,
                backing: backing(len),
            },
        );
        Ok(UserPtr(start))
    }

    /// Reserve `len` bytes of unused address range for a device mapping
    ///
    /// The range faults until [`install_device`](Self::install_device) backs
    /// it; [`unmap`](Self::unmap) gives it back.
    pub fn reserve(&self, len: usize) -> DevResult<UserPtr> {
        self.claim(len, |_| Backing::Reserved)
    }

    /// Map `len` bytes of zeroed anonymous memory
    pub fn map_anon(&self, len: usize) -> DevResult<UserPtr> {
        self.claim(len, |len| Backing::Anon(vec![0; len]))
    }

    /// Back `[start, start + len)` with `region` from `offset`
    ///
    /// The range must be free or lie at the start of a reservation; any
    /// reserved tail stays reserved.
    pub fn install_device(
        &self,
        start: UserPtr,
        len: usize,
        region: Arc<CoherentRegion>,
        offset: usize,
        policy: CachePolicy,
    ) -> DevResult<()> {
        let end = start.addr().checked_add(len).ok_or(DriverError::InvalidArgument)?;
        if len == 0 || start.addr() < self.base || end > self.end {
            return Err(DriverError::InvalidArgument);
        }
        match offset.checked_add(len) {
            Some(limit) if limit <= region.len() => {}
            _ => return Err(DriverError::InvalidArgument),
        }

        let mut segments = self.segments.lock();
        let reserved = match segments.get(&start.addr()) {
            Some(seg) if !seg.is_mapped() && seg.len >= len => Some(seg.len),
            _ => None,
        };
        match reserved {
            Some(claimed) => {
                segments.remove(&start.addr());
                if claimed > len {
                    segments.insert(
                        end,
                        Segment {
                            len: claimed - len,
                            backing: Backing::Reserved,
                        },
                    );
                }
            }
            None if overlaps(&segments, start.addr(), end) => return Err(DriverError::Busy),
            None => {}
        }
        segments.insert(
            start.addr(),
            Segment {
                len,
                backing: Backing::Device {
                    region,
                    offset,
                    policy,
                },
            },
        );
        Ok(())
    }

    /// Remove the segment or reservation starting at `start`; returns its length
    pub fn unmap(&self, start: UserPtr) -> Option<usize> {
        self.segments.lock().remove(&start.addr()).map(|seg| seg.len)
    }

    /// True if `addr` lies in a mapped segment
    pub fn is_mapped(&self, addr: UserPtr) -> bool {
        let segments = self.segments.lock();
        find(&segments, addr.addr()).is_some_and(|(_, seg)| seg.is_mapped())
    }

    /// Cache policy of the device mapping containing `addr`
    pub fn mapping_policy(&self, addr: UserPtr) -> Option<CachePolicy> {
        let segments = self.segments.lock();
        let (_, seg) = find(&segments, addr.addr())?;
        match seg.backing {
            Backing::Device { policy, .. } => Some(policy),
            Backing::Anon(_) | Backing::Reserved => None,
        }
    }

    /// Number of mapped segments, not counting reservations
    pub fn segment_count(&self) -> usize {
        self.segments.lock().values().filter(|seg| seg.is_mapped()).count()
    }

    /// Mark a signal as pending (or clear it)
    pub fn set_signal_pending(&self, pending: bool) {
        self.signal.store(pending, Ordering::SeqCst);
    }

    /// Read `len` bytes as the process would, failing on any unmapped byte
    pub fn read_bytes(&self, addr: UserPtr, len: usize) -> DevResult<Vec<u8>> {
        let mut buf = vec![0; len];
        match self.transfer(addr.addr(), Dir::Out(&mut buf)) {
            0 => Ok(buf),
            _ => Err(DriverError::BadAddress),
        }
    }

    /// Write `data` as the process would, failing on any unmapped byte
    pub fn write_bytes(&self, addr: UserPtr, data: &[u8]) -> DevResult<()> {
        match self.transfer(addr.addr(), Dir::In(data)) {
            0 => Ok(()),
            _ => Err(DriverError::BadAddress),
        }
    }

    /// Read a native-endian u32 through the process's view of memory
    pub fn read_u32(&self, addr: UserPtr) -> DevResult<u32> {
        let bytes = self.read_bytes(addr, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes);
        Ok(u32::from_ne_bytes(word))
    }

    /// Write a native-endian u32 through the process's view of memory
    pub fn write_u32(&self, addr: UserPtr, value: u32) -> DevResult<()> {
        self.write_bytes(addr, &value.to_ne_bytes())
    }

    /// Move bytes between user memory and `dir`, returning bytes left over
    fn transfer(&self, mut addr: usize, mut dir: Dir<'_>) -> usize {
        let total = dir.len();
        let mut done = 0;
        let mut segments = self.segments.lock();

        while done < total {
            let Some(start) = find(&segments, addr).map(|(start, _)| start) else {
                break;
            };
            let Some(seg) = segments.get_mut(&start) else {
                break;
            };
            let within = addr - start;
            let chunk = (seg.len - within).min(total - done);
            let ok = match (&mut seg.backing, &mut dir) {
                (Backing::Reserved, _) => false,
                (Backing::Anon(mem), Dir::Out(buf)) => {
                    buf[done..done + chunk].copy_from_slice(&mem[within..within + chunk]);
                    true
                }
                (Backing::Anon(mem), Dir::In(data)) => {
                    mem[within..within + chunk].copy_from_slice(&data[done..done + chunk]);
                    true
                }
                (Backing::Device { region, offset, .. }, Dir::Out(buf)) => region
                    .read(*offset + within, &mut buf[done..done + chunk])
                    .is_ok(),
                (Backing::Device { region, offset, .. }, Dir::In(data)) => region
                    .write(*offset + within, &data[done..done + chunk])
                    .is_ok(),
            };
            if !ok {
                break;
            }
            done += chunk;
            addr += chunk;
        }
        total - done
    }
}

enum Dir<'a> {
    /// user → buffer
    Out(&'a mut [u8]),
    /// buffer → user
    In(&'a [u8]),
}

impl Dir<'_> {
    fn len(&self) -> usize {
        match self {
            Dir::Out(buf) => buf.len(),
            Dir::In(data) => data.len(),
        }
    }
}

fn find(segments: &BTreeMap<usize, Segment>, addr: usize) -> Option<(usize, &Segment)> {
    let (&start, seg) = segments.range(..=addr).next_back()?;
    (addr - start < seg.len).then_some((start, seg))
}

/// Lowest page-aligned gap of `len` bytes in `[base, end)`
fn first_fit(segments: &BTreeMap<usize, Segment>, base: usize, end: usize, len: usize) -> Option<usize> {
    let mut cursor = base;
    for (&start, seg) in segments.range(base..) {
        if start.saturating_sub(cursor) >= len {
            break;
        }
        cursor = cursor.max(start + seg.len);
    }
    (end.checked_sub(cursor)? >= len).then_some(cursor)
}

fn overlaps(segments: &BTreeMap<usize, Segment>, start: usize, end: usize) -> bool {
    if let Some((&s, seg)) = segments.range(..end).next_back() {
        return s + seg.len > start;
    }
    false
}

impl UserMemory for UserAddressSpace {
    fn copy_from_user(&self, dst: &mut [u8], src: UserPtr) -> usize {
        self.transfer(src.addr(), Dir::Out(dst))
    }

    fn copy_to_user(&self, dst: UserPtr, src: &[u8]) -> usize {
        self.transfer(dst.addr(), Dir::In(src))
    }

    fn signal_pending(&self) -> bool {
        self.signal.load(Ordering::SeqCst)
    }
}

impl core::fmt::Debug for UserAddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserAddressSpace")
            .field("base", &format_args!("{:#x}", self.base))
            .field("end", &format_args!("{:#x}", self.end))
            .field("segments", &self.segment_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::coherent::PAGE_SIZE;

    fn space() -> UserAddressSpace {
        UserAddressSpace::new(0x1000_0000, 0x10_0000)
    }

    #[test]
    fn test_anon_round_trip() {
        let mm = space();
        let p = mm.map_anon(16).unwrap();
        mm.write_bytes(p, b"hello").unwrap();
        assert_eq!(mm.read_bytes(p, 5).unwrap(), b"hello");
        assert_eq!(mm.segment_count(), 1);
    }

    #[test]
    fn test_unmapped_is_fault() {
        let mm = space();
        assert_eq!(mm.read_bytes(UserPtr(0x1000_0000), 1), Err(DriverError::BadAddress));
        let mut buf = [0u8; 4];
        assert_eq!(mm.copy_from_user(&mut buf, UserPtr(0x10)), 4);
    }

    #[test]
    fn test_partial_copy_stops_at_hole() {
        let mm = space();
        let p = mm.map_anon(PAGE_SIZE).unwrap();
        let tail = UserPtr(p.addr() + PAGE_SIZE - 2);
        assert_eq!(mm.copy_to_user(tail, &[9, 9, 9, 9]), 2);
        assert_eq!(mm.read_bytes(tail, 2).unwrap(), [9, 9]);
    }

    #[test]
    fn test_device_segment_aliases_region() {
        let mm = space();
        let region = Arc::new(CoherentRegion::allocate(2 * PAGE_SIZE, PAGE_SIZE, 0x8000_0000).unwrap());
        let start = mm.reserve(PAGE_SIZE).unwrap();
        mm.install_device(start, PAGE_SIZE, region.clone(), PAGE_SIZE, CachePolicy::WriteCombine)
            .unwrap();

        mm.write_u32(start, 0x00FF_0000).unwrap();
        assert_eq!(region.read_pixel(PAGE_SIZE, 4).unwrap(), 0x00FF_0000);
        region.write_pixel(PAGE_SIZE + 4, 4, 0x1234).unwrap();
        assert_eq!(mm.read_u32(UserPtr(start.addr() + 4)).unwrap(), 0x1234);
        assert_eq!(mm.mapping_policy(start), Some(CachePolicy::WriteCombine));
    }

    #[test]
    fn test_install_rejects_bad_ranges() {
        let mm = space();
        let region = Arc::new(CoherentRegion::allocate(PAGE_SIZE, PAGE_SIZE, 0).unwrap());
        let start = mm.reserve(2 * PAGE_SIZE).unwrap();
        assert_eq!(
            mm.install_device(start, 2 * PAGE_SIZE, region.clone(), 0, CachePolicy::Cached),
            Err(DriverError::InvalidArgument)
        );
        mm.install_device(start, PAGE_SIZE, region.clone(), 0, CachePolicy::Cached)
            .unwrap();
        assert_eq!(
            mm.install_device(start, PAGE_SIZE, region, 0, CachePolicy::Cached),
            Err(DriverError::Busy)
        );
        assert_eq!(mm.unmap(start), Some(PAGE_SIZE));
        assert!(!mm.is_mapped(start));
    }

    #[test]
    fn test_reserve_exhaustion() {
        let mm = UserAddressSpace::new(0x1000, 2 * PAGE_SIZE);
        assert!(mm.reserve(PAGE_SIZE).is_ok());
        assert!(mm.reserve(PAGE_SIZE).is_ok());
        assert_eq!(mm.reserve(1), Err(DriverError::OutOfMemory));
        assert_eq!(mm.reserve(0), Err(DriverError::InvalidArgument));
    }

    #[test]
    fn test_freed_ranges_are_reused() {
        let mm = UserAddressSpace::new(0x1000, 3 * PAGE_SIZE);
        let a = mm.reserve(PAGE_SIZE).unwrap();
        let b = mm.map_anon(PAGE_SIZE).unwrap();
        let c = mm.reserve(PAGE_SIZE).unwrap();
        assert_eq!(mm.reserve(1), Err(DriverError::OutOfMemory));

        // Lowest hole first
        mm.unmap(a);
        mm.unmap(c);
        assert_eq!(mm.reserve(PAGE_SIZE), Ok(a));
        assert_eq!(mm.map_anon(PAGE_SIZE), Ok(c));
        mm.unmap(a);
        mm.unmap(b);
        assert_eq!(mm.reserve(2 * PAGE_SIZE), Ok(a));
    }

    #[test]
    fn test_install_splits_reservation() {
        let mm = space();
        let region = Arc::new(CoherentRegion::allocate(PAGE_SIZE, PAGE_SIZE, 0).unwrap());
        let start = mm.reserve(2 * PAGE_SIZE).unwrap();
        assert!(!mm.is_mapped(start));
        assert_eq!(mm.segment_count(), 0);

        mm.install_device(start, PAGE_SIZE, region, 0, CachePolicy::Cached)
            .unwrap();
        let tail = UserPtr(start.addr() + PAGE_SIZE);
        assert!(mm.is_mapped(start));
        assert!(!mm.is_mapped(tail));
        assert_eq!(mm.read_bytes(tail, 1), Err(DriverError::BadAddress));
        assert_eq!(mm.unmap(tail), Some(PAGE_SIZE));
        assert_eq!(mm.segment_count(), 1);
    }
}
