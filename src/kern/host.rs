//! Host Abstraction
//!
//! The host is the kernel the drivers are loaded into. Drivers reach every
//! host facility through [`HostShim`]: device registration, coherent memory,
//! user mappings, framebuffer core helpers and the platform bus. User-space
//! copies go through [`UserMemory`](crate::kern::copyio::UserMemory), which
//! the host hands to each file operation.
//!
//! [`SimHost`](crate::kern::sim::SimHost) is the emulated implementation.

use alloc::sync::Arc;

use crate::config::HostConfig;
use crate::device::conf::FileOperations;
use crate::device::dev_hdr::DeviceId;
use crate::device::platform::{PlatformDevice, PlatformDriver};
use crate::error::DevResult;
use crate::fb::cmap::ColorMap;
use crate::fb::FbOps;
use crate::kern::coherent::CoherentRegion;
use crate::kern::copyio::UserPtr;
use crate::kern::uspace::UserAddressSpace;

// ============================================================================
// Mapping attributes
// ============================================================================

/// Cache attribute of a user mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Normal cached memory
    #[default]
    Cached,
    /// Uncached, writes may be combined (display memory)
    WriteCombine,
    /// Strongly uncached (registers)
    Uncached,
}

/// A user mapping being set up by a driver's `mmap`
///
/// The host reserves `[start, start + len)` in `mm` before calling the
/// driver; the driver validates the request, picks the page protection and
/// asks the host to back the range with physical pages.
#[derive(Debug, Clone)]
pub struct VmArea {
    /// Address space the mapping belongs to
    pub mm: Arc<UserAddressSpace>,
    /// First user address
    pub start: UserPtr,
    /// Length in bytes (page multiple)
    pub len: usize,
    /// Offset into the device, in pages
    pub pgoff: u64,
    /// Protection chosen by the driver
    pub page_prot: CachePolicy,
}

impl VmArea {
    pub fn new(mm: Arc<UserAddressSpace>, start: UserPtr, len: usize, pgoff: u64) -> Self {
        Self {
            mm,
            start,
            len,
            pgoff,
            page_prot: CachePolicy::Cached,
        }
    }

    /// One past the last user address
    pub fn end(&self) -> usize {
        self.start.addr() + self.len
    }
}

// ============================================================================
// Host Shim
// ============================================================================

/// Kernel services available to drivers
pub trait HostShim: Send + Sync {
    /// Host configuration
    fn config(&self) -> &HostConfig;

    // ---- character devices -------------------------------------------------

    /// Create device node `name` served by `fops`
    fn register_chrdev(&self, name: &str, fops: Arc<dyn FileOperations>) -> DevResult<DeviceId>;

    /// Remove device node `name`, tearing down its user mappings
    fn unregister_chrdev(&self, name: &str) -> DevResult<()>;

    // ---- platform bus ------------------------------------------------------

    /// Register a platform driver and bind it to matching devices
    fn register_platform_driver(&self, driver: Arc<dyn PlatformDriver>) -> DevResult<()>;

    /// Unbind and unregister the platform driver called `name`
    fn unregister_platform_driver(&self, name: &str) -> DevResult<()>;

    /// Add a platform device, probing a matching driver if one is registered
    fn add_platform_device(&self, name: &str, compatible: Option<&str>) -> DevResult<Arc<PlatformDevice>>;

    /// Unbind and remove a platform device
    fn remove_platform_device(&self, pdev: &Arc<PlatformDevice>) -> DevResult<()>;

    /// Run the suspend hook of every bound device
    fn system_suspend(&self) -> DevResult<()>;

    /// Run the resume hook of every bound device
    fn system_resume(&self) -> DevResult<()>;

    // ---- memory ------------------------------------------------------------

    /// Allocate page-aligned, zeroed, physically contiguous memory
    fn alloc_coherent(&self, size: usize) -> DevResult<Arc<CoherentRegion>>;

    /// Release memory obtained from [`alloc_coherent`](Self::alloc_coherent)
    fn free_coherent(&self, region: Arc<CoherentRegion>);

    /// Back `vma` with `size` bytes of physical memory starting at page `pfn`
    fn remap_pfn_range(&self, vma: &VmArea, pfn: u64, size: usize) -> DevResult<()>;

    // ---- framebuffer core --------------------------------------------------

    /// Allocate a colour map of `len` entries
    fn alloc_cmap(&self, len: usize) -> DevResult<ColorMap>;

    /// Release a colour map
    fn dealloc_cmap(&self, cmap: ColorMap);

    /// Register a framebuffer, creating its `displayN` node; returns N
    fn register_framebuffer(&self, fb: Arc<dyn FbOps>) -> DevResult<u32>;

    /// Unregister framebuffer N, tearing down its node and mappings
    fn unregister_framebuffer(&self, node: u32) -> DevResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::coherent::PAGE_SIZE;

    #[test]
    fn test_vm_area_defaults() {
        let mm = Arc::new(UserAddressSpace::new(0x1000_0000, 0x10_0000));
        let vma = VmArea::new(mm, UserPtr(0x1000_0000), 2 * PAGE_SIZE, 0);
        assert_eq!(vma.page_prot, CachePolicy::Cached);
        assert_eq!(vma.end(), 0x1000_2000);
    }
}
