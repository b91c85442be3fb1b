//! Device Pager - User mappings of device memory
//!
//! Records every user mapping a driver's `mmap` established, per device, so
//! the host can tear them all down when the node goes away. After teardown
//! no process can reach the device's memory through an old mapping.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::dev_hdr::DeviceId;
use crate::kern::copyio::UserPtr;
use crate::kern::uspace::UserAddressSpace;

// ============================================================================
// Device Pager Entry
// ============================================================================

/// One user mapping of a device
#[derive(Debug, Clone)]
pub struct DevPagerEntry {
    /// Device being mapped
    pub device_id: DeviceId,

    /// Address space holding the mapping
    pub mm: Weak<UserAddressSpace>,

    /// First user address
    pub start: UserPtr,

    /// Size of mapped region
    pub size: usize,

    /// Offset into device
    pub offset: u64,
}

impl DevPagerEntry {
    fn is_in(&self, mm: &Arc<UserAddressSpace>) -> bool {
        core::ptr::eq(self.mm.as_ptr(), Arc::as_ptr(mm))
    }
}

// ============================================================================
// Device Pager
// ============================================================================

/// Mapping bookkeeping for all devices of a host
#[derive(Debug, Default)]
pub struct DevPager {
    entries: Mutex<BTreeMap<DeviceId, Vec<DevPagerEntry>>>,
}

impl DevPager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping established by a driver
    pub fn record(&self, device_id: DeviceId, mm: &Arc<UserAddressSpace>, start: UserPtr, size: usize, offset: u64) {
        let entry = DevPagerEntry {
            device_id,
            mm: Arc::downgrade(mm),
            start,
            size,
            offset,
        };
        self.entries.lock().entry(device_id).or_default().push(entry);
    }

    /// Unmap `start` in `mm`; returns the device it belonged to
    pub fn unmap(&self, mm: &Arc<UserAddressSpace>, start: UserPtr) -> Option<DeviceId> {
        let mut entries = self.entries.lock();
        let mut found = None;
        for (id, list) in entries.iter_mut() {
            if let Some(pos) = list.iter().position(|e| e.start == start && e.is_in(mm)) {
                list.swap_remove(pos);
                found = Some(*id);
                break;
            }
        }
        drop(entries);
        mm.unmap(start);
        found
    }

    /// Tear down every mapping of a device; returns how many were live
    pub fn teardown(&self, device_id: DeviceId) -> usize {
        let list = self.entries.lock().remove(&device_id).unwrap_or_default();
        let mut live = 0;
        for entry in list {
            if let Some(mm) = entry.mm.upgrade() {
                if mm.unmap(entry.start).is_some() {
                    live += 1;
                }
            }
        }
        if live > 0 {
            log::debug!(target: "dev_pager", "{:?}: tore down {} mapping(s)", device_id, live);
        }
        live
    }

    /// Live mappings of a device
    pub fn mappings(&self, device_id: DeviceId) -> Vec<DevPagerEntry> {
        let entries = self.entries.lock();
        entries
            .get(&device_id)
            .map(|list| list.iter().filter(|e| e.mm.strong_count() > 0).cloned().collect())
            .unwrap_or_default()
    }

    /// Total recorded mappings
    pub fn count(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::coherent::{CoherentRegion, PAGE_SIZE};
    use crate::kern::host::CachePolicy;

    fn mapped(mm: &Arc<UserAddressSpace>, region: &Arc<CoherentRegion>) -> UserPtr {
        let start = mm.reserve(PAGE_SIZE).unwrap();
        mm.install_device(start, PAGE_SIZE, region.clone(), 0, CachePolicy::WriteCombine)
            .unwrap();
        start
    }

    #[test]
    fn test_teardown_unmaps_everything() {
        let pager = DevPager::new();
        let region = Arc::new(CoherentRegion::allocate(PAGE_SIZE, PAGE_SIZE, 0).unwrap());
        let a = Arc::new(UserAddressSpace::new(0x1000_0000, 0x10_0000));
        let b = Arc::new(UserAddressSpace::new(0x1000_0000, 0x10_0000));

        let pa = mapped(&a, &region);
        let pb = mapped(&b, &region);
        pager.record(DeviceId(7), &a, pa, PAGE_SIZE, 0);
        pager.record(DeviceId(7), &b, pb, PAGE_SIZE, 0);
        assert_eq!(pager.mappings(DeviceId(7)).len(), 2);

        assert_eq!(pager.teardown(DeviceId(7)), 2);
        assert!(!a.is_mapped(pa));
        assert!(!b.is_mapped(pb));
        assert_eq!(pager.count(), 0);
        assert_eq!(Arc::strong_count(&region), 1);
    }

    #[test]
    fn test_unmap_single() {
        let pager = DevPager::new();
        let region = Arc::new(CoherentRegion::allocate(PAGE_SIZE, PAGE_SIZE, 0).unwrap());
        let mm = Arc::new(UserAddressSpace::new(0x1000_0000, 0x10_0000));
        let start = mapped(&mm, &region);
        pager.record(DeviceId(3), &mm, start, PAGE_SIZE, 0);

        assert_eq!(pager.unmap(&mm, start), Some(DeviceId(3)));
        assert_eq!(pager.count(), 0);
        assert_eq!(pager.teardown(DeviceId(3)), 0);
    }
}
