//! Emulated host kernel
//!
//! [`SimHost`] implements [`HostShim`] in ordinary process memory. Coherent
//! regions are page-aligned heap blocks tagged with a simulated physical
//! address; user processes are [`UserAddressSpace`]s; device nodes, the
//! platform bus and mapping teardown are the real host-side logic from
//! [`crate::device`].
//!
//! Faults can be injected one-shot into the fallible host services, and all
//! coherent memory and colour maps are accounted, so a driver's error paths
//! and teardown can be checked for leaks.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::config::HostConfig;
use crate::console;
use crate::device::conf::FileOperations;
use crate::device::dev_hdr::DeviceId;
use crate::device::ds_routines::DeviceServer;
use crate::device::platform::{PlatformBus, PlatformDevice, PlatformDriver};
use crate::error::{DevResult, DriverError};
use crate::fb::cmap::ColorMap;
use crate::fb::{FbDevice, FbOps};
use crate::kern::coherent::{page_align, CoherentRegion, PAGE_SHIFT, PAGE_SIZE};
use crate::kern::host::{HostShim, VmArea};
use crate::kern::uspace::UserAddressSpace;

// ============================================================================
// Fault injection
// ============================================================================

/// A host service that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Fault {
    /// Next coherent allocation fails with `OutOfMemory`
    CoherentAlloc = 1 << 0,
    /// Next colour-map allocation fails with `OutOfMemory`
    CmapAlloc = 1 << 1,
    /// Next remap fails with `OutOfMemory`
    Remap = 1 << 2,
    /// Next framebuffer registration fails with `OutOfMemory`
    RegisterFramebuffer = 1 << 3,
    /// Next character device registration fails with `Busy`
    RegisterChrdev = 1 << 4,
}

// ============================================================================
// Simulated host
// ============================================================================

/// User-space implementation of the host kernel
pub struct SimHost {
    config: HostConfig,
    server: DeviceServer,
    bus: PlatformBus,
    /// Live coherent regions by physical base
    coherent: Mutex<BTreeMap<u64, Arc<CoherentRegion>>>,
    next_phys: AtomicU64,
    cmaps: AtomicUsize,
    framebuffers: Mutex<Vec<Option<Arc<dyn FbOps>>>>,
    faults: AtomicU32,
}

impl SimHost {
    /// Boot a host; installs the console log sink at the configured level
    pub fn new(config: HostConfig) -> Arc<Self> {
        console::init(config.log_level);
        log::info!(
            target: "host",
            "sim host up: dma base {:#x}, budget {:#x}",
            config.dma_phys_base,
            config.dma_budget
        );
        Arc::new(Self {
            config,
            server: DeviceServer::new(),
            bus: PlatformBus::new(),
            coherent: Mutex::new(BTreeMap::new()),
            next_phys: AtomicU64::new(config.dma_phys_base),
            cmaps: AtomicUsize::new(0),
            framebuffers: Mutex::new(Vec::new()),
            faults: AtomicU32::new(0),
        })
    }

    /// This host as the driver-facing trait object
    pub fn shim(self: &Arc<Self>) -> Arc<dyn HostShim> {
        self.clone()
    }

    /// Device namespace, for the system-call surface
    pub fn server(&self) -> &DeviceServer {
        &self.server
    }

    /// Platform bus
    pub fn bus(&self) -> &PlatformBus {
        &self.bus
    }

    /// Create a fresh user process address space
    pub fn spawn_process(&self) -> Arc<UserAddressSpace> {
        Arc::new(UserAddressSpace::new(self.config.user_base, self.config.user_size))
    }

    /// Arm a one-shot fault
    pub fn inject(&self, fault: Fault) {
        self.faults.fetch_or(fault as u32, Ordering::SeqCst);
    }

    /// Disarm all faults
    pub fn clear_faults(&self) {
        self.faults.store(0, Ordering::SeqCst);
    }

    fn take_fault(&self, fault: Fault) -> bool {
        let bit = fault as u32;
        self.faults.fetch_and(!bit, Ordering::SeqCst) & bit != 0
    }

    /// Bytes of coherent memory currently allocated
    pub fn outstanding_coherent(&self) -> usize {
        self.coherent.lock().values().map(|r| r.len()).sum()
    }

    /// Colour maps currently allocated
    pub fn outstanding_cmaps(&self) -> usize {
        self.cmaps.load(Ordering::SeqCst)
    }

    /// Registered framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Names of all device nodes
    pub fn nodes(&self) -> Vec<String> {
        self.server.nodes()
    }

    fn region_for(&self, phys: u64, size: usize) -> Option<(Arc<CoherentRegion>, usize)> {
        let coherent = self.coherent.lock();
        let (&base, region) = coherent.range(..=phys).next_back()?;
        let offset = (phys - base) as usize;
        let end = offset.checked_add(size)?;
        (end <= region.len()).then(|| (region.clone(), offset))
    }
}

impl core::fmt::Debug for SimHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimHost")
            .field("nodes", &self.nodes())
            .field("coherent", &self.outstanding_coherent())
            .field("cmaps", &self.outstanding_cmaps())
            .finish()
    }
}

impl HostShim for SimHost {
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn register_chrdev(&self, name: &str, fops: Arc<dyn FileOperations>) -> DevResult<DeviceId> {
        if self.take_fault(Fault::RegisterChrdev) {
            return Err(DriverError::Busy);
        }
        self.server.register(name, fops)
    }

    fn unregister_chrdev(&self, name: &str) -> DevResult<()> {
        self.server.unregister(name)
    }

    fn register_platform_driver(&self, driver: Arc<dyn PlatformDriver>) -> DevResult<()> {
        self.bus.register_driver(driver)
    }

    fn unregister_platform_driver(&self, name: &str) -> DevResult<()> {
        self.bus.unregister_driver(name)
    }

    fn add_platform_device(&self, name: &str, compatible: Option<&str>) -> DevResult<Arc<PlatformDevice>> {
        Ok(self.bus.add_device(name, compatible))
    }

    fn remove_platform_device(&self, pdev: &Arc<PlatformDevice>) -> DevResult<()> {
        self.bus.remove_device(pdev)
    }

    fn system_suspend(&self) -> DevResult<()> {
        log::info!(target: "host", "system suspend");
        self.bus.suspend_all()
    }

    fn system_resume(&self) -> DevResult<()> {
        log::info!(target: "host", "system resume");
        self.bus.resume_all()
    }

    fn alloc_coherent(&self, size: usize) -> DevResult<Arc<CoherentRegion>> {
        if size == 0 {
            return Err(DriverError::InvalidArgument);
        }
        if self.take_fault(Fault::CoherentAlloc) {
            return Err(DriverError::OutOfMemory);
        }
        let len = page_align(size);
        if self.outstanding_coherent() + len > self.config.dma_budget {
            return Err(DriverError::OutOfMemory);
        }

        let phys = self.next_phys.fetch_add(len as u64, Ordering::SeqCst);
        let region = CoherentRegion::allocate(len, PAGE_SIZE, phys).ok_or(DriverError::OutOfMemory)?;
        let region = Arc::new(region);
        self.coherent.lock().insert(phys, region.clone());
        log::debug!(target: "host", "coherent alloc {:#x} bytes at phys {:#x}", len, phys);
        Ok(region)
    }

    fn free_coherent(&self, region: Arc<CoherentRegion>) {
        if self.coherent.lock().remove(&region.phys_addr()).is_none() {
            log::warn!(target: "host", "free of unknown coherent region {:#x}", region.phys_addr());
        }
    }

    fn remap_pfn_range(&self, vma: &VmArea, pfn: u64, size: usize) -> DevResult<()> {
        if self.take_fault(Fault::Remap) {
            return Err(DriverError::OutOfMemory);
        }
        if size == 0 || size > vma.len {
            return Err(DriverError::InvalidArgument);
        }
        let (region, offset) = self
            .region_for(pfn << PAGE_SHIFT, size)
            .ok_or(DriverError::InvalidArgument)?;
        vma.mm.install_device(vma.start, size, region, offset, vma.page_prot)
    }

    fn alloc_cmap(&self, len: usize) -> DevResult<ColorMap> {
        if len == 0 {
            return Err(DriverError::InvalidArgument);
        }
        if self.take_fault(Fault::CmapAlloc) {
            return Err(DriverError::OutOfMemory);
        }
        self.cmaps.fetch_add(1, Ordering::SeqCst);
        Ok(ColorMap::new(len, false))
    }

    fn dealloc_cmap(&self, cmap: ColorMap) {
        if !cmap.is_empty() {
            let _ = self
                .cmaps
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    fn register_framebuffer(&self, fb: Arc<dyn FbOps>) -> DevResult<u32> {
        if self.take_fault(Fault::RegisterFramebuffer) {
            return Err(DriverError::OutOfMemory);
        }
        let mut slots = self.framebuffers.lock();
        let node = match slots.iter().position(Option::is_none) {
            Some(free) => free,
            None if slots.len() < self.config.max_framebuffers as usize => {
                slots.push(None);
                slots.len() - 1
            }
            None => return Err(DriverError::Busy),
        };

        self.server
            .register(&format!("display{}", node), Arc::new(FbDevice::new(fb.clone())))?;
        fb.info().set_node(Some(node as u32));
        log::info!(target: "fbmem", "fb{}: {} frame buffer device", node, fb.info().fix().id_str());
        slots[node] = Some(fb);
        Ok(node as u32)
    }

    fn unregister_framebuffer(&self, node: u32) -> DevResult<()> {
        let fb = self
            .framebuffers
            .lock()
            .get_mut(node as usize)
            .and_then(Option::take)
            .ok_or(DriverError::NoDevice)?;
        self.server.unregister(&format!("display{}", node))?;
        fb.info().set_node(None);
        log::info!(target: "fbmem", "fb{}: unregistered", node);
        Ok(())
    }
}
