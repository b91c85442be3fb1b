//! Device Header - Generic Device Abstraction
//!
//! The host's record of one registered device node: its operations table,
//! open count and in-flight I/O count. Removing a node retires the header
//! first so new calls fail with `NoDevice`, then waits for in-flight calls
//! to drain before the driver's resources go away.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::device::conf::{DevOps, FileOperations};
use crate::error::{DevResult, DriverError};

// ============================================================================
// Device ID
// ============================================================================

/// Device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const NULL: Self = Self(0);
}

// ============================================================================
// Device State
// ============================================================================

/// Device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum DeviceState {
    /// Registered and accepting calls
    #[default]
    Live = 0,
    /// Being unregistered; waiting for I/O to drain
    Removing = 1,
    /// Gone; every call fails
    Removed = 2,
}

// ============================================================================
// Character Device Header
// ============================================================================

/// Host-side header of a registered device node
#[derive(Debug)]
pub struct CharDevice {
    /// Device identifier
    pub id: DeviceId,

    /// Device operations
    ops: DevOps,

    /// Device state
    state: Mutex<DeviceState>,

    /// Number of open handles
    open_count: AtomicU32,

    /// Number of calls currently inside the driver
    io_in_progress: AtomicU32,
}

impl CharDevice {
    pub fn new(id: DeviceId, ops: DevOps) -> Self {
        Self {
            id,
            ops,
            state: Mutex::new(DeviceState::Live),
            open_count: AtomicU32::new(0),
            io_in_progress: AtomicU32::new(0),
        }
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.ops.name
    }

    /// Driver callbacks
    pub fn fops(&self) -> &Arc<dyn FileOperations> {
        &self.ops.fops
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    pub fn is_live(&self) -> bool {
        self.state() == DeviceState::Live
    }

    /// Get open count
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Number of calls currently inside the driver
    pub fn io_in_progress(&self) -> u32 {
        self.io_in_progress.load(Ordering::SeqCst)
    }

    /// Begin a call into the driver
    ///
    /// Fails with `NoDevice` once the node is being removed. The returned
    /// guard ends the call when dropped.
    pub fn io_start(&self) -> DevResult<IoGuard<'_>> {
        self.io_in_progress.fetch_add(1, Ordering::SeqCst);
        if !self.is_live() {
            self.io_done();
            return Err(DriverError::NoDevice);
        }
        Ok(IoGuard { device: self })
    }

    /// End a call into the driver
    fn io_done(&self) {
        self.io_in_progress.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wait for all in-flight calls to finish
    pub fn io_wait_complete(&self) {
        while self.io_in_progress.load(Ordering::SeqCst) > 0 {
            core::hint::spin_loop();
        }
    }

    /// Stop accepting calls and drain the ones in flight
    pub fn retire(&self) {
        *self.state.lock() = DeviceState::Removing;
        self.io_wait_complete();
        *self.state.lock() = DeviceState::Removed;
    }
}

/// An in-flight driver call; ends the call on drop
pub struct IoGuard<'a> {
    device: &'a CharDevice,
}

impl Drop for IoGuard<'_> {
    fn drop(&mut self) {
        self.device.io_done();
    }
}

// ============================================================================
// Device Open/Close
// ============================================================================

/// Open a handle on a device
pub fn device_open(device: &CharDevice) -> DevResult<()> {
    let _io = device.io_start()?;
    device.fops().open()?;
    device.open_count.fetch_add(1, Ordering::SeqCst);
    log::debug!(target: "device", "{}: open (count {})", device.name(), device.open_count());
    Ok(())
}

/// Close a handle on a device
///
/// Closing after the node was removed still drops the count but no longer
/// reaches the driver.
pub fn device_close(device: &CharDevice) -> DevResult<()> {
    let _ = device
        .open_count
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    match device.io_start() {
        Ok(_io) => device.fops().release(),
        Err(_) => Ok(()),
    }
}

// ============================================================================
// Device Registry
// ============================================================================

/// Registered device nodes of one host
pub struct DeviceRegistry {
    /// Devices by ID
    devices: BTreeMap<DeviceId, Arc<CharDevice>>,
    /// Devices by name
    by_name: BTreeMap<String, DeviceId>,
    /// Next device ID
    next_id: u32,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            by_name: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register a new node; names must be unique
    pub fn register(&mut self, ops: DevOps) -> DevResult<Arc<CharDevice>> {
        if self.by_name.contains_key(&ops.name) {
            return Err(DriverError::Busy);
        }
        let id = DeviceId(self.next_id);
        self.next_id += 1;

        let name = ops.name.clone();
        let device = Arc::new(CharDevice::new(id, ops));
        self.devices.insert(id, Arc::clone(&device));
        self.by_name.insert(name, id);
        Ok(device)
    }

    /// Remove a node from the namespace; the caller retires it
    pub fn remove(&mut self, name: &str) -> Option<Arc<CharDevice>> {
        let id = self.by_name.remove(name)?;
        self.devices.remove(&id)
    }

    /// Lookup device by name
    pub fn lookup(&self, name: &str) -> Option<Arc<CharDevice>> {
        let id = self.by_name.get(name)?;
        self.devices.get(id).cloned()
    }

    /// Lookup device by ID
    pub fn lookup_by_id(&self, id: DeviceId) -> Option<Arc<CharDevice>> {
        self.devices.get(&id).cloned()
    }

    /// Names of all nodes, sorted
    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
