//! Platform bus
//!
//! Platform drivers bind to platform devices by device-tree compatible
//! string or, failing that, by name. The bus probes on every new match,
//! removes on unbind, and dispatches system suspend/resume to bound devices:
//! suspend runs newest binding first, resume oldest first.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::error::{DevResult, DriverError};

/// Driver-private data attached to a bound device
pub type DrvData = Arc<dyn Any + Send + Sync>;

// ============================================================================
// Platform driver
// ============================================================================

/// A driver for platform devices
pub trait PlatformDriver: Send + Sync {
    /// Driver name, also used to match devices by name
    fn name(&self) -> &str;

    /// Device-tree compatible strings this driver handles
    fn of_match_table(&self) -> &[&str] {
        &[]
    }

    /// Bind to `pdev`
    fn probe(&self, pdev: &PlatformDevice) -> DevResult<()>;

    /// Unbind from `pdev`
    fn remove(&self, pdev: &PlatformDevice) -> DevResult<()>;

    /// System is going to sleep
    fn suspend(&self, _pdev: &PlatformDevice) -> DevResult<()> {
        Ok(())
    }

    /// System woke up
    fn resume(&self, _pdev: &PlatformDevice) -> DevResult<()> {
        Ok(())
    }
}

// ============================================================================
// Platform device
// ============================================================================

/// A device on the platform bus
pub struct PlatformDevice {
    /// Bus-unique id
    pub id: u32,
    /// Device name
    pub name: String,
    /// Device-tree compatible string, if described by one
    pub compatible: Option<String>,
    driver: Mutex<Option<Arc<dyn PlatformDriver>>>,
    drvdata: Mutex<Option<DrvData>>,
}

impl PlatformDevice {
    pub fn new(id: u32, name: &str, compatible: Option<&str>) -> Self {
        Self {
            id,
            name: String::from(name),
            compatible: compatible.map(String::from),
            driver: Mutex::new(None),
            drvdata: Mutex::new(None),
        }
    }

    /// Attach driver-private data
    pub fn set_drvdata(&self, data: DrvData) {
        *self.drvdata.lock() = Some(data);
    }

    /// Driver-private data, downcast to `T`
    pub fn drvdata<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.drvdata.lock().clone()?;
        data.downcast::<T>().ok()
    }

    /// Detach driver-private data
    pub fn take_drvdata<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.drvdata.lock().take()?;
        data.downcast::<T>().ok()
    }

    /// Name of the bound driver
    pub fn driver_name(&self) -> Option<String> {
        self.driver.lock().as_ref().map(|d| String::from(d.name()))
    }

    pub fn is_bound(&self) -> bool {
        self.driver.lock().is_some()
    }

    fn bound_driver(&self) -> Option<Arc<dyn PlatformDriver>> {
        self.driver.lock().clone()
    }
}

impl fmt::Debug for PlatformDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("compatible", &self.compatible)
            .field("driver", &self.driver_name())
            .finish()
    }
}

/// True if `driver` handles `pdev`
pub fn driver_matches(driver: &dyn PlatformDriver, pdev: &PlatformDevice) -> bool {
    if let Some(compat) = pdev.compatible.as_deref() {
        if driver.of_match_table().iter().any(|c| *c == compat) {
            return true;
        }
    }
    driver.name() == pdev.name
}

// ============================================================================
// Bus
// ============================================================================

/// The platform bus of one host
#[derive(Default)]
pub struct PlatformBus {
    drivers: Mutex<Vec<Arc<dyn PlatformDriver>>>,
    devices: Mutex<Vec<Arc<PlatformDevice>>>,
    /// Bound devices in binding order
    bound: Mutex<Vec<Arc<PlatformDevice>>>,
    next_id: AtomicU32,
}

impl PlatformBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver and probe every unbound matching device
    pub fn register_driver(&self, driver: Arc<dyn PlatformDriver>) -> DevResult<()> {
        {
            let mut drivers = self.drivers.lock();
            if drivers.iter().any(|d| d.name() == driver.name()) {
                return Err(DriverError::Busy);
            }
            drivers.push(driver.clone());
        }
        log::debug!(target: "platform", "driver {} registered", driver.name());

        let candidates: Vec<_> = self.devices.lock().iter().filter(|d| !d.is_bound()).cloned().collect();
        for pdev in candidates {
            if driver_matches(driver.as_ref(), &pdev) {
                self.bind(&driver, &pdev);
            }
        }
        Ok(())
    }

    /// Unbind every device of the driver and unregister it
    pub fn unregister_driver(&self, name: &str) -> DevResult<()> {
        let driver = {
            let mut drivers = self.drivers.lock();
            let pos = drivers.iter().position(|d| d.name() == name).ok_or(DriverError::NoDevice)?;
            drivers.remove(pos)
        };
        let victims: Vec<_> = self
            .bound
            .lock()
            .iter()
            .filter(|d| d.driver_name().as_deref() == Some(driver.name()))
            .cloned()
            .collect();
        for pdev in victims.iter().rev() {
            self.unbind(pdev);
        }
        log::debug!(target: "platform", "driver {} unregistered", name);
        Ok(())
    }

    /// Add a device and probe the first matching driver
    ///
    /// A failed probe leaves the device registered but unbound.
    pub fn add_device(&self, name: &str, compatible: Option<&str>) -> Arc<PlatformDevice> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let pdev = Arc::new(PlatformDevice::new(id, name, compatible));
        self.devices.lock().push(pdev.clone());

        let driver = self
            .drivers
            .lock()
            .iter()
            .find(|d| driver_matches(&***d, &pdev))
            .cloned();
        if let Some(driver) = driver {
            self.bind(&driver, &pdev);
        }
        pdev
    }

    /// Unbind and remove a device
    pub fn remove_device(&self, pdev: &Arc<PlatformDevice>) -> DevResult<()> {
        {
            let mut devices = self.devices.lock();
            let pos = devices
                .iter()
                .position(|d| Arc::ptr_eq(d, pdev))
                .ok_or(DriverError::NoDevice)?;
            devices.remove(pos);
        }
        if pdev.is_bound() {
            self.unbind(pdev);
        }
        Ok(())
    }

    /// Suspend bound devices, newest first; stops at the first failure
    pub fn suspend_all(&self) -> DevResult<()> {
        let bound: Vec<_> = self.bound.lock().clone();
        for pdev in bound.iter().rev() {
            if let Some(driver) = pdev.bound_driver() {
                driver.suspend(pdev).map_err(|err| {
                    log::error!(target: "platform", "{}: suspend failed: {}", pdev.name, err);
                    err
                })?;
            }
        }
        Ok(())
    }

    /// Resume bound devices, oldest first
    pub fn resume_all(&self) -> DevResult<()> {
        let bound: Vec<_> = self.bound.lock().clone();
        let mut result = Ok(());
        for pdev in bound.iter() {
            if let Some(driver) = pdev.bound_driver() {
                if let Err(err) = driver.resume(pdev) {
                    log::error!(target: "platform", "{}: resume failed: {}", pdev.name, err);
                    result = result.and(Err(err));
                }
            }
        }
        result
    }

    /// All devices on the bus
    pub fn devices(&self) -> Vec<Arc<PlatformDevice>> {
        self.devices.lock().clone()
    }

    /// Find a device by name
    pub fn find_device(&self, name: &str) -> Option<Arc<PlatformDevice>> {
        self.devices.lock().iter().find(|d| d.name == name).cloned()
    }

    fn bind(&self, driver: &Arc<dyn PlatformDriver>, pdev: &Arc<PlatformDevice>) {
        match driver.probe(pdev) {
            Ok(()) => {
                *pdev.driver.lock() = Some(driver.clone());
                self.bound.lock().push(pdev.clone());
                log::debug!(target: "platform", "{} bound to {}", pdev.name, driver.name());
            }
            Err(err) => {
                log::error!(target: "platform", "{}: probe of {} failed: {}", driver.name(), pdev.name, err);
            }
        }
    }

    fn unbind(&self, pdev: &Arc<PlatformDevice>) {
        let Some(driver) = pdev.driver.lock().take() else {
            return;
        };
        self.bound.lock().retain(|d| !Arc::ptr_eq(d, pdev));
        if let Err(err) = driver.remove(pdev) {
            log::warn!(target: "platform", "{}: remove of {} failed: {}", driver.name(), pdev.name, err);
        }
        pdev.drvdata.lock().take();
    }
}
