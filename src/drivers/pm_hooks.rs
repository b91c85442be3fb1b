//! Power-management lifecycle demo
//!
//! A platform driver with no hardware behind it. It binds to devices
//! compatible with `demo,pm-hooks` and tracks whether the system has put
//! them to sleep.

use alloc::sync::Arc;

use spin::Mutex;

use crate::device::platform::{PlatformDevice, PlatformDriver};
use crate::error::{DevResult, DriverError};
use crate::kern::host::HostShim;

/// Platform driver name
pub const DRIVER_NAME: &str = "pm_hooks_demo";

/// Device-tree compatible string
pub const COMPATIBLE: &str = "demo,pm-hooks";

/// Power state of a bound device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Active,
    Suspended,
}

/// Per-device state kept as driver data
#[derive(Debug, Default)]
pub struct PmContext {
    state: Mutex<PowerState>,
}

impl PmContext {
    pub fn state(&self) -> PowerState {
        *self.state.lock()
    }
}

/// The demo driver
pub struct PmHooksDriver;

impl PlatformDriver for PmHooksDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn of_match_table(&self) -> &[&str] {
        &[COMPATIBLE]
    }

    fn probe(&self, pdev: &PlatformDevice) -> DevResult<()> {
        pdev.set_drvdata(Arc::new(PmContext::default()));
        log::info!(target: DRIVER_NAME, "{}: probed", pdev.name);
        Ok(())
    }

    fn remove(&self, pdev: &PlatformDevice) -> DevResult<()> {
        pdev.take_drvdata::<PmContext>();
        log::info!(target: DRIVER_NAME, "{}: removed", pdev.name);
        Ok(())
    }

    fn suspend(&self, pdev: &PlatformDevice) -> DevResult<()> {
        let ctx = pdev.drvdata::<PmContext>().ok_or(DriverError::NoDevice)?;
        log::info!(target: DRIVER_NAME, "{}: suspending, saving context and disabling hardware", pdev.name);
        // Clock gating and rail shutdown go here on real hardware
        *ctx.state.lock() = PowerState::Suspended;
        Ok(())
    }

    fn resume(&self, pdev: &PlatformDevice) -> DevResult<()> {
        let ctx = pdev.drvdata::<PmContext>().ok_or(DriverError::NoDevice)?;
        log::info!(target: DRIVER_NAME, "{}: resumed, restoring hardware state", pdev.name);
        *ctx.state.lock() = PowerState::Active;
        Ok(())
    }
}

/// Power state of a device bound to this driver
pub fn state(pdev: &PlatformDevice) -> Option<PowerState> {
    pdev.drvdata::<PmContext>().map(|ctx| ctx.state())
}

/// Register the driver
pub fn init(host: &Arc<dyn HostShim>) -> DevResult<()> {
    host.register_platform_driver(Arc::new(PmHooksDriver))
}

/// Unregister the driver, unbinding its devices
pub fn exit(host: &Arc<dyn HostShim>) -> DevResult<()> {
    host.unregister_platform_driver(DRIVER_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::kern::sim::SimHost;

    #[test]
    fn test_binds_by_compatible() {
        let host = SimHost::new(HostConfig::default());
        let shim = host.shim();
        init(&shim).unwrap();
        let pdev = shim.add_platform_device("pm-demo@0", Some(COMPATIBLE)).unwrap();
        let other = shim.add_platform_device("pm-demo@1", Some("vendor,other")).unwrap();
        assert!(pdev.is_bound());
        assert!(!other.is_bound());
        assert_eq!(state(&pdev), Some(PowerState::Active));
    }

    #[test]
    fn test_suspend_resume_cycle() {
        let host = SimHost::new(HostConfig::default());
        let shim = host.shim();
        init(&shim).unwrap();
        let pdev = shim.add_platform_device("pm-demo@0", Some(COMPATIBLE)).unwrap();

        shim.system_suspend().unwrap();
        assert_eq!(state(&pdev), Some(PowerState::Suspended));
        shim.system_resume().unwrap();
        assert_eq!(state(&pdev), Some(PowerState::Active));
    }

    #[test]
    fn test_exit_unbinds() {
        let host = SimHost::new(HostConfig::default());
        let shim = host.shim();
        init(&shim).unwrap();
        let pdev = shim.add_platform_device("pm-demo@0", Some(COMPATIBLE)).unwrap();
        exit(&shim).unwrap();
        assert!(!pdev.is_bound());
        assert_eq!(state(&pdev), None);
    }
}
