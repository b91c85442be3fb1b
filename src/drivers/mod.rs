//! Teaching drivers
//!
//! Each driver is written only against [`HostShim`] and exposes an
//! `init`/`exit` pair, the equivalent of module load and unload.

pub mod chardev_buffer;
pub mod counter;
pub mod pm_hooks;
pub mod simplefb;

use alloc::sync::Arc;

use crate::device::platform::PlatformDevice;
use crate::error::DevResult;
use crate::kern::host::HostShim;

/// Handles to everything [`init`] loaded
pub struct LoadedDrivers {
    pub chardev: Arc<chardev_buffer::CharBuffer>,
    pub counter: Arc<counter::Counter>,
    pub simplefb: Arc<PlatformDevice>,
}

/// Load all drivers
///
/// On failure the drivers loaded so far are unloaded again.
pub fn init(host: &Arc<dyn HostShim>) -> DevResult<LoadedDrivers> {
    let chardev = chardev_buffer::init(host)?;
    let counter = match counter::init(host) {
        Ok(counter) => counter,
        Err(err) => {
            let _ = chardev_buffer::exit(host);
            return Err(err);
        }
    };
    let simplefb = match simplefb::init(host) {
        Ok(pdev) => pdev,
        Err(err) => {
            let _ = counter::exit(host);
            let _ = chardev_buffer::exit(host);
            return Err(err);
        }
    };
    if let Err(err) = pm_hooks::init(host) {
        let _ = simplefb::exit(host, &simplefb);
        let _ = counter::exit(host);
        let _ = chardev_buffer::exit(host);
        return Err(err);
    }

    log::info!(target: "drivers", "driver subsystem initialized");
    Ok(LoadedDrivers {
        chardev,
        counter,
        simplefb,
    })
}

/// Unload all drivers, newest first
pub fn exit(host: &Arc<dyn HostShim>, loaded: &LoadedDrivers) -> DevResult<()> {
    pm_hooks::exit(host)?;
    simplefb::exit(host, &loaded.simplefb)?;
    counter::exit(host)?;
    chardev_buffer::exit(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::kern::sim::{Fault, SimHost};

    #[test]
    fn test_init_exit_all() {
        let host = SimHost::new(HostConfig::default());
        let shim = host.shim();
        let loaded = init(&shim).unwrap();
        let mut nodes = host.nodes();
        nodes.sort();
        assert_eq!(nodes, ["chardev_buffer", "counter", "display0"]);

        exit(&shim, &loaded).unwrap();
        assert!(host.nodes().is_empty());
        assert_eq!(host.outstanding_coherent(), 0);
    }

    #[test]
    fn test_init_failure_unwinds() {
        let host = SimHost::new(HostConfig::default());
        let shim = host.shim();
        shim.register_platform_driver(Arc::new(pm_hooks::PmHooksDriver)).unwrap();
        assert!(init(&shim).is_err());
        assert!(host.nodes().is_empty());
        assert_eq!(host.outstanding_coherent(), 0);

        shim.unregister_platform_driver(pm_hooks::DRIVER_NAME).unwrap();
        host.inject(Fault::RegisterChrdev);
        assert!(init(&shim).is_err());
        assert!(host.nodes().is_empty());
    }
}
