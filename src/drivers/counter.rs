//! Counter device with an ioctl control channel
//!
//! The `counter` node holds one signed 32-bit counter and is driven only
//! through control codes; it has no read or write.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, Ordering};

use crate::device::conf::FileOperations;
use crate::device::ioctl::{io, ioc_dir, ioc_size, ior, iow, IOC_READ, IOC_WRITE};
use crate::error::{DevResult, DriverError};
use crate::kern::copyio::{fuword32, suword32, UserMemory, UserPtr};
use crate::kern::host::HostShim;

/// Device node name
pub const DEVICE_NAME: &str = "counter";

/// Magic number shared by the counter's codes
pub const COUNTER_MAGIC: u8 = b'k';

/// Copy the counter out to the `i32` at `arg`
pub const COUNTER_GET: u32 = ior(COUNTER_MAGIC, 1, core::mem::size_of::<i32>());
/// Set the counter from the `i32` at `arg`
pub const COUNTER_SET: u32 = iow(COUNTER_MAGIC, 2, core::mem::size_of::<i32>());
/// Set the counter to zero
pub const COUNTER_RESET: u32 = io(COUNTER_MAGIC, 3);
/// Add one, wrapping
pub const COUNTER_INCREMENT: u32 = io(COUNTER_MAGIC, 4);

/// The counter device
pub struct Counter {
    value: AtomicI32,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicI32::new(0),
        }
    }

    /// Current value
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }
}

impl FileOperations for Counter {
    fn open(&self) -> DevResult<()> {
        log::info!(target: DEVICE_NAME, "device opened");
        Ok(())
    }

    fn release(&self) -> DevResult<()> {
        log::info!(target: DEVICE_NAME, "device closed");
        Ok(())
    }

    fn ioctl(&self, user: &dyn UserMemory, cmd: u32, arg: usize) -> DevResult<i64> {
        let arg = UserPtr(arg);
        match cmd {
            COUNTER_GET => {
                debug_assert!(ioc_dir(cmd) == IOC_READ && ioc_size(cmd) == 4);
                let value = self.value();
                suword32(user, arg, value as u32)?;
                log::info!(target: DEVICE_NAME, "get: {}", value);
            }
            COUNTER_SET => {
                debug_assert!(ioc_dir(cmd) == IOC_WRITE && ioc_size(cmd) == 4);
                let value = fuword32(user, arg)? as i32;
                self.value.store(value, Ordering::SeqCst);
                log::info!(target: DEVICE_NAME, "set: {}", value);
            }
            COUNTER_RESET => {
                self.value.store(0, Ordering::SeqCst);
                log::info!(target: DEVICE_NAME, "reset");
            }
            COUNTER_INCREMENT => {
                // fetch_add wraps on overflow
                let value = self.value.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
                log::info!(target: DEVICE_NAME, "increment: {}", value);
            }
            _ => {
                log::debug!(target: DEVICE_NAME, "unknown code {:#x}", cmd);
                return Err(DriverError::InvalidArgument);
            }
        }
        Ok(0)
    }
}

/// Create the device and its node
pub fn init(host: &Arc<dyn HostShim>) -> DevResult<Arc<Counter>> {
    let dev = Arc::new(Counter::new());
    let id = host.register_chrdev(DEVICE_NAME, dev.clone())?;
    log::info!(target: DEVICE_NAME, "registered as {:?}", id);
    Ok(dev)
}

/// Remove the node
pub fn exit(host: &Arc<dyn HostShim>) -> DevResult<()> {
    host.unregister_chrdev(DEVICE_NAME)?;
    log::info!(target: DEVICE_NAME, "unregistered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::kern::sim::SimHost;

    #[test]
    fn test_code_values() {
        assert_eq!(COUNTER_GET, 0x8004_6b01);
        assert_eq!(COUNTER_SET, 0x4004_6b02);
        assert_eq!(COUNTER_RESET, 0x6b03);
        assert_eq!(COUNTER_INCREMENT, 0x6b04);
    }

    #[test]
    fn test_set_increment_get() {
        let host = SimHost::new(HostConfig::default());
        let mm = host.spawn_process();
        let arg = mm.map_anon(4096).unwrap();
        let dev = Counter::new();

        mm.write_u32(arg, 41).unwrap();
        dev.ioctl(&*mm, COUNTER_SET, arg.addr()).unwrap();
        dev.ioctl(&*mm, COUNTER_INCREMENT, 0).unwrap();
        dev.ioctl(&*mm, COUNTER_GET, arg.addr()).unwrap();
        assert_eq!(mm.read_u32(arg).unwrap(), 42);

        dev.ioctl(&*mm, COUNTER_RESET, 0).unwrap();
        assert_eq!(dev.value(), 0);
    }

    #[test]
    fn test_increment_wraps() {
        let host = SimHost::new(HostConfig::default());
        let mm = host.spawn_process();
        let arg = mm.map_anon(4096).unwrap();
        let dev = Counter::new();

        mm.write_u32(arg, i32::MAX as u32).unwrap();
        dev.ioctl(&*mm, COUNTER_SET, arg.addr()).unwrap();
        dev.ioctl(&*mm, COUNTER_INCREMENT, 0).unwrap();
        assert_eq!(dev.value(), i32::MIN);
    }

    #[test]
    fn test_unknown_code_and_faults() {
        let host = SimHost::new(HostConfig::default());
        let mm = host.spawn_process();
        let dev = Counter::new();
        dev.ioctl(&*mm, COUNTER_INCREMENT, 0).unwrap();

        assert_eq!(dev.ioctl(&*mm, io(COUNTER_MAGIC, 9), 0), Err(DriverError::InvalidArgument));
        assert_eq!(dev.ioctl(&*mm, COUNTER_SET, 0x10), Err(DriverError::BadAddress));
        assert_eq!(dev.ioctl(&*mm, COUNTER_GET, 0x10), Err(DriverError::BadAddress));
        assert_eq!(dev.value(), 1);
    }

    #[test]
    fn test_no_read_write() {
        let host = SimHost::new(HostConfig::default());
        let mm = host.spawn_process();
        let dev = Counter::new();
        let mut pos = 0;
        assert_eq!(dev.read(&*mm, UserPtr(0), 4, &mut pos), Err(DriverError::InvalidArgument));
        assert_eq!(dev.write(&*mm, UserPtr(0), 4, &mut pos), Err(DriverError::InvalidArgument));
    }
}
