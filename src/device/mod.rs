//! Device Subsystem
//!
//! The host side of device drivers:
//! - Device operations tables and node headers
//! - The platform bus drivers bind to
//! - Mapping bookkeeping for device memory
//! - The system-call surface user programs drive devices through

pub mod conf;
pub mod dev_hdr;
pub mod dev_pager;
pub mod ds_routines;
pub mod ioctl;
pub mod platform;

pub use conf::{DevOps, FileOperations};
pub use dev_hdr::{CharDevice, DeviceId, DeviceState};
pub use ds_routines::{DeviceServer, FileHandle, Whence};
pub use platform::{PlatformBus, PlatformDevice, PlatformDriver};
