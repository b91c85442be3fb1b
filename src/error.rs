//! Driver error taxonomy
//!
//! Every driver entry point reports failures with [`DriverError`]. Each
//! variant corresponds to one errno value the host kernel would hand back to
//! user space.

use thiserror::Error;

/// Result alias used by all driver and host operations
pub type DevResult<T> = Result<T, DriverError>;

/// Errors surfaced by drivers and the host shim
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// Out-of-range geometry, unsupported format, bad index or range
    #[error("invalid argument")]
    InvalidArgument,

    /// A user-space memory copy faulted
    #[error("bad address")]
    BadAddress,

    /// Control code not understood by the device
    #[error("inappropriate ioctl for device")]
    NotTty,

    /// Allocation failed
    #[error("out of memory")]
    OutOfMemory,

    /// Transient failure after parameters were accepted
    #[error("resource temporarily unavailable")]
    TryAgain,

    /// A signal aborted a blocking copy
    #[error("interrupted system call")]
    Interrupted,

    /// No such device node, or the device went away
    #[error("no such device")]
    NoDevice,

    /// Name or resource already claimed
    #[error("device or resource busy")]
    Busy,
}

impl DriverError {
    /// Positive errno value for this error
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => 22,
            Self::BadAddress => 14,
            Self::NotTty => 25,
            Self::OutOfMemory => 12,
            Self::TryAgain => 11,
            Self::Interrupted => 4,
            Self::NoDevice => 19,
            Self::Busy => 16,
        }
    }

    /// Negative return value as a kernel entry point would report it
    pub const fn to_return(self) -> i64 {
        -(self.errno() as i64)
    }

    /// Map a positive errno back to an error, if it is one we produce
    pub const fn from_errno(errno: i32) -> Option<Self> {
        match errno {
            22 => Some(Self::InvalidArgument),
            14 => Some(Self::BadAddress),
            25 => Some(Self::NotTty),
            12 => Some(Self::OutOfMemory),
            11 => Some(Self::TryAgain),
            4 => Some(Self::Interrupted),
            19 => Some(Self::NoDevice),
            16 => Some(Self::Busy),
            _ => None,
        }
    }
}
