//! Device Configuration - Operations Tables
//!
//! A driver serves a device node through a [`FileOperations`] table. Every
//! callback has a default that behaves like a missing entry in a kernel
//! `file_operations` struct, so drivers only implement what they support.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::error::{DevResult, DriverError};
use crate::fb::FbOps;
use crate::kern::copyio::{UserMemory, UserPtr};
use crate::kern::host::VmArea;

// ============================================================================
// File operations
// ============================================================================

/// Callback table for a character device node
pub trait FileOperations: Send + Sync {
    /// A handle on the node was opened
    fn open(&self) -> DevResult<()> {
        Ok(())
    }

    /// A handle on the node was closed
    fn release(&self) -> DevResult<()> {
        Ok(())
    }

    /// Copy up to `len` bytes from position `*pos` to user `buf`
    ///
    /// Returns the byte count; zero means end of data. The driver advances
    /// `*pos` only on success.
    fn read(&self, _user: &dyn UserMemory, _buf: UserPtr, _len: usize, _pos: &mut u64) -> DevResult<usize> {
        Err(DriverError::InvalidArgument)
    }

    /// Copy up to `len` bytes from user `buf` into the device
    fn write(&self, _user: &dyn UserMemory, _buf: UserPtr, _len: usize, _pos: &mut u64) -> DevResult<usize> {
        Err(DriverError::InvalidArgument)
    }

    /// Out-of-band control request
    fn ioctl(&self, _user: &dyn UserMemory, _cmd: u32, _arg: usize) -> DevResult<i64> {
        Err(DriverError::NotTty)
    }

    /// Back the reserved user range in `vma` with device memory
    fn mmap(&self, _vma: &mut VmArea) -> DevResult<()> {
        Err(DriverError::NoDevice)
    }

    /// Size of the device contents, for seeks relative to the end
    fn size(&self) -> Option<u64> {
        None
    }

    /// Frame-surface operations, if this node is a framebuffer
    fn as_framebuffer(&self) -> Option<Arc<dyn FbOps>> {
        None
    }
}

// ============================================================================
// Device Operations
// ============================================================================

/// Registration record for one device node
#[derive(Clone)]
pub struct DevOps {
    /// Node name
    pub name: String,
    /// Driver callbacks
    pub fops: Arc<dyn FileOperations>,
}

impl DevOps {
    pub fn new(name: &str, fops: Arc<dyn FileOperations>) -> Self {
        Self {
            name: String::from(name),
            fops,
        }
    }
}

impl fmt::Debug for DevOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevOps")
            .field("name", &self.name)
            .field("framebuffer", &self.fops.as_framebuffer().is_some())
            .finish()
    }
}
