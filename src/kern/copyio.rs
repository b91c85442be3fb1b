//! Copyin/Copyout - User↔Driver Data Transfer
//!
//! Drivers never dereference user addresses. They go through a
//! [`UserMemory`] implementation belonging to the calling process, which
//! reports how many bytes it could NOT transfer, exactly like the kernel's
//! `copy_{from,to}_user`. The helpers here turn that count into a
//! [`CopyError`].
//!
//! Any call that touches user memory is a suspension point: a pending signal
//! aborts the copy with [`CopyError::Interrupted`].

use core::fmt;

use thiserror::Error;

use crate::error::DriverError;

/// Maximum size for a single copy operation
pub const COPYIO_MAX_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// User pointers
// ============================================================================

/// Address in a user address space
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UserPtr(pub usize);

impl UserPtr {
    pub const NULL: Self = Self(0);

    /// Raw address
    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset the pointer by `bytes`, failing on overflow
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Debug for UserPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserPtr({:#x})", self.0)
    }
}

impl From<usize> for UserPtr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

// ============================================================================
// User memory access
// ============================================================================

/// Access to the memory of the process issuing a call
pub trait UserMemory: Send + Sync {
    /// Copy `dst.len()` bytes from user address `src`
    ///
    /// Returns the number of bytes that could not be copied (zero on success).
    /// Bytes before the faulting address are transferred.
    fn copy_from_user(&self, dst: &mut [u8], src: UserPtr) -> usize;

    /// Copy `src` to user address `dst`
    ///
    /// Returns the number of bytes that could not be copied (zero on success).
    fn copy_to_user(&self, dst: UserPtr, src: &[u8]) -> usize;

    /// True if the calling thread has a signal pending
    fn signal_pending(&self) -> bool {
        false
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during copy operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyError {
    /// Null pointer, wrapping range or oversized request
    #[error("bad user address {0:?}")]
    BadAddress(UserPtr),

    /// Page fault part way through the copy
    #[error("fault copying user memory ({not_copied} bytes not copied)")]
    PageFault { not_copied: usize },

    /// A signal arrived before the copy could run
    #[error("copy interrupted by signal")]
    Interrupted,
}

impl From<CopyError> for DriverError {
    fn from(err: CopyError) -> Self {
        match err {
            CopyError::BadAddress(_) | CopyError::PageFault { .. } => DriverError::BadAddress,
            CopyError::Interrupted => DriverError::Interrupted,
        }
    }
}

// ============================================================================
// Address Validation
// ============================================================================

/// Validate a user range before attempting a copy
pub fn validate_user_range(ptr: UserPtr, size: usize) -> Result<(), CopyError> {
    if size == 0 {
        return Ok(());
    }
    if ptr.is_null() || size > COPYIO_MAX_SIZE || ptr.checked_add(size).is_none() {
        return Err(CopyError::BadAddress(ptr));
    }
    Ok(())
}

// ============================================================================
// Copyin - User → Driver
// ============================================================================

/// Copy `dst.len()` bytes from user space, all or nothing from the caller's view
pub fn copyin(user: &dyn UserMemory, src: UserPtr, dst: &mut [u8]) -> Result<(), CopyError> {
    validate_user_range(src, dst.len())?;
    if user.signal_pending() {
        return Err(CopyError::Interrupted);
    }
    match user.copy_from_user(dst, src) {
        0 => Ok(()),
        not_copied => Err(CopyError::PageFault { not_copied }),
    }
}

/// Fetch a 32-bit word from user space
pub fn fuword32(user: &dyn UserMemory, src: UserPtr) -> Result<u32, CopyError> {
    let mut buf = [0u8; 4];
    copyin(user, src, &mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

// ============================================================================
// Copyout - Driver → User
// ============================================================================

/// Copy `src` to user space
pub fn copyout(user: &dyn UserMemory, src: &[u8], dst: UserPtr) -> Result<(), CopyError> {
    validate_user_range(dst, src.len())?;
    if user.signal_pending() {
        return Err(CopyError::Interrupted);
    }
    match user.copy_to_user(dst, src) {
        0 => Ok(()),
        not_copied => Err(CopyError::PageFault { not_copied }),
    }
}

/// Store a 32-bit word to user space
pub fn suword32(user: &dyn UserMemory, dst: UserPtr, value: u32) -> Result<(), CopyError> {
    copyout(user, &value.to_ne_bytes(), dst)
}

/// Store a 64-bit word to user space
pub fn suword64(user: &dyn UserMemory, dst: UserPtr, value: u64) -> Result<(), CopyError> {
    copyout(user, &value.to_ne_bytes(), dst)
}

// ============================================================================
// Tests
// ============================================================================
