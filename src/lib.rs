//! kshim - teaching device drivers hosted on an emulated kernel
//!
//! This crate provides four small drivers and the host seam they plug into:
//! a byte-buffer character device, an ioctl-driven counter, a synthetic
//! framebuffer exposing a linear pixel surface through memory mapping, and a
//! power-management lifecycle stub.
//!
//! The drivers only see the [`kern::host::HostShim`] trait. [`kern::sim::SimHost`]
//! implements it in user space so the device contracts can be exercised
//! without loading anything into a real kernel.

#![cfg_attr(not(feature = "std"), no_std)]
// Kernel-appropriate clippy configuration
// Many driver types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Register layouts read better with explicit shifts
#![allow(clippy::identity_op)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod error;

pub mod device;
pub mod drivers;
pub mod fb;
pub mod kern;

pub use error::{DevResult, DriverError};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = "kshim";
