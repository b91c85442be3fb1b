//! Kern subsystem - Host kernel services
//!
//! Everything a driver may ask of its host: coherent memory, user copies,
//! user address spaces and the [`HostShim`] seam itself, plus the emulated
//! host implementing it.

pub mod coherent;
pub mod copyio;
pub mod host;
pub mod sim;
pub mod uspace;

pub use coherent::{page_align, CoherentRegion, PAGE_SHIFT, PAGE_SIZE};
pub use copyio::{copyin, copyout, fuword32, suword32, suword64, CopyError, UserMemory, UserPtr};
pub use host::{CachePolicy, HostShim, VmArea};
pub use sim::{Fault, SimHost};
pub use uspace::UserAddressSpace;
