//! Control code encoding
//!
//! Linux-style `_IOC` numbers: 2 bits of direction, 14 bits of payload size,
//! 8 bits of type (the driver's magic) and 8 bits of command number.

/// No payload
pub const IOC_NONE: u32 = 0;
/// Caller → driver payload
pub const IOC_WRITE: u32 = 1;
/// Driver → caller payload
pub const IOC_READ: u32 = 2;

const NRBITS: u32 = 8;
const TYPEBITS: u32 = 8;
const SIZEBITS: u32 = 14;

const NRSHIFT: u32 = 0;
const TYPESHIFT: u32 = NRSHIFT + NRBITS;
const SIZESHIFT: u32 = TYPESHIFT + TYPEBITS;
const DIRSHIFT: u32 = SIZESHIFT + SIZEBITS;

const SIZEMASK: u32 = (1 << SIZEBITS) - 1;

/// Build a control code
pub const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << DIRSHIFT)
        | (((size as u32) & SIZEMASK) << SIZESHIFT)
        | ((ty as u32) << TYPESHIFT)
        | ((nr as u32) << NRSHIFT)
}

/// Code with no payload
pub const fn io(ty: u8, nr: u8) -> u32 {
    ioc(IOC_NONE, ty, nr, 0)
}

/// Code whose payload the driver writes back to the caller
pub const fn ior(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_READ, ty, nr, size)
}

/// Code whose payload the caller hands to the driver
pub const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_WRITE, ty, nr, size)
}

pub const fn ioc_dir(cmd: u32) -> u32 {
    cmd >> DIRSHIFT
}

pub const fn ioc_size(cmd: u32) -> usize {
    ((cmd >> SIZESHIFT) & SIZEMASK) as usize
}
