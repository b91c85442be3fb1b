//! Byte-buffer character device
//!
//! A single 1024-byte buffer behind the `chardev_buffer` node. A write
//! replaces the contents from the start (at most `CAP - 1` bytes, followed by
//! a terminating zero); reads return the valid prefix from the handle's
//! position.
//!
//! User copies never run under the buffer lock. Writes land in a staging
//! buffer first and are swapped in only when the whole copy succeeded, so a
//! faulting write leaves the previous contents in place.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::conf::FileOperations;
use crate::error::DevResult;
use crate::kern::copyio::{copyin, copyout, UserMemory, UserPtr};
use crate::kern::host::HostShim;

/// Device node name
pub const DEVICE_NAME: &str = "chardev_buffer";

/// Buffer capacity; one byte is reserved for the terminator
pub const CAP: usize = 1024;

struct BufferState {
    data: [u8; CAP],
    /// Valid length, always `< CAP`
    len: usize,
}

/// The buffer device
pub struct CharBuffer {
    state: Mutex<BufferState>,
}

impl CharBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                data: [0; CAP],
                len: 0,
            }),
        }
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the valid bytes
    pub fn contents(&self) -> Vec<u8> {
        let state = self.state.lock();
        state.data[..state.len].to_vec()
    }
}

impl FileOperations for CharBuffer {
    fn open(&self) -> DevResult<()> {
        log::info!(target: DEVICE_NAME, "device opened");
        Ok(())
    }

    fn release(&self) -> DevResult<()> {
        log::info!(target: DEVICE_NAME, "device closed");
        Ok(())
    }

    fn read(&self, user: &dyn UserMemory, buf: UserPtr, len: usize, pos: &mut u64) -> DevResult<usize> {
        let chunk = {
            let state = self.state.lock();
            let valid = state.len as u64;
            if *pos >= valid {
                return Ok(0);
            }
            let start = *pos as usize;
            let count = len.min(state.len - start);
            state.data[start..start + count].to_vec()
        };

        copyout(user, &chunk, buf)?;
        *pos += chunk.len() as u64;
        log::info!(target: DEVICE_NAME, "read {} bytes", chunk.len());
        Ok(chunk.len())
    }

    fn write(&self, user: &dyn UserMemory, buf: UserPtr, len: usize, _pos: &mut u64) -> DevResult<usize> {
        let count = len.min(CAP - 1);
        let mut staged = vec![0u8; count];
        copyin(user, buf, &mut staged)?;

        let mut state = self.state.lock();
        state.data[..count].copy_from_slice(&staged);
        state.data[count] = 0;
        state.len = count;
        drop(state);

        log::info!(target: DEVICE_NAME, "wrote {} bytes", count);
        Ok(count)
    }

    fn size(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

/// Create the device and its node
pub fn init(host: &Arc<dyn HostShim>) -> DevResult<Arc<CharBuffer>> {
    let dev = Arc::new(CharBuffer::new());
    let id = host.register_chrdev(DEVICE_NAME, dev.clone()).map_err(|err| {
        log::error!(target: DEVICE_NAME, "failed to register device: {}", err);
        err
    })?;
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
    use crate::error::DriverError;
    use crate::kern::sim::SimHost;

    fn setup() -> (Arc<SimHost>, Arc<crate::kern::uspace::UserAddressSpace>, CharBuffer) {
        let host = SimHost::new(HostConfig::default());
        let mm = host.spawn_process();
        (host, mm, CharBuffer::new())
    }

    #[test]
    fn test_write_then_read() {
        let (_host, mm, dev) = setup();
        let src = mm.map_anon(4096).unwrap();
        mm.write_bytes(src, b"hello").unwrap();

        let mut pos = 0;
        assert_eq!(dev.write(&*mm, src, 5, &mut pos), Ok(5));
        assert_eq!(dev.contents(), b"hello");

        let dst = mm.map_anon(4096).unwrap();
        let mut pos = 0;
        assert_eq!(dev.read(&*mm, dst, 100, &mut pos), Ok(5));
        assert_eq!(pos, 5);
        assert_eq!(mm.read_bytes(dst, 5).unwrap(), b"hello");
        assert_eq!(dev.read(&*mm, dst, 100, &mut pos), Ok(0));
    }

    #[test]
    fn test_write_truncates_to_cap() {
        let (_host, mm, dev) = setup();
        let src = mm.map_anon(2 * CAP).unwrap();
        mm.write_bytes(src, &[b'x'; 2 * CAP]).unwrap();
        let mut pos = 0;
        assert_eq!(dev.write(&*mm, src, 2 * CAP, &mut pos), Ok(CAP - 1));
        assert_eq!(dev.len(), CAP - 1);
    }

    #[test]
    fn test_read_from_offset() {
        let (_host, mm, dev) = setup();
        let src = mm.map_anon(4096).unwrap();
        mm.write_bytes(src, b"abcdef").unwrap();
        let mut pos = 0;
        dev.write(&*mm, src, 6, &mut pos).unwrap();

        let mut pos = 4;
        assert_eq!(dev.read(&*mm, src, 10, &mut pos), Ok(2));
        assert_eq!(mm.read_bytes(src, 2).unwrap(), b"ef");
    }

    #[test]
    fn test_faulting_write_keeps_contents() {
        let (_host, mm, dev) = setup();
        let src = mm.map_anon(4096).unwrap();
        mm.write_bytes(src, b"keep").unwrap();
        let mut pos = 0;
        dev.write(&*mm, src, 4, &mut pos).unwrap();

        assert_eq!(dev.write(&*mm, UserPtr(0x10), 4, &mut pos), Err(DriverError::BadAddress));
        assert_eq!(dev.contents(), b"keep");
    }

    #[test]
    fn test_faulting_read_keeps_position() {
        let (_host, mm, dev) = setup();
        let src = mm.map_anon(4096).unwrap();
        mm.write_bytes(src, b"data").unwrap();
        let mut pos = 0;
        dev.write(&*mm, src, 4, &mut pos).unwrap();

        let mut pos = 0;
        assert_eq!(dev.read(&*mm, UserPtr(0x10), 4, &mut pos), Err(DriverError::BadAddress));
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_init_registers_node() {
        let host = SimHost::new(HostConfig::default());
        let shim = host.shim();
        init(&shim).unwrap();
        assert!(host.nodes().iter().any(|n| n == DEVICE_NAME));
        assert_eq!(init(&shim).err(), Some(DriverError::Busy));
        exit(&shim).unwrap();
        assert!(host.nodes().is_empty());
    }
}
