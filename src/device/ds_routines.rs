//! Device Server Routines
//!
//! The system-call surface user programs use against device nodes: open,
//! read, write, seek, control, map. Frame-surface calls (`ds_fb_*`) take
//! typed arguments and reach the framebuffer core directly.
//!
//! Every call into a driver runs inside an I/O guard on the device header so
//! removal can wait for it; calls on a removed node or closed handle fail
//! with `NoDevice`.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::device::conf::{DevOps, FileOperations};
use crate::device::dev_hdr::{self, CharDevice, DeviceId, DeviceRegistry};
use crate::device::dev_pager::DevPager;
use crate::error::{DevResult, DriverError};
use crate::fb::cmap::ColorMap;
use crate::fb::sysdraw::{CopyArea, FbImage, FillRect};
use crate::fb::var::{FbFixScreenInfo, FbVarScreenInfo};
use crate::fb::{self, BlankState, FbOps};
use crate::kern::coherent::{page_align, PAGE_SHIFT, PAGE_SIZE};
use crate::kern::copyio::UserPtr;
use crate::kern::host::VmArea;
use crate::kern::uspace::UserAddressSpace;

// ============================================================================
// Device Server
// ============================================================================

/// Device namespace and mapping bookkeeping of one host
pub struct DeviceServer {
    registry: Mutex<DeviceRegistry>,
    pager: Arc<DevPager>,
}

impl DeviceServer {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(DeviceRegistry::new()),
            pager: Arc::new(DevPager::new()),
        }
    }

    /// Create a device node
    pub fn register(&self, name: &str, fops: Arc<dyn FileOperations>) -> DevResult<DeviceId> {
        let device = self.registry.lock().register(DevOps::new(name, fops))?;
        log::debug!(target: "device", "registered {} as {:?}", name, device.id);
        Ok(device.id)
    }

    /// Remove a device node
    ///
    /// The node leaves the namespace, in-flight calls drain, then every user
    /// mapping of it is torn down.
    pub fn unregister(&self, name: &str) -> DevResult<()> {
        let device = self.registry.lock().remove(name).ok_or(DriverError::NoDevice)?;
        device.retire();
        let torn = self.pager.teardown(device.id);
        log::debug!(target: "device", "unregistered {} ({} mapping(s) torn down)", name, torn);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CharDevice>> {
        self.registry.lock().lookup(name)
    }

    /// Names of all device nodes
    pub fn nodes(&self) -> Vec<String> {
        self.registry.lock().names()
    }

    /// Mapping bookkeeping
    pub fn pager(&self) -> &Arc<DevPager> {
        &self.pager
    }
}

impl Default for DeviceServer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Open files
// ============================================================================

/// An open handle on a device node
pub struct OpenFile {
    device: Arc<CharDevice>,
    mm: Arc<UserAddressSpace>,
    pager: Arc<DevPager>,
    pos: Mutex<u64>,
    closed: AtomicBool,
}

/// Handle returned by [`ds_open`]
pub type FileHandle = Arc<OpenFile>;

impl OpenFile {
    fn device(&self) -> DevResult<&Arc<CharDevice>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::NoDevice);
        }
        Ok(&self.device)
    }

    /// Name of the node this handle is open on
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// Current file position
    pub fn pos(&self) -> u64 {
        *self.pos.lock()
    }

    /// Address space of the process owning the handle
    pub fn mm(&self) -> &Arc<UserAddressSpace> {
        &self.mm
    }
}

impl core::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenFile")
            .field("device", &self.device.name())
            .field("pos", &self.pos())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

// ============================================================================
// Device Server Operations
// ============================================================================

/// Open a device node by name
pub fn ds_open(server: &DeviceServer, mm: &Arc<UserAddressSpace>, name: &str) -> DevResult<FileHandle> {
    let device = server.lookup(name).ok_or(DriverError::NoDevice)?;
    dev_hdr::device_open(&device)?;
    Ok(Arc::new(OpenFile {
        device,
        mm: mm.clone(),
        pager: server.pager.clone(),
        pos: Mutex::new(0),
        closed: AtomicBool::new(false),
    }))
}

/// Close a handle; further calls on it fail
pub fn ds_close(file: &OpenFile) -> DevResult<()> {
    if file.closed.swap(true, Ordering::SeqCst) {
        return Err(DriverError::NoDevice);
    }
    dev_hdr::device_close(&file.device)
}

/// Read up to `len` bytes into user `buf` at the handle's position
pub fn ds_read(file: &OpenFile, buf: UserPtr, len: usize) -> DevResult<usize> {
    let device = file.device()?;
    let _io = device.io_start()?;
    let mut pos = file.pos();
    let n = device.fops().read(&*file.mm, buf, len, &mut pos)?;
    *file.pos.lock() = pos;
    Ok(n)
}

/// Write up to `len` bytes from user `buf` at the handle's position
pub fn ds_write(file: &OpenFile, buf: UserPtr, len: usize) -> DevResult<usize> {
    let device = file.device()?;
    let _io = device.io_start()?;
    let mut pos = file.pos();
    let n = device.fops().write(&*file.mm, buf, len, &mut pos)?;
    *file.pos.lock() = pos;
    Ok(n)
}

/// Reposition the handle
pub fn ds_lseek(file: &OpenFile, offset: i64, whence: Whence) -> DevResult<u64> {
    let device = file.device()?;
    let base = match whence {
        Whence::Set => 0,
        Whence::Cur => file.pos() as i64,
        Whence::End => device.fops().size().ok_or(DriverError::InvalidArgument)? as i64,
    };
    let target = base.checked_add(offset).ok_or(DriverError::InvalidArgument)?;
    let target = u64::try_from(target).map_err(|_| DriverError::InvalidArgument)?;
    *file.pos.lock() = target;
    Ok(target)
}

/// Control request; `arg` is a user address or plain value per `cmd`
pub fn ds_ioctl(file: &OpenFile, cmd: u32, arg: usize) -> DevResult<i64> {
    let device = file.device()?;
    let _io = device.io_start()?;
    device.fops().ioctl(&*file.mm, cmd, arg)
}

/// Map `len` bytes of the device at `offset` into the handle's process
pub fn ds_mmap(file: &OpenFile, len: usize, offset: u64) -> DevResult<UserPtr> {
    let device = file.device()?;
    if len == 0 || offset % PAGE_SIZE as u64 != 0 {
        return Err(DriverError::InvalidArgument);
    }
    let _io = device.io_start()?;

    let start = file.mm.reserve(len)?;
    let mut vma = VmArea::new(file.mm.clone(), start, page_align(len), offset >> PAGE_SHIFT);
    if let Err(err) = device.fops().mmap(&mut vma) {
        file.mm.unmap(start);
        return Err(err);
    }
    file.pager.record(device.id, &file.mm, start, vma.len, offset);
    log::debug!(target: "device", "{}: mapped {:#x} bytes at {:?}", device.name(), vma.len, start);
    Ok(start)
}

/// Remove a mapping from a process
pub fn ds_munmap(server: &DeviceServer, mm: &Arc<UserAddressSpace>, addr: UserPtr) -> DevResult<()> {
    if !mm.is_mapped(addr) {
        return Err(DriverError::InvalidArgument);
    }
    server.pager.unmap(mm, addr);
    Ok(())
}

// ============================================================================
// Frame-surface operations
// ============================================================================

fn with_fb<R>(file: &OpenFile, f: impl FnOnce(&dyn FbOps) -> DevResult<R>) -> DevResult<R> {
    let device = file.device()?;
    let _io = device.io_start()?;
    let fb = device.fops().as_framebuffer().ok_or(DriverError::NotTty)?;
    f(fb.as_ref())
}

/// Current mode
pub fn ds_fb_get_var(file: &OpenFile) -> DevResult<FbVarScreenInfo> {
    with_fb(file, |fb| Ok(fb.info().var()))
}

/// Request a new mode; returns the mode as applied
pub fn ds_fb_put_var(file: &OpenFile, var: &FbVarScreenInfo) -> DevResult<FbVarScreenInfo> {
    with_fb(file, |fb| fb::fb_set_var(fb, var))
}

/// Fixed surface information
pub fn ds_fb_get_fix(file: &OpenFile) -> DevResult<FbFixScreenInfo> {
    with_fb(file, |fb| Ok(fb.info().fix()))
}

/// Set one pseudo-palette register from 16-bit channels
pub fn ds_fb_setcolreg(file: &OpenFile, regno: u32, red: u32, green: u32, blue: u32, transp: u32) -> DevResult<()> {
    with_fb(file, |fb| fb.setcolreg(regno, red, green, blue, transp))
}

/// Write colour-map entries
pub fn ds_fb_set_cmap(file: &OpenFile, cmap: &ColorMap) -> DevResult<()> {
    with_fb(file, |fb| fb::fb_set_cmap(fb, cmap))
}

/// Change the display power state
pub fn ds_fb_blank(file: &OpenFile, mode: i32) -> DevResult<BlankState> {
    with_fb(file, |fb| fb::fb_blank(fb, mode))
}

/// Pan the visible window
pub fn ds_fb_pan(file: &OpenFile, xoffset: u32, yoffset: u32) -> DevResult<()> {
    with_fb(file, |fb| fb::fb_pan_display(fb, xoffset, yoffset))
}

pub fn ds_fb_fillrect(file: &OpenFile, rect: &FillRect) -> DevResult<()> {
    with_fb(file, |fb| fb.fillrect(rect))
}

pub fn ds_fb_copyarea(file: &OpenFile, area: &CopyArea) -> DevResult<()> {
    with_fb(file, |fb| fb.copyarea(area))
}

pub fn ds_fb_imageblit(file: &OpenFile, image: &FbImage) -> DevResult<()> {
    with_fb(file, |fb| fb.imageblit(image))
}
