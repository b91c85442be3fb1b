//! Framebuffer core
//!
//! A framebuffer driver implements [`FbOps`] and owns an [`FbInfo`]: the
//! current mode, the pixel store, the 16-entry pseudo-palette used by the
//! console drawing paths and the colour map. The core functions here drive
//! the callbacks the way the host's framebuffer layer does (check then
//! commit, pan bookkeeping, colour-map fan-out) and [`FbDevice`] exposes a
//! registered framebuffer as a device node.
//!
//! Mode changes take the state write lock; drawing takes the read lock, so
//! `set_par` never runs concurrently with a blit.

pub mod cmap;
pub mod sysdraw;
pub mod var;

use alloc::sync::Arc;
use alloc::vec;

use spin::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::conf::FileOperations;
use crate::error::{DevResult, DriverError};
use crate::kern::coherent::CoherentRegion;
use crate::kern::copyio::{copyin, copyout, UserMemory, UserPtr};
use crate::kern::host::VmArea;

use self::cmap::ColorMap;
use self::sysdraw::{CopyArea, FbImage, FillRect, Surface};
use self::var::{FbFixScreenInfo, FbVarScreenInfo};

/// Entries in the pseudo-palette
pub const PSEUDO_PALETTE_LEN: usize = 16;

/// Display power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlankState {
    /// Screen on
    #[default]
    On,
    /// Screen blanked or powered down
    Off,
}

/// Mode state guarded by the framebuffer's lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbState {
    pub var: FbVarScreenInfo,
    pub fix: FbFixScreenInfo,
    pub blank: BlankState,
}

// ============================================================================
// Framebuffer info
// ============================================================================

/// Per-framebuffer state shared between the driver and the core
pub struct FbInfo {
    node: Mutex<Option<u32>>,
    state: RwLock<FbState>,
    pseudo_palette: Mutex<[u32; PSEUDO_PALETTE_LEN]>,
    cmap: Mutex<ColorMap>,
    screen: Arc<CoherentRegion>,
}

impl FbInfo {
    pub fn new(screen: Arc<CoherentRegion>, var: FbVarScreenInfo, fix: FbFixScreenInfo, cmap: ColorMap) -> Self {
        Self {
            node: Mutex::new(None),
            state: RwLock::new(FbState {
                var,
                fix,
                blank: BlankState::On,
            }),
            pseudo_palette: Mutex::new([0; PSEUDO_PALETTE_LEN]),
            cmap: Mutex::new(cmap),
            screen,
        }
    }

    /// Shared access to the mode (drawing)
    pub fn read(&self) -> RwLockReadGuard<'_, FbState> {
        self.state.read()
    }

    /// Exclusive access to the mode (mode changes)
    pub fn write(&self) -> RwLockWriteGuard<'_, FbState> {
        self.state.write()
    }

    pub fn var(&self) -> FbVarScreenInfo {
        self.state.read().var
    }

    pub fn fix(&self) -> FbFixScreenInfo {
        self.state.read().fix
    }

    pub fn blank_state(&self) -> BlankState {
        self.state.read().blank
    }

    /// Pixel store
    pub fn screen(&self) -> &Arc<CoherentRegion> {
        &self.screen
    }

    /// Node number once registered
    pub fn node(&self) -> Option<u32> {
        *self.node.lock()
    }

    pub fn set_node(&self, node: Option<u32>) {
        *self.node.lock() = node;
    }

    /// Store a pseudo-palette entry
    pub fn set_palette_entry(&self, regno: usize, value: u32) -> DevResult<()> {
        let mut palette = self.pseudo_palette.lock();
        let slot = palette.get_mut(regno).ok_or(DriverError::InvalidArgument)?;
        *slot = value;
        Ok(())
    }

    /// Snapshot of the pseudo-palette
    pub fn pseudo_palette(&self) -> [u32; PSEUDO_PALETTE_LEN] {
        *self.pseudo_palette.lock()
    }

    /// Snapshot of the colour map
    pub fn cmap(&self) -> ColorMap {
        self.cmap.lock().clone()
    }

    /// Detach the colour map, leaving an empty one
    pub fn take_cmap(&self) -> ColorMap {
        core::mem::take(&mut *self.cmap.lock())
    }
}

impl core::fmt::Debug for FbInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FbInfo")
            .field("node", &self.node())
            .field("mode", &format_args!("{}", self.var()))
            .field("screen", &self.screen)
            .finish()
    }
}

// ============================================================================
// Driver callbacks
// ============================================================================

/// Operations a framebuffer driver provides
pub trait FbOps: Send + Sync {
    /// Shared state
    fn info(&self) -> &FbInfo;

    /// Validate a mode, adjusting the channel layout; must not touch state
    fn check_var(&self, var: &mut FbVarScreenInfo) -> DevResult<()>;

    /// Apply the mode already stored in `state.var`
    fn set_par(&self, state: &mut FbState) -> DevResult<()>;

    /// Set pseudo-palette register `regno` from 16-bit channel values
    fn setcolreg(&self, regno: u32, red: u32, green: u32, blue: u32, transp: u32) -> DevResult<()>;

    /// Map a blank code to the display state
    fn blank(&self, mode: i32) -> DevResult<BlankState>;

    /// Validate the pan offsets in `var` against the current mode
    fn pan_display(&self, var: &FbVarScreenInfo, state: &FbState) -> DevResult<()>;

    fn fillrect(&self, rect: &FillRect) -> DevResult<()>;

    fn copyarea(&self, area: &CopyArea) -> DevResult<()>;

    fn imageblit(&self, image: &FbImage) -> DevResult<()>;

    /// Map the pixel store into `vma`
    fn mmap(&self, vma: &mut VmArea) -> DevResult<()>;

    /// Driver-specific control codes
    fn ioctl(&self, _user: &dyn UserMemory, _cmd: u32, _arg: usize) -> DevResult<i64> {
        Err(DriverError::NotTty)
    }
}

// ============================================================================
// Core operations
// ============================================================================

/// Check and commit a new mode; returns the mode as applied
///
/// A rejected mode leaves the current one untouched. Virtual resolution
/// follows the visible one and pan offsets reset.
pub fn fb_set_var(fb: &dyn FbOps, var: &FbVarScreenInfo) -> DevResult<FbVarScreenInfo> {
    let mut var = *var;
    fb.check_var(&mut var)?;
    var.xres_virtual = var.xres;
    var.yres_virtual = var.yres;
    var.xoffset = 0;
    var.yoffset = 0;

    let mut state = fb.info().write();
    let saved = *state;
    state.var = var;
    if let Err(err) = fb.set_par(&mut state) {
        *state = saved;
        return Err(err);
    }
    Ok(state.var)
}

/// Pan to `(xoffset, yoffset)`; offsets are recorded on success
pub fn fb_pan_display(fb: &dyn FbOps, xoffset: u32, yoffset: u32) -> DevResult<()> {
    let mut state = fb.info().write();
    let mut var = state.var;
    var.xoffset = xoffset;
    var.yoffset = yoffset;
    fb.pan_display(&var, &state)?;
    state.var.xoffset = xoffset;
    state.var.yoffset = yoffset;
    Ok(())
}

/// Change the display power state
pub fn fb_blank(fb: &dyn FbOps, mode: i32) -> DevResult<BlankState> {
    let blank = fb.blank(mode)?;
    fb.info().write().blank = blank;
    Ok(blank)
}

/// Feed colour-map entries through `setcolreg` and store them
///
/// Stops quietly at the first entry the driver rejects; entries up to that
/// point are applied and the whole overlap is kept in the colour map.
pub fn fb_set_cmap(fb: &dyn FbOps, cmap: &ColorMap) -> DevResult<()> {
    if !cmap.is_consistent() {
        return Err(DriverError::InvalidArgument);
    }
    for i in 0..cmap.len() {
        let Some((r, g, b, a)) = cmap.entry(i) else {
            break;
        };
        let regno = cmap.start.saturating_add(i as u32);
        if fb
            .setcolreg(regno, r.into(), g.into(), b.into(), a.into())
            .is_err()
        {
            break;
        }
    }
    fb.info().cmap.lock().copy_from(cmap)?;
    Ok(())
}

/// Software rectangle fill under the read lock
pub fn sys_fillrect(info: &FbInfo, rect: &FillRect) -> DevResult<()> {
    let state = info.read();
    sysdraw::fill_rect(&Surface::new(info.screen(), &state.var, &state.fix), rect)
}

/// Software area copy under the read lock
pub fn sys_copyarea(info: &FbInfo, area: &CopyArea) -> DevResult<()> {
    let state = info.read();
    sysdraw::copy_area(&Surface::new(info.screen(), &state.var, &state.fix), area)
}

/// Software image blit under the read lock
pub fn sys_imageblit(info: &FbInfo, image: &FbImage) -> DevResult<()> {
    let palette = info.pseudo_palette();
    let state = info.read();
    sysdraw::image_blit(&Surface::new(info.screen(), &state.var, &state.fix), image, &palette)
}

/// Byte-stream read of the pixel store at `*pos`
pub fn fb_read(info: &FbInfo, user: &dyn UserMemory, buf: UserPtr, len: usize, pos: &mut u64) -> DevResult<usize> {
    let total = info.fix().smem_len as u64;
    if *pos >= total {
        return Ok(0);
    }
    let count = (len as u64).min(total - *pos) as usize;
    let mut bounce = vec![0u8; count];
    info.screen().read(*pos as usize, &mut bounce)?;
    copyout(user, &bounce, buf)?;
    *pos += count as u64;
    Ok(count)
}

/// Byte-stream write of the pixel store at `*pos`
///
/// Writes that only partly fit are truncated; a write starting at or past
/// the end has no room and fails.
pub fn fb_write(info: &FbInfo, user: &dyn UserMemory, buf: UserPtr, len: usize, pos: &mut u64) -> DevResult<usize> {
    let total = info.fix().smem_len as u64;
    if len == 0 {
        return Ok(0);
    }
    if *pos >= total {
        return Err(DriverError::InvalidArgument);
    }
    let count = (len as u64).min(total - *pos) as usize;
    let mut bounce = vec![0u8; count];
    copyin(user, buf, &mut bounce)?;
    info.screen().write(*pos as usize, &bounce)?;
    *pos += count as u64;
    Ok(count)
}

// ============================================================================
// Device node
// ============================================================================

/// A registered framebuffer seen as a device node
pub struct FbDevice {
    fb: Arc<dyn FbOps>,
}

impl FbDevice {
    pub fn new(fb: Arc<dyn FbOps>) -> Self {
        Self { fb }
    }
}

impl FileOperations for FbDevice {
    fn open(&self) -> DevResult<()> {
        log::debug!(target: "fbmem", "fb{:?}: open", self.fb.info().node());
        Ok(())
    }

    fn read(&self, user: &dyn UserMemory, buf: UserPtr, len: usize, pos: &mut u64) -> DevResult<usize> {
        fb_read(self.fb.info(), user, buf, len, pos)
    }

    fn write(&self, user: &dyn UserMemory, buf: UserPtr, len: usize, pos: &mut u64) -> DevResult<usize> {
        fb_write(self.fb.info(), user, buf, len, pos)
    }

    fn ioctl(&self, user: &dyn UserMemory, cmd: u32, arg: usize) -> DevResult<i64> {
        self.fb.ioctl(user, cmd, arg)
    }

    fn mmap(&self, vma: &mut VmArea) -> DevResult<()> {
        self.fb.mmap(vma)
    }

    fn size(&self) -> Option<u64> {
        Some(self.fb.info().fix().smem_len as u64)
    }

    fn as_framebuffer(&self) -> Option<Arc<dyn FbOps>> {
        Some(self.fb.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::coherent::PAGE_SIZE;
    use core::sync::atomic::{AtomicBool, Ordering};

    /// Accepts any 32 bpp mode up to 64×64
    struct TestFb {
        info: FbInfo,
        fail_par: AtomicBool,
    }

    impl TestFb {
        fn new() -> Self {
            let screen = Arc::new(CoherentRegion::allocate(64 * 64 * 4, PAGE_SIZE, 0x8000_0000).unwrap());
            let mut fix = FbFixScreenInfo::packed_truecolor("test");
            fix.smem_len = screen.len() as u32;
            fix.line_length = 64 * 4;
            Self {
                info: FbInfo::new(screen, FbVarScreenInfo::mode(64, 64, 32), fix, ColorMap::new(256, false)),
                fail_par: AtomicBool::new(false),
            }
        }
    }

    impl FbOps for TestFb {
        fn info(&self) -> &FbInfo {
            &self.info
        }

        fn check_var(&self, var: &mut FbVarScreenInfo) -> DevResult<()> {
            if var.xres > 64 || var.yres > 64 || var.bits_per_pixel != 32 {
                return Err(DriverError::InvalidArgument);
            }
            Ok(())
        }

        fn set_par(&self, state: &mut FbState) -> DevResult<()> {
            if self.fail_par.load(Ordering::SeqCst) {
                return Err(DriverError::TryAgain);
            }
            state.fix.line_length = state.var.xres * 4;
            Ok(())
        }

        fn setcolreg(&self, regno: u32, red: u32, _green: u32, _blue: u32, _transp: u32) -> DevResult<()> {
            self.info.set_palette_entry(regno as usize, red)
        }

        fn blank(&self, mode: i32) -> DevResult<BlankState> {
            Ok(if mode == 0 { BlankState::On } else { BlankState::Off })
        }

        fn pan_display(&self, var: &FbVarScreenInfo, state: &FbState) -> DevResult<()> {
            if var.xoffset + state.var.xres > state.var.xres_virtual {
                return Err(DriverError::InvalidArgument);
            }
            Ok(())
        }

        fn fillrect(&self, rect: &FillRect) -> DevResult<()> {
            sys_fillrect(&self.info, rect)
        }

        fn copyarea(&self, area: &CopyArea) -> DevResult<()> {
            sys_copyarea(&self.info, area)
        }

        fn imageblit(&self, image: &FbImage) -> DevResult<()> {
            sys_imageblit(&self.info, image)
        }

        fn mmap(&self, _vma: &mut VmArea) -> DevResult<()> {
            Err(DriverError::NoDevice)
        }
    }

    #[test]
    fn test_set_var_commits() {
        let fb = TestFb::new();
        let mut var = FbVarScreenInfo::mode(32, 16, 32);
        var.xres_virtual = 64;
        let applied = fb_set_var(&fb, &var).unwrap();
        assert_eq!(applied.xres_virtual, 32);
        assert_eq!(fb.info.fix().line_length, 128);
    }

    #[test]
    fn test_set_var_rejected_keeps_state() {
        let fb = TestFb::new();
        let before = fb.info.var();
        assert_eq!(
            fb_set_var(&fb, &FbVarScreenInfo::mode(128, 16, 32)),
            Err(DriverError::InvalidArgument)
        );
        fb.fail_par.store(true, Ordering::SeqCst);
        assert_eq!(
            fb_set_var(&fb, &FbVarScreenInfo::mode(32, 16, 32)),
            Err(DriverError::TryAgain)
        );
        assert_eq!(fb.info.var(), before);
        assert_eq!(fb.info.fix().line_length, 256);
    }

    #[test]
    fn test_pan_records_offsets() {
        let fb = TestFb::new();
        fb_pan_display(&fb, 0, 0).unwrap();
        assert_eq!(fb_pan_display(&fb, 1, 0), Err(DriverError::InvalidArgument));
        assert_eq!(fb.info.var().xoffset, 0);
    }

    #[test]
    fn test_blank_stores_state() {
        let fb = TestFb::new();
        assert_eq!(fb_blank(&fb, 4), Ok(BlankState::Off));
        assert_eq!(fb.info.blank_state(), BlankState::Off);
    }

    #[test]
    fn test_set_cmap_stops_at_rejected_entry() {
        let fb = TestFb::new();
        let entries: alloc::vec::Vec<_> = (0..20u16).map(|i| (i + 1, 0, 0, 0)).collect();
        fb_set_cmap(&fb, &ColorMap::from_entries(0, &entries)).unwrap();
        let palette = fb.info.pseudo_palette();
        assert_eq!(palette[0], 1);
        assert_eq!(palette[15], 16);
        assert_eq!(fb.info.cmap().entry(19).map(|e| e.0), Some(20));
    }

    #[test]
    fn test_take_cmap() {
        let fb = TestFb::new();
        assert_eq!(fb.info.take_cmap().len(), 256);
        assert!(fb.info.cmap().is_empty());
    }
}
