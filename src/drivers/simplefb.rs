//! Synthetic framebuffer driver
//!
//! A platform driver that owns an 800×600 pixel store in coherent memory and
//! exposes it as `displayN`: mode negotiation at 16, 24 or 32 bpp, a
//! 16-entry pseudo-palette, software drawing, write-combine memory mapping
//! and two driver-specific control codes.
//!
//! There is no scan-out; the pixel store is the display.

use alloc::sync::Arc;

use crate::device::platform::{PlatformDevice, PlatformDriver};
use crate::error::{DevResult, DriverError};
use crate::fb::sysdraw::{CopyArea, FbImage, FillRect};
use crate::fb::var::{
    FbBitfield, FbFixScreenInfo, FbVarScreenInfo, FB_BLANK_HSYNC_SUSPEND, FB_BLANK_NORMAL, FB_BLANK_POWERDOWN,
    FB_BLANK_UNBLANK, FB_BLANK_VSYNC_SUSPEND,
};
use crate::fb::{sys_copyarea, sys_fillrect, sys_imageblit, BlankState, FbInfo, FbOps, FbState};
use crate::kern::coherent::{page_align, PAGE_SHIFT};
use crate::kern::copyio::{suword64, UserMemory, UserPtr};
use crate::kern::host::{CachePolicy, HostShim, VmArea};

/// Platform driver and device name
pub const DRIVER_NAME: &str = "simple_fb";

/// Maximum horizontal resolution
pub const FB_WIDTH: u32 = 800;
/// Maximum vertical resolution
pub const FB_HEIGHT: u32 = 600;
/// Default depth
pub const FB_BPP: u32 = 32;

/// Pixel store size, enough for the largest mode
pub const FB_SIZE: usize = page_align((FB_WIDTH * FB_HEIGHT * 4) as usize);

/// Colour-map entries allocated at probe
pub const CMAP_LEN: usize = 256;

/// Copy the store's physical base (u64) to the user pointer in `arg`
pub const FBIO_GET_PHYS: u32 = 0x4600;
/// Zero the whole store
pub const FBIO_CLEAR: u32 = 0x4601;

/// Mode at probe: 800×600 ARGB8888
pub const DEFAULT_VAR: FbVarScreenInfo = FbVarScreenInfo::mode(FB_WIDTH, FB_HEIGHT, FB_BPP).with_channels(
    FbBitfield::new(16, 8),
    FbBitfield::new(8, 8),
    FbBitfield::new(0, 8),
    FbBitfield::new(24, 8),
);

/// Channel layout `[red, green, blue, transp]` for a supported depth
pub fn channel_layout(bpp: u32) -> Option<[FbBitfield; 4]> {
    match bpp {
        // RGB565
        16 => Some([
            FbBitfield::new(11, 5),
            FbBitfield::new(5, 6),
            FbBitfield::new(0, 5),
            FbBitfield::new(0, 0),
        ]),
        // RGB888, alpha slot kept at 24 with no bits
        24 => Some([
            FbBitfield::new(16, 8),
            FbBitfield::new(8, 8),
            FbBitfield::new(0, 8),
            FbBitfield::new(24, 0),
        ]),
        // ARGB8888
        32 => Some([
            FbBitfield::new(16, 8),
            FbBitfield::new(8, 8),
            FbBitfield::new(0, 8),
            FbBitfield::new(24, 8),
        ]),
        _ => None,
    }
}

// ============================================================================
// Framebuffer
// ============================================================================

/// One probed framebuffer
pub struct SimpleFb {
    host: Arc<dyn HostShim>,
    info: FbInfo,
}

impl SimpleFb {
    /// Allocate the store and colour map and register the framebuffer
    ///
    /// Each failure releases what the earlier steps acquired.
    pub fn probe(host: &Arc<dyn HostShim>) -> DevResult<Arc<Self>> {
        log::info!(target: DRIVER_NAME, "probing framebuffer driver");

        let screen = host.alloc_coherent(FB_SIZE).map_err(|err| {
            log::error!(target: DRIVER_NAME, "failed to allocate framebuffer memory");
            err
        })?;
        screen.zero();
        log::info!(
            target: DRIVER_NAME,
            "framebuffer: virt={:#x}, phys={:#x}, size={:#x}",
            screen.virt_addr(),
            screen.phys_addr(),
            screen.len()
        );

        let cmap = match host.alloc_cmap(CMAP_LEN) {
            Ok(cmap) => cmap,
            Err(err) => {
                log::error!(target: DRIVER_NAME, "failed to allocate color map");
                host.free_coherent(screen);
                return Err(err);
            }
        };

        let mut fix = FbFixScreenInfo::packed_truecolor("SimpleFB");
        fix.smem_start = screen.phys_addr();
        fix.smem_len = screen.len() as u32;
        fix.line_length = FB_WIDTH * (FB_BPP / 8);

        let fb = Arc::new(Self {
            host: host.clone(),
            info: FbInfo::new(screen.clone(), DEFAULT_VAR, fix, cmap),
        });

        match host.register_framebuffer(fb.clone()) {
            Ok(node) => {
                log::info!(target: DRIVER_NAME, "framebuffer registered: fb{} ({})", node, fix.id_str());
                log::info!(target: DRIVER_NAME, "mode: {}", fb.info.var());
                Ok(fb)
            }
            Err(err) => {
                log::error!(target: DRIVER_NAME, "failed to register framebuffer");
                host.dealloc_cmap(fb.info.take_cmap());
                host.free_coherent(screen);
                Err(err)
            }
        }
    }

    /// Unregister, then release the colour map and the store
    ///
    /// The colour map and the store are released even when unregistering
    /// fails; the unregister error is still returned.
    pub fn remove(&self) -> DevResult<()> {
        log::info!(target: DRIVER_NAME, "removing framebuffer driver");
        let unregistered = match self.info.node() {
            Some(node) => self.host.unregister_framebuffer(node),
            None => Ok(()),
        };
        if let Err(err) = unregistered {
            log::warn!(target: DRIVER_NAME, "unregister failed: {:?}", err);
        }
        self.host.dealloc_cmap(self.info.take_cmap());
        self.host.free_coherent(self.info.screen().clone());
        unregistered
    }

    /// Physical base of the store
    pub fn phys_addr(&self) -> u64 {
        self.info.screen().phys_addr()
    }
}

impl FbOps for SimpleFb {
    fn info(&self) -> &FbInfo {
        &self.info
    }

    fn check_var(&self, var: &mut FbVarScreenInfo) -> DevResult<()> {
        log::info!(target: DRIVER_NAME, "checking var");

        if var.xres > FB_WIDTH || var.yres > FB_HEIGHT {
            log::error!(
                target: DRIVER_NAME,
                "resolution too large: {}x{} (max: {}x{})",
                var.xres,
                var.yres,
                FB_WIDTH,
                FB_HEIGHT
            );
            return Err(DriverError::InvalidArgument);
        }
        let Some([red, green, blue, transp]) = channel_layout(var.bits_per_pixel) else {
            log::error!(target: DRIVER_NAME, "invalid bpp: {} (supported: 16, 24, 32)", var.bits_per_pixel);
            return Err(DriverError::InvalidArgument);
        };
        var.red = red;
        var.green = green;
        var.blue = blue;
        var.transp = transp;
        Ok(())
    }

    fn set_par(&self, state: &mut FbState) -> DevResult<()> {
        log::info!(target: DRIVER_NAME, "setting par: {}", state.var);
        state.fix.line_length = state.var.xres * state.var.bytes_per_pixel();
        Ok(())
    }

    fn setcolreg(&self, regno: u32, red: u32, green: u32, blue: u32, transp: u32) -> DevResult<()> {
        if regno >= 16 {
            return Err(DriverError::InvalidArgument);
        }
        // Held until the entry is stored so a mode change cannot slip in between
        let state = self.info.read();
        let var = &state.var;
        // Channels arrive as 16-bit intensities
        let (red, green, blue, transp) = (red & 0xffff, green & 0xffff, blue & 0xffff, transp & 0xffff);

        let value = if var.bits_per_pixel == 16 {
            let scale = |v: u32, f: FbBitfield| (v >> (16 - f.length.min(16))) << f.offset;
            scale(red, var.red) | scale(green, var.green) | scale(blue, var.blue)
        } else {
            ((transp >> 8) << var.transp.offset)
                | ((red >> 8) << var.red.offset)
                | ((green >> 8) << var.green.offset)
                | ((blue >> 8) << var.blue.offset)
        };
        self.info.set_palette_entry(regno as usize, value)
    }

    fn blank(&self, mode: i32) -> DevResult<BlankState> {
        log::info!(target: DRIVER_NAME, "blank mode: {}", mode);
        match mode {
            FB_BLANK_UNBLANK => {
                log::info!(target: DRIVER_NAME, "screen on");
                Ok(BlankState::On)
            }
            FB_BLANK_NORMAL | FB_BLANK_VSYNC_SUSPEND | FB_BLANK_HSYNC_SUSPEND | FB_BLANK_POWERDOWN => {
                log::info!(target: DRIVER_NAME, "screen off");
                Ok(BlankState::Off)
            }
            _ => Err(DriverError::InvalidArgument),
        }
    }

    fn pan_display(&self, var: &FbVarScreenInfo, state: &FbState) -> DevResult<()> {
        let fits_x = var
            .xoffset
            .checked_add(state.var.xres)
            .is_some_and(|end| end <= state.var.xres_virtual);
        let fits_y = var
            .yoffset
            .checked_add(state.var.yres)
            .is_some_and(|end| end <= state.var.yres_virtual);
        if !(fits_x && fits_y) {
            return Err(DriverError::InvalidArgument);
        }
        log::info!(target: DRIVER_NAME, "pan display: xoffset={}, yoffset={}", var.xoffset, var.yoffset);
        Ok(())
    }

    fn fillrect(&self, rect: &FillRect) -> DevResult<()> {
        log::debug!(
            target: DRIVER_NAME,
            "fillrect: x={}, y={}, width={}, height={}, color={:#x}",
            rect.dx,
            rect.dy,
            rect.width,
            rect.height,
            rect.color
        );
        sys_fillrect(&self.info, rect)
    }

    fn copyarea(&self, area: &CopyArea) -> DevResult<()> {
        log::debug!(
            target: DRIVER_NAME,
            "copyarea: sx={}, sy={}, dx={}, dy={}, width={}, height={}",
            area.sx,
            area.sy,
            area.dx,
            area.dy,
            area.width,
            area.height
        );
        sys_copyarea(&self.info, area)
    }

    fn imageblit(&self, image: &FbImage) -> DevResult<()> {
        log::debug!(
            target: DRIVER_NAME,
            "imageblit: x={}, y={}, width={}, height={}",
            image.dx,
            image.dy,
            image.width,
            image.height
        );
        sys_imageblit(&self.info, image)
    }

    fn mmap(&self, vma: &mut VmArea) -> DevResult<()> {
        let screen = self.info.screen();
        let offset = vma
            .pgoff
            .checked_mul(1 << PAGE_SHIFT)
            .ok_or(DriverError::InvalidArgument)?;
        let size = vma.len as u64;
        match offset.checked_add(size) {
            Some(end) if end <= screen.len() as u64 => {}
            _ => return Err(DriverError::InvalidArgument),
        }
        log::info!(target: DRIVER_NAME, "mmap: offset={:#x}, size={:#x}", offset, size);

        vma.page_prot = CachePolicy::WriteCombine;
        self.host
            .remap_pfn_range(vma, screen.pfn() + vma.pgoff, vma.len)
            .map_err(|err| {
                log::warn!(target: DRIVER_NAME, "remap failed: {}", err);
                DriverError::TryAgain
            })
    }

    fn ioctl(&self, user: &dyn UserMemory, cmd: u32, arg: usize) -> DevResult<i64> {
        match cmd {
            FBIO_GET_PHYS => {
                suword64(user, UserPtr(arg), self.phys_addr())?;
                Ok(0)
            }
            FBIO_CLEAR => {
                self.info.screen().zero();
                log::info!(target: DRIVER_NAME, "screen cleared");
                Ok(0)
            }
            _ => {
                log::warn!(target: DRIVER_NAME, "unknown ioctl: {:#x}", cmd);
                Err(DriverError::NotTty)
            }
        }
    }
}

// ============================================================================
// Platform driver
// ============================================================================

/// Binds [`SimpleFb`] to the `simple_fb` platform device
pub struct SimpleFbDriver {
    host: Arc<dyn HostShim>,
}

impl SimpleFbDriver {
    pub fn new(host: Arc<dyn HostShim>) -> Self {
        Self { host }
    }
}

impl PlatformDriver for SimpleFbDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn probe(&self, pdev: &PlatformDevice) -> DevResult<()> {
        let fb = SimpleFb::probe(&self.host)?;
        pdev.set_drvdata(fb);
        Ok(())
    }

    fn remove(&self, pdev: &PlatformDevice) -> DevResult<()> {
        let fb = pdev.take_drvdata::<SimpleFb>().ok_or(DriverError::NoDevice)?;
        fb.remove()
    }
}

/// Register the driver and create its platform device
pub fn init(host: &Arc<dyn HostShim>) -> DevResult<Arc<PlatformDevice>> {
    log::info!(target: DRIVER_NAME, "initializing framebuffer driver");
    host.register_platform_driver(Arc::new(SimpleFbDriver::new(host.clone())))
        .map_err(|err| {
            log::error!(target: DRIVER_NAME, "failed to register platform driver");
            err
        })?;

    match host.add_platform_device(DRIVER_NAME, None) {
        Ok(pdev) => {
            log::info!(target: DRIVER_NAME, "initialization complete");
            Ok(pdev)
        }
        Err(err) => {
            log::error!(target: DRIVER_NAME, "failed to register platform device");
            host.unregister_platform_driver(DRIVER_NAME)?;
            Err(err)
        }
    }
}

/// Remove the platform device and the driver
pub fn exit(host: &Arc<dyn HostShim>, pdev: &Arc<PlatformDevice>) -> DevResult<()> {
    log::info!(target: DRIVER_NAME, "exiting framebuffer driver");
    host.remove_platform_device(pdev)?;
    host.unregister_platform_driver(DRIVER_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::fb::{fb_blank, fb_pan_display, fb_set_var};
    use crate::kern::coherent::PAGE_SIZE;
    use crate::kern::sim::{Fault, SimHost};

    fn probed() -> (Arc<SimHost>, Arc<SimpleFb>) {
        let host = SimHost::new(HostConfig::default());
        let fb = SimpleFb::probe(&host.shim()).unwrap();
        (host, fb)
    }

    #[test]
    fn test_probe_defaults() {
        let (host, fb) = probed();
        let fix = fb.info().fix();
        assert_eq!(fix.id_str(), "SimpleFB");
        assert_eq!(fix.smem_len as usize, FB_SIZE);
        assert_eq!(fix.line_length, 3200);
        assert_eq!(fix.smem_start, fb.phys_addr());
        assert_eq!(fb.info().var(), DEFAULT_VAR);
        assert!(fb.info().screen().is_zeroed());
        assert_eq!(fb.info().node(), Some(0));
        assert!(host.nodes().iter().any(|n| n == "display0"));
        assert_eq!(host.outstanding_cmaps(), 1);
    }

    #[test]
    fn test_probe_rollback() {
        let host = SimHost::new(HostConfig::default());
        host.inject(Fault::RegisterFramebuffer);
        assert_eq!(SimpleFb::probe(&host.shim()).err(), Some(DriverError::OutOfMemory));
        assert_eq!(host.outstanding_coherent(), 0);
        assert_eq!(host.outstanding_cmaps(), 0);
        assert!(host.nodes().is_empty());
    }

    #[test]
    fn test_remove_releases_everything() {
        let (host, fb) = probed();
        fb.remove().unwrap();
        assert_eq!(host.outstanding_coherent(), 0);
        assert_eq!(host.outstanding_cmaps(), 0);
        assert_eq!(host.framebuffer_count(), 0);
        assert_eq!(fb.info().node(), None);
    }

    #[test]
    fn test_remove_releases_after_unregister_failure() {
        let (host, fb) = probed();
        // Node slot already gone behind the driver's back
        host.unregister_framebuffer(0).unwrap();
        fb.info().set_node(Some(0));

        assert_eq!(fb.remove(), Err(DriverError::NoDevice));
        assert_eq!(host.outstanding_coherent(), 0);
        assert_eq!(host.outstanding_cmaps(), 0);
    }

    #[test]
    fn test_check_var_layouts() {
        let (_host, fb) = probed();
        let mut var = FbVarScreenInfo::mode(640, 480, 16);
        fb.check_var(&mut var).unwrap();
        assert_eq!(
            (var.red, var.green, var.blue),
            (FbBitfield::new(11, 5), FbBitfield::new(5, 6), FbBitfield::new(0, 5))
        );

        let mut var = FbVarScreenInfo::mode(640, 480, 24);
        fb.check_var(&mut var).unwrap();
        assert_eq!(var.transp, FbBitfield::new(24, 0));

        let again = var;
        fb.check_var(&mut var).unwrap();
        assert_eq!(var, again);

        assert_eq!(fb.check_var(&mut FbVarScreenInfo::mode(801, 600, 32)), Err(DriverError::InvalidArgument));
        assert_eq!(fb.check_var(&mut FbVarScreenInfo::mode(800, 601, 32)), Err(DriverError::InvalidArgument));
        assert_eq!(fb.check_var(&mut FbVarScreenInfo::mode(800, 600, 8)), Err(DriverError::InvalidArgument));
    }

    #[test]
    fn test_set_var_updates_line_length() {
        let (_host, fb) = probed();
        let applied = fb_set_var(&*fb, &FbVarScreenInfo::mode(640, 480, 16)).unwrap();
        assert_eq!(applied.red, FbBitfield::new(11, 5));
        assert_eq!(fb.info().fix().line_length, 1280);
        assert_eq!(fb.info().fix().smem_len as usize, FB_SIZE);
    }

    #[test]
    fn test_setcolreg_packing() {
        let (_host, fb) = probed();
        fb.setcolreg(1, 0xffff, 0x8000, 0x0000, 0xffff).unwrap();
        assert_eq!(fb.info().pseudo_palette()[1], 0xffff_8000);

        fb_set_var(&*fb, &FbVarScreenInfo::mode(800, 600, 16)).unwrap();
        fb.setcolreg(2, 0xffff, 0x8000, 0x0000, 0xffff).unwrap();
        assert_eq!(fb.info().pseudo_palette()[2], 0xfc00);

        assert_eq!(fb.setcolreg(16, 0, 0, 0, 0), Err(DriverError::InvalidArgument));
    }

    #[test]
    fn test_blank_codes() {
        let (_host, fb) = probed();
        for code in 1..=4 {
            assert_eq!(fb_blank(&*fb, code), Ok(BlankState::Off));
        }
        assert_eq!(fb_blank(&*fb, 0), Ok(BlankState::On));
        assert_eq!(fb_blank(&*fb, 9), Err(DriverError::InvalidArgument));
        assert_eq!(fb.info().blank_state(), BlankState::On);
    }

    #[test]
    fn test_pan_limits() {
        let (_host, fb) = probed();
        fb_pan_display(&*fb, 0, 0).unwrap();
        assert_eq!(fb_pan_display(&*fb, 1, 0), Err(DriverError::InvalidArgument));
        assert_eq!(fb_pan_display(&*fb, 0, u32::MAX), Err(DriverError::InvalidArgument));
    }

    #[test]
    fn test_mmap_checks_range() {
        let (host, fb) = probed();
        let mm = host.spawn_process();

        let start = mm.reserve(FB_SIZE + PAGE_SIZE).unwrap();
        let mut vma = VmArea::new(mm.clone(), start, FB_SIZE + PAGE_SIZE, 0);
        assert_eq!(fb.mmap(&mut vma), Err(DriverError::InvalidArgument));

        let mut vma = VmArea::new(mm.clone(), start, PAGE_SIZE, (FB_SIZE / PAGE_SIZE) as u64);
        assert_eq!(fb.mmap(&mut vma), Err(DriverError::InvalidArgument));

        let mut vma = VmArea::new(mm.clone(), start, PAGE_SIZE, 1);
        fb.mmap(&mut vma).unwrap();
        assert_eq!(vma.page_prot, CachePolicy::WriteCombine);
        mm.write_u32(start, 0x00ff_00ff).unwrap();
        assert_eq!(fb.info().screen().read_pixel(PAGE_SIZE, 4).unwrap(), 0x00ff_00ff);
    }

    #[test]
    fn test_mmap_remap_failure_is_try_again() {
        let (host, fb) = probed();
        let mm = host.spawn_process();
        let start = mm.reserve(PAGE_SIZE).unwrap();
        let mut vma = VmArea::new(mm, start, PAGE_SIZE, 0);
        host.inject(Fault::Remap);
        assert_eq!(fb.mmap(&mut vma), Err(DriverError::TryAgain));
    }

    #[test]
    fn test_custom_ioctls() {
        let (host, fb) = probed();
        let mm = host.spawn_process();
        let arg = mm.map_anon(PAGE_SIZE).unwrap();

        fb.ioctl(&*mm, FBIO_GET_PHYS, arg.addr()).unwrap();
        let bytes = mm.read_bytes(arg, 8).unwrap();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        assert_eq!(u64::from_ne_bytes(raw), fb.phys_addr());

        fb.info().screen().fill(0, 64, 0xaa).unwrap();
        fb.ioctl(&*mm, FBIO_CLEAR, 0).unwrap();
        assert!(fb.info().screen().is_zeroed());

        assert_eq!(fb.ioctl(&*mm, 0x4602, 0), Err(DriverError::NotTty));
        assert_eq!(fb.ioctl(&*mm, FBIO_GET_PHYS, 0x10), Err(DriverError::BadAddress));
    }

    #[test]
    fn test_platform_init_exit() {
        let host = SimHost::new(HostConfig::default());
        let shim = host.shim();
        let pdev = init(&shim).unwrap();
        assert!(pdev.is_bound());
        assert!(pdev.drvdata::<SimpleFb>().is_some());
        assert_eq!(host.framebuffer_count(), 1);

        exit(&shim, &pdev).unwrap();
        assert_eq!(host.framebuffer_count(), 0);
        assert_eq!(host.outstanding_coherent(), 0);
    }
}
