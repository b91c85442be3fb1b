//! Property-based tests for the drivers
//!
//! Driver contracts checked over generated inputs with proptest.

use std::sync::Arc;

use kshim::config::HostConfig;
use kshim::device::conf::FileOperations;
use kshim::device::ioctl::io;
use kshim::drivers::chardev_buffer::{CharBuffer, CAP};
use kshim::drivers::counter::{Counter, COUNTER_GET, COUNTER_INCREMENT, COUNTER_MAGIC, COUNTER_RESET, COUNTER_SET};
use kshim::drivers::simplefb::{channel_layout, SimpleFb, FBIO_CLEAR, FB_SIZE};
use kshim::fb::var::FbVarScreenInfo;
use kshim::fb::{fb_set_var, FbOps};
use kshim::kern::{SimHost, UserAddressSpace, UserPtr, VmArea, PAGE_SIZE};
use kshim::DriverError;
use proptest::prelude::*;

fn process() -> (Arc<SimHost>, Arc<UserAddressSpace>) {
    let host = SimHost::new(HostConfig::default());
    let mm = host.spawn_process();
    (host, mm)
}

fn framebuffer() -> (Arc<SimHost>, Arc<SimpleFb>) {
    let host = SimHost::new(HostConfig::default());
    let fb = SimpleFb::probe(&host.shim()).expect("probe");
    (host, fb)
}

fn supported_bpp() -> impl Strategy<Value = u32> {
    prop_oneof![Just(16u32), Just(24u32), Just(32u32)]
}

// ════════════════════════════════════════════════════════════
// Byte buffer
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever fits is read back unchanged
    #[test]
    fn chardev_round_trip(data in proptest::collection::vec(any::<u8>(), 0..CAP)) {
        let (_host, mm) = process();
        let dev = CharBuffer::new();
        let buf = mm.map_anon(2 * CAP).unwrap();
        mm.write_bytes(buf, &data).unwrap();

        let mut pos = 0;
        prop_assert_eq!(dev.write(&*mm, buf, data.len(), &mut pos), Ok(data.len()));

        let mut pos = 0;
        let out = mm.map_anon(2 * CAP).unwrap();
        prop_assert_eq!(dev.read(&*mm, out, 2 * CAP, &mut pos), Ok(data.len()));
        prop_assert_eq!(mm.read_bytes(out, data.len()).unwrap(), data);
    }

    /// Reads at or past the valid length return nothing
    #[test]
    fn chardev_eof(len in 0..CAP, extra in 0u64..4096) {
        let (_host, mm) = process();
        let dev = CharBuffer::new();
        let buf = mm.map_anon(CAP).unwrap();
        let mut pos = 0;
        dev.write(&*mm, buf, len, &mut pos).unwrap();

        let mut pos = len as u64 + extra;
        prop_assert_eq!(dev.read(&*mm, buf, 16, &mut pos), Ok(0));
        prop_assert_eq!(pos, len as u64 + extra);
    }

    /// Oversized writes keep exactly CAP - 1 bytes
    #[test]
    fn chardev_truncation(len in CAP..4 * CAP) {
        let (_host, mm) = process();
        let dev = CharBuffer::new();
        let buf = mm.map_anon(len).unwrap();
        let mut pos = 0;
        prop_assert_eq!(dev.write(&*mm, buf, len, &mut pos), Ok(CAP - 1));
        prop_assert_eq!(dev.len(), CAP - 1);
    }
}

// ════════════════════════════════════════════════════════════
// Counter
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// SET then GET, RESET then GET, SET INCREMENT GET
    #[test]
    fn counter_laws(v in any::<i32>()) {
        let (_host, mm) = process();
        let dev = Counter::new();
        let arg = mm.map_anon(PAGE_SIZE).unwrap();
        let get = || -> i32 {
            dev.ioctl(&*mm, COUNTER_GET, arg.addr()).unwrap();
            mm.read_u32(arg).unwrap() as i32
        };

        mm.write_u32(arg, v as u32).unwrap();
        dev.ioctl(&*mm, COUNTER_SET, arg.addr()).unwrap();
        prop_assert_eq!(get(), v);

        dev.ioctl(&*mm, COUNTER_INCREMENT, 0).unwrap();
        prop_assert_eq!(get(), v.wrapping_add(1));

        dev.ioctl(&*mm, COUNTER_RESET, 0).unwrap();
        prop_assert_eq!(get(), 0);
    }

    /// Unknown codes fail and leave the counter alone
    #[test]
    fn counter_unknown_code(v in any::<i32>(), cmd in any::<u32>()) {
        prop_assume!(![COUNTER_GET, COUNTER_SET, COUNTER_RESET, COUNTER_INCREMENT].contains(&cmd));
        let (_host, mm) = process();
        let dev = Counter::new();
        let arg = mm.map_anon(PAGE_SIZE).unwrap();
        mm.write_u32(arg, v as u32).unwrap();
        dev.ioctl(&*mm, COUNTER_SET, arg.addr()).unwrap();

        prop_assert_eq!(dev.ioctl(&*mm, cmd, arg.addr()), Err(DriverError::InvalidArgument));
        prop_assert_eq!(dev.ioctl(&*mm, io(COUNTER_MAGIC, 5), 0), Err(DriverError::InvalidArgument));
        prop_assert_eq!(dev.value(), v);
    }
}

// ════════════════════════════════════════════════════════════
// Framebuffer
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A second check of an accepted mode changes nothing
    #[test]
    fn check_var_idempotent(x in 0u32..=800, y in 0u32..=600, bpp in supported_bpp()) {
        let (_host, fb) = framebuffer();
        let mut once = FbVarScreenInfo::mode(x, y, bpp);
        fb.check_var(&mut once).unwrap();
        let mut twice = once;
        fb.check_var(&mut twice).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Accepted modes carry the channel layout for their depth
    #[test]
    fn check_var_layout_table(x in 0u32..=800, y in 0u32..=600, bpp in supported_bpp()) {
        let (_host, fb) = framebuffer();
        let mut var = FbVarScreenInfo::mode(x, y, bpp);
        fb.check_var(&mut var).unwrap();
        let [r, g, b, a] = channel_layout(bpp).unwrap();
        prop_assert_eq!((var.red, var.green, var.blue, var.transp), (r, g, b, a));
    }

    /// Oversized geometry is rejected and the mode is kept
    #[test]
    fn out_of_range_geometry(x in 0u32..4000, y in 0u32..4000, bpp in supported_bpp()) {
        prop_assume!(x > 800 || y > 600);
        let (_host, fb) = framebuffer();
        let before = fb.info().var();
        prop_assert_eq!(
            fb_set_var(&*fb, &FbVarScreenInfo::mode(x, y, bpp)),
            Err(DriverError::InvalidArgument)
        );
        prop_assert_eq!(fb.info().var(), before);
    }

    /// Palette writes below 16 land packed; the rest fail
    #[test]
    fn palette_bounds(
        regno in 0u32..64,
        r in any::<u16>(),
        g in any::<u16>(),
        b in any::<u16>(),
        a in any::<u16>(),
    ) {
        let (_host, fb) = framebuffer();
        let result = fb.setcolreg(regno, r.into(), g.into(), b.into(), a.into());
        if regno >= 16 {
            prop_assert_eq!(result, Err(DriverError::InvalidArgument));
        } else {
            prop_assert_eq!(result, Ok(()));
            let expected = (u32::from(a >> 8) << 24)
                | (u32::from(r >> 8) << 16)
                | (u32::from(g >> 8) << 8)
                | u32::from(b >> 8);
            prop_assert_eq!(fb.info().pseudo_palette()[regno as usize], expected);
        }
    }

    /// Mapping writes are visible to the driver and back
    #[test]
    fn mapping_coherence(pixel in 0usize..FB_SIZE / 4, value in any::<u32>()) {
        let (host, fb) = framebuffer();
        let mm = host.spawn_process();
        let start = mm.reserve(FB_SIZE).unwrap();
        let mut vma = VmArea::new(mm.clone(), start, FB_SIZE, 0);
        fb.mmap(&mut vma).unwrap();

        let offset = pixel * 4;
        let addr = UserPtr(start.addr() + offset);
        mm.write_u32(addr, value).unwrap();
        prop_assert_eq!(fb.info().screen().read_pixel(offset, 4).unwrap(), value);

        fb.info().screen().write_pixel(offset, 4, !value).unwrap();
        prop_assert_eq!(mm.read_u32(addr).unwrap(), !value);
    }

    /// The clear code zeroes every byte
    #[test]
    fn clear_control(fills in proptest::collection::vec((0usize..FB_SIZE, any::<u8>()), 1..32)) {
        let (host, fb) = framebuffer();
        let mm = host.spawn_process();
        for (offset, byte) in fills {
            fb.info().screen().fill(offset, 1, byte).unwrap();
        }
        fb.ioctl(&*mm, FBIO_CLEAR, 0).unwrap();
        prop_assert!(fb.info().screen().is_zeroed());
    }
}
