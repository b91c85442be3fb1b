//! Screen information records
//!
//! Variable info is the negotiable mode (geometry, depth, channel layout,
//! pan offsets). Fixed info describes the surface the driver exposes.

use core::fmt;

/// Packed pixels
pub const FB_TYPE_PACKED_PIXELS: u32 = 0;
/// True colour: pixel value encodes the channels directly
pub const FB_VISUAL_TRUECOLOR: u32 = 2;
/// No acceleration engine
pub const FB_ACCEL_NONE: u32 = 0;
/// Apply the mode immediately
pub const FB_ACTIVATE_NOW: u32 = 0;
/// Non-interlaced scan
pub const FB_VMODE_NONINTERLACED: u32 = 0;

pub const FB_BLANK_UNBLANK: i32 = 0;
pub const FB_BLANK_NORMAL: i32 = 1;
pub const FB_BLANK_VSYNC_SUSPEND: i32 = 2;
pub const FB_BLANK_HSYNC_SUSPEND: i32 = 3;
pub const FB_BLANK_POWERDOWN: i32 = 4;

/// Position and width of one colour channel in a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FbBitfield {
    /// Bit offset of the least significant bit
    pub offset: u32,
    /// Number of bits
    pub length: u32,
    /// Most significant bit is on the right
    pub msb_right: u32,
}

impl FbBitfield {
    pub const fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            msb_right: 0,
        }
    }
}

/// Variable screen information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FbVarScreenInfo {
    /// Visible resolution
    pub xres: u32,
    pub yres: u32,
    /// Virtual resolution
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    /// Offset from virtual to visible
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
    pub nonstd: u32,
    pub activate: u32,
    /// Physical size in mm, -1 if unknown
    pub height: i32,
    pub width: i32,
    pub vmode: u32,
}

impl FbVarScreenInfo {
    /// A mode of `xres`×`yres` at `bpp`, virtual equal to visible
    pub const fn mode(xres: u32, yres: u32, bpp: u32) -> Self {
        Self {
            xres,
            yres,
            xres_virtual: xres,
            yres_virtual: yres,
            xoffset: 0,
            yoffset: 0,
            bits_per_pixel: bpp,
            grayscale: 0,
            red: FbBitfield::new(0, 0),
            green: FbBitfield::new(0, 0),
            blue: FbBitfield::new(0, 0),
            transp: FbBitfield::new(0, 0),
            nonstd: 0,
            activate: FB_ACTIVATE_NOW,
            height: -1,
            width: -1,
            vmode: FB_VMODE_NONINTERLACED,
        }
    }

    /// Builder: set channel layout
    pub const fn with_channels(
        mut self,
        red: FbBitfield,
        green: FbBitfield,
        blue: FbBitfield,
        transp: FbBitfield,
    ) -> Self {
        self.red = red;
        self.green = green;
        self.blue = blue;
        self.transp = transp;
        self
    }

    /// Bytes per pixel
    pub const fn bytes_per_pixel(&self) -> u32 {
        self.bits_per_pixel / 8
    }
}

impl fmt::Display for FbVarScreenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}-{}", self.xres, self.yres, self.bits_per_pixel)
    }
}

/// Fixed screen information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FbFixScreenInfo {
    /// Identification string, NUL padded
    pub id: [u8; 16],
    /// Physical start of the pixel store
    pub smem_start: u64,
    /// Length of the pixel store
    pub smem_len: u32,
    pub type_: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    /// Bytes per scanline
    pub line_length: u32,
    pub accel: u32,
}

impl FbFixScreenInfo {
    /// Packed-pixel true-colour surface named `id` (truncated to 15 bytes)
    pub fn packed_truecolor(id: &str) -> Self {
        let mut name = [0u8; 16];
        let len = id.len().min(15);
        name[..len].copy_from_slice(&id.as_bytes()[..len]);
        Self {
            id: name,
            type_: FB_TYPE_PACKED_PIXELS,
            visual: FB_VISUAL_TRUECOLOR,
            accel: FB_ACCEL_NONE,
            ..Self::default()
        }
    }

    /// Identification string up to the first NUL
    pub fn id_str(&self) -> &str {
        let end = self.id.iter().position(|&b| b == 0).unwrap_or(self.id.len());
        core::str::from_utf8(&self.id[..end]).unwrap_or("")
    }
}
