//! Software drawing on a system-memory framebuffer
//!
//! Rectangle fill, area copy and image blit over the pixel store, using the
//! current depth and line length. Everything is clipped to the visible
//! `xres × yres`; pixels outside are silently skipped.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{DevResult, DriverError};
use crate::fb::var::{FbFixScreenInfo, FbVarScreenInfo};
use crate::kern::coherent::CoherentRegion;

/// Replace destination pixels
pub const ROP_COPY: u32 = 0;
/// XOR into destination pixels
pub const ROP_XOR: u32 = 1;

/// Rectangle fill request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillRect {
    pub dx: u32,
    pub dy: u32,
    pub width: u32,
    pub height: u32,
    /// Pixel value in the current format
    pub color: u32,
    pub rop: u32,
}

/// Area copy request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyArea {
    pub dx: u32,
    pub dy: u32,
    pub width: u32,
    pub height: u32,
    pub sx: u32,
    pub sy: u32,
}

/// Image blit request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FbImage {
    pub dx: u32,
    pub dy: u32,
    pub width: u32,
    pub height: u32,
    /// Pseudo-palette index for set bits (depth 1)
    pub fg_color: u32,
    /// Pseudo-palette index for clear bits (depth 1)
    pub bg_color: u32,
    /// 1 for a bitmap, or the framebuffer depth for packed pixels
    pub depth: u8,
    pub data: Vec<u8>,
}

impl FbImage {
    /// Bytes per source row for this image's depth
    pub fn stride(&self) -> usize {
        (self.width as usize * self.depth as usize).div_ceil(8)
    }
}

/// A view of the pixel store in the current mode
#[derive(Clone, Copy)]
pub struct Surface<'a> {
    screen: &'a CoherentRegion,
    xres: u32,
    yres: u32,
    bpp: u32,
    line_length: usize,
}

impl<'a> Surface<'a> {
    pub fn new(screen: &'a CoherentRegion, var: &FbVarScreenInfo, fix: &FbFixScreenInfo) -> Self {
        Self {
            screen,
            xres: var.xres,
            yres: var.yres,
            bpp: var.bits_per_pixel,
            line_length: fix.line_length as usize,
        }
    }

    fn bytes_pp(&self) -> usize {
        (self.bpp / 8) as usize
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.line_length + x as usize * self.bytes_pp()
    }

    /// Clip a `w × h` box at `(x, y)`; `None` if nothing is visible
    fn clip(&self, x: u32, y: u32, w: u32, h: u32) -> Option<(u32, u32)> {
        if x >= self.xres || y >= self.yres || w == 0 || h == 0 {
            return None;
        }
        Some((w.min(self.xres - x), h.min(self.yres - y)))
    }

    /// Read one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.xres || y >= self.yres {
            return None;
        }
        self.screen.read_pixel(self.offset(x, y), self.bytes_pp()).ok()
    }
}

/// Fill a rectangle with a pixel value
pub fn fill_rect(s: &Surface<'_>, rect: &FillRect) -> DevResult<()> {
    let Some((w, h)) = s.clip(rect.dx, rect.dy, rect.width, rect.height) else {
        return Ok(());
    };
    let bpp = s.bytes_pp();

    match rect.rop {
        ROP_COPY => {
            let pixel = rect.color.to_le_bytes();
            let row: Vec<u8> = (0..w as usize).flat_map(|_| pixel[..bpp].iter().copied()).collect();
            for y in rect.dy..rect.dy + h {
                s.screen.write(s.offset(rect.dx, y), &row)?;
            }
        }
        ROP_XOR => {
            for y in rect.dy..rect.dy + h {
                for x in rect.dx..rect.dx + w {
                    let off = s.offset(x, y);
                    let old = s.screen.read_pixel(off, bpp)?;
                    s.screen.write_pixel(off, bpp, old ^ rect.color)?;
                }
            }
        }
        _ => return Err(DriverError::InvalidArgument),
    }
    Ok(())
}

/// Copy a rectangle within the surface; overlapping areas copy correctly
pub fn copy_area(s: &Surface<'_>, area: &CopyArea) -> DevResult<()> {
    let Some((w, h)) = s.clip(area.dx, area.dy, area.width, area.height) else {
        return Ok(());
    };
    let Some((w, h)) = s.clip(area.sx, area.sy, w, h) else {
        return Ok(());
    };
    let row_bytes = w as usize * s.bytes_pp();

    let copy_row = |i: u32| -> DevResult<()> {
        let src = s.offset(area.sx, area.sy + i);
        let dst = s.offset(area.dx, area.dy + i);
        s.screen.copy_within(src, dst, row_bytes)?;
        Ok(())
    };

    // Moving down: copy the bottom row first so sources are read before
    // they are overwritten.
    if area.dy > area.sy {
        for i in (0..h).rev() {
            copy_row(i)?;
        }
    } else {
        for i in 0..h {
            copy_row(i)?;
        }
    }
    Ok(())
}

/// Draw an image
///
/// Depth 1 expands a bitmap (MSB first, rows padded to whole bytes) using
/// `palette[fg_color]` and `palette[bg_color]`. A depth equal to the
/// framebuffer's copies packed pixels. Anything else is rejected before
/// drawing.
pub fn image_blit(s: &Surface<'_>, image: &FbImage, palette: &[u32; 16]) -> DevResult<()> {
    let stride = image.stride();
    let needed = stride
        .checked_mul(image.height as usize)
        .ok_or(DriverError::InvalidArgument)?;
    if image.data.len() < needed {
        return Err(DriverError::InvalidArgument);
    }

    match u32::from(image.depth) {
        1 => {
            let fg = *palette.get(image.fg_color as usize).ok_or(DriverError::InvalidArgument)?;
            let bg = *palette.get(image.bg_color as usize).ok_or(DriverError::InvalidArgument)?;
            blit_mono(s, image, stride, fg, bg)
        }
        d if d == s.bpp => blit_packed(s, image, stride),
        _ => Err(DriverError::InvalidArgument),
    }
}

fn blit_mono(s: &Surface<'_>, image: &FbImage, stride: usize, fg: u32, bg: u32) -> DevResult<()> {
    let Some((w, h)) = s.clip(image.dx, image.dy, image.width, image.height) else {
        return Ok(());
    };
    let bpp = s.bytes_pp();
    let fg = fg.to_le_bytes();
    let bg = bg.to_le_bytes();
    let mut row = vec![0u8; w as usize * bpp];

    for y in 0..h as usize {
        let bits = &image.data[y * stride..(y + 1) * stride];
        for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
            let set = bits[x / 8] & (0x80 >> (x % 8)) != 0;
            px.copy_from_slice(if set { &fg[..bpp] } else { &bg[..bpp] });
        }
        s.screen.write(s.offset(image.dx, image.dy + y as u32), &row)?;
    }
    Ok(())
}

fn blit_packed(s: &Surface<'_>, image: &FbImage, stride: usize) -> DevResult<()> {
    let Some((w, h)) = s.clip(image.dx, image.dy, image.width, image.height) else {
        return Ok(());
    };
    let visible = w as usize * s.bytes_pp();
    for y in 0..h as usize {
        let src = &image.data[y * stride..y * stride + visible];
        s.screen.write(s.offset(image.dx, image.dy + y as u32), src)?;
    }
    Ok(())
}
