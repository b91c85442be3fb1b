//! Colour maps
//!
//! A colour map holds 16-bit channel intensities per entry. The framebuffer
//! keeps one (allocated by the host at probe); callers update it with
//! [`fb_set_cmap`](super::fb_set_cmap), which also feeds each entry to the
//! driver's `setcolreg`.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{DevResult, DriverError};

/// Colour map entries starting at index `start`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColorMap {
    /// First entry index
    pub start: u32,
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
    /// Alpha, when the map carries one
    pub transp: Option<Vec<u16>>,
}

impl ColorMap {
    /// Zeroed map of `len` entries
    pub fn new(len: usize, with_transp: bool) -> Self {
        Self {
            start: 0,
            red: vec![0; len],
            green: vec![0; len],
            blue: vec![0; len],
            transp: with_transp.then(|| vec![0; len]),
        }
    }

    /// Map built from `(r, g, b, a)` tuples, starting at `start`
    pub fn from_entries(start: u32, entries: &[(u16, u16, u16, u16)]) -> Self {
        Self {
            start,
            red: entries.iter().map(|e| e.0).collect(),
            green: entries.iter().map(|e| e.1).collect(),
            blue: entries.iter().map(|e| e.2).collect(),
            transp: Some(entries.iter().map(|e| e.3).collect()),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.red.len()
    }

    pub fn is_empty(&self) -> bool {
        self.red.is_empty()
    }

    /// Entry `i` relative to `start` as `(r, g, b, a)`
    pub fn entry(&self, i: usize) -> Option<(u16, u16, u16, u16)> {
        let a = match &self.transp {
            Some(t) => *t.get(i)?,
            None => 0xffff,
        };
        Some((*self.red.get(i)?, *self.green.get(i)?, *self.blue.get(i)?, a))
    }

    /// True if all channel arrays have the same length
    pub fn is_consistent(&self) -> bool {
        let n = self.red.len();
        self.green.len() == n
            && self.blue.len() == n
            && self.transp.as_ref().map_or(true, |t| t.len() == n)
    }

    /// Copy the part of `src` that overlaps this map
    ///
    /// Entries outside this map are skipped. Returns how many were copied;
    /// a ragged `src` is rejected.
    pub fn copy_from(&mut self, src: &ColorMap) -> DevResult<usize> {
        if !src.is_consistent() {
            return Err(DriverError::InvalidArgument);
        }
        let lo = src.start.max(self.start) as usize;
        let hi = (src.start as usize + src.len()).min(self.start as usize + self.len());
        if lo >= hi {
            return Ok(0);
        }
        let dst = lo - self.start as usize..hi - self.start as usize;
        let from = lo - src.start as usize..hi - src.start as usize;
        self.red[dst.clone()].copy_from_slice(&src.red[from.clone()]);
        self.green[dst.clone()].copy_from_slice(&src.green[from.clone()]);
        self.blue[dst.clone()].copy_from_slice(&src.blue[from.clone()]);
        if let (Some(d), Some(t)) = (self.transp.as_mut(), src.transp.as_ref()) {
            d[dst].copy_from_slice(&t[from]);
        }
        Ok(hi - lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let cmap = ColorMap::new(256, false);
        assert_eq!(cmap.len(), 256);
        assert_eq!(cmap.entry(255), Some((0, 0, 0, 0xffff)));
        assert_eq!(cmap.entry(256), None);
    }

    #[test]
    fn test_copy_from() {
        let mut cmap = ColorMap::new(16, true);
        let src = ColorMap::from_entries(4, &[(1, 2, 3, 4), (5, 6, 7, 8)]);
        assert_eq!(cmap.copy_from(&src), Ok(2));
        assert_eq!(cmap.entry(5), Some((5, 6, 7, 8)));
        assert_eq!(cmap.entry(3), Some((0, 0, 0, 0)));

        let overhang = ColorMap::from_entries(15, &[(9, 9, 9, 9); 2]);
        assert_eq!(cmap.copy_from(&overhang), Ok(1));
        assert_eq!(cmap.entry(15), Some((9, 9, 9, 9)));
        let outside = ColorMap::from_entries(40, &[(1, 1, 1, 1)]);
        assert_eq!(cmap.copy_from(&outside), Ok(0));

        let mut ragged = src.clone();
        ragged.blue.pop();
        assert_eq!(cmap.copy_from(&ragged), Err(DriverError::InvalidArgument));
    }
}
