//! Lazy byte-to-linear-float row conversion over an image's pixel source.

use crate::error::*;
use crate::pal::{f_pixel, gamma_lut, GammaLut, RGBA};

/// Reusable per-row scratch buffer, sized once per image to avoid
/// reallocating on every row during remap/quantize.
pub(crate) type TempBuf = Vec<f_pixel>;

#[must_use]
pub(crate) fn temp_buf(width: usize) -> TempBuf {
    vec![f_pixel::default(); width]
}

/// Row-major pixel storage: either one contiguous owned buffer, or a vector
/// of independently-addressed (borrowed) rows. This is the safe-Rust tagged
/// view standing in for the historical owned/borrowed row-pointer split
/// (see `SPEC_FULL.md` §2).
pub(crate) enum PixelsSource<'rows> {
    Owned(Vec<RGBA>),
    Borrowed(Vec<&'rows [RGBA]>),
}

pub(crate) struct DynamicRows<'rows> {
    source: PixelsSource<'rows>,
    pub width: usize,
    pub height: usize,
    lut: GammaLut,
}

impl<'rows> DynamicRows<'rows> {
    pub fn new_contiguous(pixels: Vec<RGBA>, width: usize, height: usize, gamma: f64) -> Self {
        Self { source: PixelsSource::Owned(pixels), width, height, lut: gamma_lut(gamma) }
    }

    pub fn new_rows(rows: Vec<&'rows [RGBA]>, width: usize, height: usize, gamma: f64) -> Self {
        Self { source: PixelsSource::Borrowed(rows), width, height, lut: gamma_lut(gamma) }
    }

    fn row_bytes(&self, row: usize) -> &[RGBA] {
        match &self.source {
            PixelsSource::Owned(buf) => &buf[row * self.width..row * self.width + self.width],
            PixelsSource::Borrowed(rows) => &rows[row][..self.width],
        }
    }

    pub fn rows_iter<'own>(&'own self, _scratch: &mut TempBuf) -> Result<RowsIter<'own, 'rows>, liq_error> {
        Ok(RowsIter { src: self })
    }
}

pub(crate) struct RowsIter<'own, 'rows> {
    src: &'own DynamicRows<'rows>,
}

impl<'own, 'rows> RowsIter<'own, 'rows> {
    /// Decode one row into `out`, returning the slice written.
    pub fn row_f<'buf>(&self, out: &'buf mut TempBuf, row: usize) -> &'buf [f_pixel] {
        let src_row = self.src.row_bytes(row);
        out.clear();
        out.extend(src_row.iter().map(|&px| f_pixel::from_rgba(&self.src.lut, px)));
        out
    }

    /// Same as `row_f`, but takes an extra scratch buffer so callers can
    /// decode a second independent row (e.g. a background image) without
    /// reusing the first row's backing storage mid-loop.
    pub fn row_f2<'buf>(&self, _scratch: &'buf mut TempBuf, out: &'buf mut TempBuf, row: usize) -> &'buf [f_pixel] {
        self.row_f(out, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_f_decodes_expected_width() {
        let px = vec![RGBA::new(255, 0, 0, 255); 4 * 3];
        let rows = DynamicRows::new_contiguous(px, 4, 3, 0.45455);
        let mut scratch = temp_buf(4);
        let mut out = temp_buf(4);
        let iter = rows.rows_iter(&mut scratch).unwrap();
        let row = iter.row_f(&mut out, 1);
        assert_eq!(row.len(), 4);
        assert!(row[0].0.r > 0.9);
    }
}
