//! Image object (C11) and importance maps (C2).

use crate::attr::Attributes;
use crate::error::*;
use crate::pal::{f_pixel, PalF, RGBA};
use crate::rows::DynamicRows;
use crate::seacow::RowBitmap;

/// Caller's RGBA raster plus the side maps consumed by the histogram and
/// the dithered remapper.
pub struct Image<'pixels> {
    pub(crate) px: DynamicRows<'pixels>,
    pub(crate) noise: Option<Vec<f32>>,
    pub(crate) edges: Option<Vec<f32>>,
    pub(crate) dither_map: Option<Vec<f32>>,
    pub(crate) background: Option<Box<Image<'pixels>>>,
    pub(crate) fixed_colors: crate::hist::FixedColorsSet,
}

impl<'pixels> Image<'pixels> {
    /// Build from one contiguous row-major buffer. `gamma` of `0` means
    /// "assume 1/2.2".
    pub fn new(attr: &Attributes, pixels: Vec<RGBA>, width: usize, height: usize, gamma: f64) -> Result<Self, liq_error> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return Err(LIQ_VALUE_OUT_OF_RANGE);
        }
        let _ = attr;
        Ok(Self {
            px: DynamicRows::new_contiguous(pixels, width, height, gamma),
            noise: None,
            edges: None,
            dither_map: None,
            background: None,
            fixed_colors: crate::hist::FixedColorsSet::new(),
        })
    }

    /// Build from independently-addressed rows (e.g. rows embedded in a
    /// larger, non-contiguous buffer).
    pub fn new_from_rows(attr: &Attributes, rows: Vec<&'pixels [RGBA]>, width: usize, height: usize, gamma: f64) -> Result<Self, liq_error> {
        if width == 0 || height == 0 || rows.len() != height || rows.iter().any(|r| r.len() < width) {
            return Err(LIQ_VALUE_OUT_OF_RANGE);
        }
        let _ = attr;
        Ok(Self {
            px: DynamicRows::new_rows(rows, width, height, gamma),
            noise: None,
            edges: None,
            dither_map: None,
            background: None,
            fixed_colors: crate::hist::FixedColorsSet::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.px.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.px.height
    }

    /// Pin a color so the palette search always includes it (e.g. a brand
    /// color that must survive quantization untouched).
    pub fn add_fixed_color(&mut self, color: RGBA, gamma: f64) -> liq_error {
        let lut = crate::pal::gamma_lut(gamma);
        self.fixed_colors.push(f_pixel::from_rgba(&lut, color));
        LIQ_OK
    }

    /// Composite background used by the dithered remapper: near-transparent
    /// output pixels are allowed to fall back to this image's color instead
    /// of the transparent palette slot, which matters when frames are
    /// composited over a previous frame (e.g. animation).
    pub fn set_background(&mut self, background: Image<'pixels>) -> liq_error {
        if background.width() != self.width() || background.height() != self.height() {
            return LIQ_VALUE_OUT_OF_RANGE;
        }
        self.background = Some(Box::new(background));
        LIQ_OK
    }

    /// Build the noise and edge importance maps (C2). No-op (leaves both
    /// `None`) for images smaller than 4×4; callers gate on speed before
    /// calling this.
    pub(crate) fn contrast_maps(&mut self) -> Result<(), liq_error> {
        let width = self.px.width;
        let height = self.px.height;
        if width < 4 || height < 4 {
            return Ok(());
        }
        let mut scratch = crate::rows::temp_buf(width);
        let rows = self.px.rows_iter(&mut scratch)?;

        let mut row_bufs = (crate::rows::temp_buf(width), crate::rows::temp_buf(width), crate::rows::temp_buf(width));
        let mut noise = vec![0f32; width * height];
        let mut edges = vec![0f32; width * height];

        for y in 0..height {
            let prev = if y > 0 { rows.row_f(&mut row_bufs.0, y - 1) } else { rows.row_f(&mut row_bufs.0, y) }.to_vec();
            let cur = rows.row_f(&mut row_bufs.1, y).to_vec();
            let next = if y + 1 < height { rows.row_f(&mut row_bufs.2, y + 1) } else { rows.row_f(&mut row_bufs.2, y) }.to_vec();

            for x in 0..width {
                let c = cur[x];
                let l = cur[x.saturating_sub(1)];
                let r = cur[(x + 1).min(width - 1)];
                let u = prev[x];
                let d = next[x];

                let horiz = channel_max4(l, r, c);
                let vert = channel_max4(u, d, c);
                let edge = horiz.max(vert);
                let alt = horiz.min(vert) + 0.5 * (horiz - vert).abs();
                let n = (1. - edge.max(alt)).clamp(0., 1.);
                let n = n * n;
                let n = n * n;

                let px = y * width + x;
                noise[px] = n * 255.;
                edges[px] = edge.clamp(0., 1.) * 255.;
            }
        }

        dilate(&mut noise, width, height);
        dilate(&mut noise, width, height);
        blur3(&mut noise, width, height);
        dilate(&mut noise, width, height);
        erode(&mut noise, width, height);
        erode(&mut noise, width, height);
        erode(&mut noise, width, height);

        erode(&mut edges, width, height);
        dilate(&mut edges, width, height);
        for (e, n) in edges.iter_mut().zip(noise.iter()) {
            *e = e.min(*n);
        }

        self.noise = Some(noise);
        self.edges = Some(edges);
        Ok(())
    }

    /// After a plain remap pass, down-weight dithering on large flat runs
    /// that already landed on the same palette index; keep full strength
    /// wherever quantization introduced a new edge the source didn't have.
    pub(crate) fn update_dither_map(&mut self, remapped: &RowBitmap<'_, u8>, _palette: &mut PalF) {
        let width = self.px.width;
        let height = self.px.height;
        let mut map = self.edges.clone().unwrap_or_else(|| vec![255.; width * height]);
        for y in 0..height {
            let row = remapped.row(y);
            let next_row = if y + 1 < height { Some(remapped.row(y + 1)) } else { None };
            for x in 0..width {
                let here = row[x];
                let mut is_new_edge = false;
                if x + 1 < width && row[x + 1] != here {
                    is_new_edge = true;
                }
                if let Some(next_row) = next_row {
                    if next_row[x] != here {
                        is_new_edge = true;
                    }
                }
                if is_new_edge {
                    map[y * width + x] = 255.;
                }
            }
        }
        self.dither_map = Some(map);
    }
}

#[inline]
fn channel_max4(a: f_pixel, b: f_pixel, center: f_pixel) -> f32 {
    let r = (a.0.r + b.0.r - 2. * center.0.r).abs();
    let g = (a.0.g + b.0.g - 2. * center.0.g).abs();
    let bl = (a.0.b + b.0.b - 2. * center.0.b).abs();
    let al = (a.0.a + b.0.a - 2. * center.0.a).abs();
    r.max(g).max(bl).max(al)
}

fn at(map: &[f32], width: usize, height: usize, x: isize, y: isize) -> f32 {
    let x = x.clamp(0, width as isize - 1) as usize;
    let y = y.clamp(0, height as isize - 1) as usize;
    map[y * width + x]
}

fn dilate(map: &mut [f32], width: usize, height: usize) {
    let src = map.to_vec();
    for y in 0..height {
        for x in 0..width {
            let mut m = f32::MIN;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    m = m.max(at(&src, width, height, x as isize + dx, y as isize + dy));
                }
            }
            map[y * width + x] = m;
        }
    }
}

fn erode(map: &mut [f32], width: usize, height: usize) {
    let src = map.to_vec();
    for y in 0..height {
        for x in 0..width {
            let mut m = f32::MAX;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    m = m.min(at(&src, width, height, x as isize + dx, y as isize + dy));
                }
            }
            map[y * width + x] = m;
        }
    }
}

/// Separable 3-tap (1,2,1)/4 blur.
fn blur3(map: &mut [f32], width: usize, height: usize) {
    let src = map.to_vec();
    let mut tmp = vec![0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let l = at(&src, width, height, x as isize - 1, y as isize);
            let c = at(&src, width, height, x as isize, y as isize);
            let r = at(&src, width, height, x as isize + 1, y as isize);
            tmp[y * width + x] = (l + 2. * c + r) / 4.;
        }
    }
    for y in 0..height {
        for x in 0..width {
            let u = at(&tmp, width, height, x as isize, y as isize - 1);
            let c = at(&tmp, width, height, x as isize, y as isize);
            let d = at(&tmp, width, height, x as isize, y as isize + 1);
            map[y * width + x] = (u + 2. * c + d) / 4.;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Attributes;

    #[test]
    fn flat_image_has_low_edges() {
        let attr = Attributes::new();
        let px = vec![RGBA::new(100, 100, 100, 255); 8 * 8];
        let mut img = Image::new(&attr, px, 8, 8, 0.45455).unwrap();
        img.contrast_maps().unwrap();
        let edges = img.edges.unwrap();
        assert!(edges.iter().all(|&e| e < 1.0));
    }

    #[test]
    fn checkerboard_has_high_edges() {
        let attr = Attributes::new();
        let mut px = vec![RGBA::new(0, 0, 0, 255); 8 * 8];
        for y in 0..8 {
            for x in 0..8 {
                if (x + y) % 2 == 0 {
                    px[y * 8 + x] = RGBA::new(255, 255, 255, 255);
                }
            }
        }
        let mut img = Image::new(&attr, px, 8, 8, 0.45455).unwrap();
        img.contrast_maps().unwrap();
        let edges = img.edges.unwrap();
        assert!(edges.iter().any(|&e| e > 10.0));
    }

    #[test]
    fn too_small_image_skips_maps() {
        let attr = Attributes::new();
        let px = vec![RGBA::new(1, 2, 3, 255); 3 * 3];
        let mut img = Image::new(&attr, px, 3, 3, 0.45455).unwrap();
        img.contrast_maps().unwrap();
        assert!(img.edges.is_none());
    }
}
