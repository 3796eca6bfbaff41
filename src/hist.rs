//! Weighted-histogram builder (C3): a unique-color table with adaptive
//! posterization so its size stays bounded regardless of input image size.

use crate::error::*;
use crate::image::Image;
use crate::pal::f_pixel;
use crate::rows::temp_buf;
use rgb::RGBA8;
use std::collections::HashMap;

/// Externally pinned colors that must survive into the final palette.
#[derive(Debug, Clone, Default)]
pub(crate) struct FixedColorsSet(Vec<f_pixel>);

impl FixedColorsSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, color: f_pixel) {
        self.0.push(color);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f_pixel> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HistItem {
    pub color: f_pixel,
    pub perceptual_weight: f32,
    pub adjusted_weight: f32,
}

pub(crate) struct HistogramInternal {
    pub items: Vec<HistItem>,
}

/// Strip the low `ignorebits` bits of each channel so near-identical colors
/// coalesce into one histogram key.
#[inline]
fn posterize_key(px: RGBA8, ignorebits: u8) -> u32 {
    let mask = !0u8 << ignorebits;
    let r = px.r & mask;
    let g = px.g & mask;
    let b = px.b & mask;
    let a = px.a & mask;
    u32::from_be_bytes([r, g, b, a])
}

const MAX_HISTOGRAM_ENTRIES_FLOOR: usize = 1 << 14;

/// Speed-dependent cap on distinct histogram entries before `ignorebits` is
/// increased and the table rebuilt.
fn max_histogram_entries(speed: u8) -> usize {
    let mul = 1 + (10 - speed.clamp(1, 10)) as usize;
    (MAX_HISTOGRAM_ENTRIES_FLOOR * mul).min(1 << 20)
}

pub(crate) fn build_histogram(image: &mut Image, speed: u8) -> Result<HistogramInternal, liq_error> {
    let width = image.width();
    let height = image.height();
    let max_entries = max_histogram_entries(speed);

    let mut ignorebits: u8 = if speed >= 8 { 1 } else { 0 };

    loop {
        let mut scratch = temp_buf(width);
        let rows = image.px.rows_iter(&mut scratch)?;
        let mut row_buf = temp_buf(width);
        let mut row_buf_bytes: Vec<RGBA8> = Vec::with_capacity(width);

        let mut table: HashMap<u32, (f_pixel, f32)> = HashMap::new();
        let mut overflowed = false;

        'rows: for y in 0..height {
            let decoded = rows.row_f(&mut row_buf, y);
            row_buf_bytes.clear();
            for &px in decoded {
                row_buf_bytes.push(px.to_rgb(1.));
            }
            for (x, &byte_px) in row_buf_bytes.iter().enumerate() {
                let key = posterize_key(byte_px, ignorebits);
                let noise_weight = image.noise.as_ref().map_or(1., |noise| 1. + 15. * (noise[y * width + x] / 255.));
                let color = decoded[x];
                let entry = table.entry(key).or_insert((color, 0.));
                entry.1 += noise_weight;
                if table.len() > max_entries {
                    overflowed = true;
                    break 'rows;
                }
            }
        }

        if overflowed {
            ignorebits += 1;
            if ignorebits > 7 {
                return Err(LIQ_OUT_OF_MEMORY);
            }
            continue;
        }

        let items = table
            .into_values()
            .map(|(color, weight)| {
                let weight = weight.max(1e-9);
                HistItem { color, perceptual_weight: weight, adjusted_weight: weight }
            })
            .collect();
        return Ok(HistogramInternal { items });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Attributes;
    use crate::pal::RGBA;

    #[test]
    fn single_color_image_has_one_entry() {
        let attr = Attributes::new();
        let px = vec![RGBA::new(10, 20, 30, 255); 4 * 4];
        let mut img = Image::new(&attr, px, 4, 4, 0.45455).unwrap();
        let hist = build_histogram(&mut img, 4).unwrap();
        assert_eq!(hist.items.len(), 1);
    }

    #[test]
    fn two_colors_give_two_entries() {
        let attr = Attributes::new();
        let mut px = vec![RGBA::new(0, 0, 0, 255); 4 * 4];
        for p in px.iter_mut().take(8) {
            *p = RGBA::new(255, 255, 255, 255);
        }
        let mut img = Image::new(&attr, px, 4, 4, 0.45455).unwrap();
        let hist = build_histogram(&mut img, 4).unwrap();
        assert_eq!(hist.items.len(), 2);
    }
}
