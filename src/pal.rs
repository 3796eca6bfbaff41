//! Color space (C1): gamma conversion, perceptual distance, and the palette
//! data structures built on top of them.

use std::ops::{Add, AddAssign, Deref, DerefMut, Mul, Sub};

pub use rgb::RGBA8 as RGBA;

/// Index type into a `Palette`/`PalF`; the output index plane is one byte
/// per pixel, so a palette can never exceed 256 entries.
pub type PalIndex = u8;

/// Length type for palette size bookkeeping (kept wider than `PalIndex` so
/// "one past the largest index" doesn't wrap).
pub type PalLen = u16;

pub const MAX_COLORS: usize = 256;

/// Linear alpha at/under which a palette entry is treated as "transparent"
/// for ordering purposes (see `quant.rs::sort_palette`).
pub const MAX_TRANSP_A: f32 = 1. / 256.;

/// Linear alpha above which a palette entry is treated as effectively
/// opaque (used to decide whether a "transparent slot" search result is
/// usable as a background substitute).
pub const MIN_OPAQUE_A: f32 = 1. - 1. / 256.;

/// Overall scale applied to the perceptual squared-distance metric before
/// it's reported as MSE. Kept as its own constant (rather than folded into
/// the weights below) so the quality<->MSE mapping in `quant.rs` can be
/// tuned independently of the per-channel weighting.
pub const LIQ_WEIGHT_MSE: f64 = 1.0;

/// Linear-space RGBA pixel, channels in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ARGBF {
    pub a: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Add for ARGBF {
    type Output = Self;
    #[inline]
    fn add(self, o: Self) -> Self {
        Self { a: self.a + o.a, r: self.r + o.r, g: self.g + o.g, b: self.b + o.b }
    }
}

impl Sub for ARGBF {
    type Output = Self;
    #[inline]
    fn sub(self, o: Self) -> Self {
        Self { a: self.a - o.a, r: self.r - o.r, g: self.g - o.g, b: self.b - o.b }
    }
}

impl Mul<f32> for ARGBF {
    type Output = Self;
    #[inline]
    fn mul(self, k: f32) -> Self {
        Self { a: self.a * k, r: self.r * k, g: self.g * k, b: self.b * k }
    }
}

impl AddAssign for ARGBF {
    #[inline]
    fn add_assign(&mut self, o: Self) {
        *self = *self + o;
    }
}

/// Newtype over [`ARGBF`] carrying the perceptual distance metric. Always
/// gamma-linearized; alpha is never gamma-transformed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct f_pixel(pub ARGBF);

impl Deref for f_pixel {
    type Target = ARGBF;
    #[inline]
    fn deref(&self) -> &ARGBF {
        &self.0
    }
}

impl DerefMut for f_pixel {
    #[inline]
    fn deref_mut(&mut self) -> &mut ARGBF {
        &mut self.0
    }
}

impl f_pixel {
    /// Squared perceptual distance, `self` treated as the query and `other`
    /// as the destination (palette) color. Chroma channels are weighted by
    /// the destination's alpha so that a transparent palette entry is cheap
    /// to match along RGB: `(Δr²+Δg²+Δb²)·a_dst + Δa²·4`.
    #[inline]
    pub fn diff(&self, other: &Self) -> f32 {
        let dr = self.0.r - other.0.r;
        let dg = self.0.g - other.0.g;
        let db = self.0.b - other.0.b;
        let da = self.0.a - other.0.a;
        (dr * dr + dg * dg + db * db) * other.0.a + da * da * 4.
    }

    /// Decode a byte pixel into linear-float space using the per-batch
    /// gamma lookup table.
    #[inline]
    #[must_use]
    pub fn from_rgba(lut: &GammaLut, px: RGBA) -> Self {
        Self(ARGBF {
            a: px.a as f32 / 255.,
            r: lut.to_linear(px.r) * (px.a as f32 / 255.),
            g: lut.to_linear(px.g) * (px.a as f32 / 255.),
            b: lut.to_linear(px.b) * (px.a as f32 / 255.),
        })
    }

    /// Re-encode to a byte pixel through `output_gamma`, rounding.
    #[must_use]
    pub fn to_rgb(&self, output_gamma: f64) -> RGBA {
        let a = self.0.a;
        if a <= 0. {
            return RGBA::new(0, 0, 0, 0);
        }
        let inv_gamma = 1. / output_gamma;
        let unpremultiply = |c: f32| -> u8 {
            let linear = (c / a).clamp(0., 1.);
            (linear.powf(inv_gamma as f32) * 255. + 0.5) as u8
        };
        RGBA::new(unpremultiply(self.0.r), unpremultiply(self.0.g), unpremultiply(self.0.b), (a * 255. + 0.5) as u8)
    }
}

/// Process-wide-in-the-original, value-here lookup table converting byte
/// channels to linear float under a fixed gamma. Built once per batch and
/// threaded explicitly through conversions (see `SPEC_FULL.md` §0) rather
/// than stored as global mutable state.
pub struct GammaLut([f32; 256]);

impl GammaLut {
    #[inline]
    pub fn to_linear(&self, byte: u8) -> f32 {
        self.0[byte as usize]
    }
}

/// Build the gamma decode table. `gamma` of `0` is interpreted as 1/2.2.
#[must_use]
pub fn gamma_lut(gamma: f64) -> GammaLut {
    let gamma = if gamma <= 0. { 1. / 2.2 } else { gamma };
    let mut table = [0f32; 256];
    for (i, t) in table.iter_mut().enumerate() {
        *t = (i as f64 / 255.).powf(gamma) as f32;
    }
    GammaLut(table)
}

/// Per-entry weight in a histogram/palette. The sign-independent magnitude
/// is the weight; `fixed` marks colors pinned by the caller (not subject to
/// Voronoi centroid movement).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PalPop {
    weight: f32,
    fixed: bool,
}

impl PalPop {
    #[must_use]
    pub fn new(weight: f32) -> Self {
        Self { weight, fixed: false }
    }

    #[inline]
    #[must_use]
    pub fn popularity(&self) -> f32 {
        self.weight
    }

    #[inline]
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    #[must_use]
    pub fn to_fixed(mut self) -> Self {
        self.fixed = true;
        self
    }
}

/// Mutable, in-construction palette: parallel color/weight vectors so
/// remap's hot loop can borrow just the colors (`as_slice`) without the
/// popularity bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct PalF {
    colors: Vec<f_pixel>,
    pops: Vec<PalPop>,
}

impl PalF {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, color: f_pixel, pop: PalPop) {
        self.colors.push(color);
        self.pops.push(pop);
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f_pixel] {
        &self.colors
    }

    pub fn iter(&self) -> impl Iterator<Item = (&f_pixel, &PalPop)> {
        self.colors.iter().zip(self.pops.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut f_pixel, &mut PalPop)> {
        self.colors.iter_mut().zip(self.pops.iter_mut())
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        self.colors.swap(a, b);
        self.pops.swap(a, b);
    }

    /// Append any caller-pinned colors not already present, up to
    /// `max_colors`, and mark them fixed so Voronoi refinement leaves them
    /// untouched.
    #[must_use]
    pub fn with_fixed_colors(mut self, max_colors: PalLen, fixed_colors: &crate::hist::FixedColorsSet) -> Self {
        for &color in fixed_colors.iter() {
            if self.len() >= max_colors as usize {
                break;
            }
            if self.colors.iter().any(|c| c.diff(&color) < 1e-9) {
                continue;
            }
            self.push(color, PalPop::new(0.).to_fixed());
        }
        self
    }
}

/// Finalized, integer (output) palette.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub count: PalLen,
    pub entries: [RGBA; MAX_COLORS],
}

impl Palette {
    #[must_use]
    pub fn as_slice(&self) -> &[RGBA] {
        &self.entries[..self.count as usize]
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [RGBA] {
        &mut self.entries[..self.count as usize]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self { count: 0, entries: [RGBA::new(0, 0, 0, 0); MAX_COLORS] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamma_roundtrip_is_close() {
        let lut = gamma_lut(0.45455);
        let px = RGBA::new(128, 64, 200, 255);
        let f = f_pixel::from_rgba(&lut, px);
        let back = f.to_rgb(0.45455);
        assert!((back.r as i16 - px.r as i16).abs() <= 1);
        assert!((back.g as i16 - px.g as i16).abs() <= 1);
        assert!((back.b as i16 - px.b as i16).abs() <= 1);
    }

    #[test]
    fn diff_of_identical_pixels_is_zero() {
        let lut = gamma_lut(0.45455);
        let px = f_pixel::from_rgba(&lut, RGBA::new(10, 20, 30, 255));
        assert_eq!(px.diff(&px), 0.);
    }

    #[test]
    fn transparent_pixel_diff_is_cheap_on_chroma() {
        let transparent = f_pixel(ARGBF { a: 0., r: 0., g: 0., b: 0. });
        let red = f_pixel(ARGBF { a: 0., r: 1., g: 0., b: 0. });
        // alpha matches (both 0) so only chroma differs, weighted by max alpha = 0
        assert_eq!(transparent.diff(&red), 0.);
    }
}
