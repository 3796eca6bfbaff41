//! Color quantization and dithering engine.
//!
//! Reduces a 32-bit RGBA raster to an indexed palette of at most 256 colors
//! and a byte-per-pixel index plane that, viewed through the palette,
//! approximates the original within a chosen perceptual error budget.
//!
//! The typical flow is:
//!
//! ```no_run
//! use chromacut::{Attributes, Image};
//!
//! # fn run() -> Result<(), chromacut::LiqError> {
//! let mut attr = Attributes::new();
//! attr.set_max_colors(256)?;
//! attr.set_speed(4)?;
//!
//! let mut image = Image::new(&attr, vec![rgb::RGBA::new(255u8, 0, 0, 255); 100], 10, 10, 0.0)?;
//! let mut result = attr.quantize(&mut image)?;
//! result.set_dithering_level(1.0)?;
//!
//! let (palette, pixels) = result.remapped(&mut image)?;
//! # Ok(())
//! # }
//! ```

mod attr;
mod error;
mod ffi;
mod hist;
mod image;
mod kmeans;
mod mediancut;
mod nearest;
mod pal;
mod quant;
mod remap;
mod rows;
mod seacow;

pub use attr::{Attributes, ControlFlow};
pub use error::*;
pub use image::Image;
pub use pal::RGBA;
pub use quant::QuantizationResult;
pub use remap::DitherMapMode;

use std::cmp::Ordering;

/// Total ordering over floats for sorting/heap use, without panicking on NaN.
///
/// NaN never appears in this engine's arithmetic under valid inputs, but a
/// `PartialOrd`-only sort key is an easy way to introduce a panic far from
/// its cause, so comparisons here are total by construction: NaN sorts as
/// greater than everything, including other NaNs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OrdFloat<T>(T);

impl<T: PartialOrd + Copy> OrdFloat<T> {
    #[inline]
    pub(crate) fn unchecked_new(v: T) -> Self {
        Self(v)
    }

    #[inline]
    pub(crate) fn into_inner(self) -> T {
        self.0
    }
}

impl<T: PartialOrd + Copy> Eq for OrdFloat<T> {}

impl<T: PartialOrd + Copy> PartialOrd for OrdFloat<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: PartialOrd + Copy> Ord for OrdFloat<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Greater)
    }
}
