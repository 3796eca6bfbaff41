//! Attribute object (C11): validated configuration, the entry point for
//! `quantize()`, and the speed-dependent knobs the rest of the engine
//! reads (histogram size, trial count, iteration budget).

use crate::error::*;
use crate::hist::build_histogram;
use crate::image::Image;
use crate::quant::{quality_to_mse, QuantizationResult};
use crate::remap::DitherMapMode;

/// Return value of a progress callback: whether the operation should keep
/// going or abort early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    Break,
}

const DEFAULT_GAMMA: f64 = 0.45455;

pub struct Attributes {
    pub(crate) max_colors: u16,
    speed: u8,
    target_quality: u8,
    min_quality: u8,
    min_opacity: u8,
    pub(crate) last_index_transparent: bool,
    output_gamma: f64,
    min_posterization: u8,
    pub(crate) use_dither_map: DitherMapMode,
    pub(crate) progress_stage1: u8,
    pub(crate) progress_stage2: u8,
    pub(crate) progress_stage3: u8,
    progress_callback: Option<Box<dyn Fn(f32) -> ControlFlow + Send + Sync>>,
    log_callback: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            max_colors: 256,
            speed: 4,
            target_quality: 0,
            min_quality: 0,
            min_opacity: 255,
            last_index_transparent: false,
            output_gamma: DEFAULT_GAMMA,
            min_posterization: 0,
            use_dither_map: DitherMapMode::None,
            progress_stage1: 20,
            progress_stage2: 30,
            progress_stage3: 50,
            progress_callback: None,
            log_callback: None,
        }
    }
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_max_colors(&mut self, n: u32) -> liq_error {
        if !(2..=256).contains(&n) {
            return LIQ_VALUE_OUT_OF_RANGE;
        }
        self.max_colors = n as u16;
        LIQ_OK
    }

    #[must_use]
    pub fn max_colors(&self) -> u32 {
        u32::from(self.max_colors)
    }

    /// 1 = slow/best, 10 = fast/worst.
    pub fn set_speed(&mut self, speed: i32) -> liq_error {
        if !(1..=10).contains(&speed) {
            return LIQ_VALUE_OUT_OF_RANGE;
        }
        self.speed = speed as u8;
        if speed >= 8 {
            self.use_dither_map = DitherMapMode::None;
        } else if self.use_dither_map == DitherMapMode::None && speed <= 3 {
            self.use_dither_map = DitherMapMode::Enabled;
        }
        LIQ_OK
    }

    #[must_use]
    pub fn speed(&self) -> i32 {
        i32::from(self.speed)
    }

    /// `target` is the quality this engine aims for; `minimum` is the
    /// quality below which `quantize` fails with `LIQ_QUALITY_TOO_LOW`
    /// rather than returning a degraded result.
    pub fn set_quality(&mut self, minimum: u32, target: u32) -> liq_error {
        if minimum > 100 || target > 100 || minimum > target {
            return LIQ_VALUE_OUT_OF_RANGE;
        }
        self.min_quality = minimum as u8;
        self.target_quality = target as u8;
        LIQ_OK
    }

    /// IE6 workaround: alphas at or above this are pushed toward fully
    /// opaque before quantization sees them.
    pub fn set_min_opacity(&mut self, min_opacity: u32) -> liq_error {
        if min_opacity > 255 {
            return LIQ_VALUE_OUT_OF_RANGE;
        }
        self.min_opacity = min_opacity as u8;
        LIQ_OK
    }

    pub fn set_last_index_transparent(&mut self, value: bool) {
        self.last_index_transparent = value;
    }

    pub fn set_output_gamma(&mut self, gamma: f64) -> liq_error {
        if gamma <= 0. || gamma >= 1. {
            return LIQ_VALUE_OUT_OF_RANGE;
        }
        self.output_gamma = gamma;
        LIQ_OK
    }

    /// Round output palette channels down to `bits` significant bits
    /// (0 = no posterization). Keeps e.g. 16-bit display targets from
    /// needing their own rounding pass.
    pub fn set_min_posterization(&mut self, bits: u32) -> liq_error {
        if bits > 4 {
            return LIQ_VALUE_OUT_OF_RANGE;
        }
        self.min_posterization = bits as u8;
        LIQ_OK
    }

    #[must_use]
    pub(crate) fn min_posterization(&self) -> u8 {
        self.min_posterization
    }

    pub fn set_use_dither_map(&mut self, mode: DitherMapMode) {
        self.use_dither_map = mode;
    }

    pub fn set_progress_callback<F: Fn(f32) -> ControlFlow + Send + Sync + 'static>(&mut self, callback: F) {
        self.progress_callback = Some(Box::new(callback));
    }

    pub fn set_log_callback<F: Fn(&str) + Send + Sync + 'static>(&mut self, callback: F) {
        self.log_callback = Some(Box::new(callback));
    }

    pub(crate) fn verbose_print(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        log::debug!("{msg}");
        if let Some(cb) = &self.log_callback {
            cb(msg);
        }
    }

    /// Returns `true` if the operation should abort.
    pub(crate) fn progress(&self, percent: f32) -> bool {
        match &self.progress_callback {
            Some(cb) => cb(percent) == ControlFlow::Break,
            None => false,
        }
    }

    /// `(max_mse, target_mse, target_mse_is_zero)`. `max_mse` is `None`
    /// when no quality floor was configured (minimum quality 0), meaning
    /// `quantize` never fails on quality grounds.
    pub(crate) fn target_mse(&self, hist_size: usize) -> (Option<f64>, f64, bool) {
        let target_mse = quality_to_mse(self.target_quality);
        let max_mse = if self.min_quality > 0 { Some(quality_to_mse(self.min_quality)) } else { None };
        // Small histograms mean few distinct colors; let the trial loop
        // demand an exact match instead of settling for "good enough".
        let target_mse = if hist_size <= self.max_colors as usize { 0. } else { target_mse };
        (max_mse, target_mse, target_mse <= 0.)
    }

    pub(crate) fn feedback_loop_trials(&self, hist_size: usize) -> i32 {
        let mut trials = 56 - 9 * i32::from(self.speed);
        if hist_size > 5000 {
            trials -= (trials * (hist_size as i32 - 5000) / 60000).clamp(0, trials.max(0));
        }
        trials.max(if self.speed >= 10 { -1 } else { 0 })
    }

    /// `(iterations, change-threshold-to-stop)` for the post-search
    /// Voronoi polish in `quant.rs::refine_palette`.
    pub(crate) fn kmeans_iterations(&self, _hist_size: usize, has_palette_error: bool) -> (i32, f64) {
        if !has_palette_error {
            return (1, 0.);
        }
        let base = i32::from(8u8.saturating_sub(self.speed));
        let iterations = base + base * base / 2;
        let limit = 2f64.powi(-(23 - i32::from(self.speed)));
        (iterations, limit)
    }

    /// Build a palette and an index plane for `image`.
    pub fn quantize(&self, image: &mut Image) -> Result<QuantizationResult, liq_error> {
        if image.width() >= 4 && image.height() >= 4 && self.speed <= 7 {
            image.contrast_maps()?;
        }

        let hist = build_histogram(image, self.speed)?;
        let fixed_colors = image.fixed_colors.clone();
        QuantizationResult::new(self, hist, false, &fixed_colors, self.output_gamma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_max_colors() {
        let mut attr = Attributes::new();
        assert_eq!(attr.set_max_colors(1), LIQ_VALUE_OUT_OF_RANGE);
        assert_eq!(attr.set_max_colors(257), LIQ_VALUE_OUT_OF_RANGE);
        assert_eq!(attr.max_colors(), 256);
    }

    #[test]
    fn rejects_out_of_range_speed() {
        let mut attr = Attributes::new();
        assert_eq!(attr.set_speed(0), LIQ_VALUE_OUT_OF_RANGE);
        assert_eq!(attr.set_speed(11), LIQ_VALUE_OUT_OF_RANGE);
    }

    #[test]
    fn quality_minimum_cannot_exceed_target() {
        let mut attr = Attributes::new();
        assert_eq!(attr.set_quality(80, 50), LIQ_VALUE_OUT_OF_RANGE);
        assert_eq!(attr.set_quality(50, 80), LIQ_OK);
    }

    #[test]
    fn failed_setter_leaves_state_unchanged() {
        let mut attr = Attributes::new();
        attr.set_speed(11);
        assert_eq!(attr.speed(), 4);
    }
}
