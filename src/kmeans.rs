//! Voronoi / k-means-style palette refinement (C6).
//!
//! One iteration assigns every histogram entry to its nearest palette
//! color via the nearest-color index, accumulates per-entry weighted sums,
//! then replaces each palette color by its weighted centroid. The same
//! accumulator type doubles as the per-thread reduction unit for the plain
//! remapper (C8), which performs the same assignment/accumulate/finalize
//! dance over image pixels instead of histogram entries.

use crate::hist::HistogramInternal;
use crate::nearest::Nearest;
use crate::pal::{f_pixel, PalF, ARGBF};

struct ChannelSum {
    color: ARGBF,
    weight: f64,
    squared_error: f64,
}

impl Default for ChannelSum {
    fn default() -> Self {
        Self { color: ARGBF::default(), weight: 0., squared_error: 0. }
    }
}

pub(crate) struct Kmeans {
    sums: Vec<ChannelSum>,
}

impl Kmeans {
    #[must_use]
    pub fn new(palette_len: usize) -> Self {
        Self { sums: (0..palette_len).map(|_| ChannelSum::default()).collect() }
    }

    /// Fold one sample into the accumulator for `palette_index`.
    pub fn update_color(&mut self, color: f_pixel, weight: f32, palette_index: u8) {
        let s = &mut self.sums[palette_index as usize];
        let w = weight as f64;
        s.color.r += color.0.r * weight;
        s.color.g += color.0.g * weight;
        s.color.b += color.0.b * weight;
        s.color.a += color.0.a * weight;
        s.weight += w;
    }

    /// Merge a per-thread accumulator into this one (associative, so
    /// result is independent of how work was partitioned across threads,
    /// modulo floating-point reduction order — see `SPEC_FULL.md`).
    #[must_use]
    pub fn merge(mut a: Self, b: Self) -> Self {
        for (x, y) in a.sums.iter_mut().zip(b.sums.iter()) {
            x.color += y.color;
            x.weight += y.weight;
            x.squared_error += y.squared_error;
        }
        a
    }

    /// Write the accumulated centroids back into `palette`. Entries with
    /// zero accumulated weight (never matched by any sample) are left
    /// unchanged; fixed entries are never moved.
    pub fn finalize(self, palette: &mut PalF) {
        for ((color, pop), sum) in palette.iter_mut().zip(self.sums.iter()) {
            if pop.is_fixed() || sum.weight <= 0. {
                continue;
            }
            let w = sum.weight as f32;
            *color = f_pixel(ARGBF { r: sum.color.r / w, g: sum.color.g / w, b: sum.color.b / w, a: sum.color.a / w });
        }
    }

    /// Run one full Voronoi iteration over `hist` against `palette`,
    /// mutating `palette` in place and returning the weighted mean squared
    /// error. When `adjust_weights` is set, each histogram entry's
    /// `adjusted_weight` is multiplied by `sqrt(1 + per-entry error)` so
    /// poorly matched colors are emphasized on the next palette-search
    /// trial (C7).
    pub fn iteration(hist: &mut HistogramInternal, palette: &mut PalF, adjust_weights: bool) -> f64 {
        let nearest = Nearest::new(palette);
        let mut kmeans = Self::new(palette.len());
        let mut total_error = 0f64;
        let mut total_weight = 0f64;
        let mut last_match = 0u8;

        for item in hist.items.iter_mut() {
            let (idx, diff) = nearest.search(&item.color, last_match);
            last_match = idx;
            let weight = item.perceptual_weight;
            kmeans.update_color(item.color, weight, idx);
            let err = diff as f64;
            total_error += err * weight as f64;
            total_weight += weight as f64;
            if adjust_weights {
                item.adjusted_weight = item.perceptual_weight * (1. + err as f32).sqrt();
            }
        }

        kmeans.finalize(palette);
        if total_weight > 0. { total_error / total_weight } else { 0. }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hist::HistItem;
    use crate::pal::PalPop;

    fn item(r: f32, g: f32, b: f32, w: f32) -> HistItem {
        HistItem { color: f_pixel(ARGBF { a: 1., r, g, b }), perceptual_weight: w, adjusted_weight: w }
    }

    #[test]
    fn centroid_moves_toward_cluster() {
        let mut hist = HistogramInternal {
            items: vec![item(0.9, 0.9, 0.9, 1.), item(1.0, 1.0, 1.0, 1.), item(0.0, 0.0, 0.0, 1.)],
        };
        let mut pal = PalF::new();
        pal.push(f_pixel(ARGBF { a: 1., r: 0.5, g: 0.5, b: 0.5 }), PalPop::new(1.));
        pal.push(f_pixel(ARGBF { a: 1., r: 0.1, g: 0.1, b: 0.1 }), PalPop::new(1.));
        let err = Kmeans::iteration(&mut hist, &mut pal, false);
        assert!(err >= 0.);
        assert!(pal.as_slice()[0].0.r > 0.8);
    }

    #[test]
    fn fixed_entries_do_not_move() {
        let mut hist = HistogramInternal { items: vec![item(1., 1., 1., 1.)] };
        let mut pal = PalF::new();
        pal.push(f_pixel(ARGBF { a: 1., r: 0., g: 0., b: 0. }), PalPop::new(1.).to_fixed());
        Kmeans::iteration(&mut hist, &mut pal, false);
        assert_eq!(pal.as_slice()[0].0.r, 0.);
    }
}
