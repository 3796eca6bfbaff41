//! Median-cut initial palette construction (C4): recursive variance
//! splitting of a histogram into boxes, one palette entry per box.

use crate::hist::HistogramInternal;
use crate::pal::{f_pixel, PalF, PalLen, PalPop};
use crate::OrdFloat;

struct Box {
    /// Indices into the histogram's item slice owned by this box.
    start: usize,
    len: usize,
    variance: f64,
    total_weight: f64,
}

/// Build a palette of at most `max_colors` entries from `hist`, splitting
/// the highest-variance box until either the color budget is used up or no
/// box's weighted variance exceeds `max_mse_per_color` (an acceptance
/// threshold scaled from `target_mse`).
pub(crate) fn mediancut(hist: &mut HistogramInternal, max_colors: PalLen, target_mse: f64, max_mse_per_color: f64) -> PalF {
    let n = hist.items.len();
    let mut order: Vec<usize> = (0..n).collect();

    let mut boxes = vec![measure_box(hist, &order, 0, n)];

    while (boxes.len() as PalLen) < max_colors {
        let total_weight: f64 = boxes.iter().map(|b| b.total_weight).sum();
        let total_variance: f64 = boxes.iter().map(|b| b.variance).sum();
        if total_weight > 0. && target_mse > 0. && total_variance / total_weight <= target_mse {
            break;
        }

        let Some((idx, _)) = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.variance > max_mse_per_color)
            .max_by_key(|(_, b)| OrdFloat::unchecked_new(b.variance))
        else {
            break;
        };

        let b = &boxes[idx];
        let (start, len) = (b.start, b.len);
        if len < 2 {
            break;
        }
        let split_at = split_box(hist, &mut order, start, len);
        if split_at == 0 || split_at == len {
            break;
        }

        let left = measure_box(hist, &order, start, split_at);
        let right = measure_box(hist, &order, start + split_at, len - split_at);
        boxes[idx] = left;
        boxes.push(right);
    }

    let mut pal = PalF::new();
    for b in &boxes {
        let (color, weight) = centroid(hist, &order, b.start, b.len);
        pal.push(color, PalPop::new(weight as f32));
    }
    pal
}

fn measure_box(hist: &HistogramInternal, order: &[usize], start: usize, len: usize) -> Box {
    let (mean, total_weight) = centroid(hist, order, start, len);
    let mut variance = 0.;
    for &i in &order[start..start + len] {
        let item = &hist.items[i];
        let d = item.color.diff(&mean) as f64;
        variance += d * item.adjusted_weight as f64;
    }
    Box { start, len, variance, total_weight }
}

fn centroid(hist: &HistogramInternal, order: &[usize], start: usize, len: usize) -> (f_pixel, f64) {
    let mut sum = (0f64, 0f64, 0f64, 0f64);
    let mut total_weight = 0f64;
    for &i in &order[start..start + len] {
        let item = &hist.items[i];
        let w = item.adjusted_weight as f64;
        sum.0 += item.color.0.r as f64 * w;
        sum.1 += item.color.0.g as f64 * w;
        sum.2 += item.color.0.b as f64 * w;
        sum.3 += item.color.0.a as f64 * w;
        total_weight += w;
    }
    if total_weight <= 0. {
        return (f_pixel::default(), 0.);
    }
    let color = f_pixel(crate::pal::ARGBF {
        r: (sum.0 / total_weight) as f32,
        g: (sum.1 / total_weight) as f32,
        b: (sum.2 / total_weight) as f32,
        a: (sum.3 / total_weight) as f32,
    });
    (color, total_weight)
}

/// Partition `order[start..start+len]` in place around the weighted median
/// of the channel with the largest spread (ties broken R,G,B,A), returning
/// the split point.
fn split_box(hist: &mut HistogramInternal, order: &mut [usize], start: usize, len: usize) -> usize {
    let slice = &mut order[start..start + len];

    let mut lo = [f32::MAX; 4];
    let mut hi = [f32::MIN; 4];
    for &i in slice.iter() {
        let c = hist.items[i].color.0;
        let v = [c.r, c.g, c.b, c.a];
        for ch in 0..4 {
            lo[ch] = lo[ch].min(v[ch]);
            hi[ch] = hi[ch].max(v[ch]);
        }
    }
    let spread: [f32; 4] = std::array::from_fn(|ch| hi[ch] - lo[ch]);
    // `Iterator::max_by` keeps the *last* maximal element on ties; iterate
    // channels in reverse (A,B,G,R) so an exact tie resolves to the
    // lowest-indexed channel, i.e. R wins over G/B/A per spec order.
    let channel = (0..4).rev().max_by(|&a, &b| spread[a].partial_cmp(&spread[b]).unwrap()).unwrap();

    slice.sort_by(|&a, &b| {
        let va = channel_value(&hist.items[a].color, channel);
        let vb = channel_value(&hist.items[b].color, channel);
        va.partial_cmp(&vb).unwrap()
    });

    let total_weight: f64 = slice.iter().map(|&i| hist.items[i].adjusted_weight as f64).sum();
    let half = total_weight / 2.;
    let mut acc = 0.;
    for (pos, &i) in slice.iter().enumerate() {
        acc += hist.items[i].adjusted_weight as f64;
        if acc >= half {
            return pos + 1;
        }
    }
    len
}

#[inline]
fn channel_value(px: &f_pixel, channel: usize) -> f32 {
    match channel {
        0 => px.0.r,
        1 => px.0.g,
        2 => px.0.b,
        _ => px.0.a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hist::HistItem;
    use crate::pal::ARGBF;

    fn item(r: f32, g: f32, b: f32, a: f32, w: f32) -> HistItem {
        HistItem { color: f_pixel(ARGBF { a, r, g, b }), perceptual_weight: w, adjusted_weight: w }
    }

    #[test]
    fn single_color_yields_one_box() {
        let mut hist = HistogramInternal { items: vec![item(0.5, 0.5, 0.5, 1., 10.)] };
        let pal = mediancut(&mut hist, 4, 0., 0.);
        assert_eq!(pal.len(), 1);
    }

    #[test]
    fn two_far_apart_colors_split_into_two() {
        let mut hist = HistogramInternal { items: vec![item(0., 0., 0., 1., 10.), item(1., 1., 1., 1., 10.)] };
        let pal = mediancut(&mut hist, 2, 0., 0.);
        assert_eq!(pal.len(), 2);
    }

    #[test]
    fn respects_max_colors_budget() {
        let mut hist = HistogramInternal {
            items: (0..16).map(|i| item(i as f32 / 16., 0., 0., 1., 1.)).collect(),
        };
        let pal = mediancut(&mut hist, 4, 0., 0.);
        assert!(pal.len() <= 4);
    }

    #[test]
    fn exact_channel_tie_splits_on_red_first() {
        // r, g and b all span [0,1] identically; a tie must resolve to R.
        let mut hist = HistogramInternal {
            items: vec![item(0., 0., 0., 1., 1.), item(1., 1., 1., 1., 1.)],
        };
        let mut order: Vec<usize> = (0..2).collect();
        let split_at = split_box(&mut hist, &mut order, 0, 2);
        assert_eq!(split_at, 1);
        // after sorting by R ascending, the lower-R item comes first
        assert_eq!(hist.items[order[0]].color.0.r, 0.);
        assert_eq!(hist.items[order[1]].color.0.r, 1.);
    }
}
