//! Nearest-color index (C5): accelerated lookup from a query color to its
//! nearest palette entry.
//!
//! Below 16 entries a linear scan is already faster than any tree
//! overhead, so that's the only backend used; above it, a vantage-point
//! tree partitions the palette so most queries only visit a handful of
//! candidates. Both backends are reached through the same `search` entry
//! point so callers never need to know which one is active.

use crate::pal::{f_pixel, PalF, PalIndex, MIN_OPAQUE_A};

const LINEAR_SCAN_THRESHOLD: usize = 16;

/// Byte alpha (in linear `[0,1]` terms) below which a query is considered
/// "nearly transparent" and routed to the transparent slot rather than
/// matched by raw distance.
const NEARLY_TRANSPARENT_A: f32 = 1. / 256.;

enum Backend {
    Linear,
    VpTree(Option<VpNode>),
}

struct VpNode {
    index: PalIndex,
    /// Split radius: descendants in `inside` are within this distance of
    /// `index`'s color; `outside` holds everything farther.
    radius: f32,
    inside: Option<Box<VpNode>>,
    outside: Option<Box<VpNode>>,
}

pub(crate) struct Nearest<'p> {
    colors: &'p [f_pixel],
    backend: Backend,
    transparent_index: Option<PalIndex>,
}

impl<'p> Nearest<'p> {
    #[must_use]
    pub fn new(palette: &'p PalF) -> Self {
        let colors = palette.as_slice();
        let transparent_index = colors
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.0.a.partial_cmp(&b.0.a).unwrap())
            .filter(|(_, c)| c.0.a < MIN_OPAQUE_A)
            .map(|(i, _)| i as PalIndex);

        let backend = if colors.len() < LINEAR_SCAN_THRESHOLD {
            Backend::Linear
        } else {
            let indices: Vec<PalIndex> = (0..colors.len() as PalIndex).collect();
            Backend::VpTree(build_vp_tree(colors, indices))
        };

        Self { colors, backend, transparent_index }
    }

    /// Find the palette entry nearest `query`. `last_match_hint` is checked
    /// first as a cheap common-case shortcut (adjacent pixels are usually
    /// mapped to the same or a nearby color); it never changes the result,
    /// only how fast it's found.
    #[must_use]
    pub fn search(&self, query: &f_pixel, last_match_hint: PalIndex) -> (PalIndex, f32) {
        if query.0.a < NEARLY_TRANSPARENT_A {
            if let Some(t) = self.transparent_index {
                return (t, query.diff(&self.colors[t as usize]));
            }
        }

        match &self.backend {
            Backend::Linear => self.linear_search(query),
            Backend::VpTree(root) => {
                let hinted = query.diff(&self.colors[last_match_hint as usize]);
                let mut best = (last_match_hint, hinted);
                if let Some(root) = root {
                    vp_search(root, self.colors, query, &mut best);
                }
                best
            }
        }
    }

    fn linear_search(&self, query: &f_pixel) -> (PalIndex, f32) {
        let mut best_index = 0;
        let mut best_diff = f32::MAX;
        for (i, color) in self.colors.iter().enumerate() {
            let d = query.diff(color);
            if d < best_diff {
                best_diff = d;
                best_index = i as PalIndex;
            }
        }
        (best_index, best_diff)
    }
}

fn build_vp_tree(colors: &[f_pixel], mut indices: Vec<PalIndex>) -> Option<VpNode> {
    if indices.is_empty() {
        return None;
    }
    let vantage = indices.swap_remove(0);
    if indices.is_empty() {
        return Some(VpNode { index: vantage, radius: 0., inside: None, outside: None });
    }

    indices.sort_by(|&a, &b| {
        let da = colors[vantage as usize].diff(&colors[a as usize]);
        let db = colors[vantage as usize].diff(&colors[b as usize]);
        da.partial_cmp(&db).unwrap()
    });
    let mid = indices.len() / 2;
    let radius = colors[vantage as usize].diff(&colors[indices[mid] as usize]);
    let outside_half = indices.split_off(mid);

    Some(VpNode {
        index: vantage,
        radius,
        inside: build_vp_tree(colors, indices).map(Box::new),
        outside: build_vp_tree(colors, outside_half).map(Box::new),
    })
}

fn vp_search(node: &VpNode, colors: &[f_pixel], query: &f_pixel, best: &mut (PalIndex, f32)) {
    let d_sq = query.diff(&colors[node.index as usize]);
    if d_sq < best.1 {
        *best = (node.index, d_sq);
    }

    // Pruning in true-distance space: squared distance doesn't satisfy the
    // triangle inequality, so the safe radius check needs a square root on
    // both sides.
    let d = d_sq.sqrt();
    let radius = node.radius.sqrt();
    let best_dist = best.1.sqrt();

    if let Some(inside) = &node.inside {
        if d - best_dist <= radius {
            vp_search(inside, colors, query, best);
        }
    }
    if let Some(outside) = &node.outside {
        if d + best_dist >= radius {
            vp_search(outside, colors, query, best);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pal::{PalPop, ARGBF};

    fn px(r: f32, g: f32, b: f32, a: f32) -> f_pixel {
        f_pixel(ARGBF { a, r, g, b })
    }

    #[test]
    fn linear_backend_finds_exact_match() {
        let mut pal = PalF::new();
        pal.push(px(0., 0., 0., 1.), PalPop::new(1.));
        pal.push(px(1., 1., 1., 1.), PalPop::new(1.));
        pal.push(px(0.5, 0.5, 0.5, 1.), PalPop::new(1.));
        let nearest = Nearest::new(&pal);
        let (idx, diff) = nearest.search(&px(0.5, 0.5, 0.5, 1.), 0);
        assert_eq!(idx, 2);
        assert!(diff < 1e-6);
    }

    #[test]
    fn vp_tree_backend_matches_linear_scan() {
        let mut pal = PalF::new();
        for i in 0..40u32 {
            let v = i as f32 / 40.;
            pal.push(px(v, (v * 3.).fract(), (v * 7.).fract(), 1.), PalPop::new(1.));
        }
        let nearest = Nearest::new(&pal);
        let colors = pal.as_slice();
        for q in [px(0.2, 0.1, 0.9, 1.), px(0.9, 0.9, 0.1, 1.), px(0.0, 0.0, 0.0, 1.)] {
            let (idx, _) = nearest.search(&q, 0);
            let (expect_idx, _) = colors
                .iter()
                .enumerate()
                .map(|(i, c)| (i as PalIndex, q.diff(c)))
                .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
                .unwrap();
            assert_eq!(q.diff(&colors[idx as usize]), q.diff(&colors[expect_idx as usize]));
        }
    }

    /// Regression for a backend disagreement when palette entries are
    /// partially transparent: the weighting in `diff()` is asymmetric in its
    /// two operands, so `search` must always compute `query.diff(&palette)`,
    /// never the reverse, in both the linear and VP-tree backends.
    #[test]
    fn vp_tree_backend_matches_linear_scan_with_semi_transparent_palette() {
        let mut pal = PalF::new();
        for i in 0..40u32 {
            let v = i as f32 / 40.;
            let a = 0.2 + 0.6 * ((i % 5) as f32 / 4.);
            pal.push(px(v, (v * 3.).fract(), (v * 7.).fract(), a), PalPop::new(1.));
        }
        let nearest = Nearest::new(&pal);
        let colors = pal.as_slice();
        for q in [px(0.2, 0.1, 0.9, 0.9), px(0.9, 0.9, 0.1, 0.5), px(0.0, 0.0, 0.0, 0.7)] {
            let (idx, _) = nearest.search(&q, 0);
            let (expect_idx, _) = colors
                .iter()
                .enumerate()
                .map(|(i, c)| (i as PalIndex, q.diff(c)))
                .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
                .unwrap();
            assert_eq!(idx, expect_idx);
        }
    }

    #[test]
    fn transparent_query_routes_to_transparent_slot() {
        let mut pal = PalF::new();
        pal.push(px(1., 0., 0., 1.), PalPop::new(1.));
        pal.push(px(0., 0., 0., 0.), PalPop::new(1.));
        let nearest = Nearest::new(&pal);
        let (idx, _) = nearest.search(&f_pixel::default(), 0);
        assert_eq!(idx, 1);
    }
}
