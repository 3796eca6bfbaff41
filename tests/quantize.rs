//! End-to-end scenarios exercised through the public API only.

use chromacut::{Attributes, Image, LiqError, LIQ_OK, LIQ_QUALITY_TOO_LOW};
use rand::{Rng, SeedableRng};
use rgb::RGBA8;

fn solid(w: usize, h: usize, px: RGBA8) -> Vec<RGBA8> {
    vec![px; w * h]
}

fn ok(e: LiqError) {
    assert_eq!(e, LIQ_OK);
}

/// Spec §6's quality→MSE mapping, scaled to the same MSE·65536/6 units
/// `quantization_error`/`remapping_error` report in.
fn quality_to_scaled_mse(q: f64) -> f64 {
    let mse = 2.5 / (210. + q).powf(1.2) * (100.1 - q) / 100.;
    mse * 65536. / 6.
}

#[test]
fn s1_uniform_red_image_quantizes_to_single_exact_color() {
    let mut attr = Attributes::new();
    ok(attr.set_max_colors(2));
    let red = RGBA8::new(255, 0, 0, 255);
    let mut image = Image::new(&attr, solid(2, 2, red), 2, 2, 0.).unwrap();
    let mut result = attr.quantize(&mut image).unwrap();
    ok(result.set_dithering_level(0.));

    let (palette, indices) = result.remapped(&mut image).unwrap();
    assert!(palette.iter().any(|&c| c == red));
    assert!(indices.iter().all(|&i| i == 0));
    assert_eq!(result.quantization_error(), Some(0.));
}

#[test]
fn s2_gradient_splits_into_two_grays_with_bounded_error() {
    let mut attr = Attributes::new();
    ok(attr.set_max_colors(2));
    let px = vec![
        RGBA8::new(0, 0, 0, 255),
        RGBA8::new(85, 85, 85, 255),
        RGBA8::new(170, 170, 170, 255),
        RGBA8::new(255, 255, 255, 255),
    ];
    let mut image = Image::new(&attr, px, 4, 1, 0.).unwrap();
    let mut result = attr.quantize(&mut image).unwrap();
    ok(result.set_dithering_level(0.));

    let (palette, indices) = result.remapped(&mut image).unwrap();
    assert_eq!(palette.len(), 2);
    let (lo, hi) = indices.iter().fold((0u32, 0u32), |(lo, hi), &i| if i == 0 { (lo + 1, hi) } else { (lo, hi + 1) });
    assert_eq!(lo, 2);
    assert_eq!(hi, 2);

    let err = result.remapping_error().unwrap();
    assert!(err > 0.);
    assert!(err < quality_to_scaled_mse(50.));
}

#[test]
fn s3_transparent_pixel_lands_in_last_slot() {
    let mut attr = Attributes::new();
    ok(attr.set_max_colors(4));
    attr.set_last_index_transparent(true);
    let px = vec![
        RGBA8::new(0, 0, 0, 0),
        RGBA8::new(255, 0, 0, 255),
        RGBA8::new(0, 255, 0, 255),
        RGBA8::new(0, 0, 255, 255),
    ];
    let mut image = Image::new(&attr, px, 2, 2, 0.).unwrap();
    let mut result = attr.quantize(&mut image).unwrap();
    ok(result.set_dithering_level(0.));

    let (palette, indices) = result.remapped(&mut image).unwrap();
    let last = palette.len() - 1;
    assert!(palette[last].a < 255);
    assert_eq!(indices[0] as usize, last);
}

#[test]
fn s4_noisy_image_meets_requested_quality_floor() {
    let mut attr = Attributes::new();
    ok(attr.set_speed(1));
    ok(attr.set_quality(0, 90));
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let px: Vec<RGBA8> = (0..64).map(|_| RGBA8::new(rng.gen(), rng.gen(), rng.gen(), 255)).collect();
    let mut image = Image::new(&attr, px, 8, 8, 0.).unwrap();
    let mut result = attr.quantize(&mut image).unwrap();
    ok(result.set_dithering_level(0.));

    let err = result.quantization_error().unwrap();
    assert!(err <= quality_to_scaled_mse(0.) + 1e-6);
}

#[test]
fn s5_tight_quality_floor_on_noisy_input_with_few_colors_fails() {
    let mut attr = Attributes::new();
    ok(attr.set_speed(1));
    ok(attr.set_max_colors(4));
    ok(attr.set_quality(95, 99));
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let px: Vec<RGBA8> = (0..64).map(|_| RGBA8::new(rng.gen(), rng.gen(), rng.gen(), 255)).collect();
    let mut image = Image::new(&attr, px, 8, 8, 0.).unwrap();

    let result = attr.quantize(&mut image);
    assert_eq!(result.err(), Some(LIQ_QUALITY_TOO_LOW));
}

#[test]
fn s6_dithered_remap_is_deterministic_across_runs() {
    let build = || {
        let mut attr = Attributes::new();
        ok(attr.set_speed(3));
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let px: Vec<RGBA8> = (0..256).map(|_| RGBA8::new(rng.gen(), rng.gen(), rng.gen(), 255)).collect();
        let mut image = Image::new(&attr, px, 16, 16, 0.).unwrap();
        let mut result = attr.quantize(&mut image).unwrap();
        ok(result.set_dithering_level(1.));
        result.remapped(&mut image).unwrap()
    };

    let (palette_a, indices_a) = build();
    let (palette_b, indices_b) = build();
    assert_eq!(palette_a, palette_b);
    assert_eq!(indices_a, indices_b);
}

#[test]
fn doubling_max_colors_never_increases_quantization_error() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(13);
    let px: Vec<RGBA8> = (0..64).map(|_| RGBA8::new(rng.gen(), rng.gen(), rng.gen(), 255)).collect();

    let mut attr_small = Attributes::new();
    ok(attr_small.set_max_colors(4));
    let mut image_small = Image::new(&attr_small, px.clone(), 8, 8, 0.).unwrap();
    let small_err = attr_small.quantize(&mut image_small).unwrap().quantization_error().unwrap();

    let mut attr_large = Attributes::new();
    ok(attr_large.set_max_colors(8));
    let mut image_large = Image::new(&attr_large, px, 8, 8, 0.).unwrap();
    let large_err = attr_large.quantize(&mut image_large).unwrap().quantization_error().unwrap();

    assert!(large_err <= small_err + 1e-9);
}
