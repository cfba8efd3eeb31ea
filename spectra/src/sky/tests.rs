use common::{BitBuffer2, Buffer2};

use super::*;
use crate::config::CosmicRayConfig;
use crate::frame::{MaskFlag, ScienceFrame};
use crate::testing::{init_tracing, mean_over_columns};
use crate::testing::synthetic::{Scene, tilts, two_slit_scene};

fn fit(
    frame: &ScienceFrame,
    geometry: &mut RegionGeometry,
    sky_mask: &BitBuffer2,
    positive_only: bool,
) -> Buffer2<f32> {
    let (width, height) = frame.shape();
    let region_map = RegionMap::build(geometry, width, height);
    let tilts = tilts(width, height);
    let input = SkyInput {
        image: frame.image(),
        ivar: frame.ivar(),
        mask: frame.mask(),
        tilts: &tilts,
        region_map: &region_map,
        sky_mask,
    };
    global_sky(
        &input,
        geometry,
        &SkySubConfig::default(),
        SCI_SIGMA_REJECT,
        positive_only,
    )
}

#[test]
fn test_flat_sky_recovered_inside_regions() {
    init_tracing();
    let scene = Scene::new(110, 200)
        .with_region(10.0, 50.0)
        .with_region(60.0, 100.0)
        .with_sky(100.0)
        .with_noise(5.0, 11);
    let frame = scene.frame();
    let mut geometry = scene.geometry();
    let all = BitBuffer2::new_filled(110, 200, true);
    let sky = fit(&frame, &mut geometry, &all, true);

    let left = mean_over_columns(&sky, 12..48);
    let right = mean_over_columns(&sky, 62..98);
    assert!((left - 100.0).abs() < 0.5, "{left}");
    assert!((right - 100.0).abs() < 0.5, "{right}");
    for y in [5, 100, 190] {
        assert!((sky[(30, y)] - 100.0).abs() < 6.0, "{}", sky[(30, y)]);
        assert_eq!(sky[(5, y)], 0.0);
        assert_eq!(sky[(55, y)], 0.0);
    }
    assert!(geometry.masked_regions().is_empty());
}

#[test]
fn test_sky_follows_spectral_gradient() {
    let scene = Scene::new(40, 120).with_region(5.0, 35.0);
    let model = Buffer2::from_fn(40, 120, |_, y| 50.0 + 0.5 * y as f32);
    let frame = ScienceFrame::new(
        model,
        scene.ivar(),
        Buffer2::new_filled(40, 120, 0.0),
        None,
    )
    .unwrap();
    let mut geometry = scene.geometry();
    let all = BitBuffer2::new_filled(40, 120, true);
    let sky = fit(&frame, &mut geometry, &all, false);

    for y in [10, 60, 110] {
        let expected = 50.0 + 0.5 * y as f32;
        assert!((sky[(20, y)] - expected).abs() < 0.05, "{} vs {expected}", sky[(20, y)]);
    }
}

#[test]
fn test_exclusion_mask_keeps_source_out_of_sky() {
    let scene = two_slit_scene();
    let frame = scene.frame();
    let mut geometry = scene.geometry();
    let sky_mask = BitBuffer2::from_fn(110, 200, |x, _| !(20..=40).contains(&x));
    let sky = fit(&frame, &mut geometry, &sky_mask, true);

    let under_source = mean_over_columns(&sky, 25..36);
    assert!((under_source - 100.0).abs() < 0.5, "{under_source}");
}

#[test]
fn test_all_bad_region_is_masked_with_zero_sky() {
    init_tracing();
    let scene = two_slit_scene();
    let mut mask = Buffer2::new_default(110, 200);
    for y in 0..200 {
        for x in 60..100 {
            mask[(x, y)] = PixelMask::from_flags(&[MaskFlag::BadPixel]);
        }
    }
    let frame = scene.frame_with_mask(Some(mask));
    let mut geometry = scene.geometry();
    let sky_mask = BitBuffer2::from_fn(110, 200, |x, _| !(20..=40).contains(&x));
    let sky = fit(&frame, &mut geometry, &sky_mask, true);

    assert_eq!(geometry.masked_regions(), vec![1]);
    for y in 0..200 {
        for x in 60..100 {
            assert_eq!(sky[(x, y)], 0.0);
        }
    }
    let good = mean_over_columns(&sky, 12..48);
    assert!((good - 100.0).abs() < 0.5, "{good}");
}

#[test]
fn test_masked_region_is_not_refit() {
    let scene = two_slit_scene();
    let frame = scene.frame();
    let mut geometry = scene.geometry();
    geometry.mask_region(0);
    let all = BitBuffer2::new_filled(110, 200, true);
    let sky = fit(&frame, &mut geometry, &all, true);

    assert!((0..200).all(|y| (10..50).all(|x| sky[(x, y)] == 0.0)));
    assert!(sky[(80, 100)] > 90.0);
}

#[test]
fn test_refit_is_bit_identical() {
    let scene = two_slit_scene();
    let frame = scene.frame();
    let sky_mask = BitBuffer2::from_fn(110, 200, |x, _| !(20..=40).contains(&x));
    let mut geometry = scene.geometry();
    let first = fit(&frame, &mut geometry, &sky_mask, true);
    let second = fit(&frame, &mut geometry, &sky_mask, true);
    assert_eq!(first, second);
}

#[test]
fn test_cosmic_ray_flagged_but_source_kept() {
    let scene = two_slit_scene();
    let mut image = scene.image();
    image[(80, 120)] += 800.0;
    let mut frame = ScienceFrame::new(
        image,
        scene.ivar(),
        Buffer2::new_filled(110, 200, 0.0),
        None,
    )
    .unwrap();
    let geometry = scene.geometry();
    let region_map = RegionMap::build(&geometry, 110, 200);
    let sky = Buffer2::new_filled(110, 200, 100.0f32);

    let count = flag_cosmic_rays(&mut frame, &sky, &region_map, &CosmicRayConfig::default());

    assert!(count >= 1);
    assert!(frame.mask()[(80, 120)].contains(MaskFlag::CosmicRay));
    assert!((0..200).all(|y| !frame.mask()[(30, y)].contains(MaskFlag::CosmicRay)));
}

#[test]
fn test_cosmic_ray_outside_regions_ignored() {
    let scene = two_slit_scene();
    let mut image = scene.image();
    image[(55, 50)] += 800.0;
    let mut frame = ScienceFrame::new(
        image,
        scene.ivar(),
        Buffer2::new_filled(110, 200, 0.0),
        None,
    )
    .unwrap();
    let region_map = RegionMap::build(&scene.geometry(), 110, 200);
    let sky = Buffer2::new_filled(110, 200, 100.0f32);
    flag_cosmic_rays(&mut frame, &sky, &region_map, &CosmicRayConfig::default());

    assert!(!frame.mask()[(55, 50)].contains(MaskFlag::CosmicRay));
}
