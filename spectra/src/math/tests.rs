use common::Buffer2;

use super::filter::{gaussian_smooth, interp_linear, laplacian, median_filter, sample_at};
use super::statistics::{
    clipped_stats, median_and_mad_mut, median_f32_mut, median_mut, sigma_clipped_median_sigma,
};
use super::*;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[test]
fn test_median_odd_and_even() {
    let mut odd = [3.0, 1.0, 2.0, 5.0, 4.0];
    assert_eq!(median_mut(&mut odd), 3.0);
    let mut even = [4.0, 1.0, 3.0, 2.0];
    assert_eq!(median_mut(&mut even), 2.5);
    let mut empty: [f64; 0] = [];
    assert_eq!(median_mut(&mut empty), 0.0);
}

#[test]
fn test_median_f32() {
    let mut values = [-5.0f32, -3.0, -1.0, 2.0, 4.0];
    assert_eq!(median_f32_mut(&mut values), -1.0);
}

#[test]
fn test_median_and_mad() {
    let mut values = [2.0, 4.0, 3.0];
    let (median, mad) = median_and_mad_mut(&mut values);
    assert!((median - 3.0).abs() < 1e-12);
    assert!((mad - 1.0).abs() < 1e-12);
}

#[test]
fn test_sigma_clip_rejects_outlier() {
    let mut values: Vec<f64> = (0..50).map(|i| 10.0 + (i % 5) as f64 * 0.1).collect();
    values.push(1000.0);
    let (median, sigma) = sigma_clipped_median_sigma(&mut values, 3.0, 5);
    assert!((median - 10.2).abs() < 1e-9);
    assert!(sigma < 0.5);
}

#[test]
fn test_clipped_stats_ignores_nan() {
    let values = [1.0f32, 1.0, 1.0, f32::NAN, 1.0];
    let (mean, median, std) = clipped_stats(&values, 3.0);
    assert_eq!(mean, 1.0);
    assert_eq!(median, 1.0);
    assert_eq!(std, 0.0);
}

// ---------------------------------------------------------------------------
// Polynomial
// ---------------------------------------------------------------------------

#[test]
fn test_polyfit_recovers_quadratic() {
    let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|&v| 1.0 - 0.5 * v + 0.25 * v * v).collect();
    let w = vec![1.0; x.len()];
    let poly = Polynomial::fit(&x, &y, &w, 2).unwrap();
    for &xi in &x {
        assert!((poly.eval(xi) - (1.0 - 0.5 * xi + 0.25 * xi * xi)).abs() < 1e-8);
    }
}

#[test]
fn test_polyfit_reduces_degree_for_few_points() {
    let poly = Polynomial::fit(&[1.0, 2.0], &[3.0, 5.0], &[1.0, 1.0], 5).unwrap();
    assert_eq!(poly.degree(), 1);
    assert!((poly.eval(3.0) - 7.0).abs() < 1e-9);
}

#[test]
fn test_robust_polyfit_rejects_outlier() {
    let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
    let mut y: Vec<f64> = x.iter().map(|&v| 2.0 * v + 1.0 + 0.01 * (v * 7.0).sin()).collect();
    y[12] += 50.0;
    let (poly, inlier) = Polynomial::robust_fit(&x, &y, None, 1, 3.0, 10).unwrap();
    assert!(!inlier[12]);
    assert!((poly.eval(12.0) - 25.0).abs() < 0.05);
}

#[test]
fn test_robust_polyfit_ignores_extended_trough() {
    // A broad dip over 6 of 40 bins pulls the first pass well below the
    // flat level; the scale must come from the residuals about the fit.
    let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
    let y: Vec<f64> = x
        .iter()
        .map(|&v| {
            let dip = if (17.0..23.0).contains(&v) { -250.0 } else { 0.0 };
            dip + 0.5 * (v * 1.7).sin()
        })
        .collect();
    let (poly, inlier) = Polynomial::robust_fit(&x, &y, None, 1, 3.0, 10).unwrap();

    assert!((17..23).all(|i| !inlier[i]));
    assert_eq!(inlier.iter().filter(|&&ok| ok).count(), 34);
    for &xi in &[0.0, 20.0, 39.0] {
        assert!(poly.eval(xi).abs() < 0.5, "{}", poly.eval(xi));
    }
}

#[test]
fn test_robust_polyfit_never_rejects_everything() {
    let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
    let y: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 6.0 } else { 4.0 }).collect();
    let (poly, inlier) = Polynomial::robust_fit(&x, &y, None, 0, 0.1, 10).unwrap();

    assert!(inlier.iter().all(|&ok| ok));
    assert!((poly.eval(3.0) - 5.0).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// B-spline
// ---------------------------------------------------------------------------

#[test]
fn test_bspline_reproduces_linear_data() {
    let x: Vec<f64> = (0..200).map(|i| i as f64 * 0.5).collect();
    let y: Vec<f64> = x.iter().map(|&v| 3.0 + 0.2 * v).collect();
    let w = vec![1.0; x.len()];
    let spline = BSpline::fit(&x, &y, &w, 0.6, (0.0, 99.5)).unwrap();
    for (&xi, &yi) in x.iter().zip(&y) {
        assert!((spline.eval(xi) - yi).abs() < 1e-6, "at {xi}");
    }
}

#[test]
fn test_bspline_dense_breakpoints_are_well_posed() {
    // One sample per integer abscissa, breakpoints every 0.3.
    let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|&v| 100.0 + 10.0 * (v / 8.0).sin()).collect();
    let w = vec![1.0; x.len()];
    let spline = BSpline::fit(&x, &y, &w, 0.3, (0.0, 49.0)).unwrap();
    assert!(spline.num_coeffs() > x.len());
    for (&xi, &yi) in x.iter().zip(&y) {
        assert!((spline.eval(xi) - yi).abs() < 0.05, "at {xi}");
    }
}

#[test]
fn test_bspline_no_weight_returns_none() {
    let x = [0.0, 1.0, 2.0];
    assert!(BSpline::fit(&x, &[1.0, 1.0, 1.0], &[0.0; 3], 1.0, (0.0, 2.0)).is_none());
}

#[test]
fn test_bspline_robust_rejects_spike() {
    let x: Vec<f64> = (0..100).map(|i| i as f64).collect();
    let mut y = vec![50.0; 100];
    y[40] = 500.0;
    let ivar = vec![1.0; 100];
    let mask = vec![true; 100];
    let (spline, inlier) =
        BSpline::robust_fit(&x, &y, &ivar, &mask, 2.0, (0.0, 99.0), 3.0, 10).unwrap();
    assert!(!inlier[40]);
    assert!((spline.eval(40.0) - 50.0).abs() < 0.5);
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[test]
fn test_gaussian_smooth_preserves_constant() {
    let profile = vec![4.0; 25];
    let smoothed = gaussian_smooth(&profile, 3.0);
    assert!(smoothed.iter().all(|v| (v - 4.0).abs() < 1e-12));
}

#[test]
fn test_gaussian_smooth_spreads_spike() {
    let mut profile = vec![0.0; 21];
    profile[10] = 1.0;
    let smoothed = gaussian_smooth(&profile, 3.0);
    assert!(smoothed[10] < 1.0);
    assert!(smoothed[9] > 0.0 && (smoothed[9] - smoothed[11]).abs() < 1e-12);
    assert!((smoothed.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[test]
fn test_median_filter_removes_single_pixel() {
    let mut image = Buffer2::new_filled(9, 9, 1.0f32);
    image[(4, 4)] = 100.0;
    let filtered = median_filter(&image, 1);
    assert_eq!(filtered[(4, 4)], 1.0);
}

#[test]
fn test_laplacian_flat_is_zero_and_peak_positive() {
    let mut image = Buffer2::new_filled(5, 5, 2.0f32);
    assert!(laplacian(&image).iter().all(|&v| v == 0.0));
    image[(2, 2)] = 10.0;
    let lap = laplacian(&image);
    assert_eq!(lap[(2, 2)], 32.0);
    assert_eq!(lap[(1, 2)], -8.0);
}

#[test]
fn test_interp_linear() {
    let xs = [0.0, 1.0, 3.0];
    let ys = [0.0, 10.0, 30.0];
    assert_eq!(interp_linear(&xs, &ys, 2.0), Some(20.0));
    assert_eq!(interp_linear(&xs, &ys, 0.0), Some(0.0));
    assert_eq!(interp_linear(&xs, &ys, 3.0), Some(30.0));
    assert_eq!(interp_linear(&xs, &ys, 3.5), None);
}

#[test]
fn test_sample_at_clamps() {
    let values = [1.0, 3.0, 5.0];
    assert_eq!(sample_at(&values, 0.5), 2.0);
    assert_eq!(sample_at(&values, -1.0), 1.0);
    assert_eq!(sample_at(&values, 7.0), 5.0);
}
