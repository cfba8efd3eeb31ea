//! Small convolution and rank filters on profiles and images.

use common::Buffer2;

use super::statistics::{FWHM_TO_SIGMA, median_f32_mut};

/// Gaussian smoothing of a 1-D profile with edge clamping.
pub fn gaussian_smooth(profile: &[f64], fwhm: f64) -> Vec<f64> {
    let sigma = fwhm / FWHM_TO_SIGMA;
    if sigma <= 0.0 || profile.is_empty() {
        return profile.to_vec();
    }
    let half = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-half..=half)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    let last = profile.len() as isize - 1;

    (0..profile.len() as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * profile[(i + k as isize - half).clamp(0, last) as usize])
                .sum::<f64>()
                / norm
        })
        .collect()
}

/// Square median filter of side `2 * radius + 1`, clamped at the borders.
pub fn median_filter(image: &Buffer2<f32>, radius: usize) -> Buffer2<f32> {
    let (width, height) = image.shape();
    let mut window = Vec::with_capacity((2 * radius + 1).pow(2));
    Buffer2::from_fn(width, height, |x, y| {
        window.clear();
        for yy in y.saturating_sub(radius)..(y + radius + 1).min(height) {
            for xx in x.saturating_sub(radius)..(x + radius + 1).min(width) {
                window.push(image[(xx, yy)]);
            }
        }
        median_f32_mut(&mut window)
    })
}

/// Negated 4-neighbour Laplacian, `4 c - (l + r + u + d)`, with edge clamping.
///
/// Positive on isolated peaks.
pub fn laplacian(image: &Buffer2<f32>) -> Buffer2<f32> {
    let (width, height) = image.shape();
    Buffer2::from_fn(width, height, |x, y| {
        let c = image[(x, y)];
        let left = if x > 0 { image[(x - 1, y)] } else { c };
        let right = if x + 1 < width { image[(x + 1, y)] } else { c };
        let up = if y > 0 { image[(x, y - 1)] } else { c };
        let down = if y + 1 < height { image[(x, y + 1)] } else { c };
        4.0 * c - (left + right + up + down)
    })
}

/// Linear interpolation of `(xs, ys)` at `x`; `xs` must be increasing.
///
/// Returns `None` outside the sampled range.
pub fn interp_linear(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    if xs.is_empty() || x < xs[0] || x > xs[xs.len() - 1] || !x.is_finite() {
        return None;
    }
    let hi = xs.partition_point(|&v| v < x);
    if hi == 0 {
        return Some(ys[0]);
    }
    let lo = hi - 1;
    if hi >= xs.len() {
        return Some(ys[lo]);
    }
    let span = xs[hi] - xs[lo];
    if span <= 0.0 {
        return Some(ys[lo]);
    }
    let t = (x - xs[lo]) / span;
    Some(ys[lo] + t * (ys[hi] - ys[lo]))
}

/// Evaluate a uniformly sampled array at fractional index `pos`, clamped to
/// the ends.
pub fn sample_at(values: &[f64], pos: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let last = values.len() - 1;
    let pos = pos.clamp(0.0, last as f64);
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(last);
    let t = pos - lo as f64;
    values[lo] * (1.0 - t) + values[hi] * t
}

/// Factor by which [`gaussian_smooth`] scales white noise.
pub fn gaussian_noise_gain(fwhm: f64) -> f64 {
    let sigma = fwhm / FWHM_TO_SIGMA;
    if sigma <= 0.0 {
        return 1.0;
    }
    let half = (3.0 * sigma).ceil() as isize;
    let (sum, sum_sq) = (-half..=half)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .fold((0.0, 0.0), |(s, s2), w| (s + w, s2 + w * w));
    sum_sq.sqrt() / sum
}
