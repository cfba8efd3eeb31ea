//! Robust statistics: median, MAD, sigma-clipped estimates.

/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f64 = 1.482_602_2;

/// Gaussian FWHM / σ.
pub const FWHM_TO_SIGMA: f64 = 2.354_82;

#[inline]
pub fn mad_to_sigma(mad: f64) -> f64 {
    mad * MAD_TO_SIGMA
}

/// Median of `data`, reordering it in place.
///
/// Returns 0 for an empty slice.
pub fn median_mut(data: &mut [f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mid = data.len() / 2;
    let odd = data.len() % 2 == 1;
    let (left, upper, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if odd {
        upper
    } else {
        let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        0.5 * (lower + upper)
    }
}

/// f32 variant used on pixel data.
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let mid = data.len() / 2;
    let odd = data.len() % 2 == 1;
    let (left, upper, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper;
    if odd {
        upper
    } else {
        let lower = left.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        0.5 * (lower + upper)
    }
}

/// Median and MAD together. Reorders and overwrites `data`.
pub fn median_and_mad_mut(data: &mut [f64]) -> (f64, f64) {
    let median = median_mut(data);
    for v in data.iter_mut() {
        *v = (*v - median).abs();
    }
    (median, median_mut(data))
}

/// Sigma-clipped median and MAD-based sigma.
///
/// Iteratively rejects values further than `kappa × sigma` from the median.
/// `values` is reordered. Returns `(0, 0)` for empty input.
pub fn sigma_clipped_median_sigma(values: &mut [f64], kappa: f64, iterations: usize) -> (f64, f64) {
    let mut len = values.len();
    let mut scratch = Vec::with_capacity(len);
    let mut result = (0.0, 0.0);
    for _ in 0..iterations.max(1) {
        if len == 0 {
            break;
        }
        scratch.clear();
        scratch.extend_from_slice(&values[..len]);
        let (median, mad) = median_and_mad_mut(&mut scratch);
        let sigma = mad_to_sigma(mad);
        result = (median, sigma);
        if sigma <= f64::EPSILON || len < 3 {
            break;
        }

        let threshold = kappa * sigma;
        let mut write = 0;
        for i in 0..len {
            if (values[i] - median).abs() <= threshold {
                values[write] = values[i];
                write += 1;
            }
        }
        if write == len {
            break;
        }
        len = write;
    }
    result
}

/// Sigma-clipped mean, median and standard deviation of an f32 image slice,
/// ignoring non-finite values.
pub fn clipped_stats(values: &[f32], kappa: f64) -> (f64, f64, f64) {
    let mut data: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .collect();
    if data.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let (median, sigma) = sigma_clipped_median_sigma(&mut data, kappa, 5);
    let kept: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .filter(|v| sigma <= 0.0 || (v - median).abs() <= kappa * sigma)
        .collect();
    let n = kept.len().max(1) as f64;
    let mean = kept.iter().sum::<f64>() / n;
    let var = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, median, var.sqrt())
}
