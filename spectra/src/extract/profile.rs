//! Spatial object profiles.

use crate::math::filter::interp_linear;
use crate::math::statistics::{FWHM_TO_SIGMA, median_mut};

/// Minimum samples in a bin of the empirical profile.
const MIN_BIN_SAMPLES: usize = 3;

/// Unnormalized spatial profile as a function of offset from the trace.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    Gaussian { sigma: f64 },
    /// Piecewise-linear profile through binned samples; zero beyond the
    /// outermost nodes.
    Empirical { offsets: Vec<f64>, values: Vec<f64> },
}

impl Profile {
    pub fn gaussian(fwhm: f64) -> Self {
        Self::Gaussian {
            sigma: (fwhm / FWHM_TO_SIGMA).max(0.1),
        }
    }

    /// Bin `(offset, value)` samples at `bin` pixels.
    ///
    /// Each node sits at the mean offset of its samples and holds their
    /// median, clamped at zero. Returns `None` when fewer than three bins
    /// are populated.
    pub fn empirical(samples: &[(f64, f64)], bin: f64) -> Option<Self> {
        let mut sorted: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .filter(|(dx, v)| dx.is_finite() && v.is_finite())
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut offsets = Vec::new();
        let mut values = Vec::new();
        let mut start = 0;
        while start < sorted.len() {
            let key = (sorted[start].0 / bin).floor();
            let mut end = start;
            while end < sorted.len() && (sorted[end].0 / bin).floor() == key {
                end += 1;
            }
            let members = &sorted[start..end];
            if members.len() >= MIN_BIN_SAMPLES {
                let mean = members.iter().map(|m| m.0).sum::<f64>() / members.len() as f64;
                let mut vals: Vec<f64> = members.iter().map(|m| m.1).collect();
                offsets.push(mean);
                values.push(median_mut(&mut vals).max(0.0));
            }
            start = end;
        }

        if offsets.len() < 3 || values.iter().all(|&v| v <= 0.0) {
            return None;
        }
        Some(Self::Empirical { offsets, values })
    }

    pub fn is_empirical(&self) -> bool {
        matches!(self, Self::Empirical { .. })
    }

    #[inline]
    pub fn eval(&self, dx: f64) -> f64 {
        match self {
            Self::Gaussian { sigma } => (-0.5 * (dx / sigma).powi(2)).exp(),
            Self::Empirical { offsets, values } => {
                interp_linear(offsets, values, dx).unwrap_or(0.0)
            }
        }
    }

    /// FWHM in pixels, from the half-maximum crossings of the empirical
    /// nodes or the Gaussian width.
    pub fn fwhm(&self) -> Option<f64> {
        match self {
            Self::Gaussian { sigma } => Some(sigma * FWHM_TO_SIGMA),
            Self::Empirical { offsets, values } => {
                let (peak, &max) = values
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))?;
                let half = 0.5 * max;
                let cross = |a: usize, b: usize| {
                    let t = (half - values[a]) / (values[b] - values[a]);
                    offsets[a] + t * (offsets[b] - offsets[a])
                };
                let left = (1..=peak)
                    .rev()
                    .find(|&i| values[i - 1] < half)
                    .map(|i| cross(i - 1, i))?;
                let right = (peak..values.len() - 1)
                    .find(|&i| values[i + 1] < half)
                    .map(|i| cross(i + 1, i))?;
                Some(right - left)
            }
        }
    }
}
