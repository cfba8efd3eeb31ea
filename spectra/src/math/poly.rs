//! Weighted polynomial least squares with iterative outlier rejection.

use nalgebra::{DMatrix, DVector, SVD};

/// Polynomial in a normalized abscissa `t = (x - center) / scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coeffs: Vec<f64>,
    center: f64,
    scale: f64,
}

impl Polynomial {
    pub fn constant(value: f64) -> Self {
        Self {
            coeffs: vec![value],
            center: 0.0,
            scale: 1.0,
        }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        let t = (x - self.center) / self.scale;
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
    }

    /// Weighted least-squares fit. Points with zero weight are ignored.
    ///
    /// The degree is reduced when there are too few weighted points.
    /// Returns `None` when nothing usable remains.
    pub fn fit(x: &[f64], y: &[f64], w: &[f64], degree: usize) -> Option<Self> {
        debug_assert_eq!(x.len(), y.len());
        debug_assert_eq!(x.len(), w.len());

        let used: Vec<usize> = (0..x.len()).filter(|&i| w[i] > 0.0).collect();
        if used.is_empty() {
            return None;
        }
        let degree = degree.min(used.len() - 1);
        let ncoef = degree + 1;

        let (lo, hi) = used.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(x[i]), hi.max(x[i]))
        });
        let center = 0.5 * (lo + hi);
        let scale = if hi > lo { 0.5 * (hi - lo) } else { 1.0 };

        let mut a = DMatrix::<f64>::zeros(used.len(), ncoef);
        let mut b = DVector::<f64>::zeros(used.len());
        for (row, &i) in used.iter().enumerate() {
            let sw = w[i].sqrt();
            let t = (x[i] - center) / scale;
            let mut p = 1.0;
            for col in 0..ncoef {
                a[(row, col)] = sw * p;
                p *= t;
            }
            b[row] = sw * y[i];
        }

        let coeffs = SVD::new(a, true, true).solve(&b, 1e-12).ok()?;
        let coeffs: Vec<f64> = coeffs.iter().copied().collect();
        if coeffs.iter().any(|c| !c.is_finite()) {
            return None;
        }
        Some(Self {
            coeffs,
            center,
            scale,
        })
    }

    /// Fit with symmetric sigma rejection on the weighted residuals.
    ///
    /// When `w` is `None` the scatter of the residuals about the fit (MAD
    /// about zero) sets the rejection scale; otherwise residuals are
    /// measured in units of `1/sqrt(w)`. A pass that would leave fewer
    /// points than coefficients is discarded and the previous inlier set
    /// stands. Returns the polynomial and the final inlier mask.
    pub fn robust_fit(
        x: &[f64],
        y: &[f64],
        w: Option<&[f64]>,
        degree: usize,
        sigma_reject: f64,
        max_iter: usize,
    ) -> Option<(Self, Vec<bool>)> {
        let base: Vec<f64> = match w {
            Some(w) => w.to_vec(),
            None => vec![1.0; x.len()],
        };
        let mut inlier: Vec<bool> = base.iter().map(|&wi| wi > 0.0).collect();
        let mut poly = None;

        for _ in 0..max_iter.max(1) {
            let weights: Vec<f64> = base
                .iter()
                .zip(&inlier)
                .map(|(&wi, &ok)| if ok { wi } else { 0.0 })
                .collect();
            let Some(fit) = Self::fit(x, y, &weights, degree) else {
                break;
            };

            let scale = match w {
                Some(_) => 1.0,
                None => {
                    let mut abs_res: Vec<f64> = (0..x.len())
                        .filter(|&i| inlier[i])
                        .map(|i| (y[i] - fit.eval(x[i])).abs())
                        .collect();
                    super::statistics::mad_to_sigma(super::statistics::median_mut(&mut abs_res))
                }
            };

            let next: Vec<bool> = (0..x.len())
                .map(|i| {
                    if base[i] <= 0.0 {
                        return false;
                    }
                    let chi = (y[i] - fit.eval(x[i])) * base[i].sqrt();
                    scale <= f64::EPSILON || chi.abs() <= sigma_reject * scale
                })
                .collect();
            poly = Some(fit);

            if next.iter().filter(|&&ok| ok).count() <= degree {
                break;
            }
            if next == inlier {
                break;
            }
            inlier = next;
        }

        poly.map(|p| (p, inlier))
    }
}
