//! Penalized cubic B-spline on uniform breakpoints.
//!
//! The normal equations are banded (half-bandwidth 3) and solved with a
//! banded Cholesky factorization, so the cost is linear in the number of
//! breakpoints. A small second-difference penalty keeps the system
//! well-posed when breakpoints are denser than the data.

/// Penalty weight relative to the mean data weight on the diagonal.
const SMOOTHING: f64 = 1e-4;

/// Ridge added to the diagonal, relative to the mean data weight.
const RIDGE: f64 = 1e-10;

const HALF_BAND: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct BSpline {
    origin: f64,
    spacing: f64,
    nseg: usize,
    coeffs: Vec<f64>,
}

impl BSpline {
    /// Index of the first non-zero basis function and the four weights at `x`.
    #[inline]
    fn basis(&self, x: f64) -> (usize, [f64; 4]) {
        let t = ((x - self.origin) / self.spacing).clamp(0.0, self.nseg as f64);
        let seg = (t.floor() as usize).min(self.nseg - 1);
        let u = t - seg as f64;
        let u2 = u * u;
        let u3 = u2 * u;
        let v = 1.0 - u;
        (
            seg,
            [
                v * v * v / 6.0,
                (3.0 * u3 - 6.0 * u2 + 4.0) / 6.0,
                (-3.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0,
                u3 / 6.0,
            ],
        )
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        let (j, b) = self.basis(x);
        b[0] * self.coeffs[j]
            + b[1] * self.coeffs[j + 1]
            + b[2] * self.coeffs[j + 2]
            + b[3] * self.coeffs[j + 3]
    }

    pub fn num_coeffs(&self) -> usize {
        self.coeffs.len()
    }

    /// Weighted fit over breakpoints spanning `range` every `spacing`.
    pub fn fit(x: &[f64], y: &[f64], w: &[f64], spacing: f64, range: (f64, f64)) -> Option<Self> {
        assert!(spacing > 0.0, "spacing must be positive");
        debug_assert_eq!(x.len(), y.len());
        debug_assert_eq!(x.len(), w.len());

        let (lo, hi) = range;
        let nseg = (((hi - lo) / spacing).ceil() as usize).max(1);
        let mut spline = Self {
            origin: lo,
            spacing,
            nseg,
            coeffs: vec![0.0; nseg + 3],
        };
        let n = spline.coeffs.len();

        let mut band = vec![[0.0f64; HALF_BAND + 1]; n];
        let mut rhs = vec![0.0f64; n];
        let mut any = false;
        for i in 0..x.len() {
            if w[i] <= 0.0 {
                continue;
            }
            any = true;
            let (j, b) = spline.basis(x[i]);
            for a in 0..4 {
                rhs[j + a] += w[i] * b[a] * y[i];
                for c in a..4 {
                    band[j + a][c - a] += w[i] * b[a] * b[c];
                }
            }
        }
        if !any {
            return None;
        }

        let mean_diag = band.iter().map(|row| row[0]).sum::<f64>() / n as f64;
        let lambda = SMOOTHING * mean_diag;
        const D2: [f64; 3] = [1.0, -2.0, 1.0];
        for r in 0..n.saturating_sub(2) {
            for a in 0..3 {
                for c in a..3 {
                    band[r + a][c - a] += lambda * D2[a] * D2[c];
                }
            }
        }
        for row in band.iter_mut() {
            row[0] += RIDGE * mean_diag;
        }

        spline.coeffs = solve_banded(&band, &rhs)?;
        Some(spline)
    }

    /// Iterative fit rejecting points with `|y - f| * sqrt(ivar) > sigma_reject`.
    ///
    /// `mask` selects the candidate points; rejected points may re-enter on
    /// later iterations. Returns the fit and the final inlier mask.
    #[allow(clippy::too_many_arguments)]
    pub fn robust_fit(
        x: &[f64],
        y: &[f64],
        ivar: &[f64],
        mask: &[bool],
        spacing: f64,
        range: (f64, f64),
        sigma_reject: f64,
        max_iter: usize,
    ) -> Option<(Self, Vec<bool>)> {
        let mut inlier = mask.to_vec();
        let mut spline = None;
        let mut weights = vec![0.0; x.len()];

        for _ in 0..max_iter.max(1) {
            for i in 0..x.len() {
                weights[i] = if inlier[i] { ivar[i] } else { 0.0 };
            }
            let Some(fit) = Self::fit(x, y, &weights, spacing, range) else {
                break;
            };

            let mut changed = false;
            for i in 0..x.len() {
                if !mask[i] || ivar[i] <= 0.0 {
                    continue;
                }
                let chi = (y[i] - fit.eval(x[i])) * ivar[i].sqrt();
                let keep = chi.abs() <= sigma_reject;
                if keep != inlier[i] {
                    inlier[i] = keep;
                    changed = true;
                }
            }
            spline = Some(fit);
            if !changed {
                break;
            }
        }

        spline.map(|s| (s, inlier))
    }
}

/// Solve a symmetric positive-definite banded system.
///
/// `band[i][d]` holds `A[i][i + d]`.
fn solve_banded(band: &[[f64; HALF_BAND + 1]], rhs: &[f64]) -> Option<Vec<f64>> {
    let n = band.len();
    // lower[i][d] = L[i][i - d]
    let mut lower = vec![[0.0f64; HALF_BAND + 1]; n];

    for j in 0..n {
        let mut s = band[j][0];
        for d in 1..=HALF_BAND.min(j) {
            s -= lower[j][d] * lower[j][d];
        }
        if s <= 0.0 || !s.is_finite() {
            return None;
        }
        let ljj = s.sqrt();
        lower[j][0] = ljj;

        for i in (j + 1)..n.min(j + HALF_BAND + 1) {
            let mut t = band[j][i - j];
            // k runs over columns shared by rows i and j below the diagonal.
            let k_start = i.saturating_sub(HALF_BAND);
            for k in k_start..j {
                t -= lower[i][i - k] * lower[j][j - k];
            }
            lower[i][i - j] = t / ljj;
        }
    }

    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut s = rhs[i];
        for k in i.saturating_sub(HALF_BAND)..i {
            s -= lower[i][i - k] * z[k];
        }
        z[i] = s / lower[i][0];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut s = z[i];
        for k in (i + 1)..n.min(i + HALF_BAND + 1) {
            s -= lower[k][k - i] * x[k];
        }
        x[i] = s / lower[i][0];
    }
    Some(x)
}
