use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::{Candidates, Spectrum};
use crate::geometry::RegionGeometry;
use crate::math::filter::{interp_linear, sample_at};
use crate::math::statistics::median_mut;

/// Fewer overlapping rows than this leaves a spectrum uncorrected.
const MIN_OVERLAP: usize = 10;

/// Sky spectrum with a trusted wavelength solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSpectrum {
    /// Increasing wavelengths.
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
}

impl ReferenceSpectrum {
    pub fn new(wave: Vec<f64>, flux: Vec<f64>) -> Self {
        assert_eq!(wave.len(), flux.len(), "wave and flux differ in length");
        assert!(
            wave.windows(2).all(|w| w[0] < w[1]),
            "reference wavelengths must be increasing"
        );
        Self { wave, flux }
    }

    /// Reference flux at `wave`, `None` outside the covered range.
    pub fn flux_at(&self, wave: f64) -> Option<f64> {
        interp_linear(&self.wave, &self.flux, wave)
    }
}

/// Shift in spectral pixels that best aligns `sky` with the reference.
///
/// The returned shift `s` is such that the corrected wavelength of row `p` is
/// the current wavelength at fractional row `p + s`. `None` when fewer than
/// a handful of rows overlap the reference, when either spectrum is flat, or
/// when the correlation peaks at the edge of the search window.
pub fn measure_shift(
    sky: &[f32],
    wave: &[f64],
    valid: &[bool],
    reference: &ReferenceSpectrum,
    max_shift: f64,
) -> Option<f64> {
    let n = sky.len();
    let mut obs = vec![0.0f64; n];
    let mut refr = vec![0.0f64; n];
    let mut used = vec![false; n];
    for i in 0..n {
        if !valid[i] || !sky[i].is_finite() {
            continue;
        }
        if let Some(f) = reference.flux_at(wave[i]) {
            obs[i] = sky[i] as f64;
            refr[i] = f;
            used[i] = true;
        }
    }
    if used.iter().filter(|&&u| u).count() < MIN_OVERLAP {
        return None;
    }
    normalize(&mut obs, &used)?;
    normalize(&mut refr, &used)?;

    let max_lag = (max_shift.ceil() as isize).min(n as isize - 1).max(1);
    let correlation = |lag: isize| -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..n as isize {
            let j = i + lag;
            if j < 0 || j >= n as isize {
                continue;
            }
            let (i, j) = (i as usize, j as usize);
            if used[i] && used[j] {
                sum += refr[i] * obs[j];
                count += 1;
            }
        }
        if count > 0 { sum / count as f64 } else { 0.0 }
    };
    let cc: Vec<f64> = (-max_lag..=max_lag).map(correlation).collect();
    let (best, _) = cc
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if best == 0 || best + 1 == cc.len() {
        return None;
    }

    let (c0, c1, c2) = (cc[best - 1], cc[best], cc[best + 1]);
    let denom = c0 - 2.0 * c1 + c2;
    let frac = if denom < 0.0 { 0.5 * (c0 - c2) / denom } else { 0.0 };
    let lag = best as f64 - max_lag as f64 + frac;
    (lag.abs() <= max_shift).then_some(-lag)
}

/// Subtract the median and scale to unit RMS over `used` rows.
fn normalize(values: &mut [f64], used: &[bool]) -> Option<()> {
    let mut sample: Vec<f64> = values
        .iter()
        .zip(used)
        .filter(|&(_, &u)| u)
        .map(|(&v, _)| v)
        .collect();
    let median = median_mut(&mut sample);
    let rms = (sample.iter().map(|v| (v - median).powi(2)).sum::<f64>() / sample.len() as f64)
        .sqrt();
    if !(rms > 0.0) {
        return None;
    }
    for (v, &u) in values.iter_mut().zip(used) {
        *v = if u { (*v - median) / rms } else { 0.0 };
    }
    Some(())
}

fn shift_wavelengths(spectrum: &mut Spectrum, shift: f64) {
    let original = spectrum.wave.clone();
    for (p, w) in spectrum.wave.iter_mut().enumerate() {
        *w = sample_at(&original, p as f64 + shift);
    }
}

/// Measure and apply a flexure shift to every candidate of an unmasked
/// region that has a boxcar sky spectrum. Returns the number corrected.
pub fn apply_flexure(
    candidates: &mut Candidates,
    geometry: &RegionGeometry,
    reference: &ReferenceSpectrum,
    max_shift: f64,
) -> usize {
    let mut corrected = 0;
    for c in candidates.iter_mut() {
        if geometry.is_masked(c.region) {
            continue;
        }
        let Some(boxcar) = c.boxcar.as_ref() else {
            continue;
        };
        let Some(shift) =
            measure_shift(&boxcar.sky, &boxcar.wave, &boxcar.mask, reference, max_shift)
        else {
            debug!(region = c.region, obj_id = c.obj_id, "No flexure solution");
            continue;
        };
        debug!(region = c.region, obj_id = c.obj_id, shift, "Flexure shift");
        if let Some(boxcar) = c.boxcar.as_mut() {
            shift_wavelengths(boxcar, shift);
        }
        if let Some(optimal) = c.optimal.as_mut() {
            shift_wavelengths(optimal, shift);
        }
        c.flexure_shift = Some(shift);
        corrected += 1;
    }
    corrected
}
