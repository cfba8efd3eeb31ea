//! Joint spatial-profile and local-sky fitting.
//!
//! Every spectral row of a region is modelled as a constant sky offset on
//! top of the global sky plus one scaled profile per object. Profiles,
//! amplitudes, the noise model and the outlier mask are refined together
//! over a fixed number of passes.

use std::ops::Range;

use common::{BitBuffer2, Buffer2};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::ExtractInput;
use super::boxcar::boxcar_spectrum;
use super::profile::Profile;
use crate::candidate::{ObjectCandidate, Spectrum};
use crate::config::ExtractionConfig;
use crate::math::Polynomial;

/// Profile half-width in units of the object FWHM.
const WINDOW_NFWHM: f64 = 3.0;

/// Most pixels rejected per row in one pass, worst first.
const MAX_REJECT_PER_ROW: usize = 3;

const TRACE_SIGMA_REJECT: f64 = 3.0;
const TRACE_MAX_ITER: usize = 10;

/// Per-region settings of one extraction.
#[derive(Debug, Clone, Copy)]
pub struct LocalParams<'a> {
    pub config: &'a ExtractionConfig,
    /// Boxcar radius in pixels.
    pub box_radius: f64,
    pub sigma_reject: f64,
    /// Recompute the variance from the fitted sky and object.
    pub model_noise: bool,
    pub is_standard: bool,
    /// Polynomial order of refined traces.
    pub trace_npoly: usize,
}

/// Full-frame outputs of local sky subtraction and extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalModels {
    pub sky: Buffer2<f32>,
    pub object: Buffer2<f32>,
    pub ivar: Buffer2<f32>,
    /// False where extraction was attempted and the pixel was rejected or
    /// its row could not be solved.
    pub extract_ok: BitBuffer2,
}

impl LocalModels {
    /// Neutral models: global sky, zero object, input ivar, nothing failed.
    pub fn new(global_sky: &Buffer2<f32>, ivar: &Buffer2<f32>) -> Self {
        let (width, height) = global_sky.shape();
        Self {
            sky: global_sky.clone(),
            object: Buffer2::new_filled(width, height, 0.0),
            ivar: ivar.clone(),
            extract_ok: BitBuffer2::new_filled(width, height, true),
        }
    }
}

/// Region pixels grouped by spectral row.
struct RegionPixels {
    rows: Vec<(usize, Range<usize>)>,
    pixels: Vec<usize>,
}

impl RegionPixels {
    fn collect(input: &ExtractInput<'_>, r: usize) -> Self {
        let height = input.image.height();
        let mut rows = Vec::new();
        let mut pixels = Vec::new();
        for y in input.geometry.region(r).spec_range() {
            if y >= height {
                break;
            }
            let start = pixels.len();
            pixels.extend(input.region_map.row_pixels(r, y));
            rows.push((y, start..pixels.len()));
        }
        Self { rows, pixels }
    }
}

/// Solution of one spectral row.
struct RowFit {
    sky_offset: f64,
    amplitudes: Vec<Option<(f64, f64)>>,
}

/// Extract every candidate of region `r`, writing the region's pixels of
/// `models` and each candidate's `optimal` and `boxcar` spectra.
pub fn extract_region(
    input: &ExtractInput<'_>,
    r: usize,
    candidates: &mut [&mut ObjectCandidate],
    global_sky: &Buffer2<f32>,
    models: &mut LocalModels,
    params: &LocalParams<'_>,
) {
    if candidates.is_empty() {
        return;
    }
    let config = params.config;
    let (width, height) = input.image.shape();
    let nobj = candidates.len();
    let region = RegionPixels::collect(input, r);
    let good = |idx: usize| input.mask[idx].is_good() && input.ivar[idx] > 0.0;

    let mut inlier = BitBuffer2::new_default(width, height);
    for &idx in &region.pixels {
        inlier.set(idx, good(idx));
    }
    let half_windows: Vec<f64> = candidates
        .iter()
        .map(|c| half_window(c, params))
        .collect();

    if config.refine_trace {
        for c in candidates.iter_mut() {
            if !c.hand_extract && c.snr >= config.sn_gauss {
                refine_trace(input, &region, &models.sky, &inlier, c, params.trace_npoly);
            }
        }
    }

    let mut snr: Vec<f64> = candidates
        .iter()
        .map(|c| {
            boxcar_spectrum(
                input,
                &models.sky,
                |idx| inlier.get(idx),
                r,
                &c.trace,
                params.box_radius,
            )
            .median_snr()
        })
        .collect();

    let mut own_model = vec![vec![0.0f64; region.pixels.len()]; nobj];
    let mut spectra: Vec<Spectrum> = vec![Spectrum::zeros(height); nobj];
    let mut profiles: Vec<Profile> = candidates
        .iter()
        .map(|c| Profile::gaussian(c.fwhm))
        .collect();
    let mut solved = vec![false; region.rows.len()];

    for iter in 0..config.niter {
        for k in 0..nobj {
            profiles[k] = if snr[k] >= config.sn_gauss {
                let samples = profile_samples(
                    input,
                    &region,
                    models,
                    &inlier,
                    &own_model[k],
                    &*candidates[k],
                    half_windows[k],
                    &spectra[k],
                );
                Profile::empirical(&samples, config.profile_bin)
                    .unwrap_or_else(|| Profile::gaussian(candidates[k].fwhm))
            } else {
                Profile::gaussian(candidates[k].fwhm)
            };
        }

        for (row, (y, range)) in region.rows.iter().enumerate() {
            let pixels = &region.pixels[range.clone()];
            let weights: Vec<Vec<f64>> = (0..nobj)
                .map(|k| {
                    profile_weights(
                        pixels,
                        width,
                        &profiles[k],
                        candidates[k].trace[*y],
                        half_windows[k],
                    )
                })
                .collect();

            let fit = solve_row(input, pixels, &weights, global_sky, models, &inlier);
            solved[row] = fit.is_some();
            let Some(fit) = fit else {
                for spec in spectra.iter_mut() {
                    spec.mask[*y] = false;
                    spec.counts[*y] = 0.0;
                    spec.ivar[*y] = 0.0;
                }
                continue;
            };

            for (j, &idx) in pixels.iter().enumerate() {
                models.sky[idx] = (global_sky[idx] as f64 + fit.sky_offset) as f32;
                let mut total = 0.0;
                for k in 0..nobj {
                    let amp = fit.amplitudes[k].map_or(0.0, |(a, _)| a);
                    own_model[k][range.start + j] = amp * weights[k][j];
                    total += amp * weights[k][j];
                }
                models.object[idx] = total as f32;
            }
            for k in 0..nobj {
                fill_row(
                    &mut spectra[k],
                    *y,
                    fit.amplitudes[k],
                    &weights[k],
                    pixels,
                    input,
                    models,
                    &inlier,
                );
            }
        }

        if params.model_noise {
            for &idx in &region.pixels {
                if !good(idx) {
                    continue;
                }
                let var = (models.sky[idx] + models.object[idx]).max(0.0) + input.rn2[idx];
                models.ivar[idx] = if var > 0.0 && var.is_finite() {
                    1.0 / var
                } else {
                    input.ivar[idx]
                };
            }
        }

        let mut nrej = 0;
        let mut outliers: Vec<(f32, usize)> = Vec::new();
        for (row, (_, range)) in region.rows.iter().enumerate() {
            outliers.clear();
            for &idx in &region.pixels[range.clone()] {
                let ok = good(idx);
                inlier.set(idx, ok);
                if !ok || !solved[row] {
                    continue;
                }
                let chi = ((input.image[idx] - models.sky[idx] - models.object[idx])
                    * models.ivar[idx].sqrt())
                .abs();
                if (chi as f64) > params.sigma_reject {
                    outliers.push((chi, idx));
                }
            }
            outliers.sort_by(|a, b| b.0.total_cmp(&a.0));
            for &(_, idx) in outliers.iter().take(MAX_REJECT_PER_ROW) {
                inlier.set(idx, false);
                nrej += 1;
            }
        }

        for k in 0..nobj {
            snr[k] = spectra[k].median_snr();
        }
        debug!(region = r, iter, rejected = nrej, "Local sky and extraction pass");
    }

    for (row, (_, range)) in region.rows.iter().enumerate() {
        for &idx in &region.pixels[range.clone()] {
            models.extract_ok.set(idx, solved[row] && inlier.get(idx));
        }
    }

    let region_width = input.geometry.region(r).median_width();
    for (k, c) in candidates.iter_mut().enumerate() {
        if profiles[k].is_empirical() {
            if let Some(fwhm) = profiles[k]
                .fwhm()
                .filter(|f| *f >= 1.0 && *f <= 0.5 * region_width)
            {
                c.fwhm = fwhm;
            }
        }
        c.boxcar = Some(boxcar_spectrum(
            input,
            &models.sky,
            |idx| inlier.get(idx),
            r,
            &c.trace,
            params.box_radius,
        ));
        c.optimal = Some(std::mem::take(&mut spectra[k]));
    }
}

fn half_window(candidate: &ObjectCandidate, params: &LocalParams<'_>) -> f64 {
    if params.config.model_full_region {
        return f64::INFINITY;
    }
    let half = params.box_radius.max(WINDOW_NFWHM * candidate.fwhm);
    if params.is_standard { 2.0 * half } else { half }
}

/// Normalized profile values over one row's pixels, zero outside the window.
fn profile_weights(
    pixels: &[usize],
    width: usize,
    profile: &Profile,
    centre: f64,
    half_window: f64,
) -> Vec<f64> {
    let mut weights: Vec<f64> = pixels
        .iter()
        .map(|&idx| {
            let dx = (idx % width) as f64 - centre;
            if dx.abs() <= half_window {
                profile.eval(dx).max(0.0)
            } else {
                0.0
            }
        })
        .collect();
    let norm: f64 = weights.iter().sum();
    if norm > 0.0 {
        weights.iter_mut().for_each(|w| *w /= norm);
    }
    weights
}

/// Weighted least squares for one row: a sky offset plus one amplitude per
/// object. Falls back to amplitudes alone when the joint system is
/// singular. Objects with no usable pixel get no amplitude.
fn solve_row(
    input: &ExtractInput<'_>,
    pixels: &[usize],
    weights: &[Vec<f64>],
    global_sky: &Buffer2<f32>,
    models: &LocalModels,
    inlier: &BitBuffer2,
) -> Option<RowFit> {
    let usable: Vec<usize> = (0..pixels.len())
        .filter(|&j| inlier.get(pixels[j]))
        .collect();
    if usable.is_empty() {
        return None;
    }
    let active: Vec<usize> = (0..weights.len())
        .filter(|&k| usable.iter().any(|&j| weights[k][j] > 0.0))
        .collect();
    if active.is_empty() {
        return None;
    }

    let attempt = |with_sky: bool| -> Option<(DVector<f64>, DMatrix<f64>)> {
        let offset = usize::from(with_sky);
        let m = active.len() + offset;
        let mut ata = DMatrix::<f64>::zeros(m, m);
        let mut atb = DVector::<f64>::zeros(m);
        let mut basis = vec![0.0; m];
        for &j in &usable {
            let idx = pixels[j];
            let w = models.ivar[idx] as f64;
            if w <= 0.0 {
                continue;
            }
            let d = input.image[idx] as f64 - global_sky[idx] as f64;
            if with_sky {
                basis[0] = 1.0;
            }
            for (a, &k) in active.iter().enumerate() {
                basis[a + offset] = weights[k][j];
            }
            for a in 0..m {
                atb[a] += w * basis[a] * d;
                for b in 0..m {
                    ata[(a, b)] += w * basis[a] * basis[b];
                }
            }
        }
        let chol = ata.cholesky()?;
        let solution = chol.solve(&atb);
        Some((solution, chol.inverse()))
    };

    let (with_sky, (solution, cov)) = match attempt(true) {
        Some(s) => (true, s),
        None => (false, attempt(false)?),
    };
    if solution.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let offset = usize::from(with_sky);
    let mut amplitudes = vec![None; weights.len()];
    for (a, &k) in active.iter().enumerate() {
        let var = cov[(a + offset, a + offset)];
        amplitudes[k] = Some((solution[a + offset], var));
    }
    Some(RowFit {
        sky_offset: if with_sky { solution[0] } else { 0.0 },
        amplitudes,
    })
}

#[allow(clippy::too_many_arguments)]
fn fill_row(
    spec: &mut Spectrum,
    y: usize,
    amplitude: Option<(f64, f64)>,
    weights: &[f64],
    pixels: &[usize],
    input: &ExtractInput<'_>,
    models: &LocalModels,
    inlier: &BitBuffer2,
) {
    let Some((amp, var)) = amplitude.filter(|(_, var)| *var > 0.0 && var.is_finite()) else {
        spec.counts[y] = 0.0;
        spec.ivar[y] = 0.0;
        spec.mask[y] = false;
        return;
    };

    let mut sum_p = 0.0;
    let mut wave = 0.0;
    let mut sky = 0.0;
    let mut npix = 0.0;
    let mut p2w = 0.0;
    let mut p2w2v = 0.0;
    for (j, &idx) in pixels.iter().enumerate() {
        let p = weights[j];
        if p <= 0.0 {
            continue;
        }
        sum_p += p;
        wave += p * input.waveimg[idx];
        sky += p * models.sky[idx] as f64;
        if inlier.get(idx) {
            npix += 1.0;
            let w = models.ivar[idx] as f64;
            p2w += p * p * w;
            p2w2v += p * p * w * w * (input.rn2[idx] as f64 + (models.sky[idx] as f64).abs());
        }
    }

    spec.counts[y] = amp as f32;
    spec.ivar[y] = (1.0 / var) as f32;
    spec.nivar[y] = if p2w2v > 0.0 {
        (p2w * p2w / p2w2v) as f32
    } else {
        0.0
    };
    spec.wave[y] = if sum_p > 0.0 { wave / sum_p } else { 0.0 };
    spec.sky[y] = sky as f32;
    spec.npix[y] = npix as f32;
    spec.mask[y] = true;
}

/// `(offset, normalized flux)` samples of one object for the empirical
/// profile, with the other objects' models removed.
#[allow(clippy::too_many_arguments)]
fn profile_samples(
    input: &ExtractInput<'_>,
    region: &RegionPixels,
    models: &LocalModels,
    inlier: &BitBuffer2,
    own_model: &[f64],
    candidate: &ObjectCandidate,
    half_window: f64,
    previous: &Spectrum,
) -> Vec<(f64, f64)> {
    let width = input.image.width();
    let mut samples = Vec::new();
    let mut row_values: Vec<(f64, f64)> = Vec::new();
    for (y, range) in &region.rows {
        let centre = candidate.trace[*y];
        row_values.clear();
        for (j, &idx) in region.pixels[range.clone()].iter().enumerate() {
            if !inlier.get(idx) {
                continue;
            }
            let dx = (idx % width) as f64 - centre;
            if dx.abs() > half_window {
                continue;
            }
            let others = models.object[idx] as f64 - own_model[range.start + j];
            let value = input.image[idx] as f64 - models.sky[idx] as f64 - others;
            row_values.push((dx, value));
        }

        let norm = if previous.mask[*y] && previous.counts[*y] > 0.0 {
            previous.counts[*y] as f64
        } else {
            row_values.iter().map(|v| v.1).sum()
        };
        if norm <= 0.0 {
            continue;
        }
        samples.extend(row_values.iter().map(|&(dx, v)| (dx, v / norm)));
    }
    samples
}

/// Re-centroid the trace row by row on the sky-subtracted image and
/// replace it with a robust polynomial through the centroids.
fn refine_trace(
    input: &ExtractInput<'_>,
    region: &RegionPixels,
    sky: &Buffer2<f32>,
    inlier: &BitBuffer2,
    candidate: &mut ObjectCandidate,
    npoly: usize,
) {
    let width = input.image.width();
    let half = candidate.fwhm.max(1.0);
    let mut rows = Vec::new();
    let mut centres = Vec::new();
    for (y, range) in &region.rows {
        let t = candidate.trace[*y];
        let (sum_w, sum_wx) = region.pixels[range.clone()]
            .iter()
            .filter(|&&idx| inlier.get(idx))
            .map(|&idx| {
                let x = (idx % width) as f64;
                ((input.image[idx] - sky[idx]).max(0.0) as f64, x)
            })
            .filter(|&(_, x)| (x - t).abs() <= half)
            .fold((0.0, 0.0), |(sw, swx), (w, x)| (sw + w, swx + w * x));
        if sum_w > 0.0 {
            rows.push(*y as f64);
            centres.push(sum_wx / sum_w);
        }
    }
    if rows.len() <= npoly + 1 {
        return;
    }

    let Some((poly, _)) =
        Polynomial::robust_fit(&rows, &centres, None, npoly, TRACE_SIGMA_REJECT, TRACE_MAX_ITER)
    else {
        return;
    };
    for (y, _) in &region.rows {
        candidate.trace[*y] = poly.eval(*y as f64);
    }
    let geometry = input.geometry.region(candidate.region);
    let reference = geometry.reference_row();
    candidate.spat_pixpos = candidate.trace[reference];
    candidate.spat_fraction = geometry.frac_at(reference, candidate.spat_pixpos);
}
