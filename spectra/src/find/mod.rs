//! Source detection within slit and order regions.
//!
//! Each region is collapsed along the spectral axis onto a slit-fraction
//! profile using a per-bin median. The continuum is removed and the profile
//! is smoothed by the expected FWHM. Peaks above threshold become
//! [`ObjectCandidate`]s whose traces follow the region's shape (or a
//! standard-star trace). The same pass produces the sky mask: every
//! pixel not within `skymask_nfwhm × fwhm` of a trace is trusted as
//! background.

mod echelle;
mod manual;

pub use echelle::find_echelle;
pub(crate) use echelle::{median_fwhm_arcsec, propagate_fwhm};
pub use manual::{ManualEntry, ManualExtraction};

use common::{BitBuffer2, Buffer2};
use tracing::{debug, warn};

use crate::candidate::{Candidates, ObjectCandidate};
use crate::config::FindObjConfig;
use crate::frame::PixelMask;
use crate::geometry::{RegionGeometry, RegionMap, RegionTrace};
use crate::math::Polynomial;
use crate::math::filter::{gaussian_noise_gain, gaussian_smooth};
use crate::math::statistics::{median_f32_mut, median_mut, sigma_clipped_median_sigma};

/// Fewer filled profile bins than this makes a region degenerate.
const MIN_BINS: usize = 3;

/// Standard error of a median relative to that of a mean, √(π/2).
const MEDIAN_EFFICIENCY: f64 = 1.253_314;

/// Inputs shared by every region of one detection pass.
#[derive(Debug, Clone, Copy)]
pub struct FindInput<'a> {
    /// Image to search: the science image, its negation, or a residual.
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub mask: &'a Buffer2<PixelMask>,
    pub region_map: &'a RegionMap,
    pub geometry: &'a RegionGeometry,
    /// Reference traces: one shared by all regions, or one per region.
    pub std_traces: Option<&'a [Vec<f64>]>,
    /// Forced positions already selected for this pass and detector.
    pub manual: &'a [ManualEntry],
}

impl<'a> FindInput<'a> {
    pub fn std_trace_for(&self, r: usize) -> Option<&'a [f64]> {
        let traces = self.std_traces?;
        if traces.len() == 1 {
            Some(traces[0].as_slice())
        } else {
            traces.get(r).map(Vec::as_slice)
        }
    }
}

/// Collapsed spatial profile of one region.
#[derive(Debug, Clone)]
struct SpatialProfile {
    values: Vec<f64>,
    /// Mean slit fraction of the pixels in each bin.
    positions: Vec<f64>,
    /// Standard error of each bin's median.
    errors: Vec<f64>,
}

/// Detect objects in every active region of a contiguous-slit detector.
///
/// Returns the candidates and the sky mask (true = background).
pub fn find_objects(input: &FindInput<'_>, config: &FindObjConfig) -> (Candidates, BitBuffer2) {
    let mut candidates = Candidates::new();
    let mut sky_mask = BitBuffer2::new_filled(input.image.width(), input.image.height(), true);

    for r in input.geometry.active() {
        let found = detect_in_region(input, r, config.fwhm, config.sig_thresh, config);
        debug!(region = r, count = found.len(), "Objects found in region");
        mask_objects(
            &mut sky_mask,
            input.region_map,
            input.geometry.region(r),
            r,
            &found,
            config.skymask_nfwhm,
        );
        for candidate in found {
            candidates.push(candidate);
        }
    }

    warn_unmatched_manual(input);
    (candidates, sky_mask)
}

/// Run detection on region `r`.
///
/// Degenerate regions (too narrow, or too few valid pixels to form a
/// profile) yield no candidates. Candidates are ordered by spatial position
/// and numbered from 1.
pub fn detect_in_region(
    input: &FindInput<'_>,
    r: usize,
    fwhm: f64,
    sig_thresh: f64,
    config: &FindObjConfig,
) -> Vec<ObjectCandidate> {
    let region = input.geometry.region(r);
    let Some(profile) = collapse_region(input, r) else {
        debug!(region = r, "Degenerate region, no objects");
        return Vec::new();
    };

    let nbins = profile.values.len();
    let width = region.median_width();
    let px_per_bin = width / nbins as f64;
    let fwhm_bins = (fwhm / px_per_bin).max(1.0);

    let continuum = fit_continuum(&profile, config);
    let residual: Vec<f64> = profile
        .values
        .iter()
        .zip(&continuum)
        .map(|(v, c)| v - c)
        .collect();
    let sigma = noise_level(&residual, &profile.errors);
    let smoothed = gaussian_smooth(&residual, fwhm_bins);
    let sigma_smooth = sigma * gaussian_noise_gain(fwhm_bins);

    let lo = (config.trim_edge.0 as f64 / px_per_bin).ceil() as usize;
    let hi = nbins.saturating_sub((config.trim_edge.1 as f64 / px_per_bin).ceil() as usize);
    let mut peaks: Vec<(usize, f64)> = (lo..hi)
        .filter(|&b| {
            let left = if b > 0 { smoothed[b - 1] } else { f64::NEG_INFINITY };
            let right = if b + 1 < nbins { smoothed[b + 1] } else { f64::NEG_INFINITY };
            smoothed[b] > left && smoothed[b] >= right
        })
        .map(|b| (b, smoothed[b] / sigma_smooth))
        .filter(|&(_, snr)| snr >= sig_thresh)
        .collect();
    peaks.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut kept: Vec<(usize, f64)> = Vec::new();
    for (b, snr) in peaks {
        if kept
            .iter()
            .all(|&(k, _)| (k as f64 - b as f64).abs() >= fwhm_bins)
        {
            kept.push((b, snr));
        }
        if kept.len() == config.max_number {
            break;
        }
    }

    let reference = region.reference_row();
    let std_trace = input.std_trace_for(r);
    let mut found: Vec<ObjectCandidate> = kept
        .into_iter()
        .map(|(b, snr)| {
            let frac = centroid(&residual, &profile.positions, b, fwhm_bins);
            let measured = measure_fwhm(&residual, &profile.positions, b)
                .map(|f| f * width)
                .filter(|f| *f >= 1.0 && *f <= 0.5 * width)
                .unwrap_or(fwhm);
            let trace = follow_region(region, frac, std_trace);
            let mut candidate = ObjectCandidate::new(r, trace, measured, snr);
            candidate.spat_fraction = frac;
            candidate.spat_pixpos = candidate.trace[reference];
            candidate
        })
        .collect();

    add_manual(input, r, region, &mut found);

    found.sort_by(|a, b| a.spat_pixpos.total_cmp(&b.spat_pixpos));
    for (i, candidate) in found.iter_mut().enumerate() {
        candidate.obj_id = i as i32 + 1;
    }
    found
}

/// Clear the sky mask within `nfwhm × fwhm` of every candidate trace in
/// region `r`.
pub fn mask_objects(
    sky_mask: &mut BitBuffer2,
    region_map: &RegionMap,
    region: &RegionTrace,
    r: usize,
    candidates: &[ObjectCandidate],
    nfwhm: f64,
) {
    if candidates.is_empty() {
        return;
    }
    let width = region_map.width();
    for y in region.spec_range() {
        if y >= region_map.height() {
            break;
        }
        for idx in region_map.row_pixels(r, y) {
            let x = (idx % width) as f64;
            if candidates
                .iter()
                .any(|c| (x - c.trace[y]).abs() < nfwhm * c.fwhm)
            {
                sky_mask.set(idx, false);
            }
        }
    }
}

/// Trace at constant slit fraction, or the standard trace shifted onto the
/// detection.
fn follow_region(region: &RegionTrace, frac: f64, std_trace: Option<&[f64]>) -> Vec<f64> {
    match std_trace {
        Some(std) if std.len() == region.left().len() => {
            let reference = region.reference_row();
            let offset = region.spat_at(reference, frac) - std[reference];
            std.iter().map(|s| s + offset).collect()
        }
        _ => region.trace_at_frac(frac),
    }
}

fn collapse_region(input: &FindInput<'_>, r: usize) -> Option<SpatialProfile> {
    let region = input.geometry.region(r);
    if region.is_degenerate() {
        return None;
    }
    let (width, height) = input.image.shape();
    let nbins = (region.median_width().round() as usize).max(MIN_BINS);

    let mut samples: Vec<Vec<f32>> = vec![Vec::new(); nbins];
    let mut sigmas: Vec<Vec<f32>> = vec![Vec::new(); nbins];
    let mut frac_sum = vec![0.0f64; nbins];
    for y in region.spec_range() {
        if y >= height {
            break;
        }
        for idx in input.region_map.row_pixels(r, y) {
            if !input.mask[idx].is_good() {
                continue;
            }
            let frac = region.frac_at(y, (idx % width) as f64);
            let b = ((frac * nbins as f64).floor().max(0.0) as usize).min(nbins - 1);
            samples[b].push(input.image[idx]);
            sigmas[b].push(1.0 / input.ivar[idx].sqrt());
            frac_sum[b] += frac;
        }
    }

    if samples.iter().filter(|s| !s.is_empty()).count() < MIN_BINS {
        return None;
    }

    let mut values = vec![f64::NAN; nbins];
    let mut errors = vec![f64::NAN; nbins];
    let mut positions = vec![0.0; nbins];
    for b in 0..nbins {
        let n = samples[b].len();
        if n == 0 {
            positions[b] = (b as f64 + 0.5) / nbins as f64;
            continue;
        }
        positions[b] = frac_sum[b] / n as f64;
        values[b] = median_f32_mut(&mut samples[b]) as f64;
        errors[b] = MEDIAN_EFFICIENCY * median_f32_mut(&mut sigmas[b]) as f64 / (n as f64).sqrt();
    }
    fill_gaps(&mut values);
    fill_gaps(&mut errors);

    Some(SpatialProfile {
        values,
        positions,
        errors,
    })
}

/// Replace NaN entries with the nearest finite neighbour.
fn fill_gaps(values: &mut [f64]) {
    let n = values.len();
    for i in 0..n {
        if values[i].is_finite() {
            continue;
        }
        let nearest = (1..n).find_map(|d| {
            let left = i.checked_sub(d).map(|j| values[j]).filter(|v| v.is_finite());
            let right = (i + d < n).then(|| values[i + d]).filter(|v| v.is_finite());
            left.or(right)
        });
        values[i] = nearest.unwrap_or(0.0);
    }
}

fn fit_continuum(profile: &SpatialProfile, config: &FindObjConfig) -> Vec<f64> {
    if config.cont_fit {
        if let Some((poly, _)) = Polynomial::robust_fit(
            &profile.positions,
            &profile.values,
            None,
            config.npoly_cont,
            3.0,
            10,
        ) {
            return profile.positions.iter().map(|&p| poly.eval(p)).collect();
        }
    }
    let mut values = profile.values.clone();
    let median = median_mut(&mut values);
    vec![median; profile.values.len()]
}

/// Robust scatter of the residual profile, floored by the propagated
/// pixel noise.
fn noise_level(residual: &[f64], errors: &[f64]) -> f64 {
    let mut res = residual.to_vec();
    let (_, sigma) = sigma_clipped_median_sigma(&mut res, 3.0, 5);
    let mut errs = errors.to_vec();
    let floor = median_mut(&mut errs);
    sigma.max(floor).max(f64::MIN_POSITIVE)
}

/// Flux-weighted slit fraction around bin `peak`.
fn centroid(residual: &[f64], positions: &[f64], peak: usize, fwhm_bins: f64) -> f64 {
    let half = fwhm_bins.round().max(1.0) as usize;
    let lo = peak.saturating_sub(half);
    let hi = (peak + half + 1).min(residual.len());
    let (sum_w, sum_wx) = (lo..hi)
        .map(|b| (residual[b].max(0.0), positions[b]))
        .fold((0.0, 0.0), |(sw, swx), (w, x)| (sw + w, swx + w * x));
    if sum_w > 0.0 {
        sum_wx / sum_w
    } else {
        positions[peak]
    }
}

/// Full width at half maximum in slit-fraction units, from the half-maximum
/// crossings on either side of `peak`.
fn measure_fwhm(residual: &[f64], positions: &[f64], peak: usize) -> Option<f64> {
    let half = 0.5 * residual[peak];
    if half <= 0.0 {
        return None;
    }
    let crossing = |from: usize, to: usize| {
        let t = (half - residual[from]) / (residual[to] - residual[from]);
        positions[from] + t * (positions[to] - positions[from])
    };

    let mut left = None;
    for b in (1..=peak).rev() {
        if residual[b - 1] < half {
            left = Some(crossing(b - 1, b));
            break;
        }
    }
    let mut right = None;
    for b in peak..residual.len().saturating_sub(1) {
        if residual[b + 1] < half {
            right = Some(crossing(b + 1, b));
            break;
        }
    }
    Some(right? - left?)
}

fn add_manual(
    input: &FindInput<'_>,
    r: usize,
    region: &RegionTrace,
    found: &mut Vec<ObjectCandidate>,
) {
    let matched: Vec<&ManualEntry> = input
        .manual
        .iter()
        .filter(|e| manual_region(input, e) == Some(r))
        .collect();
    if matched.is_empty() {
        return;
    }

    let brightest = found
        .iter()
        .max_by(|a, b| a.snr.total_cmp(&b.snr))
        .map(|c| c.trace.clone());
    let reference = region.reference_row();

    for entry in &matched {
        let row = entry.spec.round() as usize;
        found.retain(|c| (c.trace[row] - entry.spat).abs() >= entry.fwhm);
    }

    for entry in matched {
        let row = entry.spec.round() as usize;
        let trace: Vec<f64> = match (&brightest, input.std_trace_for(r)) {
            (Some(auto), _) => auto.iter().map(|t| t + entry.spat - auto[row]).collect(),
            (None, Some(std)) if std.len() == region.left().len() => {
                std.iter().map(|t| t + entry.spat - std[row]).collect()
            }
            _ => region.trace_at_frac(region.frac_at(row, entry.spat)),
        };
        let mut candidate = ObjectCandidate::new(r, trace, entry.fwhm, 0.0);
        candidate.hand_extract = true;
        candidate.spat_pixpos = candidate.trace[reference];
        candidate.spat_fraction = region.frac_at(reference, candidate.spat_pixpos);
        debug!(region = r, spat = entry.spat, spec = entry.spec, "Manual extraction added");
        found.push(candidate);
    }
}

/// Region containing a manual entry's position, if any.
fn manual_region(input: &FindInput<'_>, entry: &ManualEntry) -> Option<usize> {
    let (width, height) = input.image.shape();
    let x = entry.spat.round();
    let y = entry.spec.round();
    if x < 0.0 || y < 0.0 || x >= width as f64 || y >= height as f64 {
        return None;
    }
    let r = input.region_map.region_at(x as usize, y as usize)?;
    (!input.geometry.is_masked(r)).then_some(r)
}

fn warn_unmatched_manual(input: &FindInput<'_>) {
    for entry in input.manual {
        if manual_region(input, entry).is_none() {
            warn!(
                spat = entry.spat,
                spec = entry.spec,
                "Manual extraction position is outside every active region"
            );
        }
    }
}
