//! Cross-order object linking for echelle detectors.
//!
//! A source dispersed by an echelle lands at roughly the same slit fraction
//! in every order. Detections are made per order with a relaxed threshold,
//! grouped across orders by slit fraction, and groups that are convincing
//! overall are completed with a synthesized trace in every order where the
//! source was too faint to detect.

use common::BitBuffer2;
use tracing::debug;

use super::{FindInput, detect_in_region, follow_region, mask_objects, warn_unmatched_manual};
use crate::candidate::{Candidates, EchelleId, ObjectCandidate};
use crate::config::FindObjConfig;
use crate::instrument::Instrument;
use crate::math::statistics::median_mut;

#[derive(Debug)]
struct Cluster {
    frac: f64,
    weight: f64,
    members: Vec<ObjectCandidate>,
}

impl Cluster {
    fn has_region(&self, r: usize) -> bool {
        self.members.iter().any(|m| m.region == r)
    }

    fn add(&mut self, candidate: ObjectCandidate) {
        let w = candidate.snr.max(1.0);
        self.frac = (self.frac * self.weight + candidate.spat_fraction * w) / (self.weight + w);
        self.weight += w;
        self.members.push(candidate);
    }

    fn brightest(&self) -> Option<&ObjectCandidate> {
        self.members.iter().max_by(|a, b| a.snr.total_cmp(&b.snr))
    }

    fn survives(&self, config: &FindObjConfig) -> bool {
        let max_snr = self.members.iter().map(|m| m.snr).fold(0.0, f64::max);
        let nabove = self
            .members
            .iter()
            .filter(|m| m.snr >= config.ech_min_snr)
            .count();
        self.members.iter().any(|m| m.hand_extract)
            || max_snr >= config.ech_max_snr
            || nabove >= config.ech_nabove_min_snr
    }
}

/// Detect and link objects across the active orders.
///
/// Returns candidates ordered by object id then order index, plus the sky
/// mask built from the final (linked and completed) traces.
pub fn find_echelle(
    input: &FindInput<'_>,
    instrument: &Instrument,
    config: &FindObjConfig,
) -> (Candidates, BitBuffer2) {
    let geometry = input.geometry;
    let threshold = config.sig_thresh.min(config.ech_min_snr);

    let mut detections: Vec<ObjectCandidate> = geometry
        .active()
        .flat_map(|r| detect_in_region(input, r, config.fwhm, threshold, config))
        .collect();
    detections.sort_by(|a, b| b.snr.total_cmp(&a.snr));
    let ndetected = detections.len();

    let mut clusters: Vec<Cluster> = Vec::new();
    for candidate in detections {
        let r = candidate.region;
        let tol = config.ech_link_tolerance
            / (instrument.plate_scale_for(r) * geometry.region(r).median_width());
        let nearest = clusters
            .iter_mut()
            .filter(|c| !c.has_region(r) && (c.frac - candidate.spat_fraction).abs() < tol)
            .min_by(|a, b| {
                (a.frac - candidate.spat_fraction)
                    .abs()
                    .total_cmp(&(b.frac - candidate.spat_fraction).abs())
            });
        match nearest {
            Some(cluster) => cluster.add(candidate),
            None => clusters.push(Cluster {
                frac: candidate.spat_fraction,
                weight: candidate.snr.max(1.0),
                members: vec![candidate],
            }),
        }
    }

    let nclusters = clusters.len();
    clusters.retain(|c| c.survives(config));
    clusters.sort_by(|a, b| a.frac.total_cmp(&b.frac));
    debug!(
        detections = ndetected,
        groups = nclusters,
        kept = clusters.len(),
        "Linked echelle detections"
    );

    let mut linked: Vec<ObjectCandidate> = Vec::new();
    for (i, mut cluster) in clusters.into_iter().enumerate() {
        let obj_id = i as i32 + 1;
        let fwhm_arcsec = match cluster.brightest() {
            Some(b) => b.fwhm * instrument.plate_scale_for(b.region),
            None => continue,
        };
        for r in geometry.active() {
            let region = geometry.region(r);
            let mut candidate = match cluster.members.iter().position(|m| m.region == r) {
                Some(pos) => cluster.members.swap_remove(pos),
                None => {
                    let trace = follow_region(region, cluster.frac, input.std_trace_for(r));
                    let fwhm = fwhm_arcsec / instrument.plate_scale_for(r);
                    let mut c = ObjectCandidate::new(r, trace, fwhm, 0.0);
                    c.spat_fraction = cluster.frac;
                    c.spat_pixpos = c.trace[region.reference_row()];
                    c
                }
            };
            candidate.obj_id = obj_id;
            candidate.echelle = Some(EchelleId {
                order: instrument.order_for(r).unwrap_or(r as i32),
                order_index: r,
                obj_id,
            });
            linked.push(candidate);
        }
    }
    linked.sort_by_key(|c| (c.obj_id, c.region));

    let mut sky_mask = BitBuffer2::new_filled(input.image.width(), input.image.height(), true);
    for r in geometry.active() {
        let in_order: Vec<ObjectCandidate> =
            linked.iter().filter(|c| c.region == r).cloned().collect();
        mask_objects(
            &mut sky_mask,
            input.region_map,
            geometry.region(r),
            r,
            &in_order,
            config.skymask_nfwhm,
        );
    }

    warn_unmatched_manual(input);
    (Candidates::from(linked), sky_mask)
}

/// FWHM in pixels for each candidate, replacing the values of faint
/// detections with the FWHM of the same object's brightest order, converted
/// through the plate scales.
pub(crate) fn propagate_fwhm(
    candidates: &mut [&mut ObjectCandidate],
    instrument: &Instrument,
    min_snr: f64,
) {
    let mut ids: Vec<i32> = candidates.iter().map(|c| c.obj_id).collect();
    ids.sort_unstable();
    ids.dedup();

    for id in ids {
        let Some(best) = candidates
            .iter()
            .filter(|c| c.obj_id == id)
            .max_by(|a, b| a.snr.total_cmp(&b.snr))
            .map(|c| c.fwhm * instrument.plate_scale_for(c.region))
        else {
            continue;
        };
        for c in candidates.iter_mut().filter(|c| c.obj_id == id) {
            if c.snr < min_snr {
                c.fwhm = best / instrument.plate_scale_for(c.region);
            }
        }
    }
}

/// Median FWHM in arcsec over detections, for diagnostics.
pub(crate) fn median_fwhm_arcsec(candidates: &Candidates, instrument: &Instrument) -> f64 {
    let mut values: Vec<f64> = candidates
        .iter()
        .map(|c| c.fwhm * instrument.plate_scale_for(c.region))
        .collect();
    median_mut(&mut values)
}
