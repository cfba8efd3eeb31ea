//! Geometry strategies: how detection and local extraction are invoked for
//! each class of detector layout.

use std::fmt;

use common::{BitBuffer2, Buffer2};
use tracing::{debug, info};

use crate::candidate::{Candidates, ObjectCandidate};
use crate::config::{ExtractionConfig, FindObjConfig};
use crate::error::{Error, Result};
use crate::extract::{ExtractInput, LocalModels, LocalParams, extract_region};
use crate::find::{self, FindInput, median_fwhm_arcsec, propagate_fwhm};
use crate::instrument::{Instrument, PipelineKind};

/// Settings shared by every region of one local extraction.
#[derive(Debug, Clone, Copy)]
pub struct LocalSettings<'a> {
    pub config: &'a ExtractionConfig,
    pub sigma_reject: f64,
    pub model_noise: bool,
    pub is_standard: bool,
    pub trace_npoly: usize,
    /// Echelle objects below this S/N borrow the FWHM of their brightest order.
    pub min_snr: f64,
}

impl<'a> LocalSettings<'a> {
    fn params(&self, plate_scale: f64) -> LocalParams<'a> {
        LocalParams {
            config: self.config,
            box_radius: self.config.boxcar_radius / plate_scale,
            sigma_reject: self.sigma_reject,
            model_noise: self.model_noise,
            is_standard: self.is_standard,
            trace_npoly: self.trace_npoly,
        }
    }
}

/// The two operations that differ between detector layouts.
pub trait GeometryStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> PipelineKind;

    /// One detection pass over every active region.
    ///
    /// Returns the candidates and the sky mask (true = background).
    fn find_objects(
        &self,
        input: &FindInput<'_>,
        config: &FindObjConfig,
    ) -> (Candidates, BitBuffer2);

    /// Local sky refinement and optimal extraction of every candidate.
    ///
    /// Regions without candidates keep the neutral model values.
    fn local_skysub_extract(
        &self,
        input: &ExtractInput<'_>,
        candidates: &mut Candidates,
        global_sky: &Buffer2<f32>,
        settings: &LocalSettings<'_>,
    ) -> LocalModels;
}

// ============================================================================
// Contiguous slits
// ============================================================================

/// Long-slit and multi-slit detectors: regions are independent and share
/// one plate scale.
#[derive(Debug, Clone)]
pub struct MultiSlit {
    instrument: Instrument,
}

impl MultiSlit {
    pub fn new(instrument: &Instrument) -> Self {
        Self {
            instrument: instrument.clone(),
        }
    }

    fn boxed(instrument: &Instrument) -> Result<Box<dyn GeometryStrategy>> {
        Ok(Box::new(Self::new(instrument)))
    }
}

impl GeometryStrategy for MultiSlit {
    fn kind(&self) -> PipelineKind {
        PipelineKind::MultiSlit
    }

    fn find_objects(
        &self,
        input: &FindInput<'_>,
        config: &FindObjConfig,
    ) -> (Candidates, BitBuffer2) {
        find::find_objects(input, config)
    }

    fn local_skysub_extract(
        &self,
        input: &ExtractInput<'_>,
        candidates: &mut Candidates,
        global_sky: &Buffer2<f32>,
        settings: &LocalSettings<'_>,
    ) -> LocalModels {
        let mut models = LocalModels::new(global_sky, input.ivar);
        for r in input.geometry.active() {
            let mut in_region = candidates.in_region_mut(r);
            if in_region.is_empty() {
                continue;
            }
            debug!(region = r, objects = in_region.len(), "Extracting slit");
            let params = settings.params(self.instrument.plate_scale_for(r));
            extract_region(input, r, &mut in_region, global_sky, &mut models, &params);
        }
        models
    }
}

// ============================================================================
// Echelle orders
// ============================================================================

/// Cross-dispersed detectors: every object appears in every order, and
/// plate scales differ per order.
#[derive(Debug, Clone)]
pub struct Echelle {
    instrument: Instrument,
}

impl Echelle {
    pub fn new(instrument: &Instrument) -> Result<Self> {
        if instrument.orders.is_empty() {
            return Err(Error::InvalidGeometry(format!(
                "echelle instrument '{}' has no order numbers",
                instrument.name
            )));
        }
        Ok(Self {
            instrument: instrument.clone(),
        })
    }

    fn boxed(instrument: &Instrument) -> Result<Box<dyn GeometryStrategy>> {
        Ok(Box::new(Self::new(instrument)?))
    }
}

impl GeometryStrategy for Echelle {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Echelle
    }

    fn find_objects(
        &self,
        input: &FindInput<'_>,
        config: &FindObjConfig,
    ) -> (Candidates, BitBuffer2) {
        find::find_echelle(input, &self.instrument, config)
    }

    /// Orders are extracted brightest first, so that faint orders inherit a
    /// FWHM already refined on a bright one.
    fn local_skysub_extract(
        &self,
        input: &ExtractInput<'_>,
        candidates: &mut Candidates,
        global_sky: &Buffer2<f32>,
        settings: &LocalSettings<'_>,
    ) -> LocalModels {
        let mut models = LocalModels::new(global_sky, input.ivar);
        if candidates.is_empty() {
            return models;
        }
        info!(
            fwhm_arcsec = median_fwhm_arcsec(candidates, &self.instrument),
            "Median object FWHM"
        );

        let mut orders: Vec<(usize, f64)> = input
            .geometry
            .active()
            .filter_map(|r| {
                candidates
                    .in_region(r)
                    .map(|c| c.snr)
                    .max_by(f64::total_cmp)
                    .map(|snr| (r, snr))
            })
            .collect();
        orders.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (r, best_snr) in orders {
            {
                let mut all: Vec<&mut ObjectCandidate> = candidates.iter_mut().collect();
                propagate_fwhm(&mut all, &self.instrument, settings.min_snr);
            }
            let mut in_order = candidates.in_region_mut(r);
            debug!(
                region = r,
                order = self.instrument.order_for(r),
                snr = best_snr,
                "Extracting order"
            );
            let params = settings.params(self.instrument.plate_scale_for(r));
            extract_region(input, r, &mut in_order, global_sky, &mut models, &params);
        }
        models
    }
}

// ============================================================================
// Registry
// ============================================================================

type Constructor = fn(&Instrument) -> Result<Box<dyn GeometryStrategy>>;

/// Strategy constructors by pipeline kind.
pub const REGISTRY: &[(PipelineKind, Constructor)] = &[
    (PipelineKind::MultiSlit, MultiSlit::boxed as Constructor),
    (PipelineKind::Echelle, Echelle::boxed as Constructor),
];

fn lookup(kind: PipelineKind) -> Option<Constructor> {
    REGISTRY
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|&(_, constructor)| constructor)
}

/// Strategy for the instrument's own pipeline kind.
pub fn strategy_for(instrument: &Instrument) -> Result<Box<dyn GeometryStrategy>> {
    let constructor = lookup(instrument.pipeline)
        .ok_or_else(|| Error::UnknownPipeline(instrument.pipeline.to_string()))?;
    constructor(instrument)
}

/// Strategy registered under `name`, e.g. `"Echelle"`.
pub fn strategy_by_name(name: &str, instrument: &Instrument) -> Result<Box<dyn GeometryStrategy>> {
    let constructor = name
        .parse::<PipelineKind>()
        .ok()
        .and_then(lookup)
        .ok_or_else(|| Error::UnknownPipeline(name.to_string()))?;
    constructor(instrument)
}
