//! Reduction of one exposure.
//!
//! [`Reducer`] owns the science frame for the whole reduction and sequences
//! detection, global sky fitting and extraction over the regions of the
//! detector. The layout-specific parts (how detection and local extraction
//! are invoked) are delegated to a [`GeometryStrategy`] resolved from the
//! instrument through [`REGISTRY`].
//!
//! ```text
//! Init ─find_objects─▶ ObjectsFound ─initial sky─▶ InitialSky ─┬─▶ Extracted (boxcar, std)
//!                                                              └─global_sky_subtract─▶ FinalSky ─▶ Extracted
//! ```

mod strategy;


pub use strategy::{
    Echelle, GeometryStrategy, LocalSettings, MultiSlit, REGISTRY, strategy_by_name, strategy_for,
};

use std::fmt;

use common::{BitBuffer2, Buffer2};
use rayon::prelude::*;
use strum_macros::Display;
use tracing::{info, warn};

use crate::candidate::{Candidates, Sign};
use crate::config::{FlexureMethod, ReduceConfig, ReferenceFrame, WaveReference};
use crate::error::{Artifact, Error, Result};
use crate::extract::{ExtractInput, LocalModels, boxcar_extract};
use crate::find::{FindInput, ManualEntry, ManualExtraction};
use crate::frame::{MaskFlag, PixelMask, ScienceFrame, check_shape};
use crate::geometry::{RegionGeometry, RegionMap};
use crate::inspect::{Inspector, View, ViewModels, render};
use crate::instrument::Instrument;
use crate::postprocess::{
    ReferenceSpectrum, SkyCoord, apply_flexure, apply_velocity_correction,
    radial_velocity_correction,
};
use crate::sky::{SCI_SIGMA_REJECT, STD_SIGMA_REJECT, SkyInput, flag_cosmic_rays, global_sky};

// ============================================================================
// Inputs
// ============================================================================

/// Calibration artifacts consumed read-only by a reduction.
#[derive(Debug, Clone, Default)]
pub struct Calibrations {
    pub geometry: Option<RegionGeometry>,
    /// Spectral coordinate of every pixel along the line tilt.
    pub tilts: Option<Buffer2<f64>>,
    pub waveimg: Option<Buffer2<f64>>,
}

impl Calibrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geometry(mut self, geometry: RegionGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_tilts(mut self, tilts: Buffer2<f64>) -> Self {
        self.tilts = Some(tilts);
        self
    }

    pub fn with_waveimg(mut self, waveimg: Buffer2<f64>) -> Self {
        self.waveimg = Some(waveimg);
        self
    }
}

/// Per-exposure mode flags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReduceOptions {
    /// The frame is a difference of two exposures; detect on both polarities.
    pub ir_redux: bool,
    /// The frame is a standard star.
    pub std_redux: bool,
    /// Regions excluded from the start.
    pub masked_regions: Vec<usize>,
}

impl ReduceOptions {
    pub fn with_ir_redux(mut self, ir_redux: bool) -> Self {
        self.ir_redux = ir_redux;
        self
    }

    pub fn with_std_redux(mut self, std_redux: bool) -> Self {
        self.std_redux = std_redux;
        self
    }

    pub fn with_masked_regions(mut self, regions: Vec<usize>) -> Self {
        self.masked_regions = regions;
        self
    }
}

// ============================================================================
// State and results
// ============================================================================

/// Operations recorded in the steps log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    FindObjects,
    GlobalSkysub,
    LocalSkysubExtract,
    BoxcarExtract,
    FlexureCorrect,
    HelioCorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    Init,
    ObjectsFound,
    InitialSky,
    FinalSky,
    Extracted,
}

/// Outcome of [`Reducer::find_objects`].
#[derive(Debug, Clone)]
pub struct FoundObjects {
    pub candidates: Candidates,
    /// Number of positive candidates.
    pub nobj: usize,
    /// True where a pixel is trusted as background.
    pub sky_mask: BitBuffer2,
}

/// Full-frame models and the extracted candidates.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub sky: Buffer2<f32>,
    pub object: Buffer2<f32>,
    pub ivar: Buffer2<f32>,
    pub mask: Buffer2<PixelMask>,
    pub candidates: Candidates,
    pub steps: Vec<Step>,
}

// ============================================================================
// Reducer
// ============================================================================

#[derive(Debug)]
pub struct Reducer {
    frame: ScienceFrame,
    geometry: RegionGeometry,
    region_map: RegionMap,
    tilts: Buffer2<f64>,
    waveimg: Option<Buffer2<f64>>,
    instrument: Instrument,
    config: ReduceConfig,
    options: ReduceOptions,
    strategy: Box<dyn GeometryStrategy>,
    inspector: Option<Box<dyn Inspector>>,
    flexure_reference: Option<ReferenceSpectrum>,

    stage: Stage,
    steps: Vec<Step>,
    candidates: Option<Candidates>,
    sky_mask: Option<BitBuffer2>,
    initial_sky: Option<Buffer2<f32>>,
    /// Most recent global sky fit.
    sky: Option<Buffer2<f32>>,
}

impl Reducer {
    /// Validate inputs, build the region map and resolve the strategy.
    ///
    /// Pixels outside every region are flagged `OffRegion`.
    pub fn new(
        frame: ScienceFrame,
        calibrations: Calibrations,
        instrument: Instrument,
        config: ReduceConfig,
        options: ReduceOptions,
    ) -> Result<Self> {
        config.check()?;
        let Calibrations {
            geometry,
            tilts,
            waveimg,
        } = calibrations;
        let mut geometry = geometry.ok_or_else(|| Error::missing(Artifact::RegionGeometry))?;
        let tilts = tilts.ok_or_else(|| Error::missing(Artifact::Tilts))?;

        let (width, height) = frame.shape();
        check_shape("tilts", (width, height), tilts.shape())?;
        if let Some(waveimg) = &waveimg {
            check_shape("waveimg", (width, height), waveimg.shape())?;
        }
        geometry.validate(height)?;
        instrument.validate(geometry.len())?;
        let strategy = strategy_for(&instrument)?;

        for &r in &options.masked_regions {
            if r >= geometry.len() {
                return Err(Error::InvalidGeometry(format!(
                    "masked region {r} out of range for {} regions",
                    geometry.len()
                )));
            }
            geometry.mask_region(r);
        }

        let region_map = RegionMap::build(&geometry, width, height);
        let mut frame = frame;
        for idx in 0..width * height {
            if !region_map.in_any(idx) {
                frame.flag(idx, MaskFlag::OffRegion);
            }
        }

        info!(
            pipeline = %strategy.kind(),
            instrument = %instrument.name,
            detector = instrument.detector,
            regions = geometry.len(),
            masked = options.masked_regions.len(),
            ir_redux = options.ir_redux,
            std_redux = options.std_redux,
            "Reducer ready"
        );

        Ok(Self {
            frame,
            geometry,
            region_map,
            tilts,
            waveimg,
            instrument,
            config,
            options,
            strategy,
            inspector: None,
            flexure_reference: None,
            stage: Stage::Init,
            steps: Vec::new(),
            candidates: None,
            sky_mask: None,
            initial_sky: None,
            sky: None,
        })
    }

    pub fn with_inspector(mut self, inspector: Box<dyn Inspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn with_flexure_reference(mut self, reference: ReferenceSpectrum) -> Self {
        self.flexure_reference = Some(reference);
        self
    }

    #[inline]
    pub fn frame(&self) -> &ScienceFrame {
        &self.frame
    }

    #[inline]
    pub fn geometry(&self) -> &RegionGeometry {
        &self.geometry
    }

    #[inline]
    pub fn region_map(&self) -> &RegionMap {
        &self.region_map
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[inline]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[inline]
    pub fn candidates(&self) -> Option<&Candidates> {
        self.candidates.as_ref()
    }

    #[inline]
    pub fn initial_sky(&self) -> Option<&Buffer2<f32>> {
        self.initial_sky.as_ref()
    }

    #[inline]
    pub fn strategy(&self) -> &dyn GeometryStrategy {
        self.strategy.as_ref()
    }

    /// Two-pass object finding.
    ///
    /// Pass one runs on the raw image and seeds the initial sky. Pass two
    /// runs on the image minus that sky, unless the exposure is a standard
    /// or `skip_second_find` is set, in which case the first pass stands.
    pub fn find_objects(
        &mut self,
        std_trace: Option<&[Vec<f64>]>,
        manual: Option<&ManualExtraction>,
    ) -> Result<FoundObjects> {
        info!(pipeline = %self.strategy.kind(), "Finding objects");
        let image = self.frame.image().clone();
        let (candidates, sky_mask) = self.single_find(&image, std_trace, manual);
        self.stage = Stage::ObjectsFound;

        let initial_sky = self.global_sky_subtract(Some(&sky_mask), false)?;
        self.initial_sky = Some(initial_sky.clone());
        self.stage = Stage::InitialSky;

        let (candidates, sky_mask) =
            if self.options.std_redux || self.config.find.skip_second_find {
                (candidates, sky_mask)
            } else {
                let residual = subtract(&image, &initial_sky);
                self.single_find(&residual, std_trace, manual)
            };

        let nobj = candidates.count(Sign::Positive);
        info!(
            objects = nobj,
            negative = candidates.count(Sign::Negative),
            "Object finding complete"
        );
        self.candidates = Some(candidates.clone());
        self.sky_mask = Some(sky_mask.clone());
        Ok(FoundObjects {
            candidates,
            nobj,
            sky_mask,
        })
    }

    /// One detection pass on `image`, plus the negated pass when
    /// differencing.
    fn single_find(
        &mut self,
        image: &Buffer2<f32>,
        std_trace: Option<&[Vec<f64>]>,
        manual: Option<&ManualExtraction>,
    ) -> (Candidates, BitBuffer2) {
        let positive_manual = self.manual_entries(manual, Sign::Positive);
        let (mut candidates, mut sky_mask) = self.detect(image, std_trace, &positive_manual);

        if self.options.ir_redux {
            info!("Finding objects in the negative image");
            let negated = image.map(|v| -v);
            let negative_manual = self.manual_entries(manual, Sign::Negative);
            let (negative, negative_mask) = self.detect(&negated, std_trace, &negative_manual);
            sky_mask.and_assign(&negative_mask);
            if negative.is_empty() {
                warn!("No negative objects found");
            } else {
                candidates.append_negated(negative);
            }
        }

        if let Some(inspector) = self.inspector.as_mut() {
            let mut shown = image.clone();
            for (idx, v) in shown.iter_mut().enumerate() {
                if !self.frame.is_good(idx) {
                    *v = 0.0;
                }
            }
            inspector.show(View::Image, &shown, Some(&candidates), &self.geometry);
        }
        (candidates, sky_mask)
    }

    fn detect(
        &mut self,
        image: &Buffer2<f32>,
        std_trace: Option<&[Vec<f64>]>,
        manual: &[ManualEntry],
    ) -> (Candidates, BitBuffer2) {
        let input = FindInput {
            image,
            ivar: self.frame.ivar(),
            mask: self.frame.mask(),
            region_map: &self.region_map,
            geometry: &self.geometry,
            std_traces: std_trace,
            manual,
        };
        let found = self.strategy.find_objects(&input, &self.config.find);
        self.record(Step::FindObjects);
        found
    }

    /// Manual entries for the pass of polarity `sign` on this detector.
    fn manual_entries(&self, manual: Option<&ManualExtraction>, sign: Sign) -> Vec<ManualEntry> {
        manual
            .and_then(|m| m.for_pass(sign))
            .map(|entries| {
                entries
                    .into_iter()
                    .filter(|e| e.det == self.instrument.detector)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fit the global sky of every active region.
    ///
    /// `skymask` defaults to the mask of the last detection, or to every
    /// pixel before any detection. Standard exposures use a looser rejection
    /// and never update the cosmic-ray mask; with `global_sky_std` off they
    /// return a zero sky without fitting. Regions whose sky sums to zero are
    /// masked for the rest of the reduction.
    pub fn global_sky_subtract(
        &mut self,
        skymask: Option<&BitBuffer2>,
        is_standard: bool,
    ) -> Result<Buffer2<f32>> {
        let (width, height) = self.frame.shape();
        if is_standard && !self.config.sky.global_sky_std {
            info!("Skipping global sky subtraction for standard star");
            let sky = Buffer2::new_filled(width, height, 0.0);
            self.sky = Some(sky.clone());
            return Ok(sky);
        }

        let all_sky;
        let sky_mask = match skymask.or(self.sky_mask.as_ref()) {
            Some(mask) => {
                check_shape("skymask", (width, height), (mask.width(), mask.height()))?;
                mask
            }
            None => {
                all_sky = BitBuffer2::new_filled(width, height, true);
                &all_sky
            }
        };
        let sigma_reject = if is_standard {
            STD_SIGMA_REJECT
        } else {
            SCI_SIGMA_REJECT
        };

        info!(
            regions = self.geometry.active().count(),
            sigma_reject,
            "Global sky subtraction"
        );
        let input = SkyInput {
            image: self.frame.image(),
            ivar: self.frame.ivar(),
            mask: self.frame.mask(),
            tilts: &self.tilts,
            region_map: &self.region_map,
            sky_mask,
        };
        let sky = global_sky(
            &input,
            &mut self.geometry,
            &self.config.sky,
            sigma_reject,
            !self.options.ir_redux,
        );

        if !is_standard && self.config.cosmic_ray.enabled {
            let flagged =
                flag_cosmic_rays(&mut self.frame, &sky, &self.region_map, &self.config.cosmic_ray);
            info!(flagged, "Cosmic-ray mask updated");
        }

        self.record(Step::GlobalSkysub);
        self.sky = Some(sky.clone());
        if self.stage == Stage::InitialSky {
            self.stage = Stage::FinalSky;
        }
        if self.inspector.is_some() {
            let models = ViewModels {
                sky: Some(&sky),
                ..ViewModels::default()
            };
            self.show(View::Global, &models, self.candidates.clone().as_ref());
        }
        Ok(sky)
    }

    /// Extract every positive candidate.
    ///
    /// With no candidates this returns the last sky, a zero object model, the
    /// input ivar and the current mask. Otherwise runs boxcar-only or the
    /// full local sky and optimal extraction, and flags `Extract` on good
    /// pixels the extraction rejected.
    pub fn extract(&mut self) -> Result<ExtractionResult> {
        let mut candidates = self
            .candidates
            .clone()
            .ok_or_else(|| Error::missing(Artifact::Candidates))?;
        let initial_sky = self
            .initial_sky
            .clone()
            .ok_or_else(|| Error::missing(Artifact::InitialSky))?;
        if self.waveimg.is_none() {
            return Err(Error::missing(Artifact::WavelengthMap));
        }
        if self.options.ir_redux {
            candidates.purge_negative();
        }

        let (width, height) = self.frame.shape();
        let zeros = || Buffer2::new_filled(width, height, 0.0f32);
        if candidates.is_empty() {
            info!("No objects to extract");
            self.stage = Stage::Extracted;
            return Ok(ExtractionResult {
                sky: self.sky.clone().unwrap_or(initial_sky),
                object: zeros(),
                ivar: self.frame.ivar().clone(),
                mask: self.frame.mask().clone(),
                candidates,
                steps: self.steps.clone(),
            });
        }

        let (sky, object, ivar) = if self.config.extraction.boxcar_only {
            self.boxcar_only(&mut candidates, &initial_sky)?;
            (initial_sky, zeros(), self.frame.ivar().clone())
        } else {
            let global = if self.options.std_redux {
                initial_sky
            } else {
                let mask = self.sky_mask.clone();
                self.global_sky_subtract(mask.as_ref(), false)?
            };
            let models = self.local_skysub_extract(&mut candidates, &global)?;
            (models.sky, models.object, models.ivar)
        };

        let before = candidates.len();
        candidates.retain(|c| !self.geometry.is_masked(c.region));
        if candidates.len() < before {
            warn!(
                dropped = before - candidates.len(),
                "Dropped candidates in masked regions"
            );
        }
        info!(objects = candidates.len(), "Extraction complete");
        self.candidates = Some(candidates.clone());
        self.stage = Stage::Extracted;

        Ok(ExtractionResult {
            sky,
            object,
            ivar,
            mask: self.frame.mask().clone(),
            candidates,
            steps: self.steps.clone(),
        })
    }

    fn extract_input(&self) -> Result<ExtractInput<'_>> {
        let waveimg = self
            .waveimg
            .as_ref()
            .ok_or_else(|| Error::missing(Artifact::WavelengthMap))?;
        Ok(ExtractInput {
            image: self.frame.image(),
            ivar: self.frame.ivar(),
            mask: self.frame.mask(),
            rn2: self.frame.rn2(),
            waveimg,
            region_map: &self.region_map,
            geometry: &self.geometry,
        })
    }

    fn boxcar_only(&mut self, candidates: &mut Candidates, sky: &Buffer2<f32>) -> Result<()> {
        let input = self.extract_input()?;
        for c in candidates.iter_mut() {
            if self.geometry.is_masked(c.region) {
                continue;
            }
            let radius =
                self.config.extraction.boxcar_radius / self.instrument.plate_scale_for(c.region);
            boxcar_extract(&input, sky, c, radius);
        }
        self.record(Step::BoxcarExtract);
        Ok(())
    }

    fn local_skysub_extract(
        &mut self,
        candidates: &mut Candidates,
        global: &Buffer2<f32>,
    ) -> Result<LocalModels> {
        info!(
            objects = candidates.len(),
            model_noise = !self.options.ir_redux,
            "Local sky subtraction and extraction"
        );
        let settings = LocalSettings {
            config: &self.config.extraction,
            sigma_reject: self.config.sky.sky_sigrej,
            model_noise: !self.options.ir_redux,
            is_standard: self.options.std_redux,
            trace_npoly: self.config.find.trace_npoly,
            min_snr: self.config.find.ech_min_snr,
        };
        let models = {
            let input = self.extract_input()?;
            self.strategy
                .local_skysub_extract(&input, candidates, global, &settings)
        };

        let mut failed = 0usize;
        for idx in 0..models.extract_ok.len() {
            if self.frame.is_good(idx) && !models.extract_ok.get(idx) {
                self.frame.flag(idx, MaskFlag::Extract);
                failed += 1;
            }
        }
        info!(failed, "Extraction mask applied");
        self.record(Step::LocalSkysubExtract);

        if self.inspector.is_some() {
            let views = ViewModels {
                sky: Some(&models.sky),
                object: Some(&models.object),
                ivar: Some(&models.ivar),
            };
            let shown = Some(&*candidates);
            self.show(View::Local, &views, shown);
            self.show(View::Resid, &views, shown);
        }
        Ok(models)
    }

    /// Shift wavelengths of `candidates` by cross-correlating their boxcar
    /// sky against the flexure reference. Returns the number corrected.
    pub fn flexure_correct(&mut self, candidates: &mut Candidates) -> Result<usize> {
        if self.config.flexure.method == FlexureMethod::Skip {
            warn!("Skipping flexure correction");
            return Ok(0);
        }
        let reference = self
            .flexure_reference
            .as_ref()
            .ok_or_else(|| Error::missing(Artifact::FlexureReference))?;
        let corrected = apply_flexure(
            candidates,
            &self.geometry,
            reference,
            self.config.flexure.max_shift,
        );
        info!(
            method = %self.config.flexure.method,
            corrected,
            "Flexure correction applied"
        );
        self.record(Step::FlexureCorrect);
        Ok(corrected)
    }

    /// Apply the heliocentric (or barycentric) velocity correction for an
    /// observation of `target` at Julian date `jd`.
    ///
    /// Returns the correction in km/s, or `None` when the wavelength solution
    /// is in pixels or the observed frame is requested.
    pub fn helio_correct(
        &mut self,
        candidates: &mut Candidates,
        target: SkyCoord,
        jd: f64,
    ) -> Option<f64> {
        let wavelength = self.config.wavelength;
        if wavelength.reference == WaveReference::Pixel
            || wavelength.frame == ReferenceFrame::Observed
        {
            warn!(
                frame = %wavelength.frame,
                reference = %wavelength.reference,
                "A wavelength reference-frame correction will not be performed"
            );
            return None;
        }
        let v = radial_velocity_correction(target, jd, &self.instrument.observatory);
        apply_velocity_correction(candidates, &self.geometry, v);
        info!(frame = %wavelength.frame, velocity = v, "Velocity correction applied");
        self.record(Step::HelioCorrect);
        Some(v)
    }

    /// Find objects and extract them.
    pub fn run(&mut self) -> Result<ExtractionResult> {
        self.find_objects(None, None)?;
        self.extract()
    }

    fn record(&mut self, step: Step) {
        self.steps.push(step);
        if let Some(inspector) = self.inspector.as_mut() {
            inspector.step_finished(step);
        }
    }

    fn show(&mut self, view: View, models: &ViewModels<'_>, candidates: Option<&Candidates>) {
        let Some(inspector) = self.inspector.as_mut() else {
            return;
        };
        let image = render(view, &self.frame, models);
        inspector.show(view, &image, candidates, &self.geometry);
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: steps=[", self.strategy.kind())?;
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{step}")?;
        }
        write!(f, "]>")
    }
}

/// Reduce independent exposures in parallel, one reducer per exposure.
pub fn reduce_exposures(reducers: Vec<Reducer>) -> Vec<Result<ExtractionResult>> {
    reducers
        .into_par_iter()
        .map(|mut reducer| reducer.run())
        .collect()
}

fn subtract(image: &Buffer2<f32>, sky: &Buffer2<f32>) -> Buffer2<f32> {
    let mut out = image.clone();
    for (v, s) in out.iter_mut().zip(sky.iter()) {
        *v -= s;
    }
    out
}
