//! Reduction parameters.
//!
//! [`ReduceConfig`] groups the tunables of every stage into sections that
//! mirror the pipeline: object finding, sky fitting, extraction, cosmic-ray
//! re-evaluation and the wavelength post-processing hooks. Every section has
//! sensible defaults and can be loaded from YAML with missing keys filled in.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::{Error, Result};

// ============================================================================
// Enums
// ============================================================================

/// How the flexure correction is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlexureMethod {
    /// No correction.
    #[default]
    Skip,
    /// Cross-correlate the boxcar sky spectrum against a reference sky.
    Boxcar,
}

/// Rest frame the wavelengths are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceFrame {
    Observed,
    #[default]
    Heliocentric,
    Barycentric,
}

/// Medium (or pixel space) of the wavelength solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WaveReference {
    #[default]
    Air,
    Vacuum,
    /// No wavelength solution; velocity corrections do not apply.
    Pixel,
}

// ============================================================================
// Object finding
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindObjConfig {
    /// Detection threshold on the collapsed spatial profile, in sigma.
    pub sig_thresh: f64,
    /// Pixels at the left and right region edges excluded from peak search.
    pub trim_edge: (usize, usize),
    /// Fit and remove a polynomial continuum across the profile.
    pub cont_fit: bool,
    /// Order of the continuum polynomial.
    pub npoly_cont: usize,
    /// Initial guess for the spatial FWHM in pixels.
    pub fwhm: f64,
    /// Maximum number of objects kept per region, brightest first.
    pub max_number: usize,
    /// Polynomial order of refined object traces.
    pub trace_npoly: usize,
    /// Half-width of the sky exclusion around each trace, in FWHM.
    pub skymask_nfwhm: f64,
    /// Skip the second detection pass on the sky-subtracted image.
    pub skip_second_find: bool,
    /// Echelle: keep an object if its best order reaches this S/N.
    pub ech_max_snr: f64,
    /// Echelle: per-order S/N counted towards `ech_nabove_min_snr`.
    pub ech_min_snr: f64,
    /// Echelle: orders at or above `ech_min_snr` needed to keep an object.
    pub ech_nabove_min_snr: usize,
    /// Echelle: tolerance for linking detections across orders, arcsec.
    pub ech_link_tolerance: f64,
}

impl Default for FindObjConfig {
    fn default() -> Self {
        Self {
            sig_thresh: 10.0,
            trim_edge: (5, 5),
            cont_fit: true,
            npoly_cont: 1,
            fwhm: 5.0,
            max_number: 10,
            trace_npoly: 5,
            skymask_nfwhm: 2.0,
            skip_second_find: false,
            ech_max_snr: 10.0,
            ech_min_snr: 3.0,
            ech_nabove_min_snr: 2,
            ech_link_tolerance: 1.0,
        }
    }
}

impl FindObjConfig {
    pub fn check(&self) -> Result<()> {
        ensure(self.sig_thresh > 0.0, || {
            format!("sig_thresh must be positive, got {}", self.sig_thresh)
        })?;
        ensure(self.fwhm > 0.0, || {
            format!("fwhm must be positive, got {}", self.fwhm)
        })?;
        ensure(self.max_number >= 1, || {
            "max_number must be at least 1".to_string()
        })?;
        ensure(self.skymask_nfwhm > 0.0, || {
            format!("skymask_nfwhm must be positive, got {}", self.skymask_nfwhm)
        })?;
        ensure(self.ech_min_snr <= self.ech_max_snr, || {
            format!(
                "ech_min_snr ({}) must not exceed ech_max_snr ({})",
                self.ech_min_snr, self.ech_max_snr
            )
        })?;
        ensure(self.ech_link_tolerance > 0.0, || {
            "ech_link_tolerance must be positive".to_string()
        })
    }
}

// ============================================================================
// Sky subtraction
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkySubConfig {
    /// B-spline breakpoint spacing in tilt coordinate (spectral pixels).
    pub bspline_spacing: f64,
    /// Rejection threshold used by local sky refinement during extraction.
    pub sky_sigrej: f64,
    /// Fit a global sky on standard-star exposures.
    pub global_sky_std: bool,
    /// Maximum rejection iterations of the global fit.
    pub max_iter: usize,
}

impl Default for SkySubConfig {
    fn default() -> Self {
        Self {
            bspline_spacing: 0.6,
            sky_sigrej: 3.0,
            global_sky_std: true,
            max_iter: 10,
        }
    }
}

impl SkySubConfig {
    pub fn check(&self) -> Result<()> {
        ensure(self.bspline_spacing > 0.0, || {
            format!("bspline_spacing must be positive, got {}", self.bspline_spacing)
        })?;
        ensure(self.sky_sigrej > 0.0, || {
            format!("sky_sigrej must be positive, got {}", self.sky_sigrej)
        })?;
        ensure(self.max_iter >= 1, || "max_iter must be at least 1".to_string())
    }
}

// ============================================================================
// Extraction
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Only run boxcar extraction.
    pub boxcar_only: bool,
    /// Boxcar aperture radius in arcsec.
    pub boxcar_radius: f64,
    /// Objects with median S/N below this use a Gaussian profile.
    pub sn_gauss: f64,
    /// Let object profiles span the whole region.
    pub model_full_region: bool,
    /// Profile / sky / rejection iterations.
    pub niter: usize,
    /// Bin size of the empirical profile, in pixels.
    pub profile_bin: f64,
    /// Re-centroid automatic traces before the first profile fit.
    pub refine_trace: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            boxcar_only: false,
            boxcar_radius: 1.5,
            sn_gauss: 4.0,
            model_full_region: false,
            niter: 4,
            profile_bin: 0.25,
            refine_trace: true,
        }
    }
}

impl ExtractionConfig {
    pub fn check(&self) -> Result<()> {
        ensure(self.boxcar_radius > 0.0, || {
            format!("boxcar_radius must be positive, got {}", self.boxcar_radius)
        })?;
        ensure(self.niter >= 1, || "niter must be at least 1".to_string())?;
        ensure(self.profile_bin > 0.0 && self.profile_bin <= 1.0, || {
            format!("profile_bin must be in (0, 1], got {}", self.profile_bin)
        })
    }
}

// ============================================================================
// Cosmic rays
// ============================================================================

/// Re-evaluation of cosmic rays against the sky-subtracted residual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmicRayConfig {
    pub enabled: bool,
    /// Laplacian significance threshold.
    pub sigma_clip: f64,
    /// Fraction of `sigma_clip` for growing into neighbours.
    pub sigma_frac: f64,
    /// Minimum Laplacian to fine-structure contrast.
    pub obj_lim: f64,
    /// Neighbourhood radius, in pixels, that flagged pixels grow into.
    pub grow_radius: usize,
}

impl Default for CosmicRayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sigma_clip: 4.5,
            sigma_frac: 0.3,
            obj_lim: 3.0,
            grow_radius: 1,
        }
    }
}

impl CosmicRayConfig {
    pub fn check(&self) -> Result<()> {
        ensure(self.sigma_clip > 0.0, || "sigma_clip must be positive".to_string())?;
        ensure((0.0..=1.0).contains(&self.sigma_frac), || {
            format!("sigma_frac must be in [0, 1], got {}", self.sigma_frac)
        })?;
        ensure(self.obj_lim > 0.0, || "obj_lim must be positive".to_string())
    }
}

// ============================================================================
// Post-processing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlexureConfig {
    pub method: FlexureMethod,
    /// Largest shift searched, in spectral pixels.
    pub max_shift: f64,
}

impl Default for FlexureConfig {
    fn default() -> Self {
        Self {
            method: FlexureMethod::Skip,
            max_shift: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WavelengthConfig {
    pub frame: ReferenceFrame,
    pub reference: WaveReference,
}

// ============================================================================
// Top-level configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    pub find: FindObjConfig,
    pub sky: SkySubConfig,
    pub extraction: ExtractionConfig,
    pub cosmic_ray: CosmicRayConfig,
    pub flexure: FlexureConfig,
    pub wavelength: WavelengthConfig,
}

impl ReduceConfig {
    /// Boxcar-only extraction with a single detection pass.
    pub fn quick_look() -> Self {
        let mut config = Self::default();
        config.find.skip_second_find = true;
        config.extraction.boxcar_only = true;
        config
    }

    pub fn with_sig_thresh(mut self, sig_thresh: f64) -> Self {
        assert!(sig_thresh > 0.0, "sig_thresh must be positive");
        self.find.sig_thresh = sig_thresh;
        self
    }

    pub fn with_find_fwhm(mut self, fwhm: f64) -> Self {
        assert!(fwhm > 0.0, "fwhm must be positive");
        self.find.fwhm = fwhm;
        self
    }

    pub fn with_skip_second_find(mut self, skip: bool) -> Self {
        self.find.skip_second_find = skip;
        self
    }

    pub fn with_bspline_spacing(mut self, spacing: f64) -> Self {
        assert!(spacing > 0.0, "bspline_spacing must be positive");
        self.sky.bspline_spacing = spacing;
        self
    }

    pub fn with_global_sky_std(mut self, enabled: bool) -> Self {
        self.sky.global_sky_std = enabled;
        self
    }

    pub fn with_boxcar_radius(mut self, arcsec: f64) -> Self {
        assert!(arcsec > 0.0, "boxcar_radius must be positive");
        self.extraction.boxcar_radius = arcsec;
        self
    }

    pub fn with_boxcar_only(mut self, boxcar_only: bool) -> Self {
        self.extraction.boxcar_only = boxcar_only;
        self
    }

    pub fn with_cosmic_rays(mut self, enabled: bool) -> Self {
        self.cosmic_ray.enabled = enabled;
        self
    }

    pub fn with_flexure(mut self, method: FlexureMethod, max_shift: f64) -> Self {
        assert!(max_shift > 0.0, "max_shift must be positive");
        self.flexure = FlexureConfig { method, max_shift };
        self
    }

    pub fn with_wavelength(mut self, frame: ReferenceFrame, reference: WaveReference) -> Self {
        self.wavelength = WavelengthConfig { frame, reference };
        self
    }

    /// Check every section, reporting the first invalid value.
    pub fn check(&self) -> Result<()> {
        self.find.check()?;
        self.sky.check()?;
        self.extraction.check()?;
        self.cosmic_ray.check()?;
        ensure(self.flexure.max_shift > 0.0, || {
            "flexure max_shift must be positive".to_string()
        })
    }

    /// Panicking form of [`check`](Self::check) for configurations built in
    /// code.
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }

    /// Parse and check a YAML configuration.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::InvalidConfig(message()))
    }
}
