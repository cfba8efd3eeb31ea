//! Spectra - sky subtraction and extraction for 2D spectroscopic frames.
//!
//! Given a calibrated science frame and the slit or order geometry on the
//! detector, a reduction:
//! - finds object traces in every region
//! - models the sky globally with B-splines along the tilted spectral axis
//! - refines sky and object profiles locally and extracts 1D spectra
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spectra::{Calibrations, Instrument, ReduceConfig, ReduceOptions, Reducer};
//!
//! let calibrations = Calibrations::new()
//!     .with_geometry(geometry)
//!     .with_tilts(tilts)
//!     .with_waveimg(waveimg);
//! let mut reducer = Reducer::new(
//!     frame,
//!     calibrations,
//!     Instrument::multislit("lris_red", 0.135),
//!     ReduceConfig::default(),
//!     ReduceOptions::default(),
//! )?;
//! let result = reducer.run()?;
//!
//! println!("Extracted {} objects", result.candidates.len());
//! ```

pub mod candidate;
pub mod config;
pub mod error;
pub mod extract;
pub mod find;
pub mod frame;
pub mod geometry;
pub mod inspect;
pub mod instrument;
pub(crate) mod math;
pub mod postprocess;
pub mod reduce;
pub mod sky;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Frames and geometry
// ============================================================================

pub use frame::{MaskFlag, PixelMask, ScienceFrame};
pub use geometry::{RegionGeometry, RegionMap, RegionTrace};
pub use instrument::{Instrument, Observatory, PipelineKind, PlateScale};

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    CosmicRayConfig, ExtractionConfig, FindObjConfig, FlexureConfig, FlexureMethod,
    ReduceConfig, ReferenceFrame, SkySubConfig, WaveReference, WavelengthConfig,
};

// ============================================================================
// Reduction
// ============================================================================

pub use candidate::{Candidates, EchelleId, ObjectCandidate, Sign, Spectrum};
pub use error::{Artifact, Error, Result};
pub use find::{ManualEntry, ManualExtraction};
pub use inspect::{Inspector, NullInspector, TracingInspector, View};
pub use postprocess::{ReferenceSpectrum, SkyCoord};
pub use reduce::{
    Calibrations, ExtractionResult, FoundObjects, ReduceOptions, Reducer, Stage, Step,
    reduce_exposures,
};
