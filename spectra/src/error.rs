//! Error types for reduction operations.

use strum_macros::Display;
use thiserror::Error;

/// Upstream artifacts a reduction operation may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Artifact {
    #[strum(to_string = "region geometry")]
    RegionGeometry,
    #[strum(to_string = "tilt map")]
    Tilts,
    #[strum(to_string = "wavelength map")]
    WavelengthMap,
    #[strum(to_string = "object candidates")]
    Candidates,
    #[strum(to_string = "initial sky model")]
    InitialSky,
    #[strum(to_string = "flexure reference spectrum")]
    FlexureReference,
}

impl Artifact {
    /// The stage that produces this artifact.
    pub fn remedy(self) -> &'static str {
        match self {
            Artifact::RegionGeometry => "trace calibration",
            Artifact::Tilts => "tilt calibration",
            Artifact::WavelengthMap => "wavelength calibration",
            Artifact::Candidates | Artifact::InitialSky => "find_objects()",
            Artifact::FlexureReference => "load a reference sky spectrum",
        }
    }
}

/// Errors that halt a reduction operation.
///
/// Per-region numerical failures are not errors: the region is masked and the
/// run continues.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{artifact} is not available: run {remedy} first")]
    MissingPrerequisite {
        artifact: Artifact,
        remedy: &'static str,
    },

    #[error("Dimension mismatch for {what}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid region geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Pipeline '{0}' is not defined")]
    UnknownPipeline(String),

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] serde_yml::Error),
}

impl Error {
    pub fn missing(artifact: Artifact) -> Self {
        Error::MissingPrerequisite {
            artifact,
            remedy: artifact.remedy(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
