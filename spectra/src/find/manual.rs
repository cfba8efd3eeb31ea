//! Caller-forced object positions.

use serde::{Deserialize, Serialize};

use crate::candidate::Sign;

/// One forced trace position.
///
/// `det` is signed: positive entries target the image, negative entries the
/// negated image of a differenced pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualEntry {
    pub det: i32,
    /// Spectral row of the position.
    pub spec: f64,
    /// Spatial column of the position.
    pub spat: f64,
    /// Spatial FWHM in pixels.
    pub fwhm: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ManualExtraction {
    pub entries: Vec<ManualEntry>,
}

impl ManualExtraction {
    pub fn new(entries: Vec<ManualEntry>) -> Self {
        Self { entries }
    }

    /// Entries honoured by the detection pass of polarity `sign`, with `det`
    /// made positive. `None` when no entry matches.
    pub fn for_pass(&self, sign: Sign) -> Option<Vec<ManualEntry>> {
        let selected: Vec<ManualEntry> = self
            .entries
            .iter()
            .filter(|e| match sign {
                Sign::Positive => e.det > 0,
                Sign::Negative => e.det < 0,
            })
            .map(|e| ManualEntry {
                det: e.det.abs(),
                ..*e
            })
            .collect();
        (!selected.is_empty()).then_some(selected)
    }
}
