//! Spectrum extraction.
//!
//! Two strategies share the same inputs: a fixed-aperture boxcar sum against
//! an already known sky, and the full optimal extraction, which refits the
//! sky locally together with every object's spatial profile.

mod boxcar;
mod optimal;
mod profile;


pub use boxcar::{boxcar_extract, boxcar_spectrum};
pub use optimal::{LocalModels, LocalParams, extract_region};
pub use profile::Profile;

use common::Buffer2;

use crate::frame::PixelMask;
use crate::geometry::{RegionGeometry, RegionMap};

/// Frame arrays and calibrations read by extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractInput<'a> {
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub mask: &'a Buffer2<PixelMask>,
    pub rn2: &'a Buffer2<f32>,
    pub waveimg: &'a Buffer2<f64>,
    pub region_map: &'a RegionMap,
    pub geometry: &'a RegionGeometry,
}
