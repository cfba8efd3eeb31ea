//! Wavelength post-processing of extracted spectra.

mod flexure;
mod helio;


pub use flexure::{ReferenceSpectrum, apply_flexure, measure_shift};
pub use helio::{
    SkyCoord, apply_velocity_correction, julian_date_from_unix, radial_velocity_correction,
    velocity_factor,
};
