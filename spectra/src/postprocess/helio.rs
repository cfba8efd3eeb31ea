//! Observer motion relative to the Sun.
//!
//! Earth's orbital velocity comes from a low-precision solar ephemeris
//! (good to about 0.01 degrees), differentiated numerically. The diurnal
//! term uses a spherical Earth. Together they are accurate to a few m/s,
//! well below the resolution of the spectra they correct.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidates, Spectrum};
use crate::geometry::RegionGeometry;
use crate::instrument::Observatory;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT: f64 = 299_792.458;

const AU_KM: f64 = 149_597_870.7;
const SECONDS_PER_DAY: f64 = 86_400.0;
const J2000: f64 = 2_451_545.0;
const EARTH_RADIUS_KM: f64 = 6_378.137;
/// Sidereal rotation rate in rad/s.
const EARTH_OMEGA: f64 = 7.292_115e-5;
/// Half step of the numerical derivative, in days.
const DERIVATIVE_STEP: f64 = 0.01;

/// Equatorial coordinates, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra: f64,
    pub dec: f64,
}

impl SkyCoord {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    pub fn unit_vector(&self) -> DVec3 {
        let (ra, dec) = (self.ra.to_radians(), self.dec.to_radians());
        DVec3::new(dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin())
    }
}

pub fn julian_date_from_unix(seconds: f64) -> f64 {
    seconds / SECONDS_PER_DAY + 2_440_587.5
}

/// Heliocentric position of the Earth in AU, equatorial frame.
fn earth_position(jd: f64) -> DVec3 {
    let n = jd - J2000;
    let mean_longitude = (280.460 + 0.985_647_4 * n).to_radians();
    let g = (357.528 + 0.985_600_3 * n).to_radians();
    let lambda = mean_longitude + (1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    let distance = 1.000_14 - 0.016_71 * g.cos() - 0.000_14 * (2.0 * g).cos();
    let obliquity = (23.439 - 0.000_000_4 * n).to_radians();

    let sun = DVec3::new(
        distance * lambda.cos(),
        distance * lambda.sin() * obliquity.cos(),
        distance * lambda.sin() * obliquity.sin(),
    );
    -sun
}

/// Orbital velocity of the Earth in km/s, equatorial frame.
pub(crate) fn earth_velocity(jd: f64) -> DVec3 {
    let ahead = earth_position(jd + DERIVATIVE_STEP);
    let behind = earth_position(jd - DERIVATIVE_STEP);
    (ahead - behind) / (2.0 * DERIVATIVE_STEP) * AU_KM / SECONDS_PER_DAY
}

/// Velocity of the observatory around the Earth's axis in km/s.
fn rotation_velocity(jd: f64, observatory: &Observatory) -> DVec3 {
    let gmst = 280.460_618_37 + 360.985_647_366_29 * (jd - J2000);
    let lst = (gmst + observatory.longitude).rem_euclid(360.0).to_radians();
    let radius = EARTH_RADIUS_KM + observatory.altitude / 1000.0;
    let speed = EARTH_OMEGA * radius * observatory.latitude.to_radians().cos();
    DVec3::new(-lst.sin(), lst.cos(), 0.0) * speed
}

/// Observer velocity projected onto the direction of `target`, in km/s.
///
/// Positive when the observer approaches the target; this is the amount to
/// add to measured radial velocities.
pub fn radial_velocity_correction(target: SkyCoord, jd: f64, observatory: &Observatory) -> f64 {
    let velocity = earth_velocity(jd) + rotation_velocity(jd, observatory);
    velocity.dot(target.unit_vector())
}

/// Relativistic wavelength factor for a correction of `v` km/s.
pub fn velocity_factor(v: f64) -> f64 {
    let beta = v / SPEED_OF_LIGHT;
    ((1.0 + beta) / (1.0 - beta)).sqrt()
}

fn scale_wavelengths(spectrum: &mut Spectrum, factor: f64) {
    spectrum.wave.iter_mut().for_each(|w| *w *= factor);
}

/// Scale the wavelengths of every candidate in an unmasked region.
pub fn apply_velocity_correction(candidates: &mut Candidates, geometry: &RegionGeometry, v: f64) {
    let factor = velocity_factor(v);
    for c in candidates.iter_mut() {
        if geometry.is_masked(c.region) {
            continue;
        }
        if let Some(boxcar) = c.boxcar.as_mut() {
            scale_wavelengths(boxcar, factor);
        }
        if let Some(optimal) = c.optimal.as_mut() {
            scale_wavelengths(optimal, factor);
        }
        c.velocity_correction = Some(v);
    }
}
