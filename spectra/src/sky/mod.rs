//! Global background modelling.
//!
//! Each active region's sky is a penalized cubic B-spline in the tilt
//! (spectral) coordinate, fit to the pixels the object finder trusted as
//! background. A region whose fitted sky is identically zero is masked for
//! the rest of the reduction.

mod cosmic_ray;

#[cfg(test)]
mod tests;

pub use cosmic_ray::flag_cosmic_rays;

use common::{BitBuffer2, Buffer2};
use tracing::{debug, warn};

use crate::config::SkySubConfig;
use crate::frame::PixelMask;
use crate::geometry::{RegionGeometry, RegionMap};
use crate::math::BSpline;

/// Fewer usable background pixels than this leaves a region's sky at zero.
pub const MIN_SKY_PIXELS: usize = 10;

/// Rejection threshold for standard-star exposures.
pub const STD_SIGMA_REJECT: f64 = 7.0;

/// Rejection threshold for science exposures.
pub const SCI_SIGMA_REJECT: f64 = 3.0;

/// Arrays shared by every region of one sky fit.
#[derive(Debug, Clone, Copy)]
pub struct SkyInput<'a> {
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub mask: &'a Buffer2<PixelMask>,
    pub tilts: &'a Buffer2<f64>,
    pub region_map: &'a RegionMap,
    /// True where a pixel may be used as background.
    pub sky_mask: &'a BitBuffer2,
}

/// Fit the sky of every active region, strictly one region after another.
///
/// Regions whose sky sums to zero are masked in `geometry`. With
/// `positive_only` the first rejection pass considers positive pixels only.
pub fn global_sky(
    input: &SkyInput<'_>,
    geometry: &mut RegionGeometry,
    config: &SkySubConfig,
    sigma_reject: f64,
    positive_only: bool,
) -> Buffer2<f32> {
    let (width, height) = input.image.shape();
    let mut sky = Buffer2::new_filled(width, height, 0.0f32);

    let active: Vec<usize> = geometry.active().collect();
    for r in active {
        let pixels = input.region_map.pixels(r);
        if let Some(spline) = fit_region(input, &pixels, config, sigma_reject, positive_only) {
            for &idx in &pixels {
                sky[idx] = spline.eval(input.tilts[idx]) as f32;
            }
        }

        let total: f64 = pixels.iter().map(|&idx| sky[idx] as f64).sum();
        if total == 0.0 {
            warn!(region = r, "Sky fit is degenerate, masking region");
            for &idx in &pixels {
                sky[idx] = 0.0;
            }
            geometry.mask_region(r);
        } else {
            debug!(region = r, pixels = pixels.len(), "Region sky fitted");
        }
    }

    sky
}

fn fit_region(
    input: &SkyInput<'_>,
    pixels: &[usize],
    config: &SkySubConfig,
    sigma_reject: f64,
    positive_only: bool,
) -> Option<BSpline> {
    let x: Vec<f64> = pixels.iter().map(|&idx| input.tilts[idx]).collect();
    let y: Vec<f64> = pixels.iter().map(|&idx| input.image[idx] as f64).collect();
    let ivar: Vec<f64> = pixels.iter().map(|&idx| input.ivar[idx] as f64).collect();
    let usable: Vec<bool> = pixels
        .iter()
        .zip(&ivar)
        .map(|(&idx, &iv)| input.mask[idx].is_good() && input.sky_mask.get(idx) && iv > 0.0)
        .collect();

    if usable.iter().filter(|&&u| u).count() < MIN_SKY_PIXELS {
        return None;
    }
    let range = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
            (lo.min(t), hi.max(t))
        });
    let fit = |mask: &[bool]| {
        BSpline::robust_fit(
            &x,
            &y,
            &ivar,
            mask,
            config.bspline_spacing,
            range,
            sigma_reject,
            config.max_iter,
        )
    };

    if !positive_only {
        return fit(&usable).map(|(spline, _)| spline);
    }

    let positive: Vec<bool> = usable.iter().zip(&y).map(|(&u, &v)| u && v > 0.0).collect();
    if positive.iter().filter(|&&p| p).count() < MIN_SKY_PIXELS {
        return fit(&usable).map(|(spline, _)| spline);
    }
    let (first, _) = fit(&positive)?;
    let seeded: Vec<bool> = (0..x.len())
        .map(|i| usable[i] && ((y[i] - first.eval(x[i])) * ivar[i].sqrt()).abs() <= sigma_reject)
        .collect();
    if seeded.iter().filter(|&&s| s).count() < MIN_SKY_PIXELS {
        return Some(first);
    }
    fit(&seeded).map(|(spline, _)| spline)
}
