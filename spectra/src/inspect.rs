//! Optional inspection of intermediate arrays.
//!
//! A reduction renders views only when an [`Inspector`] is attached, and
//! nothing an inspector does feeds back into the numbers.

use std::fmt;

use common::Buffer2;
use strum_macros::{Display, EnumIter};
use tracing::info;

use crate::candidate::Candidates;
use crate::frame::ScienceFrame;
use crate::geometry::RegionGeometry;
use crate::math::statistics::sigma_clipped_median_sigma;
use crate::reduce::Step;

/// Intermediate images an inspector can be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum View {
    /// Detection image on good pixels.
    Image,
    /// Image minus the global sky on good pixels.
    Global,
    /// Image minus the locally refined sky on good pixels.
    Local,
    /// Sky residual in units of sigma, object flux included.
    SkyResid,
    /// Full model residual in units of sigma.
    Resid,
}

/// Receiver for intermediate results. Every method defaults to doing nothing.
pub trait Inspector: Send + fmt::Debug {
    fn show(
        &mut self,
        _view: View,
        _image: &Buffer2<f32>,
        _candidates: Option<&Candidates>,
        _geometry: &RegionGeometry,
    ) {
    }

    fn step_finished(&mut self, _step: Step) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullInspector;

impl Inspector for NullInspector {}

/// Logs sigma-clipped statistics of every view.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInspector;

impl Inspector for TracingInspector {
    fn show(
        &mut self,
        view: View,
        image: &Buffer2<f32>,
        candidates: Option<&Candidates>,
        geometry: &RegionGeometry,
    ) {
        let mut values: Vec<f64> = image
            .iter()
            .filter(|v| v.is_finite() && **v != 0.0)
            .map(|&v| v as f64)
            .collect();
        let (median, sigma) = if values.is_empty() {
            (0.0, 0.0)
        } else {
            sigma_clipped_median_sigma(&mut values, 5.0, 5)
        };
        info!(
            view = %view,
            median,
            sigma,
            objects = candidates.map_or(0, Candidates::len),
            masked_regions = geometry.masked_regions().len(),
            "Inspection view"
        );
    }

    fn step_finished(&mut self, step: Step) {
        info!(step = %step, "Step finished");
    }
}

/// Model arrays a view is rendered from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewModels<'a> {
    pub sky: Option<&'a Buffer2<f32>>,
    pub object: Option<&'a Buffer2<f32>>,
    pub ivar: Option<&'a Buffer2<f32>>,
}

/// Render `view` from the frame and models. Bad pixels are zero.
///
/// Missing models are treated as zero sky, zero object and the frame ivar.
pub fn render(view: View, frame: &ScienceFrame, models: &ViewModels<'_>) -> Buffer2<f32> {
    let image = frame.image();
    let ivar = models.ivar.unwrap_or(frame.ivar());
    let (width, height) = image.shape();
    let mut out = Buffer2::new_filled(width, height, 0.0f32);
    for (idx, v) in out.iter_mut().enumerate() {
        if !frame.is_good(idx) {
            continue;
        }
        let sky = models.sky.map_or(0.0, |s| s[idx]);
        let object = models.object.map_or(0.0, |o| o[idx]);
        *v = match view {
            View::Image => image[idx],
            View::Global | View::Local => image[idx] - sky,
            View::SkyResid => (image[idx] - sky) * ivar[idx].sqrt(),
            View::Resid => (image[idx] - sky - object) * ivar[idx].sqrt(),
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_masks_bad_pixels() {
        let image = Buffer2::new_filled(3, 2, 10.0f32);
        let mut ivar = Buffer2::new_filled(3, 2, 4.0f32);
        ivar[(1, 0)] = 0.0;
        let frame =
            ScienceFrame::new(image, ivar, Buffer2::new_filled(3, 2, 0.0), None).unwrap();
        let sky = Buffer2::new_filled(3, 2, 7.0f32);
        let object = Buffer2::new_filled(3, 2, 1.0f32);
        let models = ViewModels {
            sky: Some(&sky),
            object: Some(&object),
            ivar: None,
        };

        let global = render(View::Global, &frame, &models);
        assert_eq!(global[(0, 0)], 3.0);
        assert_eq!(global[(1, 0)], 0.0);

        let resid = render(View::Resid, &frame, &models);
        assert_eq!(resid[(2, 1)], 4.0);

        let image = render(View::Image, &frame, &models);
        assert_eq!(image[(0, 1)], 10.0);
    }

    #[test]
    fn test_view_names() {
        assert_eq!(View::SkyResid.to_string(), "sky_resid");
        assert_eq!(View::Global.to_string(), "global");
    }
}
