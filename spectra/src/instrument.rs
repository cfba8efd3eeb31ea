//! Instrument metadata consumed by a reduction.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{Error, Result};

/// Geometry class of a spectrograph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
pub enum PipelineKind {
    MultiSlit,
    Echelle,
}

/// Arcseconds per spatial pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateScale {
    /// One value for the whole detector.
    Detector(f64),
    /// One value per echelle order, in region order.
    PerOrder(Vec<f64>),
}

/// Geodetic observatory position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observatory {
    /// Degrees, east positive.
    pub longitude: f64,
    /// Degrees.
    pub latitude: f64,
    /// Metres above sea level.
    pub altitude: f64,
}

impl Default for Observatory {
    /// Maunakea.
    fn default() -> Self {
        Self {
            longitude: -155.4681,
            latitude: 19.8283,
            altitude: 4160.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    pub pipeline: PipelineKind,
    #[serde(default = "default_detector")]
    pub detector: i32,
    pub plate_scale: PlateScale,
    /// Echelle order numbers, one per region.
    #[serde(default)]
    pub orders: Vec<i32>,
    #[serde(default = "default_binning")]
    pub spatial_binning: u32,
    #[serde(default)]
    pub observatory: Observatory,
}

fn default_detector() -> i32 {
    1
}

fn default_binning() -> u32 {
    1
}

impl Instrument {
    pub fn multislit(name: &str, plate_scale: f64) -> Self {
        Self {
            name: name.to_string(),
            pipeline: PipelineKind::MultiSlit,
            detector: default_detector(),
            plate_scale: PlateScale::Detector(plate_scale),
            orders: Vec::new(),
            spatial_binning: 1,
            observatory: Observatory::default(),
        }
    }

    pub fn echelle(name: &str, orders: Vec<i32>, plate_scales: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            pipeline: PipelineKind::Echelle,
            detector: default_detector(),
            plate_scale: PlateScale::PerOrder(plate_scales),
            orders,
            spatial_binning: 1,
            observatory: Observatory::default(),
        }
    }

    pub fn with_detector(mut self, detector: i32) -> Self {
        assert!(detector > 0, "detector numbers start at 1");
        self.detector = detector;
        self
    }

    pub fn with_spatial_binning(mut self, binning: u32) -> Self {
        assert!(binning >= 1, "binning must be at least 1");
        self.spatial_binning = binning;
        self
    }

    pub fn with_observatory(mut self, observatory: Observatory) -> Self {
        self.observatory = observatory;
        self
    }

    /// Binned arcseconds per pixel for region `r`.
    pub fn plate_scale_for(&self, r: usize) -> f64 {
        let unbinned = match &self.plate_scale {
            PlateScale::Detector(scale) => *scale,
            PlateScale::PerOrder(scales) => scales[r],
        };
        unbinned * self.spatial_binning as f64
    }

    /// Echelle order number of region `r`, if any.
    pub fn order_for(&self, r: usize) -> Option<i32> {
        self.orders.get(r).copied()
    }

    /// Check the per-order vectors against the number of regions.
    pub fn validate(&self, nregions: usize) -> Result<()> {
        if let PlateScale::PerOrder(scales) = &self.plate_scale {
            if scales.len() != nregions {
                return Err(Error::InvalidGeometry(format!(
                    "{} plate scales for {nregions} orders",
                    scales.len()
                )));
            }
        }
        if self.pipeline == PipelineKind::Echelle && self.orders.len() != nregions {
            return Err(Error::InvalidGeometry(format!(
                "{} order numbers for {nregions} orders",
                self.orders.len()
            )));
        }
        let bad_scale = match &self.plate_scale {
            PlateScale::Detector(scale) => !(*scale > 0.0),
            PlateScale::PerOrder(scales) => scales.iter().any(|s| !(*s > 0.0)),
        };
        if bad_scale {
            return Err(Error::InvalidGeometry(
                "plate scale must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yml::from_str(text)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read instrument file {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse instrument file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_kind_parses_from_name() {
        assert_eq!("Echelle".parse::<PipelineKind>().unwrap(), PipelineKind::Echelle);
        assert_eq!(PipelineKind::MultiSlit.to_string(), "MultiSlit");
        assert!("IFU".parse::<PipelineKind>().is_err());
    }

    #[test]
    fn test_plate_scale_per_order_with_binning() {
        let inst = Instrument::echelle("xshooter_nir", vec![20, 19], vec![0.2, 0.25])
            .with_spatial_binning(2);
        assert_eq!(inst.plate_scale_for(0), 0.4);
        assert_eq!(inst.plate_scale_for(1), 0.5);
        assert_eq!(inst.order_for(1), Some(19));
        assert_eq!(inst.order_for(2), None);
    }

    #[test]
    fn test_validate_counts() {
        let inst = Instrument::echelle("nires", vec![3, 4, 5], vec![0.15, 0.15]);
        assert!(matches!(inst.validate(3), Err(Error::InvalidGeometry(_))));
        assert!(Instrument::multislit("deimos", 0.1185).validate(7).is_ok());
        assert!(Instrument::multislit("broken", 0.0).validate(1).is_err());
    }

    #[test]
    fn test_from_yaml() {
        let text = r#"
name: keck_lris_red
pipeline: MultiSlit
plate_scale:
  detector: 0.135
spatial_binning: 2
"#;
        let inst = Instrument::from_yaml(text).unwrap();
        assert_eq!(inst.pipeline, PipelineKind::MultiSlit);
        assert_eq!(inst.detector, 1);
        assert!((inst.plate_scale_for(3) - 0.27).abs() < 1e-12);
    }
}
