//! Slit and order boundary traces.
//!
//! A region is the area between a left and a right edge trace, each giving
//! one spatial coordinate per spectral row, restricted to a spectral range.

mod region_map;

pub use region_map::RegionMap;

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minimum usable region width in pixels.
pub const MIN_REGION_WIDTH: f64 = 3.0;

/// Boundary traces of one slit or order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionTrace {
    left: Vec<f64>,
    right: Vec<f64>,
    spec_range: Range<usize>,
    #[serde(default)]
    masked: bool,
}

impl RegionTrace {
    /// Region valid over every row covered by the traces.
    pub fn new(left: Vec<f64>, right: Vec<f64>) -> Self {
        assert_eq!(left.len(), right.len(), "edge traces differ in length");
        let spec_range = 0..left.len();
        Self {
            left,
            right,
            spec_range,
            masked: false,
        }
    }

    /// Region with straight edges at constant spatial positions.
    pub fn straight(left: f64, right: f64, nspec: usize) -> Self {
        Self::new(vec![left; nspec], vec![right; nspec])
    }

    pub fn with_spec_range(mut self, range: Range<usize>) -> Self {
        assert!(
            range.start < range.end && range.end <= self.left.len(),
            "spectral range {range:?} outside traces of length {}",
            self.left.len()
        );
        self.spec_range = range;
        self
    }

    #[inline]
    pub fn left(&self) -> &[f64] {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &[f64] {
        &self.right
    }

    #[inline]
    pub fn spec_range(&self) -> Range<usize> {
        self.spec_range.clone()
    }

    #[inline]
    pub fn contains_row(&self, row: usize) -> bool {
        self.spec_range.contains(&row)
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.masked
    }

    #[inline]
    pub fn width_at(&self, row: usize) -> f64 {
        self.right[row] - self.left[row]
    }

    #[inline]
    pub fn center_at(&self, row: usize) -> f64 {
        0.5 * (self.left[row] + self.right[row])
    }

    /// Spatial pixel coordinate of slit fraction `frac` at `row`.
    #[inline]
    pub fn spat_at(&self, row: usize, frac: f64) -> f64 {
        self.left[row] + frac * self.width_at(row)
    }

    /// Slit fraction of spatial coordinate `x` at `row`.
    #[inline]
    pub fn frac_at(&self, row: usize, x: f64) -> f64 {
        (x - self.left[row]) / self.width_at(row)
    }

    /// Reference row used for summary positions (middle of the valid range).
    #[inline]
    pub fn reference_row(&self) -> usize {
        (self.spec_range.start + self.spec_range.end) / 2
    }

    /// Median width over the valid range.
    pub fn median_width(&self) -> f64 {
        let mut widths: Vec<f64> = self.spec_range().map(|y| self.width_at(y)).collect();
        crate::math::statistics::median_mut(&mut widths)
    }

    /// Integer column range `[ceil(left), ceil(right))` at `row`, clipped to
    /// `0..ncols`.
    pub fn columns_at(&self, row: usize, ncols: usize) -> Range<usize> {
        let lo = self.left[row].ceil().max(0.0) as usize;
        let hi = (self.right[row].ceil().max(0.0) as usize).min(ncols);
        lo.min(hi)..hi
    }

    /// A trace at constant slit fraction.
    pub fn trace_at_frac(&self, frac: f64) -> Vec<f64> {
        (0..self.left.len()).map(|y| self.spat_at(y, frac)).collect()
    }

    /// True when the region is too narrow or inverted anywhere in its range.
    pub fn is_degenerate(&self) -> bool {
        self.spec_range.is_empty()
            || self
                .spec_range()
                .any(|y| !(self.width_at(y) >= MIN_REGION_WIDTH))
    }
}

/// Ordered set of regions on one detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionGeometry {
    regions: Vec<RegionTrace>,
}

impl RegionGeometry {
    pub fn new(regions: Vec<RegionTrace>) -> Self {
        Self { regions }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[inline]
    pub fn region(&self, r: usize) -> &RegionTrace {
        &self.regions[r]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionTrace> {
        self.regions.iter()
    }

    /// Indices of regions not masked.
    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.regions.len()).filter(|&r| !self.regions[r].masked)
    }

    #[inline]
    pub fn is_masked(&self, r: usize) -> bool {
        self.regions[r].masked
    }

    /// Exclude region `r` for the rest of the reduction. Never cleared.
    pub fn mask_region(&mut self, r: usize) {
        self.regions[r].masked = true;
    }

    pub fn masked_regions(&self) -> Vec<usize> {
        (0..self.regions.len())
            .filter(|&r| self.regions[r].masked)
            .collect()
    }

    /// Check trace lengths against the detector's spectral size and edge
    /// ordering inside each valid range.
    pub fn validate(&self, nspec: usize) -> Result<()> {
        for (r, region) in self.regions.iter().enumerate() {
            if region.left.len() != nspec {
                return Err(Error::InvalidGeometry(format!(
                    "region {r}: traces have {} rows, detector has {nspec}",
                    region.left.len()
                )));
            }
            if let Some(y) = region
                .spec_range()
                .find(|&y| !(region.left[y] < region.right[y]))
            {
                return Err(Error::InvalidGeometry(format!(
                    "region {r}: left edge not below right edge at row {y}"
                )));
            }
        }
        Ok(())
    }
}
