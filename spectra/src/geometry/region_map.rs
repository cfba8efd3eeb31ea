use common::{BitBuffer2, Buffer2};

use super::RegionGeometry;

/// Pixel to region assignment; `-1` marks pixels outside every region.
///
/// A pixel `(x, y)` belongs to region `r` when `y` is in the region's
/// spectral range and `left[y] <= x < right[y]`. On overlap the lower
/// region id wins.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMap {
    ids: Buffer2<i32>,
}

impl RegionMap {
    pub fn build(geometry: &RegionGeometry, width: usize, height: usize) -> Self {
        let mut ids = Buffer2::new_filled(width, height, -1i32);
        for (r, region) in geometry.iter().enumerate() {
            for y in region.spec_range() {
                if y >= height {
                    break;
                }
                for x in region.columns_at(y, width) {
                    let id = ids.get_mut(x, y);
                    if *id < 0 {
                        *id = r as i32;
                    }
                }
            }
        }
        Self { ids }
    }

    #[inline]
    pub fn ids(&self) -> &Buffer2<i32> {
        &self.ids
    }

    #[inline]
    pub fn region_at(&self, x: usize, y: usize) -> Option<usize> {
        let id = self.ids[(x, y)];
        (id >= 0).then_some(id as usize)
    }

    #[inline]
    pub fn contains(&self, idx: usize, r: usize) -> bool {
        self.ids[idx] == r as i32
    }

    #[inline]
    pub fn in_any(&self, idx: usize) -> bool {
        self.ids[idx] >= 0
    }

    pub fn width(&self) -> usize {
        self.ids.width()
    }

    pub fn height(&self) -> usize {
        self.ids.height()
    }

    /// Linear indices of the pixels of region `r`, row-major.
    pub fn pixels(&self, r: usize) -> Vec<usize> {
        let id = r as i32;
        self.ids
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v == id)
            .map(|(i, _)| i)
            .collect()
    }

    /// Pixels of region `r` on row `y`.
    pub fn row_pixels(&self, r: usize, y: usize) -> impl Iterator<Item = usize> + '_ {
        let id = r as i32;
        let start = y * self.ids.width();
        self.ids
            .row(y)
            .iter()
            .enumerate()
            .filter(move |&(_, &v)| v == id)
            .map(move |(x, _)| start + x)
    }

    pub fn count(&self, r: usize) -> usize {
        let id = r as i32;
        self.ids.iter().filter(|&&v| v == id).count()
    }

    pub fn region_mask(&self, r: usize) -> BitBuffer2 {
        let id = r as i32;
        BitBuffer2::from_fn(self.width(), self.height(), |x, y| self.ids[(x, y)] == id)
    }
}
