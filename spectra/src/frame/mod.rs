//! Science frame: flux, inverse variance, read-noise variance and pixel mask.

use common::Buffer2;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};

/// Named conditions a pixel can be flagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum MaskFlag {
    BadPixel,
    CosmicRay,
    Saturated,
    MinCounts,
    OffRegion,
    IsNan,
    IvarZero,
    IvarNan,
    /// Extraction was attempted on this pixel and failed.
    Extract,
}

impl MaskFlag {
    #[inline]
    pub const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Set of [`MaskFlag`]s for one pixel. Empty means good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixelMask(u16);

impl PixelMask {
    pub const GOOD: PixelMask = PixelMask(0);

    pub fn from_flags(flags: &[MaskFlag]) -> Self {
        let mut mask = Self::GOOD;
        for &flag in flags {
            mask.insert(flag);
        }
        mask
    }

    #[inline]
    pub fn is_good(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, flag: MaskFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    #[inline]
    pub fn insert(&mut self, flag: MaskFlag) {
        self.0 |= flag.bit();
    }

    #[inline]
    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn flags(self) -> impl Iterator<Item = MaskFlag> {
        MaskFlag::iter().filter(move |&f| self.contains(f))
    }
}

/// One exposure's pixel data.
///
/// The flux array is never modified once the frame is built; stages only add
/// flags to the mask.
#[derive(Debug, Clone)]
pub struct ScienceFrame {
    image: Buffer2<f32>,
    ivar: Buffer2<f32>,
    rn2: Buffer2<f32>,
    mask: Buffer2<PixelMask>,
}

impl ScienceFrame {
    /// Build a frame, flagging non-finite flux and non-positive or
    /// non-finite inverse variance on top of the supplied mask.
    pub fn new(
        image: Buffer2<f32>,
        ivar: Buffer2<f32>,
        rn2: Buffer2<f32>,
        mask: Option<Buffer2<PixelMask>>,
    ) -> Result<Self> {
        let shape = image.shape();
        check_shape("ivar", shape, ivar.shape())?;
        check_shape("rn2", shape, rn2.shape())?;
        let mut mask = match mask {
            Some(mask) => {
                check_shape("mask", shape, mask.shape())?;
                mask
            }
            None => Buffer2::new_default(shape.0, shape.1),
        };

        for (idx, m) in mask.iter_mut().enumerate() {
            if !image[idx].is_finite() {
                m.insert(MaskFlag::IsNan);
            }
            let iv = ivar[idx];
            if !iv.is_finite() {
                m.insert(MaskFlag::IvarNan);
            } else if iv <= 0.0 {
                m.insert(MaskFlag::IvarZero);
            }
        }

        Ok(Self {
            image,
            ivar,
            rn2,
            mask,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.image.height()
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.image.shape()
    }

    #[inline]
    pub fn image(&self) -> &Buffer2<f32> {
        &self.image
    }

    #[inline]
    pub fn ivar(&self) -> &Buffer2<f32> {
        &self.ivar
    }

    #[inline]
    pub fn rn2(&self) -> &Buffer2<f32> {
        &self.rn2
    }

    #[inline]
    pub fn mask(&self) -> &Buffer2<PixelMask> {
        &self.mask
    }

    #[inline]
    pub fn is_good(&self, idx: usize) -> bool {
        self.mask[idx].is_good()
    }

    #[inline]
    pub(crate) fn flag(&mut self, idx: usize, flag: MaskFlag) {
        self.mask[idx].insert(flag);
    }

    /// Number of pixels carrying `flag`.
    pub fn count_flag(&self, flag: MaskFlag) -> usize {
        self.mask.iter().filter(|m| m.contains(flag)).count()
    }

    /// Pixel-wise negation of the flux, used by the differencing pass.
    pub fn negated_image(&self) -> Buffer2<f32> {
        self.image.map(|v| -v)
    }
}

pub(crate) fn check_shape(
    what: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests;
