//! Detected or forced source traces and their extracted spectra.

use strum_macros::Display;

/// Polarity of the image a candidate was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Sign {
    Positive,
    Negative,
}

/// Echelle bookkeeping for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchelleId {
    /// Physical order number.
    pub order: i32,
    /// Index of the order in the region geometry.
    pub order_index: usize,
    /// Object id shared by the same source across orders.
    pub obj_id: i32,
}

/// One extracted 1-D spectrum, indexed by spectral row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spectrum {
    pub counts: Vec<f32>,
    pub ivar: Vec<f32>,
    /// Inverse variance from read noise and sky alone.
    pub nivar: Vec<f32>,
    pub wave: Vec<f64>,
    pub sky: Vec<f32>,
    /// Number of (fractional) pixels contributing per row.
    pub npix: Vec<f32>,
    pub mask: Vec<bool>,
}

impl Spectrum {
    pub fn zeros(nspec: usize) -> Self {
        Self {
            counts: vec![0.0; nspec],
            ivar: vec![0.0; nspec],
            nivar: vec![0.0; nspec],
            wave: vec![0.0; nspec],
            sky: vec![0.0; nspec],
            npix: vec![0.0; nspec],
            mask: vec![false; nspec],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of counts over valid rows.
    pub fn total_counts(&self) -> f64 {
        self.counts
            .iter()
            .zip(&self.mask)
            .filter(|&(_, &ok)| ok)
            .map(|(&c, _)| c as f64)
            .sum()
    }

    /// Median per-row signal-to-noise over valid rows.
    pub fn median_snr(&self) -> f64 {
        let mut snr: Vec<f64> = (0..self.len())
            .filter(|&i| self.mask[i] && self.ivar[i] > 0.0)
            .map(|i| self.counts[i] as f64 * (self.ivar[i] as f64).sqrt())
            .collect();
        crate::math::statistics::median_mut(&mut snr)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCandidate {
    pub region: usize,
    /// 1-based id within the region (multislit) or across orders (echelle).
    /// Negated for candidates from the negative image.
    pub obj_id: i32,
    pub echelle: Option<EchelleId>,
    /// Spatial pixel position for every spectral row of the detector.
    pub trace: Vec<f64>,
    /// Slit fraction at the reference row.
    pub spat_fraction: f64,
    /// Spatial position at the reference row.
    pub spat_pixpos: f64,
    /// Spatial FWHM in pixels.
    pub fwhm: f64,
    /// Detection significance.
    pub snr: f64,
    pub sign: Sign,
    pub hand_extract: bool,
    pub boxcar: Option<Spectrum>,
    pub optimal: Option<Spectrum>,
    /// Applied flexure shift in spectral pixels.
    pub flexure_shift: Option<f64>,
    /// Applied radial-velocity correction in km/s.
    pub velocity_correction: Option<f64>,
}

impl ObjectCandidate {
    pub fn new(region: usize, trace: Vec<f64>, fwhm: f64, snr: f64) -> Self {
        Self {
            region,
            obj_id: 0,
            echelle: None,
            trace,
            spat_fraction: 0.0,
            spat_pixpos: 0.0,
            fwhm,
            snr,
            sign: Sign::Positive,
            hand_extract: false,
            boxcar: None,
            optimal: None,
            flexure_shift: None,
            velocity_correction: None,
        }
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.sign == Sign::Negative
    }

    /// Canonical object name, e.g. `SPAT0123-SLIT0001-DET01` or
    /// `OBJ0001-ORDER0035-DET01`.
    pub fn name(&self, detector: i32) -> String {
        match self.echelle {
            Some(ech) => format!(
                "OBJ{:04}-ORDER{:04}-DET{:02}",
                ech.obj_id, ech.order, detector
            ),
            None => format!(
                "SPAT{:04}-SLIT{:04}-DET{:02}",
                self.spat_pixpos.round() as i64,
                self.region,
                detector
            ),
        }
    }
}

/// Insertion-ordered set of candidates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Candidates {
    items: Vec<ObjectCandidate>,
}

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, candidate: ObjectCandidate) {
        self.items.push(candidate);
    }

    pub fn extend(&mut self, other: Candidates) {
        self.items.extend(other.items);
    }

    /// Append candidates from the negated image: tagged negative, ids negated.
    pub fn append_negated(&mut self, other: Candidates) {
        for mut candidate in other.items {
            candidate.sign = Sign::Negative;
            candidate.obj_id = -candidate.obj_id.abs();
            if let Some(ech) = candidate.echelle.as_mut() {
                ech.obj_id = -ech.obj_id.abs();
            }
            self.items.push(candidate);
        }
    }

    /// Drop every negative candidate.
    pub fn purge_negative(&mut self) {
        self.items.retain(|c| !c.is_negative());
    }

    pub fn retain(&mut self, f: impl FnMut(&ObjectCandidate) -> bool) {
        self.items.retain(f);
    }

    pub fn with_sign(&self, sign: Sign) -> impl Iterator<Item = &ObjectCandidate> {
        self.items.iter().filter(move |c| c.sign == sign)
    }

    pub fn count(&self, sign: Sign) -> usize {
        self.with_sign(sign).count()
    }

    pub fn in_region(&self, r: usize) -> impl Iterator<Item = &ObjectCandidate> {
        self.items.iter().filter(move |c| c.region == r)
    }

    pub fn in_region_mut(&mut self, r: usize) -> Vec<&mut ObjectCandidate> {
        self.items.iter_mut().filter(|c| c.region == r).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ObjectCandidate> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ObjectCandidate> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[ObjectCandidate] {
        &self.items
    }
}

impl From<Vec<ObjectCandidate>> for Candidates {
    fn from(items: Vec<ObjectCandidate>) -> Self {
        Self { items }
    }
}

impl std::ops::Index<usize> for Candidates {
    type Output = ObjectCandidate;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.items[idx]
    }
}

impl<'a> IntoIterator for &'a Candidates {
    type Item = &'a ObjectCandidate;
    type IntoIter = std::slice::Iter<'a, ObjectCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
