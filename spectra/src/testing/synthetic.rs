//! Synthetic detector frames with straight regions and Gaussian sources.

use common::Buffer2;

use crate::frame::{PixelMask, ScienceFrame};
use crate::geometry::{RegionGeometry, RegionTrace};
use crate::math::statistics::FWHM_TO_SIGMA;
use crate::reduce::Calibrations;

/// Wavelength at row 0, in Angstrom.
pub const WAVE_START: f64 = 5000.0;
/// Dispersion in Angstrom per spectral row.
pub const DISPERSION: f64 = 0.5;

/// A point source dispersed along the spectral axis.
#[derive(Debug, Clone, Copy)]
pub struct Source {
    /// Spatial centre in pixels.
    pub x: f64,
    pub fwhm: f64,
    /// Counts per spectral row.
    pub flux: f64,
}

/// Builder for a frame of straight regions on a flat sky.
#[derive(Debug, Clone)]
pub struct Scene {
    pub width: usize,
    pub height: usize,
    pub regions: Vec<(f64, f64)>,
    pub sky: f32,
    /// Gaussian noise sigma per pixel; zero gives a noiseless frame with unit ivar.
    pub noise: f32,
    pub rn2: f32,
    pub sources: Vec<Source>,
    pub seed: u64,
}

impl Scene {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            regions: Vec::new(),
            sky: 0.0,
            noise: 0.0,
            rn2: 0.0,
            sources: Vec::new(),
            seed: 42,
        }
    }

    pub fn with_region(mut self, left: f64, right: f64) -> Self {
        self.regions.push((left, right));
        self
    }

    pub fn with_sky(mut self, sky: f32) -> Self {
        self.sky = sky;
        self
    }

    pub fn with_noise(mut self, sigma: f32, seed: u64) -> Self {
        self.noise = sigma;
        self.seed = seed;
        self
    }

    pub fn with_rn2(mut self, rn2: f32) -> Self {
        self.rn2 = rn2;
        self
    }

    pub fn with_source(mut self, x: f64, fwhm: f64, flux: f64) -> Self {
        self.sources.push(Source { x, fwhm, flux });
        self
    }

    /// Noiseless sky plus sources.
    pub fn model(&self) -> Buffer2<f32> {
        let mut image = Buffer2::new_filled(self.width, self.height, self.sky);
        for source in &self.sources {
            let profile = source_profile(source, self.width);
            for y in 0..self.height {
                for (x, p) in image.row_mut(y).iter_mut().enumerate() {
                    *p += (source.flux * profile[x]) as f32;
                }
            }
        }
        image
    }

    pub fn image(&self) -> Buffer2<f32> {
        let mut image = self.model();
        if self.noise > 0.0 {
            super::add_gaussian_noise(image.pixels_mut(), self.noise, self.seed);
        }
        image
    }

    pub fn ivar(&self) -> Buffer2<f32> {
        let value = if self.noise > 0.0 {
            1.0 / (self.noise * self.noise)
        } else {
            1.0
        };
        Buffer2::new_filled(self.width, self.height, value)
    }

    pub fn frame(&self) -> ScienceFrame {
        self.frame_with_mask(None)
    }

    pub fn frame_with_mask(&self, mask: Option<Buffer2<PixelMask>>) -> ScienceFrame {
        ScienceFrame::new(
            self.image(),
            self.ivar(),
            Buffer2::new_filled(self.width, self.height, self.rn2),
            mask,
        )
        .unwrap()
    }

    pub fn geometry(&self) -> RegionGeometry {
        RegionGeometry::new(
            self.regions
                .iter()
                .map(|&(l, r)| RegionTrace::straight(l, r, self.height))
                .collect(),
        )
    }

    pub fn calibrations(&self) -> Calibrations {
        Calibrations::new()
            .with_geometry(self.geometry())
            .with_tilts(tilts(self.width, self.height))
            .with_waveimg(wavelength_map(self.width, self.height))
    }
}

/// Discrete Gaussian profile over all columns, normalized to unit sum.
pub fn source_profile(source: &Source, width: usize) -> Vec<f64> {
    let sigma = source.fwhm / FWHM_TO_SIGMA;
    let mut profile: Vec<f64> = (0..width)
        .map(|x| (-0.5 * ((x as f64 - source.x) / sigma).powi(2)).exp())
        .collect();
    let sum: f64 = profile.iter().sum();
    profile.iter_mut().for_each(|p| *p /= sum);
    profile
}

/// Untilted spectral coordinate: the row index.
pub fn tilts(width: usize, height: usize) -> Buffer2<f64> {
    Buffer2::from_fn(width, height, |_, y| y as f64)
}

pub fn wavelength_map(width: usize, height: usize) -> Buffer2<f64> {
    Buffer2::from_fn(width, height, |_, y| WAVE_START + DISPERSION * y as f64)
}

/// Two slits on a noisy flat sky with one bright source in the first.
pub fn two_slit_scene() -> Scene {
    Scene::new(110, 200)
        .with_region(10.0, 50.0)
        .with_region(60.0, 100.0)
        .with_sky(100.0)
        .with_noise(5.0, 7)
        .with_source(30.0, 4.0, 2000.0)
}

/// Four adjacent echelle orders of width 30 with one source at mid-slit,
/// bright in the first orders and absent from the last.
pub fn echelle_scene(fluxes: &[f64]) -> Scene {
    let mut scene = Scene::new(10 + 32 * fluxes.len(), 160);
    for (i, &flux) in fluxes.iter().enumerate() {
        let left = 5.0 + 32.0 * i as f64;
        scene = scene.with_region(left, left + 30.0);
        if flux != 0.0 {
            scene = scene.with_source(left + 15.0, 4.0, flux);
        }
    }
    scene
}
