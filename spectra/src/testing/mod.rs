//! Testing utilities for spectra.

#![allow(dead_code)]

pub mod synthetic;

use common::Buffer2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Seeded random source for reproducible synthetic data.
#[derive(Debug, Clone)]
pub struct TestRng {
    rng: StdRng,
}

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        self.rng.random::<f32>()
    }

    /// Standard normal deviate (Box-Muller).
    pub fn next_gaussian_f64(&mut self) -> f64 {
        let u1 = self.next_f64().max(f64::MIN_POSITIVE);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    pub fn next_gaussian_f32(&mut self) -> f32 {
        self.next_gaussian_f64() as f32
    }
}

/// Add deterministic Gaussian noise to a pixel slice.
pub fn add_gaussian_noise(pixels: &mut [f32], sigma: f32, seed: u64) {
    let mut rng = TestRng::new(seed);
    for p in pixels.iter_mut() {
        *p += rng.next_gaussian_f32() * sigma;
    }
}

/// Mean of `image` over columns `xs` and every row.
pub fn mean_over_columns(image: &Buffer2<f32>, xs: std::ops::Range<usize>) -> f64 {
    let (_, height) = image.shape();
    let count = xs.len() * height;
    let sum: f64 = (0..height)
        .flat_map(|y| xs.clone().map(move |x| (x, y)))
        .map(|(x, y)| image[(x, y)] as f64)
        .sum();
    sum / count.max(1) as f64
}
