//! Fixed-aperture extraction.

use common::Buffer2;

use super::ExtractInput;
use crate::candidate::{ObjectCandidate, Spectrum};

/// Fraction of pixel `x` (covering `[x - 0.5, x + 0.5]`) inside `[lo, hi]`.
#[inline]
fn overlap(x: f64, lo: f64, hi: f64) -> f64 {
    ((x + 0.5).min(hi) - (x - 0.5).max(lo)).clamp(0.0, 1.0)
}

/// Sum sky-subtracted flux within `radius` pixels of `trace` in region `r`.
///
/// Pixels for which `good` is false are skipped and the sum is scaled up by
/// the aperture fraction they cover. Rows with no good pixel are masked.
pub fn boxcar_spectrum(
    input: &ExtractInput<'_>,
    sky: &Buffer2<f32>,
    good: impl Fn(usize) -> bool,
    r: usize,
    trace: &[f64],
    radius: f64,
) -> Spectrum {
    let (width, height) = input.image.shape();
    let mut spec = Spectrum::zeros(height);
    let region = input.geometry.region(r);

    for y in region.spec_range() {
        if y >= height {
            break;
        }
        let (lo, hi) = (trace[y] - radius, trace[y] + radius);
        let mut total_w = 0.0;
        let mut good_w = 0.0;
        let mut flux = 0.0;
        let mut var = 0.0;
        let mut nvar = 0.0;
        let mut sky_sum = 0.0;
        let mut wave_sum = 0.0;
        for idx in input.region_map.row_pixels(r, y) {
            let w = overlap((idx % width) as f64, lo, hi);
            if w <= 0.0 {
                continue;
            }
            total_w += w;
            let iv = input.ivar[idx] as f64;
            if !good(idx) || iv <= 0.0 {
                continue;
            }
            let s = sky[idx] as f64;
            good_w += w;
            flux += w * (input.image[idx] as f64 - s);
            var += w * w / iv;
            nvar += w * w * (input.rn2[idx] as f64 + s.abs());
            sky_sum += w * s;
            wave_sum += w * input.waveimg[idx];
        }
        if good_w <= 0.0 {
            continue;
        }

        let scale = total_w / good_w;
        spec.counts[y] = (flux * scale) as f32;
        spec.ivar[y] = (1.0 / (var * scale * scale)) as f32;
        spec.nivar[y] = if nvar > 0.0 {
            (1.0 / (nvar * scale * scale)) as f32
        } else {
            0.0
        };
        spec.sky[y] = (sky_sum * scale) as f32;
        spec.wave[y] = wave_sum / good_w;
        spec.npix[y] = good_w as f32;
        spec.mask[y] = true;
    }
    spec
}

/// Boxcar-extract `candidate` against `sky` using the frame mask.
pub fn boxcar_extract(
    input: &ExtractInput<'_>,
    sky: &Buffer2<f32>,
    candidate: &mut ObjectCandidate,
    radius: f64,
) {
    let spec = boxcar_spectrum(
        input,
        sky,
        |idx| input.mask[idx].is_good(),
        candidate.region,
        &candidate.trace,
        radius,
    );
    candidate.boxcar = Some(spec);
}
