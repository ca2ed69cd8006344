//! Phase correlation between two neighborhoods.
//!
//! Both images are padded to a common size and transformed; the normalized
//! cross-power spectrum (Girod-Kuo) is inverse-transformed into a
//! displacement probability density, displacements whose implied tile
//! overlap falls outside the configured window are masked out, and the
//! surviving density is scanned for cluster maxima.

pub(crate) mod peaks;


use glam::DVec2;
use rustfft::num_complex::Complex;

use crate::common::Buffer2;
use crate::fft::{Fft2d, FftImage};

pub use peaks::{LocalMax, find_maxima_cm, reject_negligible_maxima, threshold_maxima};

/// Stabilizer added to the cross-power magnitude before normalization.
const CROSS_POWER_EPSILON: f32 = 1e-8;

/// Settings for one phase-correlation evaluation.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Low-pass cutoff radius in [0, 1] (fraction of Nyquist). Default: 0.5.
    pub lp_radius: f64,
    /// Low-pass sharpness in [0, 1]; 0 is an ideal cutoff, 1 a raised
    /// cosine rolloff. Default: 0.9.
    pub lp_sharpness: f64,
    /// Lower bound on the fractional overlap a candidate displacement may
    /// imply. Default: 0.25.
    pub overlap_min: f64,
    /// Upper bound on the fractional overlap (1.0 disables). Default: 1.0.
    pub overlap_max: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lp_radius: 0.5,
            lp_sharpness: 0.9,
            overlap_min: 0.25,
            overlap_max: 1.0,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) {
        assert!(
            (0.0..=1.0).contains(&self.lp_radius),
            "lp_radius must be in [0, 1], got {}",
            self.lp_radius
        );
        assert!(
            (0.0..=1.0).contains(&self.lp_sharpness),
            "lp_sharpness must be in [0, 1], got {}",
            self.lp_sharpness
        );
        assert!(
            self.overlap_min >= 0.0 && self.overlap_min <= self.overlap_max,
            "overlap bounds must satisfy 0 <= min <= max"
        );
        assert!(self.overlap_max <= 1.0, "overlap_max must be <= 1.0");
    }
}

/// Fractional overlap two tiles of size (sx, sy) would retain under a
/// relative displacement `d`.
#[inline]
pub fn overlap_fraction(sx: f64, sy: f64, d: DVec2) -> f64 {
    if sx <= 0.0 || sy <= 0.0 {
        return 0.0;
    }
    let ox = (sx - d.x.abs()).max(0.0);
    let oy = (sy - d.y.abs()).max(0.0);
    (ox * oy) / (sx * sy)
}

/// Correlate `moving` against `fixed` and return ranked candidate maxima of
/// the displacement PDF.
///
/// An empty list means no reliable match: either the PDF was degenerate
/// (zero, NaN or infinite range) or no displacement satisfies the overlap
/// window.
pub fn find_correlation(
    fixed: &Buffer2<f32>,
    moving: &Buffer2<f32>,
    config: &CorrelationConfig,
) -> Vec<LocalMax> {
    find_correlation_with_fill(fixed, moving, mean(fixed), mean(moving), config)
}

/// [`find_correlation`] with explicit padding fill values instead of the
/// image means.
pub fn find_correlation_with_fill(
    fixed: &Buffer2<f32>,
    moving: &Buffer2<f32>,
    fixed_fill: f32,
    moving_fill: f32,
    config: &CorrelationConfig,
) -> Vec<LocalMax> {
    config.validate();

    let nx = fixed.width().max(moving.width());
    let ny = fixed.height().max(moving.height());
    if nx == 0 || ny == 0 {
        return Vec::new();
    }

    let plan = Fft2d::new(nx, ny);

    let mut f0 = FftImage::new(nx, ny);
    plan.forward_real(fixed, fixed_fill, &mut f0);
    f0.apply_lp_filter(config.lp_radius, config.lp_sharpness);

    let mut f1 = FftImage::new(nx, ny);
    plan.forward_real(moving, moving_fill, &mut f1);
    f1.apply_lp_filter(config.lp_radius, config.lp_sharpness);

    // Normalized cross-power spectrum; its inverse transform is the phase
    // correlation surface.
    let mut p = FftImage::new(nx, ny);
    for (out, (&a, &b)) in p
        .data_mut()
        .iter_mut()
        .zip(f1.data().iter().zip(f0.data()))
    {
        let p10 = a * b.conj();
        *out = p10 / (p10.norm() + CROSS_POWER_EPSILON);
    }

    // Resampled data produces a less noisy PDF and needs less smoothing.
    p.apply_lp_filter(config.lp_radius * 0.8, config.lp_sharpness);

    plan.inverse(&mut p);
    let mut pdf = p.real();

    let overlap_area = mask_pdf_by_overlap(
        &mut pdf,
        fixed.width() as f64,
        fixed.height() as f64,
        config.overlap_min,
        config.overlap_max,
    );
    if overlap_area == 0 {
        return Vec::new();
    }

    // Between 5 and 64 pixels of the overlap zone may be attributed to
    // maxima clusters.
    let area = overlap_area as f64;
    let fraction = (64.0 / area).min((5.0 / area).max(1e-2));
    if fraction >= 1.0 {
        return Vec::new();
    }

    find_maxima_cm(&pdf, 1.0 - fraction)
}

/// Pick the best candidate translation whose implied overlap between tiles
/// of size (tile_w, tile_h) lies inside [overlap_min, overlap_max].
///
/// Centroids are interpreted toroidally on the (nx, ny) PDF grid and
/// unwrapped to signed displacements.
pub fn best_translation(
    maxima: &[LocalMax],
    nx: usize,
    ny: usize,
    tile_w: f64,
    tile_h: f64,
    overlap_min: f64,
    overlap_max: f64,
) -> Option<DVec2> {
    for m in maxima {
        let t = unwrap_displacement(m, nx, ny);
        let overlap = overlap_fraction(tile_w, tile_h, t);
        if overlap >= overlap_min && overlap <= overlap_max {
            return Some(t);
        }
    }
    None
}

/// Convert a toroidal centroid into a signed displacement in
/// (-n/2, n/2] per axis.
pub fn unwrap_displacement(m: &LocalMax, nx: usize, ny: usize) -> DVec2 {
    let wrap = |c: f64, n: f64| {
        let c = c.rem_euclid(n);
        if c > n / 2.0 { c - n } else { c }
    };
    DVec2::new(wrap(m.x, nx as f64), wrap(m.y, ny as f64))
}

fn mean(image: &Buffer2<f32>) -> f32 {
    if image.is_empty() {
        return 0.0;
    }
    image.pixels().iter().sum::<f32>() / image.len() as f32
}

/// Write the PDF minimum into every displacement whose induced overlap
/// falls outside [overlap_min, overlap_max]. Displacements are toroidal:
/// (x, y) and its three mirrored quadrant images describe the same
/// unsigned displacement, so all four are tested and all four written.
///
/// Returns the number of pixels left inside the overlap zone.
fn mask_pdf_by_overlap(
    pdf: &mut Buffer2<f32>,
    tile_w: f64,
    tile_h: f64,
    overlap_min: f64,
    overlap_max: f64,
) -> usize {
    let nx = pdf.width();
    let ny = pdf.height();
    let v_min = pdf.pixels().iter().cloned().fold(f32::MAX, f32::min);

    let mut in_zone = 0usize;
    for y in 0..=ny / 2 {
        for x in 0..=nx / 2 {
            let quadrants = [
                DVec2::new(x as f64, y as f64),
                DVec2::new((nx - x) as f64, y as f64),
                DVec2::new(x as f64, (ny - y) as f64),
                DVec2::new((nx - x) as f64, (ny - y) as f64),
            ];
            let overlapping = quadrants.iter().any(|&d| {
                let overlap = overlap_fraction(tile_w, tile_h, d);
                overlap >= overlap_min && overlap <= overlap_max
            });
            if overlapping {
                in_zone += 4;
                continue;
            }

            pdf[(x, y)] = v_min;
            pdf[(nx - 1 - x, y)] = v_min;
            pdf[(x, ny - 1 - y)] = v_min;
            pdf[(nx - 1 - x, ny - 1 - y)] = v_min;
        }
    }
    in_zone
}
