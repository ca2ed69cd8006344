//! Per-control-point displacement estimation between one tile pair.
//!
//! For every control point of the moving tile, a fixed-size neighborhood
//! is cropped around its mosaic coordinate from both tiles, gated on mask
//! overlap, and fed to phase correlation. The best candidate translation
//! whose implied overlap stays inside the configured window becomes the
//! point's displacement estimate.

use glam::DVec2;

use crate::common::Buffer2;
use crate::correlation::{CorrelationConfig, best_translation, find_correlation};
use crate::pool::{Abort, WorkerContext};
use crate::refine::config::RefineConfig;
use crate::refine::warp::{WarpedTile, sample_through, sample_warped};
use crate::refine::MosaicTile;
use crate::transform::MosaicTransform;

/// Raw displacement lattice for one (tile, neighbor) pair: per-point
/// estimates dx/dy and the confidence plane db (0 = no estimate,
/// 1 = accepted).
#[derive(Debug, Clone)]
pub(crate) struct DisplacementField {
    pub dx: Buffer2<f64>,
    pub dy: Buffer2<f64>,
    pub db: Buffer2<f64>,
}

impl DisplacementField {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            dx: Buffer2::new_filled(width, height, 0.0),
            dy: Buffer2::new_filled(width, height, 0.0),
            db: Buffer2::new_filled(width, height, 0.0),
        }
    }
}

/// One side of a correlation pair.
pub(crate) struct PairSource<'a> {
    pub tile: &'a MosaicTile,
    pub transform: &'a MosaicTransform,
    pub warped: &'a WarpedTile,
}

/// Estimate displacements for every control point of the moving tile
/// against one fixed neighbor.
///
/// `centers` holds the mosaic coordinates of the moving tile's control
/// points, row-major over a (rows + 1) x (cols + 1) lattice; points the
/// transform failed to resolve carry `None` and stay unconfident.
pub(crate) fn calc_displacements(
    fixed: &PairSource<'_>,
    moving: &PairSource<'_>,
    tiles_already_warped: bool,
    centers: &[Option<DVec2>],
    lattice_rows: usize,
    lattice_cols: usize,
    config: &RefineConfig,
    ctx: &WorkerContext,
) -> Result<DisplacementField, Abort> {
    let width = lattice_cols + 1;
    let height = lattice_rows + 1;
    debug_assert_eq!(centers.len(), width * height);

    let mut field = DisplacementField::new(width, height);

    let w = config.neighborhood;
    let spacing = moving.tile.spacing;
    let correlation = CorrelationConfig {
        lp_radius: config.lp_radius,
        lp_sharpness: config.lp_sharpness,
        overlap_min: config.minimum_overlap,
        overlap_max: config.maximum_overlap,
    };

    // Scratch reused across control points.
    let mut img0 = Buffer2::new_filled(w, w, 0.0f32);
    let mut img1 = Buffer2::new_filled(w, w, 0.0f32);
    let mut msk0 = Buffer2::new_filled(w, w, 0u8);
    let mut msk1 = Buffer2::new_filled(w, w, 0u8);

    for (idx, center) in centers.iter().enumerate() {
        ctx.terminate_on_request()?;

        let Some(center) = *center else {
            continue;
        };

        if tiles_already_warped {
            extract_window(fixed.warped, center, spacing, &mut img0, &mut msk0);
            extract_window(moving.warped, center, spacing, &mut img1, &mut msk1);
        } else {
            extract_window_through(fixed, center, spacing, &mut img0, &mut msk0);
            extract_window_through(moving, center, spacing, &mut img1, &mut msk1);
        }

        // The pair must share enough valid pixels before correlation is
        // worth running.
        let both = msk0
            .pixels()
            .iter()
            .zip(msk1.pixels())
            .filter(|&(&a, &b)| a > 0 && b > 0)
            .count();
        if (both as f64) < config.minimum_overlap * (w * w) as f64 {
            continue;
        }

        fill_masked(&mut img0, &msk0);
        fill_masked(&mut img1, &msk1);

        let maxima = find_correlation(&img0, &img1, &correlation);
        let Some(t) = best_translation(
            &maxima,
            w,
            w,
            w as f64,
            w as f64,
            config.minimum_overlap,
            config.maximum_overlap,
        ) else {
            continue;
        };

        // The peak measures where the moving window sits relative to the
        // fixed one; the mesh must move the opposite way.
        let shift = -t * spacing;
        field.dx[idx] = shift.x;
        field.dy[idx] = shift.y;
        field.db[idx] = 1.0;
    }

    Ok(field)
}

/// Crop a window centered on a mosaic point from a warped tile.
fn extract_window(
    warped: &WarpedTile,
    center: DVec2,
    spacing: DVec2,
    img: &mut Buffer2<f32>,
    msk: &mut Buffer2<u8>,
) {
    let w = img.width();
    let half = (w / 2) as f64;
    for y in 0..img.height() {
        for x in 0..w {
            let p = center + spacing * DVec2::new(x as f64 - half, y as f64 - half);
            let (value, valid) = sample_warped(warped, p);
            img[(x, y)] = value;
            msk[(x, y)] = valid;
        }
    }
}

/// Crop a window by sampling the original tile through its transform
/// (the not-prewarped path: inverse-warp, then crop).
fn extract_window_through(
    source: &PairSource<'_>,
    center: DVec2,
    spacing: DVec2,
    img: &mut Buffer2<f32>,
    msk: &mut Buffer2<u8>,
) {
    let w = img.width();
    let half = (w / 2) as f64;
    for y in 0..img.height() {
        for x in 0..w {
            let p = center + spacing * DVec2::new(x as f64 - half, y as f64 - half);
            let (value, valid) = sample_through(source.tile, source.transform, p);
            img[(x, y)] = value;
            msk[(x, y)] = valid;
        }
    }
}

/// Replace masked-out pixels with the mean of the valid ones, so the FFT
/// sees no artificial step at the mask boundary.
fn fill_masked(img: &mut Buffer2<f32>, msk: &Buffer2<u8>) {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (&v, &m) in img.pixels().iter().zip(msk.pixels()) {
        if m > 0 {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        return;
    }
    let mean = (sum / count as f64) as f32;
    for (v, &m) in img.pixels_mut().iter_mut().zip(msk.pixels()) {
        if m == 0 {
            *v = mean;
        }
    }
}
