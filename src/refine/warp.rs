//! Warping tiles into mosaic space.
//!
//! The warped image covers the tile's mosaic bounding box; every output
//! pixel is mapped through the transform into the tile frame and sampled
//! bilinearly. Masks travel with their tiles and use nearest-neighbor
//! sampling, so a warped pixel is valid only where its source was.

use glam::DVec2;
use rayon::prelude::*;

use crate::common::Buffer2;
use crate::math::bbox::DAabb;
use crate::refine::MosaicTile;
use crate::transform::MosaicTransform;

/// Lattice resolution used when sampling a transform to estimate a tile's
/// mosaic bounding box.
const BBOX_SAMPLES: usize = 16;

/// Row count above which tile warping fans out across rayon workers.
const PARALLEL_ROW_THRESHOLD: usize = 64;

/// A tile resampled into mosaic space, with its own origin.
#[derive(Debug, Clone)]
pub struct WarpedTile {
    pub image: Buffer2<f32>,
    pub mask: Buffer2<u8>,
    pub origin: DVec2,
    pub spacing: DVec2,
}

/// Estimate a tile's axis-aligned mosaic bounding box by pushing a
/// BBOX_SAMPLES x BBOX_SAMPLES lattice of tile points through the inverse
/// transform. Lattice points the transform cannot resolve are skipped;
/// when nothing resolves the tile's own box is used.
pub fn mosaic_bbox(tile: &MosaicTile, transform: &MosaicTransform) -> DAabb {
    let tile_box = tile.bbox();
    let ext = tile_box.extent();

    let mut bbox = DAabb::empty();
    for r in 0..=BBOX_SAMPLES {
        for c in 0..=BBOX_SAMPLES {
            let frac = DVec2::new(
                c as f64 / BBOX_SAMPLES as f64,
                r as f64 / BBOX_SAMPLES as f64,
            );
            if let Some(xy) = transform.transform_inv(tile_box.min + frac * ext) {
                bbox.include(xy);
            }
        }
    }

    if bbox.is_empty() { tile_box } else { bbox }
}

/// Warp a tile (and its mask) into mosaic space through its transform.
pub fn warp_tile(tile: &MosaicTile, transform: &MosaicTransform) -> WarpedTile {
    let bbox = mosaic_bbox(tile, transform);
    let ext = bbox.extent();
    let nx = ((ext.x / tile.spacing.x).ceil() as usize).max(1);
    let ny = ((ext.y / tile.spacing.y).ceil() as usize).max(1);

    let mut image = Buffer2::new_filled(nx, ny, 0.0f32);
    let mut mask = Buffer2::new_filled(nx, ny, 0u8);

    let warp_row = |y: usize, image_row: &mut [f32], mask_row: &mut [u8]| {
        for x in 0..nx {
            let p = bbox.min + tile.spacing * DVec2::new(x as f64, y as f64);
            let (value, valid) = sample_through(tile, transform, p);
            image_row[x] = value;
            mask_row[x] = valid;
        }
    };

    if ny >= PARALLEL_ROW_THRESHOLD {
        image
            .pixels_mut()
            .par_chunks_mut(nx)
            .zip(mask.pixels_mut().par_chunks_mut(nx))
            .enumerate()
            .for_each(|(y, (image_row, mask_row))| warp_row(y, image_row, mask_row));
    } else {
        let image_pixels = image.pixels_mut();
        let mask_pixels = mask.pixels_mut();
        for y in 0..ny {
            let image_row = &mut image_pixels[y * nx..(y + 1) * nx];
            let mask_row = &mut mask_pixels[y * nx..(y + 1) * nx];
            warp_row(y, image_row, mask_row);
        }
    }

    WarpedTile {
        image,
        mask,
        origin: bbox.min,
        spacing: tile.spacing,
    }
}

/// Copy a tile into the warped set unchanged, with an all-on mask where no
/// mask was supplied.
pub fn duplicate_tile(tile: &MosaicTile) -> WarpedTile {
    let mask = match &tile.mask {
        Some(m) => m.clone(),
        None => Buffer2::new_filled(tile.image.width(), tile.image.height(), 1u8),
    };
    WarpedTile {
        image: tile.image.clone(),
        mask,
        origin: tile.origin,
        spacing: tile.spacing,
    }
}

/// Sample a tile at a mosaic point through its transform. Returns the
/// bilinear value and a validity flag.
#[inline]
pub(crate) fn sample_through(
    tile: &MosaicTile,
    transform: &MosaicTransform,
    p: DVec2,
) -> (f32, u8) {
    let Some(uv) = transform.transform(p) else {
        return (0.0, 0);
    };
    let q = (uv - tile.origin) / tile.spacing;
    let w = tile.image.width();
    let h = tile.image.height();
    if q.x < 0.0 || q.y < 0.0 || q.x > (w - 1) as f64 || q.y > (h - 1) as f64 {
        return (0.0, 0);
    }

    let valid = match &tile.mask {
        Some(mask) => {
            let mx = (q.x.round() as usize).min(w - 1);
            let my = (q.y.round() as usize).min(h - 1);
            mask[(mx, my)] > 0
        }
        None => true,
    };
    if !valid {
        return (0.0, 0);
    }

    (bilinear(&tile.image, q), 1)
}

/// Sample a warped tile at a mosaic point. Returns the bilinear value and
/// the nearest-neighbor mask state.
#[inline]
pub(crate) fn sample_warped(warped: &WarpedTile, p: DVec2) -> (f32, u8) {
    let q = (p - warped.origin) / warped.spacing;
    let w = warped.image.width();
    let h = warped.image.height();
    if q.x < 0.0 || q.y < 0.0 || q.x > (w - 1) as f64 || q.y > (h - 1) as f64 {
        return (0.0, 0);
    }

    let mx = (q.x.round() as usize).min(w - 1);
    let my = (q.y.round() as usize).min(h - 1);
    if warped.mask[(mx, my)] == 0 {
        return (0.0, 0);
    }

    (bilinear(&warped.image, q), 1)
}

/// Bilinear interpolation with clamped border handling. The caller has
/// already bounds-checked `q` against [0, w-1] x [0, h-1].
#[inline]
fn bilinear(image: &Buffer2<f32>, q: DVec2) -> f32 {
    let w = image.width();
    let h = image.height();

    let x0 = q.x.floor() as usize;
    let y0 = q.y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (q.x - x0 as f64) as f32;
    let fy = (q.y - y0 as f64) as f32;

    let p00 = image[(x0, y0)];
    let p10 = image[(x1, y0)];
    let p01 = image[(x0, y1)];
    let p11 = image[(x1, y1)];

    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);
    top + fy * (bottom - top)
}
