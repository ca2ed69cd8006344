//! Synthetic inputs shared by the unit tests.

use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::Buffer2;
use crate::transform::GridTransform;

/// Seeded random texture with enough broadband structure to correlate
/// well: white noise softened by two toroidal box-blur passes.
pub fn textured_image(w: usize, h: usize, seed: u64) -> Buffer2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = Buffer2::new_default(w, h);
    for v in img.pixels_mut() {
        *v = rng.random_range(0.0..1.0);
    }
    for _ in 0..2 {
        img = box_blur_wrapped(&img);
    }
    img
}

/// Cyclic shift: the result holds `img` with every feature moved by
/// (dx, dy), wrapping around the edges.
pub fn cyclic_shift(img: &Buffer2<f32>, dx: i64, dy: i64) -> Buffer2<f32> {
    let w = img.width() as i64;
    let h = img.height() as i64;
    let mut out = Buffer2::new_default(img.width(), img.height());
    for y in 0..h {
        for x in 0..w {
            let sx = (x - dx).rem_euclid(w) as usize;
            let sy = (y - dy).rem_euclid(h) as usize;
            out[(x as usize, y as usize)] = img[(sx, sy)];
        }
    }
    out
}

/// Copy a rectangular region out of a larger scene.
pub fn crop(scene: &Buffer2<f32>, x0: usize, y0: usize, w: usize, h: usize) -> Buffer2<f32> {
    assert!(x0 + w <= scene.width() && y0 + h <= scene.height());
    let mut out = Buffer2::new_default(w, h);
    for y in 0..h {
        for x in 0..w {
            out[(x, y)] = scene[(x0 + x, y0 + y)];
        }
    }
    out
}

/// Grid transform placing a (0,0)-origin tile of the given pixel size at
/// `offset` in mosaic space, with no internal distortion.
pub fn identity_grid(rows: usize, cols: usize, w: f64, h: f64, offset: DVec2) -> GridTransform {
    let mut xy = Vec::new();
    for r in 0..=rows {
        for c in 0..=cols {
            let frac = DVec2::new(c as f64 / cols as f64, r as f64 / rows as f64);
            xy.push(DVec2::new(frac.x * w, frac.y * h) + offset);
        }
    }
    GridTransform::setup(rows, cols, DVec2::ZERO, DVec2::new(w, h), &xy)
}

fn box_blur_wrapped(img: &Buffer2<f32>) -> Buffer2<f32> {
    let w = img.width() as i64;
    let h = img.height() as i64;
    let mut out = Buffer2::new_default(img.width(), img.height());
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let sx = (x + dx).rem_euclid(w) as usize;
                    let sy = (y + dy).rem_euclid(h) as usize;
                    sum += img[(sx, sy)];
                }
            }
            out[(x as usize, y as usize)] = sum / 9.0;
        }
    }
    out
}
