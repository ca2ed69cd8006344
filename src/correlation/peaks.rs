//! Cluster-based maxima extraction on a toroidal field.
//!
//! The displacement PDF is thresholded at a histogram percentile, the
//! surviving pixels are flood-labeled into 8-connected clusters, clusters
//! broken across the periodic boundary are stitched back together, and the
//! value-weighted center of mass of each cluster becomes a candidate
//! maximum.

use arrayvec::ArrayVec;

use crate::common::Buffer2;

/// Number of histogram bins used to locate the threshold percentile.
const HISTOGRAM_BINS: usize = 4096;

/// One extracted maximum: mean value, center of mass and pixel count.
///
/// Centroid coordinates may fall slightly outside [0, n) when the cluster
/// straddles the periodic boundary; they are meaningful modulo the field
/// size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalMax {
    pub value: f64,
    pub x: f64,
    pub y: f64,
    pub area: usize,
}

/// Integer bounding box for cluster pixels, which may carry coordinates
/// shifted by +-width/height after a periodic merge.
#[derive(Debug, Clone, Copy)]
struct ClusterBox {
    min: (i64, i64),
    max: (i64, i64),
}

impl ClusterBox {
    fn reset() -> Self {
        Self {
            min: (i64::MAX, i64::MAX),
            max: (i64::MIN, i64::MIN),
        }
    }

    fn update(&mut self, x: i64, y: i64) {
        self.min.0 = self.min.0.min(x);
        self.min.1 = self.min.1.min(y);
        self.max.0 = self.max.0.max(x);
        self.max.1 = self.max.1.max(y);
    }
}

#[derive(Debug, Clone)]
struct Cluster {
    pixels: Vec<(i64, i64)>,
    bbox: ClusterBox,
}

const STENCIL: [(i64, i64); 8] = [
    // 4-connected:
    (0, -1),
    (-1, 0),
    (0, 1),
    (1, 0),
    // 8-connected:
    (-1, -1),
    (1, 1),
    (-1, 1),
    (1, -1),
];

const NO_CLUSTER: u32 = u32::MAX;

/// Find the maxima of `image` by thresholding at the given percentile and
/// classifying the surviving pixels into clusters.
///
/// `percentile` is the fraction of pixels that fall below the threshold;
/// 1 - percentile of the image survives. Records are sorted by value
/// descending. A field with zero, NaN or infinite value range has no peaks
/// and yields an empty list.
pub fn find_maxima_cm(image: &Buffer2<f32>, percentile: f64) -> Vec<LocalMax> {
    let w = image.width();
    let h = image.height();
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let mut v_min = f64::MAX;
    let mut v_max = -f64::MAX;
    for &v in image.pixels() {
        let v = v as f64;
        v_min = v_min.min(v);
        v_max = v_max.max(v);
    }
    let v_rng = v_max - v_min;

    // NaN is the only number not equal to itself.
    if v_rng == 0.0 || v_rng != v_rng || v_rng == f64::INFINITY {
        return Vec::new();
    }

    // Histogram and cumulative distribution of the values.
    let mut pdf = [0u32; HISTOGRAM_BINS];
    for &v in image.pixels() {
        let t = (v as f64 - v_min) / v_rng;
        let bin = (t * (HISTOGRAM_BINS - 1) as f64) as usize;
        pdf[bin.min(HISTOGRAM_BINS - 1)] += 1;
    }
    let mut cdf = [0u64; HISTOGRAM_BINS];
    cdf[0] = pdf[0] as u64;
    for i in 1..HISTOGRAM_BINS {
        cdf[i] = cdf[i - 1] + pdf[i] as u64;
    }

    // The first bin whose cumulative count reaches the percentile gives
    // the clipping threshold.
    let total = (w * h) as f64;
    let mut clip_min = 0.0;
    for i in 1..HISTOGRAM_BINS {
        clip_min = v_min + (i as f64 / (HISTOGRAM_BINS - 1) as f64) * v_rng;
        if cdf[i] as f64 >= percentile * total {
            break;
        }
    }

    // Threshold, then remap onto [0, 1] with the background at zero.
    let background = clip_min - v_rng * 1e-3;
    let scale = 1.0 / (v_max - background);
    let remapped: Vec<f64> = image
        .pixels()
        .iter()
        .map(|&v| {
            let v = v as f64;
            if v < clip_min {
                0.0
            } else {
                (v - background) * scale
            }
        })
        .collect();

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut cluster_map = vec![NO_CLUSTER; w * h];

    // Scanline pass: label 8-connected foreground pixels.
    for y in 0..h {
        for x in 0..w {
            if remapped[y * w + x] <= 0.0 {
                continue;
            }

            let mut neighbors: ArrayVec<u32, 8> = ArrayVec::new();
            for (dx, dy) in STENCIL {
                let u = x as i64 + dx;
                let v = y as i64 + dy;
                if u < 0 || v < 0 || u >= w as i64 || v >= h as i64 {
                    continue;
                }
                let id = cluster_map[v as usize * w + u as usize];
                if id != NO_CLUSTER && !neighbors.contains(&id) {
                    neighbors.push(id);
                }
            }

            if neighbors.is_empty() {
                let id = clusters.len() as u32;
                cluster_map[y * w + x] = id;
                let mut bbox = ClusterBox::reset();
                bbox.update(x as i64, y as i64);
                clusters.push(Cluster {
                    pixels: vec![(x as i64, y as i64)],
                    bbox,
                });
                continue;
            }

            // The lowest neighboring cluster id wins the merge.
            let id = *neighbors.iter().min().unwrap();
            cluster_map[y * w + x] = id;
            clusters[id as usize].pixels.push((x as i64, y as i64));
            clusters[id as usize].bbox.update(x as i64, y as i64);

            for &other in neighbors.iter().filter(|&&n| n != id) {
                let moved = std::mem::take(&mut clusters[other as usize].pixels);
                clusters[other as usize].bbox = ClusterBox::reset();
                for (px, py) in moved {
                    cluster_map[py as usize * w + px as usize] = id;
                    clusters[id as usize].pixels.push((px, py));
                    clusters[id as usize].bbox.update(px, py);
                }
            }
        }
    }

    // Second pass: merge clusters broken across the periodic boundary.
    merge_periodic(&mut clusters, &mut cluster_map, w, h);

    // Value-weighted center of mass per surviving cluster.
    let mut maxima = Vec::new();
    for cluster in &clusters {
        if cluster.pixels.is_empty() {
            continue;
        }

        let mut mx = 0.0;
        let mut my = 0.0;
        let mut mt = 0.0;
        for &(px, py) in &cluster.pixels {
            let ux = px.rem_euclid(w as i64) as usize;
            let uy = py.rem_euclid(h as i64) as usize;
            let m = remapped[uy * w + ux];
            // The unwrapped coordinate keeps boundary clusters contiguous.
            mx += m * px as f64;
            my += m * py as f64;
            mt += m;
        }

        maxima.push(LocalMax {
            value: mt / cluster.pixels.len() as f64,
            x: mx / mt,
            y: my / mt,
            area: cluster.pixels.len(),
        });
    }

    maxima.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
    maxima
}

/// Stitch together clusters that wrap around the field edges. A neighbor
/// cluster whose bounding box sits on the opposite side of the field is
/// shifted by the field size so its coordinates become contiguous with the
/// absorbing cluster.
fn merge_periodic(clusters: &mut [Cluster], cluster_map: &mut [u32], w: usize, h: usize) {
    let wi = w as i64;
    let hi = h as i64;

    for i in 0..clusters.len() {
        let mut idx = 0;
        // The pixel list grows while merging; newly absorbed pixels are
        // scanned as well.
        while idx < clusters[i].pixels.len() {
            let (px, py) = clusters[i].pixels[idx];
            idx += 1;

            let x = px.rem_euclid(wi);
            let y = py.rem_euclid(hi);

            for (dx, dy) in STENCIL {
                let u = (x + dx).rem_euclid(wi) as usize;
                let v = (y + dy).rem_euclid(hi) as usize;

                let other = cluster_map[v * w + u];
                if other == NO_CLUSTER || other as usize == i {
                    continue;
                }
                let other = other as usize;
                if clusters[other].pixels.is_empty() {
                    continue;
                }

                // Which boundaries was the neighbor broken across?
                let ba = clusters[i].bbox;
                let bb = clusters[other].bbox;
                let merge_x =
                    bb.max.0 - ba.min.0 > wi / 2 || ba.max.0 - bb.min.0 > wi / 2;
                let merge_y =
                    bb.max.1 - ba.min.1 > hi / 2 || ba.max.1 - bb.min.1 > hi / 2;

                let shift_x = if !merge_x {
                    0
                } else if ba.min.0 <= 0 {
                    -wi
                } else {
                    wi
                };
                let shift_y = if !merge_y {
                    0
                } else if ba.min.1 <= 0 {
                    -hi
                } else {
                    hi
                };

                let moved = std::mem::take(&mut clusters[other].pixels);
                clusters[other].bbox = ClusterBox::reset();
                for (qx, qy) in moved {
                    let ux = qx.rem_euclid(wi) as usize;
                    let uy = qy.rem_euclid(hi) as usize;
                    cluster_map[uy * w + ux] = i as u32;

                    let sx = qx + shift_x;
                    let sy = qy + shift_y;
                    clusters[i].pixels.push((sx, sy));
                    clusters[i].bbox.update(sx, sy);
                }
            }
        }
    }
}

/// Discard maxima whose mass (area * value) is below the given ratio of
/// the total mass of all maxima.
pub fn threshold_maxima(maxima: &mut Vec<LocalMax>, threshold: f64) {
    let total_mass: f64 = maxima.iter().map(|m| m.area as f64 * m.value).sum();
    let threshold_mass = threshold * total_mass;
    maxima.retain(|m| m.area as f64 * m.value >= threshold_mass);
}

/// Discard maxima that are worse than the best by more than the given
/// factor. Returns the number of survivors.
pub fn reject_negligible_maxima(maxima: &mut Vec<LocalMax>, threshold: f64) -> usize {
    let best = maxima.iter().map(|m| m.value).fold(0.0, f64::max);
    maxima.retain(|m| m.value > 0.0 && best / m.value <= threshold);
    maxima.len()
}
