//! Mosaic refinement driver.
//!
//! Each pass warps every mobile tile into mosaic space, correlates a
//! neighborhood around every control point against every overlapping
//! neighbor, regularizes the resulting displacement fields and folds them
//! back into the transforms. Refinement stops when the mean absolute
//! displacement drops below the threshold, stops improving, or the pass
//! limit is reached.

pub(crate) mod config;
pub(crate) mod displace;
pub(crate) mod error;
pub(crate) mod regularize;
pub(crate) mod warp;


use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use glam::DVec2;

use crate::common::{Buffer2, ProgressSink};
use crate::math::bbox::DAabb;
use crate::pool::{Abort, ThreadPool, Transaction, WorkerContext, execute_inline};
use crate::transform::{ControlLattice, MosaicTransform};

pub use config::RefineConfig;
pub use error::RefineError;
pub use warp::{WarpedTile, duplicate_tile, mosaic_bbox, warp_tile};

use displace::{PairSource, calc_displacements};
use regularize::regularize_displacements;

/// One input tile: pixels, an optional validity mask and the tile's
/// physical frame.
#[derive(Debug, Clone)]
pub struct MosaicTile {
    pub image: Buffer2<f32>,
    pub mask: Option<Buffer2<u8>>,
    pub origin: DVec2,
    pub spacing: DVec2,
}

impl MosaicTile {
    /// Tile with origin zero and unit spacing.
    pub fn new(image: Buffer2<f32>) -> Self {
        Self {
            image,
            mask: None,
            origin: DVec2::ZERO,
            spacing: DVec2::ONE,
        }
    }

    pub fn with_mask(mut self, mask: Buffer2<u8>) -> Self {
        assert_eq!(
            (mask.width(), mask.height()),
            (self.image.width(), self.image.height()),
            "mask dimensions must match the image"
        );
        self.mask = Some(mask);
        self
    }

    /// The tile's bounding box in its own physical frame.
    pub fn bbox(&self) -> DAabb {
        let ext = DVec2::new(
            self.spacing.x * self.image.width() as f64,
            self.spacing.y * self.image.height() as f64,
        );
        DAabb::new(self.origin, self.origin + ext)
    }
}

/// Summary of a refinement run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefineReport {
    /// Passes actually executed.
    pub passes: usize,
    /// Mean absolute per-component displacement of the final pass.
    pub mean_displacement: f64,
    /// Largest absolute displacement component of the final pass.
    pub max_displacement: f64,
}

/// Refine the transforms of a tile set in place.
///
/// Transforms are read and written through `transforms`; tile 0 is left
/// untouched when `keep_first_tile_fixed` is set. Per-control-point and
/// per-tile failures are recovered internally; only contract violations
/// return an error, in which case nothing has been mutated.
pub fn refine_mosaic(
    tiles: &[MosaicTile],
    transforms: &mut [MosaicTransform],
    config: &RefineConfig,
    progress: &dyn ProgressSink,
) -> Result<RefineReport, RefineError> {
    config.validate();

    if tiles.is_empty() {
        return Err(RefineError::EmptyTileSet);
    }
    if tiles.len() != transforms.len() {
        return Err(RefineError::CountMismatch {
            tiles: tiles.len(),
            transforms: transforms.len(),
        });
    }
    for (index, tile) in tiles.iter().enumerate() {
        if tile.spacing != tiles[0].spacing {
            return Err(RefineError::SpacingMismatch {
                index,
                expected: tiles[0].spacing,
                actual: tile.spacing,
            });
        }
    }

    let num_tiles = tiles.len();
    let mut report = RefineReport::default();
    if num_tiles < 2 {
        return Ok(report);
    }

    let start = if config.keep_first_tile_fixed { 1 } else { 0 };
    let num_threads = match config.num_threads {
        0 => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        n => n,
    };

    // Control lattices are fixed across passes; only their mosaic
    // positions move.
    let lattices: Vec<ControlLattice> = tiles
        .iter()
        .zip(transforms.iter())
        .map(|(tile, transform)| {
            transform.control_lattice(&tile.bbox(), config.control_rows, config.control_cols)
        })
        .collect();

    // Mosaic bounding boxes drive neighbor discovery.
    let bboxes: Vec<DAabb> = tiles
        .iter()
        .zip(transforms.iter())
        .map(|(tile, transform)| mosaic_bbox(tile, transform))
        .collect();

    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); num_tiles];
    for (i, neighbor_list) in neighbors.iter_mut().enumerate().skip(start) {
        for j in 0..num_tiles {
            if i != j && bboxes[i].intersects(&bboxes[j]) {
                neighbor_list.push(j);
            }
        }
    }

    tracing::info!(num_tiles, num_threads, "refining mosaic");

    // Every tile enters the warped set as-is; prewarping replaces the
    // mobile entries each pass.
    let mut warped: Vec<Arc<WarpedTile>> =
        tiles.iter().map(|t| Arc::new(duplicate_tile(t))).collect();

    let mut last_average = f64::MAX;

    thread::scope(|scope| {
        let pool = (num_threads > 1).then(|| ThreadPool::new(scope, num_threads));

        for pass in 0..config.num_passes {
            progress.set_major(0.15 + 0.8 * pass as f64 / config.num_passes as f64);
            tracing::info!(pass, "--------------------------- pass");

            if config.prewarp_tiles {
                let (tx, rx) = mpsc::channel();
                let mut schedule: Vec<Box<dyn Transaction + Send + '_>> = Vec::new();
                for i in start..num_tiles {
                    schedule.push(Box::new(WarpTileTransaction {
                        tile_index: i,
                        tile: &tiles[i],
                        transform: transforms[i].clone(),
                        out: tx.clone(),
                    }));
                }
                drop(tx);
                run_schedule(&pool, schedule);
                for (i, tile) in rx {
                    warped[i] = Arc::new(tile);
                }
            }
            progress.set_minor(0.2);

            // Mosaic coordinates of every control point under the current
            // transforms.
            let centers: Vec<Arc<Vec<Option<DVec2>>>> = (0..num_tiles)
                .map(|i| {
                    let points = if i < start {
                        Vec::new()
                    } else {
                        lattices[i]
                            .uv
                            .iter()
                            .map(|&uv| transforms[i].transform_inv(uv))
                            .collect()
                    };
                    Arc::new(points)
                })
                .collect();

            let snapshot: Arc<Vec<MosaicTransform>> = Arc::new(transforms.to_vec());

            let (tx, rx) = mpsc::channel();
            let mut schedule: Vec<Box<dyn Transaction + Send + '_>> = Vec::new();
            for i in start..num_tiles {
                schedule.push(Box::new(RefineTileTransaction {
                    tile_index: i,
                    tiles,
                    transforms: Arc::clone(&snapshot),
                    warped: warped.clone(),
                    neighbors: &neighbors[i],
                    centers: Arc::clone(&centers[i]),
                    lattice_rows: lattices[i].rows,
                    lattice_cols: lattices[i].cols,
                    config,
                    out: tx.clone(),
                }));
            }
            drop(tx);
            run_schedule(&pool, schedule);

            let mut shifts: Vec<Vec<DVec2>> = vec![Vec::new(); num_tiles];
            for (i, shift) in rx {
                shifts[i] = shift;
            }

            // Fold the displacements back into the transforms; a tile
            // whose transaction aborted keeps its transform for this pass.
            for i in start..num_tiles {
                if shifts[i].is_empty() {
                    continue;
                }
                let ok = transforms[i].apply_displacements(&lattices[i], &centers[i], &shifts[i]);
                if !ok {
                    tracing::warn!(tile = i, "parameter fit refused, keeping previous transform");
                }
            }

            let mut worst = 0.0f64;
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for shift in &shifts {
                for s in shift {
                    worst = worst.max(s.x.abs()).max(s.y.abs());
                    sum += s.x.abs() + s.y.abs();
                    count += 2;
                }
            }
            let average = if count > 0 { sum / count as f64 } else { 0.0 };

            tracing::info!(pass, average, max = worst, "displacement");
            progress.set_minor(0.9);

            report = RefineReport {
                passes: pass + 1,
                mean_displacement: average,
                max_displacement: worst,
            };

            if count > 0 {
                if average <= config.displacement_threshold {
                    break;
                }
                if average >= last_average {
                    break;
                }
                last_average = average;
            }
        }
    });

    Ok(report)
}

/// Run a schedule on the pool, or inline when a single worker was
/// requested. Both paths execute the same transaction code.
fn run_schedule<'scope>(
    pool: &Option<ThreadPool<'scope>>,
    schedule: Vec<Box<dyn Transaction + Send + 'scope>>,
) {
    match pool {
        Some(pool) => {
            pool.push_schedule(schedule);
            pool.pre_distribute_work();
            pool.start();
            pool.wait();
        }
        None => {
            execute_inline(schedule);
        }
    }
}

/// Warp one tile into mosaic space.
struct WarpTileTransaction<'a> {
    tile_index: usize,
    tile: &'a MosaicTile,
    transform: MosaicTransform,
    out: mpsc::Sender<(usize, WarpedTile)>,
}

impl Transaction for WarpTileTransaction<'_> {
    fn execute(&mut self, ctx: &WorkerContext) -> Result<(), Abort> {
        ctx.terminate_on_request()?;
        tracing::debug!(tile = self.tile_index, "warping image tile");
        let warped = warp_tile(self.tile, &self.transform);
        self.out
            .send((self.tile_index, warped))
            .map_err(|_| Abort::new("warp result channel closed"))
    }
}

/// Estimate, regularize and blend the displacement field of one tile
/// against all of its neighbors.
struct RefineTileTransaction<'a> {
    tile_index: usize,
    tiles: &'a [MosaicTile],
    transforms: Arc<Vec<MosaicTransform>>,
    warped: Vec<Arc<WarpedTile>>,
    neighbors: &'a [usize],
    centers: Arc<Vec<Option<DVec2>>>,
    lattice_rows: usize,
    lattice_cols: usize,
    config: &'a RefineConfig,
    out: mpsc::Sender<(usize, Vec<DVec2>)>,
}

impl Transaction for RefineTileTransaction<'_> {
    fn execute(&mut self, ctx: &WorkerContext) -> Result<(), Abort> {
        let i = self.tile_index;
        let mesh_size = self.centers.len();

        let mut shift = vec![DVec2::ZERO; mesh_size];
        let mut mass = vec![0.0f64; mesh_size];

        for &j in self.neighbors {
            ctx.terminate_on_request()?;
            tracing::debug!(tile = i, neighbor = j, "matching");

            let fixed = PairSource {
                tile: &self.tiles[j],
                transform: &self.transforms[j],
                warped: &*self.warped[j],
            };
            let moving = PairSource {
                tile: &self.tiles[i],
                transform: &self.transforms[i],
                warped: &*self.warped[i],
            };

            let field = calc_displacements(
                &fixed,
                &moving,
                self.config.prewarp_tiles,
                &self.centers,
                self.lattice_rows,
                self.lattice_cols,
                self.config,
                ctx,
            )?;

            // Each neighbor pulls through its own regularization; masses
            // accumulate across neighbors.
            let mut pull = vec![DVec2::ZERO; mesh_size];
            regularize_displacements(&mut pull, &mut mass, &field, self.config.median_radius);
            for (s, p) in shift.iter_mut().zip(&pull) {
                *s += *p;
            }
        }

        if !self.config.keep_first_tile_fixed {
            for (s, &m) in shift.iter_mut().zip(&mass) {
                *s *= 1.0 / (1.0 + m);
            }
        }

        self.out
            .send((i, shift))
            .map_err(|_| Abort::new("refine result channel closed"))
    }
}
