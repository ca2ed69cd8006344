//! Tile transforms: the polynomial and triangle-mesh families behind one
//! tagged variant.
//!
//! Every transform maps a mosaic-space point to the tile's own coordinate
//! frame (`transform`) and back (`transform_inv`). The refinement driver
//! dispatches on the variant for the few operations that differ: where the
//! control points live and how a displacement field is folded back into
//! the transform.

pub(crate) mod grid;
pub(crate) mod legendre;

#[cfg(test)]
mod tests;

use glam::DVec2;

use crate::math::bbox::DAabb;

pub use grid::{AccelerationGrid, GridTransform, MeshTransform, Triangle, Vertex};
pub use legendre::{LegendreTransform, index_a};

/// Control lattice of one tile: tile-space anchors ordered row-major over
/// (rows + 1) x (cols + 1).
#[derive(Debug, Clone)]
pub struct ControlLattice {
    pub rows: usize,
    pub cols: usize,
    pub uv: Vec<DVec2>,
}

/// A tile's placement in the mosaic, as one of the supported transform
/// families.
#[derive(Debug, Clone)]
pub enum MosaicTransform {
    /// Bivariate Legendre polynomial warp.
    Polynomial(LegendreTransform),
    /// Regular control-point lattice with two triangles per quad.
    Grid(GridTransform),
    /// Arbitrary externally triangulated mesh.
    Mesh(MeshTransform),
}

impl MosaicTransform {
    /// Map a mosaic point into the tile frame. `None` when the point
    /// falls outside the mesh (the polynomial family is total).
    pub fn transform(&self, xy: DVec2) -> Option<DVec2> {
        match self {
            MosaicTransform::Polynomial(t) => Some(t.transform(xy)),
            MosaicTransform::Grid(t) => t.transform(xy),
            MosaicTransform::Mesh(t) => t.transform(xy),
        }
    }

    /// Map a tile point into mosaic space.
    pub fn transform_inv(&self, uv: DVec2) -> Option<DVec2> {
        match self {
            MosaicTransform::Polynomial(t) => t.transform_inv(uv),
            MosaicTransform::Grid(t) => t.transform_inv(uv),
            MosaicTransform::Mesh(t) => t.transform_inv(uv),
        }
    }

    /// The control points driving refinement for this transform.
    ///
    /// Mesh families use their own vertices; the polynomial family gets an
    /// implicit lattice of `default_rows` x `default_cols` quads spanning
    /// the tile bounding box.
    pub fn control_lattice(
        &self,
        tile_bbox: &DAabb,
        default_rows: usize,
        default_cols: usize,
    ) -> ControlLattice {
        match self {
            MosaicTransform::Polynomial(_) => {
                let rows = default_rows.max(1);
                let cols = default_cols.max(1);
                let ext = tile_bbox.extent();
                let mut uv = Vec::with_capacity((rows + 1) * (cols + 1));
                for r in 0..=rows {
                    for c in 0..=cols {
                        let frac = DVec2::new(c as f64 / cols as f64, r as f64 / rows as f64);
                        uv.push(tile_bbox.min + frac * ext);
                    }
                }
                ControlLattice { rows, cols, uv }
            }
            MosaicTransform::Grid(t) => ControlLattice {
                rows: t.rows(),
                cols: t.cols(),
                uv: t.grid.mesh.iter().map(|v| v.uv).collect(),
            },
            MosaicTransform::Mesh(t) => {
                // An arbitrary triangulation has no lattice shape; treat
                // the vertex list as a single row so the displacement
                // images stay 1-D.
                let n = t.grid.mesh.len();
                ControlLattice {
                    rows: 0,
                    cols: n.saturating_sub(1),
                    uv: t.grid.mesh.iter().map(|v| v.uv).collect(),
                }
            }
        }
    }

    /// Fold a per-control-point displacement field back into the
    /// transform.
    ///
    /// Mesh families displace their vertices directly and rebuild their
    /// acceleration state. The polynomial family refits its parameters so
    /// the displaced mosaic positions map onto the tile anchors; a refused
    /// fit (rank deficient) leaves the previous parameters in place and
    /// returns false.
    pub fn apply_displacements(
        &mut self,
        lattice: &ControlLattice,
        centers: &[Option<DVec2>],
        shift: &[DVec2],
    ) -> bool {
        match self {
            MosaicTransform::Polynomial(t) => {
                let mut mosaic = Vec::with_capacity(shift.len());
                let mut tile = Vec::with_capacity(shift.len());
                for ((center, &s), &uv) in centers.iter().zip(shift).zip(&lattice.uv) {
                    if let Some(c) = center {
                        mosaic.push(*c + s);
                        tile.push(uv);
                    }
                }
                t.solve_for_parameters(0, t.degree() + 1, &mosaic, &tile)
            }
            MosaicTransform::Grid(t) => {
                t.grid.update(shift);
                true
            }
            MosaicTransform::Mesh(t) => {
                t.grid.update(shift);
                true
            }
        }
    }
}
