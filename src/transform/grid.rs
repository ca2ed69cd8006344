//! Discontinuous triangle-mesh transforms.
//!
//! A lattice of vertices carries two coordinate sets: `uv`, fixed at setup
//! and spanning the tile, and `xy`, the mutable mosaic-space positions the
//! refinement driver displaces. Triangles precompute barycentric edge
//! coefficients in both spaces so containment tests and interpolation are
//! a few multiply-adds, and a cell-indexed acceleration grid provides the
//! broad phase for point queries in either direction.

use glam::DVec2;

use crate::math::bbox::DAabb;

/// One mesh vertex: fixed tile coordinates and mutable mosaic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Normalized tile space coordinates, typically in [0, 1] x [0, 1].
    pub uv: DVec2,
    /// Mosaic space coordinates.
    pub xy: DVec2,
}

/// Triangle over three vertex indices in counterclockwise winding, with
/// precomputed barycentric coefficients for both coordinate spaces.
///
/// The weight of vertex 1 at a point p is `pwb[0] + pwb[1]*p.x +
/// pwb[2]*p.y` (pwc gives vertex 2); the weights go stale whenever a
/// referenced vertex moves and are refreshed by
/// [`AccelerationGrid::rebuild`].
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub vertex: [usize; 3],
    xy_pwb: [f64; 3],
    xy_pwc: [f64; 3],
    uv_pwb: [f64; 3],
    uv_pwc: [f64; 3],
}

impl Triangle {
    fn new(v0: usize, v1: usize, v2: usize) -> Self {
        Self {
            vertex: [v0, v1, v2],
            xy_pwb: [0.0; 3],
            xy_pwc: [0.0; 3],
            uv_pwb: [0.0; 3],
            uv_pwc: [0.0; 3],
        }
    }

    fn precompute(&mut self, mesh: &[Vertex]) {
        let [i0, i1, i2] = self.vertex;
        let (a, b) = affine_weights(mesh[i0].xy, mesh[i1].xy, mesh[i2].xy);
        self.xy_pwb = a;
        self.xy_pwc = b;
        let (a, b) = affine_weights(mesh[i0].uv, mesh[i1].uv, mesh[i2].uv);
        self.uv_pwb = a;
        self.uv_pwc = b;
    }

    #[inline]
    fn weights(pwb: &[f64; 3], pwc: &[f64; 3], p: DVec2) -> (f64, f64, f64) {
        let wb = pwb[0] + pwb[1] * p.x + pwb[2] * p.y;
        let wc = pwc[0] + pwc[1] * p.x + pwc[2] * p.y;
        (1.0 - wb - wc, wb, wc)
    }

    /// Test an xy-point for containment; on a hit return the interpolated
    /// uv-point.
    pub fn xy_intersect(&self, mesh: &[Vertex], xy: DVec2) -> Option<DVec2> {
        let (wa, wb, wc) = Self::weights(&self.xy_pwb, &self.xy_pwc, xy);
        if !inside(wa, wb, wc) {
            return None;
        }
        let [i0, i1, i2] = self.vertex;
        Some(wa * mesh[i0].uv + wb * mesh[i1].uv + wc * mesh[i2].uv)
    }

    /// Test a uv-point for containment; on a hit return the interpolated
    /// xy-point.
    pub fn uv_intersect(&self, mesh: &[Vertex], uv: DVec2) -> Option<DVec2> {
        let (wa, wb, wc) = Self::weights(&self.uv_pwb, &self.uv_pwc, uv);
        if !inside(wa, wb, wc) {
            return None;
        }
        let [i0, i1, i2] = self.vertex;
        Some(wa * mesh[i0].xy + wb * mesh[i1].xy + wc * mesh[i2].xy)
    }

    /// Barycentric weights of an xy-point, for Jacobian queries.
    pub fn xy_weights(&self, xy: DVec2) -> (f64, f64, f64) {
        Self::weights(&self.xy_pwb, &self.xy_pwc, xy)
    }
}

#[inline]
fn inside(wa: f64, wb: f64, wc: f64) -> bool {
    (0.0..=1.0).contains(&wa) && (0.0..=1.0).contains(&wb) && (0.0..=1.0).contains(&wc)
}

/// Affine coefficient rows for the barycentric weights of p1 and p2 in the
/// triangle (p0, p1, p2). A degenerate triangle yields NaN coefficients,
/// which fail every subsequent containment test.
fn affine_weights(p0: DVec2, p1: DVec2, p2: DVec2) -> ([f64; 3], [f64; 3]) {
    let d1 = p1 - p0;
    let d2 = p2 - p0;
    let den = d1.x * d2.y - d1.y * d2.x;

    let pwb = [
        (p0.y * d2.x - p0.x * d2.y) / den,
        d2.y / den,
        -d2.x / den,
    ];
    let pwc = [
        (d1.y * p0.x - d1.x * p0.y) / den,
        -d1.y / den,
        d1.x / den,
    ];
    (pwb, pwc)
}

/// Cell-indexed broad phase for triangle containment queries, maintained
/// in parallel over uv space and xy space.
#[derive(Debug, Clone)]
pub struct AccelerationGrid {
    pub mesh: Vec<Vertex>,
    pub tri: Vec<Triangle>,

    xy_cells: Vec<Vec<u32>>,
    uv_cells: Vec<Vec<u32>>,
    rows: usize,
    cols: usize,

    /// Mosaic-space bounding box over all vertices.
    pub xy_min: DVec2,
    pub xy_ext: DVec2,

    uv_min: DVec2,
    uv_ext: DVec2,
}

impl AccelerationGrid {
    pub fn new() -> Self {
        Self {
            mesh: Vec::new(),
            tri: Vec::new(),
            xy_cells: Vec::new(),
            uv_cells: Vec::new(),
            rows: 0,
            cols: 0,
            xy_min: DVec2::ZERO,
            xy_ext: DVec2::ZERO,
            uv_min: DVec2::ZERO,
            uv_ext: DVec2::ZERO,
        }
    }

    /// Reallocate the cell arrays.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.xy_cells = vec![Vec::new(); rows * cols];
        self.uv_cells = vec![Vec::new(); rows * cols];
    }

    /// Recompute triangle coefficients, vertex bounding boxes and cell
    /// memberships. Must run after every xy mutation and before any query.
    pub fn rebuild(&mut self) {
        let mut xy_box = DAabb::empty();
        let mut uv_box = DAabb::empty();
        for v in &self.mesh {
            xy_box.include(v.xy);
            uv_box.include(v.uv);
        }
        self.xy_min = xy_box.min;
        self.xy_ext = xy_box.extent();
        self.uv_min = uv_box.min;
        self.uv_ext = uv_box.extent();

        let mesh = &self.mesh;
        for t in &mut self.tri {
            t.precompute(mesh);
        }

        for cell in &mut self.xy_cells {
            cell.clear();
        }
        for cell in &mut self.uv_cells {
            cell.clear();
        }

        for (t_idx, t) in self.tri.iter().enumerate() {
            let mut uv_box = DAabb::empty();
            let mut xy_box = DAabb::empty();
            for &vi in &t.vertex {
                uv_box.include(self.mesh[vi].uv);
                xy_box.include(self.mesh[vi].xy);
            }

            insert_box(
                &mut self.uv_cells,
                self.rows,
                self.cols,
                self.uv_min,
                self.uv_ext,
                &uv_box,
                t_idx as u32,
            );
            insert_box(
                &mut self.xy_cells,
                self.rows,
                self.cols,
                self.xy_min,
                self.xy_ext,
                &xy_box,
                t_idx as u32,
            );
        }
    }

    /// Add a per-vertex displacement to every vertex and rebuild.
    pub fn update(&mut self, xy_shift: &[DVec2]) {
        assert_eq!(
            xy_shift.len(),
            self.mesh.len(),
            "one displacement per vertex required"
        );
        for (v, &s) in self.mesh.iter_mut().zip(xy_shift) {
            v.xy += s;
        }
        self.rebuild();
    }

    /// Translate every vertex by the same vector and rebuild.
    pub fn shift(&mut self, xy_shift: DVec2) {
        for v in &mut self.mesh {
            v.xy += xy_shift;
        }
        self.rebuild();
    }

    /// Cell index containing an xy-point (clamped to the grid).
    pub fn xy_cell(&self, xy: DVec2) -> usize {
        cell_index(xy, self.xy_min, self.xy_ext, self.rows, self.cols)
    }

    /// Cell index containing a uv-point (clamped to the grid).
    pub fn uv_cell(&self, uv: DVec2) -> usize {
        cell_index(uv, self.uv_min, self.uv_ext, self.rows, self.cols)
    }

    /// Find the triangle containing an xy-point; returns the triangle id
    /// and the interpolated uv-point. First match wins.
    pub fn xy_triangle(&self, xy: DVec2) -> Option<(usize, DVec2)> {
        for &t_idx in &self.xy_cells[self.xy_cell(xy)] {
            if let Some(uv) = self.tri[t_idx as usize].xy_intersect(&self.mesh, xy) {
                return Some((t_idx as usize, uv));
            }
        }
        None
    }

    /// Find the triangle containing a uv-point; returns the triangle id
    /// and the interpolated xy-point. First match wins.
    pub fn uv_triangle(&self, uv: DVec2) -> Option<(usize, DVec2)> {
        for &t_idx in &self.uv_cells[self.uv_cell(uv)] {
            if let Some(xy) = self.tri[t_idx as usize].uv_intersect(&self.mesh, uv) {
                return Some((t_idx as usize, xy));
            }
        }
        None
    }
}

impl Default for AccelerationGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn cell_axis(v: f64, min: f64, ext: f64, n: usize) -> usize {
    if ext <= 0.0 || n == 0 {
        return 0;
    }
    let t = ((v - min) / ext * n as f64).floor();
    (t.max(0.0) as usize).min(n - 1)
}

#[inline]
fn cell_index(p: DVec2, min: DVec2, ext: DVec2, rows: usize, cols: usize) -> usize {
    let col = cell_axis(p.x, min.x, ext.x, cols);
    let row = cell_axis(p.y, min.y, ext.y, rows);
    row * cols + col
}

fn insert_box(
    cells: &mut [Vec<u32>],
    rows: usize,
    cols: usize,
    min: DVec2,
    ext: DVec2,
    tri_box: &DAabb,
    t_idx: u32,
) {
    let c0 = cell_axis(tri_box.min.x, min.x, ext.x, cols);
    let c1 = cell_axis(tri_box.max.x, min.x, ext.x, cols);
    let r0 = cell_axis(tri_box.min.y, min.y, ext.y, rows);
    let r1 = cell_axis(tri_box.max.y, min.y, ext.y, rows);
    for r in r0..=r1 {
        for c in c0..=c1 {
            cells[r * cols + c].push(t_idx);
        }
    }
}

/// Grid transform: a regular (rows+1) x (cols+1) vertex lattice over the
/// tile, two triangles per quad with a fixed diagonal orientation.
#[derive(Debug, Clone)]
pub struct GridTransform {
    rows: usize,
    cols: usize,
    pub tile_min: DVec2,
    pub tile_ext: DVec2,
    pub grid: AccelerationGrid,
}

impl GridTransform {
    /// Build the transform from the lattice of mosaic-space control point
    /// positions, ordered row-major over (rows+1) x (cols+1).
    pub fn setup(
        rows: usize,
        cols: usize,
        tile_min: DVec2,
        tile_max: DVec2,
        xy: &[DVec2],
    ) -> Self {
        assert!(rows > 0 && cols > 0, "the mesh needs at least one quad");
        assert_eq!(
            xy.len(),
            (rows + 1) * (cols + 1),
            "one mosaic position per lattice vertex required"
        );

        let tile_ext = tile_max - tile_min;
        let mut grid = AccelerationGrid::new();
        grid.mesh.reserve(xy.len());
        for r in 0..=rows {
            for c in 0..=cols {
                let frac = DVec2::new(c as f64 / cols as f64, r as f64 / rows as f64);
                grid.mesh.push(Vertex {
                    uv: tile_min + frac * tile_ext,
                    xy: xy[r * (cols + 1) + c],
                });
            }
        }

        // Two triangles per quad, the diagonal running v00 -> v11 in
        // every quad.
        grid.tri.reserve(2 * rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                let v00 = r * (cols + 1) + c;
                let v10 = v00 + 1;
                let v01 = (r + 1) * (cols + 1) + c;
                let v11 = v01 + 1;
                grid.tri.push(Triangle::new(v00, v10, v11));
                grid.tri.push(Triangle::new(v00, v11, v01));
            }
        }

        grid.resize(rows, cols);
        grid.rebuild();

        Self {
            rows,
            cols,
            tile_min,
            tile_ext,
            grid,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_ready(&self) -> bool {
        !self.grid.mesh.is_empty() && !self.grid.tri.is_empty()
    }

    #[inline]
    pub fn vertex(&self, row: usize, col: usize) -> &Vertex {
        &self.grid.mesh[row * (self.cols + 1) + col]
    }

    /// Forward map: mosaic point to tile point through the containing
    /// triangle. Reports a miss outside the mesh.
    pub fn transform(&self, xy: DVec2) -> Option<DVec2> {
        self.grid.xy_triangle(xy).map(|(_, uv)| uv)
    }

    /// Inverse map: tile point to mosaic point. The regular uv lattice
    /// locates the quad directly; the acceleration grid is the fallback
    /// for boundary rounding.
    pub fn transform_inv(&self, uv: DVec2) -> Option<DVec2> {
        if self.tile_ext.x > 0.0 && self.tile_ext.y > 0.0 {
            let t = (uv - self.tile_min) / self.tile_ext;
            if (0.0..=1.0).contains(&t.x) && (0.0..=1.0).contains(&t.y) {
                let c = ((t.x * self.cols as f64) as usize).min(self.cols - 1);
                let r = ((t.y * self.rows as f64) as usize).min(self.rows - 1);
                let base = 2 * (r * self.cols + c);
                for t_idx in [base, base + 1] {
                    if let Some(xy) = self.grid.tri[t_idx].uv_intersect(&self.grid.mesh, uv) {
                        return Some(xy);
                    }
                }
            }
        }
        self.grid.uv_triangle(uv).map(|(_, xy)| xy)
    }

    /// Derivative of the tile point with respect to the three vertices of
    /// the containing triangle: the barycentric weights, one per vertex
    /// index.
    pub fn jacobian(&self, xy: DVec2) -> Option<([usize; 3], [f64; 3])> {
        let (t_idx, _) = self.grid.xy_triangle(xy)?;
        let tri = &self.grid.tri[t_idx];
        let (wa, wb, wc) = tri.xy_weights(xy);
        Some((tri.vertex, [wa, wb, wc]))
    }
}

/// Mesh transform: the same acceleration structure over an arbitrary
/// externally supplied triangulation.
#[derive(Debug, Clone)]
pub struct MeshTransform {
    pub tile_min: DVec2,
    pub tile_ext: DVec2,
    pub grid: AccelerationGrid,
}

impl MeshTransform {
    /// Build from matched uv/xy vertex arrays and a triangle index list
    /// (counterclockwise winding). Returns `None` when the mesh is too
    /// small to cover anything.
    pub fn setup(
        tile_min: DVec2,
        tile_max: DVec2,
        uv: &[DVec2],
        xy: &[DVec2],
        triangles: &[[usize; 3]],
        accel_rows: usize,
        accel_cols: usize,
    ) -> Option<Self> {
        assert_eq!(uv.len(), xy.len(), "uv and xy vertex counts must match");
        if uv.len() < 3 || triangles.is_empty() {
            return None;
        }

        let mut grid = AccelerationGrid::new();
        grid.mesh = uv
            .iter()
            .zip(xy)
            .map(|(&uv, &xy)| Vertex { uv, xy })
            .collect();
        grid.tri = triangles
            .iter()
            .map(|&[a, b, c]| Triangle::new(a, b, c))
            .collect();
        grid.resize(accel_rows.max(1), accel_cols.max(1));
        grid.rebuild();

        Some(Self {
            tile_min,
            tile_ext: tile_max - tile_min,
            grid,
        })
    }

    pub fn is_ready(&self) -> bool {
        !self.grid.mesh.is_empty() && !self.grid.tri.is_empty()
    }

    pub fn transform(&self, xy: DVec2) -> Option<DVec2> {
        self.grid.xy_triangle(xy).map(|(_, uv)| uv)
    }

    pub fn transform_inv(&self, uv: DVec2) -> Option<DVec2> {
        self.grid.uv_triangle(uv).map(|(_, xy)| xy)
    }
}
