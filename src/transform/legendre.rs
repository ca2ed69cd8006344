//! Bivariate centered/normalized Legendre polynomial transform.
//!
//! With A = (u - uc) / Xmax and B = (v - vc) / Ymax the transform maps a
//! mosaic point (u, v) to the tile point
//!
//! ```text
//! x(u, v) = Xmax * sum(i in 0..=N, sum(j in 0..=i, a_jk * P_j(A) * P_k(B)))
//! y(u, v) = Ymax * sum(i in 0..=N, sum(j in 0..=i, b_jk * P_j(A) * P_k(B)))
//! ```
//!
//! where k = i - j and P is the Legendre polynomial of the given degree.
//! The inverse map has no closed form and is computed by Newton-Raphson.

use glam::DVec2;

use crate::math::SvdFactors;
use crate::math::bbox::DAabb;
use crate::math::legendre::{legendre_derivatives, legendre_values};

/// Newton-Raphson iteration cap for the numeric inverse.
const INVERSE_MAX_ITERATIONS: usize = 50;

/// Convergence tolerance on both the residual and the step, L1.
const INVERSE_TOLERANCE: f64 = 1e-12;

/// Relative singular-value tolerance below which a parameter fit is
/// considered rank deficient and refused.
const FIT_RANK_TOLERANCE: f64 = 1e-12;

/// Linear index of the a(j, k) coefficient within one dimension's block.
#[inline]
pub fn index_a(j: usize, k: usize) -> usize {
    j + ((j + k) * (j + k + 1)) / 2
}

/// Bivariate Legendre polynomial transform of total degree N.
///
/// The free parameter vector has length (N + 1)(N + 2): the first half
/// holds the a coefficients, the second half the b coefficients, both
/// indexed by [`index_a`]. a(0, 0) and b(0, 0) encode the base translation.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendreTransform {
    degree: usize,
    uc: f64,
    vc: f64,
    xmax: f64,
    ymax: f64,
    params: Vec<f64>,
}

impl LegendreTransform {
    /// Identity transform of the given degree.
    pub fn new(degree: usize) -> Self {
        let mut t = Self {
            degree,
            uc: 0.0,
            vc: 0.0,
            xmax: 1.0,
            ymax: 1.0,
            params: vec![0.0; (degree + 1) * (degree + 2)],
        };
        // x = Xmax * A and y = Ymax * B reproduce the input point.
        t.params[index_a(1, 0)] = 1.0;
        let b01 = t.coefficients_per_dimension() + index_a(0, 1);
        t.params[b01] = 1.0;
        t
    }

    /// Number of a (or b) coefficients.
    #[inline]
    pub fn coefficients_per_dimension(&self) -> usize {
        ((self.degree + 1) * (self.degree + 2)) / 2
    }

    /// Linear index of b(j, k) in the parameter vector.
    #[inline]
    pub fn index_b(&self, j: usize, k: usize) -> usize {
        self.coefficients_per_dimension() + index_a(j, k)
    }

    #[inline]
    pub fn degree(&self) -> usize {
        self.degree
    }

    #[inline]
    pub fn parameters(&self) -> &[f64] {
        &self.params
    }

    pub fn set_parameters(&mut self, params: &[f64]) {
        assert_eq!(
            params.len(),
            self.params.len(),
            "parameter count mismatch for degree {}",
            self.degree
        );
        self.params.copy_from_slice(params);
    }

    /// Warp origin expressed in the mosaic coordinate system.
    #[inline]
    pub fn center(&self) -> DVec2 {
        DVec2::new(self.uc, self.vc)
    }

    /// Normalization half-extents.
    #[inline]
    pub fn normalization(&self) -> DVec2 {
        DVec2::new(self.xmax, self.ymax)
    }

    /// Initialize the fixed parameters from the tile bounding box so the
    /// identity polynomial maps the tile onto itself. Passing zero for
    /// `xmax`/`ymax` derives them as half the box extent.
    pub fn setup(&mut self, bbox: &DAabb, xmax: f64, ymax: f64) {
        let center = (bbox.min + bbox.max) * 0.5;
        self.uc = center.x;
        self.vc = center.y;

        if xmax != 0.0 && ymax != 0.0 {
            self.xmax = xmax;
            self.ymax = ymax;
        } else {
            let ext = bbox.extent();
            self.xmax = ext.x / 2.0;
            self.ymax = ext.y / 2.0;
        }

        // Local translation parameters.
        self.params[index_a(0, 0)] = self.uc / self.xmax;
        let b00 = self.index_b(0, 0);
        self.params[b00] = self.vc / self.ymax;
    }

    /// Fold a mosaic-space translation into the warp origin.
    pub fn setup_translation(&mut self, tx: f64, ty: f64) {
        self.uc -= tx;
        self.vc -= ty;
    }

    /// Number of coefficients (per dimension) covered by a degree range.
    pub fn count_coefficients(start_with_degree: usize, degrees_covered: usize) -> usize {
        index_a(0, start_with_degree + degrees_covered) - index_a(0, start_with_degree)
    }

    /// Mask of parameters that may be shared across tiles: everything
    /// except the base translation a(0, 0) / b(0, 0).
    pub fn shared_params_mask(&self, shared: bool) -> Vec<bool> {
        let mut mask = vec![shared; self.params.len()];
        mask[index_a(0, 0)] = false;
        let b00 = self.index_b(0, 0);
        mask[b00] = false;
        mask
    }

    /// Forward map: mosaic point to tile point.
    pub fn transform(&self, p: DVec2) -> DVec2 {
        let a = (p.x - self.uc) / self.xmax;
        let b = (p.y - self.vc) / self.ymax;

        let n = self.degree + 1;
        let mut pa = vec![0.0; n];
        let mut pb = vec![0.0; n];
        legendre_values(a, &mut pa);
        legendre_values(b, &mut pb);

        let half = self.coefficients_per_dimension();
        let mut sa = 0.0;
        let mut sb = 0.0;
        for total in 0..=self.degree {
            for j in 0..=total {
                let k = total - j;
                let basis = pa[j] * pb[k];
                let idx = index_a(j, k);
                sa += self.params[idx] * basis;
                sb += self.params[half + idx] * basis;
            }
        }

        DVec2::new(self.xmax * sa, self.ymax * sb)
    }

    /// Evaluate the forward map and its Jacobian with respect to the
    /// mosaic point.
    pub fn eval(&self, p: DVec2) -> (DVec2, [[f64; 2]; 2]) {
        let a = (p.x - self.uc) / self.xmax;
        let b = (p.y - self.vc) / self.ymax;

        let n = self.degree + 1;
        let mut pa = vec![0.0; n];
        let mut pb = vec![0.0; n];
        legendre_values(a, &mut pa);
        legendre_values(b, &mut pb);
        let mut dpa = vec![0.0; n];
        let mut dpb = vec![0.0; n];
        legendre_derivatives(&pa, &mut dpa);
        legendre_derivatives(&pb, &mut dpb);

        let half = self.coefficients_per_dimension();
        let mut sa = 0.0;
        let mut sb = 0.0;
        let mut sa_da = 0.0;
        let mut sa_db = 0.0;
        let mut sb_da = 0.0;
        let mut sb_db = 0.0;
        for total in 0..=self.degree {
            for j in 0..=total {
                let k = total - j;
                let idx = index_a(j, k);
                let ca = self.params[idx];
                let cb = self.params[half + idx];

                sa += ca * pa[j] * pb[k];
                sb += cb * pa[j] * pb[k];
                sa_da += ca * dpa[j] * pb[k];
                sa_db += ca * pa[j] * dpb[k];
                sb_da += cb * dpa[j] * pb[k];
                sb_db += cb * pa[j] * dpb[k];
            }
        }

        let f = DVec2::new(self.xmax * sa, self.ymax * sb);
        // dA/du = 1/Xmax and dB/dv = 1/Ymax fold into the chain rule.
        let jac = [
            [sa_da, self.xmax / self.ymax * sa_db],
            [self.ymax / self.xmax * sb_da, sb_db],
        ];
        (f, jac)
    }

    /// Numeric inverse: find the mosaic point mapping to the given tile
    /// point by Newton-Raphson, seeded at the tile point itself.
    ///
    /// Returns `None` only when the Jacobian degenerates to zero; a
    /// near-singular Jacobian is handled by the SVD pseudo-inverse step.
    pub fn transform_inv(&self, y: DVec2) -> Option<DVec2> {
        let mut x = y;
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let (f, jac) = self.eval(x);
            let residual = f - y;

            if residual.x.abs() + residual.y.abs() <= INVERSE_TOLERANCE {
                break;
            }

            let a = [jac[0][0], jac[0][1], jac[1][0], jac[1][1]];
            let factors = SvdFactors::decompose(&a, 2, 2);
            let step = factors.solve(&[-residual.x, -residual.y])?;

            x.x += step[0];
            x.y += step[1];
            if step[0].abs() + step[1].abs() <= INVERSE_TOLERANCE {
                break;
            }
        }
        Some(x)
    }

    /// Jacobian of the tile point with respect to the parameters covered
    /// by a degree range: dx/da_jk = Xmax * P_j(A) * P_k(B) (dy/db_jk is
    /// symmetric). Returns the basis products in slice order.
    pub fn param_jacobian(
        &self,
        p: DVec2,
        start_with_degree: usize,
        degrees_covered: usize,
    ) -> Vec<f64> {
        let a = (p.x - self.uc) / self.xmax;
        let b = (p.y - self.vc) / self.ymax;

        let top = start_with_degree + degrees_covered;
        let mut pa = vec![0.0; top.max(1)];
        let mut pb = vec![0.0; top.max(1)];
        legendre_values(a, &mut pa);
        legendre_values(b, &mut pb);

        let mut basis = Vec::with_capacity(Self::count_coefficients(
            start_with_degree,
            degrees_covered,
        ));
        for total in start_with_degree..top {
            for j in 0..=total {
                basis.push(pa[j] * pb[total - j]);
            }
        }
        basis
    }

    /// Solve for the parameters of the covered degree range so the
    /// transform maps `mosaic[i]` to `tile[i]`, holding every other degree
    /// fixed. Returns false (leaving the parameters untouched) when the
    /// system is underdetermined or rank deficient.
    pub fn solve_for_parameters(
        &mut self,
        start_with_degree: usize,
        degrees_covered: usize,
        mosaic: &[DVec2],
        tile: &[DVec2],
    ) -> bool {
        assert_eq!(
            mosaic.len(),
            tile.len(),
            "mosaic and tile point counts must match"
        );
        assert!(
            start_with_degree + degrees_covered <= self.degree + 1,
            "degree range exceeds the transform degree"
        );

        let n_cols = Self::count_coefficients(start_with_degree, degrees_covered);
        let m = mosaic.len();
        if n_cols == 0 || m < n_cols {
            return false;
        }

        let col_start = index_a(0, start_with_degree);
        let col_end = index_a(0, start_with_degree + degrees_covered);
        let half = self.coefficients_per_dimension();

        let n = self.degree + 1;
        let mut pa = vec![0.0; n];
        let mut pb = vec![0.0; n];

        let mut matrix = Vec::with_capacity(m * n_cols);
        let mut bx = Vec::with_capacity(m);
        let mut by = Vec::with_capacity(m);

        for (uv, xy) in mosaic.iter().zip(tile) {
            let a = (uv.x - self.uc) / self.xmax;
            let b = (uv.y - self.vc) / self.ymax;
            legendre_values(a, &mut pa);
            legendre_values(b, &mut pb);

            // Contributions of the fixed degrees move to the right-hand
            // side.
            let mut fixed_x = 0.0;
            let mut fixed_y = 0.0;
            for total in 0..=self.degree {
                for j in 0..=total {
                    let k = total - j;
                    let idx = index_a(j, k);
                    if idx >= col_start && idx < col_end {
                        continue;
                    }
                    let basis = pa[j] * pb[k];
                    fixed_x += self.params[idx] * basis;
                    fixed_y += self.params[half + idx] * basis;
                }
            }
            bx.push(xy.x / self.xmax - fixed_x);
            by.push(xy.y / self.ymax - fixed_y);

            for total in start_with_degree..start_with_degree + degrees_covered {
                for j in 0..=total {
                    matrix.push(pa[j] * pb[total - j]);
                }
            }
        }

        let factors = SvdFactors::decompose(&matrix, m, n_cols);
        if factors.rank(FIT_RANK_TOLERANCE) < n_cols {
            return false;
        }
        let Some(xa) = factors.solve(&bx) else {
            return false;
        };
        let Some(xb) = factors.solve(&by) else {
            return false;
        };

        self.params[col_start..col_end].copy_from_slice(&xa);
        self.params[half + col_start..half + col_end].copy_from_slice(&xb);
        true
    }
}
