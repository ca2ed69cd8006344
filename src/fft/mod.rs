//! 2-D FFT over complex single-precision fields.
//!
//! Wraps rustfft with cached plans and row/column decomposition. The
//! inverse transform normalizes by the pixel count, so a forward/inverse
//! round trip reproduces the input up to floating-point tolerance.


use std::ops::{Index, IndexMut};
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::common::Buffer2;

/// Complex single-precision 2-D field addressed by `(x, y)`.
#[derive(Debug, Clone)]
pub struct FftImage {
    data: Vec<Complex<f32>>,
    nx: usize,
    ny: usize,
}

impl FftImage {
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            data: vec![Complex::new(0.0, 0.0); nx * ny],
            nx,
            ny,
        }
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Reallocate to new dimensions, zero-filled.
    pub fn resize(&mut self, nx: usize, ny: usize) {
        self.nx = nx;
        self.ny = ny;
        self.data.clear();
        self.data.resize(nx * ny, Complex::new(0.0, 0.0));
    }

    pub fn fill(&mut self, value: Complex<f32>) {
        self.data.fill(value);
    }

    /// Load a real image, padding to this field's dimensions with `fill`.
    /// The image is placed at the origin; the field must be at least as
    /// large as the image.
    pub fn load_real(&mut self, image: &Buffer2<f32>, fill: f32) {
        assert!(
            image.width() <= self.nx && image.height() <= self.ny,
            "image does not fit the field"
        );
        self.fill(Complex::new(fill, 0.0));
        for y in 0..image.height() {
            let row = image.row(y);
            let dst = &mut self.data[y * self.nx..y * self.nx + row.len()];
            for (d, &v) in dst.iter_mut().zip(row) {
                *d = Complex::new(v, 0.0);
            }
        }
    }

    /// Extract the real component.
    pub fn real(&self) -> Buffer2<f32> {
        Buffer2::new(self.nx, self.ny, self.data.iter().map(|c| c.re).collect())
    }

    /// Apply a low-pass filter in place.
    ///
    /// `r` in [0, 1] is the cutoff as a fraction of Nyquist, `s` in [0, 1]
    /// the sharpness: s = 0 keeps an ideal cutoff at r, s = 1 a raised
    /// cosine that is 1 at the origin, 0.5 at r and 0 at 2r. Every
    /// frequency beyond 2r is zeroed. Frequencies are measured toroidally
    /// around the field origin.
    pub fn apply_lp_filter(&mut self, r: f64, s: f64) {
        debug_assert!((0.0..=1.0).contains(&r));
        debug_assert!((0.0..=1.0).contains(&s));

        let half_x = self.nx as f64 / 2.0;
        let half_y = self.ny as f64 / 2.0;

        for y in 0..self.ny {
            let fy = (y.min(self.ny - y)) as f64 / half_y;
            for x in 0..self.nx {
                let fx = (x.min(self.nx - x)) as f64 / half_x;
                let rho = (fx * fx + fy * fy).sqrt();

                let ideal = if rho <= r { 1.0 } else { 0.0 };
                let cosine = if rho < 2.0 * r {
                    0.5 * (1.0 + (std::f64::consts::PI * rho / (2.0 * r)).cos())
                } else {
                    0.0
                };
                let h = ((1.0 - s) * ideal + s * cosine) as f32;
                self.data[y * self.nx + x] *= h;
            }
        }
    }

    #[inline]
    pub fn data(&self) -> &[Complex<f32>] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [Complex<f32>] {
        &mut self.data
    }
}

impl Index<(usize, usize)> for FftImage {
    type Output = Complex<f32>;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.data[y * self.nx + x]
    }
}

impl IndexMut<(usize, usize)> for FftImage {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.data[y * self.nx + x]
    }
}

/// Cached forward/inverse plans for one field size.
pub struct Fft2d {
    nx: usize,
    ny: usize,
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    col_forward: Arc<dyn Fft<f32>>,
    col_inverse: Arc<dyn Fft<f32>>,
}

impl Fft2d {
    pub fn new(nx: usize, ny: usize) -> Self {
        assert!(nx > 0 && ny > 0, "field dimensions must be positive");
        let mut planner = FftPlanner::new();
        Self {
            nx,
            ny,
            row_forward: planner.plan_fft_forward(nx),
            row_inverse: planner.plan_fft_inverse(nx),
            col_forward: planner.plan_fft_forward(ny),
            col_inverse: planner.plan_fft_inverse(ny),
        }
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Forward 2-D FFT in place.
    pub fn forward(&self, field: &mut FftImage) {
        self.process(field, true);
    }

    /// Inverse 2-D FFT in place, normalized by nx * ny.
    pub fn inverse(&self, field: &mut FftImage) {
        self.process(field, false);
        let scale = 1.0 / (self.nx * self.ny) as f32;
        for v in field.data.iter_mut() {
            *v *= scale;
        }
    }

    /// Forward FFT of a real image padded with `fill` to the plan size.
    pub fn forward_real(&self, image: &Buffer2<f32>, fill: f32, out: &mut FftImage) {
        out.resize(self.nx, self.ny);
        out.load_real(image, fill);
        self.forward(out);
    }

    fn process(&self, field: &mut FftImage, forward: bool) {
        assert_eq!(
            (field.nx, field.ny),
            (self.nx, self.ny),
            "field dimensions do not match the plan"
        );
        let (row_fft, col_fft) = if forward {
            (&self.row_forward, &self.col_forward)
        } else {
            (&self.row_inverse, &self.col_inverse)
        };

        for y in 0..self.ny {
            row_fft.process(&mut field.data[y * self.nx..(y + 1) * self.nx]);
        }

        // Columns go through a gather/scatter scratch so the plan sees
        // contiguous data.
        let mut column = vec![Complex::new(0.0f32, 0.0); self.ny];
        for x in 0..self.nx {
            for y in 0..self.ny {
                column[y] = field.data[y * self.nx + x];
            }
            col_fft.process(&mut column);
            for y in 0..self.ny {
                field.data[y * self.nx + x] = column[y];
            }
        }
    }
}
