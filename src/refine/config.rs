//! Configuration for the refinement driver.

/// Options accepted by [`refine_mosaic`](crate::refine::refine_mosaic).
///
/// # Example
///
/// ```ignore
/// let config = RefineConfig {
///     neighborhood: 64,
///     num_passes: 2,
///     ..RefineConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// Side length of the correlation window, in pixels. Default: 128.
    pub neighborhood: usize,

    /// Warp every mobile tile into mosaic space once per pass; when false,
    /// windows are sampled through the transforms on demand. Default: true.
    pub prewarp_tiles: bool,

    /// Lower bound on the fractional neighborhood overlap. Default: 0.25.
    pub minimum_overlap: f64,

    /// Upper bound on the fractional neighborhood overlap (1.0 disables).
    /// Default: 1.0.
    pub maximum_overlap: f64,

    /// Window radius of the displacement median filter. Default: 1.
    pub median_radius: usize,

    /// Maximum number of outer refinement passes. Default: 4.
    pub num_passes: usize,

    /// Anchor tile 0: it is never warped nor updated, and the remaining
    /// displacements are not normalized against it. Default: false.
    pub keep_first_tile_fixed: bool,

    /// Mean per-pixel displacement below which refinement stops.
    /// Default: 0.25.
    pub displacement_threshold: f64,

    /// Worker count; 1 selects the single-threaded path and 0 uses all
    /// available cores. Results are identical for any value. Default: 0.
    pub num_threads: usize,

    /// Low-pass cutoff radius for the correlation windows, as a fraction
    /// of Nyquist. Default: 0.5.
    pub lp_radius: f64,

    /// Low-pass sharpness: 0 is an ideal cutoff, 1 a raised cosine.
    /// Default: 0.9.
    pub lp_sharpness: f64,

    /// Control lattice quads (rows) used for polynomial transforms, which
    /// carry no mesh of their own. Default: 4.
    pub control_rows: usize,

    /// Control lattice quads (columns) for polynomial transforms.
    /// Default: 4.
    pub control_cols: usize,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            neighborhood: 128,
            prewarp_tiles: true,
            minimum_overlap: 0.25,
            maximum_overlap: 1.0,
            median_radius: 1,
            num_passes: 4,
            keep_first_tile_fixed: false,
            displacement_threshold: 0.25,
            num_threads: 0,
            lp_radius: 0.5,
            lp_sharpness: 0.9,
            control_rows: 4,
            control_cols: 4,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) {
        assert!(self.neighborhood >= 8, "neighborhood must be at least 8 pixels");
        assert!(
            self.minimum_overlap >= 0.0 && self.minimum_overlap <= self.maximum_overlap,
            "overlap bounds must satisfy 0 <= min <= max"
        );
        assert!(self.maximum_overlap <= 1.0, "maximum_overlap must be <= 1.0");
        assert!(self.num_passes > 0, "at least one pass is required");
        assert!(
            (0.0..=1.0).contains(&self.lp_radius) && (0.0..=1.0).contains(&self.lp_sharpness),
            "low-pass parameters must be in [0, 1]"
        );
        assert!(
            self.control_rows > 0 && self.control_cols > 0,
            "the polynomial control lattice needs at least one quad"
        );
        assert!(
            self.displacement_threshold >= 0.0,
            "displacement_threshold must be non-negative"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        RefineConfig::default().validate();
    }

    #[test]
    #[should_panic(expected = "overlap bounds")]
    fn test_inverted_overlap_bounds_panic() {
        let config = RefineConfig {
            minimum_overlap: 0.9,
            maximum_overlap: 0.5,
            ..RefineConfig::default()
        };
        config.validate();
    }

    #[test]
    #[should_panic(expected = "at least one pass")]
    fn test_zero_passes_panic() {
        let config = RefineConfig {
            num_passes: 0,
            ..RefineConfig::default()
        };
        config.validate();
    }
}
