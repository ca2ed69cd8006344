//! Tessera - 2-D image mosaic registration.
//!
//! Given a collection of partially overlapping tiles, each with an
//! approximate transform into a shared mosaic frame, tessera iteratively
//! refines those transforms until overlapping regions align at subpixel
//! accuracy:
//!
//! - **Phase correlation**: FFT-based translation estimation between
//!   local neighborhoods, with cluster-based peak extraction
//! - **Grid / mesh transforms**: discontinuous triangle meshes whose
//!   control points are displaced individually
//! - **Legendre polynomial transforms**: smooth bivariate warps with a
//!   Newton-Raphson numeric inverse
//! - **Worker pool**: per-tile refinement transactions with cooperative
//!   cancellation
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tessera::{MosaicTile, MosaicTransform, NullProgress, RefineConfig, refine_mosaic};
//!
//! let tiles: Vec<MosaicTile> = load_tiles()?;
//! let mut transforms: Vec<MosaicTransform> = initial_placement(&tiles);
//!
//! let report = refine_mosaic(
//!     &tiles,
//!     &mut transforms,
//!     &RefineConfig::default(),
//!     &NullProgress,
//! )?;
//!
//! println!("converged after {} passes", report.passes);
//! ```

pub(crate) mod common;
pub(crate) mod correlation;
pub(crate) mod fft;
pub(crate) mod math;
pub(crate) mod pool;
pub(crate) mod refine;
pub(crate) mod transform;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Core types
// ============================================================================

pub use common::{Buffer2, NullProgress, ProgressSink};
pub use math::{DAabb, SvdFactors};

// ============================================================================
// FFT and phase correlation
// ============================================================================

pub use correlation::{
    CorrelationConfig,
    LocalMax,
    best_translation,
    find_correlation,
    find_correlation_with_fill,
    find_maxima_cm,
    overlap_fraction,
    reject_negligible_maxima,
    threshold_maxima,
    unwrap_displacement,
};
pub use fft::{Fft2d, FftImage};

// ============================================================================
// Transforms
// ============================================================================

pub use transform::{
    AccelerationGrid,
    ControlLattice,
    GridTransform,
    LegendreTransform,
    MeshTransform,
    MosaicTransform,
    Triangle,
    Vertex,
};

// ============================================================================
// Worker pool
// ============================================================================

pub use pool::{
    Abort,
    PoolStats,
    Terminator,
    ThreadPool,
    Transaction,
    TransactionState,
    WorkerContext,
    execute_inline,
};

// ============================================================================
// Refinement
// ============================================================================

pub use refine::{
    MosaicTile,
    RefineConfig,
    RefineError,
    RefineReport,
    WarpedTile,
    duplicate_tile,
    mosaic_bbox,
    refine_mosaic,
    warp_tile,
};
