//! Progress reporting for mosaic refinement.
//!
//! The driver exposes two scalar slots: "major" progress spans the whole
//! refinement run and "minor" progress spans the current pass. Both are
//! fractions in [0, 1].

/// Sink for the driver's two progress slots.
///
/// Both methods default to no-ops so a unit struct is a valid null sink.
pub trait ProgressSink: Send + Sync {
    fn set_major(&self, _fraction: f64) {}
    fn set_minor(&self, _fraction: f64) {}
}

/// Progress sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}
