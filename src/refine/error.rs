//! Error types for mosaic refinement.

use glam::DVec2;
use thiserror::Error;

/// Contract violations surfaced by `refine_mosaic`. Each causes an early
/// return with no mutation; per-control-point and per-tile failures are
/// recovered internally and never reach this type.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("no tiles were provided")]
    EmptyTileSet,

    #[error("tile count {tiles} does not match transform count {transforms}")]
    CountMismatch { tiles: usize, transforms: usize },

    #[error("tile {index} pixel spacing {actual:?} differs from tile 0 spacing {expected:?}")]
    SpacingMismatch {
        index: usize,
        expected: DVec2,
        actual: DVec2,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = RefineError::CountMismatch {
            tiles: 3,
            transforms: 2,
        };
        assert!(err.to_string().contains('3'));
        assert!(err.to_string().contains('2'));

        let err = RefineError::SpacingMismatch {
            index: 1,
            expected: DVec2::new(1.0, 1.0),
            actual: DVec2::new(2.0, 1.0),
        };
        assert!(err.to_string().contains("tile 1"));
    }
}
