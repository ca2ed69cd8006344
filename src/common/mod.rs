//! Common utilities for tessera.

pub(crate) mod buffer2;
pub(crate) mod progress;

pub use buffer2::Buffer2;
pub use progress::{NullProgress, ProgressSink};
