//! Numeric primitives: bounding boxes, Legendre polynomial recurrences and
//! a small dense SVD used by the transform fits.

pub(crate) mod bbox;
pub(crate) mod legendre;
pub(crate) mod svd;

pub use bbox::DAabb;
pub use svd::SvdFactors;
