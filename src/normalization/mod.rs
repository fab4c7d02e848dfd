//! Per-spot depth normalization

mod log_normalize;

pub use log_normalize::{log_normalize, NormalizedExpression};
