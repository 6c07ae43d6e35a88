//! Data preprocessing module
//!
//! Mask-aware temporal normalization of batches:
//! - Per-series, per-channel location/scale (standard, robust, min-max, max-abs)
//! - Leakage protection for held-out validation and test steps
//! - Exact inversion of the target channel

mod normalize;
mod scaler;

pub use normalize::{temporal_data_cols, Normalizer};
pub use scaler::{ScalerType, TemporalNorm};
