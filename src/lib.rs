//! Kolosal Forecast - Ragged time-series storage and windowing for recurrent forecasting
//!
//! This crate turns many variable-length series into model-ready window
//! tensors for training, validation and prediction:
//! - Compact ragged storage with append, trim and align
//! - Mask-aware temporal normalization with exact inversion
//! - Sliding-window extraction with leakage protection
//! - Parallel batch assembly over a shared store
//!
//! # Modules
//!
//! - [`dataset`] - Ragged series store and polars conversions
//! - [`batch`] - Batch collation and loaders
//! - [`preprocessing`] - Temporal normalization
//! - [`windows`] - Window extraction and parsing
//! - [`training`] - Train/validate/predict orchestration over external models and losses
//! - [`utils`] - Worker pool helpers

// Core error handling
pub mod error;

// Data
pub mod dataset;
pub mod batch;

// Pipeline
pub mod preprocessing;
pub mod windows;
pub mod training;

// Utilities
pub mod utils;

pub use error::{ForecastError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::batch::{TemporalBatch, TimeSeriesDataModule, TimeSeriesLoader};
    pub use crate::dataset::{ChannelIndex, TimeSeriesDataset};
    pub use crate::error::{ForecastError, Result};
    pub use crate::preprocessing::{Normalizer, ScalerType, TemporalNorm};
    pub use crate::training::{
        DistributionLoss, ForecastModel, Loss, Mae, ModelInput, ModelOutput, Mse, PointLoss,
        RecurrentConfig, RecurrentEngine,
    };
    pub use crate::windows::{create_windows, StepKind, WindowConfig, WindowParser};
}
