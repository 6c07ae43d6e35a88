//! Recurrent training orchestration
//!
//! The engine composes normalization, window extraction and parsing per step
//! kind, and delegates to external collaborators:
//! - [`ForecastModel`] maps window tensors to predictions
//! - [`PointLoss`] / [`DistributionLoss`] score them

mod config;
mod engine;
mod loss;
mod model;

pub use config::RecurrentConfig;
pub use engine::RecurrentEngine;
pub use loss::{DistributionLoss, Loss, Mae, Mse, PointLoss, PointTarget, Sampled};
pub use model::{ForecastModel, ModelInput, ModelOutput};
