//! Recurrent training configuration

use crate::error::{ForecastError, Result};
use crate::preprocessing::ScalerType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Configuration for windowed recurrent forecasting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentConfig {
    /// Forecast horizon
    pub h: usize,

    /// Maximum windows unrolled per training step (None = all)
    pub input_size: Option<usize>,

    /// Maximum windows of context at validation and predict time (None = all)
    pub inference_input_size: Option<usize>,

    /// Temporal normalization of target and exogenous channels
    pub scaler_type: ScalerType,

    /// Exogenous channels known ahead of time
    pub futr_exog_list: Vec<String>,

    /// Exogenous channels only known up to the present
    pub hist_exog_list: Vec<String>,

    /// Static per-series features
    pub stat_exog_list: Vec<String>,

    /// Series per training batch
    pub batch_size: usize,

    /// Series per validation/predict batch (None = batch_size)
    pub valid_batch_size: Option<usize>,

    /// Number of training steps
    pub max_steps: usize,

    /// Training steps between validation passes
    pub val_check_steps: usize,

    /// Loader worker threads (0 = load on the calling thread)
    pub num_workers_loader: usize,

    /// Drop the last incomplete batch of each epoch
    pub drop_last_loader: bool,

    /// Random seed for shuffles and window sampling
    pub random_seed: u64,

    /// Display name
    pub alias: Option<String>,
}

impl Default for RecurrentConfig {
    fn default() -> Self {
        Self {
            h: 1,
            input_size: None,
            inference_input_size: None,
            scaler_type: ScalerType::Robust,
            futr_exog_list: Vec::new(),
            hist_exog_list: Vec::new(),
            stat_exog_list: Vec::new(),
            batch_size: 32,
            valid_batch_size: None,
            max_steps: 1000,
            val_check_steps: 100,
            num_workers_loader: 0,
            drop_last_loader: false,
            random_seed: 1,
            alias: None,
        }
    }
}

impl RecurrentConfig {
    /// Create a new configuration for horizon `h`
    pub fn new(h: usize) -> Self {
        Self {
            h,
            ..Default::default()
        }
    }

    /// Builder method to set the training unroll length
    pub fn with_input_size(mut self, input_size: usize) -> Self {
        self.input_size = Some(input_size);
        self
    }

    /// Builder method to set the inference context length
    pub fn with_inference_input_size(mut self, size: usize) -> Self {
        self.inference_input_size = Some(size);
        self
    }

    /// Builder method to set the scaler
    pub fn with_scaler(mut self, scaler_type: ScalerType) -> Self {
        self.scaler_type = scaler_type;
        self
    }

    /// Builder method to set future exogenous channels
    pub fn with_futr_exog<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.futr_exog_list = names.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set historical exogenous channels
    pub fn with_hist_exog<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.hist_exog_list = names.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set static features
    pub fn with_stat_exog<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.stat_exog_list = names.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set batch sizes
    pub fn with_batch_size(mut self, batch_size: usize, valid_batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self.valid_batch_size = valid_batch_size;
        self
    }

    /// Builder method to set the step budget and validation interval
    pub fn with_steps(mut self, max_steps: usize, val_check_steps: usize) -> Self {
        self.max_steps = max_steps;
        self.val_check_steps = val_check_steps;
        self
    }

    /// Builder method to set loader workers
    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers_loader = n;
        self
    }

    /// Builder method to drop incomplete batches
    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last_loader = drop_last;
        self
    }

    /// Builder method to set random seed
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Builder method to set the display name
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Validation/predict batch size
    pub fn effective_valid_batch_size(&self) -> usize {
        self.valid_batch_size.unwrap_or(self.batch_size)
    }

    /// Reject configurations no step can run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("h", self.h),
            ("batch_size", self.batch_size),
            ("max_steps", self.max_steps),
            ("val_check_steps", self.val_check_steps),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ForecastError::ConfigError(format!("{} must be positive", name)));
            }
        }
        for (name, value) in [
            ("input_size", self.input_size),
            ("inference_input_size", self.inference_input_size),
            ("valid_batch_size", self.valid_batch_size),
        ] {
            if value == Some(0) {
                return Err(ForecastError::ConfigError(format!(
                    "{} must be positive when set",
                    name
                )));
            }
        }

        let mut seen = HashSet::new();
        for name in self.hist_exog_list.iter().chain(&self.futr_exog_list) {
            if !seen.insert(name.as_str()) {
                return Err(ForecastError::ConfigError(format!(
                    "exogenous channel '{}' is listed more than once",
                    name
                )));
            }
        }
        let mut seen = HashSet::new();
        if let Some(name) = self.stat_exog_list.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(ForecastError::ConfigError(format!(
                "static feature '{}' is listed more than once",
                name
            )));
        }
        Ok(())
    }

    /// Save the configuration as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
