//! Model collaborator interface

use crate::error::Result;
use crate::windows::ParsedWindows;
use ndarray::{Array3, ArrayView2, ArrayView3, ArrayView4};

/// Window tensors handed to a model, borrowed from a parsed window batch
#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    /// `[B, T, 1]`
    pub insample_y: ArrayView3<'a, f64>,
    /// `[B, T, 1]`
    pub insample_mask: ArrayView3<'a, f64>,
    /// `[B, F, T, 1 + h]`
    pub futr_exog: Option<ArrayView4<'a, f64>>,
    /// `[B, C, T, 1]`
    pub hist_exog: Option<ArrayView4<'a, f64>>,
    /// `[B, S]`
    pub stat_exog: Option<ArrayView2<'a, f64>>,
}

impl<'a> From<&'a ParsedWindows> for ModelInput<'a> {
    fn from(parsed: &'a ParsedWindows) -> Self {
        Self {
            insample_y: parsed.insample_y.view(),
            insample_mask: parsed.insample_mask.view(),
            futr_exog: parsed.futr_exog.as_ref().map(|a| a.view()),
            hist_exog: parsed.hist_exog.as_ref().map(|a| a.view()),
            stat_exog: parsed.stat_exog.as_ref().map(|a| a.view()),
        }
    }
}

/// Raw model output in normalized units
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// `[B, T, H]`
    Point(Array3<f64>),
    /// One `[B, T, H]` array per distribution parameter, in a fixed order
    Distribution(Vec<Array3<f64>>),
}

impl ModelOutput {
    /// `(B, T, H)` of the output, taken from the first parameter for distributions
    pub fn dim(&self) -> Option<(usize, usize, usize)> {
        match self {
            ModelOutput::Point(y_hat) => Some(y_hat.dim()),
            ModelOutput::Distribution(args) => args.first().map(Array3::dim),
        }
    }

    /// Number of NaN entries across all arrays
    pub fn nan_count(&self) -> usize {
        match self {
            ModelOutput::Point(y_hat) => y_hat.iter().filter(|v| v.is_nan()).count(),
            ModelOutput::Distribution(args) => args
                .iter()
                .map(|a| a.iter().filter(|v| v.is_nan()).count())
                .sum(),
        }
    }
}

/// A sequence model driven one window batch at a time.
///
/// Parameter updates are the model's own business: `on_train_loss` is called
/// after every successful training step with the evaluated loss.
pub trait ForecastModel {
    fn forward(&mut self, input: &ModelInput<'_>) -> Result<ModelOutput>;

    fn on_train_loss(&mut self, _loss: f64, _step: usize) -> Result<()> {
        Ok(())
    }
}
