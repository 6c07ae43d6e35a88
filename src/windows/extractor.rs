//! Sliding-window extraction per step kind

use crate::batch::TemporalBatch;
use crate::dataset::{ChannelIndex, MASK_COL};
use crate::error::{ForecastError, Result};
use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which step a batch of windows is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Train,
    Val,
    Predict,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Train => "train",
            StepKind::Val => "val",
            StepKind::Predict => "predict",
        };
        f.write_str(name)
    }
}

/// Window geometry and held-out sizes for one extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    /// Forecast horizon
    pub h: usize,
    /// Maximum number of consecutive windows per training step
    pub input_size: Option<usize>,
    /// Maximum inference context, in windows, for validation and predict
    pub inference_input_size: Option<usize>,
    pub val_size: usize,
    pub test_size: usize,
    /// Future-known exogenous channels are configured
    pub has_futr_exog: bool,
}

impl WindowConfig {
    pub fn new(h: usize) -> Self {
        Self {
            h,
            input_size: None,
            inference_input_size: None,
            val_size: 0,
            test_size: 0,
            has_futr_exog: false,
        }
    }

    pub fn with_input_size(mut self, input_size: Option<usize>) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn with_inference_input_size(mut self, inference_input_size: Option<usize>) -> Self {
        self.inference_input_size = inference_input_size;
        self
    }

    pub fn with_sizes(mut self, val_size: usize, test_size: usize) -> Self {
        self.val_size = val_size;
        self.test_size = test_size;
        self
    }

    pub fn with_futr_exog(mut self, has_futr_exog: bool) -> Self {
        self.has_futr_exog = has_futr_exog;
        self
    }

    /// Width of one window: the current step plus the horizon
    pub fn window_size(&self) -> usize {
        1 + self.h
    }
}

/// Overlapping windows, `(batch × channels × windows × (1 + h))`
#[derive(Debug, Clone)]
pub struct WindowsBatch {
    pub temporal: Array4<f64>,
    pub temporal_cols: Arc<ChannelIndex>,
    pub static_: Option<Array2<f64>>,
    pub static_cols: Option<Arc<ChannelIndex>>,
}

impl WindowsBatch {
    pub fn n_windows(&self) -> usize {
        self.temporal.len_of(Axis(2))
    }
}

/// Copy of `x` with `left` and `right` zero steps around the time axis
fn pad_time(x: ArrayView3<'_, f64>, left: usize, right: usize) -> Array3<f64> {
    let (b, c, t) = x.dim();
    let mut out = Array3::<f64>::zeros((b, c, left + t + right));
    out.slice_mut(s![.., .., left..left + t]).assign(&x);
    out
}

fn drop_tail(x: ArrayView3<'_, f64>, n: usize, window_size: usize) -> Result<ArrayView3<'_, f64>> {
    let t = x.len_of(Axis(2));
    if n >= t {
        return Err(ForecastError::InsufficientHistory {
            available: 0,
            required: window_size,
        });
    }
    Ok(x.slice_move(s![.., .., ..t - n]))
}

/// First time index at which every series in the batch is available
fn warm_up_index(temporal: &Array3<f64>, mask_idx: usize) -> Option<usize> {
    let mask = temporal.index_axis(Axis(1), mask_idx);
    mask.axis_iter(Axis(1))
        .position(|step| step.fold(f64::INFINITY, |acc, &m| acc.min(m)) != 0.0)
}

/// Extract every window of width `1 + h` from a padded batch.
///
/// - train drops the validation and test tails, pads `h` zeros on the right,
///   cuts the leading steps before the batch-wide warm-up point and, when more
///   than `input_size` windows remain, keeps one random contiguous run of
///   `input_size` windows
/// - val drops the test tail, pads `h` zeros and keeps the last
///   `inference_input_size + val_size` windows
/// - predict pads `h` zeros only without a test region and without future
///   exogenous channels, left-pads one step when only the test region is
///   visible, and keeps the last `inference_input_size + test_size` windows
pub fn create_windows<R: Rng>(
    batch: &TemporalBatch,
    step: StepKind,
    cfg: &WindowConfig,
    rng: &mut R,
) -> Result<WindowsBatch> {
    let window_size = cfg.window_size();
    let raw = batch.temporal.view();

    let temporal = match step {
        StepKind::Train => {
            let kept = drop_tail(raw, cfg.val_size + cfg.test_size, window_size)?;
            let padded = pad_time(kept, 0, cfg.h);
            let mask_idx = batch.temporal_cols.get_loc(MASK_COL)?;
            let start = warm_up_index(&padded, mask_idx).ok_or(ForecastError::InsufficientHistory {
                available: 0,
                required: window_size,
            })?;
            let available = padded.len_of(Axis(2)) - start;
            if available < window_size {
                return Err(ForecastError::InsufficientHistory {
                    available,
                    required: window_size,
                });
            }
            padded.slice_move(s![.., .., start..])
        }
        StepKind::Val => {
            let kept = drop_tail(raw, cfg.test_size, window_size)?;
            pad_time(kept, 0, cfg.h)
        }
        StepKind::Predict => {
            let right = if cfg.test_size == 0 && !cfg.has_futr_exog { cfg.h } else { 0 };
            let left = usize::from(raw.len_of(Axis(2)) + right == cfg.test_size);
            pad_time(raw, left, right)
        }
    };

    let length = temporal.len_of(Axis(2));
    if length < window_size {
        return Err(ForecastError::InsufficientHistory {
            available: length,
            required: window_size,
        });
    }
    let n_windows = length - window_size + 1;

    let (first, count) = match (step, cfg.input_size, cfg.inference_input_size) {
        (StepKind::Train, Some(input_size), _) if n_windows > input_size => {
            let start = rng.gen_range(0..=n_windows - input_size);
            (start, input_size)
        }
        (StepKind::Val, _, Some(inference)) => {
            let keep = (inference + cfg.val_size).min(n_windows);
            (n_windows - keep, keep)
        }
        (StepKind::Predict, _, Some(inference)) => {
            let keep = (inference + cfg.test_size).min(n_windows);
            (n_windows - keep, keep)
        }
        _ => (0, n_windows),
    };

    let (b, c, _) = temporal.dim();
    let windows = Array4::from_shape_fn((b, c, count, window_size), |(i, j, w, k)| {
        temporal[[i, j, first + w + k]]
    });
    debug!(
        step = %step,
        n_windows,
        kept = count,
        first,
        "Extracted windows"
    );

    Ok(WindowsBatch {
        temporal: windows,
        temporal_cols: Arc::clone(&batch.temporal_cols),
        static_: batch.static_.clone(),
        static_cols: batch.static_cols.clone(),
    })
}
