//! Recurrent forecasting engine
//!
//! Sequences normalization, window extraction and window parsing for the
//! train, validation and predict steps, and drives an external model and loss
//! through them.

use super::config::RecurrentConfig;
use super::loss::{Loss, PointTarget};
use super::model::{ForecastModel, ModelInput, ModelOutput};
use crate::batch::{TemporalBatch, TimeSeriesDataModule};
use crate::dataset::TimeSeriesDataset;
use crate::error::{ForecastError, Result};
use crate::preprocessing::Normalizer;
use crate::windows::{create_windows, ParsedWindows, StepKind, WindowConfig, WindowParser};
use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// `[B, T, H]` → `[B * T, H]`
fn flatten_windows(a: ArrayView3<'_, f64>) -> Result<Array2<f64>> {
    let (b, t, h) = a.dim();
    Ok(Array2::from_shape_vec((b * t, h), a.iter().copied().collect())?)
}

/// Repeat every per-series value once per window
fn repeat_per_window(v: ArrayView1<'_, f64>, windows: usize) -> Array1<f64> {
    v.iter()
        .flat_map(|&x| std::iter::repeat(x).take(windows))
        .collect()
}

fn nan_count<'a>(values: impl IntoIterator<Item = &'a f64>) -> usize {
    values.into_iter().filter(|v| v.is_nan()).count()
}

fn check_output(output: &ModelOutput, expected: (usize, usize, usize)) -> Result<()> {
    let consistent = match output {
        ModelOutput::Point(y_hat) => y_hat.dim() == expected,
        ModelOutput::Distribution(args) => !args.is_empty() && args.iter().all(|a| a.dim() == expected),
    };
    if !consistent {
        return Err(ForecastError::ShapeError {
            expected: format!("{:?} model output", expected),
            actual: format!("{:?}", output.dim()),
        });
    }
    Ok(())
}

/// Drives a [`ForecastModel`] through windowed train, validation and predict steps
pub struct RecurrentEngine<M: ForecastModel> {
    config: RecurrentConfig,
    model: M,
    loss: Loss,
    valid_loss: Option<Loss>,
    normalizer: Normalizer,
    parser: WindowParser,
    rng: Xoshiro256PlusPlus,
    val_size: usize,
    test_size: usize,
    global_step: usize,
    train_trajectories: Vec<(usize, f64)>,
    valid_trajectories: Vec<(usize, f64)>,
    validation_step_outputs: Vec<f64>,
}

impl<M: ForecastModel> RecurrentEngine<M> {
    /// Create an engine. `valid_loss` defaults to `loss`.
    pub fn new(config: RecurrentConfig, model: M, loss: Loss, valid_loss: Option<Loss>) -> Result<Self> {
        config.validate()?;
        if let (Loss::Point(_), Some(Loss::Distribution(_))) = (&loss, &valid_loss) {
            return Err(ForecastError::ConfigError(
                "a distributional validation loss needs a distributional training loss".to_string(),
            ));
        }

        let normalizer = Normalizer::new(
            config.scaler_type,
            config.hist_exog_list.clone(),
            config.futr_exog_list.clone(),
        );
        let parser = WindowParser::new(
            config.h,
            config.hist_exog_list.clone(),
            config.futr_exog_list.clone(),
            config.stat_exog_list.clone(),
        );
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.random_seed);

        Ok(Self {
            config,
            model,
            loss,
            valid_loss,
            normalizer,
            parser,
            rng,
            val_size: 0,
            test_size: 0,
            global_step: 0,
            train_trajectories: Vec::new(),
            valid_trajectories: Vec::new(),
            validation_step_outputs: Vec::new(),
        })
    }

    pub fn config(&self) -> &RecurrentConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn loss(&self) -> &Loss {
        &self.loss
    }

    pub fn valid_loss(&self) -> &Loss {
        self.valid_loss.as_ref().unwrap_or(&self.loss)
    }

    /// `(step, loss)` of every training step of the last fit
    pub fn train_trajectories(&self) -> &[(usize, f64)] {
        &self.train_trajectories
    }

    /// `(step, mean loss)` of every validation pass of the last fit
    pub fn valid_trajectories(&self) -> &[(usize, f64)] {
        &self.valid_trajectories
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn val_size(&self) -> usize {
        self.val_size
    }

    pub fn set_val_size(&mut self, val_size: usize) {
        self.val_size = val_size;
    }

    pub fn test_size(&self) -> usize {
        self.test_size
    }

    pub fn set_test_size(&mut self, test_size: usize) {
        self.test_size = test_size;
    }

    fn window_config(&self) -> WindowConfig {
        WindowConfig::new(self.config.h)
            .with_input_size(self.config.input_size)
            .with_inference_input_size(self.config.inference_input_size)
            .with_sizes(self.val_size, self.test_size)
            .with_futr_exog(!self.config.futr_exog_list.is_empty())
    }

    /// Normalize, window and parse one batch
    fn prepare(&mut self, mut batch: TemporalBatch, step: StepKind) -> Result<ParsedWindows> {
        let (val_size, test_size) = match step {
            StepKind::Predict => (0, self.test_size),
            _ => (self.val_size, self.test_size),
        };
        self.normalizer.normalize(&mut batch, val_size, test_size)?;
        let windows = create_windows(&batch, step, &self.window_config(), &mut self.rng)?;
        self.parser.parse(&windows)
    }

    /// Per-row target location and scale for `windows` windows per series
    fn flat_target_stats(&self, windows: usize) -> Result<(Array1<f64>, Array1<f64>)> {
        let (shift, scale) = self.normalizer.target_stats()?;
        Ok((repeat_per_window(shift, windows), repeat_per_window(scale, windows)))
    }

    fn fail_on_nan(&self, loss: f64, stage: &str) -> Result<()> {
        if loss.is_nan() {
            return Err(ForecastError::NumericInstability {
                step: self.global_step,
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// One training step; returns the loss in normalized units for point
    /// losses and in original units for distributional ones
    pub fn training_step(&mut self, batch: TemporalBatch) -> Result<f64> {
        let parsed = self.prepare(batch, StepKind::Train)?;
        let output = self.model.forward(&ModelInput::from(&parsed))?;
        check_output(&output, parsed.outsample_y.dim())?;
        let output_nan = output.nan_count();

        let (_, t, _) = parsed.outsample_y.dim();
        let mask = flatten_windows(parsed.outsample_mask.view())?;
        let loss = match (&self.loss, output) {
            (Loss::Distribution(loss), ModelOutput::Distribution(args)) => {
                let outsample_y = self.normalizer.inverse_target(parsed.outsample_y.view())?;
                let y = flatten_windows(outsample_y.view())?;
                let flat_args = args
                    .iter()
                    .map(|a| flatten_windows(a.view()))
                    .collect::<Result<Vec<_>>>()?;
                let (loc, scale) = self.flat_target_stats(t)?;
                let distr_args = loss.scale_decouple(&flat_args, loc.view(), scale.view())?;
                loss.evaluate(y.view(), &distr_args, mask.view())?
            }
            (Loss::Point(loss), ModelOutput::Point(y_hat)) => {
                let y = flatten_windows(parsed.outsample_y.view())?;
                let y_hat = flatten_windows(y_hat.view())?.insert_axis(Axis(2));
                loss.evaluate(y.view(), y_hat.view(), mask.view())?
            }
            _ => {
                return Err(ForecastError::TypeError(
                    "model output kind does not match the training loss".to_string(),
                ))
            }
        };

        if loss.is_nan() {
            error!(
                step = self.global_step,
                insample_y_nan = nan_count(&parsed.insample_y),
                outsample_y_nan = nan_count(&parsed.outsample_y),
                output_nan,
                "Loss is NaN, training stopped"
            );
            self.fail_on_nan(loss, "train")?;
        }

        self.train_trajectories.push((self.global_step, loss));
        self.model.on_train_loss(loss, self.global_step)?;
        Ok(loss)
    }

    /// One validation step over the last `val_size` windows, in original units.
    ///
    /// Returns NaN without touching the batch when no validation region is set.
    pub fn validation_step(&mut self, batch: TemporalBatch) -> Result<f64> {
        if self.val_size == 0 {
            return Ok(f64::NAN);
        }
        let parsed = self.prepare(batch, StepKind::Val)?;

        // drop the training windows in front and the zero-padded window at the end
        let n_windows = parsed.outsample_y.len_of(Axis(1));
        let val_windows = self.val_size + 1;
        if n_windows < val_windows {
            return Err(ForecastError::InsufficientHistory {
                available: n_windows,
                required: val_windows,
            });
        }
        let range = n_windows - val_windows..n_windows - 1;
        let outsample_y = parsed.outsample_y.slice(s![.., range.clone(), ..]);
        let mask = flatten_windows(parsed.outsample_mask.slice(s![.., range.clone(), ..]))?;

        let output = self.model.forward(&ModelInput::from(&parsed))?;
        check_output(&output, parsed.outsample_y.dim())?;

        let y = flatten_windows(self.normalizer.inverse_target(outsample_y)?.view())?;
        let windows = range.len();
        let valid_loss = match (&self.loss, output) {
            (Loss::Distribution(loss), ModelOutput::Distribution(args)) => {
                let flat_args = args
                    .iter()
                    .map(|a| flatten_windows(a.slice(s![.., range.clone(), ..])))
                    .collect::<Result<Vec<_>>>()?;
                let (loc, scale) = self.flat_target_stats(windows)?;
                let distr_args = loss.scale_decouple(&flat_args, loc.view(), scale.view())?;

                match self.valid_loss.as_ref().unwrap_or(&self.loss) {
                    Loss::Distribution(valid_loss) => valid_loss.evaluate(y.view(), &distr_args, mask.view())?,
                    Loss::Point(valid_loss) => {
                        let sampled = loss.sample(&distr_args, &mut self.rng)?;
                        let y_hat = match valid_loss.expects() {
                            PointTarget::Mean => sampled.mean.insert_axis(Axis(2)),
                            PointTarget::Quantiles => sampled.quantiles,
                        };
                        valid_loss.evaluate(y.view(), y_hat.view(), mask.view())?
                    }
                }
            }
            (Loss::Point(_), ModelOutput::Point(y_hat)) => {
                let y_hat = self
                    .normalizer
                    .inverse_target(y_hat.slice(s![.., range.clone(), ..]))?;
                let y_hat = flatten_windows(y_hat.view())?.insert_axis(Axis(2));
                match self.valid_loss() {
                    Loss::Point(valid_loss) => valid_loss.evaluate(y.view(), y_hat.view(), mask.view())?,
                    Loss::Distribution(_) => {
                        return Err(ForecastError::ConfigError(
                            "a distributional validation loss needs distribution parameters".to_string(),
                        ))
                    }
                }
            }
            _ => {
                return Err(ForecastError::TypeError(
                    "model output kind does not match the training loss".to_string(),
                ))
            }
        };

        if valid_loss.is_nan() {
            error!(step = self.global_step, "Validation loss is NaN, training stopped");
            self.fail_on_nan(valid_loss, "validation")?;
        }
        self.validation_step_outputs.push(valid_loss);
        Ok(valid_loss)
    }

    /// Close a validation pass: record the mean step loss and reset
    pub fn on_validation_epoch_end(&mut self) -> Option<f64> {
        if self.val_size == 0 || self.validation_step_outputs.is_empty() {
            return None;
        }
        let avg_loss =
            self.validation_step_outputs.iter().sum::<f64>() / self.validation_step_outputs.len() as f64;
        self.valid_trajectories.push((self.global_step, avg_loss));
        self.validation_step_outputs.clear();
        debug!(step = self.global_step, valid_loss = avg_loss, "Validation pass finished");
        Some(avg_loss)
    }

    /// Forecasts for every window of a batch in original units,
    /// `[B, T, H, outputs]`
    pub fn predict_step(&mut self, batch: TemporalBatch) -> Result<Array4<f64>> {
        let parsed = self.prepare(batch, StepKind::Predict)?;
        let output = self.model.forward(&ModelInput::from(&parsed))?;
        let (b, t, _) = parsed.insample_y.dim();
        check_output(&output, (b, t, self.config.h))?;
        let h = self.config.h;

        let y_hat: Array3<f64> = match (&self.loss, output) {
            (Loss::Distribution(loss), ModelOutput::Distribution(args)) => {
                let flat_args = args
                    .iter()
                    .map(|a| flatten_windows(a.view()))
                    .collect::<Result<Vec<_>>>()?;
                let (loc, scale) = self.flat_target_stats(t)?;
                let distr_args = loss.scale_decouple(&flat_args, loc.view(), scale.view())?;
                let sampled = loss.sample(&distr_args, &mut self.rng)?;

                let mean = sampled.mean.insert_axis(Axis(2));
                let params = if loss.return_params() {
                    let views: Vec<ArrayView2<'_, f64>> = distr_args.iter().map(|a| a.view()).collect();
                    Some(ndarray::stack(Axis(2), &views)?)
                } else {
                    None
                };
                let mut parts: Vec<ArrayView3<'_, f64>> = vec![mean.view(), sampled.quantiles.view()];
                if let Some(params) = &params {
                    parts.push(params.view());
                }
                ndarray::concatenate(Axis(2), &parts)?
            }
            (Loss::Point(_), ModelOutput::Point(y_hat)) => {
                let y_hat = self.normalizer.inverse_target(y_hat.view())?;
                flatten_windows(y_hat.view())?.insert_axis(Axis(2))
            }
            _ => {
                return Err(ForecastError::TypeError(
                    "model output kind does not match the training loss".to_string(),
                ))
            }
        };

        let n_outputs = y_hat.len_of(Axis(2));
        let expected = self.loss.output_names().len();
        if n_outputs != expected {
            return Err(ForecastError::ShapeError {
                expected: format!("{} output columns", expected),
                actual: format!("{} output columns", n_outputs),
            });
        }
        Ok(Array4::from_shape_vec((b, t, h, n_outputs), y_hat.iter().copied().collect())?)
    }

    fn check_exogenous(&self, dataset: &TimeSeriesDataset) -> Result<()> {
        let temporal_cols = dataset.temporal_cols();
        for (kind, names) in [
            ("historical", &self.config.hist_exog_list),
            ("future", &self.config.futr_exog_list),
        ] {
            let missing = temporal_cols.missing(names);
            if !missing.is_empty() {
                return Err(ForecastError::SchemaError(format!(
                    "{:?} {} exogenous variables not found in input dataset",
                    missing, kind
                )));
            }
        }
        let missing: Vec<&str> = match dataset.static_cols() {
            Some(static_cols) => static_cols.missing(&self.config.stat_exog_list),
            None => self.config.stat_exog_list.iter().map(String::as_str).collect(),
        };
        if !missing.is_empty() {
            return Err(ForecastError::SchemaError(format!(
                "{:?} static exogenous variables not found in input dataset",
                missing
            )));
        }
        Ok(())
    }

    fn data_module(&self, dataset: Arc<TimeSeriesDataset>, drop_last: bool) -> Result<TimeSeriesDataModule> {
        TimeSeriesDataModule::new(
            dataset,
            self.config.batch_size,
            self.config.effective_valid_batch_size(),
            self.config.num_workers_loader,
            drop_last,
        )
    }

    fn run_validation(&mut self, datamodule: &TimeSeriesDataModule) -> Result<()> {
        let loader = datamodule.val_loader()?;
        for batch in loader.iter() {
            self.validation_step(batch?)?;
        }
        self.on_validation_epoch_end();
        Ok(())
    }

    /// Run `max_steps` training steps over shuffled epochs of `dataset`.
    ///
    /// The last `val_size + test_size` steps of every series never reach the
    /// training windows or the normalization statistics. A validation pass
    /// runs every `min(val_check_steps, max_steps)` steps when `val_size > 0`.
    pub fn fit(
        &mut self,
        dataset: impl Into<Arc<TimeSeriesDataset>>,
        val_size: usize,
        test_size: usize,
        random_seed: Option<u64>,
    ) -> Result<()> {
        let dataset = dataset.into();
        self.check_exogenous(&dataset)?;

        let seed = random_seed.unwrap_or(self.config.random_seed);
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self.val_size = val_size;
        self.test_size = test_size;
        self.global_step = 0;
        self.train_trajectories.clear();
        self.valid_trajectories.clear();
        self.validation_step_outputs.clear();

        let datamodule = self.data_module(dataset, self.config.drop_last_loader)?;
        if self.config.val_check_steps > self.config.max_steps {
            warn!(
                val_check_steps = self.config.val_check_steps,
                max_steps = self.config.max_steps,
                "val_check_steps is greater than max_steps, setting val_check_steps to max_steps"
            );
        }
        let val_check_interval = self.config.val_check_steps.min(self.config.max_steps);
        info!(
            model = %self,
            n_series = datamodule.dataset().n_groups(),
            max_steps = self.config.max_steps,
            val_size,
            test_size,
            seed,
            "Starting fit"
        );

        while self.global_step < self.config.max_steps {
            let loader = datamodule.train_loader(self.rng.gen::<u64>())?;
            if loader.is_empty() {
                return Err(ForecastError::ConfigError(
                    "training loader yields no batches; lower batch_size or disable drop_last_loader"
                        .to_string(),
                ));
            }
            for batch in loader.iter() {
                self.training_step(batch?)?;
                self.global_step += 1;
                if self.val_size > 0 && self.global_step % val_check_interval == 0 {
                    self.run_validation(&datamodule)?;
                }
                if self.global_step >= self.config.max_steps {
                    break;
                }
            }
        }

        info!(model = %self, steps = self.global_step, "Fit finished");
        Ok(())
    }

    /// Forecast every series of `dataset`, `(rows × output columns)`.
    ///
    /// Rows run series-major, then window, then horizon step. With a test
    /// region the last `1 + test_size - h` windows of each series are kept,
    /// otherwise only the last one.
    pub fn predict(
        &mut self,
        dataset: impl Into<Arc<TimeSeriesDataset>>,
        step_size: usize,
        random_seed: Option<u64>,
    ) -> Result<Array2<f64>> {
        let dataset = dataset.into();
        self.check_exogenous(&dataset)?;

        let seed = random_seed.unwrap_or(self.config.random_seed);
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        if step_size > 1 {
            return Err(ForecastError::UnsupportedMode(
                "recurrent models do not support step_size > 1".to_string(),
            ));
        }

        let keep = if self.test_size > 0 {
            (1 + self.test_size).checked_sub(self.config.h).filter(|&k| k > 0).ok_or_else(|| {
                ForecastError::RangeError(format!(
                    "test_size ({}) must be at least the horizon ({})",
                    self.test_size, self.config.h
                ))
            })?
        } else {
            1
        };

        let n_outputs = self.loss.output_names().len();
        let datamodule = self.data_module(dataset, false)?;
        info!(model = %self, test_size = self.test_size, keep, "Starting predict");

        let mut values: Vec<f64> = Vec::new();
        for batch in datamodule.predict_loader()?.iter() {
            let fcsts = self.predict_step(batch?)?;
            let t = fcsts.len_of(Axis(1));
            if keep > t {
                return Err(ForecastError::RangeError(format!(
                    "{} forecast windows requested but only {} exist",
                    keep, t
                )));
            }
            values.extend(fcsts.slice(s![.., t - keep.., .., ..]).iter().copied());
        }

        let rows = values.len() / n_outputs;
        Ok(Array2::from_shape_vec((rows, n_outputs), values)?)
    }
}

impl<M: ForecastModel> fmt::Display for RecurrentEngine<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config.alias.as_deref().unwrap_or("RecurrentEngine"))
    }
}
