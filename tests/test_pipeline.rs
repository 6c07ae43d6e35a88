//! Integration test: fit and predict through the recurrent engine

use kolosal_forecast::dataset::{from_df, TimeSeriesDataset};
use kolosal_forecast::prelude::*;
use kolosal_forecast::training::{DistributionLoss, Mse, Sampled};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};
use polars::prelude::*;
use rand::RngCore;
use std::sync::Arc;

const Z_90: f64 = 1.2815515655446004;

/// Two series: `a` = 10..=21 (12 steps), `b` = 110..=124 (15 steps)
fn panel_df() -> DataFrame {
    let mut ids: Vec<&str> = Vec::new();
    let mut ds: Vec<i64> = Vec::new();
    let mut y: Vec<f64> = Vec::new();
    let mut price: Vec<f64> = Vec::new();
    for (uid, len, offset) in [("a", 12usize, 10.0), ("b", 15, 110.0)] {
        for t in 0..len {
            ids.push(uid);
            ds.push(t as i64);
            y.push(offset + t as f64);
            price.push((t % 3) as f64);
        }
    }
    df!("unique_id" => ids, "ds" => ds, "y" => y, "price" => price).unwrap()
}

fn panel() -> Arc<TimeSeriesDataset> {
    Arc::new(from_df(&panel_df(), None, true).unwrap().dataset)
}

/// Repeats the last observed value of every window across the horizon
struct LastValue {
    h: usize,
}

impl ForecastModel for LastValue {
    fn forward(&mut self, input: &ModelInput<'_>) -> kolosal_forecast::Result<ModelOutput> {
        let (b, t, _) = input.insample_y.dim();
        Ok(ModelOutput::Point(Array3::from_shape_fn((b, t, self.h), |(i, w, _)| {
            input.insample_y[[i, w, 0]]
        })))
    }
}

/// Gaussian around the last observed value with unit normalized scale
struct GaussianLastValue {
    h: usize,
}

impl ForecastModel for GaussianLastValue {
    fn forward(&mut self, input: &ModelInput<'_>) -> kolosal_forecast::Result<ModelOutput> {
        let (b, t, _) = input.insample_y.dim();
        let mu = Array3::from_shape_fn((b, t, self.h), |(i, w, _)| input.insample_y[[i, w, 0]]);
        Ok(ModelOutput::Distribution(vec![mu, Array3::ones((b, t, self.h))]))
    }
}

struct Gaussian {
    return_params: bool,
}

impl DistributionLoss for Gaussian {
    fn scale_decouple(
        &self,
        output: &[Array2<f64>],
        loc: ArrayView1<'_, f64>,
        scale: ArrayView1<'_, f64>,
    ) -> kolosal_forecast::Result<Vec<Array2<f64>>> {
        let mut mu = output[0].clone();
        let mut sigma = output[1].mapv(|s| s.abs() + 0.1);
        for (i, (mut m, mut s)) in mu.outer_iter_mut().zip(sigma.outer_iter_mut()).enumerate() {
            m.mapv_inplace(|v| v * scale[i] + loc[i]);
            s.mapv_inplace(|v| v * scale[i]);
        }
        Ok(vec![mu, sigma])
    }

    fn sample(&self, distr_args: &[Array2<f64>], _rng: &mut dyn RngCore) -> kolosal_forecast::Result<Sampled> {
        let (mu, sigma) = (&distr_args[0], &distr_args[1]);
        let lo = mu - &(sigma * Z_90);
        let hi = mu + &(sigma * Z_90);
        let quantiles = ndarray::stack(Axis(2), &[lo.view(), hi.view()])?;
        Ok(Sampled {
            mean: mu.clone(),
            quantiles,
        })
    }

    fn evaluate(
        &self,
        y: ArrayView2<'_, f64>,
        distr_args: &[Array2<f64>],
        mask: ArrayView2<'_, f64>,
    ) -> kolosal_forecast::Result<f64> {
        let mut total = 0.0;
        let mut weight = 0.0;
        Zip::from(&y)
            .and(&distr_args[0])
            .and(&distr_args[1])
            .and(&mask)
            .for_each(|&yv, &mu, &sigma, &m| {
                let nll = 0.5 * (2.0 * std::f64::consts::PI * sigma * sigma).ln()
                    + (yv - mu).powi(2) / (2.0 * sigma * sigma);
                total += m * nll;
                weight += m;
            });
        Ok(if weight == 0.0 { 0.0 } else { total / weight })
    }

    fn output_names(&self) -> Vec<String> {
        let mut names = vec![String::new(), "-lo-80".to_string(), "-hi-80".to_string()];
        if self.return_params {
            names.extend(["-mu".to_string(), "-sigma".to_string()]);
        }
        names
    }

    fn return_params(&self) -> bool {
        self.return_params
    }
}

fn point_engine(config: RecurrentConfig) -> RecurrentEngine<LastValue> {
    let h = config.h;
    RecurrentEngine::new(config, LastValue { h }, Loss::Point(Box::new(Mae)), None).unwrap()
}

#[test]
fn test_fit_schedules_validation() {
    let config = RecurrentConfig::new(2).with_batch_size(1, None).with_steps(6, 2);
    let mut engine = point_engine(config);
    engine.fit(panel(), 2, 0, None).unwrap();

    assert_eq!(engine.global_step(), 6);
    let steps: Vec<usize> = engine.train_trajectories().iter().map(|(s, _)| *s).collect();
    assert_eq!(steps, vec![0, 1, 2, 3, 4, 5]);
    assert!(engine.train_trajectories().iter().all(|(_, l)| l.is_finite()));

    let valid_steps: Vec<usize> = engine.valid_trajectories().iter().map(|(s, _)| *s).collect();
    assert_eq!(valid_steps, vec![2, 4, 6]);
    // two validation windows on a unit-slope line: errors 1, 2 and 1, the
    // last target step falls in the padding
    for (_, loss) in engine.valid_trajectories() {
        assert!((loss - 4.0 / 3.0).abs() < 1e-9, "valid loss {}", loss);
    }
}

#[test]
fn test_val_check_steps_capped_by_max_steps() {
    let config = RecurrentConfig::new(1).with_steps(3, 10);
    let mut engine = point_engine(config);
    engine.fit(panel(), 1, 0, None).unwrap();
    let valid_steps: Vec<usize> = engine.valid_trajectories().iter().map(|(s, _)| *s).collect();
    assert_eq!(valid_steps, vec![3]);
}

#[test]
fn test_fit_is_reproducible_under_seed() {
    let config = RecurrentConfig::new(2)
        .with_input_size(3)
        .with_batch_size(1, None)
        .with_steps(8, 100);
    let mut engine = RecurrentEngine::new(config, LastValue { h: 2 }, Loss::Point(Box::new(Mse)), None).unwrap();

    engine.fit(panel(), 0, 0, Some(7)).unwrap();
    let first = engine.train_trajectories().to_vec();
    engine.fit(panel(), 0, 0, Some(7)).unwrap();
    assert_eq!(engine.train_trajectories(), first.as_slice());
    assert!(engine.valid_trajectories().is_empty());
}

#[test]
fn test_predict_last_window() {
    let mut engine = point_engine(RecurrentConfig::new(2).with_steps(2, 100));
    let ds = panel();
    engine.fit(Arc::clone(&ds), 0, 0, None).unwrap();

    let fcst = engine.predict(ds, 1, None).unwrap();
    assert_eq!(fcst.dim(), (4, 1));
    let expected = [21.0, 21.0, 124.0, 124.0];
    for (got, want) in fcst.column(0).iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{} vs {}", got, want);
    }
}

#[test]
fn test_predict_over_test_region() {
    let mut engine = point_engine(RecurrentConfig::new(2).with_steps(2, 100));
    let ds = panel();
    engine.fit(Arc::clone(&ds), 0, 4, None).unwrap();

    // 1 + 4 - 2 windows per series, 2 horizon steps each
    let fcst = engine.predict(Arc::clone(&ds), 1, None).unwrap();
    assert_eq!(fcst.dim(), (12, 1));
    assert!((fcst[[11, 0]] - 122.0).abs() < 1e-9);
    assert!((fcst[[5, 0]] - 19.0).abs() < 1e-9);

    engine.set_test_size(1);
    assert!(matches!(engine.predict(ds, 1, None), Err(ForecastError::RangeError(_))));
}

#[test]
fn test_predict_rejects_step_size() {
    let mut engine = point_engine(RecurrentConfig::new(2));
    let err = engine.predict(panel(), 2, None).unwrap_err();
    assert!(matches!(err, ForecastError::UnsupportedMode(_)));
}

#[test]
fn test_missing_exogenous_is_schema_error() {
    let config = RecurrentConfig::new(2).with_hist_exog(["temperature"]);
    let mut engine = point_engine(config);
    assert!(matches!(
        engine.fit(panel(), 0, 0, None),
        Err(ForecastError::SchemaError(_))
    ));

    let config = RecurrentConfig::new(2).with_stat_exog(["region"]);
    let mut engine = point_engine(config);
    assert!(matches!(
        engine.predict(panel(), 1, None),
        Err(ForecastError::SchemaError(_))
    ));
}

#[test]
fn test_fit_with_historical_exogenous() {
    let config = RecurrentConfig::new(2)
        .with_hist_exog(["price"])
        .with_steps(4, 2)
        .with_alias("last-value");
    let mut engine = point_engine(config);
    engine.fit(panel(), 2, 0, None).unwrap();
    assert_eq!(engine.to_string(), "last-value");
    assert_eq!(engine.valid_trajectories().len(), 2);
}

#[test]
fn test_distribution_fit_and_predict() {
    let config = RecurrentConfig::new(2).with_steps(4, 2);
    let mut engine = RecurrentEngine::new(
        config,
        GaussianLastValue { h: 2 },
        Loss::Distribution(Box::new(Gaussian { return_params: true })),
        Some(Loss::Point(Box::new(Mae))),
    )
    .unwrap();
    let ds = panel();
    engine.fit(Arc::clone(&ds), 2, 0, None).unwrap();
    assert!(engine.train_trajectories().iter().all(|(_, l)| l.is_finite()));
    for (_, loss) in engine.valid_trajectories() {
        assert!((loss - 4.0 / 3.0).abs() < 1e-9, "valid loss {}", loss);
    }

    let fcst = engine.predict(ds, 1, None).unwrap();
    assert_eq!(fcst.dim(), (4, 5));
    let row = fcst.row(0);
    assert!((row[0] - 21.0).abs() < 1e-9);
    assert!(row[1] < row[0] && row[0] < row[2]);
    assert!((row[3] - row[0]).abs() < 1e-12);
    assert!(row[4] > 0.0);
    assert!((fcst[[3, 0]] - 124.0).abs() < 1e-9);
}
