//! Loss collaborators
//!
//! Losses see flattened rows: `N = series × windows`, `H` horizon steps.

use crate::error::{ForecastError, Result};
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};
use rand::RngCore;

/// What a point loss wants from a distributional model at validation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointTarget {
    /// Sample mean, evaluated as `[N, H, 1]`
    Mean,
    /// Sampled quantiles, evaluated as `[N, H, Q]`
    Quantiles,
}

/// Loss over point (or quantile) predictions
pub trait PointLoss: Send + Sync {
    /// Scalar loss of `y_hat` `[N, H, O]` against `y` `[N, H]`, weighted by `mask` `[N, H]`
    fn evaluate(&self, y: ArrayView2<'_, f64>, y_hat: ArrayView3<'_, f64>, mask: ArrayView2<'_, f64>) -> Result<f64>;

    /// Names of the prediction columns this loss produces
    fn output_names(&self) -> Vec<String> {
        vec![String::new()]
    }

    fn expects(&self) -> PointTarget {
        PointTarget::Mean
    }
}

/// Draws from a fitted distribution
#[derive(Debug, Clone)]
pub struct Sampled {
    /// `[N, H]`
    pub mean: Array2<f64>,
    /// `[N, H, Q]`
    pub quantiles: Array3<f64>,
}

/// Loss over distribution parameters
pub trait DistributionLoss: Send + Sync {
    /// Map raw model output, one `[N, H]` array per parameter, into
    /// distribution arguments in original units
    fn scale_decouple(
        &self,
        output: &[Array2<f64>],
        loc: ArrayView1<'_, f64>,
        scale: ArrayView1<'_, f64>,
    ) -> Result<Vec<Array2<f64>>>;

    fn sample(&self, distr_args: &[Array2<f64>], rng: &mut dyn RngCore) -> Result<Sampled>;

    /// Scalar loss of the distribution against `y` `[N, H]`, weighted by `mask`
    fn evaluate(&self, y: ArrayView2<'_, f64>, distr_args: &[Array2<f64>], mask: ArrayView2<'_, f64>) -> Result<f64>;

    /// Mean, quantile and, with [`DistributionLoss::return_params`], parameter column names
    fn output_names(&self) -> Vec<String>;

    /// Append raw distribution parameters to predictions
    fn return_params(&self) -> bool {
        false
    }
}

/// Training or validation loss, point or distributional
pub enum Loss {
    Point(Box<dyn PointLoss>),
    Distribution(Box<dyn DistributionLoss>),
}

impl Loss {
    pub fn is_distribution_output(&self) -> bool {
        matches!(self, Loss::Distribution(_))
    }

    pub fn output_names(&self) -> Vec<String> {
        match self {
            Loss::Point(loss) => loss.output_names(),
            Loss::Distribution(loss) => loss.output_names(),
        }
    }
}

impl std::fmt::Debug for Loss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Loss::Point(_) => f.write_str("Loss::Point"),
            Loss::Distribution(_) => f.write_str("Loss::Distribution"),
        }
    }
}

fn check_point_shapes(y: &ArrayView2<'_, f64>, y_hat: &ArrayView3<'_, f64>, mask: &ArrayView2<'_, f64>) -> Result<()> {
    let (n, h, _) = y_hat.dim();
    if y.dim() != (n, h) || mask.dim() != (n, h) {
        return Err(ForecastError::ShapeError {
            expected: format!("({}, {}) target and mask", n, h),
            actual: format!("{:?} target, {:?} mask", y.dim(), mask.dim()),
        });
    }
    Ok(())
}

/// Masked mean of `f(y, y_hat)` over every output column; 0 when nothing is observed
fn masked_mean<F>(y: ArrayView2<'_, f64>, y_hat: ArrayView3<'_, f64>, mask: ArrayView2<'_, f64>, f: F) -> Result<f64>
where
    F: Fn(f64, f64) -> f64,
{
    check_point_shapes(&y, &y_hat, &mask)?;
    let mut total = 0.0;
    let mut weight = 0.0;
    for column in y_hat.axis_iter(Axis(2)) {
        Zip::from(&y).and(&column).and(&mask).for_each(|&yv, &pv, &m| {
            total += m * f(yv, pv);
            weight += m;
        });
    }
    if weight == 0.0 {
        return Ok(0.0);
    }
    Ok(total / weight)
}

/// Mean absolute error
#[derive(Debug, Clone, Copy, Default)]
pub struct Mae;

impl PointLoss for Mae {
    fn evaluate(&self, y: ArrayView2<'_, f64>, y_hat: ArrayView3<'_, f64>, mask: ArrayView2<'_, f64>) -> Result<f64> {
        masked_mean(y, y_hat, mask, |a, b| (a - b).abs())
    }
}

/// Mean squared error
#[derive(Debug, Clone, Copy, Default)]
pub struct Mse;

impl PointLoss for Mse {
    fn evaluate(&self, y: ArrayView2<'_, f64>, y_hat: ArrayView3<'_, f64>, mask: ArrayView2<'_, f64>) -> Result<f64> {
        masked_mean(y, y_hat, mask, |a, b| (a - b).powi(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mae_masked() {
        let y = array![[1.0, 2.0], [3.0, 4.0]];
        let y_hat = array![[[2.0], [2.0]], [[3.0], [100.0]]];
        let mask = array![[1.0, 1.0], [1.0, 0.0]];
        let loss = Mae.evaluate(y.view(), y_hat.view(), mask.view()).unwrap();
        assert!((loss - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mse() {
        let y = array![[1.0, 2.0]];
        let y_hat = array![[[3.0], [2.0]]];
        let mask = array![[1.0, 1.0]];
        let loss = Mse.evaluate(y.view(), y_hat.view(), mask.view()).unwrap();
        assert!((loss - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_nan_prediction_propagates() {
        let y = array![[1.0]];
        let y_hat = array![[[f64::NAN]]];
        let mask = array![[1.0]];
        assert!(Mae.evaluate(y.view(), y_hat.view(), mask.view()).unwrap().is_nan());
    }

    #[test]
    fn test_shape_mismatch() {
        let y = array![[1.0, 2.0]];
        let y_hat = array![[[1.0]]];
        let mask = array![[1.0, 1.0]];
        assert!(matches!(
            Mae.evaluate(y.view(), y_hat.view(), mask.view()),
            Err(ForecastError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_loss_kind() {
        let loss = Loss::Point(Box::new(Mae));
        assert!(!loss.is_distribution_output());
        assert_eq!(loss.output_names(), vec![String::new()]);
    }
}
