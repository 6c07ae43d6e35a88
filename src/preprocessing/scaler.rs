//! Masked temporal scaling implementations

use crate::error::{ForecastError, Result};
use ndarray::{
    s, Array, Array2, ArrayView, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut3, Axis, RemoveAxis, Zip,
};
use serde::{Deserialize, Serialize};

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerType {
    /// Standard scaling (z-score normalization): (x - mean) / std
    Standard,
    /// Robust scaling using median and IQR
    #[default]
    Robust,
    /// Min-Max scaling to [0, 1]: (x - min) / (max - min)
    MinMax,
    /// Min-Max scaling to [-1, 1]
    MinMax1,
    /// Max absolute scaling: x / max(|x|)
    MaxAbs,
    /// No scaling
    None,
}

/// Location and scale of one series channel
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScalerParams {
    center: f64, // mean, min, median or midpoint
    scale: f64,  // std, range, IQR or max |x|
}

impl ScalerParams {
    const IDENTITY: ScalerParams = ScalerParams { center: 0.0, scale: 1.0 };
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

impl ScalerType {
    fn compute_params(&self, values: &mut [f64]) -> ScalerParams {
        if values.is_empty() {
            return ScalerParams::IDENTITY;
        }
        let n = values.len() as f64;
        let params = match self {
            ScalerType::Standard => {
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                ScalerParams { center: mean, scale: var.sqrt() }
            }
            ScalerType::Robust => {
                values.sort_by(f64::total_cmp);
                let median = quantile_sorted(values, 0.5);
                let iqr = quantile_sorted(values, 0.75) - quantile_sorted(values, 0.25);
                ScalerParams { center: median, scale: iqr }
            }
            ScalerType::MinMax => {
                let (min, max) = min_max(values);
                ScalerParams { center: min, scale: max - min }
            }
            ScalerType::MinMax1 => {
                let (min, max) = min_max(values);
                let half_range = (max - min) / 2.0;
                ScalerParams { center: min + half_range, scale: half_range }
            }
            ScalerType::MaxAbs => {
                let max_abs = values.iter().fold(0.0f64, |a, b| a.max(b.abs()));
                ScalerParams { center: 0.0, scale: max_abs }
            }
            ScalerType::None => ScalerParams::IDENTITY,
        };
        if params.scale == 0.0 || !params.scale.is_finite() {
            ScalerParams { scale: 1.0, ..params }
        } else {
            params
        }
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Per-series, per-channel temporal normalization.
///
/// Statistics are taken along the time axis over the steps where the mask is
/// non-zero and the value is finite. The transform itself covers every step.
#[derive(Debug, Clone)]
pub struct TemporalNorm {
    scaler_type: ScalerType,
    shift: Option<Array2<f64>>,
    scale: Option<Array2<f64>>,
}

impl TemporalNorm {
    pub fn new(scaler_type: ScalerType) -> Self {
        Self {
            scaler_type,
            shift: None,
            scale: None,
        }
    }

    pub fn scaler_type(&self) -> ScalerType {
        self.scaler_type
    }

    /// Fit statistics on `x` of shape `(batch × channels × time)` with a
    /// `(batch × time)` mask shared by all channels
    pub fn fit(&mut self, x: ArrayView3<'_, f64>, mask: ArrayView2<'_, f64>) -> Result<&mut Self> {
        let (batch, channels, time) = x.dim();
        if mask.dim() != (batch, time) {
            return Err(ForecastError::ShapeError {
                expected: format!("({}, {}) mask", batch, time),
                actual: format!("{:?}", mask.dim()),
            });
        }

        let mut shift = Array2::<f64>::zeros((batch, channels));
        let mut scale = Array2::<f64>::ones((batch, channels));
        let mut values = Vec::with_capacity(time);
        for b in 0..batch {
            let row_mask = mask.row(b);
            for c in 0..channels {
                values.clear();
                values.extend(
                    x.slice(s![b, c, ..])
                        .iter()
                        .zip(row_mask.iter())
                        .filter(|(v, m)| **m != 0.0 && v.is_finite())
                        .map(|(&v, _)| v),
                );
                let params = self.scaler_type.compute_params(&mut values);
                shift[[b, c]] = params.center;
                scale[[b, c]] = params.scale;
            }
        }

        self.shift = Some(shift);
        self.scale = Some(scale);
        Ok(self)
    }

    /// Apply `(x - shift) / scale` in place with the fitted statistics
    pub fn transform(&self, mut x: ArrayViewMut3<'_, f64>) -> Result<()> {
        let (shift, scale) = self.fitted()?;
        let (batch, channels, _) = x.dim();
        if shift.dim() != (batch, channels) {
            return Err(ForecastError::ShapeError {
                expected: format!("{:?} (batch, channels)", shift.dim()),
                actual: format!("({}, {})", batch, channels),
            });
        }
        Zip::from(x.lanes_mut(Axis(2)))
            .and(shift)
            .and(scale)
            .for_each(|mut lane, &sh, &sc| lane.mapv_inplace(|v| (v - sh) / sc));
        Ok(())
    }

    /// Fit on `x` and normalize it in place
    pub fn fit_transform(&mut self, mut x: ArrayViewMut3<'_, f64>, mask: ArrayView2<'_, f64>) -> Result<()> {
        self.fit(x.view(), mask)?;
        self.transform(x.view_mut())
    }

    /// Fitted locations, `(batch × channels)`
    pub fn shift(&self) -> Option<&Array2<f64>> {
        self.shift.as_ref()
    }

    /// Fitted scales, `(batch × channels)`
    pub fn scale(&self) -> Option<&Array2<f64>> {
        self.scale.as_ref()
    }

    fn fitted(&self) -> Result<(&Array2<f64>, &Array2<f64>)> {
        match (&self.shift, &self.scale) {
            (Some(shift), Some(scale)) => Ok((shift, scale)),
            _ => Err(ForecastError::DataError("TemporalNorm used before fit".to_string())),
        }
    }

    /// Location and scale of one channel for every batch item
    pub fn channel_stats(&self, channel: usize) -> Result<(ArrayView1<'_, f64>, ArrayView1<'_, f64>)> {
        let (shift, scale) = self.fitted()?;
        if channel >= shift.ncols() {
            return Err(ForecastError::IndexError {
                index: channel,
                len: shift.ncols(),
            });
        }
        Ok((shift.column(channel), scale.column(channel)))
    }

    /// `z * scale + shift`, with one scale/shift per entry of `z`'s leading axis
    pub fn inverse_transform<D: RemoveAxis>(
        z: ArrayView<'_, f64, D>,
        scale: ArrayView1<'_, f64>,
        shift: ArrayView1<'_, f64>,
    ) -> Result<Array<f64, D>> {
        let batch = z.len_of(Axis(0));
        if scale.len() != batch || shift.len() != batch {
            return Err(ForecastError::ShapeError {
                expected: format!("{} scale/shift entries", batch),
                actual: format!("{} scale, {} shift", scale.len(), shift.len()),
            });
        }
        let mut out = z.to_owned();
        for ((mut item, &sc), &sh) in out.axis_iter_mut(Axis(0)).zip(scale.iter()).zip(shift.iter()) {
            item.mapv_inplace(|v| v * sc + sh);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    fn sample() -> (Array3<f64>, Array2<f64>) {
        let x = array![[[1.0, 2.0, 3.0, 4.0, 100.0], [0.0, 0.0, 0.0, 0.0, 0.0]]];
        let mask = array![[1.0, 1.0, 1.0, 1.0, 0.0]];
        (x, mask)
    }

    #[test]
    fn test_standard_ignores_masked_steps() {
        let (mut x, mask) = sample();
        let mut norm = TemporalNorm::new(ScalerType::Standard);
        norm.fit_transform(x.view_mut(), mask.view()).unwrap();

        let shift = norm.shift().unwrap();
        let scale = norm.scale().unwrap();
        assert!((shift[[0, 0]] - 2.5).abs() < 1e-12);
        assert!((scale[[0, 0]] - 1.25f64.sqrt()).abs() < 1e-12);
        // the masked step is still transformed
        assert!((x[[0, 0, 4]] - (97.5 / 1.25f64.sqrt())).abs() < 1e-9);
    }

    #[test]
    fn test_zero_spread_uses_unit_scale() {
        let (mut x, mask) = sample();
        let mut norm = TemporalNorm::new(ScalerType::Standard);
        norm.fit_transform(x.view_mut(), mask.view()).unwrap();
        assert_eq!(norm.scale().unwrap()[[0, 1]], 1.0);
        assert_eq!(norm.shift().unwrap()[[0, 1]], 0.0);
    }

    #[test]
    fn test_robust_median_iqr() {
        let (x, mask) = sample();
        let mut norm = TemporalNorm::new(ScalerType::Robust);
        norm.fit(x.view(), mask.view()).unwrap();
        assert!((norm.shift().unwrap()[[0, 0]] - 2.5).abs() < 1e-12);
        assert!((norm.scale().unwrap()[[0, 0]] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_minmax1_range() {
        let (mut x, mask) = sample();
        let mut norm = TemporalNorm::new(ScalerType::MinMax1);
        norm.fit_transform(x.view_mut(), mask.view()).unwrap();
        assert!((x[[0, 0, 0]] + 1.0).abs() < 1e-12);
        assert!((x[[0, 0, 3]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_usable_points_is_identity() {
        let mut x = array![[[f64::NAN, 5.0]]];
        let mask = array![[1.0, 0.0]];
        let mut norm = TemporalNorm::new(ScalerType::MaxAbs);
        norm.fit_transform(x.view_mut(), mask.view()).unwrap();
        assert_eq!(norm.shift().unwrap()[[0, 0]], 0.0);
        assert_eq!(norm.scale().unwrap()[[0, 0]], 1.0);
        assert_eq!(x[[0, 0, 1]], 5.0);
    }

    #[test]
    fn test_inverse_transform_roundtrip() {
        for scaler_type in [
            ScalerType::Standard,
            ScalerType::Robust,
            ScalerType::MinMax,
            ScalerType::MinMax1,
            ScalerType::MaxAbs,
            ScalerType::None,
        ] {
            let (original, mask) = sample();
            let mut x = original.clone();
            let mut norm = TemporalNorm::new(scaler_type);
            norm.fit_transform(x.view_mut(), mask.view()).unwrap();

            let (shift, scale) = norm.channel_stats(0).unwrap();
            let target = x.index_axis(Axis(1), 0);
            let restored = TemporalNorm::inverse_transform(target, scale, shift).unwrap();
            for (r, o) in restored.iter().zip(original.index_axis(Axis(1), 0).iter()) {
                assert!((r - o).abs() < 1e-9, "{:?}: {} vs {}", scaler_type, r, o);
            }
        }
    }

    #[test]
    fn test_transform_before_fit() {
        let (mut x, _) = sample();
        let norm = TemporalNorm::new(ScalerType::Robust);
        assert!(matches!(norm.transform(x.view_mut()), Err(ForecastError::DataError(_))));
    }
}
