//! Batch-level normalization with held-out leakage protection

use super::scaler::{ScalerType, TemporalNorm};
use crate::batch::TemporalBatch;
use crate::dataset::{ChannelIndex, MASK_COL, TARGET_COL};
use crate::error::{ForecastError, Result};
use ndarray::{s, Array, ArrayView, ArrayView1, Axis, RemoveAxis};
use tracing::debug;

/// Positions of the channels that get normalized: the target plus every
/// configured exogenous channel present in `temporal_cols`, in channel order.
/// The mask is never part of the result.
pub fn temporal_data_cols(
    temporal_cols: &ChannelIndex,
    hist_exog: &[String],
    futr_exog: &[String],
) -> Result<Vec<usize>> {
    let mut cols = vec![temporal_cols.get_loc(TARGET_COL)?];
    cols.extend(
        hist_exog
            .iter()
            .chain(futr_exog.iter())
            .filter(|name| name.as_str() != MASK_COL)
            .filter_map(|name| temporal_cols.position(name)),
    );
    cols.sort_unstable();
    cols.dedup();
    Ok(cols)
}

/// Normalizes the data channels of a batch and keeps the statistics needed to
/// map target-scale model output back to original units
#[derive(Debug, Clone)]
pub struct Normalizer {
    scaler: TemporalNorm,
    hist_exog: Vec<String>,
    futr_exog: Vec<String>,
    data_cols: Vec<usize>,
    target_pos: usize,
}

impl Normalizer {
    pub fn new(scaler_type: ScalerType, hist_exog: Vec<String>, futr_exog: Vec<String>) -> Self {
        Self {
            scaler: TemporalNorm::new(scaler_type),
            hist_exog,
            futr_exog,
            data_cols: Vec::new(),
            target_pos: 0,
        }
    }

    pub fn scaler(&self) -> &TemporalNorm {
        &self.scaler
    }

    /// Channel positions normalized by the last call to [`Normalizer::normalize`]
    pub fn data_cols(&self) -> &[usize] {
        &self.data_cols
    }

    /// Normalize `batch` in place.
    ///
    /// The last `val_size + test_size` steps are excluded from the statistics
    /// but still transformed.
    pub fn normalize(&mut self, batch: &mut TemporalBatch, val_size: usize, test_size: usize) -> Result<()> {
        let temporal_cols = &batch.temporal_cols;
        let data_cols = temporal_data_cols(temporal_cols, &self.hist_exog, &self.futr_exog)?;
        let target_idx = temporal_cols.get_loc(TARGET_COL)?;
        let mask_idx = temporal_cols.get_loc(MASK_COL)?;

        let mut mask = batch.temporal.index_axis(Axis(1), mask_idx).to_owned();
        let cutoff = val_size + test_size;
        if cutoff > 0 {
            let start = batch.time_len().saturating_sub(cutoff);
            mask.slice_mut(s![.., start..]).fill(0.0);
        }

        let mut data = batch.temporal.select(Axis(1), &data_cols);
        self.scaler.fit_transform(data.view_mut(), mask.view())?;
        for (k, &c) in data_cols.iter().enumerate() {
            batch
                .temporal
                .index_axis_mut(Axis(1), c)
                .assign(&data.index_axis(Axis(1), k));
        }

        self.target_pos = data_cols
            .iter()
            .position(|&c| c == target_idx)
            .ok_or_else(|| ForecastError::SchemaError(format!("'{}' was not normalized", TARGET_COL)))?;
        debug!(
            n_channels = data_cols.len(),
            cutoff,
            scaler = ?self.scaler.scaler_type(),
            "Normalized batch"
        );
        self.data_cols = data_cols;
        Ok(())
    }

    /// Target location and scale per batch item
    pub fn target_stats(&self) -> Result<(ArrayView1<'_, f64>, ArrayView1<'_, f64>)> {
        self.scaler.channel_stats(self.target_pos)
    }

    /// Map target-scale values back to original units; the leading axis of
    /// `y_hat` indexes batch items
    pub fn inverse_target<D: RemoveAxis>(&self, y_hat: ArrayView<'_, f64, D>) -> Result<Array<f64, D>> {
        let (shift, scale) = self.target_stats()?;
        TemporalNorm::inverse_transform(y_hat, scale, shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};
    use std::sync::Arc;

    fn batch() -> TemporalBatch {
        let cols = ChannelIndex::new(["y", "price", "holiday", "available_mask"]).unwrap();
        // (1 series × 4 channels × 4 steps)
        let temporal: Array3<f64> = array![[
            [1.0, 2.0, 3.0, 10.0],
            [5.0, 5.0, 7.0, 7.0],
            [0.0, 1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0, 1.0],
        ]];
        TemporalBatch {
            temporal,
            temporal_cols: Arc::new(cols),
            static_: None,
            static_cols: None,
        }
    }

    #[test]
    fn test_data_cols_in_channel_order() {
        let cols = ChannelIndex::new(["y", "price", "holiday", "available_mask"]).unwrap();
        let data_cols = temporal_data_cols(
            &cols,
            &["holiday".to_string(), "absent".to_string()],
            &["price".to_string(), "holiday".to_string()],
        )
        .unwrap();
        assert_eq!(data_cols, vec![0, 1, 2]);
    }

    #[test]
    fn test_unlisted_channels_untouched() {
        let mut b = batch();
        let mut norm = Normalizer::new(ScalerType::Standard, vec![], vec!["price".to_string()]);
        norm.normalize(&mut b, 0, 0).unwrap();
        assert_eq!(norm.data_cols(), &[0, 1]);
        assert_eq!(b.temporal.slice(s![0, 2, ..]).to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(b.temporal.slice(s![0, 3, ..]).to_vec(), vec![1.0; 4]);
    }

    #[test]
    fn test_cutoff_excludes_held_out_steps() {
        let mut b = batch();
        let mut norm = Normalizer::new(ScalerType::Standard, vec![], vec![]);
        norm.normalize(&mut b, 1, 0).unwrap();
        let (shift, _) = norm.target_stats().unwrap();
        // the held-out 10.0 does not move the mean
        assert!((shift[0] - 2.0).abs() < 1e-12);
        // but it is transformed
        assert!(b.temporal[[0, 0, 3]] > 5.0);
    }

    #[test]
    fn test_inverse_target() {
        let original = batch();
        let mut b = original.clone();
        let mut norm = Normalizer::new(ScalerType::Robust, vec![], vec![]);
        norm.normalize(&mut b, 0, 0).unwrap();
        let y = b.temporal.index_axis(Axis(1), 0);
        let restored = norm.inverse_target(y).unwrap();
        for (r, o) in restored.iter().zip(original.temporal.index_axis(Axis(1), 0).iter()) {
            assert!((r - o).abs() < 1e-9);
        }
    }
}
