//! Stacking of per-series items into batch tensors

use crate::dataset::ChannelIndex;
use crate::error::{ForecastError, Result};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::ThreadPool;
use std::sync::Arc;

/// One left-padded series, `(channels × max_size)`
#[derive(Debug, Clone)]
pub struct TemporalItem {
    pub temporal: Array2<f64>,
    pub temporal_cols: Arc<ChannelIndex>,
    pub static_: Option<Array1<f64>>,
    pub static_cols: Option<Arc<ChannelIndex>>,
}

/// Stacked items, `(batch × channels × time)`
#[derive(Debug, Clone)]
pub struct TemporalBatch {
    pub temporal: Array3<f64>,
    pub temporal_cols: Arc<ChannelIndex>,
    /// `(batch × static channels)`
    pub static_: Option<Array2<f64>>,
    pub static_cols: Option<Arc<ChannelIndex>>,
}

impl TemporalBatch {
    /// Number of series in the batch
    pub fn batch_size(&self) -> usize {
        self.temporal.len_of(Axis(0))
    }

    /// Padded time length
    pub fn time_len(&self) -> usize {
        self.temporal.len_of(Axis(2))
    }
}

fn same_cols(a: &Arc<ChannelIndex>, b: &Arc<ChannelIndex>) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

fn check_uniform(items: &[TemporalItem]) -> Result<&TemporalItem> {
    let elem = items
        .first()
        .ok_or_else(|| ForecastError::TypeError("cannot collate an empty batch".to_string()))?;

    for (i, item) in items.iter().enumerate().skip(1) {
        if item.temporal.dim() != elem.temporal.dim() {
            return Err(ForecastError::TypeError(format!(
                "item {} has temporal shape {:?}, expected {:?}",
                i,
                item.temporal.dim(),
                elem.temporal.dim()
            )));
        }
        if !same_cols(&item.temporal_cols, &elem.temporal_cols) {
            return Err(ForecastError::TypeError(format!(
                "item {} has temporal columns {}, expected {}",
                i, item.temporal_cols, elem.temporal_cols
            )));
        }
        match (&item.static_, &elem.static_) {
            (Some(a), Some(b)) if a.len() == b.len() => {}
            (None, None) => {}
            _ => {
                return Err(ForecastError::TypeError(format!(
                    "item {} static features do not match the first item",
                    i
                )))
            }
        }
    }
    Ok(elem)
}

/// Stack `items` along a new leading axis.
///
/// With a worker pool, every item is copied straight into one pre-allocated
/// buffer from the workers. Both paths produce the same batch.
pub fn collate(items: &[TemporalItem], pool: Option<&ThreadPool>) -> Result<TemporalBatch> {
    let elem = check_uniform(items)?;
    let (n_channels, n_time) = elem.temporal.dim();

    let temporal = match pool {
        Some(pool) => {
            let mut out = Array3::<f64>::zeros((items.len(), n_channels, n_time));
            pool.install(|| {
                out.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(i, mut dst)| dst.assign(&items[i].temporal));
            });
            out
        }
        None => {
            let views: Vec<ArrayView2<'_, f64>> = items.iter().map(|it| it.temporal.view()).collect();
            ndarray::stack(Axis(0), &views)?
        }
    };

    let static_ = match elem.static_ {
        Some(_) => {
            let views: Vec<ArrayView1<'_, f64>> = items
                .iter()
                .filter_map(|it| it.static_.as_ref().map(|s| s.view()))
                .collect();
            Some(ndarray::stack(Axis(0), &views)?)
        }
        None => None,
    };

    Ok(TemporalBatch {
        temporal,
        temporal_cols: Arc::clone(&elem.temporal_cols),
        static_,
        static_cols: elem.static_cols.clone(),
    })
}
