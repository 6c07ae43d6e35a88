//! Splitting window batches into named model inputs

use super::extractor::WindowsBatch;
use crate::dataset::{MASK_COL, TARGET_COL};
use crate::error::{ForecastError, Result};
use ndarray::{s, Array2, Array3, Array4, Axis};

/// Named slices of one window batch
///
/// `B` series, `T` windows, `L = 1` history step per window and `h` horizon
/// steps. Exogenous slices are `None` when no channel of that kind is
/// configured.
#[derive(Debug, Clone)]
pub struct ParsedWindows {
    /// `[B, T, L]`
    pub insample_y: Array3<f64>,
    /// `[B, T, L]`
    pub insample_mask: Array3<f64>,
    /// `[B, T, h]`
    pub outsample_y: Array3<f64>,
    /// `[B, T, h]`
    pub outsample_mask: Array3<f64>,
    /// `[B, hist channels, T, L]`
    pub hist_exog: Option<Array4<f64>>,
    /// `[B, futr channels, T, L + h]`, history and horizon both
    pub futr_exog: Option<Array4<f64>>,
    /// `[B, static channels]`
    pub stat_exog: Option<Array2<f64>>,
}

/// Resolves channels by name and slices history from horizon
#[derive(Debug, Clone)]
pub struct WindowParser {
    h: usize,
    hist_exog_list: Vec<String>,
    futr_exog_list: Vec<String>,
    stat_exog_list: Vec<String>,
}

impl WindowParser {
    pub fn new(
        h: usize,
        hist_exog_list: Vec<String>,
        futr_exog_list: Vec<String>,
        stat_exog_list: Vec<String>,
    ) -> Self {
        Self {
            h,
            hist_exog_list,
            futr_exog_list,
            stat_exog_list,
        }
    }

    pub fn parse(&self, windows: &WindowsBatch) -> Result<ParsedWindows> {
        let cols = &windows.temporal_cols;
        let width = windows.temporal.len_of(Axis(3));
        if width <= self.h {
            return Err(ForecastError::ShapeError {
                expected: format!("window width above horizon {}", self.h),
                actual: format!("width {}", width),
            });
        }
        let split = width - self.h;

        let y_idx = cols.get_loc(TARGET_COL)?;
        let mask_idx = cols.get_loc(MASK_COL)?;
        let temporal = &windows.temporal;

        let insample_y = temporal.slice(s![.., y_idx, .., ..split]).to_owned();
        let insample_mask = temporal.slice(s![.., mask_idx, .., ..split]).to_owned();
        let outsample_y = temporal.slice(s![.., y_idx, .., split..]).to_owned();
        let outsample_mask = temporal.slice(s![.., mask_idx, .., split..]).to_owned();

        let hist_exog = if self.hist_exog_list.is_empty() {
            None
        } else {
            let idx = cols.get_indexer(&self.hist_exog_list)?;
            let hist = temporal.slice(s![.., .., .., ..split]);
            Some(hist.select(Axis(1), &idx))
        };

        let futr_exog = if self.futr_exog_list.is_empty() {
            None
        } else {
            let idx = cols.get_indexer(&self.futr_exog_list)?;
            Some(temporal.select(Axis(1), &idx))
        };

        let stat_exog = if self.stat_exog_list.is_empty() {
            None
        } else {
            match (&windows.static_, &windows.static_cols) {
                (Some(stat), Some(stat_cols)) => {
                    let idx = stat_cols.get_indexer(&self.stat_exog_list)?;
                    Some(stat.select(Axis(1), &idx))
                }
                _ => {
                    return Err(ForecastError::SchemaError(format!(
                        "static exogenous {:?} requested but the batch has no static data",
                        self.stat_exog_list
                    )))
                }
            }
        };

        Ok(ParsedWindows {
            insample_y,
            insample_mask,
            outsample_y,
            outsample_mask,
            hist_exog,
            futr_exog,
            stat_exog,
        })
    }
}
