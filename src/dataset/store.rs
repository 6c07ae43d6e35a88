//! Ragged-array storage for many variable-length series
//!
//! All series share one contiguous `(n_data × n_channels)` buffer. Series `i`
//! occupies rows `indptr[i]..indptr[i + 1]`. Structural operations never touch
//! the receiver: they build a fresh dataset so that readers holding an
//! `Arc<TimeSeriesDataset>` keep a consistent view.

use super::columns::ChannelIndex;
use super::MASK_COL;
use crate::batch::TemporalItem;
use crate::error::{ForecastError, Result};
use ndarray::{s, Array1, Array2, ArrayView2};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Compressed collection of independent time series
#[derive(Debug, Clone)]
pub struct TimeSeriesDataset {
    temporal: Array2<f64>,
    temporal_cols: Arc<ChannelIndex>,
    indptr: Vec<usize>,
    max_size: usize,
    min_size: usize,
    static_: Option<Arc<Array2<f64>>>,
    static_cols: Option<Arc<ChannelIndex>>,
    updated: bool,
    sorted: bool,
}

impl TimeSeriesDataset {
    /// Create a dataset from a row buffer and its offsets.
    ///
    /// `indptr` must start at 0, end at `temporal.nrows()` and delimit
    /// non-empty series. The static matrix, when given, needs one row per
    /// series and one column per static channel.
    pub fn new(
        temporal: Array2<f64>,
        temporal_cols: ChannelIndex,
        indptr: Vec<usize>,
        static_: Option<Array2<f64>>,
        static_cols: Option<ChannelIndex>,
        sorted: bool,
    ) -> Result<Self> {
        Self::from_parts(
            temporal,
            Arc::new(temporal_cols),
            indptr,
            static_.map(Arc::new),
            static_cols.map(Arc::new),
            sorted,
            false,
        )
    }

    fn from_parts(
        temporal: Array2<f64>,
        temporal_cols: Arc<ChannelIndex>,
        indptr: Vec<usize>,
        static_: Option<Arc<Array2<f64>>>,
        static_cols: Option<Arc<ChannelIndex>>,
        sorted: bool,
        updated: bool,
    ) -> Result<Self> {
        if temporal.ncols() != temporal_cols.len() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} temporal columns", temporal_cols.len()),
                actual: format!("{} columns", temporal.ncols()),
            });
        }
        if !temporal_cols.contains(MASK_COL) {
            return Err(ForecastError::SchemaError(format!(
                "temporal columns must include '{}'",
                MASK_COL
            )));
        }
        if indptr.len() < 2 || indptr[0] != 0 {
            return Err(ForecastError::RangeError(
                "offsets must start at 0 and describe at least one series".to_string(),
            ));
        }
        if indptr[indptr.len() - 1] != temporal.nrows() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} rows", indptr[indptr.len() - 1]),
                actual: format!("{} rows", temporal.nrows()),
            });
        }
        if indptr.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ForecastError::RangeError(
                "every series must contain at least one observation".to_string(),
            ));
        }

        let n_groups = indptr.len() - 1;
        match (&static_, &static_cols) {
            (Some(stat), Some(cols)) => {
                if stat.dim() != (n_groups, cols.len()) {
                    return Err(ForecastError::ShapeError {
                        expected: format!("({}, {}) static matrix", n_groups, cols.len()),
                        actual: format!("{:?}", stat.dim()),
                    });
                }
            }
            (None, None) => {}
            _ => {
                return Err(ForecastError::SchemaError(
                    "static data and static columns must be given together".to_string(),
                ))
            }
        }

        let sizes = indptr.windows(2).map(|w| w[1] - w[0]);
        let max_size = sizes.clone().max().unwrap_or(0);
        let min_size = sizes.min().unwrap_or(0);

        Ok(Self {
            temporal,
            temporal_cols,
            indptr,
            max_size,
            min_size,
            static_,
            static_cols,
            updated,
            sorted,
        })
    }

    /// Number of series
    pub fn n_groups(&self) -> usize {
        self.indptr.len() - 1
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.n_groups()
    }

    /// Always false: a dataset holds at least one series
    pub fn is_empty(&self) -> bool {
        self.n_groups() == 0
    }

    /// Total number of stored time steps
    pub fn n_data(&self) -> usize {
        self.temporal.nrows()
    }

    /// Length of the longest series
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Length of the shortest series
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Series offsets into the row buffer
    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    /// Length of series `idx`
    pub fn series_len(&self, idx: usize) -> Result<usize> {
        self.check_index(idx)?;
        Ok(self.indptr[idx + 1] - self.indptr[idx])
    }

    /// Raw rows of series `idx`, `(length × n_channels)`
    pub fn series(&self, idx: usize) -> Result<ArrayView2<'_, f64>> {
        self.check_index(idx)?;
        Ok(self.temporal.slice(s![self.indptr[idx]..self.indptr[idx + 1], ..]))
    }

    /// The whole row buffer
    pub fn temporal(&self) -> ArrayView2<'_, f64> {
        self.temporal.view()
    }

    pub fn temporal_cols(&self) -> &Arc<ChannelIndex> {
        &self.temporal_cols
    }

    pub fn static_data(&self) -> Option<&Arc<Array2<f64>>> {
        self.static_.as_ref()
    }

    pub fn static_cols(&self) -> Option<&Arc<ChannelIndex>> {
        self.static_cols.as_ref()
    }

    /// Whether the dataset was built from a table that was sorted on load
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Whether this dataset is the product of `append` or `trim`
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    fn check_index(&self, idx: usize) -> Result<()> {
        if idx >= self.n_groups() {
            return Err(ForecastError::IndexError {
                index: idx,
                len: self.n_groups(),
            });
        }
        Ok(())
    }

    /// Left-padded `(n_channels × max_size)` view of series `idx`.
    ///
    /// Real observations are right-aligned so the most recent step always sits
    /// at the last time index; the unfilled prefix is zero, mask included.
    pub fn get(&self, idx: usize) -> Result<TemporalItem> {
        let ts = self.series(idx)?;
        let mut temporal = Array2::<f64>::zeros((self.temporal_cols.len(), self.max_size));
        let start = self.max_size - ts.nrows();
        temporal.slice_mut(s![.., start..]).assign(&ts.t());

        let static_: Option<Array1<f64>> = self
            .static_
            .as_ref()
            .map(|stat| stat.row(idx).to_owned());

        Ok(TemporalItem {
            temporal,
            temporal_cols: Arc::clone(&self.temporal_cols),
            static_,
            static_cols: self.static_cols.clone(),
        })
    }

    /// Concatenate future observations after every series. Returns a copy.
    pub fn append(&self, futr_dataset: &TimeSeriesDataset) -> Result<TimeSeriesDataset> {
        if self.n_groups() != futr_dataset.n_groups() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} groups", self.n_groups()),
                actual: format!("{} groups in future dataset", futr_dataset.n_groups()),
            });
        }
        let n_cols = self.temporal_cols.len();
        if futr_dataset.temporal_cols.len() != n_cols {
            return Err(ForecastError::ShapeError {
                expected: format!("{} temporal columns", n_cols),
                actual: format!("{} columns in future dataset", futr_dataset.temporal_cols.len()),
            });
        }

        let mut new_indptr = Vec::with_capacity(self.indptr.len());
        new_indptr.push(0);
        for i in 0..self.n_groups() {
            let new_size = (self.indptr[i + 1] - self.indptr[i])
                + (futr_dataset.indptr[i + 1] - futr_dataset.indptr[i]);
            new_indptr.push(new_indptr[i] + new_size);
        }

        let mut new_temporal = Array2::<f64>::zeros((new_indptr[self.n_groups()], n_cols));
        for i in 0..self.n_groups() {
            let curr = self.series(i)?;
            let futr = futr_dataset.series(i)?;
            let split = new_indptr[i] + curr.nrows();
            new_temporal
                .slice_mut(s![new_indptr[i]..split, ..])
                .assign(&curr);
            new_temporal
                .slice_mut(s![split..new_indptr[i + 1], ..])
                .assign(&futr);
        }

        let updated = Self::from_parts(
            new_temporal,
            Arc::clone(&self.temporal_cols),
            new_indptr,
            self.static_.clone(),
            self.static_cols.clone(),
            self.sorted,
            true,
        )?;
        debug!(
            n_groups = updated.n_groups(),
            appended = futr_dataset.n_data(),
            max_size = updated.max_size,
            "Appended future observations"
        );
        Ok(updated)
    }

    /// Drop `left_trim` leading and `right_trim` trailing steps of every series.
    ///
    /// Returns temporal indexes `[t + left, t - right)` for all series.
    pub fn trim(&self, left_trim: usize, right_trim: usize) -> Result<TimeSeriesDataset> {
        let total_trim = left_trim.checked_add(right_trim).ok_or_else(|| {
            ForecastError::RangeError(format!(
                "left_trim + right_trim ({} + {}) overflows",
                left_trim, right_trim
            ))
        })?;
        if self.min_size <= total_trim {
            return Err(ForecastError::RangeError(format!(
                "left_trim + right_trim ({} + {}) must be lower than the shorter time series ({})",
                left_trim, right_trim, self.min_size
            )));
        }

        let n_cols = self.temporal_cols.len();
        let mut new_temporal =
            Array2::<f64>::zeros((self.n_data() - total_trim * self.n_groups(), n_cols));
        let mut new_indptr = Vec::with_capacity(self.indptr.len());
        new_indptr.push(0);

        let mut acum = 0;
        for i in 0..self.n_groups() {
            let kept = self
                .temporal
                .slice(s![self.indptr[i] + left_trim..self.indptr[i + 1] - right_trim, ..]);
            new_temporal
                .slice_mut(s![acum..acum + kept.nrows(), ..])
                .assign(&kept);
            acum += kept.nrows();
            new_indptr.push(acum);
        }

        let trimmed = Self::from_parts(
            new_temporal,
            Arc::clone(&self.temporal_cols),
            new_indptr,
            self.static_.clone(),
            self.static_cols.clone(),
            self.sorted,
            true,
        )?;
        debug!(left_trim, right_trim, min_size = trimmed.min_size, "Trimmed dataset");
        Ok(trimmed)
    }

    /// Static-style alias of [`TimeSeriesDataset::trim`]
    pub fn trim_dataset(
        dataset: &TimeSeriesDataset,
        left_trim: usize,
        right_trim: usize,
    ) -> Result<TimeSeriesDataset> {
        dataset.trim(left_trim, right_trim)
    }
}

fn all_close(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> bool {
    const RTOL: f64 = 1e-5;
    const ATOL: f64 = 1e-8;
    a.dim() == b.dim()
        && a.iter().zip(b.iter()).all(|(&x, &y)| {
            (x.is_nan() && y.is_nan()) || x == y || (x - y).abs() <= ATOL + RTOL * y.abs()
        })
}

impl PartialEq for TimeSeriesDataset {
    fn eq(&self, other: &Self) -> bool {
        self.indptr == other.indptr
            && self.temporal_cols == other.temporal_cols
            && all_close(self.temporal.view(), other.temporal.view())
    }
}

impl fmt::Display for TimeSeriesDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimeSeriesDataset(n_data={}, n_groups={})",
            self.n_data(),
            self.n_groups()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_series() -> TimeSeriesDataset {
        // series 0: y = 1, 2 ; series 1: y = 10, 20, 30
        let temporal = array![
            [1.0, 1.0],
            [2.0, 1.0],
            [10.0, 1.0],
            [20.0, 1.0],
            [30.0, 1.0],
        ];
        let cols = ChannelIndex::new(["y", "available_mask"]).unwrap();
        TimeSeriesDataset::new(temporal, cols, vec![0, 2, 5], None, None, false).unwrap()
    }

    #[test]
    fn test_sizes_cached() {
        let ds = two_series();
        assert_eq!(ds.n_groups(), 2);
        assert_eq!(ds.max_size(), 3);
        assert_eq!(ds.min_size(), 2);
        assert_eq!(ds.to_string(), "TimeSeriesDataset(n_data=5, n_groups=2)");
    }

    #[test]
    fn test_get_left_pads() {
        let ds = two_series();
        let item = ds.get(0).unwrap();
        assert_eq!(item.temporal, array![[0.0, 1.0, 2.0], [0.0, 1.0, 1.0]]);
        let item = ds.get(1).unwrap();
        assert_eq!(item.temporal.row(0).to_vec(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_get_out_of_range() {
        let ds = two_series();
        assert!(matches!(ds.get(2), Err(ForecastError::IndexError { index: 2, len: 2 })));
    }

    #[test]
    fn test_invalid_offsets() {
        let cols = ChannelIndex::new(["y", "available_mask"]).unwrap();
        let temporal = Array2::<f64>::ones((3, 2));
        let empty_series = TimeSeriesDataset::new(temporal.clone(), cols.clone(), vec![0, 0, 3], None, None, false);
        assert!(matches!(empty_series, Err(ForecastError::RangeError(_))));
        let wrong_end = TimeSeriesDataset::new(temporal, cols, vec![0, 2], None, None, false);
        assert!(matches!(wrong_end, Err(ForecastError::ShapeError { .. })));
    }

    #[test]
    fn test_append_interleaves_groups() {
        let ds = two_series();
        let futr_cols = ChannelIndex::new(["y", "available_mask"]).unwrap();
        let futr = TimeSeriesDataset::new(
            array![[3.0, 1.0], [40.0, 1.0]],
            futr_cols,
            vec![0, 1, 2],
            None,
            None,
            false,
        )
        .unwrap();

        let appended = ds.append(&futr).unwrap();
        assert_eq!(appended.indptr(), &[0, 3, 7]);
        assert_eq!(appended.max_size(), 4);
        assert_eq!(appended.min_size(), 3);
        assert!(appended.is_updated());
        assert_eq!(
            appended.temporal().column(0).to_vec(),
            vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0, 40.0]
        );
        // the receiver is untouched
        assert_eq!(ds.n_data(), 5);
    }

    #[test]
    fn test_append_group_mismatch() {
        let ds = two_series();
        let cols = ChannelIndex::new(["y", "available_mask"]).unwrap();
        let futr =
            TimeSeriesDataset::new(array![[3.0, 1.0]], cols, vec![0, 1], None, None, false).unwrap();
        assert!(matches!(ds.append(&futr), Err(ForecastError::ShapeError { .. })));
    }

    #[test]
    fn test_trim() {
        let ds = two_series();
        let trimmed = ds.trim(1, 0).unwrap();
        assert_eq!(trimmed.indptr(), &[0, 1, 3]);
        assert_eq!(trimmed.temporal().column(0).to_vec(), vec![2.0, 20.0, 30.0]);
        assert_eq!(trimmed.max_size(), 2);
        assert_eq!(trimmed.min_size(), 1);
    }

    #[test]
    fn test_trim_would_empty_shortest() {
        let ds = two_series();
        assert!(matches!(ds.trim(1, 1), Err(ForecastError::RangeError(_))));
    }

    #[test]
    fn test_trim_overflowing_bounds() {
        let ds = two_series();
        assert!(matches!(ds.trim(usize::MAX, 1), Err(ForecastError::RangeError(_))));
        assert!(matches!(ds.trim(1, usize::MAX), Err(ForecastError::RangeError(_))));
    }

    #[test]
    fn test_static_row_follows_item() {
        let temporal = Array2::<f64>::ones((3, 2));
        let cols = ChannelIndex::new(["y", "available_mask"]).unwrap();
        let static_cols = ChannelIndex::new(["store_size"]).unwrap();
        let ds = TimeSeriesDataset::new(
            temporal,
            cols,
            vec![0, 1, 3],
            Some(array![[5.0], [7.0]]),
            Some(static_cols),
            true,
        )
        .unwrap();
        let item = ds.get(1).unwrap();
        assert_eq!(item.static_.unwrap().to_vec(), vec![7.0]);
    }
}
