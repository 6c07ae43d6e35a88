//! Conversions between long-format polars tables and ragged datasets

use super::columns::ChannelIndex;
use super::store::TimeSeriesDataset;
use super::{ID_COL, MASK_COL, TARGET_COL, TIME_COL};
use crate::error::{ForecastError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Result of [`from_df`]
#[derive(Debug, Clone)]
pub struct FromDfOutput {
    pub dataset: TimeSeriesDataset,
    /// Series ids in store order
    pub ids: Vec<String>,
    /// Last timestamp of every series, in store order
    pub last_ds: Series,
    /// Per-row timestamps in store order
    pub ds: Series,
}

fn require_column(df: &DataFrame, name: &str, table: &str) -> Result<()> {
    if df.get_column_index(name).is_none() {
        return Err(ForecastError::SchemaError(format!(
            "{} table is missing required column '{}'",
            table, name
        )));
    }
    Ok(())
}

fn is_numeric(dtype: &DataType) -> bool {
    dtype.is_float() || dtype.is_integer() || matches!(dtype, DataType::Boolean | DataType::Null)
}

/// Numeric column cast to f64 with nulls mapped to NaN
fn float_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df.column(name)?.as_materialized_series();
    if !is_numeric(series.dtype()) {
        return Err(ForecastError::SchemaError(format!(
            "column '{}' must be numeric, got {}",
            name,
            series.dtype()
        )));
    }
    let series = series.strict_cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn string_values(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    series
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::to_string).ok_or_else(|| {
                ForecastError::SchemaError(format!("null value in column '{}'", name))
            })
        })
        .collect()
}

fn non_null<T>(values: impl Iterator<Item = Option<T>>) -> Result<Vec<T>> {
    values
        .map(|v| {
            v.ok_or_else(|| {
                ForecastError::SchemaError(format!("null value in column '{}'", TIME_COL))
            })
        })
        .collect()
}

/// Timestamps as comparable keys. Integer and temporal columns compare on
/// their physical i64 values, float columns as f64.
enum TimeKeys {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

fn time_keys(ds: &Series) -> Result<TimeKeys> {
    let dtype = ds.dtype();
    if dtype.is_float() {
        let values = ds.strict_cast(&DataType::Float64)?;
        return Ok(TimeKeys::Float(non_null(values.f64()?.into_iter())?));
    }
    if !(dtype.is_integer() || dtype.is_temporal()) {
        return Err(ForecastError::SchemaError(format!(
            "column '{}' must be numeric or temporal, got {}",
            TIME_COL, dtype
        )));
    }
    let physical = ds.to_physical_repr().strict_cast(&DataType::Int64)?;
    Ok(TimeKeys::Int(non_null(physical.i64()?.into_iter())?))
}

/// Offsets of contiguous id groups, validating time order inside each group
fn group_offsets<T: PartialOrd>(ids: &[String], times: &[T], sort: bool) -> Result<(Vec<String>, Vec<usize>)> {
    let mut uids: Vec<String> = Vec::new();
    let mut indptr = vec![0usize];
    let mut seen: HashSet<&str> = HashSet::new();

    for (row, id) in ids.iter().enumerate() {
        let new_group = row == 0 || ids[row - 1] != *id;
        if new_group {
            if !seen.insert(id.as_str()) {
                return Err(ForecastError::SchemaError(format!(
                    "rows of series '{}' are not contiguous; set sort to true",
                    id
                )));
            }
            if row > 0 {
                indptr.push(row);
            }
            uids.push(id.clone());
            continue;
        }
        let (prev, curr) = (&times[row - 1], &times[row]);
        if curr == prev {
            return Err(ForecastError::SchemaError(format!(
                "duplicated timestamp in series '{}' at row {}",
                id, row
            )));
        }
        if curr < prev {
            let hint = if sort { "" } else { "; set sort to true" };
            return Err(ForecastError::SchemaError(format!(
                "timestamps of series '{}' are not ascending{}",
                id, hint
            )));
        }
    }
    indptr.push(ids.len());
    Ok((uids, indptr))
}

fn static_matrix(
    static_df: &DataFrame,
    uids: &[String],
) -> Result<(Array2<f64>, ChannelIndex)> {
    require_column(static_df, ID_COL, "static")?;
    let names: Vec<String> = static_df
        .get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .filter(|n| n != ID_COL)
        .collect();
    let static_cols = ChannelIndex::new(names.clone())?;

    let static_ids = string_values(static_df, ID_COL)?;
    let mut row_of: HashMap<&str, usize> = HashMap::with_capacity(static_ids.len());
    for (row, id) in static_ids.iter().enumerate() {
        if row_of.insert(id.as_str(), row).is_some() {
            return Err(ForecastError::SchemaError(format!(
                "static table has more than one row for series '{}'",
                id
            )));
        }
    }

    let columns = names
        .iter()
        .map(|n| float_values(static_df, n))
        .collect::<Result<Vec<_>>>()?;

    let mut matrix = Array2::<f64>::zeros((uids.len(), names.len()));
    for (i, uid) in uids.iter().enumerate() {
        let row = *row_of.get(uid.as_str()).ok_or_else(|| {
            ForecastError::SchemaError(format!("series '{}' has no row in the static table", uid))
        })?;
        for (j, col) in columns.iter().enumerate() {
            matrix[[i, j]] = col[row];
        }
    }
    Ok((matrix, static_cols))
}

/// Build a dataset from a long-format table keyed by `unique_id` and `ds`.
///
/// The target `y` becomes channel 0; every other column keeps its table order.
/// When the table has no `available_mask`, an all-ones mask is appended as the
/// last channel. With `sort = false` the rows must already be grouped by id
/// with strictly ascending timestamps.
pub fn from_df(df: &DataFrame, static_df: Option<&DataFrame>, sort: bool) -> Result<FromDfOutput> {
    for col in [ID_COL, TIME_COL, TARGET_COL] {
        require_column(df, col, "input")?;
    }
    if df.height() == 0 {
        return Err(ForecastError::DataError("input table has no rows".to_string()));
    }

    let df = if sort {
        df.sort([ID_COL, TIME_COL], SortMultipleOptions::default())?
    } else {
        df.clone()
    };

    let ids = string_values(&df, ID_COL)?;
    let ds = df.column(TIME_COL)?.as_materialized_series().clone();
    let (uids, indptr) = match time_keys(&ds)? {
        TimeKeys::Int(times) => group_offsets(&ids, &times, sort)?,
        TimeKeys::Float(times) => group_offsets(&ids, &times, sort)?,
    };

    let mut names: Vec<String> = vec![TARGET_COL.to_string()];
    names.extend(
        df.get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .filter(|n| n != ID_COL && n != TIME_COL && n != TARGET_COL),
    );
    let has_mask = names.iter().any(|n| n == MASK_COL);
    let n_channels = names.len() + usize::from(!has_mask);

    let mut temporal = Array2::<f64>::zeros((df.height(), n_channels));
    for (j, name) in names.iter().enumerate() {
        let values = Array1::from(float_values(&df, name)?);
        temporal.column_mut(j).assign(&values);
    }
    if !has_mask {
        temporal.column_mut(n_channels - 1).fill(1.0);
        names.push(MASK_COL.to_string());
    }
    let temporal_cols = ChannelIndex::new(names)?;

    let (static_, static_cols) = match static_df {
        Some(stat) => {
            let (matrix, cols) = static_matrix(stat, &uids)?;
            (Some(matrix), Some(cols))
        }
        None => (None, None),
    };

    let last_idx: Vec<IdxSize> = indptr[1..].iter().map(|&end| (end - 1) as IdxSize).collect();
    let last_ds = ds.take_slice(&last_idx)?;

    let dataset = TimeSeriesDataset::new(temporal, temporal_cols, indptr, static_, static_cols, sort)?;
    debug!(
        n_groups = dataset.n_groups(),
        n_data = dataset.n_data(),
        max_size = dataset.max_size(),
        min_size = dataset.min_size(),
        "Built dataset from table"
    );

    Ok(FromDfOutput {
        dataset,
        ids: uids,
        last_ds,
        ds,
    })
}

/// Rebuild `df` with exactly the channel layout of `dataset`.
///
/// Channels absent from `df` are filled with NaN and the mask is forced to
/// ones, so the result can be appended to `dataset`.
pub fn align(dataset: &TimeSeriesDataset, df: &DataFrame) -> Result<TimeSeriesDataset> {
    require_column(df, ID_COL, "future")?;
    require_column(df, TIME_COL, "future")?;

    let mut aligned = df.clone();
    let height = aligned.height();
    for col in dataset.temporal_cols().iter() {
        if col == MASK_COL {
            aligned.with_column(Series::new(col.into(), vec![1.0f64; height]))?;
        } else if aligned.get_column_index(col).is_none() {
            aligned.with_column(Series::new(col.into(), vec![f64::NAN; height]))?;
        }
    }

    let mut selection = vec![ID_COL.to_string(), TIME_COL.to_string()];
    selection.extend(dataset.temporal_cols().iter().map(str::to_string));
    let aligned = aligned.select(selection)?;

    let out = from_df(&aligned, None, dataset.is_sorted())?;
    debug!(
        n_groups = out.dataset.n_groups(),
        n_data = out.dataset.n_data(),
        "Aligned future table"
    );
    Ok(out.dataset)
}

/// Align `futr_df` to `dataset` and append it after every series
pub fn update_dataset(dataset: &TimeSeriesDataset, futr_df: &DataFrame) -> Result<TimeSeriesDataset> {
    let futr_dataset = align(dataset, futr_df)?;
    dataset.append(&futr_dataset)
}

impl TimeSeriesDataset {
    /// See [`from_df`]
    pub fn from_df(df: &DataFrame, static_df: Option<&DataFrame>, sort: bool) -> Result<FromDfOutput> {
        from_df(df, static_df, sort)
    }

    /// See [`align`]
    pub fn align(&self, df: &DataFrame) -> Result<TimeSeriesDataset> {
        align(self, df)
    }

    /// See [`update_dataset`]
    pub fn update_dataset(dataset: &TimeSeriesDataset, futr_df: &DataFrame) -> Result<TimeSeriesDataset> {
        update_dataset(dataset, futr_df)
    }
}
