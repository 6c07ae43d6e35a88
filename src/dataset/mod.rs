//! Ragged time-series storage
//!
//! Holds many variable-length series in one contiguous buffer plus an offset
//! index, and builds that buffer from long-format polars tables.

mod columns;
mod frame;
mod store;

pub use columns::ChannelIndex;
pub use frame::{align, from_df, update_dataset, FromDfOutput};
pub use store::TimeSeriesDataset;

/// Series identifier column of input tables
pub const ID_COL: &str = "unique_id";
/// Timestamp column of input tables
pub const TIME_COL: &str = "ds";
/// Target channel, always stored at position 0
pub const TARGET_COL: &str = "y";
/// Availability mask channel
pub const MASK_COL: &str = "available_mask";
