//! Batch assembly and loading
//!
//! Fetches padded series from a shared dataset and stacks them into batch
//! tensors, optionally on a rayon worker pool.

mod collate;
mod loader;

pub use collate::{collate, TemporalBatch, TemporalItem};
pub use loader::{TimeSeriesDataModule, TimeSeriesLoader};
