//! Utility functions and types

mod parallel;

pub use parallel::{parallel_try_map, ParallelConfig};
