//! Worker pool for data-parallel batch loading

use crate::error::{ForecastError, Result};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for parallel processing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Number of worker threads (None = rayon's default)
    pub n_threads: Option<usize>,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of threads
    pub fn with_threads(mut self, n: usize) -> Self {
        self.n_threads = Some(n);
        self
    }

    /// Get the number of threads to use
    pub fn num_threads(&self) -> usize {
        self.n_threads.unwrap_or_else(rayon::current_num_threads)
    }

    /// Build a dedicated pool sized by this configuration
    pub fn build_pool(&self) -> Result<Arc<ThreadPool>> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads())
            .thread_name(|i| format!("ts-loader-{}", i))
            .build()
            .map(Arc::new)
            .map_err(|e| ForecastError::ConfigError(format!("failed to build worker pool: {}", e)))
    }
}

/// Fallible map over `items`, on `pool` when given, else on the calling thread.
///
/// Output order matches input order in both cases.
pub fn parallel_try_map<T, U, F>(pool: Option<&ThreadPool>, items: &[T], f: F) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> Result<U> + Send + Sync,
{
    match pool {
        Some(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        None => items.iter().map(f).collect(),
    }
}
