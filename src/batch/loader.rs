//! Batch iteration over a shared dataset

use super::collate::{collate, TemporalBatch};
use crate::dataset::TimeSeriesDataset;
use crate::error::{ForecastError, Result};
use crate::utils::{parallel_try_map, ParallelConfig};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::ThreadPool;
use std::sync::Arc;
use tracing::debug;

/// Iterates a dataset in batches of series, fetching and collating each batch
#[derive(Debug, Clone)]
pub struct TimeSeriesLoader {
    dataset: Arc<TimeSeriesDataset>,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    drop_last: bool,
    pool: Option<Arc<ThreadPool>>,
}

impl TimeSeriesLoader {
    pub fn new(dataset: Arc<TimeSeriesDataset>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ForecastError::ConfigError("batch_size must be positive".to_string()));
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle_seed: None,
            drop_last: false,
            pool: None,
        })
    }

    /// Permute series ids with a seeded generator before batching
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Skip the final batch when it holds fewer than `batch_size` series
    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Fetch and collate on a worker pool
    pub fn with_pool(mut self, pool: Option<Arc<ThreadPool>>) -> Self {
        self.pool = pool;
        self
    }

    pub fn dataset(&self) -> &Arc<TimeSeriesDataset> {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per pass
    pub fn len(&self) -> usize {
        let n = self.dataset.n_groups();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Series ids of every batch, in iteration order
    pub fn batch_indices(&self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.n_groups()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        order
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Fetch the given series and stack them into one batch
    pub fn fetch(&self, indices: &[usize]) -> Result<TemporalBatch> {
        let pool = self.pool.as_deref();
        let items = parallel_try_map(pool, indices, |&idx| self.dataset.get(idx))?;
        collate(&items, pool)
    }

    /// One pass over the dataset
    pub fn iter(&self) -> impl Iterator<Item = Result<TemporalBatch>> + '_ {
        let batches = self.batch_indices();
        debug!(
            n_batches = batches.len(),
            batch_size = self.batch_size,
            shuffled = self.shuffle_seed.is_some(),
            "Starting loader pass"
        );
        batches.into_iter().map(move |idx| self.fetch(&idx))
    }
}

/// Builds the train, validation and predict loaders over one dataset
#[derive(Debug, Clone)]
pub struct TimeSeriesDataModule {
    dataset: Arc<TimeSeriesDataset>,
    pub batch_size: usize,
    pub valid_batch_size: usize,
    pub num_workers: usize,
    pub drop_last: bool,
    pool: Option<Arc<ThreadPool>>,
}

impl TimeSeriesDataModule {
    /// `num_workers == 0` loads on the calling thread
    pub fn new(
        dataset: Arc<TimeSeriesDataset>,
        batch_size: usize,
        valid_batch_size: usize,
        num_workers: usize,
        drop_last: bool,
    ) -> Result<Self> {
        let pool = if num_workers > 0 {
            Some(ParallelConfig::new().with_threads(num_workers).build_pool()?)
        } else {
            None
        };
        Ok(Self {
            dataset,
            batch_size,
            valid_batch_size,
            num_workers,
            drop_last,
            pool,
        })
    }

    pub fn dataset(&self) -> &Arc<TimeSeriesDataset> {
        &self.dataset
    }

    /// Shuffled loader; `seed` fixes the permutation of this epoch
    pub fn train_loader(&self, seed: u64) -> Result<TimeSeriesLoader> {
        Ok(TimeSeriesLoader::new(Arc::clone(&self.dataset), self.batch_size)?
            .with_shuffle(seed)
            .with_drop_last(self.drop_last)
            .with_pool(self.pool.clone()))
    }

    pub fn val_loader(&self) -> Result<TimeSeriesLoader> {
        Ok(TimeSeriesLoader::new(Arc::clone(&self.dataset), self.valid_batch_size)?
            .with_drop_last(self.drop_last)
            .with_pool(self.pool.clone()))
    }

    /// Ordered loader that never drops series
    pub fn predict_loader(&self) -> Result<TimeSeriesLoader> {
        Ok(TimeSeriesLoader::new(Arc::clone(&self.dataset), self.valid_batch_size)?
            .with_pool(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ChannelIndex;
    use ndarray::Array2;

    fn dataset(n_groups: usize) -> Arc<TimeSeriesDataset> {
        let mut temporal = Array2::<f64>::ones((n_groups * 2, 2));
        for (i, mut row) in temporal.rows_mut().into_iter().enumerate() {
            row[0] = i as f64;
        }
        let indptr: Vec<usize> = (0..=n_groups).map(|g| g * 2).collect();
        let cols = ChannelIndex::new(["y", "available_mask"]).unwrap();
        Arc::new(TimeSeriesDataset::new(temporal, cols, indptr, None, None, true).unwrap())
    }

    #[test]
    fn test_ordered_batches() {
        let loader = TimeSeriesLoader::new(dataset(5), 2).unwrap();
        assert_eq!(loader.len(), 3);
        assert_eq!(loader.batch_indices(), vec![vec![0, 1], vec![2, 3], vec![4]]);
        let sizes: Vec<usize> = loader.iter().map(|b| b.unwrap().batch_size()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_drop_last() {
        let loader = TimeSeriesLoader::new(dataset(5), 2).unwrap().with_drop_last(true);
        assert_eq!(loader.len(), 2);
        assert_eq!(loader.batch_indices().len(), 2);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let a = TimeSeriesLoader::new(dataset(20), 4).unwrap().with_shuffle(7);
        let b = TimeSeriesLoader::new(dataset(20), 4).unwrap().with_shuffle(7);
        assert_eq!(a.batch_indices(), b.batch_indices());

        let mut all: Vec<usize> = a.batch_indices().into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_pool_fetch() {
        let module = TimeSeriesDataModule::new(dataset(6), 4, 3, 2, false).unwrap();
        let loader = module.predict_loader().unwrap();
        let batches: Vec<TemporalBatch> = loader.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        // series 4 holds rows 8 and 9
        assert_eq!(batches[1].temporal[[1, 0, 1]], 9.0);
    }

    #[test]
    fn test_zero_batch_size() {
        assert!(matches!(
            TimeSeriesLoader::new(dataset(2), 0),
            Err(ForecastError::ConfigError(_))
        ));
    }
}
