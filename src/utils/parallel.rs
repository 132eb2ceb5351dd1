use log::debug;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid worker count: {0}")]
    InvalidWorkerCount(usize),
}

/// Runs independent tasks, optionally on a dedicated rayon pool.
///
/// Results always come back in item order, each tagged with the index of the
/// item it was computed from. The first failing task aborts the batch.
pub struct ParallelExecutor {
    /// `None` when running on the calling thread.
    pool: Option<rayon::ThreadPool>,
    workers: usize,
}

impl ParallelExecutor {
    /// Create a new executor. A single worker runs tasks serially without
    /// building a pool.
    pub fn new(workers: usize) -> Result<Self, ParallelError> {
        if workers == 0 {
            return Err(ParallelError::InvalidWorkerCount(0));
        }
        let pool = if workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()?,
            )
        } else {
            None
        };
        Ok(ParallelExecutor { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Applies `processor` to every item and returns `(index, output)` pairs
    /// sorted by index.
    pub fn execute<T, U, F, E>(&self, items: &[T], processor: F) -> Result<Vec<(usize, U)>, E>
    where
        T: Sync,
        U: Send,
        F: Fn(usize, &T) -> Result<U, E> + Send + Sync,
        E: Send,
    {
        debug!("Running {} tasks on {} worker(s)", items.len(), self.workers);
        let mut results: Vec<(usize, U)> = match &self.pool {
            Some(pool) => pool.install(|| {
                items
                    .par_iter()
                    .enumerate()
                    .map(|(i, item)| processor(i, item).map(|out| (i, out)))
                    .collect::<Result<Vec<_>, E>>()
            })?,
            None => items
                .iter()
                .enumerate()
                .map(|(i, item)| processor(i, item).map(|out| (i, out)))
                .collect::<Result<Vec<_>, E>>()?,
        };
        results.sort_by_key(|(i, _)| *i);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            ParallelExecutor::new(0),
            Err(ParallelError::InvalidWorkerCount(0))
        ));
    }

    #[test]
    fn test_results_keep_item_order() {
        let items: Vec<u64> = (0..50).collect();
        for workers in [1, 4] {
            let executor = ParallelExecutor::new(workers).unwrap();
            let results = executor
                .execute(&items, |i, &x| Ok::<_, String>((i as u64, x * x)))
                .unwrap();
            assert_eq!(results.len(), 50);
            for (idx, (i, (tag, sq))) in results.into_iter().enumerate() {
                assert_eq!(idx, i);
                assert_eq!(tag, i as u64);
                assert_eq!(sq, (i * i) as u64);
            }
        }
    }

    #[test]
    fn test_failure_aborts_batch() {
        let items: Vec<u64> = (0..20).collect();
        let executor = ParallelExecutor::new(3).unwrap();
        let result = executor.execute(&items, |_, &x| {
            if x == 13 {
                Err(format!("task {} failed", x))
            } else {
                Ok(x)
            }
        });
        assert_eq!(result.unwrap_err(), "task 13 failed");
    }
}
