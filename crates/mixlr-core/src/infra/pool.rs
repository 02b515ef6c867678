//! Worker pool construction

use crate::error::{AnalysisError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::num::NonZeroUsize;
use std::thread;

/// Number of workers for a configured thread count (0 = available parallelism)
pub fn resolve_threads(threads: usize) -> usize {
    if threads > 0 {
        return threads;
    }
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Build a named worker pool with `threads` workers
pub fn build_pool(threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(resolve_threads(threads))
        .thread_name(|i| format!("mixlr-worker-{}", i))
        .build()
        .map_err(|e| AnalysisError::WorkerPool {
            message: format!("failed to create thread pool: {}", e),
        })
}
