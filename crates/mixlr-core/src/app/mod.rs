//! Application layer - Analysis orchestration
//!
//! This module runs the domain computations on the worker pool: the main
//! likelihood ratio analysis, the sensitivity sweep and the dropout
//! estimator.

use std::sync::Arc;

pub mod dropout;
pub mod events;
pub mod scheduler;
pub mod sensitivity;
pub mod task;

/// Progress callback (current, total) shared with worker threads
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;
