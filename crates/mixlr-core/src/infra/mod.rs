//! Infrastructure layer - Threading primitives
//!
//! This module wraps the worker pool and the cancellation flag shared by
//! the jobs of a run.

pub mod cancel;
pub mod pool;
