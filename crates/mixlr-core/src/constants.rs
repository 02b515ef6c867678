//! Analysis related constants

use std::time::Duration;

// =============================================================================
// Dropout grid parameters
// =============================================================================

/// Smallest dropout increment used by the sweep and the estimator grid
pub const MIN_DROPOUT_STEP: f64 = 0.01;

/// Tolerance used when comparing grid positions against range bounds
pub const GRID_EPSILON: f64 = 1e-9;

// =============================================================================
// Scheduling parameters
// =============================================================================

/// Number of enumeration steps between two progress updates of a locus job
pub const PROGRESS_INTERVAL: u64 = 1 << 10; // 1,024

/// Job size above which a locus is split into several partial jobs
pub const DEFAULT_SPLIT_THRESHOLD: u64 = 1 << 16; // 65,536

/// Upper bound on the number of partial jobs a single locus is split into
pub const MAX_CHUNKS_PER_LOCUS: usize = 64;

/// Time in-flight jobs are given to observe an abort before a warning is logged
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Dropout estimation parameters
// =============================================================================

/// Lower percentile reported as the plausible dropout range
pub const LOWER_PERCENTILE: f64 = 0.05;

/// Upper percentile reported as the plausible dropout range
pub const UPPER_PERCENTILE: f64 = 0.95;

/// Default number of Monte-Carlo iterations
pub const DEFAULT_ITERATIONS: usize = 1000;

// =============================================================================
// Hypothesis naming
// =============================================================================

/// Conventional identifier of the prosecution hypothesis
pub const PROSECUTION: &str = "Prosecution";

/// Conventional identifier of the defense hypothesis
pub const DEFENSE: &str = "Defense";

/// Subject name used for the overall ratio
pub const OVERALL: &str = "Overall";
