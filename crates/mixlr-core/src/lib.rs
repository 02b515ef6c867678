//! mixlr-core - Likelihood ratio engine for forensic DNA mixtures
//!
//! This crate provides functionality to:
//! - Compute Pr(Evidence | Hypothesis) per locus with dropout, drop-in, theta and kinship
//! - Combine per-locus probabilities into per-locus and overall likelihood ratios
//! - Sweep the likelihood ratio over a range of dropout probabilities
//! - Estimate a plausible dropout range by Monte-Carlo simulation

pub mod app;
pub mod constants;
pub mod domain;
pub mod error;
pub mod infra;

// Re-export commonly used types
pub use app::dropout::{DropoutEstimation, DropoutEstimator, EstimationSettings};
pub use app::events::{AnalysisEvent, EventSink};
pub use app::scheduler::{AnalysisConfig, AnalysisScheduler};
pub use app::sensitivity::{SensitivityResult, SensitivitySweep, SweepSettings};
pub use app::task::{AnalysisTask, MainAnalysis, TaskHandle};
pub use constants::*;
pub use domain::case::Case;
pub use domain::genetics::{Allele, Locus, Provenance, Sample};
pub use domain::hypothesis::{Contributor, Hypothesis, HypothesisSelection, Relatedness, Relation};
pub use domain::population::PopulationStatistics;
pub use domain::ratio::{LikelihoodRatio, LocusProbabilities, Ratio};
pub use error::{AnalysisError, Result};
pub use infra::cancel::CancellationToken;
