//! Parallel analysis scheduler
//!
//! The main analysis computes Pr(E | H) for every enabled locus under both
//! hypotheses. Hypotheses run one after the other; within a hypothesis the
//! loci, and large loci split into chunks, run concurrently on the worker
//! pool. Chunk results are summed in chunk order, so the likelihood ratio
//! does not depend on the number of workers.

use crate::app::events::{AnalysisEvent, EventSink, ProgressMeter};
use crate::constants::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_SPLIT_THRESHOLD};
use crate::domain::case::Case;
use crate::domain::engine::LocusProbabilityEngine;
use crate::domain::genetics::Sample;
use crate::domain::ratio::{LikelihoodRatio, LocusProbabilities, aggregate};
use crate::error::{AnalysisError, Result};
use crate::infra::cancel::CancellationToken;
use crate::infra::pool::{build_pool, resolve_threads};
use rayon::ThreadPool;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Scheduler options
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Worker count (0 = available parallelism)
    pub threads: usize,
    /// Enumeration size above which a locus is split into chunks
    pub split_threshold: u64,
    /// Time in-flight jobs get to stop after a failure before a warning is logged
    pub drain_timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl AnalysisConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_split_threshold(mut self, split_threshold: u64) -> Self {
        self.split_threshold = split_threshold.max(1);
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

/// Runs analyses on a shared worker pool
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct AnalysisScheduler {
    pool: Arc<ThreadPool>,
    config: AnalysisConfig,
}

impl AnalysisScheduler {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        let pool = build_pool(config.threads)?;
        info!(
            threads = pool.current_num_threads(),
            split_threshold = config.split_threshold,
            "analysis scheduler ready"
        );
        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Run the main analysis of `case`
    ///
    /// Emits the full event sequence on `events`, ending with exactly one
    /// `AnalysisFinished` that carries the same outcome as the return value.
    pub fn run(
        &self,
        case: &Case,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<LikelihoodRatio> {
        events.emit(AnalysisEvent::AnalysisStarted {
            loci: case.enabled_loci().to_vec(),
            threads: self.threads(),
        });

        let started = Instant::now();
        let result = self.compute(case, cancel, events);
        match &result {
            Ok(lr) => info!(
                log10_lr = lr.log10(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "analysis finished"
            ),
            Err(e) => info!(error = %e, "analysis failed"),
        }

        events.emit(AnalysisEvent::AnalysisFinished(result.clone()));
        result
    }

    /// Run the analysis without the terminal event
    pub(crate) fn compute(
        &self,
        case: &Case,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<LikelihoodRatio> {
        case.validate()?;

        let replicates: Vec<Arc<Sample>> = case.enabled_replicates().cloned().collect();

        // Prepare everything before any worker starts so configuration
        // errors surface without partial work.
        let mut prepared = Vec::with_capacity(2);
        for hypothesis in case.hypotheses() {
            let engines = case
                .enabled_loci()
                .iter()
                .map(|locus| LocusProbabilityEngine::prepare(hypothesis, &replicates, locus))
                .collect::<Result<Vec<_>>>()?;
            prepared.push(engines);
        }

        let total_work = prepared
            .iter()
            .flatten()
            .map(LocusProbabilityEngine::job_size)
            .fold(0u64, u64::saturating_add);
        debug!(total_work, "engines prepared");
        let progress = ProgressMeter::new(events, total_work);

        let mut results = Vec::with_capacity(2);
        for (hypothesis, engines) in case.hypotheses().into_iter().zip(&prepared) {
            events.emit(AnalysisEvent::HypothesisStarted {
                hypothesis: hypothesis.id().to_string(),
            });
            let probabilities = self.compute_hypothesis(hypothesis.id(), engines, cancel, events, &progress)?;
            events.emit(AnalysisEvent::HypothesisFinished {
                hypothesis: hypothesis.id().to_string(),
                probabilities: probabilities.clone(),
            });
            results.push(probabilities);
        }

        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        aggregate(
            &results[0],
            &results[1],
            case.enabled_loci(),
            case.prosecution().statistics().content_hash(),
        )
    }

    /// Evaluate every locus of one hypothesis on the pool
    ///
    /// The first failing job cancels the others; no new job starts after
    /// that and the call returns once the in-flight jobs have stopped.
    fn compute_hypothesis(
        &self,
        hypothesis: &str,
        engines: &[LocusProbabilityEngine],
        cancel: &CancellationToken,
        events: &EventSink,
        progress: &ProgressMeter<'_>,
    ) -> Result<LocusProbabilities> {
        let trackers: Vec<LocusTracker> = engines
            .iter()
            .map(|engine| LocusTracker::new(engine.chunks(self.config.split_threshold)))
            .collect();

        let jobs: Vec<Job> = trackers
            .iter()
            .enumerate()
            .flat_map(|(locus, tracker)| {
                (0..tracker.ranges.len()).map(move |chunk| Job { locus, chunk })
            })
            .collect();
        debug!(hypothesis, loci = engines.len(), jobs = jobs.len(), "dispatching jobs");

        let abort = cancel.child();
        let first_error: OnceLock<AnalysisError> = OnceLock::new();
        let aborted_at: OnceLock<Instant> = OnceLock::new();

        self.pool.install(|| {
            jobs.par_iter().for_each(|job| {
                if abort.is_cancelled() {
                    return;
                }
                let engine = &engines[job.locus];
                let tracker = &trackers[job.locus];

                if !tracker.started.swap(true, Ordering::AcqRel) {
                    events.emit(AnalysisEvent::LocusStarted {
                        hypothesis: hypothesis.to_string(),
                        locus: engine.locus().to_string(),
                        job_size: engine.job_size(),
                    });
                }

                let range = tracker.ranges[job.chunk].clone();
                match engine.partial_probability(range, &abort, &|units| progress.advance(units)) {
                    Ok(partial) => {
                        if let Some(probability) = tracker.complete(job.chunk, partial) {
                            debug!(hypothesis, locus = engine.locus(), probability, "locus finished");
                            events.emit(AnalysisEvent::LocusFinished {
                                hypothesis: hypothesis.to_string(),
                                locus: engine.locus().to_string(),
                                probability,
                            });
                        }
                    }
                    Err(e) => {
                        if !e.is_cancelled() {
                            warn!(hypothesis, locus = engine.locus(), error = %e, "locus job failed");
                        }
                        if first_error.set(e).is_ok() {
                            let _ = aborted_at.set(Instant::now());
                        }
                        abort.cancel();
                    }
                }
            });
        });

        if let Some(at) = aborted_at.get() {
            let drain = at.elapsed();
            if drain > self.config.drain_timeout {
                warn!(
                    hypothesis,
                    drain_ms = drain.as_millis() as u64,
                    "in-flight jobs took longer than the drain timeout to stop"
                );
            }
        }

        if let Some(error) = first_error.into_inner() {
            return Err(error);
        }
        if abort.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let mut probabilities = LocusProbabilities::new(hypothesis);
        for (engine, tracker) in engines.iter().zip(&trackers) {
            let probability = tracker.total().ok_or(AnalysisError::Cancelled)?;
            probabilities.add(engine.locus(), probability);
        }
        Ok(probabilities)
    }
}

#[derive(Clone, Copy, Debug)]
struct Job {
    locus: usize,
    chunk: usize,
}

/// Completion state of one locus; each chunk slot is written once
struct LocusTracker {
    ranges: Vec<Range<usize>>,
    partials: Vec<OnceLock<f64>>,
    remaining: AtomicUsize,
    started: AtomicBool,
}

impl LocusTracker {
    fn new(ranges: Vec<Range<usize>>) -> Self {
        let partials = ranges.iter().map(|_| OnceLock::new()).collect();
        let remaining = AtomicUsize::new(ranges.len());
        Self {
            ranges,
            partials,
            remaining,
            started: AtomicBool::new(false),
        }
    }

    /// Store a chunk result; returns the locus total once the last chunk is in
    fn complete(&self, chunk: usize, partial: f64) -> Option<f64> {
        let _ = self.partials[chunk].set(partial);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.total()
        } else {
            None
        }
    }

    /// Sum of the partials in chunk order
    fn total(&self) -> Option<f64> {
        self.partials
            .iter()
            .try_fold(0.0, |sum, partial| partial.get().map(|p| sum + p))
    }
}
