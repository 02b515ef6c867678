//! Analysis event stream
//!
//! A run reports its lifecycle as typed events on a channel. Any consumer
//! (CLI, GUI, log sink) subscribes by holding the receiving end:
//!
//! `AnalysisStarted → {HypothesisStarted → {LocusStarted → LocusFinished}* →
//! HypothesisFinished}* → AnalysisFinished`
//!
//! `Progress` events may be interleaved anywhere before `AnalysisFinished`.

use crate::domain::ratio::{LikelihoodRatio, LocusProbabilities};
use crate::error::Result;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

#[derive(Clone, Debug)]
pub enum AnalysisEvent {
    AnalysisStarted {
        loci: Vec<String>,
        threads: usize,
    },
    HypothesisStarted {
        hypothesis: String,
    },
    LocusStarted {
        hypothesis: String,
        locus: String,
        /// Enumerated combinations, a progress weight only
        job_size: u64,
    },
    LocusFinished {
        hypothesis: String,
        locus: String,
        probability: f64,
    },
    HypothesisFinished {
        hypothesis: String,
        probabilities: LocusProbabilities,
    },
    /// Fraction of the run's enumeration completed, never decreasing
    Progress {
        fraction: f64,
    },
    AnalysisFinished(Result<LikelihoodRatio>),
}

/// Sending half of an event stream; silent sinks drop every event
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    sender: Option<Sender<AnalysisEvent>>,
}

impl EventSink {
    /// Sink that discards events
    pub fn silent() -> Self {
        Self::default()
    }

    /// Create a sink and the receiver subscribed to it
    pub fn channel() -> (Self, Receiver<AnalysisEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn emit(&self, event: AnalysisEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                trace!("event receiver dropped");
            }
        }
    }
}

/// Run-wide progress accumulator
///
/// Workers add completed units concurrently; the fraction is computed and
/// emitted under a lock so listeners see a non-decreasing sequence.
pub(crate) struct ProgressMeter<'a> {
    sink: &'a EventSink,
    total: u64,
    done: AtomicU64,
    reported: Mutex<f64>,
}

impl<'a> ProgressMeter<'a> {
    pub(crate) fn new(sink: &'a EventSink, total: u64) -> Self {
        Self {
            sink,
            total: total.max(1),
            done: AtomicU64::new(0),
            reported: Mutex::new(0.0),
        }
    }

    pub(crate) fn advance(&self, units: u64) {
        self.done.fetch_add(units, Ordering::Relaxed);

        let mut reported = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        let fraction = (self.done.load(Ordering::Relaxed) as f64 / self.total as f64).min(1.0);
        if fraction > *reported {
            *reported = fraction;
            self.sink.emit(AnalysisEvent::Progress { fraction });
        }
    }

    pub(crate) fn fraction(&self) -> f64 {
        *self.reported.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
