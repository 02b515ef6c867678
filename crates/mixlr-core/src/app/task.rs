//! Background analysis tasks
//!
//! A task owns a private copy of its inputs, so edits made to the caller's
//! case after submission cannot affect a running analysis.

use crate::app::events::EventSink;
use crate::app::scheduler::AnalysisScheduler;
use crate::domain::case::Case;
use crate::domain::ratio::LikelihoodRatio;
use crate::error::{AnalysisError, Result};
use crate::infra::cancel::CancellationToken;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info};

/// Work that can be submitted to an [`AnalysisScheduler`]
pub trait AnalysisTask: Send + 'static {
    type Output: Send + 'static;

    /// Name used in logs
    fn name(&self) -> &'static str;

    fn run(&self, scheduler: &AnalysisScheduler, cancel: &CancellationToken) -> Result<Self::Output>;
}

/// Likelihood ratio of a case, reporting through an event sink
pub struct MainAnalysis {
    case: Case,
    events: EventSink,
}

impl MainAnalysis {
    pub fn new(case: &Case, events: EventSink) -> Self {
        Self {
            case: case.clone(),
            events,
        }
    }
}

impl AnalysisTask for MainAnalysis {
    type Output = LikelihoodRatio;

    fn name(&self) -> &'static str {
        "main analysis"
    }

    fn run(&self, scheduler: &AnalysisScheduler, cancel: &CancellationToken) -> Result<LikelihoodRatio> {
        scheduler.run(&self.case, cancel, &self.events)
    }
}

/// Handle to a submitted task
pub struct TaskHandle<T> {
    receiver: Receiver<Result<T>>,
    cancel: CancellationToken,
}

impl<T> TaskHandle<T> {
    /// Request cancellation; the task still reports a (cancelled) result
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Block until the task reports its result
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().unwrap_or(Err(AnalysisError::TaskLost))
    }

    /// Wait at most `timeout`; `None` if the task is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(AnalysisError::TaskLost)),
        }
    }
}

impl AnalysisScheduler {
    /// Run `task` in the background on the worker pool
    pub fn submit<T: AnalysisTask>(&self, task: T) -> TaskHandle<T::Output> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let scheduler = self.clone();

        info!(task = task.name(), "task submitted");
        self.pool().spawn(move || {
            let result = task.run(&scheduler, &token);
            if sender.send(result).is_err() {
                debug!(task = task.name(), "task handle dropped before completion");
            }
        });

        TaskHandle { receiver, cancel }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::AnalysisEvent;
    use crate::app::scheduler::AnalysisConfig;
    use crate::domain::genetics::{Locus, Sample};
    use crate::domain::hypothesis::Hypothesis;
    use crate::domain::population::PopulationStatistics;
    use std::sync::Arc;

    struct Constant(u32);

    impl AnalysisTask for Constant {
        type Output = u32;

        fn name(&self) -> &'static str {
            "constant"
        }

        fn run(&self, _: &AnalysisScheduler, cancel: &CancellationToken) -> Result<u32> {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            Ok(self.0)
        }
    }

    fn case() -> Case {
        let stats = Arc::new(
            PopulationStatistics::new("test", 0.001)
                .with_locus("TH01", [("6", 0.2), ("7", 0.3), ("8", 0.5)]),
        );
        let evidence = Arc::new(Sample::new("E1").with_locus(Locus::new("TH01", ["6", "7"])));
        let suspect = Arc::new(Sample::new("S").with_locus(Locus::new("TH01", ["6", "7"])));
        Case::new(
            vec![evidence],
            Hypothesis::new("Prosecution", stats.clone()).with_contributor(suspect, 0.0),
            Hypothesis::new("Defense", stats).with_unknowns(1, 0.0),
        )
    }

    #[test]
    fn test_submit_and_wait() {
        let scheduler = AnalysisScheduler::new(AnalysisConfig::default().with_threads(2)).unwrap();
        let handle = scheduler.submit(Constant(7));
        assert_eq!(handle.wait(), Ok(7));
    }

    #[test]
    fn test_wait_timeout_returns_result() {
        let scheduler = AnalysisScheduler::new(AnalysisConfig::default().with_threads(1)).unwrap();
        let handle = scheduler.submit(Constant(3));
        let result = handle.wait_timeout(Duration::from_secs(10));
        assert_eq!(result, Some(Ok(3)));
    }

    #[test]
    fn test_main_analysis_task() {
        let scheduler = AnalysisScheduler::new(AnalysisConfig::default().with_threads(2)).unwrap();
        let (sink, receiver) = EventSink::channel();
        let handle = scheduler.submit(MainAnalysis::new(&case(), sink));
        let lr = handle.wait().unwrap();

        // LR = 1 / (2 p6 p7)
        let expected = 1.0 / (2.0 * 0.2 * 0.3);
        assert!((lr.overall().ratio - expected).abs() < 1e-9);

        let finished = receiver
            .iter()
            .filter(|e| matches!(e, AnalysisEvent::AnalysisFinished(_)))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_submitted_case_is_a_copy() {
        let scheduler = AnalysisScheduler::new(AnalysisConfig::default().with_threads(1)).unwrap();
        let mut case = case();
        let task = MainAnalysis::new(&case, EventSink::silent());
        case.update_hypotheses(|h| h.set_dropin(0.5));

        let lr = scheduler.submit(task).wait().unwrap();
        let expected = 1.0 / (2.0 * 0.2 * 0.3);
        assert!((lr.overall().ratio - expected).abs() < 1e-9);
    }
}
