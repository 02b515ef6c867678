//! Dropout sensitivity sweep
//!
//! Re-runs the main analysis over a linear grid of dropout values and
//! records log10 LR and log10 Pr(E | H) against the dropout.
//!
//! A grid point whose ratio is degenerate (0, infinity, NaN) is retried a
//! few minimal increments further toward the middle of the range, never
//! reaching the neighbouring grid point. Points that stay degenerate are
//! left out of the series but kept in the log.

use crate::app::ProgressCallback;
use crate::app::events::{EventSink, ProgressMeter};
use crate::app::scheduler::AnalysisScheduler;
use crate::app::task::AnalysisTask;
use crate::constants::{GRID_EPSILON, MIN_DROPOUT_STEP};
use crate::domain::case::Case;
use crate::domain::hypothesis::HypothesisSelection;
use crate::domain::ratio::LikelihoodRatio;
use crate::error::{AnalysisError, Result};
use crate::infra::cancel::CancellationToken;
use std::sync::Arc;
use tracing::{debug, info};

/// Series name of the overall likelihood ratio curve
pub const LR_SERIES: &str = "LR";

/// Sweep parameters
#[derive(Clone, Debug)]
pub struct SweepSettings {
    pub from: f64,
    pub to: f64,
    pub steps: usize,
    /// Contributors whose dropout follows the sweep
    pub persons_of_interest: Vec<String>,
    /// Hypotheses whose unknown dropout follows the sweep
    pub unknowns: HypothesisSelection,
    /// Drop-in override for both hypotheses
    pub dropin: Option<f64>,
    /// Theta override for both hypotheses
    pub theta: Option<f64>,
}

impl SweepSettings {
    pub fn new(from: f64, to: f64, steps: usize) -> Self {
        Self {
            from,
            to,
            steps,
            persons_of_interest: Vec::new(),
            unknowns: HypothesisSelection::Neither,
            dropin: None,
            theta: None,
        }
    }

    pub fn with_person_of_interest(mut self, sample_id: impl Into<String>) -> Self {
        self.persons_of_interest.push(sample_id.into());
        self
    }

    pub fn with_unknowns(mut self, unknowns: HypothesisSelection) -> Self {
        self.unknowns = unknowns;
        self
    }

    pub fn with_dropin(mut self, dropin: f64) -> Self {
        self.dropin = Some(dropin);
        self
    }

    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = Some(theta);
        self
    }

    /// Grid spacing, never below the minimal dropout step
    pub fn step(&self) -> f64 {
        ((self.to - self.from) / self.steps.max(1) as f64).max(MIN_DROPOUT_STEP)
    }

    /// Dropout values from `from` to `to` inclusive
    pub fn grid(&self) -> Vec<f64> {
        let step = self.step();
        let mut grid = Vec::new();
        let mut i = 0;
        loop {
            let value = self.from + i as f64 * step;
            if value > self.to + GRID_EPSILON {
                break;
            }
            grid.push(value.min(self.to));
            i += 1;
        }
        grid
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.from) || !(0.0..=1.0).contains(&self.to) {
            return Err(AnalysisError::invalid_input(format!(
                "sweep range {}..{} is outside [0, 1]",
                self.from, self.to
            )));
        }
        if self.from >= self.to {
            return Err(AnalysisError::invalid_input(format!(
                "sweep range {}..{} is empty",
                self.from, self.to
            )));
        }
        if self.steps == 0 {
            return Err(AnalysisError::invalid_input("sweep needs at least one step"));
        }
        if self.persons_of_interest.is_empty() && self.unknowns == HypothesisSelection::Neither {
            return Err(AnalysisError::invalid_input(
                "sweep varies nothing: select persons of interest or unknowns",
            ));
        }
        if let Some(dropin) = self.dropin {
            if !(0.0..=1.0).contains(&dropin) {
                return Err(AnalysisError::invalid_input(format!("drop-in {} is not a probability", dropin)));
            }
        }
        if let Some(theta) = self.theta {
            if !(0.0..1.0).contains(&theta) {
                return Err(AnalysisError::invalid_input(format!("theta {} is outside [0, 1)", theta)));
            }
        }
        Ok(())
    }
}

/// One recorded point of a series
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPoint {
    pub dropout: f64,
    pub value: f64,
}

/// A named curve, ordered by dropout
#[derive(Clone, Debug, PartialEq)]
pub struct PointSeries {
    pub name: String,
    pub points: Vec<SweepPoint>,
}

/// Every evaluated dropout value with its outcome, including the degenerate ones
#[derive(Clone, Debug, PartialEq)]
pub struct SweepLogEntry {
    pub dropout: f64,
    pub outcome: Result<LikelihoodRatio>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SensitivityResult {
    /// `LR` followed by one log10 Pr(E | H) curve per hypothesis
    pub series: Vec<PointSeries>,
    pub log: Vec<SweepLogEntry>,
}

impl SensitivityResult {
    pub fn series(&self, name: &str) -> Option<&PointSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn likelihood_ratio(&self) -> Option<&PointSeries> {
        self.series(LR_SERIES)
    }
}

/// Sensitivity sweep over a private copy of a case
pub struct SensitivitySweep {
    case: Case,
    settings: SweepSettings,
    on_progress: Option<ProgressCallback>,
    events: EventSink,
}

impl SensitivitySweep {
    pub fn new(case: &Case, settings: SweepSettings) -> Self {
        Self {
            case: case.clone(),
            settings,
            on_progress: None,
            events: EventSink::silent(),
        }
    }

    /// Emit `AnalysisEvent::Progress` on `events` after every grid point
    ///
    /// The per-point analyses stay silent; only the sweep's own fraction
    /// is reported.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Report (evaluated grid points, grid size) after every grid point
    pub fn with_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    pub fn run(&self, scheduler: &AnalysisScheduler, cancel: &CancellationToken) -> Result<SensitivityResult> {
        self.settings.validate()?;
        let base = self.base_case()?;

        let grid = self.settings.grid();
        let step = self.settings.step();
        let middle = (self.settings.from + self.settings.to) / 2.0;
        info!(
            from = self.settings.from,
            to = self.settings.to,
            points = grid.len(),
            step,
            "sensitivity sweep started"
        );

        let mut recorded: Vec<(f64, LikelihoodRatio)> = Vec::with_capacity(grid.len());
        let mut log = Vec::new();
        let meter = ProgressMeter::new(&self.events, grid.len() as u64);

        for (i, &value) in grid.iter().enumerate() {
            // Work inward from whichever end is closer
            let direction = if value <= middle { 1.0 } else { -1.0 };
            let mut attempt = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return Err(AnalysisError::Cancelled);
                }

                let dropout = value + direction * f64::from(attempt) * MIN_DROPOUT_STEP;
                let outcome = self.evaluate(scheduler, &base, dropout, cancel);
                log.push(SweepLogEntry {
                    dropout,
                    outcome: outcome.clone(),
                });

                match outcome {
                    Ok(lr) => {
                        recorded.push((dropout, lr));
                        break;
                    }
                    Err(e) if e.is_degenerate() => {
                        attempt += 1;
                        let offset = f64::from(attempt) * MIN_DROPOUT_STEP;
                        let next = value + direction * offset;
                        if offset >= step - GRID_EPSILON
                            || next < self.settings.from - GRID_EPSILON
                            || next > self.settings.to + GRID_EPSILON
                        {
                            debug!(dropout = value, "no valid point near grid value");
                            break;
                        }
                        debug!(from = dropout, to = next, "degenerate ratio, nudging dropout");
                    }
                    Err(e) => return Err(e),
                }
            }

            meter.advance(1);
            if let Some(on_progress) = &self.on_progress {
                on_progress(i + 1, grid.len());
            }
        }

        if recorded.is_empty() {
            return Err(AnalysisError::EmptySweep {
                from: self.settings.from,
                to: self.settings.to,
            });
        }
        recorded.sort_by(|a, b| a.0.total_cmp(&b.0));

        info!(recorded = recorded.len(), evaluated = log.len(), "sensitivity sweep finished");
        Ok(SensitivityResult {
            series: self.series(&base, &recorded),
            log,
        })
    }

    /// Case with the drop-in and theta overrides applied
    fn base_case(&self) -> Result<Case> {
        let mut case = self.case.clone();

        for id in &self.settings.persons_of_interest {
            if !case.hypotheses().iter().any(|h| h.is_contributor(id)) {
                return Err(AnalysisError::invalid_input(format!(
                    "person of interest {} is not a contributor in either hypothesis",
                    id
                )));
            }
        }

        case.update_hypotheses(|h| {
            if let Some(dropin) = self.settings.dropin {
                h.set_dropin(dropin);
            }
            if let Some(theta) = self.settings.theta {
                h.set_theta(theta);
            }
        });
        Ok(case)
    }

    fn evaluate(
        &self,
        scheduler: &AnalysisScheduler,
        base: &Case,
        dropout: f64,
        cancel: &CancellationToken,
    ) -> Result<LikelihoodRatio> {
        let mut case = base.clone();
        for id in &self.settings.persons_of_interest {
            case.update_hypotheses(|h| {
                h.set_contributor_dropout(id, dropout);
            });
        }
        if self.settings.unknowns.includes_prosecution() {
            case.prosecution_mut().set_unknown_dropout(dropout);
        }
        if self.settings.unknowns.includes_defense() {
            case.defense_mut().set_unknown_dropout(dropout);
        }

        scheduler.compute(&case, cancel, &EventSink::silent())
    }

    fn series(&self, base: &Case, recorded: &[(f64, LikelihoodRatio)]) -> Vec<PointSeries> {
        vec![
            curve(LR_SERIES, recorded, |lr: &LikelihoodRatio| lr.log10()),
            curve(base.prosecution().id(), recorded, |lr: &LikelihoodRatio| {
                lr.loci().iter().map(|r| r.prosecution.log10()).sum()
            }),
            curve(base.defense().id(), recorded, |lr: &LikelihoodRatio| {
                lr.loci().iter().map(|r| r.defense.log10()).sum()
            }),
        ]
    }
}

fn curve<F>(name: &str, recorded: &[(f64, LikelihoodRatio)], value: F) -> PointSeries
where
    F: Fn(&LikelihoodRatio) -> f64,
{
    PointSeries {
        name: name.to_string(),
        points: recorded
            .iter()
            .map(|(dropout, lr)| SweepPoint {
                dropout: *dropout,
                value: value(lr),
            })
            .collect(),
    }
}

impl AnalysisTask for SensitivitySweep {
    type Output = SensitivityResult;

    fn name(&self) -> &'static str {
        "sensitivity sweep"
    }

    fn run(&self, scheduler: &AnalysisScheduler, cancel: &CancellationToken) -> Result<SensitivityResult> {
        SensitivitySweep::run(self, scheduler, cancel)
    }
}
