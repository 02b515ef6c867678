//! Monte-Carlo dropout estimation
//!
//! For each iteration a random profile is drawn for every unknown
//! contributor, then for each candidate dropout value the contributors'
//! alleles are dropped at random and the surviving distinct alleles are
//! counted. A candidate is a success for the iteration when the count
//! equals the allele count observed in the evidence. The 5th and 95th
//! percentiles of the successful values bound the plausible dropout range.
//!
//! Unknown profiles are drawn from the raw population frequencies. Theta and
//! a declared relatedness only enter the likelihood model; they do not
//! weight the simulated unknowns.

use crate::app::ProgressCallback;
use crate::app::events::{EventSink, ProgressMeter};
use crate::app::scheduler::AnalysisScheduler;
use crate::app::task::AnalysisTask;
use crate::constants::{
    DEFAULT_ITERATIONS, GRID_EPSILON, LOWER_PERCENTILE, MIN_DROPOUT_STEP, UPPER_PERCENTILE,
};
use crate::domain::case::Case;
use crate::domain::genetics::Allele;
use crate::domain::hypothesis::Hypothesis;
use crate::domain::percentile::{HistogramBin, histogram, percentile};
use crate::error::{AnalysisError, Result};
use crate::infra::cancel::CancellationToken;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Estimation parameters
#[derive(Clone, Debug)]
pub struct EstimationSettings {
    /// Distinct alleles observed over the enabled loci of the evidence
    pub observed_allele_count: usize,
    pub iterations: usize,
    pub from: f64,
    pub to: f64,
    pub step: f64,
    /// Contributors whose dropout takes the candidate value
    pub persons_of_interest: Vec<String>,
    /// Apply the candidate value to unknown contributors as well
    pub vary_unknowns: bool,
    /// Drop-in override; the hypotheses' own drop-in otherwise
    pub dropin: Option<f64>,
    /// Random seed; drawn at random and logged when absent
    pub seed: Option<u64>,
}

impl EstimationSettings {
    pub fn new(observed_allele_count: usize) -> Self {
        Self {
            observed_allele_count,
            iterations: DEFAULT_ITERATIONS,
            from: MIN_DROPOUT_STEP,
            to: 0.99,
            step: MIN_DROPOUT_STEP,
            persons_of_interest: Vec::new(),
            vary_unknowns: true,
            dropin: None,
            seed: None,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_range(mut self, from: f64, to: f64, step: f64) -> Self {
        self.from = from;
        self.to = to;
        self.step = step;
        self
    }

    pub fn with_person_of_interest(mut self, sample_id: impl Into<String>) -> Self {
        self.persons_of_interest.push(sample_id.into());
        self
    }

    pub fn with_vary_unknowns(mut self, vary_unknowns: bool) -> Self {
        self.vary_unknowns = vary_unknowns;
        self
    }

    pub fn with_dropin(mut self, dropin: f64) -> Self {
        self.dropin = Some(dropin);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Grid spacing, never below the minimal dropout step
    pub fn effective_step(&self) -> f64 {
        self.step.max(MIN_DROPOUT_STEP)
    }

    /// Candidate dropout values from `from` to `to` inclusive
    pub fn grid(&self) -> Vec<f64> {
        let step = self.effective_step();
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
        if self.iterations == 0 {
            return Err(AnalysisError::invalid_input("estimation needs at least one iteration"));
        }
        if !(0.0..=1.0).contains(&self.from) || !(0.0..=1.0).contains(&self.to) || self.from > self.to {
            return Err(AnalysisError::invalid_input(format!(
                "dropout range {}..{} is not within [0, 1]",
                self.from, self.to
            )));
        }
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(AnalysisError::invalid_input(format!("dropout step {} must be positive", self.step)));
        }
        if let Some(dropin) = self.dropin {
            if !(0.0..=1.0).contains(&dropin) {
                return Err(AnalysisError::invalid_input(format!("drop-in {} is not a probability", dropin)));
            }
        }
        Ok(())
    }
}

/// Estimate for one hypothesis
#[derive(Clone, Debug, PartialEq)]
pub struct HypothesisEstimate {
    pub hypothesis: String,
    /// 5th percentile of the successful values
    pub lower: f64,
    /// 95th percentile of the successful values
    pub upper: f64,
    /// Successful candidate values over all iterations, ascending
    pub successes: Vec<f64>,
    pub histogram: Vec<HistogramBin>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DropoutEstimation {
    pub observed_allele_count: usize,
    pub iterations: usize,
    /// Seed the run used; passing it back reproduces the estimate
    pub seed: u64,
    /// Prosecution first, then Defense
    pub hypotheses: Vec<HypothesisEstimate>,
}

impl DropoutEstimation {
    pub fn hypothesis(&self, id: &str) -> Option<&HypothesisEstimate> {
        self.hypotheses.iter().find(|h| h.hypothesis == id)
    }
}

/// Monte-Carlo estimator over a private copy of a case
pub struct DropoutEstimator {
    case: Case,
    settings: EstimationSettings,
    on_progress: Option<ProgressCallback>,
    events: EventSink,
}

impl DropoutEstimator {
    pub fn new(case: &Case, settings: EstimationSettings) -> Self {
        Self {
            case: case.clone(),
            settings,
            on_progress: None,
            events: EventSink::silent(),
        }
    }

    /// Emit `AnalysisEvent::Progress` on `events` as iterations complete
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Report (finished iterations, total iterations) as iterations complete
    pub fn with_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn settings(&self) -> &EstimationSettings {
        &self.settings
    }

    pub fn run(&self, scheduler: &AnalysisScheduler, cancel: &CancellationToken) -> Result<DropoutEstimation> {
        self.settings.validate()?;
        if self.case.enabled_loci().is_empty() {
            return Err(AnalysisError::configuration("no locus is enabled"));
        }
        for id in &self.settings.persons_of_interest {
            if !self.case.hypotheses().iter().any(|h| h.is_contributor(id)) {
                return Err(AnalysisError::invalid_input(format!(
                    "person of interest {} is not a contributor in either hypothesis",
                    id
                )));
            }
        }

        let models = self
            .case
            .hypotheses()
            .iter()
            .map(|h| HypothesisModel::build(h, self.case.enabled_loci(), &self.settings))
            .collect::<Result<Vec<_>>>()?;

        let seed = self.settings.seed.unwrap_or_else(rand::random);
        let grid = self.settings.grid();
        let iterations = self.settings.iterations;
        info!(
            seed,
            iterations,
            candidates = grid.len(),
            observed = self.settings.observed_allele_count,
            "dropout estimation started"
        );

        let finished = AtomicUsize::new(0);
        let meter = ProgressMeter::new(&self.events, iterations as u64);
        let per_iteration: Vec<Vec<Vec<usize>>> = scheduler.pool().install(|| {
            (0..iterations)
                .into_par_iter()
                .map(|i| {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                    let successes = models
                        .iter()
                        .map(|model| model.simulate(&mut rng, &grid, self.settings.observed_allele_count, cancel))
                        .collect::<Result<Vec<_>>>()?;

                    meter.advance(1);
                    let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(on_progress) = &self.on_progress {
                        on_progress(done, iterations);
                    }
                    Ok(successes)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut hypotheses = Vec::with_capacity(models.len());
        for (h, model) in models.iter().enumerate() {
            let mut successes: Vec<f64> = per_iteration
                .iter()
                .flat_map(|iteration| iteration[h].iter().map(|&candidate| grid[candidate]))
                .collect();
            if successes.is_empty() {
                return Err(AnalysisError::EstimationFailure {
                    hypothesis: model.id.clone(),
                });
            }
            successes.sort_by(f64::total_cmp);

            let lower = percentile(&successes, LOWER_PERCENTILE).unwrap_or(self.settings.from);
            let upper = percentile(&successes, UPPER_PERCENTILE).unwrap_or(self.settings.to);
            debug!(hypothesis = model.id.as_str(), successes = successes.len(), lower, upper, "estimate");

            hypotheses.push(HypothesisEstimate {
                hypothesis: model.id.clone(),
                lower,
                upper,
                histogram: histogram(&successes, self.settings.from, self.settings.effective_step()),
                successes,
            });
        }

        info!(seed, "dropout estimation finished");
        Ok(DropoutEstimation {
            observed_allele_count: self.settings.observed_allele_count,
            iterations,
            seed,
            hypotheses,
        })
    }
}

impl AnalysisTask for DropoutEstimator {
    type Output = DropoutEstimation;

    fn name(&self) -> &'static str {
        "dropout estimation"
    }

    fn run(&self, scheduler: &AnalysisScheduler, cancel: &CancellationToken) -> Result<DropoutEstimation> {
        DropoutEstimator::run(self, scheduler, cancel)
    }
}

/// Declared contributor genotype at one locus
struct KnownGenotype {
    alleles: [Allele; 2],
    dropout: f64,
    of_interest: bool,
}

struct LocusModel {
    contributors: Vec<KnownGenotype>,
    alleles: Vec<Allele>,
    sampler: WeightedIndex<f64>,
}

impl LocusModel {
    fn draw<'a, R: Rng>(&'a self, rng: &mut R) -> &'a Allele {
        &self.alleles[self.sampler.sample(rng)]
    }
}

/// Simulation inputs for one hypothesis
struct HypothesisModel {
    id: String,
    loci: Vec<LocusModel>,
    unknown_count: usize,
    unknown_dropout: f64,
    dropin: f64,
    vary_unknowns: bool,
}

impl HypothesisModel {
    fn build(hypothesis: &Hypothesis, loci: &[String], settings: &EstimationSettings) -> Result<Self> {
        let statistics = hypothesis.statistics();
        let mut models = Vec::with_capacity(loci.len());

        for locus in loci {
            let table = statistics.locus_table(locus).ok_or_else(|| {
                AnalysisError::configuration(format!(
                    "locus {} is absent from population statistics '{}'",
                    locus,
                    statistics.name()
                ))
            })?;
            let alleles: Vec<Allele> = table.keys().cloned().collect();
            let sampler = WeightedIndex::new(table.values().copied()).map_err(|e| {
                AnalysisError::configuration(format!("cannot sample alleles of locus {}: {}", locus, e))
            })?;

            let mut contributors = Vec::with_capacity(hypothesis.contributors().len());
            for contributor in hypothesis.contributors() {
                let typed = contributor.sample.locus(locus).ok_or_else(|| {
                    AnalysisError::configuration(format!(
                        "contributor {} is not typed at locus {}",
                        contributor.id(),
                        locus
                    ))
                })?;
                let (first, second) = typed.genotype().ok_or_else(|| {
                    AnalysisError::configuration(format!(
                        "reference profile {} has {} alleles at locus {}",
                        contributor.id(),
                        typed.alleles().len(),
                        locus
                    ))
                })?;
                contributors.push(KnownGenotype {
                    alleles: [first.clone(), second.clone()],
                    dropout: contributor.dropout,
                    of_interest: settings.persons_of_interest.iter().any(|p| p == contributor.id()),
                });
            }

            models.push(LocusModel {
                contributors,
                alleles,
                sampler,
            });
        }

        Ok(Self {
            id: hypothesis.id().to_string(),
            loci: models,
            unknown_count: hypothesis.unknown_count(),
            unknown_dropout: hypothesis.unknown_dropout(),
            dropin: settings.dropin.unwrap_or_else(|| hypothesis.dropin()),
            vary_unknowns: settings.vary_unknowns,
        })
    }

    /// One iteration: indices of the grid values reproducing the observed count
    fn simulate<R: Rng>(
        &self,
        rng: &mut R,
        grid: &[f64],
        observed: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<usize>> {
        // Unknown profiles are drawn once and shared by every candidate value
        let unknowns: Vec<Vec<[&Allele; 2]>> = self
            .loci
            .iter()
            .map(|locus| {
                (0..self.unknown_count)
                    .map(|_| [locus.draw(rng), locus.draw(rng)])
                    .collect()
            })
            .collect();

        let mut successes = Vec::new();
        for (candidate, &dropout) in grid.iter().enumerate() {
            let mut surviving = 0;
            for (locus, drawn) in self.loci.iter().zip(&unknowns) {
                let mut present: BTreeSet<&Allele> = BTreeSet::new();

                for known in &locus.contributors {
                    let d = if known.of_interest { dropout } else { known.dropout };
                    for allele in &known.alleles {
                        if cancel.is_cancelled() {
                            return Err(AnalysisError::Cancelled);
                        }
                        if rng.gen_range(0.0..1.0) > d {
                            present.insert(allele);
                        }
                    }
                }

                let d = if self.vary_unknowns { dropout } else { self.unknown_dropout };
                for genotype in drawn {
                    for &allele in genotype {
                        if cancel.is_cancelled() {
                            return Err(AnalysisError::Cancelled);
                        }
                        if rng.gen_range(0.0..1.0) > d {
                            present.insert(allele);
                        }
                    }
                }

                if self.dropin > 0.0 && rng.gen_range(0.0..1.0) < self.dropin {
                    present.insert(locus.draw(rng));
                }
                surviving += present.len();
            }

            if surviving == observed {
                successes.push(candidate);
            }
        }
        Ok(successes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::AnalysisEvent;
    use crate::app::scheduler::AnalysisConfig;
    use crate::domain::genetics::{Locus, Sample};
    use crate::domain::hypothesis::{Relatedness, Relation};
    use crate::domain::population::PopulationStatistics;

    fn case(unknowns: usize) -> Case {
        let stats = Arc::new(
            PopulationStatistics::new("test", 0.001)
                .with_locus("TH01", [("6", 0.2), ("7", 0.3), ("8", 0.5)])
                .with_locus("FGA", [("21", 0.4), ("22", 0.6)]),
        );
        let evidence = Arc::new(
            Sample::new("E1")
                .with_locus(Locus::new("TH01", ["6"]))
                .with_locus(Locus::new("FGA", ["21", "22"])),
        );
        let suspect = Arc::new(
            Sample::new("S")
                .with_locus(Locus::new("TH01", ["6", "7"]))
                .with_locus(Locus::new("FGA", ["21", "22"])),
        );
        Case::new(
            vec![evidence],
            Hypothesis::new("Prosecution", stats.clone()).with_contributor(suspect, 0.1),
            Hypothesis::new("Defense", stats).with_unknowns(unknowns.max(1), 0.1),
        )
    }

    fn scheduler(threads: usize) -> AnalysisScheduler {
        AnalysisScheduler::new(AnalysisConfig::default().with_threads(threads)).unwrap()
    }

    fn settings() -> EstimationSettings {
        EstimationSettings::new(3)
            .with_iterations(200)
            .with_person_of_interest("S")
            .with_seed(42)
    }

    #[test]
    fn test_grid_and_step() {
        let settings = EstimationSettings::new(3).with_range(0.1, 0.2, 0.001);
        assert_eq!(settings.effective_step(), MIN_DROPOUT_STEP);
        assert_eq!(settings.grid().len(), 11);
    }

    #[test]
    fn test_validate() {
        assert!(EstimationSettings::new(3).validate().is_ok());
        assert!(EstimationSettings::new(3).with_iterations(0).validate().is_err());
        assert!(EstimationSettings::new(3).with_range(0.5, 0.2, 0.01).validate().is_err());
        assert!(EstimationSettings::new(3).with_range(0.0, 0.5, 0.0).validate().is_err());
        assert!(EstimationSettings::new(3).with_dropin(2.0).validate().is_err());
    }

    #[test]
    fn test_seeded_run_is_reproducible() {
        let first = DropoutEstimator::new(&case(1), settings())
            .run(&scheduler(1), &CancellationToken::new())
            .unwrap();
        let second = DropoutEstimator::new(&case(1), settings())
            .run(&scheduler(4), &CancellationToken::new())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.seed, 42);
    }

    #[test]
    fn test_percentiles_follow_successes() {
        let estimation = DropoutEstimator::new(&case(1), settings())
            .run(&scheduler(2), &CancellationToken::new())
            .unwrap();

        for estimate in &estimation.hypotheses {
            let successes = &estimate.successes;
            assert!(successes.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(percentile(successes, 0.05), Some(estimate.lower));
            assert_eq!(percentile(successes, 0.95), Some(estimate.upper));
            assert!(estimate.lower <= estimate.upper);

            let counted: usize = estimate.histogram.iter().map(|b| b.count).sum();
            assert_eq!(counted, successes.len());
        }
    }

    #[test]
    fn test_missing_allele_favours_moderate_dropout() {
        // The suspect alone has 4 alleles; observing 3 needs one dropout
        let estimation = DropoutEstimator::new(&case(1), settings())
            .run(&scheduler(2), &CancellationToken::new())
            .unwrap();
        let prosecution = estimation.hypothesis("Prosecution").unwrap();
        assert!(prosecution.lower > 0.0);
        assert!(prosecution.upper < 0.99);
    }

    #[test]
    fn test_impossible_count_fails() {
        // Two contributors over two loci can never show 20 distinct alleles
        let settings = EstimationSettings::new(20).with_iterations(20).with_seed(7);
        let result = DropoutEstimator::new(&case(1), settings).run(&scheduler(2), &CancellationToken::new());
        assert_eq!(
            result,
            Err(AnalysisError::EstimationFailure {
                hypothesis: "Prosecution".to_string()
            })
        );
    }

    #[test]
    fn test_progress_reaches_total() {
        let last = Arc::new(AtomicUsize::new(0));
        let seen = last.clone();
        DropoutEstimator::new(&case(1), settings().with_iterations(50))
            .with_progress(move |current, total| {
                assert_eq!(total, 50);
                seen.fetch_max(current, Ordering::Relaxed);
            })
            .run(&scheduler(2), &CancellationToken::new())
            .unwrap();
        assert_eq!(last.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_progress_events_reach_one() {
        let (sink, receiver) = EventSink::channel();
        DropoutEstimator::new(&case(1), settings().with_iterations(50))
            .with_events(sink)
            .run(&scheduler(2), &CancellationToken::new())
            .unwrap();

        let mut last = 0.0;
        for event in receiver.try_iter() {
            if let AnalysisEvent::Progress { fraction } = event {
                assert!(fraction > last, "{} after {}", fraction, last);
                last = fraction;
            }
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_theta_and_relatedness_do_not_weight_unknowns() {
        let plain = case(1);
        let brother = Arc::new(
            Sample::new("B")
                .with_locus(Locus::new("TH01", ["7", "8"]))
                .with_locus(Locus::new("FGA", ["21", "22"])),
        );
        let weighted = plain.clone().with_defense(
            plain
                .defense()
                .clone()
                .with_theta(0.05)
                .with_relatedness(Relatedness::new(Relation::Siblings, brother)),
        );

        let first = DropoutEstimator::new(&plain, settings())
            .run(&scheduler(2), &CancellationToken::new())
            .unwrap();
        let second = DropoutEstimator::new(&weighted, settings())
            .run(&scheduler(2), &CancellationToken::new())
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cancelled_estimation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = DropoutEstimator::new(&case(1), settings()).run(&scheduler(2), &cancel);
        assert_eq!(result, Err(AnalysisError::Cancelled));
    }

    #[test]
    fn test_untyped_contributor_is_configuration_error() {
        let case = case(1).with_enabled_loci(["TH01", "vWA"]);
        let result = DropoutEstimator::new(&case, settings()).run(&scheduler(1), &CancellationToken::new());
        assert!(matches!(result, Err(AnalysisError::Configuration { .. })));
    }
}
