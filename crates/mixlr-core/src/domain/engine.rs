//! Locus probability engine
//!
//! Computes Pr(Evidence at one locus | Hypothesis) by enumerating the
//! genotypes of every unknown contributor. For each combination the
//! probability of reproducing each replicate exactly is derived from the
//! dropout of every carried allele and the drop-in of every unexplained
//! observed allele, weighted by the population probability of the
//! combination.
//!
//! Evidence model for one replicate, given the set C of carried alleles:
//!
//! - carried and observed: `1 - D(a)`, where `D(a)` is the product of the
//!   dropout of every copy of `a` (a homozygote counts as two copies)
//! - carried and not observed: `D(a)`
//! - observed and not carried: `c * p(a)` (drop-in)
//! - no drop-in needed at all: `1 - c`

use crate::constants::{MAX_CHUNKS_PER_LOCUS, PROGRESS_INTERVAL};
use crate::domain::genetics::{Allele, Sample};
use crate::domain::genotype::{AlleleCounts, Genotype, enumerate_genotypes};
use crate::domain::hypothesis::Hypothesis;
use crate::error::{AnalysisError, Result};
use crate::infra::cancel::CancellationToken;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

/// One replicate typed at the locus
#[derive(Clone, Debug)]
struct ReplicateObservation {
    /// Observed flag per allele index
    observed: Vec<bool>,
}

/// Mutable per-job state of the enumeration
struct Scratch {
    dropout: Vec<f64>,
    carried: Vec<bool>,
    counts: AlleleCounts,
}

/// Values of one allele before a genotype was applied, for restoring
type SavedAllele = (usize, f64, bool);

/// Prepared Pr(E | H) computation for one (hypothesis, locus) pair
#[derive(Clone, Debug)]
pub struct LocusProbabilityEngine {
    hypothesis: String,
    locus: String,
    /// Allele designation per index; `None` is the pooled unobserved allele
    alleles: Vec<Option<Allele>>,
    frequencies: Vec<f64>,
    replicates: Vec<ReplicateObservation>,
    /// Combined dropout of the declared contributors per allele
    known_dropout: Vec<f64>,
    known_carried: Vec<bool>,
    /// Alleles of every typed person, the conditioning set of the theta correction
    conditioning: Vec<usize>,
    genotypes: Vec<Genotype>,
    unknown_count: usize,
    unknown_dropout: f64,
    dropin: f64,
    theta: f64,
    relative: Option<(Genotype, [f64; 3])>,
}

impl LocusProbabilityEngine {
    /// Prepare the computation of one locus
    ///
    /// When theta is 0, alleles that appear in no replicate and no typed
    /// profile are pooled into a single allele; the result is unchanged.
    pub fn prepare(
        hypothesis: &Hypothesis,
        replicates: &[Arc<Sample>],
        locus: &str,
    ) -> Result<Self> {
        Self::prepare_with(hypothesis, replicates, locus, hypothesis.theta() == 0.0)
    }

    pub(crate) fn prepare_with(
        hypothesis: &Hypothesis,
        replicates: &[Arc<Sample>],
        locus: &str,
        pool_unobserved: bool,
    ) -> Result<Self> {
        let statistics = hypothesis.statistics();
        let table = statistics.locus_table(locus).ok_or_else(|| {
            AnalysisError::configuration(format!(
                "locus {} is absent from population statistics '{}'",
                locus,
                statistics.name()
            ))
        })?;

        let typed_replicates: Vec<&Sample> = replicates
            .iter()
            .filter(|r| r.is_enabled())
            .filter(|r| r.locus(locus).is_some())
            .map(|r| r.as_ref())
            .collect();
        if typed_replicates.is_empty() {
            return Err(AnalysisError::configuration(format!(
                "locus {} is not typed in any evidence replicate",
                locus
            )));
        }

        let reference_genotype = |sample: &Sample| -> Result<(Allele, Allele)> {
            let typed = sample.locus(locus).ok_or_else(|| {
                AnalysisError::configuration(format!(
                    "locus {} is absent from sample {} used in hypothesis '{}'",
                    locus,
                    sample.id(),
                    hypothesis.id()
                ))
            })?;
            typed
                .genotype()
                .map(|(a, b)| (a.clone(), b.clone()))
                .ok_or_else(|| {
                    AnalysisError::configuration(format!(
                        "sample {} has {} alleles at {}, expected a diploid reference genotype",
                        sample.id(),
                        typed.alleles().len(),
                        locus
                    ))
                })
        };

        let contributors = hypothesis
            .contributors()
            .iter()
            .map(|c| Ok((reference_genotype(c.sample.as_ref())?, c.dropout)))
            .collect::<Result<Vec<_>>>()?;
        let non_contributors = hypothesis
            .non_contributors()
            .iter()
            .map(|c| reference_genotype(c.sample.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let relative = hypothesis
            .relatedness()
            .related_sample()
            .map(|sample| reference_genotype(sample.as_ref()))
            .transpose()?;

        // Alleles the likelihood can tell apart
        let mut relevant: BTreeSet<Allele> = BTreeSet::new();
        for replicate in &typed_replicates {
            if let Some(typed) = replicate.locus(locus) {
                relevant.extend(typed.alleles().iter().cloned());
            }
        }
        for ((a, b), _) in &contributors {
            relevant.insert(a.clone());
            relevant.insert(b.clone());
        }
        for (a, b) in non_contributors.iter().chain(relative.iter()) {
            relevant.insert(a.clone());
            relevant.insert(b.clone());
        }

        let mut alleles: Vec<Option<Allele>> = relevant.iter().cloned().map(Some).collect();
        let mut frequencies: Vec<f64> = relevant
            .iter()
            .map(|a| table.get(a).copied().unwrap_or(statistics.rare_allele_frequency()))
            .collect();

        let unobserved = table.iter().filter(|(allele, _)| !relevant.contains(*allele));
        if pool_unobserved {
            let pooled: f64 = unobserved.map(|(_, &f)| f).sum();
            if pooled > 0.0 {
                alleles.push(None);
                frequencies.push(pooled);
            }
        } else {
            for (allele, &frequency) in unobserved {
                alleles.push(Some(allele.clone()));
                frequencies.push(frequency);
            }
        }
        if alleles.is_empty() {
            return Err(AnalysisError::configuration(format!(
                "locus {} of hypothesis '{}' has no alleles to enumerate",
                locus,
                hypothesis.id()
            )));
        }

        let index_of = |allele: &Allele| -> usize {
            // Every relevant allele sits at its rank in the sorted set
            relevant.range::<Allele, _>(..allele).count()
        };

        let n = alleles.len();
        let replicates = typed_replicates
            .iter()
            .filter_map(|r| r.locus(locus))
            .map(|typed| {
                let mut observed = vec![false; n];
                for allele in typed.alleles() {
                    observed[index_of(allele)] = true;
                }
                ReplicateObservation { observed }
            })
            .collect();

        let mut known_dropout = vec![1.0; n];
        let mut known_carried = vec![false; n];
        let mut conditioning = Vec::new();
        for ((a, b), dropout) in &contributors {
            let genotype = Genotype::new(index_of(a), index_of(b));
            apply_dropout(&mut known_dropout, &mut known_carried, genotype, *dropout);
            conditioning.extend([genotype.first, genotype.second]);
        }
        for (a, b) in &non_contributors {
            conditioning.extend([index_of(a), index_of(b)]);
        }

        let ibd = hypothesis.relatedness().relation().ibd();
        let relative = relative.map(|(a, b)| (Genotype::new(index_of(&a), index_of(&b)), ibd));

        let genotypes = if hypothesis.unknown_count() > 0 {
            enumerate_genotypes(n)
        } else {
            Vec::new()
        };

        Ok(Self {
            hypothesis: hypothesis.id().to_string(),
            locus: locus.to_string(),
            alleles,
            frequencies,
            replicates,
            known_dropout,
            known_carried,
            conditioning,
            genotypes,
            unknown_count: hypothesis.unknown_count(),
            unknown_dropout: hypothesis.unknown_dropout(),
            dropin: hypothesis.dropin(),
            theta: hypothesis.theta(),
            relative,
        })
    }

    pub fn hypothesis(&self) -> &str {
        &self.hypothesis
    }

    pub fn locus(&self) -> &str {
        &self.locus
    }

    /// Number of alleles in the enumeration universe (pooled allele included)
    pub fn allele_count(&self) -> usize {
        self.alleles.len()
    }

    /// Number of candidate genotypes per unknown contributor
    pub fn genotype_count(&self) -> usize {
        self.genotypes.len()
    }

    /// Number of enumerated genotype combinations, the progress unit of the job
    pub fn job_size(&self) -> u64 {
        (self.genotypes.len() as u64).saturating_pow(self.unknown_count as u32).max(1)
    }

    /// Split the enumeration into ranges of the first unknown's genotypes
    ///
    /// The split depends only on the job size and `split_threshold`, never
    /// on the worker count, so partial sums always add up the same way.
    pub fn chunks(&self, split_threshold: u64) -> Vec<Range<usize>> {
        let outer = self.genotypes.len();
        if self.unknown_count == 0 || outer == 0 {
            return vec![0..1];
        }

        let wanted = self.job_size().div_ceil(split_threshold.max(1));
        let chunk_count = (wanted as usize).clamp(1, MAX_CHUNKS_PER_LOCUS.min(outer));
        let base = outer / chunk_count;
        let extra = outer % chunk_count;

        let mut ranges = Vec::with_capacity(chunk_count);
        let mut start = 0;
        for i in 0..chunk_count {
            let len = base + usize::from(i < extra);
            ranges.push(start..start + len);
            start += len;
        }
        ranges
    }

    /// Pr(E | H) at this locus over the full enumeration
    pub fn probability(&self, cancel: &CancellationToken) -> Result<f64> {
        let all = 0..self.genotypes.len().max(1);
        self.partial_probability(all, cancel, &|_| {})
    }

    /// Contribution of the first-unknown genotypes in `range`
    ///
    /// `cancel` is checked at every enumerated combination. `progress`
    /// receives the number of combinations evaluated since its last call;
    /// over a full chunk it adds up to the chunk's share of `job_size`.
    pub fn partial_probability(
        &self,
        range: Range<usize>,
        cancel: &CancellationToken,
        progress: &dyn Fn(u64),
    ) -> Result<f64> {
        let mut counts = AlleleCounts::new(self.alleles.len(), self.theta);
        for &allele in &self.conditioning {
            counts.add(allele);
        }
        let mut scratch = Scratch {
            dropout: self.known_dropout.clone(),
            carried: self.known_carried.clone(),
            counts,
        };

        if self.unknown_count == 0 {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            progress(1);
            return Ok(self.evidence_probability(&scratch));
        }

        let mut pending = 0u64;
        let mut sum = 0.0;
        for &genotype in &self.genotypes[range] {
            let weight = match self.relative {
                Some((relative, ibd)) => scratch.counts.push_related_genotype(
                    genotype,
                    relative,
                    ibd,
                    &self.frequencies,
                ),
                None => scratch.counts.push_genotype(genotype, &self.frequencies),
            };
            let saved = self.carry(&mut scratch, genotype);
            let result = self.descend(1, weight, &mut scratch, &mut pending, cancel, progress);
            restore(&mut scratch, saved);
            scratch.counts.pop_genotype(genotype);
            sum += result?;
        }

        if pending > 0 {
            progress(pending);
        }
        Ok(sum)
    }

    fn descend(
        &self,
        depth: usize,
        weight: f64,
        scratch: &mut Scratch,
        pending: &mut u64,
        cancel: &CancellationToken,
        progress: &dyn Fn(u64),
    ) -> Result<f64> {
        if depth == self.unknown_count {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            *pending += 1;
            if *pending == PROGRESS_INTERVAL {
                progress(*pending);
                *pending = 0;
            }
            return Ok(weight * self.evidence_probability(scratch));
        }

        let mut sum = 0.0;
        for &genotype in &self.genotypes {
            let p = scratch.counts.push_genotype(genotype, &self.frequencies);
            let saved = self.carry(scratch, genotype);
            let result = self.descend(depth + 1, weight * p, scratch, pending, cancel, progress);
            restore(scratch, saved);
            scratch.counts.pop_genotype(genotype);
            sum += result?;
        }
        Ok(sum)
    }

    /// Add an unknown's genotype to the carried alleles
    fn carry(&self, scratch: &mut Scratch, genotype: Genotype) -> [SavedAllele; 2] {
        let saved = [
            (
                genotype.first,
                scratch.dropout[genotype.first],
                scratch.carried[genotype.first],
            ),
            (
                genotype.second,
                scratch.dropout[genotype.second],
                scratch.carried[genotype.second],
            ),
        ];
        apply_dropout(
            &mut scratch.dropout,
            &mut scratch.carried,
            genotype,
            self.unknown_dropout,
        );
        saved
    }

    /// Probability of reproducing every replicate exactly from the carried alleles
    fn evidence_probability(&self, scratch: &Scratch) -> f64 {
        let mut probability = 1.0;
        for replicate in &self.replicates {
            let mut term = 1.0;
            let mut dropped_in = false;
            for (allele, &observed) in replicate.observed.iter().enumerate() {
                if scratch.carried[allele] {
                    term *= if observed {
                        1.0 - scratch.dropout[allele]
                    } else {
                        scratch.dropout[allele]
                    };
                } else if observed {
                    dropped_in = true;
                    term *= self.dropin * self.frequencies[allele];
                }
            }
            if !dropped_in {
                term *= 1.0 - self.dropin;
            }
            probability *= term;
        }
        probability
    }
}

/// Multiply the dropout of each copy of `genotype` into the per-allele dropout
fn apply_dropout(dropout: &mut [f64], carried: &mut [bool], genotype: Genotype, d: f64) {
    if genotype.is_homozygote() {
        dropout[genotype.first] *= d * d;
    } else {
        dropout[genotype.first] *= d;
        dropout[genotype.second] *= d;
    }
    carried[genotype.first] = true;
    carried[genotype.second] = true;
}

fn restore(scratch: &mut Scratch, saved: [SavedAllele; 2]) {
    for &(allele, dropout, carried) in saved.iter().rev() {
        scratch.dropout[allele] = dropout;
        scratch.carried[allele] = carried;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::genetics::Locus;
    use crate::domain::hypothesis::{Relatedness, Relation};
    use crate::domain::population::PopulationStatistics;

    const EPS: f64 = 1e-12;

    fn stats() -> Arc<PopulationStatistics> {
        Arc::new(
            PopulationStatistics::new("test", 0.001).with_locus(
                "TH01",
                [("6", 0.2), ("7", 0.3), ("8", 0.1), ("9", 0.25), ("9.3", 0.15)],
            ),
        )
    }

    fn profile(id: &str, alleles: &[&str]) -> Arc<Sample> {
        Arc::new(Sample::new(id).with_locus(Locus::new("TH01", alleles.iter().copied())))
    }

    fn evidence(alleles: &[&str]) -> Vec<Arc<Sample>> {
        vec![profile("R1", alleles)]
    }

    fn probability(hypothesis: &Hypothesis, replicates: &[Arc<Sample>]) -> f64 {
        LocusProbabilityEngine::prepare(hypothesis, replicates, "TH01")
            .unwrap()
            .probability(&CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_single_contributor_full_match() {
        let h = Hypothesis::new("Prosecution", stats()).with_contributor(profile("S", &["6", "7"]), 0.0);
        assert!((probability(&h, &evidence(&["6", "7"])) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_known_contributors_dropout_product() {
        // S = 6/7 with d = 0.2 shows only 6; V = 8/8 with d = 0.3 shows 8
        let h = Hypothesis::new("Prosecution", stats())
            .with_contributor(profile("S", &["6", "7"]), 0.2)
            .with_contributor(profile("V", &["8"]), 0.3);
        let expected = (1.0 - 0.2) * 0.2 * (1.0 - 0.3 * 0.3);
        assert!((probability(&h, &evidence(&["6", "8"])) - expected).abs() < EPS);
    }

    #[test]
    fn test_dropin_explains_extra_allele() {
        let h = Hypothesis::new("Prosecution", stats())
            .with_contributor(profile("S", &["6", "7"]), 0.0)
            .with_dropin(0.05);
        let expected = 0.05 * 0.15;
        assert!((probability(&h, &evidence(&["6", "7", "9.3"])) - expected).abs() < EPS);

        let no_dropin = (1.0 - 0.05) * 1.0;
        assert!((probability(&h, &evidence(&["6", "7"])) - no_dropin).abs() < EPS);
    }

    #[test]
    fn test_rare_allele_floor_used_for_dropin() {
        let h = Hypothesis::new("Prosecution", stats())
            .with_contributor(profile("S", &["6", "7"]), 0.0)
            .with_dropin(0.1);
        let p = probability(&h, &evidence(&["6", "7", "13"]));
        assert!((p - 0.1 * 0.001).abs() < EPS);
    }

    #[test]
    fn test_replicates_multiply() {
        let h = Hypothesis::new("Prosecution", stats()).with_contributor(profile("S", &["6", "7"]), 0.3);
        let replicates = vec![profile("R1", &["6", "7"]), profile("R2", &["6"])];
        let expected = (0.7 * 0.7) * (0.7 * 0.3);
        assert!((probability(&h, &replicates) - expected).abs() < EPS);
    }

    #[test]
    fn test_one_unknown_no_dropout_is_genotype_frequency() {
        let h = Hypothesis::new("Defense", stats()).with_unknowns(1, 0.0);
        let p = probability(&h, &evidence(&["6", "7"]));
        assert!((p - 2.0 * 0.2 * 0.3).abs() < EPS);
    }

    #[test]
    fn test_unknowns_sum_over_covering_genotypes() {
        // Victim 6/6 present; one unknown must supply 7 and may also carry 6
        let h = Hypothesis::new("Defense", stats())
            .with_contributor(profile("V", &["6"]), 0.0)
            .with_unknowns(1, 0.0);
        let p = probability(&h, &evidence(&["6", "7"]));
        let expected = 2.0 * 0.2 * 0.3 + 0.3 * 0.3;
        assert!((p - expected).abs() < EPS);
    }

    #[test]
    fn test_pooling_matches_full_enumeration() {
        let h = Hypothesis::new("Defense", stats())
            .with_contributor(profile("V", &["6"]), 0.15)
            .with_unknowns(2, 0.25)
            .with_dropin(0.05);
        let replicates = vec![profile("R1", &["6", "7"]), profile("R2", &["7", "13"])];
        let cancel = CancellationToken::new();

        let pooled = LocusProbabilityEngine::prepare_with(&h, &replicates, "TH01", true).unwrap();
        let full = LocusProbabilityEngine::prepare_with(&h, &replicates, "TH01", false).unwrap();
        assert!(pooled.allele_count() < full.allele_count());

        let a = pooled.probability(&cancel).unwrap();
        let b = full.probability(&cancel).unwrap();
        assert!((a - b).abs() < 1e-12 * b.abs().max(1.0), "{} vs {}", a, b);
    }

    #[test]
    fn test_chunks_sum_to_full_probability() {
        let h = Hypothesis::new("Defense", stats())
            .with_unknowns(2, 0.2)
            .with_dropin(0.05)
            .with_theta(0.02);
        let replicates = evidence(&["6", "7", "9"]);
        let engine = LocusProbabilityEngine::prepare(&h, &replicates, "TH01").unwrap();
        let cancel = CancellationToken::new();

        let chunks = engine.chunks(10);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().end, engine.genotype_count());

        let partial: f64 = chunks
            .into_iter()
            .map(|r| engine.partial_probability(r, &cancel, &|_| {}).unwrap())
            .sum();
        let full = engine.probability(&cancel).unwrap();
        assert!((partial - full).abs() < 1e-12);
    }

    #[test]
    fn test_progress_adds_up_to_job_size() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let h = Hypothesis::new("Defense", stats()).with_unknowns(3, 0.1);
        let replicates = evidence(&["6", "7"]);
        let engine = LocusProbabilityEngine::prepare(&h, &replicates, "TH01").unwrap();
        let done = AtomicU64::new(0);
        engine
            .partial_probability(0..engine.genotype_count(), &CancellationToken::new(), &|n| {
                done.fetch_add(n, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(done.load(Ordering::Relaxed), engine.job_size());
    }

    #[test]
    fn test_cancelled_engine_stops() {
        let h = Hypothesis::new("Defense", stats()).with_unknowns(2, 0.1);
        let replicates = evidence(&["6", "7"]);
        let engine = LocusProbabilityEngine::prepare(&h, &replicates, "TH01").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(engine.probability(&cancel), Err(AnalysisError::Cancelled));
    }

    #[test]
    fn test_theta_changes_probability() {
        let base = Hypothesis::new("Defense", stats())
            .with_non_contributor(profile("S", &["6", "7"]), 0.0)
            .with_unknowns(1, 0.0);
        let replicates = evidence(&["6", "7"]);
        let without = probability(&base, &replicates);
        let with = probability(&base.clone().with_theta(0.03), &replicates);
        // Conditioning on a typed 6/7 makes a 6/7 unknown more likely
        assert!(with > without);

        let theta: f64 = 0.03;
        let expected = 2.0 * (theta + (1.0 - theta) * 0.2) * (theta + (1.0 - theta) * 0.3)
            / ((1.0 + theta) * (1.0 + 2.0 * theta));
        assert!((with - expected).abs() < EPS);
    }

    #[test]
    fn test_related_unknown_sibling() {
        let suspect = profile("S", &["6", "7"]);
        let h = Hypothesis::new("Defense", stats())
            .with_non_contributor(suspect.clone(), 0.0)
            .with_unknowns(1, 0.0)
            .with_relatedness(Relatedness::new(Relation::Siblings, suspect));
        let p = probability(&h, &evidence(&["6", "7"]));
        let expected = (1.0 + 0.2 + 0.3 + 2.0 * 0.2 * 0.3) / 4.0;
        assert!((p - expected).abs() < EPS);
    }

    #[test]
    fn test_homozygote_flag_locus() {
        let homozygote = Arc::new(
            Sample::new("S").with_locus(Locus::new("TH01", ["8"]).treated_as_homozygote()),
        );
        let h = Hypothesis::new("Prosecution", stats()).with_contributor(homozygote, 0.5);
        let p = probability(&h, &evidence(&[]));
        assert!((p - 0.25).abs() < EPS);
    }

    #[test]
    fn test_missing_locus_is_configuration_error() {
        let h = Hypothesis::new("Prosecution", stats())
            .with_contributor(Arc::new(Sample::new("S")), 0.1);
        let result = LocusProbabilityEngine::prepare(&h, &evidence(&["6"]), "TH01");
        assert!(matches!(result, Err(AnalysisError::Configuration { .. })));

        let h = Hypothesis::new("Prosecution", stats());
        let result = LocusProbabilityEngine::prepare(&h, &evidence(&["6"]), "FGA");
        assert!(matches!(result, Err(AnalysisError::Configuration { .. })));
    }

    #[test]
    fn test_empty_allele_universe_is_configuration_error() {
        let empty = Arc::new(
            PopulationStatistics::new("empty", 0.001).with_locus("TH01", Vec::<(&str, f64)>::new()),
        );
        let h = Hypothesis::new("Defense", empty).with_unknowns(1, 0.5);
        let result = LocusProbabilityEngine::prepare(&h, &evidence(&[]), "TH01");
        assert!(matches!(result, Err(AnalysisError::Configuration { .. })));
    }

    #[test]
    fn test_job_size() {
        let h = Hypothesis::new("Defense", stats()).with_unknowns(2, 0.1).with_theta(0.01);
        let engine = LocusProbabilityEngine::prepare(&h, &evidence(&["6", "7"]), "TH01").unwrap();
        assert_eq!(engine.allele_count(), 5);
        assert_eq!(engine.genotype_count(), 15);
        assert_eq!(engine.job_size(), 225);
    }
}
