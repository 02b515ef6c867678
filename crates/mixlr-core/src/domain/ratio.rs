//! Likelihood ratio aggregation
//!
//! Per-locus probabilities of the two hypotheses are combined into one
//! Ratio per enabled locus and an overall Ratio, the product over those loci.

use crate::constants::OVERALL;
use crate::error::{AnalysisError, Result};
use std::collections::BTreeMap;

/// Pr(E | H) per locus for one hypothesis
///
/// Partial results of a split locus are summed with `add`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocusProbabilities {
    hypothesis: String,
    probabilities: BTreeMap<String, f64>,
}

impl LocusProbabilities {
    pub fn new(hypothesis: impl Into<String>) -> Self {
        Self {
            hypothesis: hypothesis.into(),
            probabilities: BTreeMap::new(),
        }
    }

    /// Accumulate a (partial) probability for a locus
    pub fn add(&mut self, locus: &str, probability: f64) {
        *self.probabilities.entry(locus.to_string()).or_insert(0.0) += probability;
    }

    pub fn hypothesis(&self) -> &str {
        &self.hypothesis
    }

    pub fn get(&self, locus: &str) -> Option<f64> {
        self.probabilities.get(locus).copied()
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.probabilities.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// log10 of the product over `loci`; `None` if a locus is missing
    pub fn log10_product<S: AsRef<str>>(&self, loci: &[S]) -> Option<f64> {
        loci.iter()
            .map(|locus| self.get(locus.as_ref()).map(f64::log10))
            .sum()
    }
}

/// Ratio of the two hypotheses for a locus or for the whole profile
#[derive(Clone, Debug, PartialEq)]
pub struct Ratio {
    pub subject: String,
    pub prosecution: f64,
    pub defense: f64,
    pub ratio: f64,
}

impl Ratio {
    pub fn new(subject: impl Into<String>, prosecution: f64, defense: f64) -> Self {
        Self {
            subject: subject.into(),
            prosecution,
            defense,
            ratio: prosecution / defense,
        }
    }

    /// A ratio of 0, infinity or NaN carries no evidential meaning
    pub fn is_degenerate(&self) -> bool {
        !self.ratio.is_finite() || self.ratio == 0.0
    }

    pub fn log10(&self) -> f64 {
        self.ratio.log10()
    }

    fn check(self) -> Result<Self> {
        if self.is_degenerate() {
            return Err(AnalysisError::NumericDegeneracy {
                subject: self.subject,
                prosecution: self.prosecution,
                defense: self.defense,
            });
        }
        Ok(self)
    }
}

/// Result of a main analysis run
#[derive(Clone, Debug, PartialEq)]
pub struct LikelihoodRatio {
    loci: Vec<Ratio>,
    overall: Ratio,
    statistics_hash: u64,
}

impl LikelihoodRatio {
    /// Per-locus ratios, in enabled-locus order
    pub fn loci(&self) -> &[Ratio] {
        &self.loci
    }

    pub fn locus(&self, name: &str) -> Option<&Ratio> {
        self.loci.iter().find(|r| r.subject == name)
    }

    pub fn overall(&self) -> &Ratio {
        &self.overall
    }

    /// Sum of per-locus log10 ratios
    pub fn log10(&self) -> f64 {
        self.loci.iter().map(Ratio::log10).sum()
    }

    /// Content hash of the population statistics the ratio was computed with
    pub fn statistics_hash(&self) -> u64 {
        self.statistics_hash
    }
}

/// Combine both hypotheses' locus probabilities over the enabled loci
///
/// The overall ratio is the product of the per-locus ratios; its
/// probabilities are the products of the per-locus probabilities. A
/// degenerate per-locus or overall ratio is an error.
pub fn aggregate<S: AsRef<str>>(
    prosecution: &LocusProbabilities,
    defense: &LocusProbabilities,
    enabled_loci: &[S],
    statistics_hash: u64,
) -> Result<LikelihoodRatio> {
    let mut loci = Vec::with_capacity(enabled_loci.len());
    let mut overall_prosecution = 1.0;
    let mut overall_defense = 1.0;
    let mut overall_ratio = 1.0;

    for locus in enabled_loci {
        let locus = locus.as_ref();
        let lookup = |probabilities: &LocusProbabilities| {
            probabilities.get(locus).ok_or_else(|| {
                AnalysisError::configuration(format!(
                    "no probability computed for locus {} under '{}'",
                    locus,
                    probabilities.hypothesis()
                ))
            })
        };
        let ratio = Ratio::new(locus, lookup(prosecution)?, lookup(defense)?).check()?;

        overall_prosecution *= ratio.prosecution;
        overall_defense *= ratio.defense;
        overall_ratio *= ratio.ratio;
        loci.push(ratio);
    }

    let overall = Ratio {
        subject: OVERALL.to_string(),
        prosecution: overall_prosecution,
        defense: overall_defense,
        ratio: overall_ratio,
    }
    .check()?;

    Ok(LikelihoodRatio {
        loci,
        overall,
        statistics_hash,
    })
}
