//! Hypothesis model
//!
//! Hypotheses are assembled with the `with_*` builders and shared by value.
//! A run only borrows its case. The `set_*` setters exist for callers that
//! work on a private copy, such as the sweep's per-point snapshot, and
//! never reach the hypothesis the caller holds.

use crate::domain::genetics::Sample;
use crate::domain::population::PopulationStatistics;
use crate::error::{AnalysisError, Result};
use std::sync::Arc;

/// A typed person declared in a hypothesis, with the dropout probability of their alleles
#[derive(Clone, Debug)]
pub struct Contributor {
    pub sample: Arc<Sample>,
    pub dropout: f64,
}

impl Contributor {
    pub fn new(sample: Arc<Sample>, dropout: f64) -> Self {
        Self { sample, dropout }
    }

    pub fn id(&self) -> &str {
        self.sample.id()
    }
}

/// Relationship between the first unknown contributor and a typed sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Relation {
    #[default]
    None,
    ParentChild,
    Siblings,
    HalfSiblings,
    GrandparentGrandchild,
    UncleNephew,
    Cousins,
}

impl Relation {
    /// Identity-by-descent probabilities (k0, k1, k2)
    pub fn ibd(self) -> [f64; 3] {
        match self {
            Relation::None => [1.0, 0.0, 0.0],
            Relation::ParentChild => [0.0, 1.0, 0.0],
            Relation::Siblings => [0.25, 0.5, 0.25],
            Relation::HalfSiblings | Relation::GrandparentGrandchild | Relation::UncleNephew => {
                [0.5, 0.5, 0.0]
            }
            Relation::Cousins => [0.75, 0.25, 0.0],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Relation::None => "none",
            Relation::ParentChild => "parent/child",
            Relation::Siblings => "siblings",
            Relation::HalfSiblings => "half siblings",
            Relation::GrandparentGrandchild => "grandparent/grandchild",
            Relation::UncleNephew => "uncle/nephew",
            Relation::Cousins => "cousins",
        }
    }
}

/// Declared kinship of the first unknown contributor
///
/// A relation always comes with the typed sample it refers to; the default
/// value declares no relative.
#[derive(Clone, Debug, Default)]
pub struct Relatedness {
    relation: Relation,
    sample: Option<Arc<Sample>>,
}

impl Relatedness {
    pub fn new(relation: Relation, sample: Arc<Sample>) -> Self {
        Self {
            relation,
            sample: Some(sample),
        }
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// The related sample, when a relation other than `None` is declared
    pub fn related_sample(&self) -> Option<&Arc<Sample>> {
        match self.relation {
            Relation::None => None,
            _ => self.sample.as_ref(),
        }
    }
}

/// Which hypotheses a dropout sweep applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HypothesisSelection {
    #[default]
    Neither,
    Prosecution,
    Defense,
    Both,
}

impl HypothesisSelection {
    pub fn includes_prosecution(self) -> bool {
        matches!(self, Self::Prosecution | Self::Both)
    }

    pub fn includes_defense(self) -> bool {
        matches!(self, Self::Defense | Self::Both)
    }
}

/// One side of the likelihood ratio
#[derive(Clone, Debug)]
pub struct Hypothesis {
    id: String,
    contributors: Vec<Contributor>,
    non_contributors: Vec<Contributor>,
    unknown_count: usize,
    unknown_dropout: f64,
    dropin: f64,
    theta: f64,
    relatedness: Relatedness,
    statistics: Arc<PopulationStatistics>,
}

impl Hypothesis {
    pub fn new(id: impl Into<String>, statistics: Arc<PopulationStatistics>) -> Self {
        Self {
            id: id.into(),
            contributors: Vec::new(),
            non_contributors: Vec::new(),
            unknown_count: 0,
            unknown_dropout: 0.0,
            dropin: 0.0,
            theta: 0.0,
            relatedness: Relatedness::default(),
            statistics,
        }
    }

    pub fn with_contributor(mut self, sample: Arc<Sample>, dropout: f64) -> Self {
        self.contributors.push(Contributor::new(sample, dropout));
        self
    }

    pub fn with_non_contributor(mut self, sample: Arc<Sample>, dropout: f64) -> Self {
        self.non_contributors.push(Contributor::new(sample, dropout));
        self
    }

    pub fn with_unknowns(mut self, count: usize, dropout: f64) -> Self {
        self.unknown_count = count;
        self.unknown_dropout = dropout;
        self
    }

    pub fn with_unknown_dropout(mut self, dropout: f64) -> Self {
        self.unknown_dropout = dropout;
        self
    }

    pub fn with_dropin(mut self, dropin: f64) -> Self {
        self.dropin = dropin;
        self
    }

    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    pub fn with_relatedness(mut self, relatedness: Relatedness) -> Self {
        self.relatedness = relatedness;
        self
    }

    /// Set the dropout of a declared contributor; returns whether the sample was found
    pub fn set_contributor_dropout(&mut self, sample_id: &str, dropout: f64) -> bool {
        let mut found = false;
        for contributor in self.contributors.iter_mut().filter(|c| c.id() == sample_id) {
            contributor.dropout = dropout;
            found = true;
        }
        found
    }

    pub fn set_unknown_dropout(&mut self, dropout: f64) {
        self.unknown_dropout = dropout;
    }

    pub fn set_dropin(&mut self, dropin: f64) {
        self.dropin = dropin;
    }

    pub fn set_theta(&mut self, theta: f64) {
        self.theta = theta;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn contributors(&self) -> &[Contributor] {
        &self.contributors
    }

    pub fn non_contributors(&self) -> &[Contributor] {
        &self.non_contributors
    }

    pub fn unknown_count(&self) -> usize {
        self.unknown_count
    }

    pub fn unknown_dropout(&self) -> f64 {
        self.unknown_dropout
    }

    pub fn dropin(&self) -> f64 {
        self.dropin
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn relatedness(&self) -> &Relatedness {
        &self.relatedness
    }

    pub fn statistics(&self) -> &Arc<PopulationStatistics> {
        &self.statistics
    }

    pub fn is_contributor(&self, sample_id: &str) -> bool {
        self.contributors.iter().any(|c| c.id() == sample_id)
    }

    /// Every typed person of the hypothesis: contributors then non-contributors
    pub fn typed(&self) -> impl Iterator<Item = &Contributor> {
        self.contributors.iter().chain(self.non_contributors.iter())
    }

    /// Check parameter domains and the contributor/non-contributor partition
    pub fn validate(&self) -> Result<()> {
        let probability = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(AnalysisError::invalid_input(format!(
                    "{} of hypothesis '{}' is {}, expected a probability in [0, 1]",
                    name, self.id, value
                )))
            }
        };

        for contributor in self.typed() {
            probability(&format!("dropout of {}", contributor.id()), contributor.dropout)?;
        }
        probability("unknown dropout", self.unknown_dropout)?;
        probability("drop-in", self.dropin)?;

        if !(0.0..1.0).contains(&self.theta) {
            return Err(AnalysisError::invalid_input(format!(
                "theta of hypothesis '{}' is {}, expected 0 <= theta < 1",
                self.id, self.theta
            )));
        }

        for contributor in &self.contributors {
            if self.non_contributors.iter().any(|n| n.id() == contributor.id()) {
                return Err(AnalysisError::invalid_input(format!(
                    "sample {} is both contributor and non-contributor in hypothesis '{}'",
                    contributor.id(),
                    self.id
                )));
            }
        }

        if self.relatedness.related_sample().is_some() && self.unknown_count == 0 {
            return Err(AnalysisError::invalid_input(format!(
                "hypothesis '{}' declares a related unknown but has no unknown contributors",
                self.id
            )));
        }

        self.statistics.validate()
    }
}
