//! Case snapshot
//!
//! A `Case` bundles everything one analysis run reads: the evidence
//! replicates, both hypotheses and the set of enabled loci. Controllers
//! clone the case on submission and only ever work on that private copy.

use crate::domain::genetics::Sample;
use crate::domain::hypothesis::Hypothesis;
use crate::error::{AnalysisError, Result};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct Case {
    replicates: Vec<Arc<Sample>>,
    profiles: Vec<Arc<Sample>>,
    prosecution: Hypothesis,
    defense: Hypothesis,
    enabled_loci: Vec<String>,
}

impl Case {
    /// Create a case with every locus typed in an enabled replicate enabled
    pub fn new(replicates: Vec<Arc<Sample>>, prosecution: Hypothesis, defense: Hypothesis) -> Self {
        let mut enabled_loci: Vec<String> = Vec::new();
        for replicate in replicates.iter().filter(|r| r.is_enabled()) {
            for locus in replicate.loci() {
                if !enabled_loci.iter().any(|name| name == locus.name()) {
                    enabled_loci.push(locus.name().to_string());
                }
            }
        }

        Self {
            replicates,
            profiles: Vec::new(),
            prosecution,
            defense,
            enabled_loci,
        }
    }

    /// Replace the enabled loci (order is kept, duplicates dropped)
    pub fn with_enabled_loci<I, S>(mut self, loci: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_loci.clear();
        for locus in loci {
            let locus = locus.into();
            if !self.enabled_loci.contains(&locus) {
                self.enabled_loci.push(locus);
            }
        }
        self
    }

    /// Register the active reference profiles of the session
    pub fn with_profiles(mut self, profiles: Vec<Arc<Sample>>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Disable a single locus
    pub fn without_locus(mut self, locus: &str) -> Self {
        self.enabled_loci.retain(|name| name != locus);
        self
    }

    pub fn with_prosecution(mut self, prosecution: Hypothesis) -> Self {
        self.prosecution = prosecution;
        self
    }

    pub fn with_defense(mut self, defense: Hypothesis) -> Self {
        self.defense = defense;
        self
    }

    pub fn replicates(&self) -> &[Arc<Sample>] {
        &self.replicates
    }

    pub fn profiles(&self) -> &[Arc<Sample>] {
        &self.profiles
    }

    /// Replicates that take part in the analysis
    pub fn enabled_replicates(&self) -> impl Iterator<Item = &Arc<Sample>> {
        self.replicates.iter().filter(|r| r.is_enabled())
    }

    pub fn prosecution(&self) -> &Hypothesis {
        &self.prosecution
    }

    pub fn defense(&self) -> &Hypothesis {
        &self.defense
    }

    pub fn prosecution_mut(&mut self) -> &mut Hypothesis {
        &mut self.prosecution
    }

    pub fn defense_mut(&mut self) -> &mut Hypothesis {
        &mut self.defense
    }

    /// Both hypotheses, prosecution first
    pub fn hypotheses(&self) -> [&Hypothesis; 2] {
        [&self.prosecution, &self.defense]
    }

    pub fn enabled_loci(&self) -> &[String] {
        &self.enabled_loci
    }

    /// Apply `f` to both hypotheses in place
    pub fn update_hypotheses<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Hypothesis),
    {
        f(&mut self.prosecution);
        f(&mut self.defense);
    }

    /// Active reference profiles the hypothesis declares neither way
    ///
    /// With theta > 0 such a setup is numerically valid but worth flagging.
    pub fn unaccounted_profiles(&self, hypothesis: &Hypothesis) -> Vec<&str> {
        self.profiles
            .iter()
            .filter(|p| p.is_enabled())
            .map(|p| p.id())
            .filter(|id| !hypothesis.typed().any(|c| c.id() == *id))
            .collect()
    }

    /// Validate both hypotheses and the enabled loci
    pub fn validate(&self) -> Result<()> {
        if self.enabled_loci.is_empty() {
            return Err(AnalysisError::configuration("no locus is enabled"));
        }
        if self.enabled_replicates().next().is_none() {
            return Err(AnalysisError::configuration("no enabled evidence replicate"));
        }

        self.prosecution.validate()?;
        self.defense.validate()?;

        for hypothesis in self.hypotheses() {
            let unaccounted = self.unaccounted_profiles(hypothesis);
            if hypothesis.theta() > 0.0 && !unaccounted.is_empty() {
                warn!(
                    hypothesis = hypothesis.id(),
                    profiles = ?unaccounted,
                    "theta correction with profiles declared neither contributor nor non-contributor"
                );
            }
        }

        if self.prosecution.statistics().content_hash() != self.defense.statistics().content_hash() {
            warn!(
                prosecution = self.prosecution.statistics().name(),
                defense = self.defense.statistics().name(),
                "hypotheses use different population statistics"
            );
        }
        Ok(())
    }
}
