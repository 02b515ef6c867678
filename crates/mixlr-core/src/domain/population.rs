//! Population statistics and the population-substructure correction
//!
//! Frequencies come from an externally parsed table. Observed alleles that
//! are missing from the table fall back to the rare-allele frequency floor.

use crate::domain::Fnv1a;
use crate::domain::genetics::Allele;
use crate::error::{AnalysisError, Result};
use std::collections::BTreeMap;

/// Allele frequency tables for a reference population
#[derive(Clone, Debug, PartialEq)]
pub struct PopulationStatistics {
    name: String,
    loci: BTreeMap<String, BTreeMap<Allele, f64>>,
    rare_allele_frequency: f64,
}

impl PopulationStatistics {
    /// Create an empty table with the given rare-allele frequency floor
    pub fn new(name: impl Into<String>, rare_allele_frequency: f64) -> Self {
        Self {
            name: name.into(),
            loci: BTreeMap::new(),
            rare_allele_frequency,
        }
    }

    /// Set the frequency of one allele
    pub fn with_frequency(
        mut self,
        locus: impl Into<String>,
        allele: impl Into<Allele>,
        frequency: f64,
    ) -> Self {
        self.loci
            .entry(locus.into())
            .or_default()
            .insert(allele.into(), frequency);
        self
    }

    /// Set the frequencies of a whole locus
    pub fn with_locus<I, A>(mut self, locus: impl Into<String>, frequencies: I) -> Self
    where
        I: IntoIterator<Item = (A, f64)>,
        A: Into<Allele>,
    {
        let table = self.loci.entry(locus.into()).or_default();
        for (allele, frequency) in frequencies {
            table.insert(allele.into(), frequency);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rare_allele_frequency(&self) -> f64 {
        self.rare_allele_frequency
    }

    pub fn has_locus(&self, locus: &str) -> bool {
        self.loci.contains_key(locus)
    }

    pub fn locus_names(&self) -> impl Iterator<Item = &str> {
        self.loci.keys().map(String::as_str)
    }

    /// Frequency table of a locus, if the population was typed at it
    pub fn locus_table(&self, locus: &str) -> Option<&BTreeMap<Allele, f64>> {
        self.loci.get(locus)
    }

    /// Frequency of an allele, applying the rare-allele floor
    ///
    /// Returns `None` only when the locus itself is unknown.
    pub fn frequency(&self, locus: &str, allele: &Allele) -> Option<f64> {
        self.loci
            .get(locus)
            .map(|table| table.get(allele).copied().unwrap_or(self.rare_allele_frequency))
    }

    /// Content hash binding a run to this exact table (FNV-1a)
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Fnv1a::new();
        hasher.write_field(&self.name);
        hasher.write(&self.rare_allele_frequency.to_bits().to_le_bytes());
        for (locus, table) in &self.loci {
            hasher.write_field(locus);
            for (allele, frequency) in table {
                hasher.write_field(allele.name());
                hasher.write(&frequency.to_bits().to_le_bytes());
            }
        }
        hasher.finish()
    }

    /// Check that every frequency and the floor lie in (0, 1] and that no
    /// locus table is empty
    pub fn validate(&self) -> Result<()> {
        if !(self.rare_allele_frequency > 0.0 && self.rare_allele_frequency <= 1.0) {
            return Err(AnalysisError::invalid_input(format!(
                "rare allele frequency {} of population '{}' is outside (0, 1]",
                self.rare_allele_frequency, self.name
            )));
        }
        for (locus, table) in &self.loci {
            if table.is_empty() {
                return Err(AnalysisError::configuration(format!(
                    "population '{}' has an empty frequency table at {}",
                    self.name, locus
                )));
            }
            for (allele, &frequency) in table {
                if !(frequency > 0.0 && frequency <= 1.0) {
                    return Err(AnalysisError::invalid_input(format!(
                        "frequency {} of allele {} at {} is outside (0, 1]",
                        frequency, allele, locus
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Probability of drawing an allele under the Balding-Nichols sampling formula
///
/// `same` alleles of this type have already been drawn out of `drawn` in
/// total. With `theta == 0` this reduces to the allele frequency.
#[inline]
pub fn theta_draw(theta: f64, frequency: f64, same: u32, drawn: u32) -> f64 {
    (same as f64 * theta + (1.0 - theta) * frequency) / (1.0 + (drawn as f64 - 1.0) * theta)
}
