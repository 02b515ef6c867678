//! Genetic profile model
//!
//! Samples are produced by external readers and are read-only to the
//! analysis. They are shared between hypotheses through `Arc`.

use crate::domain::Fnv1a;
use std::collections::BTreeSet;
use std::fmt;

/// Allele designation at a locus (e.g. "12", "9.3", "X")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Allele(String);

impl Allele {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Allele {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Allele {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Typing result of one sample at one locus
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locus {
    name: String,
    alleles: BTreeSet<Allele>,
    /// A single observed allele represents a true homozygote
    homozygote: bool,
}

impl Locus {
    /// Create a locus from its allele designations (duplicates collapse)
    pub fn new<I, A>(name: impl Into<String>, alleles: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Allele>,
    {
        Self {
            name: name.into(),
            alleles: alleles.into_iter().map(Into::into).collect(),
            homozygote: false,
        }
    }

    /// Mark the locus as a true homozygote
    pub fn treated_as_homozygote(mut self) -> Self {
        self.homozygote = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alleles(&self) -> &BTreeSet<Allele> {
        &self.alleles
    }

    pub fn is_homozygote(&self) -> bool {
        self.homozygote
    }

    pub fn contains(&self, allele: &Allele) -> bool {
        self.alleles.contains(allele)
    }

    /// Interpret the locus as a diploid reference genotype
    ///
    /// One distinct allele is read as a homozygote whether or not the
    /// locus carries the homozygote flag. Returns `None` for an empty locus
    /// or one with more than two alleles.
    pub fn genotype(&self) -> Option<(&Allele, &Allele)> {
        let mut iter = self.alleles.iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), None, None) => Some((a, a)),
            (Some(a), Some(b), None) if !self.homozygote => Some((a, b)),
            _ => None,
        }
    }
}

/// Source-file provenance of a sample
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    pub file_name: String,
    pub content_hash: String,
}

/// A DNA profile: either an evidence replicate or a reference profile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    id: String,
    loci: Vec<Locus>,
    provenance: Option<Provenance>,
    enabled: bool,
}

impl Sample {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            loci: Vec::new(),
            provenance: None,
            enabled: true,
        }
    }

    /// Add a locus; a locus with the same name is replaced
    pub fn with_locus(mut self, locus: Locus) -> Self {
        match self.loci.iter_mut().find(|l| l.name == locus.name) {
            Some(existing) => *existing = locus,
            None => self.loci.push(locus),
        }
        self
    }

    pub fn with_provenance(mut self, file_name: impl Into<String>, content_hash: impl Into<String>) -> Self {
        self.provenance = Some(Provenance {
            file_name: file_name.into(),
            content_hash: content_hash.into(),
        });
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn loci(&self) -> &[Locus] {
        &self.loci
    }

    pub fn locus(&self, name: &str) -> Option<&Locus> {
        self.loci.iter().find(|l| l.name == name)
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of distinct alleles observed over the given loci
    ///
    /// Loci the sample is not typed at count as zero alleles.
    pub fn allele_count<S: AsRef<str>>(&self, loci: &[S]) -> usize {
        loci.iter()
            .filter_map(|name| self.locus(name.as_ref()))
            .map(|locus| locus.alleles.len())
            .sum()
    }

    /// Content hash over the typed alleles (FNV-1a)
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Fnv1a::new();
        hasher.write_field(&self.id);
        for locus in &self.loci {
            hasher.write_field(&locus.name);
            hasher.write(&[locus.homozygote as u8]);
            for allele in &locus.alleles {
                hasher.write_field(allele.name());
            }
        }
        hasher.finish()
    }
}
