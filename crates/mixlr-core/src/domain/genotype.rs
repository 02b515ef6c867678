//! Genotype enumeration and genotype probabilities
//!
//! Alleles of a locus are addressed by index into the locus allele universe
//! prepared by the engine. Genotype probabilities follow the sequential
//! sampling formula, so every genotype drawn is conditioned on the alleles
//! drawn before it.

use crate::domain::population::theta_draw;

/// Unordered diploid genotype (`first <= second`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Genotype {
    pub first: usize,
    pub second: usize,
}

impl Genotype {
    pub fn new(a: usize, b: usize) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    #[inline]
    pub fn is_homozygote(&self) -> bool {
        self.first == self.second
    }

    #[inline]
    pub fn contains(&self, allele: usize) -> bool {
        self.first == allele || self.second == allele
    }
}

/// Number of unordered genotypes over `alleles` alleles
pub fn genotype_count(alleles: usize) -> usize {
    alleles * (alleles + 1) / 2
}

/// All unordered genotypes over `alleles` alleles, in lexicographic order
pub fn enumerate_genotypes(alleles: usize) -> Vec<Genotype> {
    let mut genotypes = Vec::with_capacity(genotype_count(alleles));
    for a in 0..alleles {
        for b in a..alleles {
            genotypes.push(Genotype { first: a, second: b });
        }
    }
    genotypes
}

/// Allele counts of everything drawn so far from the subpopulation
///
/// Push and pop must be balanced; enumeration restores the counts on the
/// way back up.
#[derive(Clone, Debug)]
pub struct AlleleCounts {
    counts: Vec<u32>,
    total: u32,
    theta: f64,
}

impl AlleleCounts {
    pub fn new(alleles: usize, theta: f64) -> Self {
        Self {
            counts: vec![0; alleles],
            total: 0,
            theta,
        }
    }

    pub fn add(&mut self, allele: usize) {
        self.counts[allele] += 1;
        self.total += 1;
    }

    pub fn remove(&mut self, allele: usize) {
        self.counts[allele] -= 1;
        self.total -= 1;
    }

    pub fn count(&self, allele: usize) -> u32 {
        self.counts[allele]
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Probability that the next allele drawn is `allele`
    #[inline]
    pub fn draw(&self, allele: usize, frequency: f64) -> f64 {
        theta_draw(self.theta, frequency, self.counts[allele], self.total)
    }

    /// Probability of `genotype` for an unrelated person; its alleles are added
    pub fn push_genotype(&mut self, genotype: Genotype, frequencies: &[f64]) -> f64 {
        let first = self.draw(genotype.first, frequencies[genotype.first]);
        self.add(genotype.first);
        let second = self.draw(genotype.second, frequencies[genotype.second]);
        self.add(genotype.second);

        if genotype.is_homozygote() {
            first * second
        } else {
            2.0 * first * second
        }
    }

    /// Probability of `genotype` for a relative of someone typed `relative`
    ///
    /// Mixes the unrelated probability, the one-allele-shared probability and
    /// identity by the IBD coefficients `[k0, k1, k2]`. Its alleles are added.
    pub fn push_related_genotype(
        &mut self,
        genotype: Genotype,
        relative: Genotype,
        ibd: [f64; 3],
        frequencies: &[f64],
    ) -> f64 {
        let Genotype { first: a, second: b } = genotype;

        // One allele identical by descent: the relative transmits either of
        // its alleles with probability 1/2, the other allele is drawn.
        let mut shared_one = 0.0;
        if ibd[1] > 0.0 {
            for transmitted in [relative.first, relative.second] {
                if transmitted == a {
                    shared_one += 0.5 * self.draw(b, frequencies[b]);
                }
                if transmitted == b && a != b {
                    shared_one += 0.5 * self.draw(a, frequencies[a]);
                }
            }
        }

        let identical = if genotype == relative { 1.0 } else { 0.0 };
        let unrelated = self.push_genotype(genotype, frequencies);

        ibd[0] * unrelated + ibd[1] * shared_one + ibd[2] * identical
    }

    /// Remove the alleles of a genotype pushed earlier
    pub fn pop_genotype(&mut self, genotype: Genotype) {
        self.remove(genotype.second);
        self.remove(genotype.first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_genotype_normalizes_order() {
        assert_eq!(Genotype::new(3, 1), Genotype::new(1, 3));
        assert!(Genotype::new(2, 2).is_homozygote());
    }

    #[test]
    fn test_enumerate_genotypes() {
        let genotypes = enumerate_genotypes(3);
        assert_eq!(genotypes.len(), genotype_count(3));
        assert_eq!(genotypes[0], Genotype::new(0, 0));
        assert_eq!(genotypes[5], Genotype::new(2, 2));
    }

    #[test]
    fn test_hardy_weinberg_without_theta() {
        let freqs = [0.1, 0.3, 0.6];
        let mut counts = AlleleCounts::new(3, 0.0);

        let het = counts.push_genotype(Genotype::new(0, 1), &freqs);
        assert!((het - 2.0 * 0.1 * 0.3).abs() < EPS);
        counts.pop_genotype(Genotype::new(0, 1));

        let hom = counts.push_genotype(Genotype::new(2, 2), &freqs);
        assert!((hom - 0.36).abs() < EPS);
        counts.pop_genotype(Genotype::new(2, 2));
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn test_genotype_probabilities_sum_to_one() {
        let freqs = [0.1, 0.3, 0.6];
        for theta in [0.0, 0.01, 0.05] {
            let mut counts = AlleleCounts::new(3, theta);
            // Condition on a typed heterozygote
            counts.add(0);
            counts.add(1);
            let total: f64 = enumerate_genotypes(3)
                .into_iter()
                .map(|g| {
                    let p = counts.push_genotype(g, &freqs);
                    counts.pop_genotype(g);
                    p
                })
                .sum();
            assert!((total - 1.0).abs() < 1e-12, "theta {}: {}", theta, total);
        }
    }

    #[test]
    fn test_theta_homozygote_matches_nrc_formula() {
        // NRC II 4.10a: Pr(aa | typed ab) with theta, sequentially conditioned
        let theta = 0.03;
        let freqs = [0.2, 0.5, 0.3];
        let mut counts = AlleleCounts::new(3, theta);
        counts.add(0);
        counts.add(1);
        let p = counts.push_genotype(Genotype::new(0, 0), &freqs);

        let pa = 0.2;
        let expected = (2.0 * theta + (1.0 - theta) * pa) * (theta + (1.0 - theta) * pa)
            / ((1.0 + theta) * (1.0 + 2.0 * theta));
        assert!((p - expected).abs() < EPS);
    }

    #[test]
    fn test_related_parent_child() {
        // Child of an "ab" parent has genotype "ac" with probability pc / 2
        let freqs = [0.1, 0.2, 0.3, 0.4];
        let relative = Genotype::new(0, 1);
        let mut counts = AlleleCounts::new(4, 0.0);
        let p = counts.push_related_genotype(Genotype::new(0, 2), relative, [0.0, 1.0, 0.0], &freqs);
        assert!((p - 0.15).abs() < EPS);
    }

    #[test]
    fn test_related_siblings_identical() {
        // Full sibling of an "ab" person: (1 + pa + pb + 2 pa pb) / 4
        let freqs = [0.1, 0.2, 0.7];
        let relative = Genotype::new(0, 1);
        let mut counts = AlleleCounts::new(3, 0.0);
        let p = counts.push_related_genotype(relative, relative, [0.25, 0.5, 0.25], &freqs);
        let expected = (1.0 + 0.1 + 0.2 + 2.0 * 0.1 * 0.2) / 4.0;
        assert!((p - expected).abs() < EPS);
    }

    #[test]
    fn test_related_probabilities_sum_to_one() {
        let freqs = [0.1, 0.2, 0.3, 0.4];
        let relative = Genotype::new(1, 1);
        for ibd in [[0.0, 1.0, 0.0], [0.25, 0.5, 0.25], [0.75, 0.25, 0.0]] {
            let mut counts = AlleleCounts::new(4, 0.0);
            let total: f64 = enumerate_genotypes(4)
                .into_iter()
                .map(|g| {
                    let p = counts.push_related_genotype(g, relative, ibd, &freqs);
                    counts.pop_genotype(g);
                    p
                })
                .sum();
            assert!((total - 1.0).abs() < 1e-12, "{:?}: {}", ibd, total);
        }
    }
}
