//! Built-in reference case: a two-person mixture typed twice
//!
//! The evidence shows a victim and one further contributor; at D8S1179 the
//! suspect's 13 is missing from both replicates.

use mixlr_core::{Case, DEFENSE, Hypothesis, Locus, PROSECUTION, PopulationStatistics, Sample};
use std::sync::Arc;

pub const VICTIM: &str = "V";
pub const SUSPECT: &str = "S";

fn statistics() -> PopulationStatistics {
    PopulationStatistics::new("demo", 0.001)
        .with_locus(
            "D3S1358",
            [("14", 0.14), ("15", 0.25), ("16", 0.23), ("17", 0.21), ("18", 0.17)],
        )
        .with_locus(
            "vWA",
            [("14", 0.10), ("15", 0.11), ("16", 0.20), ("17", 0.26), ("18", 0.22), ("19", 0.11)],
        )
        .with_locus(
            "FGA",
            [("20", 0.13), ("21", 0.18), ("22", 0.22), ("23", 0.16), ("24", 0.14), ("25", 0.17)],
        )
        .with_locus(
            "D8S1179",
            [("10", 0.10), ("11", 0.08), ("12", 0.15), ("13", 0.32), ("14", 0.21), ("15", 0.14)],
        )
        .with_locus("TH01", [("6", 0.23), ("7", 0.19), ("8", 0.12), ("9", 0.16), ("9.3", 0.30)])
}

fn profile(id: &str, loci: [(&str, &[&str]); 5]) -> Arc<Sample> {
    let sample = loci
        .into_iter()
        .fold(Sample::new(id), |sample, (locus, alleles)| {
            sample.with_locus(Locus::new(locus, alleles.iter().copied()))
        });
    let hash = sample.content_hash();
    Arc::new(sample.with_provenance("built-in", format!("{:016x}", hash)))
}

/// Victim and suspect under Hp, victim and one unknown under Hd
pub fn build(dropout: f64, dropin: f64, theta: f64) -> Case {
    let statistics = Arc::new(statistics());

    let replicates = vec![
        profile(
            "E1",
            [
                ("D3S1358", &["15", "16", "17"]),
                ("vWA", &["16", "17", "18"]),
                ("FGA", &["21", "22", "24"]),
                ("D8S1179", &["12", "14"]),
                ("TH01", &["6", "9.3"]),
            ],
        ),
        profile(
            "E2",
            [
                ("D3S1358", &["15", "16", "17"]),
                ("vWA", &["16", "18"]),
                ("FGA", &["21", "22", "24", "25"]),
                ("D8S1179", &["12", "14"]),
                ("TH01", &["6", "7", "9.3"]),
            ],
        ),
    ];
    let victim = profile(
        VICTIM,
        [
            ("D3S1358", &["15", "16"]),
            ("vWA", &["16", "18"]),
            ("FGA", &["21", "24"]),
            ("D8S1179", &["12"]),
            ("TH01", &["6", "9.3"]),
        ],
    );
    let suspect = profile(
        SUSPECT,
        [
            ("D3S1358", &["16", "17"]),
            ("vWA", &["17", "18"]),
            ("FGA", &["22", "24"]),
            ("D8S1179", &["13", "14"]),
            ("TH01", &["7", "9.3"]),
        ],
    );

    let prosecution = Hypothesis::new(PROSECUTION, statistics.clone())
        .with_contributor(victim.clone(), dropout)
        .with_contributor(suspect.clone(), dropout)
        .with_dropin(dropin)
        .with_theta(theta);
    let defense = Hypothesis::new(DEFENSE, statistics)
        .with_contributor(victim.clone(), dropout)
        .with_non_contributor(suspect.clone(), dropout)
        .with_unknowns(1, dropout)
        .with_dropin(dropin)
        .with_theta(theta);

    Case::new(replicates, prosecution, defense).with_profiles(vec![victim, suspect])
}
