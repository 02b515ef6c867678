//! Cancellation of long-running analyses
//!
//! These tests rely on wall-clock timing and run serially.

use mixlr_core::{
    AnalysisConfig, AnalysisError, AnalysisEvent, AnalysisScheduler, Case, DropoutEstimator,
    EstimationSettings, EventSink, Hypothesis, Locus, MainAnalysis, PopulationStatistics, Sample,
};
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const LOCI: [&str; 4] = ["D3S1358", "vWA", "FGA", "D8S1179"];

/// Four unknowns over ten-allele loci with theta: far too large to finish quickly
fn heavy_case() -> Case {
    let mut stats = PopulationStatistics::new("heavy", 0.001);
    let mut evidence = Sample::new("E1");
    for locus in LOCI {
        let alleles: Vec<String> = (10..20).map(|a| a.to_string()).collect();
        stats = stats.with_locus(locus, alleles.iter().map(|a| (a.as_str(), 0.1)));
        evidence = evidence.with_locus(Locus::new(locus, alleles[..6].iter().map(String::as_str)));
    }
    let stats = Arc::new(stats);

    Case::new(
        vec![Arc::new(evidence)],
        Hypothesis::new("Prosecution", stats.clone())
            .with_unknowns(4, 0.2)
            .with_dropin(0.05)
            .with_theta(0.03),
        Hypothesis::new("Defense", stats)
            .with_unknowns(5, 0.2)
            .with_dropin(0.05)
            .with_theta(0.03),
    )
}

fn scheduler() -> AnalysisScheduler {
    AnalysisScheduler::new(AnalysisConfig::default().with_threads(4)).unwrap()
}

#[test]
#[serial]
fn test_cancel_main_analysis() {
    let (sink, receiver) = EventSink::channel();
    let handle = scheduler().submit(MainAnalysis::new(&heavy_case(), sink));

    thread::sleep(Duration::from_millis(50));
    handle.cancel();

    let result = handle
        .wait_timeout(Duration::from_secs(10))
        .expect("cancelled analysis did not stop");
    assert_eq!(result, Err(AnalysisError::Cancelled));

    let events: Vec<_> = receiver.iter().collect();
    let finished: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AnalysisEvent::AnalysisFinished(outcome) => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![&Err(AnalysisError::Cancelled)]);
    assert!(matches!(events.last(), Some(AnalysisEvent::AnalysisFinished(_))));
}

#[test]
#[serial]
fn test_cancel_estimation() {
    let case = heavy_case();
    let settings = EstimationSettings::new(24)
        .with_iterations(10_000_000)
        .with_seed(1);
    let handle = scheduler().submit(DropoutEstimator::new(&case, settings));

    thread::sleep(Duration::from_millis(50));
    handle.cancel();

    let result = handle
        .wait_timeout(Duration::from_secs(10))
        .expect("cancelled estimation did not stop");
    assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
}

#[test]
#[serial]
fn test_scheduler_reusable_after_cancel() {
    let scheduler = scheduler();
    let handle = scheduler.submit(MainAnalysis::new(&heavy_case(), EventSink::silent()));
    handle.cancel();
    assert_eq!(handle.wait(), Err(AnalysisError::Cancelled));

    let stats = Arc::new(PopulationStatistics::new("small", 0.001).with_locus("TH01", [("6", 0.5), ("7", 0.5)]));
    let evidence = Arc::new(Sample::new("E1").with_locus(Locus::new("TH01", ["6", "7"])));
    let suspect = Arc::new(Sample::new("S").with_locus(Locus::new("TH01", ["6", "7"])));
    let case = Case::new(
        vec![evidence],
        Hypothesis::new("Prosecution", stats.clone()).with_contributor(suspect, 0.0),
        Hypothesis::new("Defense", stats).with_unknowns(1, 0.0),
    );
    let lr = scheduler
        .submit(MainAnalysis::new(&case, EventSink::silent()))
        .wait()
        .unwrap();
    assert!((lr.overall().ratio - 2.0).abs() < 1e-9);
}
