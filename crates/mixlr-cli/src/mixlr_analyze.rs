//! Likelihood ratio CLI on the built-in reference case
//!
//! Usage: mixlr_analyze [options]
//!
//! Options:
//!   --mode <lr|sweep|estimate>  Analysis to run (default: lr)
//!   --threads <n>               Worker threads (default: all cores)
//!   --dropout <p>               Contributor and unknown dropout (default: 0.1)
//!   --dropin <p>                Drop-in probability (default: 0.05)
//!   --theta <t>                 Co-ancestry coefficient (default: 0.01)
//!   --from <p> --to <p>         Dropout range for sweep/estimate
//!   --steps <n>                 Sweep steps (default: 10)
//!   --iterations <n>            Estimation iterations (default: 1000)
//!   --seed <n>                  Estimation seed (default: random)
//!   --help, -h                  Show help
//!
//! Example: mixlr_analyze --mode sweep --from 0.01 --to 0.99 --steps 20

mod demo_case;

use mixlr_core::{
    AnalysisConfig, AnalysisEvent, AnalysisScheduler, DEFAULT_ITERATIONS, DropoutEstimator,
    EstimationSettings, EventSink, HypothesisSelection, MainAnalysis, SensitivitySweep,
    SweepSettings,
};
use std::env;
use std::io::{self, Write};
use std::str::FromStr;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    LikelihoodRatio,
    Sweep,
    Estimate,
}

struct Args {
    mode: Mode,
    threads: usize,
    dropout: f64,
    dropin: f64,
    theta: f64,
    from: Option<f64>,
    to: Option<f64>,
    steps: usize,
    iterations: usize,
    seed: Option<u64>,
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --mode <lr|sweep|estimate>  Analysis to run (default: lr)");
    eprintln!("  --threads <n>               Worker threads (default: all cores)");
    eprintln!("  --dropout <p>               Contributor and unknown dropout (default: 0.1)");
    eprintln!("  --dropin <p>                Drop-in probability (default: 0.05)");
    eprintln!("  --theta <t>                 Co-ancestry coefficient (default: 0.01)");
    eprintln!("  --from <p>                  Lower dropout bound for sweep/estimate");
    eprintln!("  --to <p>                    Upper dropout bound for sweep/estimate");
    eprintln!("  --steps <n>                 Sweep steps (default: 10)");
    eprintln!("  --iterations <n>            Estimation iterations (default: {})", DEFAULT_ITERATIONS);
    eprintln!("  --seed <n>                  Estimation seed (default: random)");
    eprintln!("  --help, -h                  Show this help message");
    eprintln!();
    eprintln!("Set RUST_LOG (e.g. RUST_LOG=debug) to control log output.");
}

fn value<T: FromStr>(args: &[String], i: usize, name: &str) -> Result<T, String> {
    let raw = args
        .get(i + 1)
        .ok_or_else(|| format!("Missing value for {}", name))?;
    raw.parse()
        .map_err(|_| format!("Invalid value for {}: {}", name, raw))
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();

    let mut parsed = Args {
        mode: Mode::LikelihoodRatio,
        threads: 0,
        dropout: 0.1,
        dropin: 0.05,
        theta: 0.01,
        from: None,
        to: None,
        steps: 10,
        iterations: DEFAULT_ITERATIONS,
        seed: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--mode" => {
                parsed.mode = match value::<String>(&args, i, "--mode")?.as_str() {
                    "lr" => Mode::LikelihoodRatio,
                    "sweep" => Mode::Sweep,
                    "estimate" => Mode::Estimate,
                    other => return Err(format!("Unknown mode: {}", other)),
                };
                i += 1;
            }
            "--threads" => {
                parsed.threads = value(&args, i, "--threads")?;
                i += 1;
            }
            "--dropout" => {
                parsed.dropout = value(&args, i, "--dropout")?;
                i += 1;
            }
            "--dropin" => {
                parsed.dropin = value(&args, i, "--dropin")?;
                i += 1;
            }
            "--theta" => {
                parsed.theta = value(&args, i, "--theta")?;
                i += 1;
            }
            "--from" => {
                parsed.from = Some(value(&args, i, "--from")?);
                i += 1;
            }
            "--to" => {
                parsed.to = Some(value(&args, i, "--to")?);
                i += 1;
            }
            "--steps" => {
                parsed.steps = value(&args, i, "--steps")?;
                i += 1;
            }
            "--iterations" => {
                parsed.iterations = value(&args, i, "--iterations")?;
                i += 1;
            }
            "--seed" => {
                parsed.seed = Some(value(&args, i, "--seed")?);
                i += 1;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                std::process::exit(0);
            }
            _ => return Err(format!("Unknown option: {}", args[i])),
        }
        i += 1;
    }

    Ok(parsed)
}

fn print_progress(label: &str, fraction: f64) {
    print!("\r[{}] Progress: {:.2}%", label, fraction * 100.0);
    let _ = io::stdout().flush();
}

fn run_likelihood_ratio(scheduler: &AnalysisScheduler, args: &Args) -> Result<(), String> {
    let case = demo_case::build(args.dropout, args.dropin, args.theta);
    let (sink, receiver) = EventSink::channel();
    let handle = scheduler.submit(MainAnalysis::new(&case, sink));

    for event in receiver.iter() {
        match event {
            AnalysisEvent::Progress { fraction } => print_progress("Analysis", fraction),
            AnalysisEvent::HypothesisStarted { hypothesis } => {
                println!();
                println!("Computing Pr(E | {})...", hypothesis);
            }
            AnalysisEvent::AnalysisFinished(_) => println!(),
            _ => {}
        }
    }

    let lr = handle.wait().map_err(|e| e.to_string())?;

    println!();
    println!("{:<10} {:>14} {:>14} {:>14}", "Locus", "Pr(E|Hp)", "Pr(E|Hd)", "LR");
    for ratio in lr.loci() {
        println!(
            "{:<10} {:>14.6e} {:>14.6e} {:>14.6e}",
            ratio.subject, ratio.prosecution, ratio.defense, ratio.ratio
        );
    }
    let overall = lr.overall();
    println!(
        "{:<10} {:>14.6e} {:>14.6e} {:>14.6e}",
        overall.subject, overall.prosecution, overall.defense, overall.ratio
    );
    println!("log10 LR = {:.4}", lr.log10());
    println!("Population statistics hash: {:016x}", lr.statistics_hash());
    Ok(())
}

fn run_sweep(scheduler: &AnalysisScheduler, args: &Args) -> Result<(), String> {
    let case = demo_case::build(args.dropout, args.dropin, args.theta);
    let settings = SweepSettings::new(args.from.unwrap_or(0.0), args.to.unwrap_or(0.99), args.steps)
        .with_person_of_interest(demo_case::SUSPECT)
        .with_unknowns(HypothesisSelection::Defense);

    let sweep = SensitivitySweep::new(&case, settings).with_progress(|current, total| {
        print_progress("Sweep", current as f64 / total.max(1) as f64);
    });
    let result = scheduler.submit(sweep).wait().map_err(|e| e.to_string())?;
    println!();

    let Some(lr) = result.likelihood_ratio() else {
        return Err("sweep returned no likelihood ratio series".to_string());
    };
    println!("{:>8} {:>12}", "Dropout", "log10 LR");
    for point in &lr.points {
        println!("{:>8.2} {:>12.4}", point.dropout, point.value);
    }
    let skipped = result.log.iter().filter(|entry| entry.outcome.is_err()).count();
    if skipped > 0 {
        println!("{} degenerate evaluation(s) skipped", skipped);
    }
    Ok(())
}

fn run_estimate(scheduler: &AnalysisScheduler, args: &Args) -> Result<(), String> {
    let case = demo_case::build(args.dropout, args.dropin, args.theta);
    let observed = case
        .enabled_replicates()
        .map(|replicate| replicate.allele_count(case.enabled_loci()))
        .max()
        .unwrap_or(0);

    let mut settings = EstimationSettings::new(observed)
        .with_iterations(args.iterations)
        .with_range(args.from.unwrap_or(0.01), args.to.unwrap_or(0.99), 0.01)
        .with_person_of_interest(demo_case::SUSPECT)
        .with_person_of_interest(demo_case::VICTIM);
    if let Some(seed) = args.seed {
        settings = settings.with_seed(seed);
    }

    let estimator = DropoutEstimator::new(&case, settings).with_progress(|current, total| {
        if current % 100 == 0 || current == total {
            print_progress("Estimation", current as f64 / total.max(1) as f64);
        }
    });
    let estimation = scheduler.submit(estimator).wait().map_err(|e| e.to_string())?;
    println!();

    println!("Observed alleles: {}", estimation.observed_allele_count);
    println!("Seed: {}", estimation.seed);
    for estimate in &estimation.hypotheses {
        println!(
            "{:<12} 5%: {:.3}  95%: {:.3}  ({} successes)",
            estimate.hypothesis,
            estimate.lower,
            estimate.upper,
            estimate.successes.len()
        );
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage(&env::args().next().unwrap_or_default());
            std::process::exit(1);
        }
    };

    let scheduler = match AnalysisScheduler::new(AnalysisConfig::default().with_threads(args.threads)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    println!("Using {} worker thread(s).", scheduler.threads());

    let start = Instant::now();
    let result = match args.mode {
        Mode::LikelihoodRatio => run_likelihood_ratio(&scheduler, &args),
        Mode::Sweep => run_sweep(&scheduler, &args),
        Mode::Estimate => run_estimate(&scheduler, &args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    println!();
    println!("Done! Total time: {:.2} seconds", start.elapsed().as_secs_f64());
}
