//! pipeline-runner: end-to-end run of the EEG ensemble on synthetic trials.
//!
//! Generates alpha- versus beta-dominated trials, fits a `TrialPipeline` for
//! each ensemble strategy, evaluates it on a holdout split and prints a JSON
//! summary to stdout.
//!
//! Usage:
//!   cargo run -p pipeline-runner
//!   cargo run -p pipeline-runner -- --trials 400 --channels 4 --seed 7
//!   cargo run -p pipeline-runner -- --strategy stacking
//!
//! Ensemble settings come from the `ENSEMBLE_*` environment variables (a
//! `.env` file is honoured); `--strategy` overrides the strategy sweep.

mod synthetic;

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use confidence_calibrator::{CalibrationMethod, ConfidenceCalibrator, MIN_CALIBRATION_SAMPLES};
use ensemble_core::{EnsembleStrategy, PerformanceMetrics, Trial};
use ensemble_orchestrator::{EnsembleConfig, EnsembleCoordinator, TrialPipeline};
use performance_evaluator::PerformanceEvaluator;
use serde::Serialize;
use signal_processing::{FeatureExtractor, SignalConditioner};

use crate::synthetic::{TrialGenerator, TrialShape};

const DEFAULT_TRIALS: usize = 200;
const DEFAULT_CHANNELS: usize = 8;
const DEFAULT_SAMPLE_RATE: f64 = 250.0;
const DEFAULT_SECONDS: f64 = 2.0;
const DEFAULT_SEED: u64 = 42;
/// Share of trials held out for evaluation
const HOLDOUT_FRACTION: f64 = 0.25;

const ALL_STRATEGIES: [EnsembleStrategy; 5] = [
    EnsembleStrategy::MajorityVoting,
    EnsembleStrategy::WeightedVoting,
    EnsembleStrategy::ConfidenceWeighted,
    EnsembleStrategy::AdaptiveWeighting,
    EnsembleStrategy::StackedGeneralization,
];

#[derive(Serialize)]
struct StrategySummary {
    strategy: EnsembleStrategy,
    trained_adapters: Vec<String>,
    failed_adapters: Vec<String>,
    meta_classifier_trained: bool,
    training_ms: f64,
    /// ECE after Platt scaling fitted on the holdout confidences
    calibrated_ece: Option<f64>,
    metrics: PerformanceMetrics,
}

#[derive(Serialize)]
struct RunSummary {
    trials: usize,
    holdout: usize,
    channels: usize,
    sample_rate: f64,
    feature_len: usize,
    seed: u64,
    strategies: Vec<StrategySummary>,
}

fn arg_value<T: FromStr>(args: &[String], flag: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            let raw = args.get(i + 1).with_context(|| format!("{} needs a value", flag))?;
            raw.parse().map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", raw, flag, e))
        }
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_runner=info,ensemble_orchestrator=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage:");
        eprintln!("  pipeline-runner [--trials N] [--channels N] [--sample-rate HZ] [--seconds S] [--seed N]");
        eprintln!("                  [--strategy NAME]");
        eprintln!();
        eprintln!("Without --strategy every ensemble strategy is run in turn.");
        return Ok(());
    }

    let n_trials: usize = arg_value(&args, "--trials", DEFAULT_TRIALS)?;
    let channels: usize = arg_value(&args, "--channels", DEFAULT_CHANNELS)?;
    let sample_rate: f64 = arg_value(&args, "--sample-rate", DEFAULT_SAMPLE_RATE)?;
    let seconds: f64 = arg_value(&args, "--seconds", DEFAULT_SECONDS)?;
    let seed: u64 = arg_value(&args, "--seed", DEFAULT_SEED)?;
    if n_trials < 8 || channels == 0 {
        bail!("need at least 8 trials and one channel");
    }

    let base = EnsembleConfig::from_env().context("reading ENSEMBLE_* settings")?;
    let strategies: Vec<EnsembleStrategy> = match args.iter().position(|a| a == "--strategy") {
        Some(i) => {
            let raw = args.get(i + 1).context("--strategy needs a value")?;
            vec![EnsembleStrategy::from_str(raw)?]
        }
        None => ALL_STRATEGIES.to_vec(),
    };

    let shape = TrialShape { channels, sample_rate, seconds };
    let trials = TrialGenerator::new(shape, seed).generate(n_trials)?;
    let holdout_len = ((n_trials as f64) * HOLDOUT_FRACTION).round() as usize;
    let (train, holdout) = trials.split_at(n_trials - holdout_len);

    let extractor = FeatureExtractor::default();
    tracing::info!(
        "pipeline-runner: {} trials ({} holdout), {} channels @ {} Hz, {} features, {} strategies",
        n_trials,
        holdout.len(),
        channels,
        sample_rate,
        extractor.feature_len(channels),
        strategies.len()
    );

    let mut evaluator = PerformanceEvaluator::new(strategies.len());
    let mut summaries = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let summary = run_strategy(base.clone().with_strategy(strategy), &extractor, train, holdout, &mut evaluator)
            .await
            .with_context(|| format!("running {}", strategy.as_str()))?;
        tracing::info!(
            "{}: accuracy {:.3}, F1 {:.3}, AUC {:.3}",
            strategy.as_str(),
            summary.metrics.accuracy,
            summary.metrics.f1_score,
            summary.metrics.auc_roc
        );
        summaries.push(summary);
    }

    let report = RunSummary {
        trials: n_trials,
        holdout: holdout.len(),
        channels,
        sample_rate,
        feature_len: extractor.feature_len(channels),
        seed,
        strategies: summaries,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_strategy(
    config: EnsembleConfig,
    extractor: &FeatureExtractor,
    train: &[Trial],
    holdout: &[Trial],
    evaluator: &mut PerformanceEvaluator,
) -> Result<StrategySummary> {
    let strategy = config.strategy;
    let coordinator = EnsembleCoordinator::new(config)?;
    let mut pipeline = TrialPipeline::new(SignalConditioner::default(), extractor.clone(), coordinator);

    let report = pipeline.fit(train).await?;
    let metrics = evaluator.evaluate_trials(&pipeline, holdout).await?;

    let results = pipeline.classify(holdout).await?;
    let pairs: Vec<(f64, bool)> = results
        .iter()
        .zip(holdout)
        .map(|(r, t)| (r.confidence, Some(r.label) == t.label()))
        .collect();
    let calibrated_ece = if pairs.len() >= MIN_CALIBRATION_SAMPLES {
        let mut calibrator = ConfidenceCalibrator::new();
        calibrator.fit(&pairs, CalibrationMethod::PlattScaling)?;
        calibrator.stats().map(|s| s.ece)
    } else {
        None
    };

    Ok(StrategySummary {
        strategy,
        trained_adapters: report.trained,
        failed_adapters: report.failures.into_iter().map(|f| f.adapter).collect(),
        meta_classifier_trained: report.meta_classifier_trained,
        training_ms: report.duration_ms,
        calibrated_ece,
        metrics,
    })
}
