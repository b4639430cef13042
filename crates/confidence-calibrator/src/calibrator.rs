//! Confidence Calibration
//!
//! Fitted on `(confidence, was_correct)` pairs collected from a holdout run.

use ensemble_core::stats::sigmoid;
use ensemble_core::{EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};

/// Fewest pairs accepted by `fit`.
pub const MIN_CALIBRATION_SAMPLES: usize = 10;

/// Reliability-diagram bins used for ECE/MCE.
pub const DEFAULT_BINS: usize = 10;

/// Method used for calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Sigmoid fitted to the confidence
    PlattScaling,
    /// Non-parametric monotonic fit (pool adjacent violators)
    IsotonicRegression,
    /// Single divisor applied to the logit
    TemperatureScaling,
    /// Identity
    None,
}

/// A confidence before and after calibration, with a 95% Wilson interval
/// whose width reflects how many pairs the calibrator was fitted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedConfidence {
    pub raw: f64,
    pub calibrated: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub method: CalibrationMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationStats {
    /// Expected Calibration Error (lower is better)
    pub ece: f64,
    /// Maximum Calibration Error
    pub mce: f64,
    /// Mean squared error of the confidences against 0/1 correctness
    pub brier_score: f64,
    pub sample_size: usize,
    pub reliability_bins: Vec<ReliabilityBin>,
}

/// A bin in the reliability diagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub avg_predicted: f64,
    pub observed_accuracy: f64,
    pub count: usize,
}

/// ECE, MCE and Brier score of `(confidence, correct)` pairs over
/// `n_bins` equal-width bins. Empty input yields all zeros.
pub fn calibration_stats(pairs: &[(f64, bool)], n_bins: usize) -> CalibrationStats {
    let n_bins = n_bins.max(1);
    let mut bins: Vec<(f64, usize, usize)> = vec![(0.0, 0, 0); n_bins];
    for &(conf, correct) in pairs {
        let idx = ((conf.clamp(0.0, 1.0) * n_bins as f64) as usize).min(n_bins - 1);
        let bin = &mut bins[idx];
        bin.0 += conf;
        bin.1 += 1;
        bin.2 += usize::from(correct);
    }

    let n = pairs.len().max(1) as f64;
    let mut ece = 0.0;
    let mut mce: f64 = 0.0;
    let reliability_bins: Vec<ReliabilityBin> = bins
        .iter()
        .filter(|(_, count, _)| *count > 0)
        .map(|&(sum, count, hits)| {
            let avg_predicted = sum / count as f64;
            let observed_accuracy = hits as f64 / count as f64;
            let gap = (avg_predicted - observed_accuracy).abs();
            ece += gap * count as f64 / n;
            mce = mce.max(gap);
            ReliabilityBin { avg_predicted, observed_accuracy, count }
        })
        .collect();

    let brier_score = pairs
        .iter()
        .map(|&(conf, correct)| (conf - f64::from(u8::from(correct))).powi(2))
        .sum::<f64>()
        / n;

    CalibrationStats { ece, mce, brier_score, sample_size: pairs.len(), reliability_bins }
}

#[derive(Debug, Clone)]
enum Fitted {
    Identity,
    Platt { a: f64, b: f64 },
    /// Breakpoints `(confidence, calibrated)` sorted by confidence
    Isotonic(Vec<(f64, f64)>),
    Temperature(f64),
}

/// Maps raw confidences onto observed accuracy.
#[derive(Debug, Clone)]
pub struct ConfidenceCalibrator {
    method: CalibrationMethod,
    fitted: Option<Fitted>,
    stats: Option<CalibrationStats>,
}

impl Default for ConfidenceCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfidenceCalibrator {
    /// Unfitted calibrator; `calibrate` is the identity until `fit` succeeds.
    pub fn new() -> Self {
        Self { method: CalibrationMethod::None, fitted: None, stats: None }
    }

    pub fn fit(&mut self, pairs: &[(f64, bool)], method: CalibrationMethod) -> EnsembleResult<()> {
        if pairs.len() < MIN_CALIBRATION_SAMPLES {
            return Err(EnsembleError::InsufficientSamples {
                required: MIN_CALIBRATION_SAMPLES,
                actual: pairs.len(),
            });
        }
        if pairs.iter().any(|(c, _)| !(0.0..=1.0).contains(c)) {
            return Err(EnsembleError::InvalidInput("confidences must lie in [0, 1]".into()));
        }

        let fitted = match method {
            CalibrationMethod::PlattScaling => fit_platt(pairs),
            CalibrationMethod::IsotonicRegression => Fitted::Isotonic(fit_isotonic(pairs)),
            CalibrationMethod::TemperatureScaling => Fitted::Temperature(fit_temperature(pairs)),
            CalibrationMethod::None => Fitted::Identity,
        };
        self.method = method;
        self.fitted = Some(fitted);

        let calibrated: Vec<(f64, bool)> = pairs.iter().map(|&(c, ok)| (self.apply(c), ok)).collect();
        let stats = calibration_stats(&calibrated, DEFAULT_BINS);
        tracing::debug!(
            "Calibrator fitted ({:?}) on {} pairs, ECE {:.4}",
            method,
            pairs.len(),
            stats.ece
        );
        self.stats = Some(stats);
        Ok(())
    }

    fn apply(&self, raw: f64) -> f64 {
        match &self.fitted {
            None | Some(Fitted::Identity) => raw,
            Some(Fitted::Platt { a, b }) => sigmoid(a * raw + b),
            Some(Fitted::Isotonic(table)) => isotonic_lookup(table, raw),
            Some(Fitted::Temperature(t)) => sigmoid(logit(raw) / t),
        }
    }

    pub fn calibrate(&self, raw: f64) -> CalibratedConfidence {
        let calibrated = self.apply(raw).clamp(0.0, 1.0);

        // Wilson score interval; unfitted calibrators assume a nominal 100 pairs
        let z = 1.96;
        let n = self.stats.as_ref().map_or(100, |s| s.sample_size.max(1)) as f64;
        let denominator = 1.0 + z * z / n;
        let center = (calibrated + z * z / (2.0 * n)) / denominator;
        let margin = (z / denominator) * (calibrated * (1.0 - calibrated) / n + z * z / (4.0 * n * n)).sqrt();

        CalibratedConfidence {
            raw,
            calibrated,
            lower_bound: (center - margin).max(0.0),
            upper_bound: (center + margin).min(1.0),
            method: self.method,
        }
    }

    /// Statistics of the calibrated confidences on the fitting pairs.
    pub fn stats(&self) -> Option<&CalibrationStats> {
        self.stats.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn method(&self) -> CalibrationMethod {
        self.method
    }
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-10, 1.0 - 1e-10);
    (p / (1.0 - p)).ln()
}

fn log_loss(pairs: &[(f64, bool)], f: impl Fn(f64) -> f64) -> f64 {
    pairs
        .iter()
        .map(|&(c, ok)| {
            let p = f(c).clamp(1e-10, 1.0 - 1e-10);
            if ok { -p.ln() } else { -(1.0 - p).ln() }
        })
        .sum()
}

/// Newton iterations on the logistic log-loss in `(a, b)`.
fn fit_platt(pairs: &[(f64, bool)]) -> Fitted {
    let (mut a, mut b) = (1.0, 0.0);
    for _ in 0..100 {
        let (mut ga, mut gb, mut haa, mut hab, mut hbb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(x, ok) in pairs {
            let p = sigmoid(a * x + b);
            let err = p - f64::from(u8::from(ok));
            let w = (p * (1.0 - p)).max(1e-12);
            ga += err * x;
            gb += err;
            haa += w * x * x;
            hab += w * x;
            hbb += w;
        }
        // Small ridge keeps separable data from diverging
        haa += 1e-6;
        hbb += 1e-6;
        let det = haa * hbb - hab * hab;
        if det.abs() < 1e-18 {
            break;
        }
        let da = (hbb * ga - hab * gb) / det;
        let db = (haa * gb - hab * ga) / det;
        a -= da;
        b -= db;
        if da.abs().max(db.abs()) < 1e-9 {
            break;
        }
    }
    Fitted::Platt { a, b }
}

/// Pool adjacent violators over confidence-sorted outcomes.
fn fit_isotonic(pairs: &[(f64, bool)]) -> Vec<(f64, f64)> {
    let mut sorted = pairs.to_vec();
    sorted.sort_by(|x, y| x.0.total_cmp(&y.0));

    // Each block: (sum of outcomes, weight, first x, last x)
    let mut blocks: Vec<(f64, f64, f64, f64)> = Vec::new();
    for &(x, ok) in &sorted {
        blocks.push((f64::from(u8::from(ok)), 1.0, x, x));
        while blocks.len() > 1 {
            let last = blocks[blocks.len() - 1];
            let prev = blocks[blocks.len() - 2];
            if prev.0 / prev.1 <= last.0 / last.1 && prev.3 < last.2 {
                break;
            }
            blocks.pop();
            let merged = blocks.len() - 1;
            blocks[merged] = (prev.0 + last.0, prev.1 + last.1, prev.2, last.3);
        }
    }

    let mut table = Vec::with_capacity(blocks.len() * 2);
    for (sum, weight, lo, hi) in blocks {
        let value = sum / weight;
        table.push((lo, value));
        if hi > lo {
            table.push((hi, value));
        }
    }
    table
}

fn isotonic_lookup(table: &[(f64, f64)], value: f64) -> f64 {
    let (Some(first), Some(last)) = (table.first(), table.last()) else {
        return value;
    };
    if value <= first.0 {
        return first.1;
    }
    if value >= last.0 {
        return last.1;
    }
    let idx = table.partition_point(|(x, _)| *x <= value);
    let (x0, y0) = table[idx - 1];
    let (x1, y1) = table[idx];
    if x1 > x0 {
        y0 + (value - x0) / (x1 - x0) * (y1 - y0)
    } else {
        y0
    }
}

/// Grid search over temperatures 0.1..=10.
fn fit_temperature(pairs: &[(f64, bool)]) -> f64 {
    (1..=100)
        .map(|i| i as f64 * 0.1)
        .map(|t| (t, log_loss(pairs, |c| sigmoid(logit(c) / t))))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(1.0, |(t, _)| t)
}
