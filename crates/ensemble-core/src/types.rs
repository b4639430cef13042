use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::{EnsembleError, EnsembleResult};

/// Class label as supplied by the acquisition side.
pub type Label = i64;

/// One labeled window of multichannel time-series data (channel-major).
///
/// Immutable once built: all accessors hand out shared views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    channels: Vec<Vec<f64>>,
    sample_rate: f64,
    label: Option<Label>,
}

impl Trial {
    /// Build an unlabeled trial, validating shape and values.
    pub fn new(channels: Vec<Vec<f64>>, sample_rate: f64) -> EnsembleResult<Self> {
        if channels.is_empty() {
            return Err(EnsembleError::InvalidInput("trial has no channels".into()));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(EnsembleError::InvalidInput(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        let n_samples = channels[0].len();
        if n_samples == 0 {
            return Err(EnsembleError::InvalidInput("trial has no samples".into()));
        }
        for (idx, ch) in channels.iter().enumerate() {
            if ch.len() != n_samples {
                return Err(EnsembleError::InvalidInput(format!(
                    "channel {} has {} samples, expected {}",
                    idx,
                    ch.len(),
                    n_samples
                )));
            }
            if ch.iter().any(|v| !v.is_finite()) {
                return Err(EnsembleError::InvalidInput(format!(
                    "channel {} contains non-finite samples",
                    idx
                )));
            }
        }
        Ok(Self { channels, sample_rate, label: None })
    }

    /// Attach the ground-truth label.
    #[must_use]
    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.channels[0].len()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn label(&self) -> Option<Label> {
        self.label
    }
}

/// Fixed-length numeric summary of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Stack feature vectors into a samples × features matrix.
///
/// All vectors must share one length; a ragged batch is a configuration error.
pub fn feature_matrix(vectors: &[FeatureVector]) -> EnsembleResult<nalgebra::DMatrix<f64>> {
    let Some(first) = vectors.first() else {
        return Err(EnsembleError::InvalidInput("no feature vectors supplied".into()));
    };
    let width = first.len();
    let mut data = Vec::with_capacity(vectors.len() * width);
    for v in vectors {
        if v.len() != width {
            return Err(EnsembleError::FeatureLengthMismatch { expected: width, actual: v.len() });
        }
        data.extend_from_slice(v.as_slice());
    }
    Ok(nalgebra::DMatrix::from_row_slice(vectors.len(), width, &data))
}

/// Closed, sorted set of class labels fixed at training time.
///
/// Adapters work with dense class indices `0..len()`; this type converts both ways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    pub fn from_labels(labels: &[Label]) -> EnsembleResult<Self> {
        let mut unique = labels.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() < 2 {
            return Err(EnsembleError::InvalidInput(format!(
                "need at least 2 distinct classes to train, got {}",
                unique.len()
            )));
        }
        Ok(Self { labels: unique })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn index_of(&self, label: Label) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// Label for a class index. Indices come from adapters trained on this set,
    /// so an out-of-range index is a programming error and maps to `None`.
    pub fn label_at(&self, index: usize) -> Option<Label> {
        self.labels.get(index).copied()
    }

    pub fn encode(&self, labels: &[Label]) -> EnsembleResult<Vec<usize>> {
        labels
            .iter()
            .map(|&l| {
                self.index_of(l).ok_or_else(|| {
                    EnsembleError::InvalidInput(format!("label {} is not in the trained label set", l))
                })
            })
            .collect()
    }
}

/// Algorithm family of a classifier adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierFamily {
    RandomForest,
    GradientBoosting,
    LogisticRegression,
    SupportVectorMachine,
    KNearestNeighbors,
    NaiveBayes,
    DecisionTree,
}

impl ClassifierFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierFamily::RandomForest => "random_forest",
            ClassifierFamily::GradientBoosting => "gradient_boosting",
            ClassifierFamily::LogisticRegression => "logistic_regression",
            ClassifierFamily::SupportVectorMachine => "support_vector_machine",
            ClassifierFamily::KNearestNeighbors => "k_nearest_neighbors",
            ClassifierFamily::NaiveBayes => "naive_bayes",
            ClassifierFamily::DecisionTree => "decision_tree",
        }
    }
}

impl FromStr for ClassifierFamily {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random_forest" | "rf" => Ok(ClassifierFamily::RandomForest),
            "gradient_boosting" | "gb" => Ok(ClassifierFamily::GradientBoosting),
            "logistic_regression" | "lr" => Ok(ClassifierFamily::LogisticRegression),
            "support_vector_machine" | "svm" => Ok(ClassifierFamily::SupportVectorMachine),
            "k_nearest_neighbors" | "knn" => Ok(ClassifierFamily::KNearestNeighbors),
            "naive_bayes" | "nb" => Ok(ClassifierFamily::NaiveBayes),
            "decision_tree" | "dt" => Ok(ClassifierFamily::DecisionTree),
            other => Err(EnsembleError::config(format!("unknown classifier family '{}'", other))),
        }
    }
}

/// Construction-time description of one ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    name: String,
    family: ClassifierFamily,
    #[serde(default)]
    hyperparameters: BTreeMap<String, f64>,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

impl ClassifierConfig {
    pub fn new(name: impl Into<String>, family: ClassifierFamily) -> Self {
        Self {
            name: name.into(),
            family,
            hyperparameters: BTreeMap::new(),
            weight: 1.0,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.hyperparameters.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> ClassifierFamily {
        self.family
    }

    pub fn hyperparameters(&self) -> &BTreeMap<String, f64> {
        &self.hyperparameters
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Where an adapter's probability column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbabilityKind {
    /// The model estimates class probabilities directly.
    Native,
    /// Monotonic squashing of a decision score. Not calibrated; run it through
    /// a calibrator before thresholding on it.
    ApproximateFromScore,
}

/// Batch output of one adapter: class indices plus a samples × classes matrix.
#[derive(Debug, Clone)]
pub struct AdapterPrediction {
    pub labels: Vec<usize>,
    pub probabilities: nalgebra::DMatrix<f64>,
    pub probability_kind: ProbabilityKind,
}

impl AdapterPrediction {
    /// Build from a probability matrix; labels are the row-wise argmax.
    pub fn from_probabilities(probabilities: nalgebra::DMatrix<f64>, kind: ProbabilityKind) -> Self {
        let labels = (0..probabilities.nrows())
            .map(|r| {
                let row: Vec<f64> = probabilities.row(r).iter().copied().collect();
                crate::stats::argmax(&row)
            })
            .collect();
        Self { labels, probabilities, probability_kind: kind }
    }

    /// Confidence of the predicted class for a sample.
    pub fn confidence(&self, sample: usize) -> f64 {
        self.probabilities[(sample, self.labels[sample])]
    }
}

/// Rule used to fold several adapters' outputs into one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleStrategy {
    MajorityVoting,
    WeightedVoting,
    ConfidenceWeighted,
    AdaptiveWeighting,
    StackedGeneralization,
}

impl EnsembleStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleStrategy::MajorityVoting => "majority_voting",
            EnsembleStrategy::WeightedVoting => "weighted_voting",
            EnsembleStrategy::ConfidenceWeighted => "confidence_weighted",
            EnsembleStrategy::AdaptiveWeighting => "adaptive_weighting",
            EnsembleStrategy::StackedGeneralization => "stacked_generalization",
        }
    }

    /// Strategies whose outcome depends on the configured adapter weights.
    pub fn uses_weights(&self) -> bool {
        matches!(self, EnsembleStrategy::WeightedVoting)
    }
}

impl FromStr for EnsembleStrategy {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "majority_voting" | "majority" => Ok(EnsembleStrategy::MajorityVoting),
            "weighted_voting" | "weighted" => Ok(EnsembleStrategy::WeightedVoting),
            "confidence_weighted" | "confidence" => Ok(EnsembleStrategy::ConfidenceWeighted),
            "adaptive_weighting" | "adaptive" => Ok(EnsembleStrategy::AdaptiveWeighting),
            "stacked_generalization" | "stacking" => Ok(EnsembleStrategy::StackedGeneralization),
            other => Err(EnsembleError::config(format!("unknown ensemble strategy '{}'", other))),
        }
    }
}

/// One adapter's contribution to a single classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterVote {
    pub label: Label,
    pub confidence: f64,
}

/// Per-classification health of the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleDiagnostics {
    /// Fraction of participating adapters that agree with the majority label.
    pub agreement_score: f64,
    /// `1 - agreement_score`
    pub diversity_score: f64,
    pub average_confidence: f64,
    pub confidence_variance: f64,
    pub participating_adapters: usize,
    /// Adapters excluded from this call because their predict failed.
    pub excluded_adapters: Vec<String>,
    /// Set when the configured strategy could not run and another was used.
    pub fallback: Option<EnsembleStrategy>,
}

/// Final decision for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    pub confidence: f64,
    pub adapter_votes: BTreeMap<String, AdapterVote>,
    pub diagnostics: EnsembleDiagnostics,
    pub strategy: EnsembleStrategy,
    /// Wall-clock time of the batch call this sample belonged to, in milliseconds.
    pub processing_time_ms: f64,
}

/// Holdout evaluation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: f64,
    /// Support-weighted averages across classes.
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// ROC AUC for two-class problems. Multi-class or single-class holdouts
    /// report 0.5 and set `auc_defaulted`.
    pub auc_roc: f64,
    pub auc_defaulted: bool,
    /// Rows are true classes, columns predicted classes, both ordered as `class_labels`.
    pub confusion_matrix: Vec<Vec<usize>>,
    pub class_labels: Vec<Label>,
    pub mean_inference_latency_ms: f64,
    /// Approximate model sizes in bytes.
    pub adapter_model_sizes: BTreeMap<String, usize>,
    pub adapter_accuracies: BTreeMap<String, f64>,
    /// Calibration quality of the uncalibrated ensemble confidence.
    pub expected_calibration_error: f64,
    pub brier_score: f64,
    pub sample_count: usize,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_rejects_ragged_channels() {
        let result = Trial::new(vec![vec![0.0; 10], vec![0.0; 9]], 250.0);
        assert!(matches!(result, Err(EnsembleError::InvalidInput(_))));
    }

    #[test]
    fn test_trial_rejects_non_finite_samples() {
        let result = Trial::new(vec![vec![0.0, f64::NAN, 1.0]], 250.0);
        assert!(matches!(result, Err(EnsembleError::InvalidInput(_))));
    }

    #[test]
    fn test_label_set_round_trip() {
        let set = LabelSet::from_labels(&[7, 3, 7, 3, 11]).unwrap();
        assert_eq!(set.labels(), &[3, 7, 11]);
        assert_eq!(set.encode(&[11, 3]).unwrap(), vec![2, 0]);
        assert_eq!(set.label_at(1), Some(7));
        assert!(set.encode(&[5]).is_err());
    }

    #[test]
    fn test_label_set_needs_two_classes() {
        assert!(LabelSet::from_labels(&[1, 1, 1]).is_err());
    }

    #[test]
    fn test_feature_matrix_rejects_ragged_batch() {
        let vectors = vec![FeatureVector::new(vec![1.0, 2.0]), FeatureVector::new(vec![1.0])];
        let err = feature_matrix(&vectors).unwrap_err();
        assert!(matches!(err, EnsembleError::FeatureLengthMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("weighted".parse::<EnsembleStrategy>().unwrap(), EnsembleStrategy::WeightedVoting);
        assert_eq!(
            "Stacked-Generalization".parse::<EnsembleStrategy>().unwrap(),
            EnsembleStrategy::StackedGeneralization
        );
        let err = "plurality".parse::<EnsembleStrategy>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BadConfiguration);
    }

    #[test]
    fn test_classifier_config_deserializes_with_defaults() {
        let cfg: ClassifierConfig =
            serde_json::from_str(r#"{"name":"rf","family":"random_forest"}"#).unwrap();
        assert_eq!(cfg.family(), ClassifierFamily::RandomForest);
        assert!((cfg.weight() - 1.0).abs() < 1e-12);
        assert!(cfg.is_enabled());
        assert!(cfg.hyperparameters().is_empty());
    }

    #[test]
    fn test_adapter_prediction_argmax() {
        let probs = nalgebra::DMatrix::from_row_slice(2, 3, &[0.2, 0.5, 0.3, 0.6, 0.2, 0.2]);
        let pred = AdapterPrediction::from_probabilities(probs, ProbabilityKind::Native);
        assert_eq!(pred.labels, vec![1, 0]);
        assert!((pred.confidence(0) - 0.5).abs() < 1e-12);
    }
}
