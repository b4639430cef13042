//! Holdout evaluation of a trained ensemble
//!
//! Reads the coordinator through `predict` only: adapter state, weights and
//! the adaptive-performance tracker are never written here.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use chrono::Utc;
use confidence_calibrator::{calibration_stats, DEFAULT_BINS};
use ensemble_core::{
    ClassificationResult, EnsembleError, EnsembleResult, FeatureVector, Label, LabelSet, PerformanceMetrics, Trial,
};
use ensemble_orchestrator::{EnsembleCoordinator, TrialPipeline};
use tracing::{debug, info};

use crate::metrics::{accuracy, binary_auc, confusion_matrix, weighted_scores};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// AUC reported when the curve is undefined (multi-class label set, or a
/// holdout containing a single class). `auc_defaulted` is set alongside it.
pub const DEFAULT_AUC: f64 = 0.5;

#[derive(Debug)]
pub struct PerformanceEvaluator {
    history: VecDeque<PerformanceMetrics>,
    capacity: usize,
}

impl PerformanceEvaluator {
    /// Keep the `history_capacity` most recent evaluations (at least one).
    pub fn new(history_capacity: usize) -> Self {
        let capacity = history_capacity.max(1);
        Self { history: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PerformanceMetrics> {
        self.history.iter()
    }

    pub fn latest(&self) -> Option<&PerformanceMetrics> {
        self.history.back()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Evaluate `coordinator` on a labelled holdout set and append the
    /// result to the history.
    ///
    /// Latency is the wall time of the batch `predict` divided by the sample
    /// count. Holdout labels outside the trained label set are rejected.
    pub async fn evaluate(
        &mut self,
        coordinator: &EnsembleCoordinator,
        features: &[FeatureVector],
        labels: &[Label],
    ) -> EnsembleResult<PerformanceMetrics> {
        if features.is_empty() {
            return Err(EnsembleError::InvalidInput("holdout set is empty".into()));
        }
        if features.len() != labels.len() {
            return Err(EnsembleError::InvalidInput(format!(
                "{} holdout vectors but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let label_set = coordinator
            .label_set()
            .ok_or_else(|| EnsembleError::NotTrained("ensemble".into()))?;
        let actual = label_set.encode(labels)?;

        let started = Instant::now();
        let results = coordinator.predict(features).await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let metrics = summarize(coordinator, label_set, &actual, labels, &results, elapsed_ms)?;
        info!(
            "Evaluated {} samples: accuracy {:.3}, F1 {:.3}, AUC {:.3}{}",
            metrics.sample_count,
            metrics.accuracy,
            metrics.f1_score,
            metrics.auc_roc,
            if metrics.auc_defaulted { " (default)" } else { "" }
        );
        self.push(metrics.clone());
        Ok(metrics)
    }

    /// Condition, extract and evaluate labelled raw trials through `pipeline`.
    /// Latency covers the ensemble only, not conditioning and extraction.
    pub async fn evaluate_trials(
        &mut self,
        pipeline: &TrialPipeline,
        trials: &[Trial],
    ) -> EnsembleResult<PerformanceMetrics> {
        let labels = trials
            .iter()
            .enumerate()
            .map(|(i, t)| {
                t.label()
                    .ok_or_else(|| EnsembleError::InvalidInput(format!("holdout trial {} has no label", i)))
            })
            .collect::<EnsembleResult<Vec<_>>>()?;
        let features = pipeline.features(trials).await?;
        self.evaluate(pipeline.coordinator(), &features, &labels).await
    }

    fn push(&mut self, metrics: PerformanceMetrics) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(metrics);
    }
}

impl Default for PerformanceEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

fn summarize(
    coordinator: &EnsembleCoordinator,
    label_set: &LabelSet,
    actual: &[usize],
    labels: &[Label],
    results: &[ClassificationResult],
    elapsed_ms: f64,
) -> EnsembleResult<PerformanceMetrics> {
    let n_classes = label_set.len();
    let predicted = results
        .iter()
        .map(|r| {
            label_set
                .index_of(r.label)
                .ok_or_else(|| EnsembleError::Task(format!("predicted label {} outside the label set", r.label)))
        })
        .collect::<EnsembleResult<Vec<_>>>()?;

    let matrix = confusion_matrix(actual, &predicted, n_classes);
    let scores = weighted_scores(&matrix);

    let auc = match (n_classes, label_set.label_at(1)) {
        (2, Some(positive)) => {
            // Probability of the positive class implied by the winning confidence
            let positive_scores: Vec<f64> = results
                .iter()
                .map(|r| if r.label == positive { r.confidence } else { 1.0 - r.confidence })
                .collect();
            let is_positive: Vec<bool> = labels.iter().map(|&l| l == positive).collect();
            binary_auc(&positive_scores, &is_positive)
        }
        _ => None,
    };
    if auc.is_none() {
        debug!("AUC undefined for this holdout, reporting {}", DEFAULT_AUC);
    }

    let mut votes: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for (result, &truth) in results.iter().zip(labels) {
        for (name, vote) in &result.adapter_votes {
            let entry = votes.entry(name.clone()).or_default();
            entry.0 += usize::from(vote.label == truth);
            entry.1 += 1;
        }
    }
    let adapter_accuracies = votes
        .into_iter()
        .map(|(name, (hits, total))| (name, hits as f64 / total as f64))
        .collect();

    let pairs: Vec<(f64, bool)> = results
        .iter()
        .zip(labels)
        .map(|(r, &truth)| (r.confidence, r.label == truth))
        .collect();
    let calibration = calibration_stats(&pairs, DEFAULT_BINS);

    Ok(PerformanceMetrics {
        accuracy: accuracy(&matrix),
        precision: scores.precision,
        recall: scores.recall,
        f1_score: scores.f1,
        auc_roc: auc.unwrap_or(DEFAULT_AUC),
        auc_defaulted: auc.is_none(),
        confusion_matrix: matrix,
        class_labels: label_set.labels().to_vec(),
        mean_inference_latency_ms: elapsed_ms / results.len().max(1) as f64,
        adapter_model_sizes: coordinator.adapter_model_sizes(),
        adapter_accuracies,
        expected_calibration_error: calibration.ece,
        brier_score: calibration.brier_score,
        sample_count: results.len(),
        evaluated_at: Utc::now(),
    })
}
