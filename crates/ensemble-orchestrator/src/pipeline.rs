//! Raw trials in, classifications out: conditioner → extractor → coordinator.

use ensemble_core::{ClassificationResult, EnsembleError, EnsembleResult, FeatureVector, Label, Trial};
use rayon::prelude::*;
use signal_processing::{FeatureExtractor, SignalConditioner};
use tracing::info;

use crate::coordinator::{EnsembleCoordinator, TrainingReport};

pub struct TrialPipeline {
    conditioner: SignalConditioner,
    extractor: FeatureExtractor,
    coordinator: EnsembleCoordinator,
    /// Channel count seen at fit time
    channels: Option<usize>,
}

impl TrialPipeline {
    pub fn new(conditioner: SignalConditioner, extractor: FeatureExtractor, coordinator: EnsembleCoordinator) -> Self {
        Self { conditioner, extractor, coordinator, channels: None }
    }

    pub fn coordinator(&self) -> &EnsembleCoordinator {
        &self.coordinator
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn conditioner(&self) -> &SignalConditioner {
        &self.conditioner
    }

    /// Condition and extract a batch on the blocking pool.
    pub async fn features(&self, trials: &[Trial]) -> EnsembleResult<Vec<FeatureVector>> {
        let conditioner = self.conditioner.clone();
        let extractor = self.extractor.clone();
        let trials = trials.to_vec();
        tokio::task::spawn_blocking(move || {
            let conditioned = trials
                .par_iter()
                .map(|t| conditioner.condition_trial(t))
                .collect::<EnsembleResult<Vec<_>>>()?;
            extractor.extract_batch(&conditioned)
        })
        .await
        .map_err(|e| EnsembleError::Task(format!("feature extraction task failed: {}", e)))?
    }

    /// Fit on labelled trials; every trial must carry a label and share one
    /// channel count.
    pub async fn fit(&mut self, trials: &[Trial]) -> EnsembleResult<TrainingReport> {
        let channels = uniform_channel_count(trials)?;
        let labels = trials
            .iter()
            .enumerate()
            .map(|(i, t)| {
                t.label()
                    .ok_or_else(|| EnsembleError::InvalidInput(format!("trial {} has no label", i)))
            })
            .collect::<EnsembleResult<Vec<Label>>>()?;

        let features = self.features(trials).await?;
        info!(
            "Extracted {} features from {} trials of {} channels",
            self.extractor.feature_len(channels),
            trials.len(),
            channels
        );
        let report = self.coordinator.train(&features, &labels).await?;
        self.channels = Some(channels);
        Ok(report)
    }

    pub async fn classify(&self, trials: &[Trial]) -> EnsembleResult<Vec<ClassificationResult>> {
        let Some(expected) = self.channels else {
            return Err(EnsembleError::NotTrained("trial pipeline".into()));
        };
        if trials.is_empty() {
            return Ok(Vec::new());
        }
        let actual = uniform_channel_count(trials)?;
        if actual != expected {
            return Err(EnsembleError::FeatureLengthMismatch {
                expected: self.extractor.feature_len(expected),
                actual: self.extractor.feature_len(actual),
            });
        }
        let features = self.features(trials).await?;
        self.coordinator.predict(&features).await
    }
}

fn uniform_channel_count(trials: &[Trial]) -> EnsembleResult<usize> {
    let first = trials
        .first()
        .ok_or_else(|| EnsembleError::InvalidInput("no trials supplied".into()))?;
    let channels = first.channel_count();
    if let Some(bad) = trials.iter().find(|t| t.channel_count() != channels) {
        return Err(EnsembleError::InvalidInput(format!(
            "mixed channel counts in one batch: {} and {}",
            channels,
            bad.channel_count()
        )));
    }
    Ok(channels)
}
