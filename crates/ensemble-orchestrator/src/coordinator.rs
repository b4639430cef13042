//! Ensemble coordinator
//!
//! Fans adapter `train`/`predict` calls out over a bounded pool of blocking
//! workers, joins every task before combining, and folds the surviving votes
//! with the configured strategy. Stacked generalization trains its
//! meta-classifier only after all base adapters have finished.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use classifier_pool::build_adapter;
use ensemble_core::{
    feature_matrix, AdapterFailure, AdapterPrediction, AdapterVote, ClassificationResult, ClassifierAdapter,
    EnsembleDiagnostics, EnsembleError, EnsembleResult, EnsembleStrategy, FeatureVector, Label, LabelSet,
};
use nalgebra::DMatrix;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{validate_members, EnsembleConfig};
use crate::performance::PerformanceTracker;
use crate::selection::FeatureSelector;
use crate::voting::{self, Ballot, Decision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    Untrained,
    Training,
    Trained,
}

struct Member {
    adapter: Arc<dyn ClassifierAdapter>,
    weight: f64,
    /// Trained successfully by the latest `train` call
    active: bool,
}

struct StackingModel {
    adapter: Arc<dyn ClassifierAdapter>,
    /// Members feeding the meta-features, in column order
    inputs: Vec<usize>,
}

/// Outcome of one `train` call.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub trained: Vec<String>,
    /// Adapters that failed and are excluded until the next successful train
    pub failures: Vec<AdapterFailure>,
    pub selected_features: Option<Vec<usize>>,
    pub meta_classifier_trained: bool,
    pub duration_ms: f64,
}

pub struct EnsembleCoordinator {
    strategy: EnsembleStrategy,
    feature_top_k: Option<usize>,
    members: Vec<Member>,
    meta_adapter: Option<Arc<dyn ClassifierAdapter>>,
    stacking: Option<StackingModel>,
    state: CoordinatorState,
    label_set: Option<LabelSet>,
    selector: Option<FeatureSelector>,
    input_len: Option<usize>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    tracker: PerformanceTracker,
}

/// Meta-feature row per sample: `[class index, max probability]` for each input.
fn meta_features(predictions: &[&AdapterPrediction]) -> DMatrix<f64> {
    let n = predictions.first().map_or(0, |p| p.labels.len());
    DMatrix::from_fn(n, predictions.len() * 2, |r, c| {
        let p = predictions[c / 2];
        if c % 2 == 0 {
            p.labels[r] as f64
        } else {
            p.confidence(r)
        }
    })
}

impl EnsembleCoordinator {
    /// Validate `config` and build one adapter per enabled classifier.
    pub fn new(config: EnsembleConfig) -> EnsembleResult<Self> {
        config.validate()?;
        let adapters = config
            .enabled_classifiers()
            .map(|c| Ok((build_adapter(c)?, c.weight())))
            .collect::<EnsembleResult<Vec<_>>>()?;
        Self::with_adapters(&config, adapters)
    }

    /// Use caller-built adapters with their weights. The classifier list in
    /// `config` is ignored; every other setting applies.
    pub fn with_adapters(
        config: &EnsembleConfig,
        adapters: Vec<(Arc<dyn ClassifierAdapter>, f64)>,
    ) -> EnsembleResult<Self> {
        config.validate_settings()?;
        validate_members(config.strategy, adapters.iter().map(|(a, w)| (a.name(), *w)))?;

        let meta_adapter = if config.strategy == EnsembleStrategy::StackedGeneralization {
            Some(build_adapter(&config.meta_classifier_config())?)
        } else {
            None
        };

        info!(
            "Ensemble configured: {} adapters, strategy {}, {} workers",
            adapters.len(),
            config.strategy.as_str(),
            config.max_workers
        );

        Ok(Self {
            strategy: config.strategy,
            feature_top_k: config.feature_top_k,
            members: adapters
                .into_iter()
                .map(|(adapter, weight)| Member { adapter, weight, active: false })
                .collect(),
            meta_adapter,
            stacking: None,
            state: CoordinatorState::Untrained,
            label_set: None,
            selector: None,
            input_len: None,
            workers: Arc::new(Semaphore::new(config.max_workers)),
            max_workers: config.max_workers,
            tracker: PerformanceTracker::new(config.adaptive_alpha),
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn strategy(&self) -> EnsembleStrategy {
        self.strategy
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn label_set(&self) -> Option<&LabelSet> {
        self.label_set.as_ref()
    }

    /// Feature-vector length expected by `predict`, once trained.
    pub fn input_len(&self) -> Option<usize> {
        self.input_len
    }

    pub fn selected_features(&self) -> Option<&[usize]> {
        self.selector.as_ref().map(|s| s.indices())
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.adapter.name()).collect()
    }

    /// Adapters currently taking part in prediction.
    pub fn active_adapters(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.active)
            .map(|m| m.adapter.name())
            .collect()
    }

    pub fn has_meta_classifier(&self) -> bool {
        self.stacking.is_some()
    }

    pub fn adapter_model_sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes: BTreeMap<String, usize> = self
            .members
            .iter()
            .map(|m| (m.adapter.name().to_string(), m.adapter.model_size_bytes()))
            .collect();
        if let Some(stacking) = &self.stacking {
            sizes.insert(stacking.adapter.name().to_string(), stacking.adapter.model_size_bytes());
        }
        sizes
    }

    /// Recent-performance score per adapter, as used by adaptive weighting.
    pub fn recent_performance(&self) -> BTreeMap<String, f64> {
        self.members
            .iter()
            .map(|m| (m.adapter.name().to_string(), self.tracker.recent_performance(m.adapter.name())))
            .collect()
    }

    /// Feed one observed outcome into an adapter's recent-performance average.
    pub fn record_feedback(&self, adapter: &str, correct: bool) -> EnsembleResult<()> {
        if !self.members.iter().any(|m| m.adapter.name() == adapter) {
            return Err(EnsembleError::InvalidInput(format!("unknown adapter '{}'", adapter)));
        }
        self.tracker.record(adapter, correct);
        Ok(())
    }

    /// Record every adapter vote of `result` against the true label.
    pub fn record_outcome(&self, result: &ClassificationResult, true_label: Label) {
        for (name, vote) in &result.adapter_votes {
            self.tracker.record(name, vote.label == true_label);
        }
    }

    /// Run `job` for each listed member on the blocking pool, at most
    /// `max_workers` at a time, and wait for all of them.
    ///
    /// Results come back in member order. Dropping the returned future aborts
    /// tasks still waiting for a worker; calls already running finish on
    /// their own.
    async fn fan_out<T, F>(&self, indices: &[usize], job: F) -> Vec<(usize, EnsembleResult<T>)>
    where
        T: Send + 'static,
        F: Fn(&dyn ClassifierAdapter) -> EnsembleResult<T> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let mut tasks = JoinSet::new();

        for &idx in indices {
            let adapter = Arc::clone(&self.members[idx].adapter);
            let workers = Arc::clone(&self.workers);
            let job = Arc::clone(&job);
            tasks.spawn(async move {
                let name = adapter.name().to_string();
                let result = match workers.acquire_owned().await {
                    Ok(permit) => tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        (*job)(adapter.as_ref())
                    })
                    .await
                    .unwrap_or_else(|e| Err(EnsembleError::Task(format!("{} worker failed: {}", name, e)))),
                    Err(_) => Err(EnsembleError::Task("worker pool closed".into())),
                };
                (idx, result)
            });
        }

        let mut results = Vec::with_capacity(indices.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => warn!("Adapter task did not complete: {}", e),
            }
        }
        for &idx in indices {
            if !results.iter().any(|(i, _)| *i == idx) {
                results.push((idx, Err(EnsembleError::Task("adapter task aborted".into()))));
            }
        }
        results.sort_by_key(|(i, _)| *i);
        results
    }

    fn failure(&self, idx: usize, error: &EnsembleError) -> AdapterFailure {
        AdapterFailure {
            adapter: self.members[idx].adapter.name().to_string(),
            reason: error.to_string(),
        }
    }

    /// Train every adapter on the labelled batch.
    ///
    /// Adapters that fail are logged and excluded; training fails only when
    /// none succeeds. Any failure leaves the coordinator `Untrained`.
    pub async fn train(&mut self, features: &[FeatureVector], labels: &[Label]) -> EnsembleResult<TrainingReport> {
        let started = Instant::now();
        if features.len() != labels.len() {
            return Err(EnsembleError::InvalidInput(format!(
                "{} feature vectors but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let x = feature_matrix(features)?;
        let label_set = LabelSet::from_labels(labels)?;
        let y = label_set.encode(labels)?;

        self.state = CoordinatorState::Training;
        self.stacking = None;
        info!(
            "Training {} adapters on {} samples × {} features, {} classes",
            self.members.len(),
            x.nrows(),
            x.ncols(),
            label_set.len()
        );

        match self.train_members(x, y, label_set.len()).await {
            Ok(mut report) => {
                self.label_set = Some(label_set);
                self.state = CoordinatorState::Trained;
                self.tracker.reset();
                report.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                info!(
                    "Training complete: {}/{} adapters in {:.1} ms",
                    report.trained.len(),
                    self.members.len(),
                    report.duration_ms
                );
                Ok(report)
            }
            Err(e) => {
                self.state = CoordinatorState::Untrained;
                self.label_set = None;
                self.selector = None;
                self.input_len = None;
                self.members.iter_mut().for_each(|m| m.active = false);
                Err(e)
            }
        }
    }

    async fn train_members(&mut self, x: DMatrix<f64>, y: Vec<usize>, n_classes: usize) -> EnsembleResult<TrainingReport> {
        let input_len = x.ncols();
        let selector = match self.feature_top_k {
            Some(k) => Some(FeatureSelector::fit(&x, &y, n_classes, k)?),
            None => None,
        };
        let x = Arc::new(match &selector {
            Some(s) => s.transform(&x)?,
            None => x,
        });
        let y = Arc::new(y);

        let all: Vec<usize> = (0..self.members.len()).collect();
        let outcomes = {
            let (x, y) = (Arc::clone(&x), Arc::clone(&y));
            self.fan_out(&all, move |adapter| adapter.train(&x, &y, n_classes)).await
        };

        // Barrier passed: every adapter has finished or failed
        let mut trained = Vec::new();
        let mut failures = Vec::new();
        for (idx, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    self.members[idx].active = true;
                    trained.push(idx);
                }
                Err(e) => {
                    warn!("Adapter {} failed to train, excluding it: {}", self.members[idx].adapter.name(), e);
                    self.members[idx].active = false;
                    failures.push(self.failure(idx, &e));
                }
            }
        }
        if trained.is_empty() {
            return Err(EnsembleError::EnsembleTraining { failures });
        }

        let meta_classifier_trained = match &self.meta_adapter {
            Some(meta) => {
                let meta = Arc::clone(meta);
                self.train_meta_classifier(meta, &trained, &x, &y, n_classes).await
            }
            None => false,
        };

        self.selector = selector;
        self.input_len = Some(input_len);
        Ok(TrainingReport {
            trained: trained.iter().map(|&i| self.members[i].adapter.name().to_string()).collect(),
            failures,
            selected_features: self.selector.as_ref().map(|s| s.indices().to_vec()),
            meta_classifier_trained,
            duration_ms: 0.0,
        })
    }

    /// Fit the meta-classifier on in-sample base predictions. Failure here
    /// is not fatal; prediction falls back to majority voting.
    async fn train_meta_classifier(
        &mut self,
        meta: Arc<dyn ClassifierAdapter>,
        trained: &[usize],
        x: &Arc<DMatrix<f64>>,
        y: &Arc<Vec<usize>>,
        n_classes: usize,
    ) -> bool {
        let base = {
            let x = Arc::clone(x);
            self.fan_out(trained, move |adapter| adapter.predict(&x)).await
        };
        let mut inputs = Vec::new();
        let mut predictions = Vec::new();
        for (idx, outcome) in base {
            match outcome {
                Ok(p) => {
                    inputs.push(idx);
                    predictions.push(p);
                }
                Err(e) => warn!(
                    "Adapter {} left out of meta-features: {}",
                    self.members[idx].adapter.name(),
                    e
                ),
            }
        }
        if inputs.is_empty() {
            warn!("No base predictions for the meta-classifier; stacking will fall back to majority voting");
            return false;
        }

        let meta_x = meta_features(&predictions.iter().collect::<Vec<_>>());
        let y = Arc::clone(y);
        let fit = {
            let meta = Arc::clone(&meta);
            tokio::task::spawn_blocking(move || meta.train(&meta_x, &y, n_classes)).await
        };
        match fit {
            Ok(Ok(())) => {
                debug!("Meta-classifier {} trained on {} base adapters", meta.name(), inputs.len());
                self.stacking = Some(StackingModel { adapter: meta, inputs });
                true
            }
            Ok(Err(e)) => {
                warn!("Meta-classifier failed to train: {}", e);
                false
            }
            Err(e) => {
                warn!("Meta-classifier task failed: {}", e);
                false
            }
        }
    }

    /// Meta-classifier output, or `None` when stacking cannot run for this call.
    async fn stacked_predictions(&self, successes: &[(usize, AdapterPrediction)]) -> Option<AdapterPrediction> {
        let stacking = self.stacking.as_ref()?;
        let mut inputs = Vec::with_capacity(stacking.inputs.len());
        for idx in &stacking.inputs {
            let (_, prediction) = successes.iter().find(|(i, _)| i == idx)?;
            inputs.push(prediction);
        }
        let meta_x = meta_features(&inputs);
        let meta = Arc::clone(&stacking.adapter);
        let permit = Arc::clone(&self.workers).acquire_owned().await.ok()?;
        match tokio::task::spawn_blocking(move || {
            let _permit = permit;
            meta.predict(&meta_x)
        })
        .await
        {
            Ok(Ok(p)) => Some(p),
            Ok(Err(e)) => {
                warn!("Meta-classifier predict failed: {}", e);
                None
            }
            Err(e) => {
                warn!("Meta-classifier task failed: {}", e);
                None
            }
        }
    }

    fn ballot_weight(&self, idx: usize) -> f64 {
        match self.strategy {
            EnsembleStrategy::WeightedVoting => self.members[idx].weight,
            EnsembleStrategy::AdaptiveWeighting => {
                voting::adaptive_weight(self.tracker.recent_performance(self.members[idx].adapter.name()))
            }
            EnsembleStrategy::MajorityVoting
            | EnsembleStrategy::ConfidenceWeighted
            | EnsembleStrategy::StackedGeneralization => 1.0,
        }
    }

    /// Classify a batch of feature vectors.
    ///
    /// Adapters whose predict fails are excluded and named in each result's
    /// diagnostics. If none succeeds the call fails with
    /// `EnsemblePrediction`; no label is produced from zero adapters.
    pub async fn predict(&self, features: &[FeatureVector]) -> EnsembleResult<Vec<ClassificationResult>> {
        let started = Instant::now();
        let (Some(label_set), CoordinatorState::Trained) = (&self.label_set, self.state) else {
            return Err(EnsembleError::NotTrained("ensemble".into()));
        };
        if features.is_empty() {
            return Ok(Vec::new());
        }

        let x = feature_matrix(features)?;
        if let Some(expected) = self.input_len {
            if x.ncols() != expected {
                return Err(EnsembleError::FeatureLengthMismatch { expected, actual: x.ncols() });
            }
        }
        let x = Arc::new(match &self.selector {
            Some(s) => s.transform(&x)?,
            None => x,
        });

        let active: Vec<usize> = (0..self.members.len()).filter(|&i| self.members[i].active).collect();
        let outcomes = {
            let x = Arc::clone(&x);
            self.fan_out(&active, move |adapter| adapter.predict(&x)).await
        };

        let mut successes = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (idx, outcome) in outcomes {
            match outcome {
                Ok(prediction) => successes.push((idx, prediction)),
                Err(e) => {
                    warn!("Excluding adapter {} from this prediction: {}", self.members[idx].adapter.name(), e);
                    failures.push(self.failure(idx, &e));
                }
            }
        }
        if successes.is_empty() {
            return Err(EnsembleError::EnsemblePrediction { attempted: active.len(), failures });
        }

        let mut excluded: Vec<String> = self
            .members
            .iter()
            .filter(|m| !m.active)
            .map(|m| m.adapter.name().to_string())
            .collect();
        excluded.extend(failures.into_iter().map(|f| f.adapter));

        let stacked = if self.strategy == EnsembleStrategy::StackedGeneralization {
            let meta = self.stacked_predictions(&successes).await;
            if meta.is_none() {
                warn!("Stacked generalization unavailable for this call, falling back to majority voting");
            }
            meta
        } else {
            None
        };
        let fallback = (self.strategy == EnsembleStrategy::StackedGeneralization && stacked.is_none())
            .then_some(EnsembleStrategy::MajorityVoting);

        let n_classes = label_set.len();
        let weights: Vec<f64> = successes.iter().map(|(idx, _)| self.ballot_weight(*idx)).collect();
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let to_label = |class: usize| {
            label_set
                .label_at(class)
                .ok_or_else(|| EnsembleError::Task(format!("class index {} outside the label set", class)))
        };

        (0..x.nrows())
            .map(|r| -> EnsembleResult<ClassificationResult> {
                let ballots: Vec<Ballot> = successes
                    .iter()
                    .zip(&weights)
                    .map(|((_, p), &weight)| Ballot { class: p.labels[r], confidence: p.confidence(r), weight })
                    .collect();

                let decision = match (self.strategy, &stacked) {
                    (EnsembleStrategy::MajorityVoting, _) | (EnsembleStrategy::StackedGeneralization, None) => {
                        voting::majority(&ballots, n_classes)
                    }
                    (EnsembleStrategy::StackedGeneralization, Some(meta)) => {
                        Decision { class: meta.labels[r], confidence: meta.confidence(r) }
                    }
                    (
                        EnsembleStrategy::WeightedVoting
                        | EnsembleStrategy::ConfidenceWeighted
                        | EnsembleStrategy::AdaptiveWeighting,
                        _,
                    ) => voting::weighted(&ballots, n_classes),
                };

                let spread = voting::spread(&ballots, n_classes);
                let adapter_votes = successes
                    .iter()
                    .zip(&ballots)
                    .map(|((idx, _), b)| -> EnsembleResult<(String, AdapterVote)> {
                        Ok((
                            self.members[*idx].adapter.name().to_string(),
                            AdapterVote { label: to_label(b.class)?, confidence: b.confidence },
                        ))
                    })
                    .collect::<EnsembleResult<BTreeMap<_, _>>>()?;

                Ok(ClassificationResult {
                    label: to_label(decision.class)?,
                    confidence: decision.confidence,
                    adapter_votes,
                    diagnostics: EnsembleDiagnostics {
                        agreement_score: spread.agreement,
                        diversity_score: 1.0 - spread.agreement,
                        average_confidence: spread.average_confidence,
                        confidence_variance: spread.confidence_variance,
                        participating_adapters: ballots.len(),
                        excluded_adapters: excluded.clone(),
                        fallback,
                    },
                    strategy: self.strategy,
                    processing_time_ms: elapsed_ms,
                })
            })
            .collect()
    }

    pub async fn predict_one(&self, features: &FeatureVector) -> EnsembleResult<ClassificationResult> {
        self.predict(std::slice::from_ref(features))
            .await?
            .pop()
            .ok_or_else(|| EnsembleError::Task("empty prediction batch".into()))
    }

    /// `predict`, abandoned as soon as `cancel` fires.
    ///
    /// Cancellation drops the in-flight task group, so tasks still queued for
    /// a worker never start.
    pub async fn predict_with_cancellation(
        &self,
        features: &[FeatureVector],
        cancel: CancellationToken,
    ) -> EnsembleResult<Vec<ClassificationResult>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Prediction cancelled by caller");
                Err(EnsembleError::Cancelled)
            }
            result = self.predict(features) => result,
        }
    }
}
