use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ensemble_core::{
    AdapterPrediction, ClassifierAdapter, ClassifierConfig, ClassifierFamily, EnsembleError, EnsembleResult,
    EnsembleStrategy, ErrorKind, FeatureVector, Label, ProbabilityKind, Trial,
};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use signal_processing::{FeatureExtractor, SignalConditioner};
use tokio_util::sync::CancellationToken;

use crate::{CoordinatorState, EnsembleConfig, EnsembleCoordinator, TrialPipeline};

/// Adapter that always votes for one class with a fixed confidence.
struct FixedAdapter {
    name: String,
    class: usize,
    confidence: f64,
    fail_train: bool,
    fail_predict: AtomicBool,
    delay: Option<Duration>,
    trained: AtomicBool,
    n_classes: AtomicUsize,
}

impl FixedAdapter {
    fn new(name: &str, class: usize, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            class,
            confidence,
            fail_train: false,
            fail_predict: AtomicBool::new(false),
            delay: None,
            trained: AtomicBool::new(false),
            n_classes: AtomicUsize::new(0),
        }
    }

    fn failing_predict(self) -> Self {
        self.break_predict();
        self
    }

    fn break_predict(&self) {
        self.fail_predict.store(true, Ordering::SeqCst);
    }

    fn failing_train(mut self) -> Self {
        self.fail_train = true;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn arc(self) -> Arc<dyn ClassifierAdapter> {
        Arc::new(self)
    }
}

impl ClassifierAdapter for FixedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::DecisionTree
    }

    fn train(&self, _features: &DMatrix<f64>, _labels: &[usize], n_classes: usize) -> EnsembleResult<()> {
        if self.fail_train {
            return Err(EnsembleError::InvalidInput(format!("{} refuses to train", self.name)));
        }
        self.n_classes.store(n_classes, Ordering::SeqCst);
        self.trained.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn predict(&self, features: &DMatrix<f64>) -> EnsembleResult<AdapterPrediction> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if !self.trained.load(Ordering::SeqCst) {
            return Err(EnsembleError::NotTrained(self.name.clone()));
        }
        if self.fail_predict.load(Ordering::SeqCst) {
            return Err(EnsembleError::InvalidInput(format!("{} cannot predict", self.name)));
        }
        let k = self.n_classes.load(Ordering::SeqCst);
        let rest = (1.0 - self.confidence) / (k - 1) as f64;
        let probs = DMatrix::from_fn(features.nrows(), k, |_, c| if c == self.class { self.confidence } else { rest });
        Ok(AdapterPrediction::from_probabilities(probs, ProbabilityKind::Native))
    }

    fn is_trained(&self) -> bool {
        self.trained.load(Ordering::SeqCst)
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::Native
    }

    fn model_size_bytes(&self) -> usize {
        if self.is_trained() { 16 } else { 0 }
    }
}

fn config(strategy: EnsembleStrategy) -> EnsembleConfig {
    EnsembleConfig::default().with_strategy(strategy)
}

fn toy_training_set() -> (Vec<FeatureVector>, Vec<Label>) {
    let features = (0..8).map(|i| FeatureVector::new(vec![i as f64, 1.0])).collect();
    let labels = (0..8).map(|i| i % 2).collect();
    (features, labels)
}

/// Two Gaussian blobs in `d` dimensions with labels 10 and 20.
fn blobs(n: usize, d: usize, seed: u64) -> (Vec<FeatureVector>, Vec<Label>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let labels: Vec<Label> = (0..n).map(|i| if i % 2 == 0 { 10 } else { 20 }).collect();
    let features = labels
        .iter()
        .map(|&l| {
            let shift = if l == 20 { 1.5 } else { 0.0 };
            FeatureVector::new((0..d).map(|_| shift + rng.gen_range(-1.0..1.0)).collect())
        })
        .collect();
    (features, labels)
}

async fn trained(
    strategy: EnsembleStrategy,
    adapters: Vec<(Arc<dyn ClassifierAdapter>, f64)>,
) -> EnsembleCoordinator {
    let mut coordinator = EnsembleCoordinator::with_adapters(&config(strategy), adapters).unwrap();
    let (x, y) = toy_training_set();
    coordinator.train(&x, &y).await.unwrap();
    coordinator
}

#[tokio::test]
async fn test_majority_two_of_three() {
    let coordinator = trained(
        EnsembleStrategy::MajorityVoting,
        vec![
            (FixedAdapter::new("a", 0, 0.8).arc(), 1.0),
            (FixedAdapter::new("b", 0, 0.6).arc(), 1.0),
            (FixedAdapter::new("c", 1, 0.99).arc(), 1.0),
        ],
    )
    .await;
    let result = coordinator.predict_one(&FeatureVector::new(vec![0.0, 1.0])).await.unwrap();
    assert_eq!(result.label, 0);
    assert!((result.confidence - 2.0 / 3.0).abs() < 1e-3);
    assert!((result.diagnostics.agreement_score - 2.0 / 3.0).abs() < 1e-9);
    assert!((result.diagnostics.diversity_score - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(result.diagnostics.participating_adapters, 3);
    assert_eq!(result.adapter_votes["c"].label, 1);
    assert_eq!(result.strategy, EnsembleStrategy::MajorityVoting);
}

#[tokio::test]
async fn test_weighted_voting_follows_heavier_adapter() {
    let coordinator = trained(
        EnsembleStrategy::WeightedVoting,
        vec![
            (FixedAdapter::new("heavy", 1, 0.9).arc(), 2.0),
            (FixedAdapter::new("light", 0, 0.9).arc(), 1.0),
        ],
    )
    .await;
    let result = coordinator.predict_one(&FeatureVector::new(vec![3.0, 1.0])).await.unwrap();
    assert_eq!(result.label, 1);
    assert!((result.confidence - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_confidence_weighted_ignores_configured_weights() {
    let coordinator = trained(
        EnsembleStrategy::ConfidenceWeighted,
        vec![
            (FixedAdapter::new("heavy", 1, 0.6).arc(), 5.0),
            (FixedAdapter::new("sure", 0, 0.95).arc(), 1.0),
        ],
    )
    .await;
    let result = coordinator.predict_one(&FeatureVector::new(vec![3.0, 1.0])).await.unwrap();
    assert_eq!(result.label, 0);
}

#[tokio::test]
async fn test_adaptive_weighting_uses_feedback() {
    let coordinator = trained(
        EnsembleStrategy::AdaptiveWeighting,
        vec![
            (FixedAdapter::new("loud", 1, 0.9).arc(), 1.0),
            (FixedAdapter::new("steady", 0, 0.8).arc(), 1.0),
        ],
    )
    .await;
    let sample = FeatureVector::new(vec![0.0, 1.0]);

    // No history: both at 1.0, so 0.9 beats 0.8
    assert_eq!(coordinator.predict_one(&sample).await.unwrap().label, 1);

    for _ in 0..10 {
        coordinator.record_feedback("loud", false).unwrap();
    }
    // 0.9^10 × 0.9 ≈ 0.31 < 0.8
    assert!(coordinator.recent_performance()["loud"] < 0.35);
    assert_eq!(coordinator.predict_one(&sample).await.unwrap().label, 0);
    assert!(coordinator.record_feedback("nobody", true).is_err());
}

#[tokio::test]
async fn test_record_outcome_scores_each_vote() {
    let coordinator = trained(
        EnsembleStrategy::AdaptiveWeighting,
        vec![
            (FixedAdapter::new("right", 1, 0.9).arc(), 1.0),
            (FixedAdapter::new("wrong", 0, 0.9).arc(), 1.0),
        ],
    )
    .await;
    let result = coordinator.predict_one(&FeatureVector::new(vec![0.0, 1.0])).await.unwrap();
    coordinator.record_outcome(&result, 1);
    let perf = coordinator.recent_performance();
    assert!((perf["right"] - 1.0).abs() < 1e-12);
    assert!((perf["wrong"] - 0.9).abs() < 1e-12);
}

#[tokio::test]
async fn test_all_disabled_fails_at_construction() {
    let classifiers = classifier_pool::default_classifier_configs()
        .into_iter()
        .map(|c| c.with_enabled(false))
        .collect();
    let err = EnsembleCoordinator::new(EnsembleConfig::default().with_classifiers(classifiers))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::BadConfiguration);

    let err = EnsembleCoordinator::with_adapters(&EnsembleConfig::default(), Vec::new()).err().unwrap();
    assert!(matches!(err, EnsembleError::Configuration(_)));
}

#[tokio::test]
async fn test_predict_before_train() {
    let coordinator = EnsembleCoordinator::with_adapters(
        &config(EnsembleStrategy::MajorityVoting),
        vec![(FixedAdapter::new("a", 0, 0.9).arc(), 1.0)],
    )
    .unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Untrained);
    let err = coordinator.predict(&[FeatureVector::new(vec![0.0, 1.0])]).await.unwrap_err();
    assert!(matches!(err, EnsembleError::NotTrained(_)));
}

#[tokio::test]
async fn test_every_adapter_failing_is_an_ensemble_error() {
    let coordinator = trained(
        EnsembleStrategy::WeightedVoting,
        vec![
            (FixedAdapter::new("a", 0, 0.9).failing_predict().arc(), 1.0),
            (FixedAdapter::new("b", 1, 0.9).failing_predict().arc(), 1.0),
            (FixedAdapter::new("c", 1, 0.9).failing_predict().arc(), 1.0),
        ],
    )
    .await;
    let err = coordinator.predict(&[FeatureVector::new(vec![0.0, 1.0])]).await.unwrap_err();
    match &err {
        EnsembleError::EnsemblePrediction { attempted, failures } => {
            assert_eq!(*attempted, 3);
            assert_eq!(failures.len(), 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::NoUsableModel);
}

#[tokio::test]
async fn test_failing_adapter_is_excluded_and_reported() {
    let coordinator = trained(
        EnsembleStrategy::MajorityVoting,
        vec![
            (FixedAdapter::new("a", 1, 0.9).arc(), 1.0),
            (FixedAdapter::new("broken", 0, 0.9).failing_predict().arc(), 1.0),
        ],
    )
    .await;
    let results = coordinator
        .predict(&[FeatureVector::new(vec![0.0, 1.0]), FeatureVector::new(vec![1.0, 1.0])])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(result.label, 1);
        assert_eq!(result.diagnostics.participating_adapters, 1);
        assert_eq!(result.diagnostics.excluded_adapters, vec!["broken".to_string()]);
        assert!(!result.adapter_votes.contains_key("broken"));
    }
}

#[tokio::test]
async fn test_training_failures() {
    let mut coordinator = EnsembleCoordinator::with_adapters(
        &config(EnsembleStrategy::MajorityVoting),
        vec![
            (FixedAdapter::new("ok", 0, 0.9).arc(), 1.0),
            (FixedAdapter::new("bad", 1, 0.9).failing_train().arc(), 1.0),
        ],
    )
    .unwrap();
    let (x, y) = toy_training_set();
    let report = coordinator.train(&x, &y).await.unwrap();
    assert_eq!(report.trained, vec!["ok".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(coordinator.active_adapters(), vec!["ok"]);

    let result = coordinator.predict_one(&x[0]).await.unwrap();
    assert_eq!(result.diagnostics.excluded_adapters, vec!["bad".to_string()]);

    let mut hopeless = EnsembleCoordinator::with_adapters(
        &config(EnsembleStrategy::MajorityVoting),
        vec![(FixedAdapter::new("bad", 1, 0.9).failing_train().arc(), 1.0)],
    )
    .unwrap();
    let err = hopeless.train(&x, &y).await.unwrap_err();
    assert!(matches!(err, EnsembleError::EnsembleTraining { .. }));
    assert_eq!(hopeless.state(), CoordinatorState::Untrained);
}

#[tokio::test]
async fn test_feature_length_mismatch_at_predict() {
    let coordinator = trained(
        EnsembleStrategy::MajorityVoting,
        vec![(FixedAdapter::new("a", 0, 0.9).arc(), 1.0)],
    )
    .await;
    let err = coordinator.predict(&[FeatureVector::new(vec![1.0, 2.0, 3.0])]).await.unwrap_err();
    assert!(matches!(err, EnsembleError::FeatureLengthMismatch { expected: 2, actual: 3 }));
    assert_eq!(err.kind(), ErrorKind::BadConfiguration);
}

#[tokio::test]
async fn test_labels_map_back_to_original_values() {
    let (x, y) = blobs(200, 6, 21);
    let classifiers = vec![
        ClassifierConfig::new("nb", ClassifierFamily::NaiveBayes),
        ClassifierConfig::new("lr", ClassifierFamily::LogisticRegression),
        ClassifierConfig::new("dt", ClassifierFamily::DecisionTree),
    ];
    let mut coordinator = EnsembleCoordinator::new(
        config(EnsembleStrategy::MajorityVoting).with_classifiers(classifiers),
    )
    .unwrap();
    coordinator.train(&x, &y).await.unwrap();
    assert_eq!(coordinator.label_set().unwrap().labels(), &[10, 20]);
    let results = coordinator.predict(&x[..10]).await.unwrap();
    assert!(results.iter().all(|r| r.label == 10 || r.label == 20));
}

#[tokio::test]
async fn test_default_pool_beats_chance() {
    let (train_x, train_y) = blobs(400, 16, 1);
    let (test_x, test_y) = blobs(200, 16, 2);
    let mut coordinator = EnsembleCoordinator::new(EnsembleConfig::default()).unwrap();
    let report = coordinator.train(&train_x, &train_y).await.unwrap();
    assert_eq!(report.trained.len(), 5);
    assert_eq!(coordinator.state(), CoordinatorState::Trained);

    let results = coordinator.predict(&test_x).await.unwrap();
    let hits = results.iter().zip(&test_y).filter(|(r, y)| r.label == **y).count();
    assert!(hits as f64 / test_y.len() as f64 > 0.9);
    assert!(coordinator.adapter_model_sizes().values().all(|&s| s > 0));
}

#[tokio::test]
async fn test_stacking_trains_meta_classifier() {
    let (x, y) = blobs(200, 4, 5);
    let classifiers = vec![
        ClassifierConfig::new("nb", ClassifierFamily::NaiveBayes),
        ClassifierConfig::new("lr", ClassifierFamily::LogisticRegression),
        ClassifierConfig::new("knn", ClassifierFamily::KNearestNeighbors),
    ];
    let mut coordinator = EnsembleCoordinator::new(
        config(EnsembleStrategy::StackedGeneralization).with_classifiers(classifiers),
    )
    .unwrap();
    let report = coordinator.train(&x, &y).await.unwrap();
    assert!(report.meta_classifier_trained);
    assert!(coordinator.has_meta_classifier());
    assert!(coordinator.adapter_model_sizes().contains_key("meta_logistic_regression"));

    let results = coordinator.predict(&x[..20]).await.unwrap();
    for result in &results {
        assert_eq!(result.diagnostics.fallback, None);
        assert_eq!(result.strategy, EnsembleStrategy::StackedGeneralization);
    }
    let hits = results.iter().zip(&y[..20]).filter(|(r, l)| r.label == **l).count();
    assert!(hits >= 16);
}

#[tokio::test]
async fn test_stacking_skips_adapters_that_never_fed_the_meta_model() {
    let coordinator = trained(
        EnsembleStrategy::StackedGeneralization,
        vec![
            (FixedAdapter::new("a", 1, 0.9).arc(), 1.0),
            (FixedAdapter::new("b", 0, 0.7).arc(), 1.0),
            (FixedAdapter::new("c", 1, 0.7).failing_predict().arc(), 1.0),
        ],
    )
    .await;
    assert!(coordinator.has_meta_classifier());
    // "c" produced no meta-features at training time, so stacking still runs
    let result = coordinator.predict_one(&FeatureVector::new(vec![0.0, 1.0])).await.unwrap();
    assert_eq!(result.diagnostics.excluded_adapters, vec!["c".to_string()]);
    assert_eq!(result.diagnostics.fallback, None);
}

#[tokio::test]
async fn test_stacking_falls_back_to_majority_when_input_missing() {
    let flaky = Arc::new(FixedAdapter::new("flaky", 1, 0.6));
    let coordinator = trained(
        EnsembleStrategy::StackedGeneralization,
        vec![
            (FixedAdapter::new("a", 0, 0.9).arc(), 1.0),
            (FixedAdapter::new("b", 0, 0.8).arc(), 1.0),
            (flaky.clone() as Arc<dyn ClassifierAdapter>, 1.0),
        ],
    )
    .await;
    assert!(coordinator.has_meta_classifier());

    flaky.break_predict();
    let result = coordinator.predict_one(&FeatureVector::new(vec![0.0, 1.0])).await.unwrap();
    assert_eq!(result.diagnostics.fallback, Some(EnsembleStrategy::MajorityVoting));
    assert_eq!(result.strategy, EnsembleStrategy::StackedGeneralization);
    assert_eq!(result.label, 0);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.diagnostics.excluded_adapters, vec!["flaky".to_string()]);
}

#[tokio::test]
async fn test_stacking_without_meta_model() {
    // The only base adapter fails predict while meta-features are built
    let coordinator = trained(
        EnsembleStrategy::StackedGeneralization,
        vec![(FixedAdapter::new("a", 1, 0.9).failing_predict().arc(), 1.0)],
    )
    .await;
    assert_eq!(coordinator.state(), CoordinatorState::Trained);
    assert!(!coordinator.has_meta_classifier());
    let err = coordinator.predict_one(&FeatureVector::new(vec![0.0, 1.0])).await.unwrap_err();
    assert!(matches!(err, EnsembleError::EnsemblePrediction { attempted: 1, .. }));
}

#[tokio::test]
async fn test_pre_cancelled_prediction() {
    let coordinator = trained(
        EnsembleStrategy::MajorityVoting,
        vec![(FixedAdapter::new("a", 0, 0.9).arc(), 1.0)],
    )
    .await;
    let token = CancellationToken::new();
    token.cancel();
    let err = coordinator
        .predict_with_cancellation(&[FeatureVector::new(vec![0.0, 1.0])], token)
        .await
        .unwrap_err();
    assert!(matches!(err, EnsembleError::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_cancellation_abandons_slow_adapters() {
    let coordinator = trained(
        EnsembleStrategy::MajorityVoting,
        vec![
            (FixedAdapter::new("slow", 0, 0.9).slow(Duration::from_millis(300)).arc(), 1.0),
            (FixedAdapter::new("fast", 0, 0.9).arc(), 1.0),
        ],
    )
    .await;
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = coordinator
        .predict_with_cancellation(&[FeatureVector::new(vec![0.0, 1.0])], token)
        .await
        .unwrap_err();
    assert!(matches!(err, EnsembleError::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(250));

    // Uncancelled calls still complete
    let ok = coordinator
        .predict_with_cancellation(&[FeatureVector::new(vec![0.0, 1.0])], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ok[0].label, 0);
}

#[tokio::test]
async fn test_feature_selection_reduces_width() {
    let (x, y) = blobs(100, 12, 9);
    let mut config = config(EnsembleStrategy::MajorityVoting)
        .with_classifiers(vec![ClassifierConfig::new("nb", ClassifierFamily::NaiveBayes)]);
    config.feature_top_k = Some(4);
    let mut coordinator = EnsembleCoordinator::new(config).unwrap();
    let report = coordinator.train(&x, &y).await.unwrap();
    assert_eq!(report.selected_features.as_ref().map(Vec::len), Some(4));
    assert_eq!(coordinator.input_len(), Some(12));
    // Full-width vectors are accepted and reduced internally
    assert_eq!(coordinator.predict(&x[..3]).await.unwrap().len(), 3);
}

fn synthetic_trial(dominant_hz: f64, label: Label, rng: &mut StdRng) -> Trial {
    let fs = 128.0;
    let channels = (0..3)
        .map(|ch| {
            let phase: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
            (0..256)
                .map(|i| {
                    let t = i as f64 / fs;
                    (std::f64::consts::TAU * dominant_hz * t + phase + ch as f64).sin() + 0.3 * rng.gen_range(-1.0..1.0)
                })
                .collect()
        })
        .collect();
    Trial::new(channels, fs).unwrap().with_label(label)
}

#[tokio::test]
async fn test_trial_pipeline_end_to_end() {
    let mut rng = StdRng::seed_from_u64(17);
    let trials: Vec<Trial> = (0..40)
        .map(|i| if i % 2 == 0 { synthetic_trial(10.0, 0, &mut rng) } else { synthetic_trial(20.0, 1, &mut rng) })
        .collect();
    let coordinator = EnsembleCoordinator::new(config(EnsembleStrategy::WeightedVoting).with_classifiers(vec![
        ClassifierConfig::new("nb", ClassifierFamily::NaiveBayes),
        ClassifierConfig::new("lr", ClassifierFamily::LogisticRegression),
    ]))
    .unwrap();
    let mut pipeline = TrialPipeline::new(SignalConditioner::default(), FeatureExtractor::default(), coordinator);

    assert!(matches!(pipeline.classify(&trials[..2]).await, Err(EnsembleError::NotTrained(_))));
    pipeline.fit(&trials).await.unwrap();

    let results = pipeline.classify(&trials).await.unwrap();
    let hits = results.iter().zip(&trials).filter(|(r, t)| Some(r.label) == t.label()).count();
    assert!(hits >= 36, "{hits} of 40");

    let narrow = Trial::new(vec![vec![0.5; 256], vec![0.1; 256]], 128.0).unwrap();
    let err = pipeline.classify(&[narrow]).await.unwrap_err();
    assert!(matches!(err, EnsembleError::FeatureLengthMismatch { expected: 35, actual: 25 }));
}

#[tokio::test]
async fn test_pipeline_fit_requires_labels() {
    let coordinator = EnsembleCoordinator::new(config(EnsembleStrategy::MajorityVoting)).unwrap();
    let mut pipeline = TrialPipeline::new(SignalConditioner::default(), FeatureExtractor::default(), coordinator);
    let unlabeled = Trial::new(vec![vec![0.0; 64]], 128.0).unwrap();
    assert!(matches!(pipeline.fit(&[unlabeled]).await, Err(EnsembleError::InvalidInput(_))));
}
