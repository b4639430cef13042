use std::sync::RwLock;

use ensemble_core::{
    AdapterPrediction, ClassifierAdapter, ClassifierFamily, EnsembleError, EnsembleResult,
    ProbabilityKind,
};
use nalgebra::DMatrix;

/// A learning algorithm with its hyperparameters, before any data is seen.
pub trait Estimator: Send + Sync + 'static {
    type Model: FittedModel;

    fn family(&self) -> ClassifierFamily;

    fn probability_kind(&self) -> ProbabilityKind;

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<Self::Model>;
}

/// Result of a successful fit.
pub trait FittedModel: Send + Sync {
    fn n_features(&self) -> usize;

    /// Samples × classes matrix; each row sums to 1.
    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64>;

    /// Number of stored f64-sized values, used for the size estimate.
    fn parameter_count(&self) -> usize;
}

/// Generic adapter owning a single model slot behind an `RwLock`.
///
/// Only `train` on this adapter writes the slot; concurrent predicts share a
/// read guard.
pub struct ModelAdapter<E: Estimator> {
    name: String,
    estimator: E,
    slot: RwLock<Option<E::Model>>,
}

impl<E: Estimator> ModelAdapter<E> {
    pub fn new(name: impl Into<String>, estimator: E) -> Self {
        Self {
            name: name.into(),
            estimator,
            slot: RwLock::new(None),
        }
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }
}

pub(crate) fn validate_training_data(
    features: &DMatrix<f64>,
    labels: &[usize],
    n_classes: usize,
) -> EnsembleResult<()> {
    if features.nrows() == 0 || features.ncols() == 0 {
        return Err(EnsembleError::InvalidInput("training matrix is empty".into()));
    }
    if features.nrows() != labels.len() {
        return Err(EnsembleError::InvalidInput(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    if n_classes < 2 {
        return Err(EnsembleError::InvalidInput(format!("need at least 2 classes, got {}", n_classes)));
    }
    if let Some(bad) = labels.iter().find(|&&l| l >= n_classes) {
        return Err(EnsembleError::InvalidInput(format!(
            "label index {} out of range for {} classes",
            bad, n_classes
        )));
    }
    if features.iter().any(|v| !v.is_finite()) {
        return Err(EnsembleError::InvalidInput("training matrix contains non-finite values".into()));
    }
    Ok(())
}

impl<E: Estimator> ClassifierAdapter for ModelAdapter<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> ClassifierFamily {
        self.estimator.family()
    }

    fn train(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<()> {
        validate_training_data(features, labels, n_classes)?;
        let model = self.estimator.fit(features, labels, n_classes)?;
        let mut slot = self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(model);
        tracing::debug!("{} trained on {}x{}", self.name, features.nrows(), features.ncols());
        Ok(())
    }

    fn predict(&self, features: &DMatrix<f64>) -> EnsembleResult<AdapterPrediction> {
        let slot = self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let model = slot
            .as_ref()
            .ok_or_else(|| EnsembleError::NotTrained(self.name.clone()))?;
        if features.ncols() != model.n_features() {
            return Err(EnsembleError::FeatureLengthMismatch {
                expected: model.n_features(),
                actual: features.ncols(),
            });
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(EnsembleError::InvalidInput("prediction matrix contains non-finite values".into()));
        }
        let probabilities = model.predict_proba(features);
        Ok(AdapterPrediction::from_probabilities(probabilities, self.estimator.probability_kind()))
    }

    fn is_trained(&self) -> bool {
        self.slot
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    fn probability_kind(&self) -> ProbabilityKind {
        self.estimator.probability_kind()
    }

    fn model_size_bytes(&self) -> usize {
        self.slot
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|m| m.parameter_count() * std::mem::size_of::<f64>()))
            .unwrap_or(0)
    }
}
