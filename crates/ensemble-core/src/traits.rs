use nalgebra::DMatrix;

use crate::{AdapterPrediction, ClassifierFamily, EnsembleResult, ProbabilityKind};

/// Capability shared by every ensemble member.
///
/// Each implementation owns exactly one trained-model slot. `train` fully
/// replaces whatever the slot held before; `predict` on an empty slot fails
/// with `EnsembleError::NotTrained`. Both are blocking CPU work and are
/// called from worker threads, hence `Send + Sync`.
pub trait ClassifierAdapter: Send + Sync {
    /// Instance name, unique within one ensemble.
    fn name(&self) -> &str;

    fn family(&self) -> ClassifierFamily;

    /// Fit on a samples × features matrix and dense class indices `0..n_classes`.
    fn train(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<()>;

    fn predict(&self, features: &DMatrix<f64>) -> EnsembleResult<AdapterPrediction>;

    fn is_trained(&self) -> bool;

    fn probability_kind(&self) -> ProbabilityKind;

    /// Rough size of the trained model in bytes (0 when untrained).
    fn model_size_bytes(&self) -> usize;
}
