//! Holdout metrics for a trained ensemble, with a bounded history of past
//! evaluations.

pub mod evaluator;
pub mod metrics;


pub use evaluator::{PerformanceEvaluator, DEFAULT_AUC, DEFAULT_HISTORY_CAPACITY};
pub use metrics::{accuracy, binary_auc, confusion_matrix, weighted_scores, WeightedScores};
