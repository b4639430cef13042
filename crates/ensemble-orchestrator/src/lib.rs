//! Ensemble orchestration: configuration, feature selection, concurrent
//! adapter fan-out and the combination strategies.

pub mod config;
pub mod coordinator;
pub mod performance;
pub mod pipeline;
pub mod selection;
pub mod voting;

#[cfg(test)]
mod tests;

pub use config::EnsembleConfig;
pub use coordinator::{CoordinatorState, EnsembleCoordinator, TrainingReport};
pub use performance::PerformanceTracker;
pub use pipeline::TrialPipeline;
pub use selection::FeatureSelector;
