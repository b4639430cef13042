use std::sync::Arc;

use ensemble_core::{ClassifierAdapter, ClassifierConfig, ClassifierFamily, EnsembleResult};

use crate::adapter::ModelAdapter;
use crate::boosting::GradientBoosting;
use crate::forest::RandomForest;
use crate::knn::KNearestNeighbors;
use crate::logistic::LogisticRegression;
use crate::naive_bayes::NaiveBayes;
use crate::svm::SupportVectorMachine;
use crate::tree::DecisionTree;

/// Build an untrained adapter from its configuration.
///
/// This is the only place a family tag is turned into a concrete type;
/// everything downstream sees `dyn ClassifierAdapter`.
pub fn build_adapter(config: &ClassifierConfig) -> EnsembleResult<Arc<dyn ClassifierAdapter>> {
    let name = config.name();
    let adapter: Arc<dyn ClassifierAdapter> = match config.family() {
        ClassifierFamily::RandomForest => Arc::new(ModelAdapter::new(name, RandomForest::from_config(config)?)),
        ClassifierFamily::GradientBoosting => {
            Arc::new(ModelAdapter::new(name, GradientBoosting::from_config(config)?))
        }
        ClassifierFamily::LogisticRegression => {
            Arc::new(ModelAdapter::new(name, LogisticRegression::from_config(config)?))
        }
        ClassifierFamily::SupportVectorMachine => {
            Arc::new(ModelAdapter::new(name, SupportVectorMachine::from_config(config)?))
        }
        ClassifierFamily::KNearestNeighbors => {
            Arc::new(ModelAdapter::new(name, KNearestNeighbors::from_config(config)?))
        }
        ClassifierFamily::NaiveBayes => Arc::new(ModelAdapter::new(name, NaiveBayes::from_config(config)?)),
        ClassifierFamily::DecisionTree => Arc::new(ModelAdapter::new(name, DecisionTree::from_config(config)?)),
    };
    tracing::debug!("Built {} adapter '{}'", config.family().as_str(), name);
    Ok(adapter)
}

/// The five-member pool used when nothing else is configured.
pub fn default_classifier_configs() -> Vec<ClassifierConfig> {
    vec![
        ClassifierConfig::new("random_forest", ClassifierFamily::RandomForest),
        ClassifierConfig::new("gradient_boosting", ClassifierFamily::GradientBoosting),
        ClassifierConfig::new("logistic_regression", ClassifierFamily::LogisticRegression),
        ClassifierConfig::new("svm", ClassifierFamily::SupportVectorMachine).with_param("rbf_components", 128.0),
        ClassifierConfig::new("knn", ClassifierFamily::KNearestNeighbors),
    ]
}
