pub mod adapter;
pub mod boosting;
pub mod factory;
pub mod forest;
pub mod knn;
pub mod logistic;
pub mod naive_bayes;
pub mod params;
pub mod scaler;
pub mod svm;
pub mod tree;


pub use adapter::{Estimator, FittedModel, ModelAdapter};
pub use factory::{build_adapter, default_classifier_configs};
pub use scaler::Standardizer;
