use std::collections::HashSet;
use std::str::FromStr;

use classifier_pool::{build_adapter, default_classifier_configs};
use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleError, EnsembleResult, EnsembleStrategy};
use serde::{Deserialize, Serialize};

/// Everything the coordinator needs, passed in explicitly at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub strategy: EnsembleStrategy,
    /// Upper bound on adapter train/predict calls running at once
    pub max_workers: usize,
    /// Keep only the K features with the highest ANOVA F-score
    #[serde(default)]
    pub feature_top_k: Option<usize>,
    pub classifiers: Vec<ClassifierConfig>,
    /// Meta-classifier for stacked generalization; logistic regression when absent
    #[serde(default)]
    pub meta_classifier: Option<ClassifierConfig>,
    /// Smoothing factor of the per-adapter correctness average
    pub adaptive_alpha: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            strategy: EnsembleStrategy::WeightedVoting,
            max_workers: 4,
            feature_top_k: None,
            classifiers: default_classifier_configs(),
            meta_classifier: None,
            adaptive_alpha: 0.1,
        }
    }
}

impl EnsembleConfig {
    /// Load from `ENSEMBLE_*` environment variables, defaulting anything unset.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> EnsembleResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EnsembleResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("ENSEMBLE_STRATEGY") {
            config.strategy = EnsembleStrategy::from_str(&raw)?;
        }
        if let Some(raw) = lookup("ENSEMBLE_MAX_WORKERS") {
            config.max_workers = parse_var("ENSEMBLE_MAX_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("ENSEMBLE_FEATURE_TOP_K") {
            config.feature_top_k = Some(parse_var("ENSEMBLE_FEATURE_TOP_K", &raw)?);
        }
        if let Some(raw) = lookup("ENSEMBLE_ADAPTIVE_ALPHA") {
            config.adaptive_alpha = parse_var("ENSEMBLE_ADAPTIVE_ALPHA", &raw)?;
        }
        if let Some(raw) = lookup("ENSEMBLE_CLASSIFIERS_JSON") {
            config.classifiers = serde_json::from_str(&raw)
                .map_err(|e| EnsembleError::config(format!("ENSEMBLE_CLASSIFIERS_JSON: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: EnsembleStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_classifiers(mut self, classifiers: Vec<ClassifierConfig>) -> Self {
        self.classifiers = classifiers;
        self
    }

    pub fn enabled_classifiers(&self) -> impl Iterator<Item = &ClassifierConfig> {
        self.classifiers.iter().filter(|c| c.is_enabled())
    }

    /// Meta-classifier used when stacking.
    pub fn meta_classifier_config(&self) -> ClassifierConfig {
        self.meta_classifier
            .clone()
            .unwrap_or_else(|| ClassifierConfig::new("meta_logistic_regression", ClassifierFamily::LogisticRegression))
    }

    /// Checks that do not depend on the classifier list.
    pub fn validate_settings(&self) -> EnsembleResult<()> {
        if self.max_workers == 0 {
            return Err(EnsembleError::config("max_workers must be at least 1"));
        }
        if self.feature_top_k == Some(0) {
            return Err(EnsembleError::config("feature_top_k must be at least 1"));
        }
        if !(self.adaptive_alpha > 0.0 && self.adaptive_alpha <= 1.0) {
            return Err(EnsembleError::config(format!(
                "adaptive_alpha must be in (0, 1], got {}",
                self.adaptive_alpha
            )));
        }
        Ok(())
    }

    /// Full validation, run by the coordinator before any adapter is built.
    pub fn validate(&self) -> EnsembleResult<()> {
        self.validate_settings()?;
        validate_members(self.strategy, self.enabled_classifiers().map(|c| (c.name(), c.weight())))?;
        // Hyperparameter maps are checked by building throwaway adapters
        for classifier in self.enabled_classifiers() {
            build_adapter(classifier)?;
        }
        if self.strategy == EnsembleStrategy::StackedGeneralization {
            build_adapter(&self.meta_classifier_config())?;
        }
        Ok(())
    }
}

/// Member-list rules shared by config validation and explicit adapter lists.
pub(crate) fn validate_members<'a>(
    strategy: EnsembleStrategy,
    members: impl Iterator<Item = (&'a str, f64)>,
) -> EnsembleResult<()> {
    let mut names = HashSet::new();
    let mut total_weight = 0.0;
    for (name, weight) in members {
        if !names.insert(name) {
            return Err(EnsembleError::config(format!("duplicate classifier name '{}'", name)));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(EnsembleError::config(format!(
                "classifier '{}' has invalid weight {}",
                name, weight
            )));
        }
        total_weight += weight;
    }
    if names.is_empty() {
        return Err(EnsembleError::config("no enabled classifiers in the ensemble"));
    }
    if strategy.uses_weights() && total_weight <= 0.0 {
        return Err(EnsembleError::config(format!(
            "{} needs a positive total weight",
            strategy.as_str()
        )));
    }
    Ok(())
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> EnsembleResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| EnsembleError::config(format!("{}='{}': {}", key, raw, e)))
}
