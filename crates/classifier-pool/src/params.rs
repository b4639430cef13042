use std::collections::BTreeMap;

use ensemble_core::{ClassifierConfig, EnsembleError, EnsembleResult};

/// Typed view over a classifier's hyperparameter map.
///
/// Unknown keys are rejected up front so a typo cannot silently fall back to
/// a default.
pub struct Params<'a> {
    name: &'a str,
    map: &'a BTreeMap<String, f64>,
}

impl<'a> Params<'a> {
    pub fn new(config: &'a ClassifierConfig, allowed: &[&str]) -> EnsembleResult<Self> {
        if let Some(unknown) = config.hyperparameters().keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(EnsembleError::config(format!(
                "classifier '{}' ({}) does not accept hyperparameter '{}' (allowed: {})",
                config.name(),
                config.family().as_str(),
                unknown,
                allowed.join(", ")
            )));
        }
        Ok(Self { name: config.name(), map: config.hyperparameters() })
    }

    fn raw(&self, key: &str) -> EnsembleResult<Option<f64>> {
        match self.map.get(key) {
            Some(v) if !v.is_finite() => Err(EnsembleError::config(format!(
                "classifier '{}': hyperparameter '{}' must be finite",
                self.name, key
            ))),
            other => Ok(other.copied()),
        }
    }

    /// Strictly positive real.
    pub fn positive(&self, key: &str, default: f64) -> EnsembleResult<f64> {
        let v = self.raw(key)?.unwrap_or(default);
        if v <= 0.0 {
            return Err(EnsembleError::config(format!(
                "classifier '{}': '{}' must be > 0, got {}",
                self.name, key, v
            )));
        }
        Ok(v)
    }

    pub fn non_negative(&self, key: &str, default: f64) -> EnsembleResult<f64> {
        let v = self.raw(key)?.unwrap_or(default);
        if v < 0.0 {
            return Err(EnsembleError::config(format!(
                "classifier '{}': '{}' must be >= 0, got {}",
                self.name, key, v
            )));
        }
        Ok(v)
    }

    /// Whole number no smaller than `min`.
    pub fn count(&self, key: &str, default: usize, min: usize) -> EnsembleResult<usize> {
        let Some(v) = self.raw(key)? else {
            return Ok(default);
        };
        if v.fract() != 0.0 || v < min as f64 {
            return Err(EnsembleError::config(format!(
                "classifier '{}': '{}' must be an integer >= {}, got {}",
                self.name, key, min, v
            )));
        }
        Ok(v as usize)
    }

    pub fn flag(&self, key: &str, default: bool) -> EnsembleResult<bool> {
        match self.raw(key)? {
            None => Ok(default),
            Some(v) if v == 0.0 => Ok(false),
            Some(v) if v == 1.0 => Ok(true),
            Some(v) => Err(EnsembleError::config(format!(
                "classifier '{}': '{}' is a flag (0 or 1), got {}",
                self.name, key, v
            ))),
        }
    }

    pub fn seed(&self, default: u64) -> EnsembleResult<u64> {
        Ok(self.count("seed", default as usize, 0)? as u64)
    }
}
