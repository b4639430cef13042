//! Multinomial logistic regression
//!
//! Softmax over linear scores on standardized features, fitted by full-batch
//! gradient descent with an L2 penalty. Deterministic: weights start at zero.
//! The step is divided by `1 + d/2`, a bound on the loss curvature for
//! standardized inputs, so the default rate is stable at any width.

use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleResult, ProbabilityKind};
use nalgebra::{DMatrix, DVector};

use crate::adapter::{Estimator, FittedModel};
use crate::params::Params;
use crate::scaler::Standardizer;

pub const PARAMS: &[&str] = &["learning_rate", "max_iter", "l2", "tolerance"];

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub l2: f64,
    /// Stop once the largest gradient component falls below this
    pub tolerance: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self { learning_rate: 1.0, max_iter: 300, l2: 1e-3, tolerance: 1e-6 }
    }
}

impl LogisticRegression {
    pub fn from_config(config: &ClassifierConfig) -> EnsembleResult<Self> {
        let p = Params::new(config, PARAMS)?;
        let d = Self::default();
        Ok(Self {
            learning_rate: p.positive("learning_rate", d.learning_rate)?,
            max_iter: p.count("max_iter", d.max_iter, 1)?,
            l2: p.non_negative("l2", d.l2)?,
            tolerance: p.non_negative("tolerance", d.tolerance)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogisticModel {
    scaler: Standardizer,
    /// features × classes
    weights: DMatrix<f64>,
    bias: DVector<f64>,
}

/// Row-wise softmax of a samples × classes score matrix, in place.
pub(crate) fn softmax_rows(scores: &mut DMatrix<f64>) {
    for mut row in scores.row_iter_mut() {
        let max = row.max();
        row.apply(|v| *v = (*v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
}

fn scores(x: &DMatrix<f64>, weights: &DMatrix<f64>, bias: &DVector<f64>) -> DMatrix<f64> {
    let mut s = x * weights;
    for mut row in s.row_iter_mut() {
        row += bias.transpose();
    }
    s
}

impl Estimator for LogisticRegression {
    type Model = LogisticModel;

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::LogisticRegression
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::Native
    }

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<LogisticModel> {
        let scaler = Standardizer::fit(features);
        let x = scaler.transform(features);
        let (n, d) = x.shape();
        let targets = DMatrix::from_fn(n, n_classes, |r, c| if labels[r] == c { 1.0 } else { 0.0 });

        let mut weights = DMatrix::zeros(d, n_classes);
        let mut bias = DVector::zeros(n_classes);
        let inv_n = 1.0 / n as f64;
        let step = self.learning_rate / (1.0 + 0.5 * d as f64);

        for _ in 0..self.max_iter {
            let mut residual = scores(&x, &weights, &bias);
            softmax_rows(&mut residual);
            residual -= &targets;

            let grad_w = x.transpose() * &residual * inv_n + &weights * self.l2;
            let grad_b = residual.row_sum().transpose() * inv_n;

            weights -= &grad_w * step;
            bias -= &grad_b * step;

            if grad_w.amax().max(grad_b.amax()) < self.tolerance {
                break;
            }
        }

        Ok(LogisticModel { scaler, weights, bias })
    }
}

impl FittedModel for LogisticModel {
    fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let mut s = scores(&self.scaler.transform(features), &self.weights, &self.bias);
        softmax_rows(&mut s);
        s
    }

    fn parameter_count(&self) -> usize {
        self.scaler.parameter_count() + self.weights.len() + self.bias.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 1000.0, 0.0, -1000.0]);
        softmax_rows(&mut m);
        for row in m.row_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!(m[(1, 0)] > 0.999);
    }

    #[test]
    fn test_unknown_hyperparameter_rejected() {
        let config = ClassifierConfig::new("lr", ClassifierFamily::LogisticRegression).with_param("depth", 3.0);
        assert!(LogisticRegression::from_config(&config).is_err());
        let config = ClassifierConfig::new("lr", ClassifierFamily::LogisticRegression).with_param("max_iter", 0.0);
        assert!(LogisticRegression::from_config(&config).is_err());
    }
}
