//! Support vector machine, one-vs-rest
//!
//! Each class gets a soft-margin hinge-loss separator trained by full-batch
//! subgradient descent with a decaying step. The RBF kernel is approximated
//! with seeded random Fourier features, so training stays linear in the
//! sample count. Probabilities are a softmax over decision scores.

use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleError, EnsembleResult, ProbabilityKind};
use nalgebra::{DMatrix, DVector};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;

use crate::adapter::{Estimator, FittedModel};
use crate::logistic::softmax_rows;
use crate::params::Params;
use crate::scaler::Standardizer;

pub const PARAMS: &[&str] = &["c", "max_iter", "learning_rate", "rbf_components", "gamma", "seed"];

#[derive(Debug, Clone)]
pub struct SupportVectorMachine {
    /// Inverse regularisation strength
    pub c: f64,
    pub max_iter: usize,
    pub learning_rate: f64,
    /// 0 selects the linear kernel
    pub rbf_components: usize,
    /// RBF width; `None` means `1 / n_features`
    pub gamma: Option<f64>,
    pub seed: u64,
}

impl Default for SupportVectorMachine {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 200,
            learning_rate: 1.0,
            rbf_components: 0,
            gamma: None,
            seed: 42,
        }
    }
}

impl SupportVectorMachine {
    pub fn from_config(config: &ClassifierConfig) -> EnsembleResult<Self> {
        let p = Params::new(config, PARAMS)?;
        let d = Self::default();
        let gamma = if config.hyperparameters().contains_key("gamma") {
            Some(p.positive("gamma", 1.0)?)
        } else {
            None
        };
        Ok(Self {
            c: p.positive("c", d.c)?,
            max_iter: p.count("max_iter", d.max_iter, 1)?,
            learning_rate: p.positive("learning_rate", d.learning_rate)?,
            rbf_components: p.count("rbf_components", d.rbf_components, 0)?,
            gamma,
            seed: p.seed(d.seed)?,
        })
    }
}

/// Random Fourier feature map approximating an RBF kernel:
/// `z(x) = sqrt(2/D) cos(Ωx + β)`, `Ω ~ N(0, 2γ)`, `β ~ U(0, 2π)`.
#[derive(Debug, Clone)]
struct FourierMap {
    /// components × inputs
    omega: DMatrix<f64>,
    phase: DVector<f64>,
}

impl FourierMap {
    fn sample(inputs: usize, components: usize, gamma: f64, seed: u64) -> EnsembleResult<Self> {
        let normal = Normal::new(0.0, (2.0 * gamma).sqrt())
            .map_err(|e| EnsembleError::config(format!("invalid RBF gamma {}: {}", gamma, e)))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let omega = DMatrix::from_fn(components, inputs, |_, _| normal.sample(&mut rng));
        let phase = DVector::from_fn(components, |_, _| rng.gen_range(0.0..std::f64::consts::TAU));
        Ok(Self { omega, phase })
    }

    fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let scale = (2.0 / self.phase.len() as f64).sqrt();
        let mut z = x * self.omega.transpose();
        for mut row in z.row_iter_mut() {
            for (v, b) in row.iter_mut().zip(self.phase.iter()) {
                *v = scale * (*v + b).cos();
            }
        }
        z
    }
}

#[derive(Debug, Clone)]
pub struct SvmModel {
    scaler: Standardizer,
    kernel: Option<FourierMap>,
    /// design columns × classes
    weights: DMatrix<f64>,
    bias: DVector<f64>,
}

impl SvmModel {
    fn design(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let x = self.scaler.transform(features);
        match &self.kernel {
            Some(map) => map.transform(&x),
            None => x,
        }
    }

    /// Raw one-vs-rest decision values, samples × classes.
    pub fn decision_function(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let mut s = self.design(features) * &self.weights;
        for mut row in s.row_iter_mut() {
            row += self.bias.transpose();
        }
        s
    }
}

impl Estimator for SupportVectorMachine {
    type Model = SvmModel;

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::SupportVectorMachine
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::ApproximateFromScore
    }

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<SvmModel> {
        let scaler = Standardizer::fit(features);
        let standardized = scaler.transform(features);
        let kernel = if self.rbf_components > 0 {
            let gamma = self.gamma.unwrap_or(1.0 / features.ncols() as f64);
            Some(FourierMap::sample(features.ncols(), self.rbf_components, gamma, self.seed)?)
        } else {
            None
        };
        let x = match &kernel {
            Some(map) => map.transform(&standardized),
            None => standardized,
        };
        let (n, d) = x.shape();
        let lambda = 1.0 / (self.c * n as f64);
        let mean_sq_norm = x.row_iter().map(|r| r.norm_squared()).sum::<f64>() / n as f64;
        let base_step = self.learning_rate / (1.0 + mean_sq_norm);

        let mut weights = DMatrix::zeros(d, n_classes);
        let mut bias = DVector::zeros(n_classes);

        for class in 0..n_classes {
            let y: Vec<f64> = labels.iter().map(|&l| if l == class { 1.0 } else { -1.0 }).collect();
            let mut w = DVector::<f64>::zeros(d);
            let mut b = 0.0;

            for t in 1..=self.max_iter {
                let margins = &x * &w;
                let mut grad_w = &w * lambda;
                let mut grad_b = 0.0;
                for (i, yi) in y.iter().enumerate() {
                    if yi * (margins[i] + b) < 1.0 {
                        grad_w -= x.row(i).transpose() * (yi / n as f64);
                        grad_b -= yi / n as f64;
                    }
                }
                let step = base_step / (t as f64).sqrt();
                w -= grad_w * step;
                b -= grad_b * step;
            }

            weights.set_column(class, &w);
            bias[class] = b;
        }

        Ok(SvmModel { scaler, kernel, weights, bias })
    }
}

impl FittedModel for SvmModel {
    fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let mut s = self.decision_function(features);
        softmax_rows(&mut s);
        s
    }

    fn parameter_count(&self) -> usize {
        let kernel = self
            .kernel
            .as_ref()
            .map(|k| k.omega.len() + k.phase.len())
            .unwrap_or(0);
        self.scaler.parameter_count() + kernel + self.weights.len() + self.bias.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourier_map_is_seeded() {
        let a = FourierMap::sample(3, 16, 0.5, 7).unwrap();
        let b = FourierMap::sample(3, 16, 0.5, 7).unwrap();
        assert_eq!(a.omega, b.omega);
        let x = DMatrix::from_row_slice(1, 3, &[0.1, -0.2, 0.3]);
        let z = a.transform(&x);
        assert_eq!(z.ncols(), 16);
        // Each component is bounded by sqrt(2/D)
        assert!(z.iter().all(|v| v.abs() <= (2.0f64 / 16.0).sqrt() + 1e-12));
    }

    #[test]
    fn test_gamma_must_be_positive() {
        let config = ClassifierConfig::new("svm", ClassifierFamily::SupportVectorMachine).with_param("gamma", 0.0);
        assert!(SupportVectorMachine::from_config(&config).is_err());
        let config = ClassifierConfig::new("svm", ClassifierFamily::SupportVectorMachine)
            .with_param("rbf_components", 64.0)
            .with_param("gamma", 0.1);
        let svm = SupportVectorMachine::from_config(&config).unwrap();
        assert_eq!(svm.rbf_components, 64);
        assert_eq!(svm.gamma, Some(0.1));
    }
}
