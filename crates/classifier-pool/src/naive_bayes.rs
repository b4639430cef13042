use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleError, EnsembleResult, ProbabilityKind};
use nalgebra::DMatrix;
use statrs::distribution::{Continuous, Normal};

use crate::adapter::{Estimator, FittedModel};
use crate::params::Params;

pub const PARAMS: &[&str] = &["var_smoothing"];

/// Gaussian naive Bayes with per-class feature likelihoods.
#[derive(Debug, Clone)]
pub struct NaiveBayes {
    /// Fraction of the largest feature variance added to every variance
    pub var_smoothing: f64,
}

impl Default for NaiveBayes {
    fn default() -> Self {
        Self { var_smoothing: 1e-9 }
    }
}

impl NaiveBayes {
    pub fn from_config(config: &ClassifierConfig) -> EnsembleResult<Self> {
        let p = Params::new(config, PARAMS)?;
        Ok(Self { var_smoothing: p.positive("var_smoothing", Self::default().var_smoothing)? })
    }
}

#[derive(Debug, Clone)]
pub struct NaiveBayesModel {
    log_priors: Vec<f64>,
    /// classes × features
    likelihoods: Vec<Vec<Normal>>,
}

impl Estimator for NaiveBayes {
    type Model = NaiveBayesModel;

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::NaiveBayes
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::Native
    }

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<NaiveBayesModel> {
        let (n, d) = features.shape();
        let max_var = features
            .column_iter()
            .map(|col| col.variance())
            .fold(0.0f64, f64::max);
        let smoothing = (self.var_smoothing * max_var).max(f64::MIN_POSITIVE);

        let mut log_priors = Vec::with_capacity(n_classes);
        let mut likelihoods = Vec::with_capacity(n_classes);
        for class in 0..n_classes {
            let rows: Vec<usize> = (0..n).filter(|&r| labels[r] == class).collect();
            // Absent classes get a vanishing prior rather than -inf
            let count = rows.len().max(1) as f64;
            log_priors.push((rows.len() as f64 / n as f64).max(f64::MIN_POSITIVE).ln());

            let per_feature = (0..d)
                .map(|c| {
                    let mean = rows.iter().map(|&r| features[(r, c)]).sum::<f64>() / count;
                    let var = rows.iter().map(|&r| (features[(r, c)] - mean).powi(2)).sum::<f64>() / count;
                    Normal::new(mean, (var + smoothing).sqrt())
                        .map_err(|e| EnsembleError::InvalidInput(format!("naive bayes likelihood: {}", e)))
                })
                .collect::<EnsembleResult<Vec<_>>>()?;
            likelihoods.push(per_feature);
        }

        Ok(NaiveBayesModel { log_priors, likelihoods })
    }
}

impl FittedModel for NaiveBayesModel {
    fn n_features(&self) -> usize {
        self.likelihoods.first().map(Vec::len).unwrap_or(0)
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let n_classes = self.log_priors.len();
        let mut out = DMatrix::zeros(features.nrows(), n_classes);
        for (r, row) in features.row_iter().enumerate() {
            let joint: Vec<f64> = self
                .likelihoods
                .iter()
                .zip(&self.log_priors)
                .map(|(dists, prior)| prior + dists.iter().zip(row.iter()).map(|(n, x)| n.ln_pdf(*x)).sum::<f64>())
                .collect();
            for (c, p) in ensemble_core::stats::softmax(&joint).into_iter().enumerate() {
                out[(r, c)] = p;
            }
        }
        out
    }

    fn parameter_count(&self) -> usize {
        self.log_priors.len() * (1 + 2 * self.n_features())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_feature_does_not_break_fit() {
        let x = DMatrix::from_row_slice(4, 2, &[0.0, 1.0, 0.2, 1.0, 5.0, 1.0, 5.2, 1.0]);
        let model = NaiveBayes::default().fit(&x, &[0, 0, 1, 1], 2).unwrap();
        let probs = model.predict_proba(&DMatrix::from_row_slice(1, 2, &[5.1, 1.0]));
        assert!(probs[(0, 1)] > 0.99);
    }
}
