//! Multiclass gradient boosting
//!
//! One shallow regression tree per class per round, fitted to the softmax
//! residuals `y - p`, with Newton-step leaf values
//! `(K-1)/K · Σr / Σ|r|(1-|r|)`.

use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleResult, ProbabilityKind};
use nalgebra::DMatrix;

use crate::adapter::{Estimator, FittedModel};
use crate::logistic::softmax_rows;
use crate::params::Params;
use crate::tree::{grow_regression_tree, GrowthLimits, Tree};

pub const PARAMS: &[&str] = &["n_estimators", "learning_rate", "max_depth", "min_samples_leaf"];

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for GradientBoosting {
    fn default() -> Self {
        Self { n_estimators: 50, learning_rate: 0.1, max_depth: 3, min_samples_leaf: 1 }
    }
}

impl GradientBoosting {
    pub fn from_config(config: &ClassifierConfig) -> EnsembleResult<Self> {
        let p = Params::new(config, PARAMS)?;
        let d = Self::default();
        Ok(Self {
            n_estimators: p.count("n_estimators", d.n_estimators, 1)?,
            learning_rate: p.positive("learning_rate", d.learning_rate)?,
            max_depth: p.count("max_depth", d.max_depth, 1)?,
            min_samples_leaf: p.count("min_samples_leaf", d.min_samples_leaf, 1)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BoostedModel {
    initial: Vec<f64>,
    /// rounds × classes
    rounds: Vec<Vec<Tree<f64>>>,
    learning_rate: f64,
    n_features: usize,
}

impl BoostedModel {
    fn raw_scores(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let n_classes = self.initial.len();
        let mut scores = DMatrix::from_fn(features.nrows(), n_classes, |_, c| self.initial[c]);
        for round in &self.rounds {
            for (c, tree) in round.iter().enumerate() {
                for r in 0..features.nrows() {
                    scores[(r, c)] += self.learning_rate * tree.leaf(features, r);
                }
            }
        }
        scores
    }
}

impl Estimator for GradientBoosting {
    type Model = BoostedModel;

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::GradientBoosting
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::Native
    }

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<BoostedModel> {
        let n = features.nrows();
        let k = n_classes as f64;
        let samples: Vec<usize> = (0..n).collect();
        let limits = GrowthLimits {
            max_depth: self.max_depth,
            min_samples_split: 2,
            min_samples_leaf: self.min_samples_leaf,
            max_features: None,
        };

        let initial: Vec<f64> = (0..n_classes)
            .map(|c| {
                let count = labels.iter().filter(|&&l| l == c).count() as f64;
                (count / n as f64).max(1e-6).ln()
            })
            .collect();
        let mut scores = DMatrix::from_fn(n, n_classes, |_, c| initial[c]);
        let mut rounds = Vec::with_capacity(self.n_estimators);

        for _ in 0..self.n_estimators {
            let mut probs = scores.clone();
            softmax_rows(&mut probs);

            let mut round = Vec::with_capacity(n_classes);
            for c in 0..n_classes {
                let residuals: Vec<f64> = (0..n)
                    .map(|r| f64::from(u8::from(labels[r] == c)) - probs[(r, c)])
                    .collect();
                let tree = grow_regression_tree(features, &residuals, &samples, limits, |leaf| {
                    let num: f64 = leaf.iter().map(|&i| residuals[i]).sum();
                    let den: f64 = leaf.iter().map(|&i| residuals[i].abs() * (1.0 - residuals[i].abs())).sum();
                    if den < 1e-12 { 0.0 } else { (k - 1.0) / k * num / den }
                });
                for r in 0..n {
                    scores[(r, c)] += self.learning_rate * tree.leaf(features, r);
                }
                round.push(tree);
            }
            rounds.push(round);
        }

        Ok(BoostedModel {
            initial,
            rounds,
            learning_rate: self.learning_rate,
            n_features: features.ncols(),
        })
    }
}

impl FittedModel for BoostedModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let mut scores = self.raw_scores(features);
        softmax_rows(&mut scores);
        scores
    }

    fn parameter_count(&self) -> usize {
        self.initial.len()
            + self
                .rounds
                .iter()
                .flatten()
                .map(|t| t.node_count() * 3)
                .sum::<usize>()
    }
}
