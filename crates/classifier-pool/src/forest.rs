//! Random forest: bagged CART trees with per-split feature subsampling.
//!
//! Tree `i` draws its bootstrap and feature subsets from `seed + i`, so the
//! fitted forest is identical no matter how rayon schedules the trees.

use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleResult, ProbabilityKind};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::adapter::{Estimator, FittedModel};
use crate::params::Params;
use crate::tree::{grow_classification_tree, GrowthLimits, Tree};

pub const PARAMS: &[&str] = &["n_trees", "max_depth", "min_samples_leaf", "max_features", "seed"];

#[derive(Debug, Clone)]
pub struct RandomForest {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// `None` uses `sqrt(n_features)`
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self { n_trees: 50, max_depth: 10, min_samples_leaf: 1, max_features: None, seed: 42 }
    }
}

impl RandomForest {
    pub fn from_config(config: &ClassifierConfig) -> EnsembleResult<Self> {
        let p = Params::new(config, PARAMS)?;
        let d = Self::default();
        let max_features = if config.hyperparameters().contains_key("max_features") {
            Some(p.count("max_features", 1, 1)?)
        } else {
            None
        };
        Ok(Self {
            n_trees: p.count("n_trees", d.n_trees, 1)?,
            max_depth: p.count("max_depth", d.max_depth, 1)?,
            min_samples_leaf: p.count("min_samples_leaf", d.min_samples_leaf, 1)?,
            max_features,
            seed: p.seed(d.seed)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ForestModel {
    trees: Vec<Tree<Vec<f64>>>,
    n_features: usize,
    n_classes: usize,
}

impl Estimator for RandomForest {
    type Model = ForestModel;

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::RandomForest
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::Native
    }

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<ForestModel> {
        let (n, d) = features.shape();
        let max_features = self
            .max_features
            .unwrap_or_else(|| (d as f64).sqrt().round() as usize)
            .clamp(1, d);
        let limits = GrowthLimits {
            max_depth: self.max_depth,
            min_samples_split: 2,
            min_samples_leaf: self.min_samples_leaf,
            max_features: Some(max_features),
        };

        let trees = (0..self.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                grow_classification_tree(features, labels, n_classes, &bootstrap, limits, Some(&mut rng))
            })
            .collect();

        Ok(ForestModel { trees, n_features: d, n_classes })
    }
}

impl FittedModel for ForestModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(features.nrows(), self.n_classes);
        let scale = 1.0 / self.trees.len().max(1) as f64;
        for r in 0..features.nrows() {
            for tree in &self.trees {
                for (c, p) in tree.leaf(features, r).iter().enumerate() {
                    out[(r, c)] += p * scale;
                }
            }
        }
        out
    }

    fn parameter_count(&self) -> usize {
        self.trees
            .iter()
            .map(|t| t.node_count() * self.n_classes.max(3))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_forest() {
        let x = DMatrix::from_fn(40, 3, |r, c| ((r * 7 + c * 13) % 17) as f64);
        let labels: Vec<usize> = (0..40).map(|r| usize::from(r % 17 > 8)).collect();
        let forest = RandomForest { n_trees: 8, ..Default::default() };
        let a = forest.fit(&x, &labels, 2).unwrap().predict_proba(&x);
        let b = forest.fit(&x, &labels, 2).unwrap().predict_proba(&x);
        assert_eq!(a, b);
    }
}
