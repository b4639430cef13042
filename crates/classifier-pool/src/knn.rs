use ensemble_core::stats::EPSILON;
use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleResult, ProbabilityKind};
use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::adapter::{Estimator, FittedModel};
use crate::params::Params;
use crate::scaler::Standardizer;

pub const PARAMS: &[&str] = &["k", "distance_weighted"];

/// k-nearest-neighbours vote on standardized features.
#[derive(Debug, Clone)]
pub struct KNearestNeighbors {
    pub k: usize,
    /// Weight each neighbour by inverse distance instead of uniformly
    pub distance_weighted: bool,
}

impl Default for KNearestNeighbors {
    fn default() -> Self {
        Self { k: 5, distance_weighted: true }
    }
}

impl KNearestNeighbors {
    pub fn from_config(config: &ClassifierConfig) -> EnsembleResult<Self> {
        let p = Params::new(config, PARAMS)?;
        let d = Self::default();
        Ok(Self {
            k: p.count("k", d.k, 1)?,
            distance_weighted: p.flag("distance_weighted", d.distance_weighted)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KnnModel {
    scaler: Standardizer,
    /// Standardized training rows
    points: Vec<Vec<f64>>,
    labels: Vec<usize>,
    n_classes: usize,
    k: usize,
    distance_weighted: bool,
}

impl Estimator for KNearestNeighbors {
    type Model = KnnModel;

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::KNearestNeighbors
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::Native
    }

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<KnnModel> {
        let scaler = Standardizer::fit(features);
        let x = scaler.transform(features);
        let points = x.row_iter().map(|r| r.iter().copied().collect()).collect();
        Ok(KnnModel {
            scaler,
            points,
            labels: labels.to_vec(),
            n_classes,
            k: self.k.min(labels.len()),
            distance_weighted: self.distance_weighted,
        })
    }
}

impl KnnModel {
    fn vote(&self, query: &[f64]) -> Vec<f64> {
        let mut neighbours: Vec<(f64, usize)> = self
            .points
            .iter()
            .zip(&self.labels)
            .map(|(p, &label)| {
                let dist = p.iter().zip(query).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
                (dist, label)
            })
            .collect();
        neighbours.select_nth_unstable_by(self.k - 1, |a, b| a.0.total_cmp(&b.0));

        let mut votes = vec![0.0; self.n_classes];
        for &(dist, label) in &neighbours[..self.k] {
            votes[label] += if self.distance_weighted { 1.0 / (dist + EPSILON) } else { 1.0 };
        }
        let total: f64 = votes.iter().sum();
        votes.iter_mut().for_each(|v| *v /= total);
        votes
    }
}

impl FittedModel for KnnModel {
    fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let x = self.scaler.transform(features);
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|r| {
                let query: Vec<f64> = x.row(r).iter().copied().collect();
                self.vote(&query)
            })
            .collect();
        DMatrix::from_fn(rows.len(), self.n_classes, |r, c| rows[r][c])
    }

    fn parameter_count(&self) -> usize {
        self.scaler.parameter_count() + self.points.len() * (self.scaler.n_features() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_prefers_closer_neighbours() {
        let x = DMatrix::from_row_slice(4, 1, &[0.0, 0.1, 1.0, 1.1]);
        let knn = KNearestNeighbors { k: 3, distance_weighted: true };
        let model = knn.fit(&x, &[0, 0, 1, 1], 2).unwrap();
        let probs = model.predict_proba(&DMatrix::from_row_slice(1, 1, &[0.05]));
        assert!(probs[(0, 0)] > probs[(0, 1)]);
        assert!((probs.row(0).sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_k_is_capped_by_training_size() {
        let x = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let model = KNearestNeighbors { k: 10, distance_weighted: false }.fit(&x, &[0, 1], 2).unwrap();
        let probs = model.predict_proba(&x);
        assert!((probs[(0, 0)] - 0.5).abs() < 1e-12);
    }
}
