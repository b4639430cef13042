//! Univariate feature selection by one-way ANOVA F-score.

use ensemble_core::stats::EPSILON;
use ensemble_core::{EnsembleError, EnsembleResult};
use nalgebra::DMatrix;

/// Column subset chosen at training time and replayed at inference.
#[derive(Debug, Clone)]
pub struct FeatureSelector {
    input_len: usize,
    /// Kept columns, ascending
    indices: Vec<usize>,
    scores: Vec<f64>,
}

/// F = (between-class SS / (K-1)) / (within-class SS / (n-K)).
///
/// A feature constant within every class but different between classes
/// scores +inf; a constant feature scores 0.
pub fn anova_f_scores(x: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> Vec<f64> {
    let n = x.nrows();
    let mut counts = vec![0usize; n_classes];
    labels.iter().for_each(|&l| counts[l] += 1);
    let groups = counts.iter().filter(|&&c| c > 0).count();

    x.column_iter()
        .map(|col| {
            let grand = col.sum() / n as f64;
            let mut sums = vec![0.0; n_classes];
            for (v, &l) in col.iter().zip(labels) {
                sums[l] += v;
            }
            let means: Vec<f64> = sums
                .iter()
                .zip(&counts)
                .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
                .collect();
            let between: f64 = means
                .iter()
                .zip(&counts)
                .map(|(m, &c)| c as f64 * (m - grand).powi(2))
                .sum();
            let within: f64 = col.iter().zip(labels).map(|(v, &l)| (v - means[l]).powi(2)).sum();

            let df_between = groups.saturating_sub(1).max(1) as f64;
            let df_within = n.saturating_sub(groups).max(1) as f64;
            if within < EPSILON {
                if between < EPSILON { 0.0 } else { f64::INFINITY }
            } else {
                (between / df_between) / (within / df_within)
            }
        })
        .collect()
}

impl FeatureSelector {
    /// Keep the `k` best-scoring columns; ties go to the lower column index.
    pub fn fit(x: &DMatrix<f64>, labels: &[usize], n_classes: usize, k: usize) -> EnsembleResult<Self> {
        if k == 0 {
            return Err(EnsembleError::config("feature selection needs k >= 1"));
        }
        let scores = anova_f_scores(x, labels, n_classes);
        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let mut indices: Vec<usize> = ranked.into_iter().take(k).collect();
        indices.sort_unstable();
        Ok(Self { input_len: x.ncols(), indices, scores })
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> EnsembleResult<DMatrix<f64>> {
        if x.ncols() != self.input_len {
            return Err(EnsembleError::FeatureLengthMismatch { expected: self.input_len, actual: x.ncols() });
        }
        Ok(x.select_columns(&self.indices))
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }
}
