use ensemble_core::stats::EPSILON;
use nalgebra::DMatrix;

/// Column-wise z-score transform fitted on training data.
#[derive(Debug, Clone)]
pub struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    pub fn fit(features: &DMatrix<f64>) -> Self {
        let n = features.nrows().max(1) as f64;
        let (means, scales) = features
            .column_iter()
            .map(|col| {
                let mean = col.sum() / n;
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (mean, var.sqrt().max(EPSILON))
            })
            .unzip();
        Self { means, scales }
    }

    pub fn transform(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(features.nrows(), features.ncols(), |r, c| {
            (features[(r, c)] - self.means[c]) / self.scales[c]
        })
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.means.len() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardizer_centers_and_scales() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 10.0, 2.0, 10.0, 3.0, 10.0, 4.0, 10.0]);
        let scaler = Standardizer::fit(&x);
        let z = scaler.transform(&x);
        let col0: Vec<f64> = z.column(0).iter().copied().collect();
        assert!(col0.iter().sum::<f64>().abs() < 1e-12);
        assert!((col0.iter().map(|v| v * v).sum::<f64>() / 4.0 - 1.0).abs() < 1e-12);
        // Constant column maps to zero rather than NaN
        assert!(z.column(1).iter().all(|v| *v == 0.0));
    }
}
