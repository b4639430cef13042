//! Descriptive statistics shared by the conditioning, feature and voting code.
//!
//! All functions are total: empty or zero-variance inputs return 0.0 rather
//! than NaN so downstream feature vectors stay finite.

use statrs::statistics::Statistics;

/// Smallest denominator used anywhere a variance or norm is divided by.
pub const EPSILON: f64 = 1e-10;

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().mean()
}

/// Population variance (divides by n).
pub fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().population_variance()
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// Sample skewness (third standardized moment). Zero for flat data.
pub fn skewness(data: &[f64]) -> f64 {
    let sd = std_dev(data);
    if sd < EPSILON {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| ((x - m) / sd).powi(3)).sum::<f64>() / data.len() as f64
}

/// Excess kurtosis (fourth standardized moment minus 3). Zero for flat data.
pub fn kurtosis(data: &[f64]) -> f64 {
    let sd = std_dev(data);
    if sd < EPSILON {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| ((x - m) / sd).powi(4)).sum::<f64>() / data.len() as f64 - 3.0
}

pub fn mean_abs(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|x| x.abs()).sum::<f64>() / data.len() as f64
}

pub fn peak_to_peak(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    max - min
}

/// Index of the largest value; ties resolve to the lowest index.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Numerically stable softmax.
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Logistic squashing of a decision score into (0, 1).
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}
