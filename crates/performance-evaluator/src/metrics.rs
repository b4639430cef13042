//! Holdout classification metrics over dense class indices.

use serde::{Deserialize, Serialize};

/// Rows are true classes, columns predicted classes.
pub fn confusion_matrix(actual: &[usize], predicted: &[usize], n_classes: usize) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; n_classes]; n_classes];
    for (&a, &p) in actual.iter().zip(predicted) {
        if a < n_classes && p < n_classes {
            matrix[a][p] += 1;
        }
    }
    matrix
}

pub fn accuracy(matrix: &[Vec<usize>]) -> f64 {
    let total: usize = matrix.iter().flatten().sum();
    if total == 0 {
        return 0.0;
    }
    let hits: usize = (0..matrix.len()).map(|i| matrix[i][i]).sum();
    hits as f64 / total as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Support-weighted precision, recall and F1.
///
/// A class never predicted has precision 0, and F1 is 0 whenever
/// precision + recall is 0.
pub fn weighted_scores(matrix: &[Vec<usize>]) -> WeightedScores {
    let n = matrix.len();
    let total: usize = matrix.iter().flatten().sum();
    if total == 0 {
        return WeightedScores { precision: 0.0, recall: 0.0, f1: 0.0 };
    }

    let mut scores = WeightedScores { precision: 0.0, recall: 0.0, f1: 0.0 };
    for c in 0..n {
        let support: usize = matrix[c].iter().sum();
        if support == 0 {
            continue;
        }
        let tp = matrix[c][c] as f64;
        let predicted: usize = (0..n).map(|r| matrix[r][c]).sum();
        let precision = if predicted > 0 { tp / predicted as f64 } else { 0.0 };
        let recall = tp / support as f64;
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let share = support as f64 / total as f64;
        scores.precision += share * precision;
        scores.recall += share * recall;
        scores.f1 += share * f1;
    }
    scores
}

/// Rank-based ROC AUC (Mann-Whitney U) with tied scores sharing their
/// average rank.
///
/// `None` when either class is absent, since the curve is undefined then.
pub fn binary_auc(scores: &[f64], positives: &[bool]) -> Option<f64> {
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; ties get the mean of i+1..=j+1
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if positives[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let u = rank_sum_pos - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_and_accuracy() {
        let m = confusion_matrix(&[0, 0, 1, 1, 2], &[0, 1, 1, 1, 0], 3);
        assert_eq!(m, vec![vec![1, 1, 0], vec![0, 2, 0], vec![1, 0, 0]]);
        assert!((accuracy(&m) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_scores() {
        // Class 0: P = 1/2, R = 1/2; class 1: P = 2/3, R = 1; class 2: never right
        let m = confusion_matrix(&[0, 0, 1, 1, 2], &[0, 1, 1, 1, 0], 3);
        let s = weighted_scores(&m);
        let expected_p = 0.4 * 0.5 + 0.4 * (2.0 / 3.0);
        let expected_r = 0.4 * 0.5 + 0.4 * 1.0;
        let expected_f1 = 0.4 * 0.5 + 0.4 * 0.8;
        assert!((s.precision - expected_p).abs() < 1e-12);
        assert!((s.recall - expected_r).abs() < 1e-12);
        assert!((s.f1 - expected_f1).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_predictions() {
        let m = confusion_matrix(&[0, 1, 1, 0], &[0, 1, 1, 0], 2);
        let s = weighted_scores(&m);
        assert_eq!(accuracy(&m), 1.0);
        assert_eq!((s.precision, s.recall, s.f1), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_auc_separable_and_inverted() {
        let positives = [false, false, true, true];
        assert_eq!(binary_auc(&[0.1, 0.2, 0.8, 0.9], &positives), Some(1.0));
        assert_eq!(binary_auc(&[0.9, 0.8, 0.2, 0.1], &positives), Some(0.0));
    }

    #[test]
    fn test_auc_ties_count_half() {
        assert_eq!(binary_auc(&[0.5, 0.5], &[false, true]), Some(0.5));
        // Three clean pairs and one tie out of four
        let auc = binary_auc(&[0.2, 0.5, 0.5, 0.9], &[false, false, true, true]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_undefined_with_one_class() {
        assert_eq!(binary_auc(&[0.3, 0.7], &[true, true]), None);
        assert_eq!(binary_auc(&[], &[]), None);
    }
}
