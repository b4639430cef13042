//! Combination rules over per-adapter votes for a single sample.

use ensemble_core::stats;

/// One adapter's vote, with the weight the active strategy assigns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ballot {
    /// Dense class index
    pub class: usize,
    pub confidence: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub class: usize,
    pub confidence: f64,
}

/// Mode of the votes. Confidence is the share of ballots backing it; ties
/// go to the lowest class index.
pub fn majority(ballots: &[Ballot], n_classes: usize) -> Decision {
    let mut counts = vec![0.0; n_classes];
    for b in ballots {
        counts[b.class] += 1.0;
    }
    let class = stats::argmax(&counts);
    Decision {
        class,
        confidence: counts[class] / ballots.len().max(1) as f64,
    }
}

/// Accumulate `weight × confidence` per class, normalise, take the argmax.
///
/// When every product is zero there is nothing to normalise and the plain
/// majority decides.
pub fn weighted(ballots: &[Ballot], n_classes: usize) -> Decision {
    let mut scores = vec![0.0; n_classes];
    for b in ballots {
        scores[b.class] += b.weight * b.confidence;
    }
    let total: f64 = scores.iter().sum();
    if total <= 0.0 {
        return majority(ballots, n_classes);
    }
    let class = stats::argmax(&scores);
    Decision { class, confidence: scores[class] / total }
}

/// Adaptive weight: recent performance floored at 0.1.
pub fn adaptive_weight(recent_performance: f64) -> f64 {
    recent_performance.max(0.1)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteSpread {
    pub agreement: f64,
    pub average_confidence: f64,
    pub confidence_variance: f64,
}

/// Agreement with the majority class and the spread of confidences.
pub fn spread(ballots: &[Ballot], n_classes: usize) -> VoteSpread {
    let confidences: Vec<f64> = ballots.iter().map(|b| b.confidence).collect();
    VoteSpread {
        agreement: majority(ballots, n_classes).confidence,
        average_confidence: stats::mean(&confidences),
        confidence_variance: stats::variance(&confidences),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(class: usize, confidence: f64, weight: f64) -> Ballot {
        Ballot { class, confidence, weight }
    }

    #[test]
    fn test_majority_two_of_three() {
        let ballots = [ballot(0, 0.6, 1.0), ballot(0, 0.7, 1.0), ballot(1, 0.99, 1.0)];
        let d = majority(&ballots, 2);
        assert_eq!(d.class, 0);
        assert!((d.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_majority_tie_goes_to_lowest_class() {
        let ballots = [ballot(2, 0.9, 1.0), ballot(1, 0.9, 1.0)];
        assert_eq!(majority(&ballots, 3).class, 1);
    }

    #[test]
    fn test_weighted_prefers_heavier_adapter() {
        let ballots = [ballot(1, 0.9, 2.0), ballot(0, 0.9, 1.0)];
        let d = weighted(&ballots, 2);
        assert_eq!(d.class, 1);
        assert!((d.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_weighting_with_unit_weights() {
        let ballots = [ballot(0, 0.55, 1.0), ballot(0, 0.55, 1.0), ballot(1, 0.99, 1.0), ballot(1, 0.2, 1.0)];
        // 1.10 vs 1.19
        assert_eq!(weighted(&ballots, 2).class, 1);
    }

    #[test]
    fn test_all_zero_scores_fall_back_to_majority() {
        let ballots = [ballot(1, 0.0, 1.0), ballot(1, 0.0, 1.0), ballot(0, 0.0, 1.0)];
        let d = weighted(&ballots, 2);
        assert_eq!(d.class, 1);
    }

    #[test]
    fn test_adaptive_weight_floor() {
        assert_eq!(adaptive_weight(0.0), 0.1);
        assert_eq!(adaptive_weight(0.8), 0.8);
    }

    #[test]
    fn test_spread() {
        let ballots = [ballot(0, 0.5, 1.0), ballot(0, 0.7, 1.0), ballot(1, 0.9, 1.0), ballot(0, 0.5, 1.0)];
        let s = spread(&ballots, 2);
        assert!((s.agreement - 0.75).abs() < 1e-12);
        assert!((s.average_confidence - 0.65).abs() < 1e-12);
        // deviations -0.15, 0.05, 0.25, -0.15
        assert!((s.confidence_variance - (0.0225 + 0.0025 + 0.0625 + 0.0225) / 4.0).abs() < 1e-12);
    }
}
