use std::collections::BTreeMap;

use dashmap::DashMap;

/// Recent-performance score assumed for an adapter with no feedback yet.
pub const INITIAL_PERFORMANCE: f64 = 1.0;

/// Per-adapter exponentially weighted moving average of correctness,
/// `p ← (1 - α)·p + α·correct`, used by adaptive weighting.
///
/// Written only through explicit feedback; prediction never updates it.
#[derive(Debug)]
pub struct PerformanceTracker {
    alpha: f64,
    scores: DashMap<String, f64>,
}

impl PerformanceTracker {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, scores: DashMap::new() }
    }

    pub fn recent_performance(&self, adapter: &str) -> f64 {
        self.scores.get(adapter).map(|v| *v).unwrap_or(INITIAL_PERFORMANCE)
    }

    pub fn record(&self, adapter: &str, correct: bool) {
        let outcome = if correct { 1.0 } else { 0.0 };
        let alpha = self.alpha;
        self.scores
            .entry(adapter.to_string())
            .and_modify(|p| *p = (1.0 - alpha) * *p + alpha * outcome)
            .or_insert((1.0 - alpha) * INITIAL_PERFORMANCE + alpha * outcome);
    }

    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.scores.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }

    pub fn reset(&self) {
        self.scores.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_adapter_starts_at_one() {
        let tracker = PerformanceTracker::new(0.1);
        assert_eq!(tracker.recent_performance("rf"), 1.0);
    }

    #[test]
    fn test_ewma_update() {
        let tracker = PerformanceTracker::new(0.5);
        tracker.record("rf", false);
        assert!((tracker.recent_performance("rf") - 0.5).abs() < 1e-12);
        tracker.record("rf", false);
        assert!((tracker.recent_performance("rf") - 0.25).abs() < 1e-12);
        tracker.record("rf", true);
        assert!((tracker.recent_performance("rf") - 0.625).abs() < 1e-12);
        assert_eq!(tracker.snapshot().len(), 1);
        tracker.reset();
        assert_eq!(tracker.recent_performance("rf"), 1.0);
    }
}
