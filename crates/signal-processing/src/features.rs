//! Fixed-shape feature extraction from conditioned trials
//!
//! Layout, channel-major: for each channel, for each band, `[ln mean band
//! power, ln variance of segment band power]`; then five whole-trial
//! statistics. Length is `channels × bands × 2 + 5` regardless of content.

use ensemble_core::stats::{self, EPSILON};
use ensemble_core::{EnsembleError, EnsembleResult, FeatureVector, Trial};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::spectral::WelchEstimator;

/// Number of whole-trial statistics appended after the band features.
pub const GLOBAL_STAT_COUNT: usize = 5;

/// Values emitted per (channel, band) pair.
pub const VALUES_PER_BAND: usize = 2;

const GLOBAL_STAT_NAMES: [&str; GLOBAL_STAT_COUNT] =
    ["variance", "skewness", "kurtosis", "mean_abs", "peak_to_peak"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub name: String,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FrequencyBand {
    pub fn new(name: impl Into<String>, low_hz: f64, high_hz: f64) -> Self {
        Self { name: name.into(), low_hz, high_hz }
    }
}

/// Delta, theta, alpha, beta, gamma
pub fn canonical_bands() -> Vec<FrequencyBand> {
    vec![
        FrequencyBand::new("delta", 0.5, 4.0),
        FrequencyBand::new("theta", 4.0, 8.0),
        FrequencyBand::new("alpha", 8.0, 13.0),
        FrequencyBand::new("beta", 13.0, 30.0),
        FrequencyBand::new("gamma", 30.0, 45.0),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub bands: Vec<FrequencyBand>,
    /// Welch segment length in seconds (clipped to the trial length)
    pub segment_seconds: f64,
    /// Fraction of overlap between consecutive Welch segments
    pub overlap: f64,
    /// Floor substituted for zero power before taking logs
    pub epsilon: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            bands: canonical_bands(),
            segment_seconds: 2.0,
            overlap: 0.5,
            epsilon: EPSILON,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> EnsembleResult<Self> {
        if config.bands.is_empty() {
            return Err(EnsembleError::config("at least one frequency band is required"));
        }
        for band in &config.bands {
            if !(band.low_hz >= 0.0 && band.low_hz < band.high_hz) {
                return Err(EnsembleError::config(format!(
                    "band '{}' has invalid edges {}..{} Hz",
                    band.name, band.low_hz, band.high_hz
                )));
            }
        }
        let mut sorted: Vec<&FrequencyBand> = config.bands.iter().collect();
        sorted.sort_by(|a, b| a.low_hz.total_cmp(&b.low_hz));
        for pair in sorted.windows(2) {
            if pair[1].low_hz < pair[0].high_hz {
                return Err(EnsembleError::config(format!(
                    "bands '{}' and '{}' overlap",
                    pair[0].name, pair[1].name
                )));
            }
        }
        if !(config.segment_seconds > 0.0) || !(0.0..0.95).contains(&config.overlap) {
            return Err(EnsembleError::config("Welch segment length must be positive and overlap in [0, 0.95)"));
        }
        if !(config.epsilon > 0.0) {
            return Err(EnsembleError::config("feature epsilon must be positive"));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn band_count(&self) -> usize {
        self.config.bands.len()
    }

    /// Output length for a trial with `channels` channels.
    pub fn feature_len(&self, channels: usize) -> usize {
        channels * self.band_count() * VALUES_PER_BAND + GLOBAL_STAT_COUNT
    }

    /// Column names matching the extraction layout.
    pub fn feature_names(&self, channels: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(self.feature_len(channels));
        for ch in 0..channels {
            for band in &self.config.bands {
                names.push(format!("ch{}_{}_log_power", ch, band.name));
                names.push(format!("ch{}_{}_log_power_var", ch, band.name));
            }
        }
        names.extend(GLOBAL_STAT_NAMES.iter().map(|s| s.to_string()));
        names
    }

    /// Extract the feature vector of one conditioned trial.
    ///
    /// Flat channels contribute the epsilon floor for every band value. A
    /// trial where every channel is flat fails with `DegenerateSignal`.
    pub fn extract(&self, conditioned_trial: &Trial) -> EnsembleResult<FeatureVector> {
        let eps = self.config.epsilon;
        let fs = conditioned_trial.sample_rate();
        let seg_len = (self.config.segment_seconds * fs).round() as usize;
        let welch = WelchEstimator::new(seg_len, self.config.overlap);
        let floor = eps.ln();

        let mut values = Vec::with_capacity(self.feature_len(conditioned_trial.channel_count()));
        let mut live_channels = 0;

        for channel in conditioned_trial.channels() {
            if stats::variance(channel) < eps {
                values.extend(std::iter::repeat(floor).take(self.band_count() * VALUES_PER_BAND));
                continue;
            }
            live_channels += 1;

            let psd = welch.estimate(channel, fs);
            for band in &self.config.bands {
                let power = psd.band_power(band.low_hz, band.high_hz);
                let dispersion = stats::variance(&psd.segment_band_powers(band.low_hz, band.high_hz));
                values.push(safe_ln(power, eps));
                values.push(safe_ln(dispersion, eps));
            }
        }

        if live_channels == 0 {
            return Err(EnsembleError::DegenerateSignal(format!(
                "all {} channels have zero variance",
                conditioned_trial.channel_count()
            )));
        }

        let pooled: Vec<f64> = conditioned_trial.channels().iter().flatten().copied().collect();
        values.push(stats::variance(&pooled));
        values.push(stats::skewness(&pooled));
        values.push(stats::kurtosis(&pooled));
        values.push(stats::mean_abs(&pooled));
        values.push(stats::peak_to_peak(&pooled));

        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(EnsembleError::DegenerateSignal(format!(
                "feature {} is not finite",
                idx
            )));
        }

        Ok(FeatureVector::new(values))
    }

    /// Extract a batch in parallel. All trials must share one channel count.
    pub fn extract_batch(&self, trials: &[Trial]) -> EnsembleResult<Vec<FeatureVector>> {
        if let Some(first) = trials.first() {
            let expected = first.channel_count();
            if let Some(bad) = trials.iter().find(|t| t.channel_count() != expected) {
                return Err(EnsembleError::FeatureLengthMismatch {
                    expected: self.feature_len(expected),
                    actual: self.feature_len(bad.channel_count()),
                });
            }
        }
        trials.par_iter().map(|t| self.extract(t)).collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self { config: FeatureConfig::default() }
    }
}

fn safe_ln(value: f64, eps: f64) -> f64 {
    if value.is_finite() {
        value.max(eps).ln()
    } else {
        eps.ln()
    }
}
