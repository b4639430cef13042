//! Per-channel signal conditioning
//!
//! Fixed stage order: bandpass → line-noise notch → artifact clamp →
//! zero-mean / unit-variance normalisation.

use ensemble_core::stats::{self, EPSILON};
use ensemble_core::{EnsembleError, EnsembleResult, Trial};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::filters::{Biquad, SosCascade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionerConfig {
    /// Highpass edge of the bandpass (Hz)
    pub low_cut_hz: f64,
    /// Lowpass edge of the bandpass (Hz); skipped when not below Nyquist
    pub high_cut_hz: f64,
    /// Butterworth order per edge; must be even
    pub filter_order: usize,
    /// Line-noise frequencies; each applied only when below Nyquist
    pub notch_hz: Vec<f64>,
    pub notch_q: f64,
    /// Z-score magnitude beyond which samples are clipped
    pub clamp_z: f64,
    pub epsilon: f64,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            low_cut_hz: 0.5,
            high_cut_hz: 45.0,
            filter_order: 4,
            notch_hz: vec![50.0, 60.0],
            notch_q: 30.0,
            clamp_z: 5.0,
            epsilon: EPSILON,
        }
    }
}

/// Deterministic per-channel cleaner. Holds no filter state between calls.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    config: ConditionerConfig,
}

impl SignalConditioner {
    pub fn new(config: ConditionerConfig) -> EnsembleResult<Self> {
        if !(config.low_cut_hz > 0.0 && config.low_cut_hz < config.high_cut_hz) {
            return Err(EnsembleError::config(format!(
                "bandpass edges must satisfy 0 < low < high, got {}..{} Hz",
                config.low_cut_hz, config.high_cut_hz
            )));
        }
        if config.filter_order == 0 || config.filter_order % 2 != 0 {
            return Err(EnsembleError::config(format!(
                "filter order must be a positive even number, got {}",
                config.filter_order
            )));
        }
        if config.notch_hz.iter().any(|f| !(*f > 0.0)) || !(config.notch_q > 0.0) {
            return Err(EnsembleError::config("notch frequencies and Q must be positive"));
        }
        if !(config.clamp_z > 0.0) || !(config.epsilon > 0.0) {
            return Err(EnsembleError::config("clamp threshold and epsilon must be positive"));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    /// Padding used by the zero-phase filter; also the shortest usable window minus one.
    pub fn pad_len(&self) -> usize {
        3 * (2 * self.config.filter_order + 1)
    }

    /// Minimum samples per channel the filter order requires.
    pub fn min_samples(&self) -> usize {
        self.pad_len() + 1
    }

    fn build_cascade(&self, sample_rate: f64) -> EnsembleResult<SosCascade> {
        let nyquist = sample_rate / 2.0;
        let cfg = &self.config;
        if cfg.low_cut_hz >= nyquist {
            return Err(EnsembleError::InvalidInput(format!(
                "sample rate {} Hz is too low for a {} Hz highpass edge",
                sample_rate, cfg.low_cut_hz
            )));
        }

        let mut cascade = SosCascade::butterworth_highpass(sample_rate, cfg.low_cut_hz, cfg.filter_order);
        if cfg.high_cut_hz < nyquist {
            cascade.extend(SosCascade::butterworth_lowpass(sample_rate, cfg.high_cut_hz, cfg.filter_order));
        } else {
            tracing::debug!(
                "Lowpass edge {} Hz not below Nyquist {} Hz, skipping",
                cfg.high_cut_hz,
                nyquist
            );
        }
        for &freq in &cfg.notch_hz {
            if freq < nyquist {
                cascade.push(Biquad::notch(sample_rate, freq, cfg.notch_q));
            }
        }
        Ok(cascade)
    }

    /// Clean one channel.
    ///
    /// A channel with (near) zero variance carries no information and comes
    /// back as all zeros.
    pub fn clean_channel(&self, raw_signal: &[f64], sample_rate: f64) -> EnsembleResult<Vec<f64>> {
        let required = self.min_samples();
        if raw_signal.len() < required {
            return Err(EnsembleError::InsufficientSamples { required, actual: raw_signal.len() });
        }
        if raw_signal.iter().any(|v| !v.is_finite()) {
            return Err(EnsembleError::InvalidInput("channel contains non-finite samples".into()));
        }
        if stats::variance(raw_signal) < self.config.epsilon {
            return Ok(vec![0.0; raw_signal.len()]);
        }

        let cascade = self.build_cascade(sample_rate)?;
        let filtered = cascade.filtfilt(raw_signal, self.pad_len());

        let clamped = self.clamp_artifacts(&filtered);
        Ok(self.normalize(&clamped))
    }

    /// Z-score the filtered signal and clip it to `±clamp_z`.
    fn clamp_artifacts(&self, filtered: &[f64]) -> Vec<f64> {
        let clamp = self.config.clamp_z;
        let m = stats::mean(filtered);
        let sd = stats::std_dev(filtered).max(self.config.epsilon);
        filtered.iter().map(|x| ((x - m) / sd).clamp(-clamp, clamp)).collect()
    }

    fn normalize(&self, signal: &[f64]) -> Vec<f64> {
        let m = stats::mean(signal);
        let sd = stats::std_dev(signal).max(self.config.epsilon);
        signal.iter().map(|x| (x - m) / sd).collect()
    }

    /// Clean every channel of a trial in parallel, preserving its label.
    pub fn condition_trial(&self, trial: &Trial) -> EnsembleResult<Trial> {
        let fs = trial.sample_rate();
        let channels = trial
            .channels()
            .par_iter()
            .map(|ch| self.clean_channel(ch, fs))
            .collect::<EnsembleResult<Vec<_>>>()?;
        let cleaned = Trial::new(channels, fs)?;
        Ok(match trial.label() {
            Some(label) => cleaned.with_label(label),
            None => cleaned,
        })
    }
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self { config: ConditionerConfig::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn mixed_signal(n: usize, fs: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                3.0 + (2.0 * PI * 10.0 * t).sin() + 0.5 * (2.0 * PI * 50.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_output_is_normalized() {
        let conditioner = SignalConditioner::default();
        let out = conditioner.clean_channel(&mixed_signal(1000, 250.0), 250.0).unwrap();
        assert_eq!(out.len(), 1000);
        assert!(stats::mean(&out).abs() < 1e-9);
        assert!((stats::std_dev(&out) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_input_is_deterministic() {
        let conditioner = SignalConditioner::default();
        let input = vec![4.2; 512];
        let a = conditioner.clean_channel(&input, 250.0).unwrap();
        let b = conditioner.clean_channel(&input, 250.0).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_noisy_input_is_deterministic() {
        let conditioner = SignalConditioner::default();
        let input = mixed_signal(777, 256.0);
        assert_eq!(
            conditioner.clean_channel(&input, 256.0).unwrap(),
            conditioner.clean_channel(&input, 256.0).unwrap()
        );
    }

    #[test]
    fn test_short_window_is_rejected() {
        let conditioner = SignalConditioner::default();
        let err = conditioner.clean_channel(&[1.0; 20], 250.0).unwrap_err();
        match err {
            EnsembleError::InsufficientSamples { required, actual } => {
                assert_eq!(required, 28);
                assert_eq!(actual, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_artifact_is_clamped_before_normalisation() {
        let conditioner = SignalConditioner::default();
        let mut filtered = vec![0.0; 1000];
        for (i, v) in filtered.iter_mut().enumerate() {
            *v = if i % 2 == 0 { 1.0 } else { -1.0 };
        }
        filtered[500] = 1.0e4;
        let clamped = conditioner.clamp_artifacts(&filtered);
        assert!(clamped.iter().all(|v| v.abs() <= 5.0));
        assert!((clamped[500] - 5.0).abs() < 1e-12);

        let mut raw = mixed_signal(2000, 250.0);
        raw[1000] += 500.0;
        let out = conditioner.clean_channel(&raw, 250.0).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((stats::std_dev(&out) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_sample_rate_skips_lowpass_and_notches() {
        let conditioner = SignalConditioner::default();
        // Nyquist 40 Hz: no lowpass, no 50/60 Hz notches
        let cascade = conditioner.build_cascade(80.0).unwrap();
        assert_eq!(cascade.len(), 2);
        let full = conditioner.build_cascade(250.0).unwrap();
        assert_eq!(full.len(), 6);
    }

    #[test]
    fn test_invalid_band_edges_rejected() {
        let config = ConditionerConfig { low_cut_hz: 50.0, high_cut_hz: 10.0, ..Default::default() };
        assert!(SignalConditioner::new(config).is_err());
        let config = ConditionerConfig { filter_order: 3, ..Default::default() };
        assert!(SignalConditioner::new(config).is_err());
    }

    #[test]
    fn test_condition_trial_keeps_label() {
        let conditioner = SignalConditioner::default();
        let trial = Trial::new(vec![mixed_signal(300, 250.0), vec![1.0; 300]], 250.0)
            .unwrap()
            .with_label(3);
        let cleaned = conditioner.condition_trial(&trial).unwrap();
        assert_eq!(cleaned.label(), Some(3));
        assert_eq!(cleaned.channel_count(), 2);
        assert!(cleaned.channels()[1].iter().all(|v| *v == 0.0));
    }
}
