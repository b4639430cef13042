//! Synthetic EEG-like trials: alpha-dominated (label 0) against
//! beta-dominated (label 1), with mains hum, DC drift and the occasional
//! movement artifact.

use std::f64::consts::TAU;

use anyhow::Result;
use ensemble_core::{Label, Trial};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const ALPHA_LABEL: Label = 0;
pub const BETA_LABEL: Label = 1;

#[derive(Debug, Clone)]
pub struct TrialShape {
    pub channels: usize,
    pub sample_rate: f64,
    pub seconds: f64,
}

pub struct TrialGenerator {
    shape: TrialShape,
    rng: StdRng,
}

impl TrialGenerator {
    pub fn new(shape: TrialShape, seed: u64) -> Self {
        Self { shape, rng: StdRng::seed_from_u64(seed) }
    }

    /// `count` trials alternating between the two classes.
    pub fn generate(&mut self, count: usize) -> Result<Vec<Trial>> {
        (0..count)
            .map(|i| {
                let label = if i % 2 == 0 { ALPHA_LABEL } else { BETA_LABEL };
                self.trial(label)
            })
            .collect()
    }

    fn trial(&mut self, label: Label) -> Result<Trial> {
        let fs = self.shape.sample_rate;
        let n = (self.shape.seconds * fs).round() as usize;
        let rhythm_hz = if label == ALPHA_LABEL {
            self.rng.gen_range(9.0..12.0)
        } else {
            self.rng.gen_range(16.0..24.0)
        };
        let artifact_at = self.rng.gen_bool(0.1).then(|| self.rng.gen_range(0..n.max(1)));

        let channels = (0..self.shape.channels)
            .map(|_| {
                let amplitude = self.rng.gen_range(0.5..1.5);
                let phase = self.rng.gen_range(0.0..TAU);
                let offset = self.rng.gen_range(-20.0..20.0);
                let drift = self.rng.gen_range(-0.5..0.5);
                (0..n)
                    .map(|i| {
                        let t = i as f64 / fs;
                        let mut v = offset
                            + drift * t
                            + amplitude * (TAU * rhythm_hz * t + phase).sin()
                            + 0.4 * (TAU * 50.0 * t).sin()
                            + self.rng.gen_range(-0.8..0.8);
                        if artifact_at == Some(i) {
                            v += 80.0;
                        }
                        v
                    })
                    .collect()
            })
            .collect();

        Ok(Trial::new(channels, fs)?.with_label(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> TrialShape {
        TrialShape { channels: 3, sample_rate: 128.0, seconds: 1.5 }
    }

    #[test]
    fn test_generated_shape_and_labels() {
        let trials = TrialGenerator::new(shape(), 1).generate(6).unwrap();
        assert_eq!(trials.len(), 6);
        for (i, trial) in trials.iter().enumerate() {
            assert_eq!(trial.channel_count(), 3);
            assert_eq!(trial.sample_count(), 192);
            let expected = if i % 2 == 0 { ALPHA_LABEL } else { BETA_LABEL };
            assert_eq!(trial.label(), Some(expected));
        }
    }

    #[test]
    fn test_same_seed_same_trials() {
        let a = TrialGenerator::new(shape(), 9).generate(2).unwrap();
        let b = TrialGenerator::new(shape(), 9).generate(2).unwrap();
        assert_eq!(a[1].channels(), b[1].channels());
    }
}
