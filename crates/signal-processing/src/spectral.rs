//! Welch power spectral density estimation
//!
//! Segment, detrend, Hann-window, FFT, average one-sided periodograms.

use rustfft::{num_complex::Complex, FftPlanner};

/// Welch PSD of one channel, keeping per-segment periodograms so band power
/// dispersion across segments can be summarised too.
#[derive(Debug, Clone)]
pub struct WelchPsd {
    /// Bin centre frequencies (Hz)
    pub freqs: Vec<f64>,
    /// Averaged density (units²/Hz)
    pub density: Vec<f64>,
    /// Density of each segment
    pub segments: Vec<Vec<f64>>,
}

impl WelchPsd {
    /// Frequency resolution (Hz per bin)
    pub fn resolution(&self) -> f64 {
        if self.freqs.len() < 2 {
            return 0.0;
        }
        self.freqs[1] - self.freqs[0]
    }

    /// Integrated power of the averaged density over `[low_hz, high_hz)`.
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        integrate_band(&self.freqs, &self.density, self.resolution(), low_hz, high_hz)
    }

    /// Integrated power over `[low_hz, high_hz)` for every segment.
    pub fn segment_band_powers(&self, low_hz: f64, high_hz: f64) -> Vec<f64> {
        let df = self.resolution();
        self.segments
            .iter()
            .map(|seg| integrate_band(&self.freqs, seg, df, low_hz, high_hz))
            .collect()
    }
}

fn integrate_band(freqs: &[f64], density: &[f64], df: f64, low_hz: f64, high_hz: f64) -> f64 {
    freqs
        .iter()
        .zip(density)
        .filter(|(f, _)| **f >= low_hz && **f < high_hz)
        .map(|(_, p)| p * df)
        .sum()
}

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos())
        .collect()
}

/// Welch estimator with a fixed segment length and overlap.
#[derive(Debug, Clone)]
pub struct WelchEstimator {
    segment_len: usize,
    overlap: f64,
}

impl WelchEstimator {
    /// `overlap` is the fraction of a segment shared with the next one, in `[0, 1)`.
    pub fn new(segment_len: usize, overlap: f64) -> Self {
        Self {
            segment_len: segment_len.max(2),
            overlap: overlap.clamp(0.0, 0.95),
        }
    }

    /// Estimate the one-sided PSD of `samples`.
    ///
    /// A signal shorter than the segment length is treated as a single segment.
    pub fn estimate(&self, samples: &[f64], sample_rate: f64) -> WelchPsd {
        let seg_len = self.segment_len.min(samples.len()).max(2);
        let step = ((seg_len as f64) * (1.0 - self.overlap)).round().max(1.0) as usize;
        let window = hann_window(seg_len);
        let window_power: f64 = window.iter().map(|w| w * w).sum();
        let scale = 1.0 / (sample_rate * window_power.max(f64::MIN_POSITIVE));

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(seg_len);
        let mut buffer = vec![Complex::new(0.0, 0.0); seg_len];
        let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let n_freqs = seg_len / 2 + 1;
        let freqs: Vec<f64> = (0..n_freqs).map(|k| k as f64 * sample_rate / seg_len as f64).collect();

        let mut segments = Vec::new();
        let mut start = 0;
        while start + seg_len <= samples.len() {
            let segment = &samples[start..start + seg_len];
            let seg_mean = segment.iter().sum::<f64>() / seg_len as f64;
            for (slot, (&s, &w)) in buffer.iter_mut().zip(segment.iter().zip(&window)) {
                *slot = Complex::new((s - seg_mean) * w, 0.0);
            }
            fft.process_with_scratch(&mut buffer, &mut scratch);

            let periodogram: Vec<f64> = buffer[..n_freqs]
                .iter()
                .enumerate()
                .map(|(k, c)| {
                    let p = c.norm_sqr() * scale;
                    let is_edge = k == 0 || (seg_len % 2 == 0 && k == n_freqs - 1);
                    if is_edge { p } else { 2.0 * p }
                })
                .collect();
            segments.push(periodogram);
            start += step;
        }

        let mut density = vec![0.0; n_freqs];
        for seg in &segments {
            for (d, p) in density.iter_mut().zip(seg) {
                *d += p;
            }
        }
        let count = segments.len().max(1) as f64;
        density.iter_mut().for_each(|d| *d /= count);

        WelchPsd { freqs, density, segments }
    }
}
