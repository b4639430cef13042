//! Digital filters for EEG conditioning
//!
//! Second-order IIR sections (RBJ cookbook forms), Butterworth cascades and
//! forward-backward zero-phase application.

use std::f64::consts::PI;

/// Biquad coefficients normalised so that a0 = 1
#[derive(Clone, Debug, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a1, a2]
    pub a: [f64; 2],
}

/// Second-order section in transposed direct form II
#[derive(Clone, Debug)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    state: [f64; 2],
}

impl Biquad {
    #[must_use]
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, state: [0.0, 0.0] }
    }

    fn from_raw(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self::new(BiquadCoeffs {
            b: [b0 / a0, b1 / a0, b2 / a0],
            a: [a1 / a0, a2 / a0],
        })
    }

    /// Second-order lowpass with quality factor `q`
    #[must_use]
    pub fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);
        Self::from_raw(
            (1.0 - cos_w) / 2.0,
            1.0 - cos_w,
            (1.0 - cos_w) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w,
            1.0 - alpha,
        )
    }

    /// Second-order highpass with quality factor `q`
    #[must_use]
    pub fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);
        Self::from_raw(
            (1.0 + cos_w) / 2.0,
            -(1.0 + cos_w),
            (1.0 + cos_w) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w,
            1.0 - alpha,
        )
    }

    /// Notch filter for power line interference
    #[must_use]
    pub fn notch(sample_rate: f64, notch_freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * notch_freq / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);
        Self::from_raw(1.0, -2.0 * cos_w, 1.0, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// DC gain H(1)
    pub fn dc_gain(&self) -> f64 {
        let BiquadCoeffs { b, a } = &self.coeffs;
        (b[0] + b[1] + b[2]) / (1.0 + a[0] + a[1])
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        let BiquadCoeffs { b, a } = &self.coeffs;
        let output = b[0] * input + self.state[0];
        self.state[0] = b[1] * input - a[0] * output + self.state[1];
        self.state[1] = b[2] * input - a[1] * output;
        output
    }

    /// Load the steady-state response to a constant input `x0`, returning the
    /// steady output. Starting from here suppresses the start-up step transient.
    pub fn settle(&mut self, x0: f64) -> f64 {
        let y = self.dc_gain() * x0;
        let BiquadCoeffs { b, a } = &self.coeffs;
        self.state[1] = b[2] * x0 - a[1] * y;
        self.state[0] = y - b[0] * x0;
        y
    }

    pub fn reset(&mut self) {
        self.state = [0.0, 0.0];
    }
}

/// Quality factors of the second-order sections making up an even-order
/// Butterworth filter.
pub fn butterworth_qs(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| {
            let theta = PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

/// Chain of second-order sections applied in order
#[derive(Clone, Debug, Default)]
pub struct SosCascade {
    sections: Vec<Biquad>,
}

impl SosCascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Butterworth highpass of even `order`
    pub fn butterworth_highpass(sample_rate: f64, cutoff: f64, order: usize) -> Self {
        Self {
            sections: butterworth_qs(order)
                .into_iter()
                .map(|q| Biquad::highpass(sample_rate, cutoff, q))
                .collect(),
        }
    }

    /// Butterworth lowpass of even `order`
    pub fn butterworth_lowpass(sample_rate: f64, cutoff: f64, order: usize) -> Self {
        Self {
            sections: butterworth_qs(order)
                .into_iter()
                .map(|q| Biquad::lowpass(sample_rate, cutoff, q))
                .collect(),
        }
    }

    pub fn push(&mut self, section: Biquad) {
        self.sections.push(section);
    }

    pub fn extend(&mut self, other: SosCascade) {
        self.sections.extend(other.sections);
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// One causal pass, each section settled on the first sample.
    fn pass(&mut self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else { return };
        let mut steady = first;
        for section in &mut self.sections {
            steady = section.settle(steady);
        }
        for x in signal.iter_mut() {
            let mut v = *x;
            for section in &mut self.sections {
                v = section.filter(v);
            }
            *x = v;
        }
    }

    /// Zero-phase forward-backward filtering with odd-reflection padding.
    ///
    /// Caller guarantees `signal.len() > pad_len`. State is rebuilt on every
    /// call, so identical input gives identical output.
    pub fn filtfilt(&self, signal: &[f64], pad_len: usize) -> Vec<f64> {
        let n = signal.len();
        if self.sections.is_empty() || n == 0 {
            return signal.to_vec();
        }
        let pad = pad_len.min(n - 1);
        let first = signal[0];
        let last = signal[n - 1];

        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut cascade = self.clone();
        cascade.pass(&mut ext);
        ext.reverse();
        cascade.pass(&mut ext);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }
}
