//! Butterworth IIR filters as cascaded second-order sections, with
//! forward-backward (zero-phase) application.

use std::f64::consts::PI;

/// Second-order section coefficients, normalized so `a0 == 1`:
/// `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

/// Direct Form II Transposed state.
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, c: &BiquadCoeffs, x: f64) -> f64 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }

    /// State the section would hold after an infinitely long constant input `x`.
    fn steady(c: &BiquadCoeffs, x: f64) -> Self {
        let y = c.dc_gain() * x;
        let z2 = c.b2 * x - c.a2 * y;
        let z1 = c.b1 * x - c.a1 * y + z2;
        Self { z1, z2 }
    }
}

/// Cascade of second-order sections.
#[derive(Debug, Clone, PartialEq)]
pub struct SosFilter {
    sections: Vec<BiquadCoeffs>,
}

impl SosFilter {
    pub fn new(sections: Vec<BiquadCoeffs>) -> Self {
        Self { sections }
    }

    /// Butterworth low-pass of the given order.
    pub fn butter_lowpass(cutoff_hz: f64, sample_rate: f64, order: usize) -> Self {
        Self::new(design(prewarp(cutoff_hz, sample_rate), order, Kind::Lowpass))
    }

    /// Butterworth high-pass of the given order.
    pub fn butter_highpass(cutoff_hz: f64, sample_rate: f64, order: usize) -> Self {
        Self::new(design(prewarp(cutoff_hz, sample_rate), order, Kind::Highpass))
    }

    /// Band-pass as a high-pass at `low_hz` cascaded with a low-pass at
    /// `high_hz`, each of `order`. A zero low edge leaves only the low-pass.
    pub fn butter_bandpass(low_hz: f64, high_hz: f64, sample_rate: f64, order: usize) -> Self {
        let mut sections = Vec::new();
        if low_hz > 0.0 {
            sections.extend(design(prewarp(low_hz, sample_rate), order, Kind::Highpass));
        }
        sections.extend(design(prewarp(high_hz, sample_rate), order, Kind::Lowpass));
        Self::new(sections)
    }

    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    /// Single causal pass. States start at the steady state for a constant
    /// input equal to `input[0]`, which removes the start-up step.
    pub fn filter(&self, input: &[f64]) -> Vec<f64> {
        let Some(&x0) = input.first() else {
            return Vec::new();
        };

        let mut states = Vec::with_capacity(self.sections.len());
        let mut level = x0;
        for c in &self.sections {
            states.push(BiquadState::steady(c, level));
            level *= c.dc_gain();
        }

        input
            .iter()
            .map(|&x| {
                let mut v = x;
                for (state, c) in states.iter_mut().zip(&self.sections) {
                    v = state.process(c, v);
                }
                v
            })
            .collect()
    }

    /// Zero-phase forward-backward filtering with odd-extension padding at
    /// both ends. Magnitude response is the square of the single-pass one.
    pub fn filtfilt(&self, input: &[f64]) -> Vec<f64> {
        let n = input.len();
        if n == 0 {
            return Vec::new();
        }
        let pad = self.default_padlen().min(n - 1);

        let first = input[0];
        let last = input[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|k| 2.0 * first - input[k]));
        ext.extend_from_slice(input);
        ext.extend((1..=pad).map(|k| 2.0 * last - input[n - 1 - k]));

        let mut forward = self.filter(&ext);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();

        backward.drain(..pad);
        backward.truncate(n);
        backward
    }

    fn default_padlen(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Lowpass,
    Highpass,
}

/// Bilinear-transform prewarping: analog cutoff for digital `freq`.
fn prewarp(freq: f64, sample_rate: f64) -> f64 {
    (PI * freq / sample_rate).tan()
}

/// Butterworth prototype sections. Pole pair `k` of an order-`n` filter has
/// the analog factor `s^2 + 2 sin(theta_k) s + 1`, `theta_k = pi (2k + 1) / 2n`;
/// odd orders add the real pole `s + 1`.
fn design(k: f64, order: usize, kind: Kind) -> Vec<BiquadCoeffs> {
    let order = order.max(1);
    let mut sections = Vec::with_capacity(order.div_ceil(2));
    let k2 = k * k;

    for p in 0..order / 2 {
        let theta = PI * (2 * p + 1) as f64 / (2 * order) as f64;
        let damping = 2.0 * theta.sin();
        let d = 1.0 + damping * k + k2;
        let a1 = 2.0 * (k2 - 1.0) / d;
        let a2 = (1.0 - damping * k + k2) / d;
        let (b0, b1, b2) = match kind {
            Kind::Lowpass => (k2 / d, 2.0 * k2 / d, k2 / d),
            Kind::Highpass => (1.0 / d, -2.0 / d, 1.0 / d),
        };
        sections.push(BiquadCoeffs { b0, b1, b2, a1, a2 });
    }

    if order % 2 == 1 {
        let d = 1.0 + k;
        let a1 = (k - 1.0) / d;
        let (b0, b1) = match kind {
            Kind::Lowpass => (k / d, k / d),
            Kind::Highpass => (1.0 / d, -1.0 / d),
        };
        sections.push(BiquadCoeffs {
            b0,
            b1,
            b2: 0.0,
            a1,
            a2: 0.0,
        });
    }

    sections
}
