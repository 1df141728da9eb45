//! Phase-locking value between channel pairs.
//!
//! Instantaneous phase comes from the analytic signal (FFT-based Hilbert
//! transform) of each band-filtered channel. For a pair `(i, j)` and a window
//! `w`, `PLV_w = |mean exp(i(phi_i - phi_j))|` over the samples unflagged in
//! both channels; the pair's PLV is the mean over windows that had any such
//! sample. A pair with no jointly clean sample anywhere has no value.

use rustfft::{num_complex::Complex, FftPlanner};

use super::preprocess::{BandSignal, CleanChannel};
use super::Windowing;
use crate::error::Result;

/// Symmetric PLV matrix over the surviving channels of one band.
#[derive(Debug, Clone, PartialEq)]
pub struct PlvMatrix {
    labels: Vec<String>,
    /// Row-major `n * n`; `None` for pairs without a value.
    values: Vec<Option<f64>>,
}

impl PlvMatrix {
    /// Diagonal 1, every pair unset.
    pub fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        let mut values = vec![None; n * n];
        for i in 0..n {
            values[i * n + i] = Some(1.0);
        }
        Self { labels, values }
    }

    /// Write `value` to both `(i, j)` and `(j, i)`. The diagonal is fixed.
    pub fn set_pair(&mut self, i: usize, j: usize, value: f64) {
        if i == j {
            return;
        }
        let n = self.labels.len();
        self.values[i * n + j] = Some(value);
        self.values[j * n + i] = Some(value);
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.values[i * self.labels.len() + j]
    }

    pub fn value(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.labels.iter().position(|l| l == a)?;
        let j = self.labels.iter().position(|l| l == b)?;
        self.get(i, j)
    }

    /// Upper-triangle entries `(label_i, label_j, plv)`, `i < j`.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, Option<f64>)> + '_ {
        let n = self.labels.len();
        (0..n).flat_map(move |i| {
            ((i + 1)..n).map(move |j| (self.labels[i].as_str(), self.labels[j].as_str(), self.get(i, j)))
        })
    }

    /// Mean over the pairs that have a value; `None` when none do.
    pub fn mean(&self) -> Option<f64> {
        let (sum, count) = self
            .pairs()
            .filter_map(|(_, _, v)| v)
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        (count > 0).then(|| sum / count as f64)
    }
}

/// ConnectivityAnalyzer output for one band.
#[derive(Debug, Clone, PartialEq)]
pub enum BandConnectivity {
    /// Fewer than two channels survived preprocessing. Not an error.
    InsufficientChannels { surviving: Vec<String> },
    Matrix(PlvMatrix),
}

/// Pairwise PLV for every surviving channel of `signal`.
pub fn analyze(signal: &BandSignal, windowing: Windowing) -> Result<BandConnectivity> {
    let starts = windowing.starts(signal.sample_count)?;

    if signal.channels.len() < 2 {
        return Ok(BandConnectivity::InsufficientChannels {
            surviving: signal.channels.iter().map(|c| c.channel.label.clone()).collect(),
        });
    }

    let phasors: Vec<Vec<Complex<f64>>> = signal
        .channels
        .iter()
        .map(|c| unit_phasors(&analytic_signal(&c.channel.samples)))
        .collect();

    let mut matrix = PlvMatrix::new(
        signal.channels.iter().map(|c| c.channel.label.clone()).collect(),
    );
    let n = signal.channels.len();
    for i in 0..n {
        for j in (i + 1)..n {
            if let Some(plv) = pair_plv(
                (phasors[i].as_slice(), &signal.channels[i]),
                (phasors[j].as_slice(), &signal.channels[j]),
                &starts,
                windowing.length,
            ) {
                matrix.set_pair(i, j, plv);
            }
        }
    }

    log::trace!("{}: PLV over {} channels", signal.band.name(), n);
    Ok(BandConnectivity::Matrix(matrix))
}

/// PLV of one pair, or `None` when no sample is unflagged in both.
fn pair_plv(
    a: (&[Complex<f64>], &CleanChannel),
    b: (&[Complex<f64>], &CleanChannel),
    starts: &[usize],
    length: usize,
) -> Option<f64> {
    let (pa, ca) = a;
    let (pb, cb) = b;
    let locking = |range: std::ops::Range<usize>| -> Option<f64> {
        let mut sum = Complex::new(0.0, 0.0);
        let mut count = 0usize;
        for k in range {
            if ca.mask.is_flagged(k) || cb.mask.is_flagged(k) {
                continue;
            }
            sum += pa[k] * pb[k].conj();
            count += 1;
        }
        (count > 0).then(|| sum.norm() / count as f64)
    };

    let per_window: Vec<f64> = starts
        .iter()
        .filter_map(|&s| locking(s..s + length))
        .collect();

    let plv = if !per_window.is_empty() {
        per_window.iter().sum::<f64>() / per_window.len() as f64
    } else {
        // Windows can miss clean samples that lie past the last full window
        locking(0..pa.len())?
    };
    Some(plv.clamp(0.0, 1.0))
}

/// Analytic signal `x + i H(x)` via FFT: keep DC (and Nyquist for even
/// lengths), double positive frequencies, zero negative ones.
pub fn analytic_signal(samples: &[f64]) -> Vec<Complex<f64>> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
    forward.process(&mut buf);

    let half = n / 2;
    for (k, z) in buf.iter_mut().enumerate() {
        let h = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k <= (n - 1) / 2 {
            2.0
        } else {
            0.0
        };
        *z *= h;
    }

    inverse.process(&mut buf);
    let scale = 1.0 / n as f64;
    buf.iter_mut().for_each(|z| *z *= scale);
    buf
}

/// `exp(i * arg(z))` per sample. Zero-magnitude samples get phase 0.
fn unit_phasors(analytic: &[Complex<f64>]) -> Vec<Complex<f64>> {
    analytic
        .iter()
        .map(|z| Complex::from_polar(1.0, z.arg()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::preprocess::ArtifactMask;
    use crate::bands::{Band, BandName};
    use crate::error::PipelineError;
    use crate::signal::{Channel, ChannelType};
    use std::f64::consts::PI;

    fn wave(freq: f64, phase: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs + phase).sin())
            .collect()
    }

    fn band_signal(fs: f64, channels: Vec<(&str, Vec<f64>)>) -> BandSignal {
        let sample_count = channels.first().map(|(_, x)| x.len()).unwrap_or(0);
        BandSignal {
            band: Band::canonical(BandName::Alpha),
            sample_rate: fs,
            sample_count,
            channels: channels
                .into_iter()
                .map(|(label, x)| CleanChannel {
                    mask: ArtifactMask::clean(x.len()),
                    channel: Channel::new(label, ChannelType::Seeg, x),
                })
                .collect(),
            omitted: Vec::new(),
        }
    }

    fn whole(n: usize) -> Windowing {
        Windowing {
            length: n,
            overlap: 0.0,
        }
    }

    fn matrix(c: BandConnectivity) -> PlvMatrix {
        match c {
            BandConnectivity::Matrix(m) => m,
            other => panic!("expected matrix, got {other:?}"),
        }
    }

    #[test]
    fn test_analytic_signal_of_sine() {
        // Hilbert(sin) = -cos, so the analytic signal of sin is sin - i cos.
        let x = wave(10.0, 0.0, 256.0, 256);
        let z = analytic_signal(&x);
        for (k, zk) in z.iter().enumerate() {
            let t = 2.0 * PI * 10.0 * k as f64 / 256.0;
            assert!((zk.re - t.sin()).abs() < 1e-9);
            assert!((zk.im + t.cos()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_in_phase_pair_is_locked() {
        let fs = 256.0;
        let sig = band_signal(
            fs,
            vec![("A", wave(10.0, 0.0, fs, 256)), ("B", wave(10.0, 0.0, fs, 256))],
        );
        let m = matrix(analyze(&sig, whole(256)).unwrap());
        assert!((m.get(0, 1).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(m.get(0, 0), Some(1.0));
    }

    #[test]
    fn test_constant_lag_is_still_locked() {
        let fs = 256.0;
        let sig = band_signal(
            fs,
            vec![("A", wave(10.0, 0.0, fs, 256)), ("B", wave(10.0, PI / 2.0, fs, 256))],
        );
        let m = matrix(analyze(&sig, whole(256)).unwrap());
        assert!((m.get(0, 1).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_drifting_phase_is_unlocked() {
        // 10 Hz against 11 Hz over one second: the phase difference turns
        // through exactly one full cycle.
        let fs = 256.0;
        let sig = band_signal(
            fs,
            vec![("A", wave(10.0, 0.0, fs, 256)), ("B", wave(11.0, 0.0, fs, 256))],
        );
        let m = matrix(analyze(&sig, whole(256)).unwrap());
        let plv = m.get(0, 1).unwrap();
        assert!(plv < 0.05, "plv {plv}");
    }

    #[test]
    fn test_symmetric_and_bounded_with_noise() {
        let fs = 200.0;
        let n = 400;
        let mut state: u64 = 7;
        let mut noise = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 11) as f64 / (1u64 << 53) as f64) - 0.5
        };
        let chans: Vec<(&str, Vec<f64>)> = ["C1", "C2", "C3", "C4"]
            .into_iter()
            .enumerate()
            .map(|(c, label)| {
                let x = wave(9.0 + c as f64, c as f64, fs, n)
                    .into_iter()
                    .map(|v| v + 3.0 * noise())
                    .collect();
                (label, x)
            })
            .collect();
        let sig = band_signal(fs, chans);
        let m = matrix(
            analyze(
                &sig,
                Windowing {
                    length: 100,
                    overlap: 0.5,
                },
            )
            .unwrap(),
        );
        for i in 0..4 {
            assert_eq!(m.get(i, i), Some(1.0));
            for j in 0..4 {
                assert_eq!(m.get(i, j), m.get(j, i));
                assert!((0.0..=1.0).contains(&m.get(i, j).unwrap()));
            }
        }
        assert_eq!(m.pairs().count(), 6);
    }

    #[test]
    fn test_single_channel_is_insufficient() {
        let sig = band_signal(256.0, vec![("A", wave(10.0, 0.0, 256.0, 256))]);
        assert_eq!(
            analyze(&sig, whole(256)).unwrap(),
            BandConnectivity::InsufficientChannels {
                surviving: vec!["A".into()]
            }
        );
    }

    #[test]
    fn test_short_signal_is_insufficient_data() {
        let sig = band_signal(
            256.0,
            vec![("A", wave(10.0, 0.0, 256.0, 100)), ("B", wave(10.0, 0.0, 256.0, 100))],
        );
        assert!(matches!(
            analyze(&sig, whole(256)),
            Err(PipelineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_flagged_samples_are_skipped() {
        let fs = 256.0;
        let drifting = wave(13.0, 0.0, fs, 512);
        let mut sig = band_signal(
            fs,
            vec![("A", wave(10.0, 0.0, fs, 512)), ("B", wave(10.0, 0.0, fs, 512))],
        );
        // B drifts away from A in the second window.
        sig.channels[1].channel.samples[256..].copy_from_slice(&drifting[256..]);
        let unmasked = matrix(analyze(&sig, whole(256)).unwrap()).get(0, 1).unwrap();

        let mut flags = vec![false; 512];
        flags[256..].iter_mut().for_each(|f| *f = true);
        sig.channels[1].mask = ArtifactMask::from_flags(flags);
        let masked = matrix(analyze(&sig, whole(256)).unwrap()).get(0, 1).unwrap();

        assert!(masked > 0.85, "masked plv {masked}");
        assert!(masked > unmasked + 0.2, "masked {masked}, unmasked {unmasked}");
    }

    #[test]
    fn test_pair_without_joint_clean_samples_has_no_value() {
        let fs = 256.0;
        let mut sig = band_signal(
            fs,
            vec![
                ("A", wave(10.0, 0.0, fs, 512)),
                ("B", wave(10.0, 0.0, fs, 512)),
                ("C", wave(10.0, 0.0, fs, 512)),
            ],
        );
        // A is clean only in the first half, B only in the second.
        sig.channels[0].mask = ArtifactMask::from_flags((0..512).map(|k| k >= 256).collect());
        sig.channels[1].mask = ArtifactMask::from_flags((0..512).map(|k| k < 256).collect());

        let m = matrix(analyze(&sig, whole(256)).unwrap());
        assert_eq!(m.get(0, 1), None);
        assert_eq!(m.value("B", "A"), None);
        assert!((m.get(0, 2).unwrap() - 1.0).abs() < 1e-9);
        assert!((m.get(1, 2).unwrap() - 1.0).abs() < 1e-9);
        assert!((m.mean().unwrap() - 1.0).abs() < 1e-9);
    }
}
