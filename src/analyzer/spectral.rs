//! Welch power spectral density and band-power integration.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::preprocess::{screen_channel, BandSignal, ChannelOmission, Screened};
use super::Windowing;
use crate::bands::Band;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::record::OmissionReason;
use crate::signal::Signal;

/// One-sided power spectral density. `freqs` is strictly ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
}

impl Psd {
    pub fn resolution(&self) -> f64 {
        if self.freqs.len() < 2 {
            0.0
        } else {
            self.freqs[1] - self.freqs[0]
        }
    }

    /// `(freq, power)` pairs, the persisted curve shape.
    pub fn points(&self) -> Vec<[f64; 2]> {
        self.freqs
            .iter()
            .zip(&self.power)
            .map(|(&f, &p)| [f, p])
            .collect()
    }
}

/// Spectrum of one channel within a band run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpectrum {
    pub label: String,
    pub psd: Psd,
    /// Trapezoidal integral of `psd` over the band.
    pub power: f64,
}

/// SpectralAnalyzer output for one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSpectrum {
    pub band: Band,
    pub channels: Vec<ChannelSpectrum>,
    pub omitted: Vec<ChannelOmission>,
}

/// Whole-range PSD of the unfiltered signal. `ChannelSpectrum::power` holds
/// the total power up to Nyquist.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadbandSpectrum {
    pub channels: Vec<ChannelSpectrum>,
    pub omitted: Vec<ChannelOmission>,
}

impl BroadbandSpectrum {
    pub fn channel(&self, label: &str) -> Option<&ChannelSpectrum> {
        self.channels.iter().find(|c| c.label == label)
    }

    pub fn omission(&self, label: &str) -> Option<&OmissionReason> {
        self.omitted
            .iter()
            .find(|o| o.channel == label)
            .map(|o| &o.reason)
    }
}

/// Welch estimator: periodic Hann window, constant detrend, density scaling.
pub struct Welch {
    windowing: Windowing,
    sample_rate: f64,
    taper: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl Welch {
    pub fn new(windowing: Windowing, sample_rate: f64) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(windowing.length);
        Self {
            taper: hann_periodic(windowing.length),
            windowing,
            sample_rate,
            fft,
        }
    }

    /// Averaged periodogram over all windows. Flagged samples are zeroed after
    /// detrending and left out of the window-energy normalization; windows
    /// with nothing left are skipped. `Ok(None)` when no window was usable,
    /// `InsufficientData` when the input is shorter than one window.
    pub fn estimate(&self, samples: &[f64], flagged: &[bool]) -> Result<Option<Psd>> {
        let len = self.windowing.length;
        let starts = self.windowing.starts(samples.len())?;
        let bins = len / 2 + 1;
        let mut accum = vec![0.0_f64; bins];
        let mut used = 0usize;
        let mut buffer = vec![Complex::new(0.0, 0.0); len];

        for start in starts {
            let seg = &samples[start..start + len];
            let seg_mask = &flagged[start..start + len];

            let valid = seg_mask.iter().filter(|&&f| !f).count();
            if valid == 0 {
                continue;
            }
            let mean = seg
                .iter()
                .zip(seg_mask)
                .filter(|&(_, &f)| !f)
                .map(|(&x, _)| x)
                .sum::<f64>()
                / valid as f64;

            let mut energy = 0.0;
            for i in 0..len {
                if seg_mask[i] {
                    buffer[i] = Complex::new(0.0, 0.0);
                } else {
                    let w = self.taper[i];
                    energy += w * w;
                    buffer[i] = Complex::new((seg[i] - mean) * w, 0.0);
                }
            }
            if energy <= 0.0 {
                continue;
            }

            self.fft.process(&mut buffer);

            let scale = 1.0 / (self.sample_rate * energy);
            for (k, acc) in accum.iter_mut().enumerate() {
                let mut p = buffer[k].norm_sqr() * scale;
                let is_nyquist = len % 2 == 0 && k == len / 2;
                if k != 0 && !is_nyquist {
                    p *= 2.0;
                }
                *acc += p;
            }
            used += 1;
        }

        if used == 0 {
            return Ok(None);
        }

        let freqs = (0..bins)
            .map(|k| k as f64 * self.sample_rate / len as f64)
            .collect();
        let power = accum.into_iter().map(|p| (p / used as f64).max(0.0)).collect();
        Ok(Some(Psd { freqs, power }))
    }
}

/// Trapezoidal rule over the ordered `(x, y)` samples.
pub fn trapezoid(xs: &[f64], ys: &[f64]) -> f64 {
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}

/// Power within `band`: trapezoid over the PSD bins with frequency in
/// `[low_hz, high_hz)`. Fewer than two bins integrate to zero.
pub fn band_power(psd: &Psd, band: &Band) -> f64 {
    let (freqs, power): (Vec<f64>, Vec<f64>) = psd
        .freqs
        .iter()
        .zip(&psd.power)
        .filter(|&(&f, _)| band.contains(f))
        .map(|(&f, &p)| (f, p.max(0.0)))
        .unzip();
    if freqs.len() < 2 {
        log::trace!(
            "{}: only {} PSD bins in band, power is 0",
            band.name(),
            freqs.len()
        );
    }
    trapezoid(&freqs, &power).max(0.0)
}

/// Run Welch + band-power integration for every surviving channel.
pub fn analyze(signal: &BandSignal, windowing: Windowing) -> Result<BandSpectrum> {
    // Length check happens even when every channel was dropped.
    windowing.starts(signal.sample_count)?;

    let welch = Welch::new(windowing, signal.sample_rate);
    let mut channels = Vec::with_capacity(signal.channels.len());
    let mut omitted = Vec::new();

    for clean in &signal.channels {
        match welch.estimate(&clean.channel.samples, clean.mask.as_slice())? {
            Some(psd) => {
                let power = band_power(&psd, &signal.band);
                channels.push(ChannelSpectrum {
                    label: clean.channel.label.clone(),
                    psd,
                    power,
                });
            }
            None => omitted.push(ChannelOmission {
                channel: clean.channel.label.clone(),
                reason: OmissionReason::NoCleanWindows,
            }),
        }
    }

    Ok(BandSpectrum {
        band: signal.band,
        channels,
        omitted,
    })
}

/// Welch PSD of every channel's raw samples. Channels are screened the same
/// way as for the band runs; flagged samples are skipped.
pub fn broadband(
    signal: &Signal,
    config: &PipelineConfig,
    windowing: Windowing,
) -> Result<BroadbandSpectrum> {
    windowing.starts(signal.sample_count())?;

    let welch = Welch::new(windowing, signal.sample_rate());
    let mut channels = Vec::with_capacity(signal.channel_count());
    let mut omitted = Vec::new();

    for channel in signal.channels() {
        let reason = match screen_channel(channel, config)? {
            Screened::Keep(mask) => match welch.estimate(&channel.samples, mask.as_slice())? {
                Some(psd) => {
                    let power = trapezoid(&psd.freqs, &psd.power).max(0.0);
                    channels.push(ChannelSpectrum {
                        label: channel.label.clone(),
                        psd,
                        power,
                    });
                    continue;
                }
                None => OmissionReason::NoCleanWindows,
            },
            Screened::Drop(reason) => reason,
        };
        omitted.push(ChannelOmission {
            channel: channel.label.clone(),
            reason,
        });
    }

    Ok(BroadbandSpectrum { channels, omitted })
}

fn hann_periodic(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / len as f64).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::BandName;
    use crate::error::PipelineError;

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    fn windowing(length: usize, overlap: f64) -> Windowing {
        Windowing { length, overlap }
    }

    #[test]
    fn test_trapezoid() {
        assert_eq!(trapezoid(&[0.0, 1.0, 2.0], &[0.0, 2.0, 2.0]), 3.0);
        assert_eq!(trapezoid(&[1.0], &[5.0]), 0.0);
        assert_eq!(trapezoid(&[], &[]), 0.0);
    }

    #[test]
    fn test_band_power_non_negative_for_any_non_negative_curve() {
        // Deterministic LCG to build assorted non-negative curves
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        for _ in 0..200 {
            let n = 2 + (next() * 300.0) as usize;
            let freqs: Vec<f64> = (0..n).map(|k| k as f64 * 0.5).collect();
            let power: Vec<f64> = (0..n)
                .map(|_| {
                    let v = next();
                    if v < 0.1 { 0.0 } else { v * 1e3 * next() }
                })
                .collect();
            let psd = Psd { freqs, power };
            for name in BandName::ALL {
                assert!(band_power(&psd, &Band::canonical(name)) >= 0.0);
            }
        }
    }

    #[test]
    fn test_welch_bins_and_peak() {
        let fs = 256.0;
        let welch = Welch::new(windowing(256, 0.0), fs);
        let x = sine(10.0, fs, 256);
        let psd = welch.estimate(&x, &vec![false; 256]).unwrap().unwrap();

        assert_eq!(psd.freqs.len(), 129);
        assert!(psd.freqs.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(psd.resolution(), 1.0);
        let peak = psd
            .power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(psd.freqs[peak], 10.0);
        assert!(psd.power.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_density_scaling_preserves_mean_square() {
        // A unit sine has mean square 0.5; with density scaling the PSD
        // integrates to it.
        let fs = 256.0;
        let welch = Welch::new(windowing(256, 0.0), fs);
        let psd = welch
            .estimate(&sine(10.0, fs, 256), &vec![false; 256])
            .unwrap()
            .unwrap();
        let total: f64 = psd.power.iter().sum::<f64>() * psd.resolution();
        assert!((total - 0.5).abs() < 1e-9, "total {total}");

        let alpha = band_power(&psd, &Band::canonical(BandName::Alpha));
        assert!((alpha - 0.5).abs() < 1e-9, "alpha {alpha}");
    }

    #[test]
    fn test_shorter_than_window_is_insufficient() {
        let welch = Welch::new(windowing(256, 0.5), 256.0);
        let err = welch.estimate(&[0.0; 100], &[false; 100]).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InsufficientData {
                samples: 100,
                required: 256
            }
        );
    }

    #[test]
    fn test_fully_flagged_windows_are_skipped() {
        let fs = 128.0;
        let welch = Welch::new(windowing(128, 0.0), fs);
        let x = sine(10.0, fs, 256);

        let mut mask = vec![false; 256];
        mask[..128].iter_mut().for_each(|f| *f = true);
        let masked = welch.estimate(&x, &mask).unwrap().unwrap();
        let clean_half = welch.estimate(&x[128..], &vec![false; 128]).unwrap().unwrap();
        for (a, b) in masked.power.iter().zip(&clean_half.power) {
            assert!((a - b).abs() < 1e-12);
        }

        assert!(welch.estimate(&x, &vec![true; 256]).unwrap().is_none());
    }

    #[test]
    fn test_broadband_covers_full_range() {
        use crate::signal::{Channel, ChannelStatus, ChannelType};

        let fs = 256.0;
        let mut bad = Channel::new("B", ChannelType::Seeg, sine(10.0, fs, 512));
        bad.status = ChannelStatus::Bad;
        let signal = Signal::new(
            fs,
            vec![
                Channel::new("A", ChannelType::Seeg, sine(40.0, fs, 512)),
                bad,
            ],
        )
        .unwrap();
        let out = broadband(&signal, &PipelineConfig::default(), windowing(256, 0.5)).unwrap();

        let a = out.channel("A").unwrap();
        assert_eq!(a.psd.freqs.len(), 129);
        assert_eq!(*a.psd.freqs.last().unwrap(), 128.0);
        assert!((a.power - 0.5).abs() < 1e-6, "power {}", a.power);
        assert!(out.channel("B").is_none());
        assert_eq!(out.omission("B"), Some(&OmissionReason::MarkedBad));
    }

    #[test]
    fn test_broadband_rejects_short_signal() {
        use crate::signal::{Channel, ChannelType};

        let signal = Signal::new(
            256.0,
            vec![Channel::new("A", ChannelType::Seeg, sine(10.0, 256.0, 100))],
        )
        .unwrap();
        let err = broadband(&signal, &PipelineConfig::default(), windowing(256, 0.5)).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData { .. }));
    }

    #[test]
    fn test_overlapping_windows_average() {
        let fs = 128.0;
        let welch = Welch::new(windowing(64, 0.5), fs);
        let x = sine(8.0, fs, 256);
        let psd = welch.estimate(&x, &vec![false; 256]).unwrap().unwrap();
        assert_eq!(psd.freqs.len(), 33);
        assert_eq!(psd.freqs[4], 8.0);
    }
}
