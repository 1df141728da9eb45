//! Artifact masking and band-specific filtering.

use super::filter::SosFilter;
use crate::bands::Band;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::record::OmissionReason;
use crate::signal::{Channel, ChannelStatus, Signal};

/// Per-sample artifact flags for one channel. Flagged samples stay in the
/// signal; windowed statistics skip them.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMask {
    flagged: Vec<bool>,
}

impl ArtifactMask {
    pub fn clean(len: usize) -> Self {
        Self {
            flagged: vec![false; len],
        }
    }

    pub fn from_flags(flagged: Vec<bool>) -> Self {
        Self { flagged }
    }

    pub fn is_flagged(&self, i: usize) -> bool {
        self.flagged[i]
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.flagged
    }

    pub fn len(&self) -> usize {
        self.flagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty()
    }

    pub fn flagged_count(&self) -> usize {
        self.flagged.iter().filter(|&&f| f).count()
    }

    pub fn flagged_fraction(&self) -> f64 {
        if self.flagged.is_empty() {
            0.0
        } else {
            self.flagged_count() as f64 / self.flagged.len() as f64
        }
    }
}

/// A band-filtered channel and its artifact mask.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanChannel {
    pub channel: Channel,
    pub mask: ArtifactMask,
}

/// A channel left out of a band's analysis, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOmission {
    pub channel: String,
    pub reason: OmissionReason,
}

/// Output of the preprocessor for one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSignal {
    pub band: Band,
    pub sample_rate: f64,
    /// Length of the source signal, kept even when every channel is dropped.
    pub sample_count: usize,
    /// Surviving channels, in source order.
    pub channels: Vec<CleanChannel>,
    pub omitted: Vec<ChannelOmission>,
}

/// Flag samples with `|x - median| > k * MAD`.
pub fn detect_artifacts(samples: &[f64], k: f64) -> ArtifactMask {
    if samples.is_empty() {
        return ArtifactMask::clean(0);
    }
    let mut scratch = samples.to_vec();
    let center = median(&mut scratch);
    let mut deviations: Vec<f64> = samples.iter().map(|x| (x - center).abs()).collect();
    let threshold = k * median(&mut deviations);

    ArtifactMask::from_flags(
        samples
            .iter()
            .map(|x| (x - center).abs() > threshold)
            .collect(),
    )
}

/// Artifact mask for a channel, or `ChannelQuality` when too much of it is
/// flagged.
pub fn assess_channel(channel: &Channel, config: &PipelineConfig) -> Result<ArtifactMask> {
    let mask = detect_artifacts(&channel.samples, config.artifact_mad_k);
    let fraction = mask.flagged_fraction();
    if fraction > config.max_flagged_fraction {
        return Err(PipelineError::ChannelQuality {
            channel: channel.label.clone(),
            flagged_fraction: fraction,
            ceiling: config.max_flagged_fraction,
        });
    }
    Ok(mask)
}

/// Outcome of screening one channel before analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum Screened {
    Keep(ArtifactMask),
    Drop(OmissionReason),
}

/// Decide whether `channel` takes part in analysis: channels marked bad and
/// channels over the artifact ceiling are dropped.
pub fn screen_channel(channel: &Channel, config: &PipelineConfig) -> Result<Screened> {
    if channel.status == ChannelStatus::Bad {
        return Ok(Screened::Drop(OmissionReason::MarkedBad));
    }
    match assess_channel(channel, config) {
        Ok(mask) => Ok(Screened::Keep(mask)),
        Err(PipelineError::ChannelQuality {
            channel: label,
            flagged_fraction,
            ceiling,
        }) => {
            log::debug!(
                "dropping {} ({:.1}% flagged)",
                label,
                flagged_fraction * 100.0
            );
            Ok(Screened::Drop(OmissionReason::ArtifactCeiling {
                flagged_fraction,
                ceiling,
            }))
        }
        Err(e) => Err(e),
    }
}

/// Restrict `signal` to `band` and mask artifacts.
///
/// Channel quality failures are absorbed here: the channel is dropped from
/// this band and listed in `omitted`. A band reaching the Nyquist frequency
/// is rejected with `InvalidBand`.
pub fn preprocess(signal: &Signal, band: &Band, config: &PipelineConfig) -> Result<BandSignal> {
    let fs = signal.sample_rate();
    band.check_nyquist(fs)?;
    // The band-pass design also needs the high edge strictly inside (0, Nyquist)
    if band.high_hz() >= signal.nyquist() {
        return Err(band.invalid(format!(
            "high edge must be below Nyquist frequency {} Hz",
            signal.nyquist()
        )));
    }

    let filter = SosFilter::butter_bandpass(band.low_hz(), band.high_hz(), fs, config.filter_order);
    let mut channels = Vec::with_capacity(signal.channel_count());
    let mut omitted = Vec::new();

    for channel in signal.channels() {
        match screen_channel(channel, config)? {
            Screened::Keep(mask) => {
                let filtered = filter.filtfilt(&channel.samples);
                channels.push(CleanChannel {
                    channel: channel.with_samples(filtered),
                    mask,
                });
            }
            Screened::Drop(reason) => omitted.push(ChannelOmission {
                channel: channel.label.clone(),
                reason,
            }),
        }
    }

    Ok(BandSignal {
        band: *band,
        sample_rate: fs,
        sample_count: signal.sample_count(),
        channels,
        omitted,
    })
}

/// Median via sort; the slice is reordered.
fn median(vals: &mut [f64]) -> f64 {
    vals.sort_by(|a, b| a.total_cmp(b));
    let n = vals.len();
    if n % 2 == 0 {
        (vals[n / 2 - 1] + vals[n / 2]) / 2.0
    } else {
        vals[n / 2]
    }
}
