pub mod loader;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Electrode/channel type tag (BIDS `channels.tsv` `type` column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelType {
    /// Stereo-EEG depth electrode
    Seeg,
    /// Electrocorticography grid or strip
    Ecog,
    /// Deep brain stimulation lead
    Dbs,
    Eeg,
    Other(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Seeg => "SEEG",
            ChannelType::Ecog => "ECOG",
            ChannelType::Dbs => "DBS",
            ChannelType::Eeg => "EEG",
            ChannelType::Other(s) => s,
        }
    }
}

impl From<String> for ChannelType {
    fn from(s: String) -> Self {
        match s.trim().to_uppercase().as_str() {
            "SEEG" => ChannelType::Seeg,
            "ECOG" => ChannelType::Ecog,
            "DBS" => ChannelType::Dbs,
            "EEG" => ChannelType::Eeg,
            _ => ChannelType::Other(s.trim().to_string()),
        }
    }
}

impl From<&str> for ChannelType {
    fn from(s: &str) -> Self {
        ChannelType::from(s.to_string())
    }
}

impl From<ChannelType> for String {
    fn from(t: ChannelType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BIDS channel status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Good,
    Bad,
}

impl ChannelStatus {
    /// Anything other than an explicit "bad" counts as good (BIDS `n/a` included).
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("bad") {
            ChannelStatus::Bad
        } else {
            ChannelStatus::Good
        }
    }
}

/// One channel of a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub label: String,
    pub kind: ChannelType,
    pub unit: Option<String>,
    pub status: ChannelStatus,
    pub samples: Vec<f64>,
    /// Non-finite input samples replaced by linear interpolation.
    pub interpolated: usize,
}

impl Channel {
    pub fn new(label: impl Into<String>, kind: ChannelType, samples: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            kind,
            unit: None,
            status: ChannelStatus::Good,
            samples,
            interpolated: 0,
        }
    }

    /// Same metadata, different samples. Used by stages that derive a new
    /// signal from an existing one.
    pub fn with_samples(&self, samples: Vec<f64>) -> Self {
        Self {
            label: self.label.clone(),
            kind: self.kind.clone(),
            unit: self.unit.clone(),
            status: self.status,
            samples,
            interpolated: self.interpolated,
        }
    }
}

/// Multichannel signal with one shared sample rate and length.
///
/// Construct through [`Signal::new`], which enforces `fs > 0`, `N > 0`,
/// equal channel lengths and unique labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    sample_rate: f64,
    channels: Vec<Channel>,
}

impl Signal {
    pub fn new(sample_rate: f64, channels: Vec<Channel>) -> Result<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(PipelineError::MalformedInput(format!(
                "sampling frequency must be a positive number, got {sample_rate}"
            )));
        }
        if channels.is_empty() {
            return Err(PipelineError::MalformedInput("signal has no channels".into()));
        }
        let len = channels[0].samples.len();
        if len == 0 {
            return Err(PipelineError::EmptySignal);
        }
        if let Some(ch) = channels.iter().find(|c| c.samples.len() != len) {
            return Err(PipelineError::MalformedInput(format!(
                "channel {} has {} samples, expected {}",
                ch.label,
                ch.samples.len(),
                len
            )));
        }
        let mut seen = HashSet::new();
        for ch in &channels {
            if !seen.insert(ch.label.as_str()) {
                return Err(PipelineError::MalformedInput(format!(
                    "duplicate channel label {}",
                    ch.label
                )));
            }
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.label.as_str())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.channels[0].samples.len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate
    }
}
