//! Channel table + metadata → [`Signal`].
//!
//! Pure transform: no file access happens here. Readers for the BIDS files
//! that feed it live in `crate::bids::sidecar`.

use serde::{Deserialize, Serialize};

use super::{Channel, ChannelStatus, ChannelType, Signal};
use crate::error::{PipelineError, Result};

/// Which axis of the table runs over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// One row per time point, one column per channel (BIDS `_ieeg.tsv`).
    #[default]
    SamplesInRows,
    /// One row per channel.
    SamplesInColumns,
}

/// Numeric cells of a channel-data table. `header` holds column names when
/// the source had them (may be empty).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Companion metadata for a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalMetadata {
    pub sampling_frequency: Option<f64>,
    pub channel_labels: Vec<String>,
    pub channel_types: Vec<ChannelType>,
    /// Either empty or one entry per label.
    pub channel_units: Vec<Option<String>>,
    /// Either empty or one entry per label.
    pub channel_status: Vec<ChannelStatus>,
}

#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub orientation: Orientation,
    /// Largest tolerated fraction of non-finite samples per channel.
    pub max_nonfinite_fraction: f64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            orientation: Orientation::SamplesInRows,
            max_nonfinite_fraction: 0.0,
        }
    }
}

/// Build a validated signal from a table and its metadata.
pub fn load(table: ChannelTable, meta: &SignalMetadata, opts: &LoaderOptions) -> Result<Signal> {
    let sample_rate = match meta.sampling_frequency {
        None => {
            return Err(PipelineError::MalformedInput(
                "metadata has no SamplingFrequency".into(),
            ));
        }
        Some(fs) if !fs.is_finite() || fs <= 0.0 => {
            return Err(PipelineError::MalformedInput(format!(
                "SamplingFrequency must be positive, got {fs}"
            )));
        }
        Some(fs) => fs,
    };

    let n_labels = meta.channel_labels.len();
    if meta.channel_types.len() != n_labels {
        return Err(PipelineError::MalformedInput(format!(
            "{} channel labels but {} channel types",
            n_labels,
            meta.channel_types.len()
        )));
    }
    for (what, len) in [
        ("units", meta.channel_units.len()),
        ("status", meta.channel_status.len()),
    ] {
        if len != 0 && len != n_labels {
            return Err(PipelineError::MalformedInput(format!(
                "{n_labels} channel labels but {len} channel {what} entries"
            )));
        }
    }

    let columns = split_channels(table, opts.orientation)?;
    if columns.len() != n_labels {
        return Err(PipelineError::MalformedInput(format!(
            "data has {} channels but metadata lists {}",
            columns.len(),
            n_labels
        )));
    }
    if columns.iter().all(|c| c.is_empty()) {
        return Err(PipelineError::EmptySignal);
    }

    let mut offenders = Vec::new();
    let mut channels = Vec::with_capacity(n_labels);
    for (i, mut samples) in columns.into_iter().enumerate() {
        let label = &meta.channel_labels[i];
        let bad = samples.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            let fraction = bad as f64 / samples.len() as f64;
            if fraction > opts.max_nonfinite_fraction {
                offenders.push(format!("{label} ({bad} of {})", samples.len()));
                continue;
            }
            log::warn!(
                "Channel {}: interpolating {} non-finite samples (within tolerance {})",
                label,
                bad,
                opts.max_nonfinite_fraction
            );
            interpolate_nonfinite(&mut samples);
        }

        let mut channel = Channel::new(label.clone(), meta.channel_types[i].clone(), samples);
        channel.unit = meta.channel_units.get(i).cloned().flatten();
        channel.status = meta.channel_status.get(i).copied().unwrap_or_default();
        channel.interpolated = bad;
        channels.push(channel);
    }

    if !offenders.is_empty() {
        return Err(PipelineError::MalformedInput(format!(
            "non-finite samples above tolerance {} in: {}",
            opts.max_nonfinite_fraction,
            offenders.join(", ")
        )));
    }

    Signal::new(sample_rate, channels)
}

/// Turn the table into one sample vector per channel.
fn split_channels(table: ChannelTable, orientation: Orientation) -> Result<Vec<Vec<f64>>> {
    let ChannelTable { header, rows } = table;
    match orientation {
        Orientation::SamplesInRows => {
            let width = rows.first().map(|r| r.len()).unwrap_or(header.len());
            if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
                return Err(PipelineError::MalformedInput(format!(
                    "row {} has {} cells, expected {}",
                    i + 1,
                    row.len(),
                    width
                )));
            }
            let mut columns = vec![Vec::with_capacity(rows.len()); width];
            for row in rows {
                for (c, v) in row.into_iter().enumerate() {
                    columns[c].push(v);
                }
            }
            Ok(columns)
        }
        Orientation::SamplesInColumns => {
            if let Some(first) = rows.first() {
                let len = first.len();
                if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != len) {
                    return Err(PipelineError::MalformedInput(format!(
                        "channel row {} has {} samples, expected {}",
                        i + 1,
                        row.len(),
                        len
                    )));
                }
            }
            Ok(rows)
        }
    }
}

/// Fill runs of non-finite samples linearly between their finite neighbours,
/// holding the nearest finite value at the edges.
fn interpolate_nonfinite(samples: &mut [f64]) {
    let n = samples.len();
    let mut i = 0;
    while i < n {
        if samples[i].is_finite() {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && !samples[i].is_finite() {
            i += 1;
        }
        let before = start.checked_sub(1).map(|j| samples[j]);
        let after = (i < n).then(|| samples[i]);
        match (before, after) {
            (Some(a), Some(b)) => {
                let span = (i - start + 1) as f64;
                for (k, j) in (start..i).enumerate() {
                    let t = (k + 1) as f64 / span;
                    samples[j] = a + (b - a) * t;
                }
            }
            (Some(v), None) | (None, Some(v)) => samples[start..i].fill(v),
            (None, None) => samples[start..i].fill(0.0),
        }
    }
}
