pub mod filename;
pub mod sidecar;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::signal::loader::{self, ChannelTable, LoaderOptions, Orientation, SignalMetadata};
use crate::signal::{ChannelStatus, ChannelType, Signal};

#[derive(Error, Debug)]
pub enum BidsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("{path}:{line}: not a number: {value:?}")]
    Parse {
        path: String,
        line: usize,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, BidsError>;

impl From<BidsError> for PipelineError {
    fn from(e: BidsError) -> Self {
        match e {
            BidsError::Io(e) => PipelineError::Io(e.to_string()),
            other => PipelineError::MalformedInput(other.to_string()),
        }
    }
}

const DATA_SUFFIX: &str = "_ieeg.tsv";

/// One iEEG recording and its companion files.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub dataset_id: String,
    /// Entity prefix shared by the data file and its companions.
    pub file_id: String,
    pub subject: Option<String>,
    pub data_path: PathBuf,
    pub sidecar_path: Option<PathBuf>,
    pub channels_path: Option<PathBuf>,
    pub events_path: Option<PathBuf>,
}

impl Recording {
    /// Group a `*_ieeg.tsv` file with the companions next to it.
    pub fn from_data_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let prefix = name.strip_suffix(DATA_SUFFIX)?;
        let dir = path.parent().unwrap_or(Path::new(""));
        let companion = |suffix: &str| {
            let p = dir.join(format!("{prefix}_{suffix}"));
            p.is_file().then_some(p)
        };
        Some(Self {
            dataset_id: filename::dataset_id(path),
            file_id: prefix.to_string(),
            subject: filename::parse_entities(prefix).subject,
            data_path: path.to_path_buf(),
            sidecar_path: companion("ieeg.json"),
            channels_path: companion("channels.tsv"),
            events_path: companion("events.tsv"),
        })
    }

    /// Data file first, then the companions that exist.
    pub fn source_paths(&self) -> Vec<PathBuf> {
        std::iter::once(&self.data_path)
            .chain(self.sidecar_path.iter())
            .chain(self.channels_path.iter())
            .chain(self.events_path.iter())
            .cloned()
            .collect()
    }

    /// Read the data table and companions into a validated [`Signal`].
    pub fn load_signal(&self, opts: &LoaderOptions) -> std::result::Result<Signal, PipelineError> {
        let table = sidecar::read_data_table(&self.data_path)?;
        let sampling_frequency = match &self.sidecar_path {
            Some(p) => sidecar::read_sidecar(p)?.sampling_frequency,
            None => None,
        };
        let channels = match &self.channels_path {
            Some(p) => Some(sidecar::read_channels(p)?),
            None => None,
        };

        let (table, meta) = build_metadata(table, channels, sampling_frequency, opts.orientation)?;
        loader::load(table, &meta, opts)
    }
}

/// Pair the table with channel metadata. With a channels.tsv, table columns
/// are matched to it by name (order taken from channels.tsv); without one,
/// labels come from the table header. Header names only label channels when
/// samples run down the rows.
fn build_metadata(
    table: ChannelTable,
    channels: Option<Vec<sidecar::ChannelRow>>,
    sampling_frequency: Option<f64>,
    orientation: Orientation,
) -> std::result::Result<(ChannelTable, SignalMetadata), PipelineError> {
    let by_column = orientation == Orientation::SamplesInRows;
    let Some(rows) = channels else {
        if !by_column {
            return Err(PipelineError::MalformedInput(
                "channel-per-row data needs a channels.tsv for channel names".into(),
            ));
        }
        let meta = SignalMetadata {
            sampling_frequency,
            channel_types: table
                .header
                .iter()
                .map(|_| ChannelType::Other("n/a".into()))
                .collect(),
            channel_labels: table.header.clone(),
            ..SignalMetadata::default()
        };
        return Ok((table, meta));
    };

    let table = if by_column && !table.header.is_empty() {
        reorder_columns(table, &rows)?
    } else {
        table
    };

    let meta = SignalMetadata {
        sampling_frequency,
        channel_labels: rows.iter().map(|r| r.name.clone()).collect(),
        channel_types: rows
            .iter()
            .map(|r| ChannelType::from(r.kind.as_deref().unwrap_or("n/a")))
            .collect(),
        channel_units: rows
            .iter()
            .map(|r| r.units.clone().filter(|u| u != "n/a"))
            .collect(),
        channel_status: rows
            .iter()
            .map(|r| r.status.as_deref().map(ChannelStatus::parse).unwrap_or_default())
            .collect(),
    };
    Ok((table, meta))
}

fn reorder_columns(
    table: ChannelTable,
    rows: &[sidecar::ChannelRow],
) -> std::result::Result<ChannelTable, PipelineError> {
    if table.header.len() != rows.len() {
        return Err(PipelineError::MalformedInput(format!(
            "data has {} channels but channels.tsv lists {}",
            table.header.len(),
            rows.len()
        )));
    }
    let width = table.header.len();
    if let Some((i, row)) = table.rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(PipelineError::MalformedInput(format!(
            "row {} has {} cells, header has {}",
            i + 1,
            row.len(),
            width
        )));
    }
    let order = rows
        .iter()
        .map(|r| {
            table.header.iter().position(|h| *h == r.name).ok_or_else(|| {
                PipelineError::MalformedInput(format!(
                    "channel {} from channels.tsv has no data column",
                    r.name
                ))
            })
        })
        .collect::<std::result::Result<Vec<usize>, _>>()?;

    if order.iter().enumerate().all(|(i, &j)| i == j) {
        return Ok(table);
    }
    let rows_out = table
        .rows
        .into_iter()
        .map(|row| order.iter().map(|&j| row[j]).collect())
        .collect();
    Ok(ChannelTable {
        header: rows.iter().map(|r| r.name.clone()).collect(),
        rows: rows_out,
    })
}

/// Walk `paths` for `*_ieeg.tsv` files. Results are sorted by data path and
/// deduplicated.
pub fn discover(paths: &[PathBuf]) -> Vec<Recording> {
    let mut found: BTreeMap<PathBuf, Recording> = BTreeMap::new();

    for path in paths {
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rec) = Recording::from_data_path(entry.path()) {
                found.entry(rec.data_path.clone()).or_insert(rec);
            }
        }
    }

    log::debug!("Discovered {} recordings", found.len());
    found.into_values().collect()
}
