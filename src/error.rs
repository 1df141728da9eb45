use thiserror::Error;

/// Failure taxonomy of the per-file pipeline.
///
/// `ChannelQuality` and `InvalidBand` are recoverable: the preprocessor and the
/// per-file driver turn them into omission markers. Everything else aborts the
/// file it was raised for (and only that file).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    #[error("Signal has no samples")]
    EmptySignal,
    #[error("Invalid band {name} [{low_hz}, {high_hz}) Hz: {reason}")]
    InvalidBand {
        name: String,
        low_hz: f64,
        high_hz: f64,
        reason: String,
    },
    #[error("Channel {channel}: {flagged_fraction:.3} of samples flagged as artifact (ceiling {ceiling})")]
    ChannelQuality {
        channel: String,
        flagged_fraction: f64,
        ceiling: f64,
    },
    #[error("Insufficient data: {samples} samples, need at least {required} for one window")]
    InsufficientData { samples: usize, required: usize },
    #[error("Incomplete analysis: {0}")]
    IncompleteAnalysis(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Cancelled before processing started")]
    Cancelled,
}

impl PipelineError {
    /// Short machine-readable tag, used for the failures table.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedInput(_) => "malformed_input",
            PipelineError::EmptySignal => "empty_signal",
            PipelineError::InvalidBand { .. } => "invalid_band",
            PipelineError::ChannelQuality { .. } => "channel_quality",
            PipelineError::InsufficientData { .. } => "insufficient_data",
            PipelineError::IncompleteAnalysis(_) => "incomplete_analysis",
            PipelineError::Io(_) => "io",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
