/// One row of the records table, without the JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub file_id: String,
    pub dataset_id: String,
    pub subject: Option<String>,
    pub sample_rate: f64,
    pub window_length: i64,
    pub channel_count: i64,
    pub omission_count: i64,
    pub processed_at: String,
}

/// A file-level failure stored by a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRow {
    pub file_id: String,
    pub dataset_id: String,
    pub path: String,
    pub kind: String,
    pub message: String,
    pub failed_at: String,
}

/// Mean power of one band across every stored channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BandAverage {
    pub band: String,
    pub mean_power: Option<f64>,
    pub channels: i64,
    pub omitted: i64,
}

/// Archive overview for `stats`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ArchiveStats {
    pub records: i64,
    pub datasets: i64,
    pub subjects: i64,
    pub channels: i64,
    pub omissions: i64,
    pub failures: i64,
    pub bands: Vec<BandAverage>,
}
