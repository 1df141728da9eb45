//! Readers for the BIDS files that accompany a recording.

use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::{BidsError, Result};
use crate::signal::loader::ChannelTable;

/// The fields of `*_ieeg.json` the pipeline uses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IeegSidecar {
    #[serde(deserialize_with = "number_or_na")]
    pub sampling_frequency: Option<f64>,
    pub task_name: Option<String>,
    #[serde(deserialize_with = "number_or_na")]
    pub power_line_frequency: Option<f64>,
    #[serde(rename = "iEEGReference")]
    pub ieeg_reference: Option<String>,
}

/// One row of `*_channels.tsv`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelRow {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// BIDS allows `"n/a"` where a number is expected.
fn number_or_na<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(f64),
        Text(String),
    }
    Ok(match Option::<Lenient>::deserialize(d)? {
        Some(Lenient::Number(v)) => Some(v),
        Some(Lenient::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

pub fn read_sidecar(path: &Path) -> Result<IeegSidecar> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| BidsError::Json {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_channels(path: &Path) -> Result<Vec<ChannelRow>> {
    let mut reader = tsv_reader().from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        let row: ChannelRow = row?;
        rows.push(row);
    }
    Ok(rows)
}

/// Read a channel-data table. `n/a` and empty cells become NaN so the loader
/// can report them; a leading `time` column is dropped.
pub fn read_data_table(path: &Path) -> Result<ChannelTable> {
    let mut reader = tsv_reader().flexible(true).from_path(path)?;
    let mut header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let skip_time = header
        .first()
        .is_some_and(|h| h.eq_ignore_ascii_case("time"));
    if skip_time {
        header.remove(0);
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let cells = record.iter().skip(usize::from(skip_time));
        let row = cells
            .map(|cell| parse_cell(cell).ok_or_else(|| BidsError::Parse {
                path: path.display().to_string(),
                line: i + 2,
                value: cell.to_string(),
            }))
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }

    Ok(ChannelTable { header, rows })
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("n/a") {
        return Some(f64::NAN);
    }
    cell.parse().ok()
}

fn tsv_reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.delimiter(b'\t').has_headers(true);
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub-01_ieeg.json");
        fs::write(
            &path,
            r#"{"SamplingFrequency": 512, "TaskName": "rest", "PowerLineFrequency": "n/a",
                "iEEGReference": "bipolar", "Manufacturer": "Natus"}"#,
        )
        .unwrap();
        let s = read_sidecar(&path).unwrap();
        assert_eq!(s.sampling_frequency, Some(512.0));
        assert_eq!(s.task_name.as_deref(), Some("rest"));
        assert_eq!(s.power_line_frequency, None);
        assert_eq!(s.ieeg_reference.as_deref(), Some("bipolar"));
    }

    #[test]
    fn test_sidecar_without_sampling_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_ieeg.json");
        fs::write(&path, r#"{"TaskName": "rest"}"#).unwrap();
        assert_eq!(read_sidecar(&path).unwrap().sampling_frequency, None);
    }

    #[test]
    fn test_malformed_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_ieeg.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_sidecar(&path), Err(BidsError::Json { .. })));
    }

    #[test]
    fn test_read_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_channels.tsv");
        fs::write(
            &path,
            "name\ttype\tunits\tlow_cutoff\tstatus\nLA1\tSEEG\tuV\t0.1\tgood\nLA2\tSEEG\tuV\t0.1\tbad\n",
        )
        .unwrap();
        let rows = read_channels(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "LA1");
        assert_eq!(rows[0].kind.as_deref(), Some("SEEG"));
        assert_eq!(rows[1].status.as_deref(), Some("bad"));
    }

    #[test]
    fn test_read_data_table_drops_time_and_maps_na() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_ieeg.tsv");
        fs::write(&path, "time\tLA1\tLA2\n0.0\t1.5\t-2\n0.004\tn/a\t3e-1\n").unwrap();
        let table = read_data_table(&path).unwrap();
        assert_eq!(table.header, vec!["LA1", "LA2"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec![1.5, -2.0]);
        assert!(table.rows[1][0].is_nan());
        assert_eq!(table.rows[1][1], 0.3);
    }

    #[test]
    fn test_read_data_table_rejects_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_ieeg.tsv");
        fs::write(&path, "LA1\n1.0\nspike\n").unwrap();
        match read_data_table(&path) {
            Err(BidsError::Parse { line, value, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(value, "spike");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
