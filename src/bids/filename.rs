use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Entities parsed from a BIDS file name.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BidsEntities {
    pub subject: Option<String>,
    pub session: Option<String>,
    pub task: Option<String>,
    pub acquisition: Option<String>,
    pub run: Option<String>,
}

// key-value pairs: sub-01_ses-postop_task-rest_run-02
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|_)(?P<key>[a-zA-Z]+)-(?P<value>[a-zA-Z0-9]+)").unwrap()
});

// OpenNeuro accession, e.g. ds003029
static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ds\d{6}$").unwrap());

/// Parse `sub`, `ses`, `task`, `acq` and `run` from a file name or entity
/// prefix. Unknown keys are ignored.
pub fn parse_entities(name: &str) -> BidsEntities {
    let mut entities = BidsEntities::default();
    for caps in ENTITY_RE.captures_iter(name) {
        let value = Some(caps["value"].to_string());
        match &caps["key"] {
            "sub" => entities.subject = value,
            "ses" => entities.session = value,
            "task" => entities.task = value,
            "acq" => entities.acquisition = value,
            "run" => entities.run = value,
            _ => {}
        }
    }
    entities
}

/// Split `sub-01_task-rest_ieeg.tsv` into (`sub-01_task-rest`, `ieeg`, `tsv`).
pub fn split_suffix(file_name: &str) -> Option<(&str, &str, &str)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let (prefix, suffix) = stem.rsplit_once('_')?;
    Some((prefix, suffix, ext))
}

/// Dataset id for a file: the nearest ancestor named like an OpenNeuro
/// accession, else the directory holding `dataset_description.json`, else
/// `"unknown"`.
pub fn dataset_id(path: &Path) -> String {
    let ancestors: Vec<&Path> = path.ancestors().skip(1).collect();

    for dir in &ancestors {
        if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
            if ACCESSION_RE.is_match(name) {
                return name.to_string();
            }
        }
    }

    for dir in &ancestors {
        if dir.join("dataset_description.json").is_file() {
            if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                return name.to_string();
            }
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_full_entities() {
        let e = parse_entities("sub-pt01_ses-presurgery_task-ictal_acq-ecog_run-01");
        assert_eq!(e.subject.as_deref(), Some("pt01"));
        assert_eq!(e.session.as_deref(), Some("presurgery"));
        assert_eq!(e.task.as_deref(), Some("ictal"));
        assert_eq!(e.acquisition.as_deref(), Some("ecog"));
        assert_eq!(e.run.as_deref(), Some("01"));
    }

    #[test]
    fn test_partial_entities() {
        let e = parse_entities("sub-01_task-rest_ieeg.tsv");
        assert_eq!(e.subject.as_deref(), Some("01"));
        assert_eq!(e.task.as_deref(), Some("rest"));
        assert_eq!(e.session, None);
        assert_eq!(e.run, None);
    }

    #[test]
    fn test_no_entities() {
        assert_eq!(parse_entities("recording.tsv"), BidsEntities::default());
    }

    #[test]
    fn test_split_suffix() {
        assert_eq!(
            split_suffix("sub-01_task-rest_ieeg.tsv"),
            Some(("sub-01_task-rest", "ieeg", "tsv"))
        );
        assert_eq!(
            split_suffix("sub-01_task-rest_channels.tsv"),
            Some(("sub-01_task-rest", "channels", "tsv"))
        );
        assert_eq!(split_suffix("README"), None);
        assert_eq!(split_suffix("participants.tsv"), None);
    }

    #[test]
    fn test_dataset_id_from_accession() {
        let p = PathBuf::from("/data/openneuro/ds003029/sub-01/ieeg/sub-01_task-rest_ieeg.tsv");
        assert_eq!(dataset_id(&p), "ds003029");
    }

    #[test]
    fn test_dataset_id_nearest_accession_wins() {
        let p = PathBuf::from("/mirror/ds000001/ds004100/sub-01/ieeg/x_ieeg.tsv");
        assert_eq!(dataset_id(&p), "ds004100");
    }

    #[test]
    fn test_dataset_id_not_accession() {
        // ds + 5 digits is not an accession
        let p = PathBuf::from("/nonexistent/ds12345/sub-01/ieeg/x_ieeg.tsv");
        assert_eq!(dataset_id(&p), "unknown");
    }

    #[test]
    fn test_dataset_id_from_description() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("epilepsy_study");
        let ieeg = root.join("sub-01").join("ieeg");
        std::fs::create_dir_all(&ieeg).unwrap();
        std::fs::write(root.join("dataset_description.json"), "{}").unwrap();
        assert_eq!(dataset_id(&ieeg.join("sub-01_ieeg.tsv")), "epilepsy_study");
    }
}
