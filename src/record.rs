//! The per-file `ProcessingRecord` and its persisted JSON shape.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::analyzer::connectivity::{BandConnectivity, PlvMatrix};
use crate::bands::{Band, BandName};
use crate::error::{PipelineError, Result};
use crate::signal::Signal;

/// An analysis that can be switched off per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analysis {
    /// Broadband PSD of the unfiltered signal.
    PowerSpectra,
    BandPowers,
    Connectivity,
}

impl Analysis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Analysis::PowerSpectra => "power_spectra",
            Analysis::BandPowers => "band_powers",
            Analysis::Connectivity => "connectivity",
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a channel, a band, or a channel within a band has no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OmissionReason {
    /// Too many samples flagged as artifact.
    ArtifactCeiling { flagged_fraction: f64, ceiling: f64 },
    /// `status = bad` in channels.tsv.
    MarkedBad,
    /// Band does not fit under the recording's Nyquist frequency.
    InvalidBand { message: String },
    /// Every Welch window was fully flagged.
    NoCleanWindows,
    /// No sample is unflagged in both this channel and `partner`.
    NoJointCleanSamples { partner: String },
    /// Switched off for this run.
    Disabled { analysis: Analysis },
}

impl fmt::Display for OmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OmissionReason::ArtifactCeiling {
                flagged_fraction,
                ceiling,
            } => write!(
                f,
                "artifact ceiling ({:.1}% flagged > {:.1}%)",
                flagged_fraction * 100.0,
                ceiling * 100.0
            ),
            OmissionReason::MarkedBad => f.write_str("marked bad"),
            OmissionReason::InvalidBand { message } => write!(f, "invalid band ({message})"),
            OmissionReason::NoCleanWindows => f.write_str("no clean windows"),
            OmissionReason::NoJointCleanSamples { partner } => {
                write!(f, "no clean samples shared with {partner}")
            }
            OmissionReason::Disabled { analysis } => write!(f, "{analysis} disabled"),
        }
    }
}

/// A value, or the explicit reason it is missing.
///
/// Serialized as the bare value, or as `{"omitted": {"reason": ...}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Value(T),
    Omitted(OmissionReason),
}

impl<T> Outcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Value(v) => Some(v),
            Outcome::Omitted(_) => None,
        }
    }

    pub fn omission(&self) -> Option<&OmissionReason> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Omitted(r) => Some(r),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Outcome::Value(v) => v.serialize(serializer),
            Outcome::Omitted(reason) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("omitted", reason)?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutcomeRepr<T> {
    Omitted { omitted: OmissionReason },
    Value(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Outcome<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match OutcomeRepr::deserialize(deserializer)? {
            OutcomeRepr::Omitted { omitted } => Outcome::Omitted(omitted),
            OutcomeRepr::Value(v) => Outcome::Value(v),
        })
    }
}

/// Insertion-ordered map, serialized as a JSON object with keys in order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<K, V>(Vec<(K, V)>);

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<K: PartialEq, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append, or replace the value of an existing key in place.
    pub fn insert(&mut self, key: K, value: V) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: PartialEq<Q>,
        Q: ?Sized,
    {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Serialize, V: Serialize> Serialize for OrderedMap<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, K: Deserialize<'de>, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<K, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor<K, V>(PhantomData<(K, V)>);

        impl<'de, K: Deserialize<'de>, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<K, V> {
            type Value = OrderedMap<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry()? {
                    entries.push((k, v));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Spectral value of one channel in one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandPower {
    pub power: f64,
    /// `(freq_hz, power)` pairs, ascending in frequency.
    pub psd: Vec<[f64; 2]>,
}

/// channel label → broadband `(freq_hz, power)` curve or omission.
pub type PowerSpectra = OrderedMap<String, Outcome<Vec<[f64; 2]>>>;

/// channel label → band → power or omission. Channels in source order.
pub type SpectralResult = OrderedMap<String, OrderedMap<BandName, Outcome<BandPower>>>;

/// band → PLV matrix, insufficient-channels marker, or omission.
pub type ConnectivityResult = OrderedMap<BandName, Outcome<BandConnectivity>>;

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConnectivityRepr {
    Insufficient {
        insufficient_channels: bool,
        surviving_channels: Vec<String>,
    },
    Matrix {
        channels: Vec<String>,
        /// `null` value: the pair has no jointly clean samples.
        pairs: Vec<(String, String, Option<f64>)>,
    },
}

impl Serialize for BandConnectivity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let repr = match self {
            BandConnectivity::InsufficientChannels { surviving } => ConnectivityRepr::Insufficient {
                insufficient_channels: true,
                surviving_channels: surviving.clone(),
            },
            BandConnectivity::Matrix(m) => ConnectivityRepr::Matrix {
                channels: m.labels().to_vec(),
                pairs: m
                    .pairs()
                    .map(|(a, b, v)| (a.to_string(), b.to_string(), v))
                    .collect(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BandConnectivity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match ConnectivityRepr::deserialize(deserializer)? {
            ConnectivityRepr::Insufficient {
                surviving_channels, ..
            } => Ok(BandConnectivity::InsufficientChannels {
                surviving: surviving_channels,
            }),
            ConnectivityRepr::Matrix { channels, pairs } => {
                let n = channels.len();
                let expected = n * n.saturating_sub(1) / 2;
                if pairs.len() != expected {
                    return Err(de::Error::custom(format!(
                        "{n} channels need {expected} pairs, found {}",
                        pairs.len()
                    )));
                }
                let index = |label: &str| {
                    channels
                        .iter()
                        .position(|c| c == label)
                        .ok_or_else(|| de::Error::custom(format!("pair names unknown channel {label}")))
                };
                let mut matrix = PlvMatrix::new(channels.clone());
                for (a, b, v) in &pairs {
                    let (i, j) = (index(a)?, index(b)?);
                    if let Some(v) = v {
                        matrix.set_pair(i, j, *v);
                    }
                }
                Ok(BandConnectivity::Matrix(matrix))
            }
        }
    }
}

/// An entry of the record's omission list. `channel` is `None` for
/// band-wide omissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Omission {
    pub channel: Option<String>,
    pub band: Option<BandName>,
    #[serde(flatten)]
    pub reason: OmissionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub kind: String,
    pub order: usize,
    pub zero_phase: bool,
}

/// Parameters the record was computed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub sample_rate: f64,
    pub window_length: usize,
    pub overlap: f64,
    pub filter: FilterSettings,
    pub artifact_mad_k: f64,
    pub max_flagged_fraction: f64,
    pub max_nonfinite_fraction: f64,
    /// Analyses that ran; the others are `disabled` markers.
    pub analyses: Vec<Analysis>,
    pub bands: Vec<Band>,
}

/// Where a record came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub dataset_id: String,
    pub file_id: String,
    pub subject: Option<String>,
    pub source_files: Vec<String>,
}

/// Analyzer outputs for one file, before assembly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutput {
    pub power_spectra: PowerSpectra,
    pub spectral: SpectralResult,
    pub connectivity: ConnectivityResult,
    pub omissions: Vec<Omission>,
}

/// Final per-file result. Built once by [`assemble`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    dataset_id: String,
    file_id: String,
    subject: Option<String>,
    source_files: Vec<String>,
    timestamp: DateTime<Utc>,
    parameters: ParameterSnapshot,
    /// channel label → non-finite samples filled by interpolation. Only
    /// channels that had any.
    interpolated_samples: OrderedMap<String, usize>,
    power_spectra: PowerSpectra,
    spectral: SpectralResult,
    connectivity: ConnectivityResult,
    omissions: Vec<Omission>,
}

impl ProcessingRecord {
    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn source_files(&self) -> &[String] {
        &self.source_files
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn parameters(&self) -> &ParameterSnapshot {
        &self.parameters
    }

    pub fn interpolated_samples(&self) -> &OrderedMap<String, usize> {
        &self.interpolated_samples
    }

    pub fn power_spectra(&self) -> &PowerSpectra {
        &self.power_spectra
    }

    pub fn spectral(&self) -> &SpectralResult {
        &self.spectral
    }

    pub fn connectivity(&self) -> &ConnectivityResult {
        &self.connectivity
    }

    pub fn omissions(&self) -> &[Omission] {
        &self.omissions
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Merge analyzer outputs and provenance into one record.
///
/// Fails with `IncompleteAnalysis` when the spectral or broadband result and
/// the source signal disagree on channels (unknown, missing, or out of
/// order), when a channel lacks an entry for a band, or when connectivity
/// names a channel the signal does not have.
pub fn assemble(
    signal: &Signal,
    provenance: Provenance,
    parameters: ParameterSnapshot,
    output: AnalysisOutput,
    timestamp: DateTime<Utc>,
) -> Result<ProcessingRecord> {
    let incomplete = |msg: String| Err(PipelineError::IncompleteAnalysis(msg));
    let source: HashSet<&str> = signal.labels().collect();

    if let Some(unknown) = output.spectral.keys().find(|k| !source.contains(k.as_str())) {
        return incomplete(format!("spectral result has unknown channel {unknown}"));
    }
    if let Some(missing) = signal.labels().find(|l| output.spectral.get(*l).is_none()) {
        return incomplete(format!("channel {missing} has no spectral entry"));
    }
    if !output.spectral.keys().map(String::as_str).eq(signal.labels()) {
        return incomplete("spectral channels are not in source order".into());
    }
    if !output.power_spectra.keys().map(String::as_str).eq(signal.labels()) {
        return incomplete("power spectra do not cover the source channels in order".into());
    }

    for (label, per_band) in output.spectral.iter() {
        for band in &parameters.bands {
            if per_band.get(&band.name()).is_none() {
                return incomplete(format!("channel {label} has no {} entry", band.name()));
            }
        }
    }

    for band in &parameters.bands {
        let Some(entry) = output.connectivity.get(&band.name()) else {
            return incomplete(format!("no connectivity entry for {}", band.name()));
        };
        let named: &[String] = match entry {
            Outcome::Value(BandConnectivity::Matrix(m)) => m.labels(),
            Outcome::Value(BandConnectivity::InsufficientChannels { surviving }) => surviving,
            Outcome::Omitted(_) => &[],
        };
        if let Some(unknown) = named.iter().find(|l| !source.contains(l.as_str())) {
            return incomplete(format!(
                "{} connectivity names unknown channel {unknown}",
                band.name()
            ));
        }
    }

    let mut interpolated_samples = OrderedMap::new();
    for ch in signal.channels().iter().filter(|c| c.interpolated > 0) {
        interpolated_samples.insert(ch.label.clone(), ch.interpolated);
    }

    Ok(ProcessingRecord {
        dataset_id: provenance.dataset_id,
        file_id: provenance.file_id,
        subject: provenance.subject,
        source_files: provenance.source_files,
        timestamp,
        parameters,
        interpolated_samples,
        power_spectra: output.power_spectra,
        spectral: output.spectral,
        connectivity: output.connectivity,
        omissions: output.omissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::canonical_bands;
    use crate::signal::{Channel, ChannelType};

    fn signal() -> Signal {
        Signal::new(
            256.0,
            vec![
                Channel::new("LA1", ChannelType::Seeg, vec![0.0; 8]),
                Channel::new("LA2", ChannelType::Seeg, vec![0.0; 8]),
            ],
        )
        .unwrap()
    }

    fn parameters() -> ParameterSnapshot {
        ParameterSnapshot {
            sample_rate: 256.0,
            window_length: 256,
            overlap: 0.0,
            filter: FilterSettings {
                kind: "butterworth_bandpass".into(),
                order: 4,
                zero_phase: true,
            },
            artifact_mad_k: 6.0,
            max_flagged_fraction: 0.3,
            max_nonfinite_fraction: 0.0,
            analyses: vec![Analysis::PowerSpectra, Analysis::BandPowers, Analysis::Connectivity],
            bands: canonical_bands(),
        }
    }

    fn provenance() -> Provenance {
        Provenance {
            dataset_id: "ds003029".into(),
            file_id: "sub-01_task-rest_run-01".into(),
            subject: Some("01".into()),
            source_files: vec!["sub-01_task-rest_run-01_ieeg.tsv".into()],
        }
    }

    fn full_output(labels: &[&str]) -> AnalysisOutput {
        let mut out = AnalysisOutput::default();
        for (c, label) in labels.iter().enumerate() {
            out.power_spectra.insert(
                label.to_string(),
                Outcome::Value(vec![[0.0, 0.5], [1.0, 0.25]]),
            );
            let mut per_band = OrderedMap::new();
            for band in canonical_bands() {
                let outcome = if c == 1 && band.name() == BandName::Gamma {
                    Outcome::Omitted(OmissionReason::ArtifactCeiling {
                        flagged_fraction: 0.4,
                        ceiling: 0.3,
                    })
                } else {
                    Outcome::Value(BandPower {
                        power: 0.125 * (c + 1) as f64,
                        psd: vec![[8.0, 0.1], [9.0, 0.2]],
                    })
                };
                per_band.insert(band.name(), outcome);
            }
            out.spectral.insert(label.to_string(), per_band);
        }
        for band in canonical_bands() {
            let entry = match band.name() {
                BandName::Gamma => Outcome::Value(BandConnectivity::InsufficientChannels {
                    surviving: vec!["LA1".into()],
                }),
                BandName::Delta => Outcome::Omitted(OmissionReason::InvalidBand {
                    message: "test".into(),
                }),
                _ => {
                    let mut m = PlvMatrix::new(labels.iter().map(|s| s.to_string()).collect());
                    m.set_pair(0, 1, 0.75);
                    Outcome::Value(BandConnectivity::Matrix(m))
                }
            };
            out.connectivity.insert(band.name(), entry);
        }
        out.omissions.push(Omission {
            channel: Some("LA2".into()),
            band: Some(BandName::Gamma),
            reason: OmissionReason::ArtifactCeiling {
                flagged_fraction: 0.4,
                ceiling: 0.3,
            },
        });
        out
    }

    fn record() -> ProcessingRecord {
        assemble(
            &signal(),
            provenance(),
            parameters(),
            full_output(&["LA1", "LA2"]),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_assemble_complete() {
        let r = record();
        assert_eq!(r.file_id(), "sub-01_task-rest_run-01");
        assert_eq!(r.spectral().len(), 2);
        assert_eq!(r.omissions().len(), 1);
    }

    #[test]
    fn test_assemble_rejects_unknown_channel() {
        let err = assemble(
            &signal(),
            provenance(),
            parameters(),
            full_output(&["LA1", "LA2", "RH9"]),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::IncompleteAnalysis(ref m) if m.contains("RH9")));
    }

    #[test]
    fn test_assemble_rejects_missing_channel() {
        let mut out = full_output(&["LA1", "LA2"]);
        out.spectral = OrderedMap(out.spectral.0.into_iter().take(1).collect());
        let err = assemble(&signal(), provenance(), parameters(), out, Utc::now()).unwrap_err();
        assert!(matches!(err, PipelineError::IncompleteAnalysis(ref m) if m.contains("LA2")));
    }

    #[test]
    fn test_assemble_rejects_missing_band_entry() {
        let mut out = full_output(&["LA1", "LA2"]);
        out.spectral.0[0].1.0.pop();
        assert!(assemble(&signal(), provenance(), parameters(), out, Utc::now()).is_err());
    }

    #[test]
    fn test_assemble_rejects_reordered_channels() {
        let out = full_output(&["LA2", "LA1"]);
        assert!(assemble(&signal(), provenance(), parameters(), out, Utc::now()).is_err());
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&record().to_json().unwrap()).unwrap();
        assert_eq!(json["dataset_id"], "ds003029");
        assert_eq!(json["parameters"]["filter"]["order"], 4);
        assert_eq!(json["spectral"]["LA1"]["alpha"]["power"], 0.125);
        assert_eq!(
            json["spectral"]["LA2"]["gamma"]["omitted"]["reason"],
            "artifact_ceiling"
        );
        assert_eq!(json["connectivity"]["gamma"]["insufficient_channels"], true);
        assert_eq!(json["connectivity"]["delta"]["omitted"]["reason"], "invalid_band");
        assert_eq!(json["connectivity"]["alpha"]["pairs"][0][2], 0.75);
        assert_eq!(json["omissions"][0]["reason"], "artifact_ceiling");
        assert_eq!(json["omissions"][0]["band"], "gamma");
        assert_eq!(json["power_spectra"]["LA2"][1][1], 0.25);
        assert_eq!(json["parameters"]["analyses"][2], "connectivity");
        assert!(json["interpolated_samples"].as_object().unwrap().is_empty());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_json_keeps_channel_order() {
        let text = record().to_json().unwrap();
        let a = text.find("\"LA1\"").unwrap();
        let b = text.find("\"LA2\"").unwrap();
        assert!(a < b);
        let delta = text.find("\"delta\"").unwrap();
        let gamma = text.find("\"gamma\"").unwrap();
        assert!(delta < gamma);
    }

    #[test]
    fn test_json_parses_back() {
        let r = record();
        let back = ProcessingRecord::from_json(&r.to_json().unwrap()).unwrap();
        assert_eq!(back.file_id(), r.file_id());
        assert_eq!(
            back.spectral().keys().collect::<Vec<_>>(),
            r.spectral().keys().collect::<Vec<_>>()
        );
        assert_eq!(back.spectral(), r.spectral());
        assert_eq!(back.connectivity(), r.connectivity());
        assert_eq!(back.omissions(), r.omissions());
        assert_eq!(back.parameters(), r.parameters());
    }

    #[test]
    fn test_assemble_rejects_missing_power_spectrum() {
        let mut out = full_output(&["LA1", "LA2"]);
        out.power_spectra = OrderedMap(out.power_spectra.0.into_iter().take(1).collect());
        let err = assemble(&signal(), provenance(), parameters(), out, Utc::now()).unwrap_err();
        assert!(matches!(err, PipelineError::IncompleteAnalysis(_)));
    }

    #[test]
    fn test_interpolated_channels_are_recorded() {
        let mut ch = Channel::new("LA2", ChannelType::Seeg, vec![0.0; 8]);
        ch.interpolated = 3;
        let signal = Signal::new(
            256.0,
            vec![Channel::new("LA1", ChannelType::Seeg, vec![0.0; 8]), ch],
        )
        .unwrap();
        let r = assemble(
            &signal,
            provenance(),
            parameters(),
            full_output(&["LA1", "LA2"]),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(r.interpolated_samples().get("LA2"), Some(&3));
        assert_eq!(r.interpolated_samples().get("LA1"), None);

        let json: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(json["interpolated_samples"]["LA2"], 3);
    }

    #[test]
    fn test_undefined_pair_is_null() {
        let m = PlvMatrix::new(vec!["A".into(), "B".into()]);
        let c = BandConnectivity::Matrix(m);
        let json = serde_json::to_value(&c).unwrap();
        assert!(json["pairs"][0][2].is_null());
        let back: BandConnectivity = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_computed_record_parses_back_exactly() {
        let r = crate::analyzer::tests::sample_record();
        let back = ProcessingRecord::from_json(&r.to_json().unwrap()).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_matrix_with_unknown_pair_label_fails_to_parse() {
        let bad = r#"{"channels":["A","B"],"pairs":[["A","Z",0.5]]}"#;
        assert!(serde_json::from_str::<BandConnectivity>(bad).is_err());
    }
}
