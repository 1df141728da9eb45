//! Canonical EEG frequency bands.
//!
//! Every band is a half-open range `[low_hz, high_hz)`. The canonical set is
//! fixed, ascending and non-overlapping; bands are validated against the
//! Nyquist frequency of the recording they are applied to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Name of a canonical band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandName {
    Delta,
    Theta,
    Alpha,
    Beta,
    Gamma,
}

impl BandName {
    /// All canonical bands, in ascending frequency order.
    pub const ALL: [BandName; 5] = [
        BandName::Delta,
        BandName::Theta,
        BandName::Alpha,
        BandName::Beta,
        BandName::Gamma,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BandName::Delta => "delta",
            BandName::Theta => "theta",
            BandName::Alpha => "alpha",
            BandName::Beta => "beta",
            BandName::Gamma => "gamma",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "delta" => Some(BandName::Delta),
            "theta" => Some(BandName::Theta),
            "alpha" => Some(BandName::Alpha),
            "beta" => Some(BandName::Beta),
            "gamma" => Some(BandName::Gamma),
            _ => None,
        }
    }

    /// Canonical `[low, high)` edges in Hz.
    fn canonical_range(&self) -> (f64, f64) {
        match self {
            BandName::Delta => (0.5, 4.0),
            BandName::Theta => (4.0, 8.0),
            BandName::Alpha => (8.0, 13.0),
            BandName::Beta => (13.0, 30.0),
            BandName::Gamma => (30.0, 100.0),
        }
    }
}

impl fmt::Display for BandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated frequency band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBand")]
pub struct Band {
    name: BandName,
    low_hz: f64,
    high_hz: f64,
}

/// Unvalidated wire form; deserialization goes through `Band::new`.
#[derive(Deserialize)]
struct RawBand {
    name: BandName,
    low_hz: f64,
    high_hz: f64,
}

impl TryFrom<RawBand> for Band {
    type Error = PipelineError;

    fn try_from(raw: RawBand) -> Result<Self> {
        Band::new(raw.name, raw.low_hz, raw.high_hz)
    }
}

impl Band {
    /// Build a band, rejecting non-finite, negative or empty ranges.
    pub fn new(name: BandName, low_hz: f64, high_hz: f64) -> Result<Self> {
        let invalid = |reason: &str| PipelineError::InvalidBand {
            name: name.to_string(),
            low_hz,
            high_hz,
            reason: reason.to_string(),
        };
        if !low_hz.is_finite() || !high_hz.is_finite() {
            return Err(invalid("edges must be finite"));
        }
        if low_hz < 0.0 {
            return Err(invalid("low edge must be non-negative"));
        }
        if low_hz >= high_hz {
            return Err(invalid("low edge must be below high edge"));
        }
        Ok(Band {
            name,
            low_hz,
            high_hz,
        })
    }

    /// The canonical band for `name`.
    pub fn canonical(name: BandName) -> Self {
        let (low_hz, high_hz) = name.canonical_range();
        Band {
            name,
            low_hz,
            high_hz,
        }
    }

    /// Fails with `InvalidBand` when `high_hz > sample_rate / 2`.
    pub fn check_nyquist(&self, sample_rate: f64) -> Result<()> {
        let nyquist = sample_rate / 2.0;
        if self.high_hz > nyquist {
            return Err(self.invalid(format!(
                "high edge exceeds Nyquist frequency {nyquist} Hz"
            )));
        }
        Ok(())
    }

    pub(crate) fn invalid(&self, reason: String) -> PipelineError {
        PipelineError::InvalidBand {
            name: self.name.to_string(),
            low_hz: self.low_hz,
            high_hz: self.high_hz,
            reason,
        }
    }

    pub fn name(&self) -> BandName {
        self.name
    }

    pub fn low_hz(&self) -> f64 {
        self.low_hz
    }

    pub fn high_hz(&self) -> f64 {
        self.high_hz
    }

    /// Half-open membership test.
    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.low_hz && freq_hz < self.high_hz
    }
}

/// All canonical bands, ascending.
pub fn canonical_bands() -> Vec<Band> {
    BandName::ALL.iter().map(|&n| Band::canonical(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_bands_ascending_and_disjoint() {
        let bands = canonical_bands();
        assert_eq!(bands.len(), 5);
        for pair in bands.windows(2) {
            assert!(pair[0].high_hz() <= pair[1].low_hz());
            assert!(pair[0].low_hz() < pair[1].low_hz());
        }
        for band in &bands {
            assert!(band.low_hz() < band.high_hz());
        }
    }

    #[test]
    fn test_half_open_membership() {
        let alpha = Band::canonical(BandName::Alpha);
        assert!(alpha.contains(8.0));
        assert!(alpha.contains(12.99));
        assert!(!alpha.contains(13.0));
        assert!(!alpha.contains(7.99));
    }

    #[test]
    fn test_rejects_inverted_and_empty_ranges() {
        assert!(matches!(
            Band::new(BandName::Alpha, 13.0, 8.0),
            Err(PipelineError::InvalidBand { .. })
        ));
        assert!(Band::new(BandName::Alpha, 8.0, 8.0).is_err());
        assert!(Band::new(BandName::Delta, -1.0, 4.0).is_err());
        assert!(Band::new(BandName::Delta, f64::NAN, 4.0).is_err());
    }

    #[test]
    fn test_nyquist_invariant() {
        let gamma = Band::canonical(BandName::Gamma);
        // 256 Hz: Nyquist 128, gamma [30, 100) fits
        assert!(gamma.check_nyquist(256.0).is_ok());
        // Exactly at Nyquist is allowed by construction
        let edge = Band::new(BandName::Gamma, 30.0, 128.0).unwrap();
        assert!(edge.check_nyquist(256.0).is_ok());
        // 100 Hz recording: Nyquist 50, gamma must be rejected, never clipped
        let err = gamma.check_nyquist(100.0).unwrap_err();
        match err {
            PipelineError::InvalidBand { high_hz, .. } => assert_eq!(high_hz, 100.0),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_band_name_parse_roundtrip() {
        for name in BandName::ALL {
            assert_eq!(BandName::parse(name.as_str()), Some(name));
        }
        assert_eq!(BandName::parse("ALPHA"), Some(BandName::Alpha));
        assert_eq!(BandName::parse("mu"), None);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Band = serde_json::from_str(r#"{"name":"beta","low_hz":13.0,"high_hz":30.0}"#).unwrap();
        assert_eq!(ok, Band::canonical(BandName::Beta));
        let bad = serde_json::from_str::<Band>(r#"{"name":"beta","low_hz":30.0,"high_hz":13.0}"#);
        assert!(bad.is_err());
    }
}
