use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::Windowing;
use crate::record::Analysis;
use crate::signal::loader::{LoaderOptions, Orientation};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid pipeline setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// BIDS roots to search (used when `process`/`discover` get no CLI paths).
    pub data_dirs: Vec<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// JSON archive root. No archive is written when unset.
    pub output_dir: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Analysis parameters (`[pipeline]` table).
    pub pipeline: PipelineConfig,
}

/// Parameters of the per-file pipeline. Shared read-only by all workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Epoch window in samples. Overrides `window_seconds` when set.
    pub window_length: Option<usize>,
    /// Epoch window in seconds, converted with the recording's sample rate.
    pub window_seconds: f64,
    /// Fraction of a window shared with the next one, in `[0, 1)`.
    pub overlap: f64,
    /// Butterworth order of each of the high-pass and low-pass stages.
    pub filter_order: usize,
    /// Samples further than `k` MADs from the channel median are artifacts.
    pub artifact_mad_k: f64,
    /// Channels with a larger flagged fraction are dropped.
    pub max_flagged_fraction: f64,
    /// Tolerated non-finite fraction per channel; 0 rejects any NaN/Inf.
    pub max_nonfinite_fraction: f64,
    pub orientation: Orientation,
    /// Broadband PSD per channel of the unfiltered signal.
    pub power_spectra: bool,
    /// Welch band power per channel and band.
    pub band_powers: bool,
    /// PLV matrix per band.
    pub connectivity: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_length: None,
            window_seconds: 2.0,
            overlap: 0.5,
            filter_order: 4,
            artifact_mad_k: 6.0,
            max_flagged_fraction: 0.3,
            max_nonfinite_fraction: 0.0,
            orientation: Orientation::SamplesInRows,
            power_spectra: true,
            band_powers: true,
            connectivity: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if let Some(len) = self.window_length {
            if len < 2 {
                return invalid("window_length", "must be at least 2 samples");
            }
        } else if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return invalid("window_seconds", "must be a positive number");
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return invalid("overlap", "must be in [0, 1)");
        }
        if !(1..=10).contains(&self.filter_order) {
            return invalid("filter_order", "must be between 1 and 10");
        }
        if !(self.artifact_mad_k.is_finite() && self.artifact_mad_k > 0.0) {
            return invalid("artifact_mad_k", "must be a positive number");
        }
        if !(0.0..=1.0).contains(&self.max_flagged_fraction) {
            return invalid("max_flagged_fraction", "must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.max_nonfinite_fraction) {
            return invalid("max_nonfinite_fraction", "must be in [0, 1]");
        }
        Ok(())
    }

    /// Window length and overlap for a recording at `sample_rate`.
    pub fn windowing(&self, sample_rate: f64) -> Windowing {
        let length = self
            .window_length
            .unwrap_or_else(|| (self.window_seconds * sample_rate).round() as usize);
        Windowing {
            length: length.max(2),
            overlap: self.overlap,
        }
    }

    /// Enabled analyses, in output order.
    pub fn enabled_analyses(&self) -> Vec<Analysis> {
        [
            (Analysis::PowerSpectra, self.power_spectra),
            (Analysis::BandPowers, self.band_powers),
            (Analysis::Connectivity, self.connectivity),
        ]
        .into_iter()
        .filter_map(|(analysis, on)| on.then_some(analysis))
        .collect()
    }

    pub fn is_enabled(&self, analysis: Analysis) -> bool {
        match analysis {
            Analysis::PowerSpectra => self.power_spectra,
            Analysis::BandPowers => self.band_powers,
            Analysis::Connectivity => self.connectivity,
        }
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            orientation: self.orientation,
            max_nonfinite_fraction: self.max_nonfinite_fraction,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/ieeg-pipeline/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse TOML text, rejecting out-of-range pipeline settings.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let config: AppConfig = toml::from_str(contents).map_err(|e| e.to_string())?;
        config.pipeline.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("ieeg-pipeline.db")
    } else {
        PathBuf::from("ieeg-pipeline.db")
    }
}
