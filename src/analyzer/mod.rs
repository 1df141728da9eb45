pub mod connectivity;
pub mod filter;
pub mod preprocess;
pub mod spectral;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;

use crate::bands::{canonical_bands, BandName};
use crate::bids::Recording;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::record::{
    self, Analysis, AnalysisOutput, BandPower, FilterSettings, Omission, OmissionReason, OrderedMap,
    Outcome, ParameterSnapshot, ProcessingRecord, Provenance,
};
use crate::signal::Signal;
use crate::storage::RecordSink;
use connectivity::BandConnectivity;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Epoch windows: `length` samples, consecutive windows sharing
/// `round(overlap * length)` of them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Windowing {
    pub length: usize,
    pub overlap: f64,
}

impl Windowing {
    /// Samples between consecutive window starts, at least 1.
    pub fn step(&self) -> usize {
        let shared = (self.overlap * self.length as f64).round() as usize;
        self.length.saturating_sub(shared).max(1)
    }

    /// Start index of every full window in a signal of `n` samples.
    pub fn starts(&self, n: usize) -> Result<Vec<usize>> {
        if self.length == 0 || n < self.length {
            return Err(PipelineError::InsufficientData {
                samples: n,
                required: self.length,
            });
        }
        Ok((0..=n - self.length).step_by(self.step()).collect())
    }
}

/// A file that could not be processed.
#[derive(Debug, Clone, PartialEq)]
pub struct FileFailure {
    pub dataset_id: String,
    pub file_id: String,
    pub path: PathBuf,
    pub error: PipelineError,
}

impl FileFailure {
    fn new(rec: &Recording, error: PipelineError) -> Self {
        Self {
            dataset_id: rec.dataset_id.clone(),
            file_id: rec.file_id.clone(),
            path: rec.data_path.clone(),
            error,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchSummary {
    pub processed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Records computed but rejected by at least one sink.
    pub store_errors: u64,
}

/// Run the broadband PSD and every canonical band through preprocessing,
/// spectral and connectivity analysis.
///
/// Channel-quality drops, bands above Nyquist and disabled analyses become
/// omission markers; any other error aborts the whole signal.
pub fn analyze_signal(
    signal: &Signal,
    config: &PipelineConfig,
) -> Result<(ParameterSnapshot, AnalysisOutput)> {
    let windowing = config.windowing(signal.sample_rate());
    let bands = canonical_bands();

    let labels: Vec<String> = signal.labels().map(String::from).collect();
    let index: HashMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();
    let mut per_channel: Vec<OrderedMap<BandName, Outcome<BandPower>>> =
        vec![OrderedMap::new(); labels.len()];
    let mut output = AnalysisOutput::default();

    for analysis in [Analysis::PowerSpectra, Analysis::BandPowers, Analysis::Connectivity] {
        if !config.is_enabled(analysis) {
            output.omissions.push(Omission {
                channel: None,
                band: None,
                reason: OmissionReason::Disabled { analysis },
            });
        }
    }

    if config.power_spectra {
        let broadband = spectral::broadband(signal, config, windowing)?;
        for label in &labels {
            let entry = match broadband.channel(label) {
                Some(cs) => Outcome::Value(cs.psd.points()),
                None => {
                    let reason = broadband
                        .omission(label)
                        .cloned()
                        .unwrap_or(OmissionReason::NoCleanWindows);
                    output.omissions.push(Omission {
                        channel: Some(label.clone()),
                        band: None,
                        reason: reason.clone(),
                    });
                    Outcome::Omitted(reason)
                }
            };
            output.power_spectra.insert(label.clone(), entry);
        }
    } else {
        let disabled = OmissionReason::Disabled {
            analysis: Analysis::PowerSpectra,
        };
        for label in &labels {
            output
                .power_spectra
                .insert(label.clone(), Outcome::Omitted(disabled.clone()));
        }
    }

    let band_powers_off = OmissionReason::Disabled {
        analysis: Analysis::BandPowers,
    };
    let connectivity_off = OmissionReason::Disabled {
        analysis: Analysis::Connectivity,
    };

    for band in &bands {
        let name = band.name();
        if !config.band_powers && !config.connectivity {
            for entry in per_channel.iter_mut() {
                entry.insert(name, Outcome::Omitted(band_powers_off.clone()));
            }
            output
                .connectivity
                .insert(name, Outcome::Omitted(connectivity_off.clone()));
            continue;
        }

        let mut band_signal = match preprocess::preprocess(signal, band, config) {
            Ok(bs) => bs,
            Err(e @ PipelineError::InvalidBand { .. }) => {
                log::debug!("{name}: skipped ({e})");
                let reason = OmissionReason::InvalidBand {
                    message: e.to_string(),
                };
                for entry in per_channel.iter_mut() {
                    entry.insert(name, Outcome::Omitted(reason.clone()));
                }
                output
                    .connectivity
                    .insert(name, Outcome::Omitted(reason.clone()));
                output.omissions.push(Omission {
                    channel: None,
                    band: Some(name),
                    reason,
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut dropped = band_signal.omitted.clone();
        if config.band_powers {
            let spectrum = spectral::analyze(&band_signal, windowing)?;
            for cs in &spectrum.channels {
                per_channel[index[cs.label.as_str()]].insert(
                    name,
                    Outcome::Value(BandPower {
                        power: cs.power,
                        psd: cs.psd.points(),
                    }),
                );
            }
            // Connectivity only over channels that also have a spectrum
            band_signal
                .channels
                .retain(|c| !spectrum.omitted.iter().any(|o| o.channel == c.channel.label));
            dropped.extend(spectrum.omitted);
        } else {
            for clean in &band_signal.channels {
                per_channel[index[clean.channel.label.as_str()]]
                    .insert(name, Outcome::Omitted(band_powers_off.clone()));
            }
        }

        for om in dropped {
            let i = index[om.channel.as_str()];
            per_channel[i].insert(name, Outcome::Omitted(om.reason.clone()));
            output.omissions.push(Omission {
                channel: Some(om.channel),
                band: Some(name),
                reason: om.reason,
            });
        }

        if !config.connectivity {
            output
                .connectivity
                .insert(name, Outcome::Omitted(connectivity_off.clone()));
            continue;
        }
        let conn = connectivity::analyze(&band_signal, windowing)?;
        if let BandConnectivity::Matrix(m) = &conn {
            for (a, b, _) in m.pairs().filter(|(_, _, v)| v.is_none()) {
                output.omissions.push(Omission {
                    channel: Some(a.to_string()),
                    band: Some(name),
                    reason: OmissionReason::NoJointCleanSamples {
                        partner: b.to_string(),
                    },
                });
            }
        }
        output.connectivity.insert(name, Outcome::Value(conn));
    }

    for (label, entry) in labels.into_iter().zip(per_channel) {
        output.spectral.insert(label, entry);
    }

    let parameters = ParameterSnapshot {
        sample_rate: signal.sample_rate(),
        window_length: windowing.length,
        overlap: windowing.overlap,
        filter: FilterSettings {
            kind: "butterworth_bandpass".to_string(),
            order: config.filter_order,
            zero_phase: true,
        },
        artifact_mad_k: config.artifact_mad_k,
        max_flagged_fraction: config.max_flagged_fraction,
        max_nonfinite_fraction: config.max_nonfinite_fraction,
        analyses: config.enabled_analyses(),
        bands,
    };
    Ok((parameters, output))
}

/// Analyze a loaded signal and assemble its record.
pub fn process_signal(
    signal: &Signal,
    provenance: Provenance,
    config: &PipelineConfig,
    timestamp: DateTime<Utc>,
) -> Result<ProcessingRecord> {
    let (parameters, output) = analyze_signal(signal, config)?;
    for om in &output.omissions {
        let scope = match (om.channel.as_deref(), om.band) {
            (Some(ch), Some(band)) => format!("{ch} in {}", band.as_str()),
            (Some(ch), None) => format!("{ch} broadband"),
            (None, Some(band)) => format!("band {}", band.as_str()),
            (None, None) => "run".to_string(),
        };
        if matches!(om.reason, OmissionReason::Disabled { .. }) {
            log::debug!("{}: {}: {}", provenance.file_id, scope, om.reason);
        } else {
            log::warn!("{}: {} omitted: {}", provenance.file_id, scope, om.reason);
        }
    }
    record::assemble(signal, provenance, parameters, output, timestamp)
}

/// Full per-file pipeline: read the BIDS files, analyze, assemble.
pub fn process_recording(rec: &Recording, config: &PipelineConfig) -> Result<ProcessingRecord> {
    log::debug!("Processing: {}", rec.file_id);

    let signal = rec.load_signal(&config.loader_options())?;
    log::debug!(
        "{}: {} channels, {:.1} s at {} Hz",
        rec.file_id,
        signal.channel_count(),
        signal.duration_secs(),
        signal.sample_rate()
    );
    let provenance = Provenance {
        dataset_id: rec.dataset_id.clone(),
        file_id: rec.file_id.clone(),
        subject: rec.subject.clone(),
        source_files: rec
            .source_paths()
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    };
    process_signal(&signal, provenance, config, Utc::now())
}

fn process_one(
    rec: &Recording,
    config: &PipelineConfig,
    cancel: &AtomicBool,
) -> std::result::Result<ProcessingRecord, FileFailure> {
    if cancel.load(Ordering::Relaxed) {
        return Err(FileFailure::new(rec, PipelineError::Cancelled));
    }
    process_recording(rec, config).map_err(|e| FileFailure::new(rec, e))
}

/// Process recordings in parallel on a pool of `jobs` threads. Results are
/// in input order. Setting `cancel` stops new files from starting.
pub fn process(
    recordings: &[Recording],
    config: &PipelineConfig,
    jobs: usize,
    cancel: &AtomicBool,
) -> std::result::Result<Vec<std::result::Result<ProcessingRecord, FileFailure>>, BatchError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()?;
    Ok(pool.install(|| {
        recordings
            .par_iter()
            .map(|rec| process_one(rec, config, cancel))
            .collect()
    }))
}

/// Process recordings and hand each result to every sink.
///
/// Processes in chunks: analyze a chunk in parallel with rayon, store the
/// results on this thread, then move to the next chunk. Sinks therefore need
/// not be `Sync`, and only one chunk of records is held in memory.
pub fn run_batch(
    recordings: &[Recording],
    config: &PipelineConfig,
    jobs: usize,
    cancel: &AtomicBool,
    sinks: &mut [&mut dyn RecordSink],
) -> std::result::Result<BatchSummary, BatchError> {
    let mut summary = BatchSummary::default();
    if recordings.is_empty() {
        log::info!("No recordings to process");
        return Ok(summary);
    }

    let jobs = jobs.max(1);
    log::info!("Processing {} recordings with {} workers", recordings.len(), jobs);

    let pb = ProgressBar::new(recordings.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    // Chunk size = jobs * 2 gives good parallelism while keeping memory bounded.
    for chunk in recordings.chunks(jobs * 2) {
        let results: Vec<_> = pool.install(|| {
            chunk
                .par_iter()
                .map(|rec| {
                    let result = process_one(rec, config, cancel);
                    pb.inc(1);
                    result
                })
                .collect()
        });

        for (rec, result) in chunk.iter().zip(results) {
            match result {
                Ok(record) => {
                    let sources = rec.source_paths();
                    let mut stored = true;
                    for sink in sinks.iter_mut() {
                        if let Err(e) = sink.store(&record, &sources) {
                            log::error!("Storage error for {}: {}", record.file_id(), e);
                            stored = false;
                        }
                    }
                    if stored {
                        summary.processed += 1;
                    } else {
                        summary.store_errors += 1;
                    }
                }
                Err(failure) if failure.error == PipelineError::Cancelled => {
                    summary.cancelled += 1;
                }
                Err(failure) => {
                    log::warn!("{} failed: {}", failure.file_id, failure.error);
                    for sink in sinks.iter_mut() {
                        if let Err(e) = sink.store_failure(&failure) {
                            log::error!("Storage error for {}: {}", failure.file_id, e);
                        }
                    }
                    summary.failed += 1;
                }
            }
        }

        pb.set_message(format!("{} stored, {} failed", summary.processed, summary.failed));
    }

    pb.finish_with_message(format!(
        "Done: {} processed, {} failed, {} cancelled",
        summary.processed, summary.failed, summary.cancelled
    ));

    Ok(summary)
}
