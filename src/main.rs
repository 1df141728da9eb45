use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ieeg_pipeline::analyzer::connectivity::BandConnectivity;
use ieeg_pipeline::bands::{canonical_bands, BandName};
use ieeg_pipeline::bids::{self, Recording};
use ieeg_pipeline::config::AppConfig;
use ieeg_pipeline::record::{Outcome, ProcessingRecord};
use ieeg_pipeline::storage::{JsonArchive, RecordSink};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(name = "ieeg-pipeline", version, about = "Spectral and connectivity analysis of BIDS iEEG recordings")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the iEEG recordings found under the given directories
    Discover {
        /// BIDS roots to search (defaults to config file data_dirs)
        paths: Vec<PathBuf>,
    },

    /// Run the pipeline over every recording and store the results
    Process {
        /// BIDS roots to search (defaults to config file data_dirs)
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Re-process recordings that already have a stored record
        #[arg(long)]
        force: bool,

        /// Only process recordings whose file id contains this pattern
        #[arg(long)]
        filter: Option<String>,

        /// Also write a JSON archive under this directory
        #[arg(long)]
        out: Option<PathBuf>,

        /// Epoch window in samples
        #[arg(long)]
        window: Option<usize>,

        /// Window overlap fraction in [0, 1)
        #[arg(long)]
        overlap: Option<f64>,

        /// Butterworth filter order
        #[arg(long)]
        filter_order: Option<usize>,

        /// Artifact threshold in MADs from the channel median
        #[arg(long)]
        artifact_k: Option<f64>,

        /// Largest flagged fraction a channel may have
        #[arg(long)]
        max_flagged: Option<f64>,

        /// Skip the broadband power spectrum of each channel
        #[arg(long)]
        no_power_spectra: bool,

        /// Skip per-band power
        #[arg(long)]
        no_band_powers: bool,

        /// Skip the PLV connectivity matrices
        #[arg(long)]
        no_connectivity: bool,
    },

    /// List stored records
    List {
        /// Only records of this dataset
        #[arg(long)]
        dataset: Option<String>,
    },

    /// Show band power and connectivity of one stored record
    Show {
        /// File id (entity prefix, e.g. sub-01_task-rest_run-01)
        file_id: String,

        /// Dataset the record belongs to (required when the file id is stored
        /// under more than one dataset)
        #[arg(long)]
        dataset: Option<String>,

        /// Print the stored JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Print the canonical frequency bands
    Bands,

    /// Show archive statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(ieeg_pipeline::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let mut db = ieeg_pipeline::db::Database::open(&db_path)
        .context("Failed to open database")?;

    match cli.command {
        Commands::Discover { paths } => {
            let recordings = find_recordings(&config, paths)?;
            if recordings.is_empty() {
                println!("No iEEG recordings found.");
                return Ok(());
            }

            println!(
                "{:<12} {:<8} {:<40} {:>7} {:>8} {:>6}",
                "Dataset", "Subject", "File", "Sidecar", "Channels", "Events"
            );
            println!("{}", "-".repeat(86));
            for rec in &recordings {
                println!(
                    "{:<12} {:<8} {:<40} {:>7} {:>8} {:>6}",
                    rec.dataset_id,
                    rec.subject.as_deref().unwrap_or("-"),
                    truncate(&rec.file_id, 40),
                    yes_no(rec.sidecar_path.is_some()),
                    yes_no(rec.channels_path.is_some()),
                    yes_no(rec.events_path.is_some()),
                );
            }
            println!();
            println!("{} recordings", recordings.len());
        }

        Commands::Process {
            paths,
            jobs,
            force,
            filter,
            out,
            window,
            overlap,
            filter_order,
            artifact_k,
            max_flagged,
            no_power_spectra,
            no_band_powers,
            no_connectivity,
        } => {
            let mut pipeline = config.pipeline.clone();
            if let Some(w) = window {
                pipeline.window_length = Some(w);
            }
            if let Some(o) = overlap {
                pipeline.overlap = o;
            }
            if let Some(n) = filter_order {
                pipeline.filter_order = n;
            }
            if let Some(k) = artifact_k {
                pipeline.artifact_mad_k = k;
            }
            if let Some(f) = max_flagged {
                pipeline.max_flagged_fraction = f;
            }
            pipeline.power_spectra &= !no_power_spectra;
            pipeline.band_powers &= !no_band_powers;
            pipeline.connectivity &= !no_connectivity;
            pipeline.validate().context("Invalid pipeline settings")?;

            let mut recordings = find_recordings(&config, paths)?;
            if let Some(pattern) = &filter {
                recordings.retain(|r| r.file_id.contains(pattern.as_str()));
            }
            let found = recordings.len();
            if !force {
                let mut pending = Vec::with_capacity(found);
                for rec in recordings {
                    if !db
                        .record_exists(&rec.dataset_id, &rec.file_id)
                        .context("Query failed")?
                    {
                        pending.push(rec);
                    }
                }
                recordings = pending;
            }
            let skipped = found - recordings.len();

            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let mut archive = out.or(config.output_dir.clone()).map(JsonArchive::new);
            let cancel = AtomicBool::new(false);

            let mut sinks: Vec<&mut dyn RecordSink> = Vec::new();
            sinks.push(&mut db);
            if let Some(a) = archive.as_mut() {
                sinks.push(a);
            }
            let result = ieeg_pipeline::analyzer::run_batch(
                &recordings,
                &pipeline,
                workers,
                &cancel,
                &mut sinks,
            )
            .context("Processing failed")?;

            println!(
                "Processing complete: {} processed, {} failed, {} skipped, {} storage errors",
                result.processed, result.failed, skipped, result.store_errors
            );
        }

        Commands::List { dataset } => {
            let records = db.list_records(dataset.as_deref()).context("Query failed")?;
            if records.is_empty() {
                println!("No stored records.");
                return Ok(());
            }

            println!(
                "{:<12} {:<8} {:<40} {:>8} {:>6} {:>5} {:>5}",
                "Dataset", "Subject", "File", "Rate", "Window", "Chan", "Omit"
            );
            println!("{}", "-".repeat(90));
            for r in &records {
                println!(
                    "{:<12} {:<8} {:<40} {:>8.1} {:>6} {:>5} {:>5}",
                    r.dataset_id,
                    r.subject.as_deref().unwrap_or("-"),
                    truncate(&r.file_id, 40),
                    r.sample_rate,
                    r.window_length,
                    r.channel_count,
                    r.omission_count,
                );
            }
            println!();
            println!("{} records", records.len());
        }

        Commands::Show {
            file_id,
            dataset,
            json,
        } => {
            let dataset = match dataset {
                Some(d) => d,
                None => {
                    let mut found = db.datasets_with_file(&file_id).context("Query failed")?;
                    if found.len() > 1 {
                        anyhow::bail!(
                            "\"{}\" is stored under {} datasets ({}); pass --dataset",
                            file_id,
                            found.len(),
                            found.join(", ")
                        );
                    }
                    match found.pop() {
                        Some(d) => d,
                        None => {
                            println!("No stored record for \"{}\".", file_id);
                            return Ok(());
                        }
                    }
                }
            };
            let Some(record) = db.get_record(&dataset, &file_id).context("Query failed")? else {
                println!("No stored record for \"{}\" in {}.", file_id, dataset);
                return Ok(());
            };

            if json {
                println!("{}", record.to_json().context("Failed to serialize record")?);
            } else {
                print_record(&record);
            }
        }

        Commands::Bands => {
            println!("{:<8} {:>8} {:>8}", "Band", "Low Hz", "High Hz");
            println!("{}", "-".repeat(26));
            for band in canonical_bands() {
                println!(
                    "{:<8} {:>8.1} {:>8.1}",
                    band.name(),
                    band.low_hz(),
                    band.high_hz()
                );
            }
        }

        Commands::Stats => {
            let stats = db.get_archive_stats().context("Failed to get stats")?;

            println!("Archive Statistics");
            println!("==================");
            println!("Records:          {}", stats.records);
            println!("Datasets:         {}", stats.datasets);
            println!("Subjects:         {}", stats.subjects);
            println!("Channels:         {}", stats.channels);
            println!("Omissions:        {}", stats.omissions);
            println!("Failed files:     {}", stats.failures);
            println!();

            if !stats.bands.is_empty() {
                println!("Bands:");
                for b in &stats.bands {
                    println!(
                        "  {:<8} mean {:>12} over {:>5} channels ({} omitted)",
                        b.band,
                        b.mean_power.map(|p| format!("{p:.4e}")).unwrap_or_else(|| "-".into()),
                        b.channels,
                        b.omitted
                    );
                }
                println!();
            }

            let failures = db.list_failures().context("Query failed")?;
            if !failures.is_empty() {
                println!("Failures:");
                for f in failures.iter().take(10) {
                    println!(
                    "  {:<12} {:<40} {:<20} {}",
                    f.dataset_id,
                    truncate(&f.file_id, 40),
                    f.kind,
                    f.message
                );
                }
                if failures.len() > 10 {
                    println!("  ... and {} more", failures.len() - 10);
                }
            }
        }
    }

    Ok(())
}

/// Resolve search paths (CLI args > config data_dirs) and walk them.
fn find_recordings(config: &AppConfig, paths: Vec<PathBuf>) -> Result<Vec<Recording>> {
    let roots = if !paths.is_empty() {
        paths
    } else if !config.data_dirs.is_empty() {
        config.data_dirs.clone()
    } else {
        anyhow::bail!(
            "No directories to search. Pass paths as arguments or set data_dirs in config."
        );
    };
    Ok(bids::discover(&roots))
}

fn print_record(record: &ProcessingRecord) {
    let params = record.parameters();
    println!("{} ({})", record.file_id(), record.dataset_id());
    println!(
        "Processed {}  |  {:.1} Hz, window {} samples, overlap {:.2}",
        record.timestamp().format("%Y-%m-%d %H:%M:%S UTC"),
        params.sample_rate,
        params.window_length,
        params.overlap
    );
    let analyses: Vec<&str> = params.analyses.iter().map(|a| a.as_str()).collect();
    println!("Analyses: {}", analyses.join(", "));
    if !record.interpolated_samples().is_empty() {
        let filled: Vec<String> = record
            .interpolated_samples()
            .iter()
            .map(|(ch, n)| format!("{ch} ({n})"))
            .collect();
        println!("Interpolated samples: {}", filled.join(", "));
    }
    println!();

    print!("{:<16}", "Channel");
    for name in BandName::ALL {
        print!(" {:>11}", name.as_str());
    }
    println!();
    println!("{}", "-".repeat(16 + 12 * BandName::ALL.len()));
    for (channel, per_band) in record.spectral().iter() {
        print!("{:<16}", truncate(channel, 16));
        for name in BandName::ALL {
            let cell = match per_band.get(&name) {
                Some(Outcome::Value(bp)) => format!("{:.3e}", bp.power),
                Some(Outcome::Omitted(_)) => "omitted".to_string(),
                None => "-".to_string(),
            };
            print!(" {:>11}", cell);
        }
        println!();
    }
    println!();

    println!("Connectivity (mean PLV):");
    for (name, entry) in record.connectivity().iter() {
        let summary = match entry {
            Outcome::Value(BandConnectivity::Matrix(m)) => match m.mean() {
                Some(mean) => format!("{mean:.3} over {} channels", m.len()),
                None => "-".to_string(),
            },
            Outcome::Value(BandConnectivity::InsufficientChannels { surviving }) => {
                format!("insufficient channels ({} surviving)", surviving.len())
            }
            Outcome::Omitted(reason) => format!("omitted: {reason}"),
        };
        println!("  {:<8} {}", name.as_str(), summary);
    }

    if !record.omissions().is_empty() {
        println!();
        println!("Omissions:");
        for om in record.omissions() {
            println!(
                "  {:<16} {:<8} {}",
                om.channel.as_deref().unwrap_or("*"),
                om.band.map(|b| b.as_str()).unwrap_or("*"),
                om.reason
            );
        }
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 3).collect();
        format!("{cut}...")
    }
}
