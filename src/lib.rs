pub mod analyzer;
pub mod bands;
pub mod bids;
pub mod config;
pub mod db;
pub mod error;
pub mod record;
pub mod signal;
pub mod storage;

/// Application name for XDG paths
pub const APP_NAME: &str = "ieeg-pipeline";
