use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::filter::{FilterState, TimeScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "bitterguard-dash",
    about = "Scan statistics and reports for the BitterGuard disease detection app",
    version,
    long_about = None
)]
pub struct Args {
    /// Path to the scan database
    #[arg(short, long, env = "BITTERGUARD_DB", default_value = "bitterguard.db")]
    pub database: PathBuf,

    /// Only include scans whose location contains this text
    #[arg(short, long, default_value = "")]
    pub location: String,

    /// Time filter (inferred from --year/--month when omitted)
    #[arg(long, value_enum)]
    pub scope: Option<TimeScope>,

    /// Year for the time filter
    #[arg(short, long)]
    pub year: Option<i32>,

    /// Month (1-12) for the time filter
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month: Option<u32>,

    /// Number of recent scans to list
    #[arg(long, default_value_t = 10)]
    pub recent: usize,

    /// Export the filtered scans as CSV, to PATH or a dated file in the current directory
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = ".")]
    pub report: Option<PathBuf>,

    /// Output format for the dashboard
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Keep refreshing and read filter commands from stdin
    #[arg(long)]
    pub watch: bool,

    /// Seconds between refreshes in watch mode
    #[arg(long, default_value_t = 300)]
    pub interval_secs: u64,

    /// Number of worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Path to custom disease catalog file
    #[arg(long)]
    pub diseases: Option<PathBuf>,

    /// Initialize disease_catalog.txt with the default catalog
    #[arg(long)]
    pub init: bool,

    /// Redact user e-mail addresses and phone numbers
    #[arg(long)]
    pub redact: bool,

    /// List the available location and year filter values
    #[arg(long)]
    pub options: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn filter_state(&self) -> FilterState {
        let scope = self.scope.unwrap_or(match (self.year, self.month) {
            (Some(_), Some(_)) => TimeScope::ByYearAndMonth,
            (Some(_), None) => TimeScope::ByYear,
            _ => TimeScope::All,
        });
        FilterState::new(self.location.clone(), scope, self.year, self.month)
    }
}
