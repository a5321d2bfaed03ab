use std::path::PathBuf;

use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};

use crate::error::{ExpeditionError, Result};
use crate::model::AnalysisWindow;
use crate::providers::Provider;

/// Window length when `--start` is omitted.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Parser, Debug)]
#[command(name = "expedition")]
#[command(version)]
#[command(about = "Detect, diagnose and propose remediations for marketing-metric anomalies")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// JSON snapshot of metrics, market and strategy data, and past incidents
    #[arg(long, global = true, default_value = "demos/snapshot.json")]
    pub snapshot: PathBuf,

    /// TOML config file; every field is optional
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// First day of the analysis window (YYYY-MM-DD). Default: 30 days before --end
    #[arg(long, global = true)]
    pub start: Option<NaiveDate>,

    /// Last day of the analysis window, the "as of" date. Default: latest date in the snapshot
    #[arg(long, global = true)]
    pub end: Option<NaiveDate>,

    /// Text-generation provider; overrides the config file
    #[arg(long, global = true, value_enum)]
    pub provider: Option<Provider>,

    /// Print machine-readable JSON instead of the coloured summary
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List anomalies without diagnosing them
    Scan {
        /// Only this channel
        #[arg(long)]
        channel: Option<String>,
    },
    /// Run the full diagnostic pipeline once
    Diagnose {
        /// Pin the anomaly on this channel (requires --metric)
        #[arg(long, requires = "metric")]
        channel: Option<String>,
        /// Pin the anomaly on this metric (requires --channel)
        #[arg(long, requires = "channel")]
        metric: Option<String>,
    },
    /// Diagnose the top anomalies across all channels
    Batch {
        /// Write the markdown report here
        #[arg(long)]
        output: Option<PathBuf>,
        /// Overrides batch.max_anomalies
        #[arg(long)]
        max_anomalies: Option<usize>,
        /// Overrides batch.max_concurrent
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

/// Window from the optional flags. `latest` is the newest date the data
/// source knows about; it stands in for `--end` when that is omitted.
pub fn resolve_window(start: Option<NaiveDate>, end: Option<NaiveDate>, latest: Option<NaiveDate>) -> Result<AnalysisWindow> {
    let end = end
        .or(latest)
        .ok_or_else(|| ExpeditionError::Config("no --end given and the snapshot has no metric dates".into()))?;
    let start = start.unwrap_or(end - Duration::days(DEFAULT_WINDOW_DAYS - 1));
    AnalysisWindow::new(start, end)
        .ok_or_else(|| ExpeditionError::Config(format!("--start {start} is after --end {end}")))
}
