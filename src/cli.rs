//! # Command-Line Interface
//!
//! Argument definitions for the three batch commands and their conversion
//! into the driver configurations in [`crate::pipeline`].
//!
//! ```text
//! protobench-metrics latency --root results/paper_run_open --out out/latency.csv
//! protobench-metrics summary --root results --out out/latency_summary.csv --out-jitter out/jitter_summary.csv
//! protobench-metrics pcap --root captures --out out/pcap_metrics.csv --tool-timeout 2m
//! ```

use crate::pipeline::{CaptureConfig, LatencyConfig, SummaryConfig};
use crate::samples::RttUnit;
use crate::utils::expand_home;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Protobench Metrics - latency, jitter and capture metrics for protocol load tests
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Verbose output
    #[clap(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Also write logs to this file
    #[clap(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Per-file latency statistics for every log/csv/txt file under a root
    Latency(LatencyArgs),

    /// Per-scenario latency and jitter rollups of per-client sample files
    Summary(SummaryArgs),

    /// Throughput and frame statistics for every capture under a root
    Pcap(PcapArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Latency(_) => "latency",
            Command::Summary(_) => "summary",
            Command::Pcap(_) => "pcap",
        }
    }
}

/// Unit of the RTT column in structured sources
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum RttUnitArg {
    #[clap(name = "seconds")]
    Seconds,

    #[clap(name = "milliseconds")]
    Milliseconds,
}

impl From<RttUnitArg> for RttUnit {
    fn from(arg: RttUnitArg) -> Self {
        match arg {
            RttUnitArg::Seconds => RttUnit::Seconds,
            RttUnitArg::Milliseconds => RttUnit::Milliseconds,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct LatencyArgs {
    /// Directory to scan recursively
    #[clap(long)]
    pub root: PathBuf,

    /// Output CSV file
    #[clap(long)]
    pub out: PathBuf,

    /// Drop samples above this multiple of the per-file median (<= 0 disables)
    #[clap(long, default_value_t = crate::defaults::OUTLIER_MULTIPLIER)]
    pub outlier_mult: f64,

    /// Unit of the RTT column in CSV sources
    #[clap(long, value_enum, default_value_t = RttUnitArg::Seconds)]
    pub rtt_unit: RttUnitArg,

    /// Write a JSON run report to this file
    #[clap(long)]
    pub report: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct SummaryArgs {
    /// Directory to scan recursively for metrics_*_id*.csv files
    #[clap(long)]
    pub root: PathBuf,

    /// Scenario latency CSV
    #[clap(long)]
    pub out: PathBuf,

    /// Scenario jitter CSV
    #[clap(long)]
    pub out_jitter: PathBuf,

    /// Drop samples above this multiple of the per-file median (<= 0 disables)
    #[clap(long, default_value_t = crate::defaults::OUTLIER_MULTIPLIER)]
    pub outlier_mult: f64,

    /// Write a JSON run report to this file
    #[clap(long)]
    pub report: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct PcapArgs {
    /// Directory to scan recursively for .pcap/.pcapng files
    #[clap(long)]
    pub root: PathBuf,

    /// Output CSV file
    #[clap(long)]
    pub out: PathBuf,

    /// Append to an existing table instead of replacing it
    #[clap(long, default_value_t = false)]
    pub append: bool,

    /// Capture-analysis executable
    #[clap(long, default_value = crate::defaults::TSHARK_BINARY)]
    pub tshark: PathBuf,

    /// Timeout for one tool invocation (e.g. "120s", "2m")
    #[clap(long, value_parser = parse_duration, default_value = "120s")]
    pub tool_timeout: Duration,

    /// Write a JSON run report to this file
    #[clap(long)]
    pub report: Option<PathBuf>,
}

impl From<&LatencyArgs> for LatencyConfig {
    fn from(args: &LatencyArgs) -> Self {
        Self {
            root: expand_home(&args.root),
            out: expand_home(&args.out),
            outlier_multiplier: args.outlier_mult,
            rtt_unit: args.rtt_unit.into(),
            report: args.report.as_deref().map(expand_home),
        }
    }
}

impl From<&SummaryArgs> for SummaryConfig {
    fn from(args: &SummaryArgs) -> Self {
        Self {
            root: expand_home(&args.root),
            out: expand_home(&args.out),
            out_jitter: expand_home(&args.out_jitter),
            outlier_multiplier: args.outlier_mult,
            report: args.report.as_deref().map(expand_home),
        }
    }
}

impl From<&PcapArgs> for CaptureConfig {
    fn from(args: &PcapArgs) -> Self {
        Self {
            root: expand_home(&args.root),
            out: expand_home(&args.out),
            append: args.append,
            tshark: expand_home(&args.tshark),
            tool_timeout: args.tool_timeout,
            report: args.report.as_deref().map(expand_home),
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num <= 0.0 {
        return Err(format!("Duration must be positive: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("Duration out of range: {}", s))?;
    if duration.is_zero() {
        return Err(format!("Duration is too small: {}", s));
    }

    Ok(duration)
}
