//! # Protobench Metrics Library
//!
//! Batch measurement pipeline for multi-protocol (HTTP/MQTT/CoAP) load tests.
//! The library reduces the raw artifacts of independent test runs into
//! per-scenario statistical summaries that can be compared across the test
//! dimensions: protocol, auth mode, client count and repetition.
//!
//! ## Inputs
//!
//! - **Per-client sample files**: CSV rows written by the load generators
//!   (`run_id,proto,client_id,ts,rtt,status,error`, RTT in seconds)
//! - **Free-text logs**: arbitrary lines, of which only latency/timeout/error
//!   markers contribute
//! - **Packet captures**: `.pcap`/`.pcapng` files, analyzed through an external
//!   capture-analysis tool (tshark) behind the [`capture::CaptureAnalyzer`] trait
//!
//! ## Architecture Overview
//!
//! - `scenario`: recovers the `(mode, protocol, N, repetition)` key from paths
//! - `samples`: turns one raw source into a [`samples::SampleSet`]
//! - `stats`: reduces a sample set into a [`stats::SummaryRecord`]
//! - `aggregate`: pools per-client files into per-scenario rollups
//! - `capture`: throughput, frame counts and frame sizes from captures
//! - `results`: canonical CSV tables and the optional JSON run report
//! - `pipeline`: directory walking and per-item failure containment
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use protobench_metrics::pipeline::{run_latency, LatencyConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LatencyConfig {
//!         root: "results/paper_run_open".into(),
//!         out: "out/latency.csv".into(),
//!         ..Default::default()
//!     };
//!     let outcome = run_latency(&config)?;
//!     println!("rows written: {}", outcome.rows_written);
//!     Ok(())
//! }
//! ```
//!
//! Processing is strictly sequential: every file is processed to completion
//! before the next one starts, in lexicographic path order, so the row order
//! of every output table is deterministic for a given directory snapshot.

/// Scenario identity recovered from file naming conventions
pub mod scenario;

/// Latency sample extraction from structured and free-text sources
///
/// Two interchangeable strategies share one post-processing step:
/// - Structured (CSV) extraction by RTT column alias with explicit units
/// - Pattern-based extraction from free-form log lines
/// - Per-source outlier rejection against a multiple of the median
pub mod samples;

/// Descriptive statistics over latency samples
///
/// Nearest-rank percentiles, population standard deviation, successive
/// difference jitter, 3-sigma outlier counts and loss rate.
pub mod stats;

/// Per-scenario aggregation across repetitions and clients
pub mod aggregate;

/// Capture-level metrics via an external capture-analysis tool
///
/// Contains the `CaptureAnalyzer` abstraction and the tshark-backed
/// implementation, protocol filter resolution and throughput derivation.
pub mod capture;

/// Canonical output tables and run reports
pub mod results;

/// Batch drivers wiring discovery, extraction and output together
pub mod pipeline;

/// Command-line interface and configuration
pub mod cli;

pub mod logging;

pub mod utils;

pub use aggregate::{aggregate, Aggregation, ScenarioAggregate, ScenarioGroup};
pub use capture::{CaptureAnalyzer, CaptureError, CaptureRecord, CaptureStats, TsharkAnalyzer};
pub use pipeline::{BatchOutcome, PipelineError};
pub use samples::{RttUnit, SampleSet};
pub use scenario::{identify, Mode, Protocol, ScenarioKey};
pub use stats::{summarize, SummaryRecord};

/// The current version of the metrics pipeline
///
/// Populated from Cargo.toml and recorded in run reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default outlier multiplier
    ///
    /// Samples greater than this multiple of their source's median are
    /// discarded before statistics are computed.
    pub const OUTLIER_MULTIPLIER: f64 = 10.0;

    /// Default timeout for one invocation of the capture-analysis tool
    pub const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

    /// Default capture-analysis executable, resolved through `PATH`
    pub const TSHARK_BINARY: &str = "tshark";

    /// Extensions considered by the per-file latency driver
    pub const LOG_EXTENSIONS: &[&str] = &["log", "txt", "csv"];

    /// Extensions considered by the capture driver
    pub const CAPTURE_EXTENSIONS: &[&str] = &["pcap", "pcapng"];

    /// Maximum length of the `error` cell in the capture table
    pub const ERROR_MESSAGE_LIMIT: usize = 200;

    /// Decimal places for latency, rate and duration outputs
    pub const VALUE_DECIMALS: u32 = 6;

    /// Decimal places for frame-length statistics
    pub const FRAME_LEN_DECIMALS: u32 = 3;
}
