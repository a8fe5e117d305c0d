//! # Batch Pipeline Drivers
//!
//! Entry points that walk a results tree, run the extraction components on
//! every discovered file and write the canonical tables.
//!
//! ## Failure Policy
//!
//! - Per-item failures (unreadable file, capture tool failure) are contained
//!   at the item boundary: they are logged, recorded in the
//!   [`BatchOutcome`], and the batch continues.
//! - Finding nothing to process is the only batch-level failure
//!   ([`PipelineError::NoInputs`] / [`PipelineError::NoSamples`]).
//! - Output tables are opened once per run and written sequentially.
//!
//! Files are processed one at a time in lexicographic path order.

use crate::aggregate::aggregate;
use crate::capture::{extract_capture, CaptureAnalyzer};
use crate::defaults;
use crate::results::{
    ItemFailure, LatencyRow, RunReport, ScenarioJitterRow, ScenarioLatencyRow, TableWriter,
};
use crate::samples::{extractor_for, RttUnit, SampleExtractor, StructuredExtractor};
use crate::stats::summarize;
use crate::utils::{format_bytes, format_rate, has_extension};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Batch-level failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No {what} found under {}", .root.display())]
    NoInputs { what: &'static str, root: PathBuf },

    #[error("No RTT samples found under {}", .root.display())]
    NoSamples { root: PathBuf },
}

/// Producer naming convention for per-client sample files
static CLIENT_METRICS_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^metrics_.*_id.*\.csv$").expect("client metrics file regex is valid"));

/// Configuration of the per-file latency driver
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    pub root: PathBuf,
    pub out: PathBuf,
    pub outlier_multiplier: f64,
    pub rtt_unit: RttUnit,
    pub report: Option<PathBuf>,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            out: PathBuf::from("latency_metrics.csv"),
            outlier_multiplier: defaults::OUTLIER_MULTIPLIER,
            rtt_unit: RttUnit::Seconds,
            report: None,
        }
    }
}

/// Configuration of the scenario aggregation driver
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub root: PathBuf,
    pub out: PathBuf,
    pub out_jitter: PathBuf,
    pub outlier_multiplier: f64,
    pub report: Option<PathBuf>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            out: PathBuf::from("latency_summary.csv"),
            out_jitter: PathBuf::from("jitter_summary.csv"),
            outlier_multiplier: defaults::OUTLIER_MULTIPLIER,
            report: None,
        }
    }
}

/// Configuration of the capture metrics driver
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub root: PathBuf,
    pub out: PathBuf,
    pub append: bool,
    pub tshark: PathBuf,
    pub tool_timeout: Duration,
    pub report: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            out: PathBuf::from("pcap_metrics.csv"),
            append: false,
            tshark: PathBuf::from(defaults::TSHARK_BINARY),
            tool_timeout: defaults::TOOL_TIMEOUT,
            report: None,
        }
    }
}

/// Result of one batch run
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub inputs_found: usize,
    pub rows_written: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchOutcome {
    fn new(inputs_found: usize) -> Self {
        Self {
            inputs_found,
            ..Default::default()
        }
    }

    fn record_failure(&mut self, path: &Path, error: String) {
        self.failures.push(ItemFailure {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Recursively list regular files under `root` accepted by `accept`
///
/// Directory symlinks are not followed. The result is sorted by path.
pub fn discover_files(root: &Path, accept: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if path.is_file() && accept(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

fn is_client_metrics_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| CLIENT_METRICS_FILE.is_match(n))
        .unwrap_or(false)
}

fn write_report(
    path: Option<&PathBuf>,
    command: &str,
    root: &Path,
    outputs: Vec<PathBuf>,
    started_at: chrono::DateTime<chrono::Utc>,
    outcome: &BatchOutcome,
) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    RunReport {
        version: crate::VERSION.to_string(),
        command: command.to_string(),
        root: root.to_path_buf(),
        outputs,
        started_at,
        finished_at: chrono::Utc::now(),
        inputs_found: outcome.inputs_found,
        rows_written: outcome.rows_written,
        failures: outcome.failures.clone(),
    }
    .write(path)
}

/// Per-file latency table
///
/// Every `.log`/`.txt`/`.csv` file under the root is summarized. Files that
/// carry no latency sample, timeout or error are skipped.
pub fn run_latency(config: &LatencyConfig) -> Result<BatchOutcome> {
    let started_at = chrono::Utc::now();
    let files = discover_files(&config.root, |p| has_extension(p, defaults::LOG_EXTENSIONS))?;
    if files.is_empty() {
        return Err(PipelineError::NoInputs {
            what: "log/csv/txt files",
            root: config.root.clone(),
        }
        .into());
    }
    info!("Found {} log file(s) under {}", files.len(), config.root.display());

    let mut outcome = BatchOutcome::new(files.len());
    let mut writer = TableWriter::<LatencyRow>::create(&config.out)?;

    for path in &files {
        let extractor = extractor_for(path, config.rtt_unit);
        let set = match extractor.extract(path, config.outlier_multiplier) {
            Ok(set) => set,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                outcome.record_failure(path, format!("{:#}", e));
                continue;
            }
        };

        let summary = summarize(&set);
        if !summary.has_signal() {
            debug!("No latency data in {} ({})", path.display(), extractor.name());
            continue;
        }
        writer.write_row(&LatencyRow::new(path, summary))?;
        outcome.rows_written += 1;
    }

    writer.finish()?;
    write_report(
        config.report.as_ref(),
        "latency",
        &config.root,
        vec![config.out.clone()],
        started_at,
        &outcome,
    )?;
    Ok(outcome)
}

/// Scenario-aggregated latency and jitter tables
pub fn run_summary(config: &SummaryConfig) -> Result<BatchOutcome> {
    run_summary_with(config, &StructuredExtractor::new(RttUnit::Seconds))
}

fn run_summary_with(config: &SummaryConfig, extractor: &dyn SampleExtractor) -> Result<BatchOutcome> {
    let started_at = chrono::Utc::now();
    let files = discover_files(&config.root, is_client_metrics_file)?;
    if files.is_empty() {
        return Err(PipelineError::NoInputs {
            what: "metrics_*_id*.csv files",
            root: config.root.clone(),
        }
        .into());
    }
    info!("Found {} client file(s) under {}", files.len(), config.root.display());

    let mut outcome = BatchOutcome::new(files.len());
    let aggregation = aggregate(&files, extractor, config.outlier_multiplier);
    outcome.failures = aggregation.failures;
    let rollups = aggregation.rollups;
    if rollups.is_empty() {
        return Err(PipelineError::NoSamples {
            root: config.root.clone(),
        }
        .into());
    }

    let mut latency = TableWriter::<ScenarioLatencyRow>::create(&config.out)?;
    let mut jitter = TableWriter::<ScenarioJitterRow>::create(&config.out_jitter)?;
    for rollup in &rollups {
        debug!(
            "{} {} N={}: {} sample(s) from {} file(s)",
            rollup.group.mode,
            rollup.group.protocol,
            rollup.group.client_count,
            rollup.samples,
            rollup.files
        );
        latency.write_row(&ScenarioLatencyRow(rollup))?;
        jitter.write_row(&ScenarioJitterRow(rollup))?;
    }
    latency.finish()?;
    jitter.finish()?;

    outcome.rows_written = rollups.len();
    write_report(
        config.report.as_ref(),
        "summary",
        &config.root,
        vec![config.out.clone(), config.out_jitter.clone()],
        started_at,
        &outcome,
    )?;
    Ok(outcome)
}

/// Capture metrics table
///
/// A failing capture still produces a row carrying its error message.
pub async fn run_capture(
    config: &CaptureConfig,
    analyzer: &dyn CaptureAnalyzer,
) -> Result<BatchOutcome> {
    let started_at = chrono::Utc::now();
    let files = discover_files(&config.root, |p| has_extension(p, defaults::CAPTURE_EXTENSIONS))?;
    if files.is_empty() {
        return Err(PipelineError::NoInputs {
            what: ".pcap/.pcapng files",
            root: config.root.clone(),
        }
        .into());
    }
    info!(
        "Found {} capture(s) under {} (analyzer: {})",
        files.len(),
        config.root.display(),
        analyzer.name()
    );

    let mut outcome = BatchOutcome::new(files.len());
    let mut writer = TableWriter::open(&config.out, config.append)?;

    for path in &files {
        let record = extract_capture(analyzer, path).await;
        match (&record.error, record.proto) {
            (Some(e), _) => {
                warn!("[FAIL] {}: {}", path.display(), e);
                outcome.record_failure(path, e.clone());
            }
            (None, Some(proto)) => info!(
                "[OK] {} ({} {}: {} frames, {}, {})",
                path.display(),
                record.protocol,
                record.proto_port.as_deref().unwrap_or("-"),
                proto.frames,
                format_bytes(proto.bytes),
                record
                    .bytes_per_sec_proto
                    .map(format_rate)
                    .unwrap_or_else(|| "no rate".to_string())
            ),
            (None, None) => info!("[OK] {} (no protocol traffic resolved)", path.display()),
        }
        writer.write_row(&record)?;
        outcome.rows_written += 1;
    }

    writer.finish()?;
    info!(
        "Rows written: {} / captures found: {}",
        outcome.rows_written, outcome.inputs_found
    );
    write_report(
        config.report.as_ref(),
        "pcap",
        &config.root,
        vec![config.out.clone()],
        started_at,
        &outcome,
    )?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/deeper")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("b/deeper/z.log"), "").unwrap();
        fs::write(root.join("a/y.csv"), "").unwrap();
        fs::write(root.join("a/skip.json"), "").unwrap();
        fs::write(root.join("x.TXT"), "").unwrap();

        let found = discover_files(root, |p| has_extension(p, defaults::LOG_EXTENSIONS)).unwrap();
        assert_eq!(
            found,
            vec![root.join("a/y.csv"), root.join("b/deeper/z.log"), root.join("x.TXT")]
        );
    }

    #[test]
    fn test_discover_missing_root_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(discover_files(&dir.path().join("nope"), |_| true).is_err());
    }

    #[test]
    fn test_client_metrics_file_pattern() {
        assert!(is_client_metrics_file(Path::new("x/metrics_r1_mqtt_id3.csv")));
        assert!(!is_client_metrics_file(Path::new("x/metrics_r1_mqtt.csv")));
        assert!(!is_client_metrics_file(Path::new("x/latency_id3.csv")));
        assert!(!is_client_metrics_file(Path::new("x/metrics_r1_id3.log")));
    }

    /// Structured extraction that fails for one named client file
    struct FailingExtractor;

    impl SampleExtractor for FailingExtractor {
        fn extract_from_reader(&self, reader: &mut dyn std::io::Read) -> Result<crate::samples::SampleSet> {
            StructuredExtractor::default().extract_from_reader(reader)
        }

        fn name(&self) -> &'static str {
            "failing"
        }

        fn extract_raw(&self, path: &Path) -> Result<crate::samples::SampleSet> {
            if path.ends_with("metrics_r2_http_id9.csv") {
                anyhow::bail!("Failed to open sample source: {}", path.display());
            }
            StructuredExtractor::default().extract_raw(path)
        }
    }

    #[test]
    fn test_summary_records_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("results");
        let body = "run_id,proto,client_id,ts,rtt,status,error\nr1,http,1,0.0,0.010,OK,\n";
        for rel in [
            "open/http/N5/rep1/metrics_r1_http_id1.csv",
            "open/http/N5/rep2/metrics_r2_http_id9.csv",
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let report = dir.path().join("summary.json");
        let config = SummaryConfig {
            root: root.clone(),
            out: dir.path().join("latency_summary.csv"),
            out_jitter: dir.path().join("jitter_summary.csv"),
            report: Some(report.clone()),
            ..Default::default()
        };

        let outcome = run_summary_with(&config, &FailingExtractor).unwrap();
        assert_eq!(outcome.inputs_found, 2);
        assert_eq!(outcome.rows_written, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].path.ends_with("metrics_r2_http_id9.csv"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(json["failures"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_no_inputs_is_batch_error() {
        let dir = TempDir::new().unwrap();
        let config = LatencyConfig {
            root: dir.path().to_path_buf(),
            out: dir.path().join("out.csv"),
            ..Default::default()
        };
        let err = run_latency(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoInputs { .. })
        ));
        assert!(!config.out.exists());
    }
}
