//! # Results Output
//!
//! The canonical CSV tables written by the batch drivers and the optional
//! JSON run report.
//!
//! Each table is described by a [`TableRow`] implementation (header plus
//! cells) and written through a [`TableWriter`], which owns the file for
//! the duration of a run. Floats are rounded to fixed decimals and missing
//! values become empty cells.

use crate::aggregate::ScenarioAggregate;
use crate::capture::CaptureRecord;
use crate::defaults::{FRAME_LEN_DECIMALS, VALUE_DECIMALS};
use crate::scenario::identify_path;
use crate::stats::SummaryRecord;
use crate::utils::{float_cell, int_cell};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A row of one of the canonical output tables
pub trait TableRow {
    /// Column names, in output order
    fn header() -> &'static [&'static str];

    /// Cell values, aligned with `header()`
    fn cells(&self) -> Vec<String>;
}

/// Per-file latency summary row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyRow {
    pub scenario: String,
    pub log_path: PathBuf,
    pub summary: SummaryRecord,
}

impl LatencyRow {
    pub fn new(path: &Path, summary: SummaryRecord) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            scenario: identify_path(path).label(&stem),
            log_path: path.to_path_buf(),
            summary,
        }
    }
}

impl TableRow for LatencyRow {
    fn header() -> &'static [&'static str] {
        &[
            "scenario",
            "log_path",
            "count",
            "mean_latency_ms",
            "median_latency_ms",
            "min_latency_ms",
            "max_latency_ms",
            "p90_latency_ms",
            "p95_latency_ms",
            "p99_latency_ms",
            "jitter_std_ms",
            "jitter_mad_ms",
            "outliers_3sigma",
            "timeouts",
            "errors",
            "loss_rate_pct",
        ]
    }

    fn cells(&self) -> Vec<String> {
        let s = &self.summary;
        let v = |x: Option<f64>| float_cell(x, VALUE_DECIMALS);
        vec![
            self.scenario.clone(),
            self.log_path.display().to_string(),
            s.count.to_string(),
            v(s.mean),
            v(s.median),
            v(s.min),
            v(s.max),
            v(s.p90),
            v(s.p95),
            v(s.p99),
            v(s.jitter_std),
            v(s.jitter_mad),
            int_cell(s.outliers_3sigma),
            s.timeouts.to_string(),
            s.errors.to_string(),
            v(s.loss_rate_pct),
        ]
    }
}

/// Scenario-aggregated latency row
#[derive(Debug, Clone)]
pub struct ScenarioLatencyRow<'a>(pub &'a ScenarioAggregate);

/// Scenario-aggregated jitter row
#[derive(Debug, Clone)]
pub struct ScenarioJitterRow<'a>(pub &'a ScenarioAggregate);

impl TableRow for ScenarioLatencyRow<'_> {
    fn header() -> &'static [&'static str] {
        &["mode", "proto", "N", "mean_rtt_ms", "median_ms", "p95_ms", "p99_ms"]
    }

    fn cells(&self) -> Vec<String> {
        let a = self.0;
        vec![
            a.group.mode.to_string(),
            a.group.protocol.to_string(),
            a.group.client_count.to_string(),
            float_cell(Some(a.mean_rtt_ms), VALUE_DECIMALS),
            float_cell(Some(a.median_ms), VALUE_DECIMALS),
            float_cell(Some(a.p95_ms), VALUE_DECIMALS),
            float_cell(Some(a.p99_ms), VALUE_DECIMALS),
        ]
    }
}

impl TableRow for ScenarioJitterRow<'_> {
    fn header() -> &'static [&'static str] {
        &["mode", "proto", "N", "mean_jitter_ms"]
    }

    fn cells(&self) -> Vec<String> {
        let a = self.0;
        vec![
            a.group.mode.to_string(),
            a.group.protocol.to_string(),
            a.group.client_count.to_string(),
            float_cell(Some(a.jitter_ms), VALUE_DECIMALS),
        ]
    }
}

impl TableRow for CaptureRecord {
    fn header() -> &'static [&'static str] {
        &[
            "scenario",
            "pcap_path",
            "mode",
            "proto",
            "proto_port",
            "N",
            "payload_size",
            "duration_s_total",
            "frames_total",
            "bytes_total",
            "duration_s_proto",
            "frames_proto",
            "bytes_proto",
            "avg_frame_len_proto",
            "p95_frame_len_proto",
            "p99_frame_len_proto",
            "frames_per_sec_proto",
            "bytes_per_sec_proto",
            "frames_per_message_proxy",
            "error",
        ]
    }

    fn cells(&self) -> Vec<String> {
        let v = |x: Option<f64>| float_cell(x, VALUE_DECIMALS);
        let len = |x: Option<f64>| float_cell(x, FRAME_LEN_DECIMALS);
        vec![
            self.scenario.clone(),
            self.pcap_path.display().to_string(),
            self.mode.to_string(),
            self.protocol.to_string(),
            self.proto_port.clone().unwrap_or_default(),
            int_cell(self.client_count),
            int_cell(self.payload_size),
            v(self.total.map(|t| t.duration_s)),
            int_cell(self.total.map(|t| t.frames)),
            int_cell(self.total.map(|t| t.bytes)),
            v(self.proto.map(|p| p.duration_s)),
            int_cell(self.proto.map(|p| p.frames)),
            int_cell(self.proto.map(|p| p.bytes)),
            len(self.frame_lengths.map(|l| l.mean)),
            len(self.frame_lengths.map(|l| l.p95)),
            len(self.frame_lengths.map(|l| l.p99)),
            v(self.frames_per_sec_proto),
            v(self.bytes_per_sec_proto),
            v(self.frames_per_message_proxy),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

/// Sequential writer for one output table
///
/// The file is opened once, rows are written in call order and the writer
/// is flushed by [`TableWriter::finish`].
pub struct TableWriter<R: TableRow> {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
    _row: PhantomData<fn(&R)>,
}

impl<R: TableRow> TableWriter<R> {
    /// Create (truncate) a table and write its header
    pub fn create(path: &Path) -> Result<Self> {
        Self::open(path, false)
    }

    /// Open a table for writing
    ///
    /// In append mode existing rows are kept and the header is only written
    /// when the file is absent or empty.
    pub fn open(path: &Path, append: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }

        let has_content = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)
        } else {
            File::create(path)
        }
        .with_context(|| format!("Failed to open output table: {}", path.display()))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if !(append && has_content) {
            writer
                .write_record(R::header())
                .with_context(|| format!("Failed to write header to {}", path.display()))?;
        }
        debug!("Opened output table {} (append={})", path.display(), append);

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
            _row: PhantomData,
        })
    }

    pub fn write_row(&mut self, row: &R) -> Result<()> {
        self.writer
            .write_record(row.cells())
            .with_context(|| format!("Failed to write row to {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and close the table, returning the number of rows written
    pub fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        info!("Saved: {} | rows: {}", self.path.display(), self.rows);
        Ok(self.rows)
    }
}

/// A per-item failure recorded during a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Machine-readable record of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub version: String,
    pub command: String,
    pub root: PathBuf,
    pub outputs: Vec<PathBuf>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub inputs_found: usize,
    pub rows_written: usize,
    pub failures: Vec<ItemFailure>,
}

impl RunReport {
    /// Write the report as pretty-printed JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        info!("Run report written to: {}", path.display());
        Ok(())
    }
}
