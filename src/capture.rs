//! # Capture Metrics Extraction
//!
//! Derives throughput, frame counts and frame-size statistics from packet
//! capture files. The binary capture format is never parsed here: an
//! external analysis tool dumps per-frame fields and this module only
//! interprets that dump.
//!
//! ## Key Components
//!
//! - **CaptureAnalyzer**: capability interface returning per-frame
//!   `(length, relative time)` rows for a capture and an optional filter
//! - **TsharkAnalyzer**: implementation shelling out to `tshark -T fields`,
//!   bounded by a per-invocation timeout
//! - **ProtocolFilter**: the fixed protocol/port filters of the lab setup
//! - **extract_capture**: resolves the scenario protocol, gathers whole and
//!   protocol-filtered stats, and turns any failure into an error row
//!
//! Stats are derived from raw frame fields rather than the tool's aggregate
//! statistics output, whose text format differs between tool versions.

use crate::defaults;
use crate::scenario::{identify_path, payload_size, Mode, Protocol};
use crate::stats::nearest_rank;
use crate::utils::truncate_message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Failures of the external capture-analysis tool
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("{tool} is not available: {reason}. Install it with: sudo apt install -y tshark")]
    NotAvailable { tool: String, reason: String },

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {timeout:?} for {capture} (filter={filter})")]
    Timeout {
        tool: String,
        capture: String,
        filter: String,
        timeout: Duration,
    },

    #[error("{tool} fields failed for {capture} (filter={filter}): {stderr}")]
    ToolFailed {
        tool: String,
        capture: String,
        filter: String,
        stderr: String,
    },
}

/// One frame as reported by the analysis tool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRow {
    pub length: u32,
    pub relative_time_s: f64,
}

/// Capability of listing per-frame fields for a capture
#[async_trait]
pub trait CaptureAnalyzer: Send + Sync {
    /// Frame length and relative timestamp for every frame matching `filter`
    ///
    /// `None` means the whole capture.
    async fn frame_fields(
        &self,
        capture: &Path,
        filter: Option<&str>,
    ) -> Result<Vec<FrameRow>, CaptureError>;

    /// Analyzer name for identification
    fn name(&self) -> &'static str;
}

/// Parse a tab-separated `frame.len<TAB>frame.time_relative` dump
///
/// Blank lines, lines with fewer than two fields and unparseable values are
/// skipped. An empty field counts as zero.
pub fn parse_frame_fields(text: &str) -> Vec<FrameRow> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let mut parts = line.split('\t');
            let length = parts.next()?;
            let time = parts.next()?;
            let length = if length.is_empty() { Ok(0) } else { length.parse::<u32>() };
            let time = if time.is_empty() { Ok(0.0) } else { time.parse::<f64>() };
            match (length, time) {
                (Ok(length), Ok(relative_time_s)) => Some(FrameRow {
                    length,
                    relative_time_s,
                }),
                _ => None,
            }
        })
        .collect()
}

/// Capture analyzer backed by the tshark command-line tool
#[derive(Debug, Clone)]
pub struct TsharkAnalyzer {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for TsharkAnalyzer {
    fn default() -> Self {
        Self::new(defaults::TSHARK_BINARY, defaults::TOOL_TIMEOUT)
    }
}

impl TsharkAnalyzer {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn tool(&self) -> String {
        self.binary.display().to_string()
    }

    /// Check that the tool can be executed at all
    pub async fn ensure_available(&self) -> Result<(), CaptureError> {
        let output = self
            .run(&["-v".to_string()], "version check", "-")
            .await
            .map_err(|e| CaptureError::NotAvailable {
                tool: self.tool(),
                reason: e.to_string(),
            })?;
        debug!(
            "{} available: {}",
            self.tool(),
            String::from_utf8_lossy(&output).lines().next().unwrap_or("")
        );
        Ok(())
    }

    /// Arguments for a per-frame field dump
    fn field_args(capture: &Path, filter: Option<&str>) -> Vec<String> {
        let mut args = vec!["-r".to_string(), capture.display().to_string()];
        if let Some(filter) = filter {
            args.push("-Y".to_string());
            args.push(filter.to_string());
        }
        for arg in ["-T", "fields", "-e", "frame.len", "-e", "frame.time_relative"] {
            args.push(arg.to_string());
        }
        args
    }

    /// Run the tool to completion, bounded by the configured timeout
    ///
    /// The child is killed when the timeout elapses.
    async fn run(&self, args: &[String], capture: &str, filter: &str) -> Result<Vec<u8>, CaptureError> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                tool: self.tool(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| CaptureError::Spawn {
                tool: self.tool(),
                source,
            })?,
            Err(_) => {
                return Err(CaptureError::Timeout {
                    tool: self.tool(),
                    capture: capture.to_string(),
                    filter: filter.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(CaptureError::ToolFailed {
                tool: self.tool(),
                capture: capture.to_string(),
                filter: filter.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl CaptureAnalyzer for TsharkAnalyzer {
    async fn frame_fields(
        &self,
        capture: &Path,
        filter: Option<&str>,
    ) -> Result<Vec<FrameRow>, CaptureError> {
        let args = Self::field_args(capture, filter);
        let name = capture
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| capture.display().to_string());
        let stdout = self.run(&args, &name, filter.unwrap_or("None")).await?;
        Ok(parse_frame_fields(&String::from_utf8_lossy(&stdout)))
    }

    fn name(&self) -> &'static str {
        "tshark"
    }
}

/// Fixed protocol filter of the lab setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolFilter {
    pub protocol: Protocol,
    pub expression: &'static str,
    pub label: &'static str,
}

/// Protocol filters in probe order
pub static PROTOCOL_FILTERS: [ProtocolFilter; 3] = [
    ProtocolFilter {
        protocol: Protocol::Coap,
        expression: "udp.port==5683",
        label: "UDP/5683",
    },
    ProtocolFilter {
        protocol: Protocol::Mqtt,
        expression: "tcp.port==1883",
        label: "TCP/1883",
    },
    ProtocolFilter {
        protocol: Protocol::Http,
        expression: "tcp.port==5000",
        label: "TCP/5000",
    },
];

impl ProtocolFilter {
    pub fn for_protocol(protocol: Protocol) -> Option<&'static ProtocolFilter> {
        PROTOCOL_FILTERS.iter().find(|f| f.protocol == protocol)
    }
}

/// Duration, frame count and byte count for one capture under one filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Largest relative timestamp among matching frames, 0 if none matched
    pub duration_s: f64,
    pub frames: u64,
    pub bytes: u64,
}

impl CaptureStats {
    pub fn from_frames(rows: &[FrameRow]) -> Self {
        rows.iter().fold(Self::default(), |mut acc, row| {
            acc.frames += 1;
            acc.bytes += u64::from(row.length);
            if row.relative_time_s > acc.duration_s {
                acc.duration_s = row.relative_time_s;
            }
            acc
        })
    }

    pub fn frames_per_sec(&self) -> Option<f64> {
        (self.duration_s > 0.0).then(|| self.frames as f64 / self.duration_s)
    }

    pub fn bytes_per_sec(&self) -> Option<f64> {
        (self.duration_s > 0.0).then(|| self.bytes as f64 / self.duration_s)
    }
}

/// Frame-length distribution of the protocol-filtered subset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameLengthStats {
    pub count: usize,
    pub mean: f64,
    pub p95: f64,
    pub p99: f64,
}

impl FrameLengthStats {
    pub fn from_frames(rows: &[FrameRow]) -> Option<Self> {
        let mut lengths: Vec<u32> = rows.iter().map(|r| r.length).collect();
        if lengths.is_empty() {
            return None;
        }
        lengths.sort_unstable();
        let total: u64 = lengths.iter().map(|&l| u64::from(l)).sum();
        Some(Self {
            count: lengths.len(),
            mean: total as f64 / lengths.len() as f64,
            p95: nearest_rank(&lengths, 0.95)?,
            p99: nearest_rank(&lengths, 0.99)?,
        })
    }
}

/// Capture metrics for one file
///
/// When `error` is set every derived field is `None`, but the path-derived
/// identity fields are still populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub scenario: String,
    pub pcap_path: PathBuf,
    pub mode: Mode,
    pub protocol: Protocol,
    pub proto_port: Option<String>,
    pub client_count: Option<u32>,
    pub payload_size: Option<u32>,
    pub total: Option<CaptureStats>,
    pub proto: Option<CaptureStats>,
    pub frame_lengths: Option<FrameLengthStats>,
    pub frames_per_sec_proto: Option<f64>,
    pub bytes_per_sec_proto: Option<f64>,
    pub frames_per_message_proxy: Option<f64>,
    pub error: Option<String>,
}

impl CaptureRecord {
    fn identity(capture: &Path) -> Self {
        let key = identify_path(capture);
        Self {
            scenario: capture
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            pcap_path: capture.to_path_buf(),
            mode: key.mode,
            protocol: key.protocol,
            proto_port: None,
            client_count: key.client_count,
            payload_size: payload_size(&capture.to_string_lossy()),
            total: None,
            proto: None,
            frame_lengths: None,
            frames_per_sec_proto: None,
            bytes_per_sec_proto: None,
            frames_per_message_proxy: None,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Resolve the filter for a capture, probing every filter when the
/// protocol is unknown
///
/// Returns the chosen filter plus the probe's frame rows, so the chosen
/// filter is not queried twice. Ties go to the earlier filter; failed probes
/// are ignored.
async fn resolve_filter(
    analyzer: &dyn CaptureAnalyzer,
    capture: &Path,
    protocol: Protocol,
) -> Option<(&'static ProtocolFilter, Option<Vec<FrameRow>>)> {
    if let Some(filter) = ProtocolFilter::for_protocol(protocol) {
        return Some((filter, None));
    }

    let mut best: Option<(u64, &'static ProtocolFilter, Vec<FrameRow>)> = None;
    for filter in PROTOCOL_FILTERS.iter() {
        match analyzer.frame_fields(capture, Some(filter.expression)).await {
            Ok(rows) => {
                let bytes = CaptureStats::from_frames(&rows).bytes;
                debug!("{}: probe {} -> {} bytes", capture.display(), filter.label, bytes);
                if best.as_ref().map_or(true, |(b, _, _)| bytes > *b) {
                    best = Some((bytes, filter, rows));
                }
            }
            Err(e) => debug!("{}: probe {} failed: {}", capture.display(), filter.label, e),
        }
    }
    best.map(|(_, filter, rows)| (filter, Some(rows)))
}

async fn try_extract(
    analyzer: &dyn CaptureAnalyzer,
    capture: &Path,
    record: &mut CaptureRecord,
) -> Result<(), CaptureError> {
    let total = CaptureStats::from_frames(&analyzer.frame_fields(capture, None).await?);
    record.total = Some(total);

    let Some((filter, probed)) = resolve_filter(analyzer, capture, record.protocol).await else {
        warn!("{}: no protocol filter could be resolved", capture.display());
        return Ok(());
    };
    record.protocol = filter.protocol;
    record.proto_port = Some(filter.label.to_string());

    let rows = match probed {
        Some(rows) => rows,
        None => analyzer.frame_fields(capture, Some(filter.expression)).await?,
    };
    let proto = CaptureStats::from_frames(&rows);
    let lengths = FrameLengthStats::from_frames(&rows);

    record.frames_per_sec_proto = proto.frames_per_sec();
    record.bytes_per_sec_proto = proto.bytes_per_sec();
    record.frames_per_message_proxy = lengths
        .as_ref()
        .map(|l| proto.frames as f64 / l.count as f64);
    record.proto = Some(proto);
    record.frame_lengths = lengths;
    Ok(())
}

/// Extract capture metrics for one file
///
/// Never fails: a tool or parsing failure yields a record whose `error`
/// holds the truncated message and whose derived fields are all `None`.
pub async fn extract_capture(analyzer: &dyn CaptureAnalyzer, capture: &Path) -> CaptureRecord {
    let mut record = CaptureRecord::identity(capture);
    if let Err(e) = try_extract(analyzer, capture, &mut record).await {
        let mut failed = CaptureRecord::identity(capture);
        failed.error = Some(truncate_message(&e.to_string(), defaults::ERROR_MESSAGE_LIMIT));
        return failed;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Analyzer serving canned rows per filter
    struct CannedAnalyzer {
        rows: HashMap<Option<&'static str>, Vec<FrameRow>>,
        fail_all: bool,
    }

    impl CannedAnalyzer {
        fn new(entries: Vec<(Option<&'static str>, Vec<(u32, f64)>)>) -> Self {
            let rows = entries
                .into_iter()
                .map(|(filter, rows)| {
                    let rows = rows
                        .into_iter()
                        .map(|(length, relative_time_s)| FrameRow {
                            length,
                            relative_time_s,
                        })
                        .collect();
                    (filter, rows)
                })
                .collect();
            Self {
                rows,
                fail_all: false,
            }
        }
    }

    #[async_trait]
    impl CaptureAnalyzer for CannedAnalyzer {
        async fn frame_fields(
            &self,
            capture: &Path,
            filter: Option<&str>,
        ) -> Result<Vec<FrameRow>, CaptureError> {
            if self.fail_all {
                return Err(CaptureError::ToolFailed {
                    tool: "canned".to_string(),
                    capture: capture.display().to_string(),
                    filter: filter.unwrap_or("None").to_string(),
                    stderr: "x".repeat(500),
                });
            }
            Ok(self
                .rows
                .iter()
                .find(|(k, _)| **k == filter)
                .map(|(_, v)| v.clone())
                .unwrap_or_default())
        }

        fn name(&self) -> &'static str {
            "canned"
        }
    }

    #[test]
    fn test_parse_frame_fields() {
        let rows = parse_frame_fields("60\t0.000000\n\n1514\t1.250000\nbad\t1\n74\n\t2.0\n90\t\n");
        assert_eq!(
            rows,
            vec![
                FrameRow { length: 60, relative_time_s: 0.0 },
                FrameRow { length: 1514, relative_time_s: 1.25 },
            ]
        );
    }

    #[test]
    fn test_capture_stats_from_frames() {
        let rows = parse_frame_fields("100\t0.5\n200\t2.0\n300\t1.0\n");
        let stats = CaptureStats::from_frames(&rows);
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.bytes, 600);
        assert_eq!(stats.duration_s, 2.0);
        assert_eq!(stats.frames_per_sec(), Some(1.5));
        assert_eq!(stats.bytes_per_sec(), Some(300.0));
    }

    #[test]
    fn test_empty_capture_stats_have_no_rates() {
        let stats = CaptureStats::from_frames(&[]);
        assert_eq!(stats, CaptureStats::default());
        assert_eq!(stats.frames_per_sec(), None);
        assert_eq!(stats.bytes_per_sec(), None);
    }

    #[test]
    fn test_frame_length_stats() {
        let rows: Vec<FrameRow> = [60u32, 1500, 64, 64]
            .iter()
            .map(|&length| FrameRow { length, relative_time_s: 0.0 })
            .collect();
        let stats = FrameLengthStats::from_frames(&rows).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 422.0);
        assert_eq!(stats.p95, 1500.0);
        assert_eq!(stats.p99, 1500.0);
        assert!(FrameLengthStats::from_frames(&[]).is_none());
    }

    #[test]
    fn test_field_args() {
        let args = TsharkAnalyzer::field_args(Path::new("a.pcap"), Some("tcp.port==1883"));
        assert_eq!(
            args,
            vec![
                "-r", "a.pcap", "-Y", "tcp.port==1883", "-T", "fields", "-e", "frame.len", "-e",
                "frame.time_relative"
            ]
        );
        let args = TsharkAnalyzer::field_args(Path::new("a.pcap"), None);
        assert!(!args.contains(&"-Y".to_string()));
    }

    #[tokio::test]
    async fn test_known_protocol_uses_its_filter() {
        let analyzer = CannedAnalyzer::new(vec![
            (None, vec![(100, 0.0), (200, 4.0), (50, 1.0)]),
            (Some("tcp.port==1883"), vec![(100, 0.0), (200, 2.0)]),
        ]);
        let record = extract_capture(&analyzer, Path::new("runs/open/mqtt/n10/cap.pcap")).await;
        assert!(!record.is_error());
        assert_eq!(record.scenario, "cap");
        assert_eq!(record.mode, Mode::Open);
        assert_eq!(record.protocol, Protocol::Mqtt);
        assert_eq!(record.proto_port.as_deref(), Some("TCP/1883"));
        assert_eq!(record.client_count, Some(10));
        assert_eq!(record.total.unwrap().frames, 3);
        assert_eq!(record.total.unwrap().duration_s, 4.0);
        let proto = record.proto.unwrap();
        assert_eq!((proto.frames, proto.bytes), (2, 300));
        assert_eq!(record.bytes_per_sec_proto, Some(150.0));
        assert_eq!(record.frames_per_sec_proto, Some(1.0));
        assert_eq!(record.frames_per_message_proxy, Some(1.0));
    }

    #[tokio::test]
    async fn test_unknown_protocol_picks_largest_byte_count() {
        let analyzer = CannedAnalyzer::new(vec![
            (None, vec![(100, 1.0), (900, 2.0), (50, 3.0)]),
            (Some("udp.port==5683"), vec![(100, 1.0)]),
            (Some("tcp.port==5000"), vec![(900, 2.0)]),
        ]);
        let record = extract_capture(&analyzer, Path::new("captures/run7.pcapng")).await;
        assert_eq!(record.protocol, Protocol::Http);
        assert_eq!(record.proto_port.as_deref(), Some("TCP/5000"));
        assert_eq!(record.proto.unwrap().bytes, 900);
    }

    #[tokio::test]
    async fn test_no_matching_frames() {
        let analyzer = CannedAnalyzer::new(vec![(None, vec![(100, 1.0)])]);
        let record = extract_capture(&analyzer, Path::new("open/coap/n5/cap.pcap")).await;
        let proto = record.proto.unwrap();
        assert_eq!(proto.duration_s, 0.0);
        assert_eq!(proto.frames, 0);
        assert_eq!(proto.bytes, 0);
        assert_eq!(record.frames_per_sec_proto, None);
        assert_eq!(record.bytes_per_sec_proto, None);
        assert!(record.frame_lengths.is_none());
        assert!(record.frames_per_message_proxy.is_none());
    }

    #[tokio::test]
    async fn test_failure_becomes_error_record() {
        let mut analyzer = CannedAnalyzer::new(vec![]);
        analyzer.fail_all = true;
        let record = extract_capture(&analyzer, Path::new("auth/http/n50/p64/cap.pcap")).await;
        let error = record.error.as_deref().unwrap();
        assert!(error.starts_with("canned fields failed"));
        assert_eq!(error.chars().count(), defaults::ERROR_MESSAGE_LIMIT);
        assert!(record.total.is_none());
        assert!(record.proto.is_none());
        assert!(record.proto_port.is_none());
        assert_eq!(record.mode, Mode::Auth);
        assert_eq!(record.protocol, Protocol::Http);
        assert_eq!(record.payload_size, Some(64));
    }
}
