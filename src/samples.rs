//! # Latency Sample Extraction
//!
//! Produces a [`SampleSet`] from one raw source. Two strategies implement the
//! [`SampleExtractor`] trait:
//!
//! - [`StructuredExtractor`] reads tabular (CSV) sources through a single RTT
//!   column located by alias, with the column unit stated explicitly.
//! - [`TextExtractor`] scans free-form log lines for labeled millisecond
//!   values and timeout/error markers.
//!
//! Both strategies return the raw samples; [`SampleSet::reject_outliers`] is
//! the shared post-processing step applied once per source.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Header names recognized as the RTT column (case-insensitive)
pub const RTT_COLUMN_ALIASES: &[&str] = &["latency_ms", "rtt_ms", "rtt", "latency"];

static TIMEOUT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(timeout|timed\s*out)\b").expect("timeout marker regex is valid"));

static ERROR_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|failed|exception)\b").expect("error marker regex is valid"));

/// Latency patterns tried in order; the first that matches a line wins.
static LATENCY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:latency|rtt)\s*[:=]\s*([0-9]*\.?[0-9]+)\s*ms\b",
        r"(?i)\bRTT[_\s-]*ms\s*[:=]\s*([0-9]*\.?[0-9]+)\b",
        r"(?i)\b([0-9]*\.?[0-9]+)\s*ms\b.*\b(?:latency|rtt)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("latency pattern regex is valid"))
    .collect()
});

/// Unit of the raw RTT values in a structured source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RttUnit {
    /// Load generators record RTT in seconds
    #[default]
    Seconds,
    Milliseconds,
}

impl RttUnit {
    /// Convert a raw value in this unit to milliseconds
    pub fn to_millis(self, value: f64) -> f64 {
        match self {
            RttUnit::Seconds => value * 1000.0,
            RttUnit::Milliseconds => value,
        }
    }
}

/// Latency observations in milliseconds plus timeout/error counters
///
/// Counters come from textual markers, not from the observations, and may be
/// nonzero while `observations_ms` is empty. Observations keep arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    pub observations_ms: Vec<f64>,
    pub timeouts: u64,
    pub errors: u64,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.observations_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations_ms.is_empty()
    }

    /// Append one observation, enforcing the finite non-negative invariant
    ///
    /// Returns `false` if the value was rejected.
    pub fn push_ms(&mut self, value_ms: f64) -> bool {
        if value_ms.is_finite() && value_ms >= 0.0 {
            self.observations_ms.push(value_ms);
            true
        } else {
            false
        }
    }

    /// Count timeout/error markers found in `text`
    fn count_markers(&mut self, text: &str) {
        if TIMEOUT_MARKER.is_match(text) {
            self.timeouts += 1;
        }
        if ERROR_MARKER.is_match(text) {
            self.errors += 1;
        }
    }

    /// Drop observations exceeding `multiplier` times the raw median
    ///
    /// A no-op for empty sets, a zero median or a non-positive multiplier.
    /// Arrival order of the survivors is preserved. Returns how many samples
    /// were dropped.
    pub fn reject_outliers(&mut self, multiplier: f64) -> usize {
        if self.observations_ms.is_empty() || multiplier <= 0.0 {
            return 0;
        }
        let median = crate::stats::median(&self.observations_ms);
        if median <= 0.0 {
            return 0;
        }
        let threshold = multiplier * median;
        let before = self.observations_ms.len();
        self.observations_ms.retain(|&v| v <= threshold);
        before - self.observations_ms.len()
    }
}

/// Capability of producing a [`SampleSet`] from one source
pub trait SampleExtractor {
    /// Extract raw samples from a reader
    fn extract_from_reader(&self, reader: &mut dyn Read) -> Result<SampleSet>;

    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Extract raw samples from a file
    fn extract_raw(&self, path: &Path) -> Result<SampleSet> {
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open sample source: {}", path.display()))?;
        self.extract_from_reader(&mut file)
            .with_context(|| format!("Failed to read sample source: {}", path.display()))
    }

    /// Extract samples from a file and apply per-source outlier rejection
    fn extract(&self, path: &Path, outlier_multiplier: f64) -> Result<SampleSet> {
        let mut set = self.extract_raw(path)?;
        let dropped = set.reject_outliers(outlier_multiplier);
        if dropped > 0 {
            debug!(
                "{}: dropped {} outlier(s) above {}x median",
                path.display(),
                dropped,
                outlier_multiplier
            );
        }
        Ok(set)
    }
}

/// Structured (CSV) extraction through a single RTT column
#[derive(Debug, Clone)]
pub struct StructuredExtractor {
    pub unit: RttUnit,
    pub aliases: Vec<String>,
}

impl Default for StructuredExtractor {
    fn default() -> Self {
        Self::new(RttUnit::Seconds)
    }
}

impl StructuredExtractor {
    pub fn new(unit: RttUnit) -> Self {
        Self {
            unit,
            aliases: RTT_COLUMN_ALIASES.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Index of the first header matching an alias, in header order
    fn rtt_column(&self, headers: &csv::StringRecord) -> Option<usize> {
        headers.iter().position(|h| {
            let h = h.trim().to_lowercase();
            self.aliases.iter().any(|a| *a == h)
        })
    }
}

impl SampleExtractor for StructuredExtractor {
    fn extract_from_reader(&self, reader: &mut dyn Read) -> Result<SampleSet> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let text = String::from_utf8_lossy(&bytes);

        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = csv_reader.headers().context("Failed to read CSV header")?.clone();
        let mut set = SampleSet::default();
        let Some(column) = self.rtt_column(&headers) else {
            return Ok(set);
        };

        for record in csv_reader.records() {
            // Malformed rows are skipped, never fatal for the file
            let Ok(record) = record else {
                continue;
            };

            let joined = record.iter().collect::<Vec<_>>().join(" ");
            set.count_markers(&joined);

            let cell = record.get(column).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            if let Ok(raw) = cell.parse::<f64>() {
                set.push_ms(self.unit.to_millis(raw));
            }
        }

        Ok(set)
    }

    fn name(&self) -> &'static str {
        "structured"
    }
}

/// Pattern-based extraction from free-form log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl TextExtractor {
    /// Feed a single line into `set`
    pub fn scan_line(&self, line: &str, set: &mut SampleSet) {
        set.count_markers(line);

        let line = line.trim();
        for pattern in LATENCY_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(line) {
                if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                    set.push_ms(value);
                }
                break;
            }
        }
    }
}

impl SampleExtractor for TextExtractor {
    fn extract_from_reader(&self, reader: &mut dyn Read) -> Result<SampleSet> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let text = String::from_utf8_lossy(&bytes);

        let mut set = SampleSet::default();
        for line in text.lines() {
            self.scan_line(line, &mut set);
        }
        Ok(set)
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

/// Pick the extraction strategy for a path: `.csv` is structured, anything
/// else is treated as a free-text log.
pub fn extractor_for(path: &Path, unit: RttUnit) -> Box<dyn SampleExtractor> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        Box::new(StructuredExtractor::new(unit))
    } else {
        Box::new(TextExtractor)
    }
}
