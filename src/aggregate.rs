//! # Per-Scenario Aggregation
//!
//! Pools raw RTT observations from many per-client sample files into one set
//! per `(mode, protocol, N)` scenario. Repetition is only used to decide
//! whether an input file is fully keyed; it is not part of the output key.
//!
//! Outlier rejection runs per file, before pooling, so that one noisy client
//! cannot contaminate the scenario-wide pool.

use crate::results::ItemFailure;
use crate::samples::{SampleExtractor, SampleSet};
use crate::scenario::{identify_path, Mode, Protocol};
use crate::stats::{mean, median, nearest_rank, population_std_dev, sort_ascending};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Output key of the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioGroup {
    pub mode: Mode,
    pub protocol: Protocol,
    pub client_count: u32,
}

/// Pooled latency and jitter rollup for one scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAggregate {
    pub group: ScenarioGroup,
    /// Number of input files that contributed samples
    pub files: usize,
    /// Number of pooled observations
    pub samples: usize,
    pub mean_rtt_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Population standard deviation of the pool
    pub jitter_ms: f64,
}

impl ScenarioAggregate {
    fn from_pool(group: ScenarioGroup, files: usize, pool: &[f64]) -> Option<Self> {
        if pool.is_empty() {
            return None;
        }
        let mut sorted = pool.to_vec();
        sort_ascending(&mut sorted);
        Some(Self {
            group,
            files,
            samples: pool.len(),
            mean_rtt_ms: mean(&sorted),
            median_ms: median(&sorted),
            p95_ms: nearest_rank(&sorted, 0.95)?,
            p99_ms: nearest_rank(&sorted, 0.99)?,
            jitter_ms: population_std_dev(&sorted),
        })
    }
}

/// Rollups plus the sources that could not be read
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub rollups: Vec<ScenarioAggregate>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Default)]
struct Pool {
    files: usize,
    observations: Vec<f64>,
}

/// Aggregate per-client files into per-scenario rollups
///
/// Files whose path does not resolve to a full scenario key are silently
/// excluded. Files that fail to read are logged, skipped and reported in
/// [`Aggregation::failures`]. Scenarios with no surviving observations are
/// omitted from the result.
///
/// ## Returns
/// Rollups sorted by protocol name, mode name, then `N`.
pub fn aggregate(
    sources: &[PathBuf],
    extractor: &dyn SampleExtractor,
    outlier_multiplier: f64,
) -> Aggregation {
    let mut pools: HashMap<ScenarioGroup, Pool> = HashMap::new();
    let mut failures = Vec::new();

    for path in sources {
        let key = identify_path(path);
        let client_count = match key.client_count {
            Some(n) if key.is_fully_resolved() => n,
            _ => {
                debug!("Skipping unkeyed file: {}", path.display());
                continue;
            }
        };

        let mut set: SampleSet = match extractor.extract_raw(path) {
            Ok(set) => set,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                failures.push(ItemFailure {
                    path: path.clone(),
                    error: format!("{:#}", e),
                });
                continue;
            }
        };
        set.reject_outliers(outlier_multiplier);
        if set.is_empty() {
            continue;
        }

        let group = ScenarioGroup {
            mode: key.mode,
            protocol: key.protocol,
            client_count,
        };
        let pool = pools.entry(group).or_default();
        pool.files += 1;
        pool.observations.extend(set.observations_ms);
    }

    let mut rollups: Vec<ScenarioAggregate> = pools
        .into_iter()
        .filter_map(|(group, pool)| ScenarioAggregate::from_pool(group, pool.files, &pool.observations))
        .collect();
    rollups.sort_by_key(|a| {
        (
            a.group.protocol.as_str(),
            a.group.mode.as_str(),
            a.group.client_count,
        )
    });
    Aggregation { rollups, failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{RttUnit, StructuredExtractor};
    use anyhow::{bail, Result};
    use std::fs;
    use std::io::Read;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_client_file(root: &std::path::Path, rel: &str, rtts_s: &[f64]) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut body = String::from("run_id,proto,client_id,ts,rtt,status,error\n");
        for (i, rtt) in rtts_s.iter().enumerate() {
            body.push_str(&format!("r1,x,1,{}.0,{:.6},OK,\n", i, rtt));
        }
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_pools_across_files() {
        let dir = TempDir::new().unwrap();
        let a = write_client_file(
            dir.path(),
            "open/http/N50/rep1/metrics_r1_http_id1.csv",
            &[0.010, 0.012, 0.014],
        );
        let b = write_client_file(
            dir.path(),
            "open/http/N50/rep2/metrics_r2_http_id1.csv",
            &[0.011, 0.013],
        );

        let extractor = StructuredExtractor::new(RttUnit::Seconds);
        let rollups = aggregate(&[a, b], &extractor, 10.0).rollups;
        assert_eq!(rollups.len(), 1);
        let r = &rollups[0];
        assert_eq!(r.group.mode, Mode::Open);
        assert_eq!(r.group.protocol, Protocol::Http);
        assert_eq!(r.group.client_count, 50);
        assert_eq!(r.files, 2);
        assert_eq!(r.samples, 5);
        assert!((r.median_ms - 12.0).abs() < 1e-9);
        assert!((r.mean_rtt_ms - 12.0).abs() < 1e-9);
        assert!((r.p99_ms - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_excludes_unkeyed_files() {
        let dir = TempDir::new().unwrap();
        let no_rep = write_client_file(dir.path(), "open/http/N50/metrics_r1_http_id1.csv", &[0.01]);
        let no_mode = write_client_file(dir.path(), "x/http/N50/rep1/metrics_r1_http_id1.csv", &[0.01]);

        let extractor = StructuredExtractor::default();
        let rollups = aggregate(&[no_rep, no_mode], &extractor, 10.0).rollups;
        assert!(rollups.is_empty());
    }

    #[test]
    fn test_per_file_rejection_before_pooling() {
        let dir = TempDir::new().unwrap();
        let noisy = write_client_file(
            dir.path(),
            "auth/mqtt/N10/rep1/metrics_r1_mqtt_id1.csv",
            &[0.010, 0.010, 0.010, 5.0],
        );
        let extractor = StructuredExtractor::default();
        let rollups = aggregate(&[noisy], &extractor, 10.0).rollups;
        assert_eq!(rollups[0].samples, 3);
        assert!((rollups[0].p99_ms - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_without_samples_is_omitted() {
        let dir = TempDir::new().unwrap();
        let empty = write_client_file(dir.path(), "open/coap/N5/rep1/metrics_r1_coap_id1.csv", &[]);
        let extractor = StructuredExtractor::default();
        let rollups = aggregate(&[empty], &extractor, 10.0).rollups;
        assert!(rollups.is_empty());
    }

    #[test]
    fn test_sorted_by_protocol_mode_n() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_client_file(dir.path(), "open/mqtt/N10/rep1/metrics_a_mqtt_id1.csv", &[0.01]),
            write_client_file(dir.path(), "auth/http/N100/rep1/metrics_a_http_id1.csv", &[0.01]),
            write_client_file(dir.path(), "open/http/N100/rep1/metrics_a_http_id1.csv", &[0.01]),
            write_client_file(dir.path(), "open/http/N10/rep1/metrics_a_http_id1.csv", &[0.01]),
        ];
        let extractor = StructuredExtractor::default();
        let rollups = aggregate(&files, &extractor, 10.0).rollups;
        let keys: Vec<_> = rollups
            .iter()
            .map(|r| (r.group.protocol, r.group.mode, r.group.client_count))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Protocol::Http, Mode::Auth, 100),
                (Protocol::Http, Mode::Open, 10),
                (Protocol::Http, Mode::Open, 100),
                (Protocol::Mqtt, Mode::Open, 10),
            ]
        );
    }

    /// Structured extraction that refuses any path containing `broken`
    struct FlakyExtractor(StructuredExtractor);

    impl SampleExtractor for FlakyExtractor {
        fn extract_from_reader(&self, reader: &mut dyn Read) -> Result<SampleSet> {
            self.0.extract_from_reader(reader)
        }

        fn name(&self) -> &'static str {
            "flaky"
        }

        fn extract_raw(&self, path: &Path) -> Result<SampleSet> {
            if path.to_string_lossy().contains("broken") {
                bail!("permission denied: {}", path.display());
            }
            self.0.extract_raw(path)
        }
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let good = write_client_file(dir.path(), "open/http/N5/rep1/metrics_a_http_id1.csv", &[0.01]);
        let bad = write_client_file(dir.path(), "open/http/N5/rep2/metrics_broken_http_id1.csv", &[0.02]);

        let extractor = FlakyExtractor(StructuredExtractor::default());
        let result = aggregate(&[good, bad.clone()], &extractor, 10.0);
        assert_eq!(result.rollups.len(), 1);
        assert_eq!(result.rollups[0].files, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, bad);
        assert!(result.failures[0].error.contains("permission denied"));
    }
}
