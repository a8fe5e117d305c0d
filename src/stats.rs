//! # Descriptive Statistics
//!
//! Reduces a [`SampleSet`] into a [`SummaryRecord`]. The numeric rules are
//! fixed so that results are comparable across runs:
//!
//! - **Percentiles** use nearest-rank indexing into the sorted samples,
//!   `index = round((n - 1) * q)` with ties going to the even index, without
//!   interpolation.
//! - **Jitter (std)** is the population standard deviation.
//! - **Jitter (MAD)** is the mean absolute difference between successive
//!   samples in arrival order.
//! - **Loss rate** treats timeouts as lost observations:
//!   `100 * timeouts / (count + timeouts)`.

use crate::samples::SampleSet;
use serde::{Deserialize, Serialize};

/// Statistical summary of one sample set
///
/// Latency-derived fields are `None` when `count == 0`; the counters are
/// always carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub jitter_std: Option<f64>,
    pub jitter_mad: Option<f64>,
    pub outliers_3sigma: Option<usize>,
    pub timeouts: u64,
    pub errors: u64,
    pub loss_rate_pct: Option<f64>,
}

impl SummaryRecord {
    fn empty(timeouts: u64, errors: u64) -> Self {
        Self {
            count: 0,
            mean: None,
            median: None,
            min: None,
            max: None,
            p90: None,
            p95: None,
            p99: None,
            jitter_std: None,
            jitter_mad: None,
            outliers_3sigma: None,
            timeouts,
            errors,
            loss_rate_pct: None,
        }
    }

    /// True when the source carried any signal at all
    pub fn has_signal(&self) -> bool {
        self.count > 0 || self.timeouts > 0 || self.errors > 0
    }
}

/// Summarize a sample set
pub fn summarize(set: &SampleSet) -> SummaryRecord {
    let values = &set.observations_ms;
    let n = values.len();
    if n == 0 {
        return SummaryRecord::empty(set.timeouts, set.errors);
    }

    let mut sorted = values.clone();
    sort_ascending(&mut sorted);

    let mean = mean(values);
    let std = population_std_dev(values);
    let outliers = if n >= 2 {
        values.iter().filter(|&&v| v > mean + 3.0 * std).count()
    } else {
        0
    };

    let denominator = n as u64 + set.timeouts;
    let loss_rate_pct = if denominator > 0 {
        Some(100.0 * set.timeouts as f64 / denominator as f64)
    } else {
        None
    };

    SummaryRecord {
        count: n,
        mean: Some(mean),
        median: Some(median_sorted(&sorted)),
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        p90: nearest_rank(&sorted, 0.90),
        p95: nearest_rank(&sorted, 0.95),
        p99: nearest_rank(&sorted, 0.99),
        jitter_std: Some(std),
        jitter_mad: successive_difference_mean(values),
        outliers_3sigma: Some(outliers),
        timeouts: set.timeouts,
        errors: set.errors,
        loss_rate_pct,
    }
}

/// Sort values ascending; NaN never reaches here but compares as equal
pub fn sort_ascending(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

/// Nearest-rank percentile of an ascending slice, `q` in `[0, 1]`
///
/// `q <= 0` yields the minimum and `q >= 1` the maximum. Returns `None` for
/// an empty slice.
///
/// ## Examples
///
/// ```rust
/// # use protobench_metrics::stats::nearest_rank;
/// let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
/// assert_eq!(nearest_rank(&sorted, 0.5), Some(3.0));
/// assert_eq!(nearest_rank(&sorted, 0.95), Some(5.0));
/// ```
pub fn nearest_rank<T: Copy + Into<f64>>(sorted: &[T], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    if q <= 0.0 {
        return Some(sorted[0].into());
    }
    if q >= 1.0 {
        return Some(sorted[last].into());
    }
    let index = round_half_even(last as f64 * q) as usize;
    Some(sorted[index.min(last)].into())
}

/// Round to the nearest integer, ties to the even neighbour
fn round_half_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        x.round()
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median with the usual even-length averaging; `0.0` for an empty slice
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sort_ascending(&mut sorted);
    median_sorted(&sorted)
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Population standard deviation; `0.0` below two samples
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Mean absolute successive difference in arrival order
pub fn successive_difference_mean(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let total: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    Some(total / (values.len() - 1) as f64)
}
