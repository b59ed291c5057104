//! Aggregated metrics of a load test run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use docpipe_generation::{GenerationItem, ItemStatus};

/// Failure buckets for the error histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Timeout,
    Configuration,
    Generic,
}

impl ErrorCategory {
    /// Bucket an item failure message by case-insensitive substring match.
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if has(&["validation", "missing field", "invalid"]) {
            ErrorCategory::Validation
        } else if has(&["timeout", "timed out"]) {
            ErrorCategory::Timeout
        } else if has(&["no active version", "not found", "configuration", "template resolution"]) {
            ErrorCategory::Configuration
        } else {
            ErrorCategory::Generic
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHistogram {
    pub validation: u32,
    pub timeout: u32,
    pub configuration: u32,
    pub generic: u32,
}

impl ErrorHistogram {
    pub fn record(&mut self, message: &str) {
        let slot = match ErrorCategory::classify(message) {
            ErrorCategory::Validation => &mut self.validation,
            ErrorCategory::Timeout => &mut self.timeout,
            ErrorCategory::Configuration => &mut self.configuration,
            ErrorCategory::Generic => &mut self.generic,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn total(&self) -> u32 {
        self.validation + self.timeout + self.configuration + self.generic
    }
}

/// Created → completed latency of successful items, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencySummary {
    /// `None` for an empty sample.
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let (&min_ms, &max_ms) = (sorted.first()?, sorted.last()?);

        Some(Self {
            avg_ms: mean(&sorted)?,
            min_ms,
            max_ms,
            p50_ms: percentile(&sorted, 50)?,
            p95_ms: percentile(&sorted, 95)?,
            p99_ms: percentile(&sorted, 99)?,
        })
    }
}

/// Nearest-rank percentile of an ascending sample (`percentile` in `1..=100`).
pub fn percentile(sorted: &[u64], percentile: u32) -> Option<u64> {
    if sorted.is_empty() || percentile == 0 || percentile > 100 {
        return None;
    }
    let len = sorted.len();
    let rank = len
        .saturating_mul(percentile as usize)
        .saturating_add(99)
        .saturating_div(100)
        .max(1);
    sorted.get(rank - 1).copied()
}

fn mean(samples: &[u64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: u128 = samples.iter().map(|&s| u128::from(s)).sum();
    Some(sum as f64 / samples.len() as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestMetrics {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// `succeeded / total * 100`.
    pub success_rate: f64,
    /// Processed items per second of wall-clock time.
    pub throughput_per_sec: f64,
    pub wall_clock_secs: f64,
    pub latency: Option<LatencySummary>,
    /// Mean started → completed time of successful items.
    pub avg_processing_ms: Option<f64>,
    pub error_histogram: ErrorHistogram,
}

impl LoadTestMetrics {
    /// Metrics of a run that never got its batch in.
    pub fn empty(total: u32) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
            success_rate: 0.0,
            throughput_per_sec: 0.0,
            wall_clock_secs: 0.0,
            latency: None,
            avg_processing_ms: None,
            error_histogram: ErrorHistogram::default(),
        }
    }

    /// Compute metrics from the items of a run.
    ///
    /// Items still pending or in progress count towards `total` only.
    pub fn compute(total: u32, items: &[GenerationItem], wall_clock: Duration) -> Self {
        let mut latencies = Vec::with_capacity(items.len());
        let mut processing = Vec::with_capacity(items.len());
        let mut histogram = ErrorHistogram::default();
        let (mut succeeded, mut failed) = (0u32, 0u32);

        for item in items {
            match item.status {
                ItemStatus::Completed => {
                    succeeded += 1;
                    if let Some(done) = item.completed_at {
                        latencies.push(millis_between(item.created_at, done));
                        if let Some(started) = item.started_at {
                            processing.push(millis_between(started, done));
                        }
                    }
                }
                ItemStatus::Failed => {
                    failed += 1;
                    histogram.record(item.error_message.as_deref().unwrap_or_default());
                }
                ItemStatus::Pending | ItemStatus::InProgress => {}
            }
        }

        let wall_clock_secs = wall_clock.as_secs_f64();
        let processed = f64::from(succeeded + failed);
        Self {
            total,
            succeeded,
            failed,
            success_rate: if total == 0 { 0.0 } else { f64::from(succeeded) / f64::from(total) * 100.0 },
            throughput_per_sec: if wall_clock_secs > 0.0 { processed / wall_clock_secs } else { 0.0 },
            wall_clock_secs,
            latency: LatencySummary::from_samples(&latencies),
            avg_processing_ms: mean(&processing),
            error_histogram: histogram,
        }
    }
}

fn millis_between(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}
