//! Pipeline configuration loaded from `DOCPIPE_*` environment variables.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use docpipe_core::WorkerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}' as {expected}")]
    Unparsable {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Claim loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerConfig {
    pub worker_id: WorkerId,
    pub poll_interval: Duration,
}

/// Per-request execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorConfig {
    /// Items loaded and committed per chunk.
    pub chunk_size: usize,
    /// Parallel items within a chunk for `ConcurrencyMode::Bounded` requests.
    pub item_concurrency: usize,
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            item_concurrency: 8,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryConfig {
    /// Claims older than this are presumed abandoned.
    pub stale_timeout: Duration,
    pub interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(600),
            interval: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionConfig {
    /// How long terminal requests (and their items) are kept.
    pub request_retention: Duration,
    /// How long rendered documents are kept.
    pub output_retention: Duration,
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            request_retention: Duration::from_secs(168 * 3600),
            output_retention: Duration::from_secs(168 * 3600),
            interval: Duration::from_millis(3_600_000),
        }
    }
}

impl RetentionConfig {
    pub fn request_retention_delta(&self) -> chrono::Duration {
        to_delta(self.request_retention)
    }

    pub fn output_retention_delta(&self) -> chrono::Duration {
        to_delta(self.output_retention)
    }
}

/// Saturates instead of failing on durations chrono cannot represent.
pub(crate) fn to_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `now + delta`, clamped to the latest representable instant.
pub(crate) fn instant_after(now: DateTime<Utc>, delta: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - delta`, clamped to the earliest representable instant.
pub(crate) fn instant_before(now: DateTime<Utc>, delta: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Upper bound for request and output retention (ten years).
pub const MAX_RETENTION: Duration = Duration::from_secs(87_600 * 3600);

/// Upper bound for the stale-claim timeout (thirty days).
pub const MAX_STALE_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 3600);

/// Full worker/pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub recovery: RecoveryConfig,
    pub retention: RetentionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig {
                worker_id: default_worker_id(None),
                poll_interval: Duration::from_millis(1000),
            },
            executor: ExecutorConfig::default(),
            recovery: RecoveryConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let worker_id = match lookup("DOCPIPE_WORKER_ID") {
            Some(raw) => WorkerId::new(raw).map_err(|e| ConfigError::Invalid {
                key: "DOCPIPE_WORKER_ID",
                reason: e.to_string(),
            })?,
            None => default_worker_id(lookup("HOSTNAME")),
        };

        let config = Self {
            scheduler: SchedulerConfig {
                worker_id,
                poll_interval: millis(&lookup, "DOCPIPE_POLL_INTERVAL_MS", defaults.scheduler.poll_interval)?,
            },
            executor: ExecutorConfig {
                chunk_size: number(&lookup, "DOCPIPE_CHUNK_SIZE", defaults.executor.chunk_size)?,
                item_concurrency: number(
                    &lookup,
                    "DOCPIPE_ITEM_CONCURRENCY",
                    defaults.executor.item_concurrency,
                )?,
                max_output_bytes: number(
                    &lookup,
                    "DOCPIPE_MAX_OUTPUT_BYTES",
                    defaults.executor.max_output_bytes,
                )?,
            },
            recovery: RecoveryConfig {
                stale_timeout: Duration::from_secs(number(
                    &lookup,
                    "DOCPIPE_STALE_TIMEOUT_SECS",
                    defaults.recovery.stale_timeout.as_secs(),
                )?),
                interval: millis(&lookup, "DOCPIPE_RECOVERY_INTERVAL_MS", defaults.recovery.interval)?,
            },
            retention: RetentionConfig {
                request_retention: hours(
                    &lookup,
                    "DOCPIPE_REQUEST_RETENTION_HOURS",
                    defaults.retention.request_retention,
                )?,
                output_retention: hours(
                    &lookup,
                    "DOCPIPE_OUTPUT_RETENTION_HOURS",
                    defaults.retention.output_retention,
                )?,
                interval: millis(&lookup, "DOCPIPE_RETENTION_INTERVAL_MS", defaults.retention.interval)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("DOCPIPE_CHUNK_SIZE", self.executor.chunk_size),
            ("DOCPIPE_ITEM_CONCURRENCY", self.executor.item_concurrency),
            ("DOCPIPE_MAX_OUTPUT_BYTES", self.executor.max_output_bytes),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let intervals = [
            ("DOCPIPE_POLL_INTERVAL_MS", self.scheduler.poll_interval),
            ("DOCPIPE_RECOVERY_INTERVAL_MS", self.recovery.interval),
            ("DOCPIPE_RETENTION_INTERVAL_MS", self.retention.interval),
        ];
        for (key, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "interval must be non-zero".to_string(),
                });
            }
        }

        let bounded = [
            ("DOCPIPE_STALE_TIMEOUT_SECS", self.recovery.stale_timeout, MAX_STALE_TIMEOUT),
            ("DOCPIPE_REQUEST_RETENTION_HOURS", self.retention.request_retention, MAX_RETENTION),
            ("DOCPIPE_OUTPUT_RETENTION_HOURS", self.retention.output_retention, MAX_RETENTION),
        ];
        for (key, value, max) in bounded {
            if value > max {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must not exceed {}s", max.as_secs()),
                });
            }
        }
        Ok(())
    }
}

fn default_worker_id(hostname: Option<String>) -> WorkerId {
    let prefix = hostname.unwrap_or_else(|| "worker".to_string());
    WorkerId::generate(prefix.trim())
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Unparsable {
            key,
            value: raw,
            expected: "a non-negative integer",
        }),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    number(lookup, key, default_ms).map(Duration::from_millis)
}

fn hours(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    number(lookup, key, default.as_secs() / 3600).map(|h| Duration::from_secs(h.saturating_mul(3600)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.scheduler.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.recovery.stale_timeout, Duration::from_secs(600));
        assert_eq!(config.executor.chunk_size, 50);
        assert_eq!(config.executor.max_output_bytes, 10 * 1024 * 1024);
        assert_eq!(config.retention.request_retention, Duration::from_secs(168 * 3600));
        assert!(config.scheduler.worker_id.as_str().starts_with("worker-"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("DOCPIPE_WORKER_ID", "pod-7"),
            ("DOCPIPE_CHUNK_SIZE", "10"),
            ("DOCPIPE_STALE_TIMEOUT_SECS", "30"),
            ("DOCPIPE_OUTPUT_RETENTION_HOURS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.scheduler.worker_id.as_str(), "pod-7");
        assert_eq!(config.executor.chunk_size, 10);
        assert_eq!(config.recovery.stale_timeout, Duration::from_secs(30));
        assert_eq!(config.retention.output_retention, Duration::from_secs(7200));
    }

    #[test]
    fn hostname_prefixes_generated_worker_id() {
        let config = PipelineConfig::from_lookup(lookup(&[("HOSTNAME", "node-a")])).unwrap();
        assert!(config.scheduler.worker_id.as_str().starts_with("node-a-"));
    }

    #[test]
    fn bad_values_are_reported_with_their_key() {
        let err = PipelineConfig::from_lookup(lookup(&[("DOCPIPE_CHUNK_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Unparsable { key: "DOCPIPE_CHUNK_SIZE", .. }));

        let err = PipelineConfig::from_lookup(lookup(&[("DOCPIPE_ITEM_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DOCPIPE_ITEM_CONCURRENCY", .. }));
    }

    #[test]
    fn durations_beyond_their_bound_are_rejected() {
        for key in [
            "DOCPIPE_REQUEST_RETENTION_HOURS",
            "DOCPIPE_OUTPUT_RETENTION_HOURS",
            "DOCPIPE_STALE_TIMEOUT_SECS",
        ] {
            let err = PipelineConfig::from_lookup(lookup(&[(key, "99999999999")])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: k, .. } if k == key), "{key}: {err}");
        }

        let config = PipelineConfig::from_lookup(lookup(&[("DOCPIPE_REQUEST_RETENTION_HOURS", "87600")])).unwrap();
        assert_eq!(config.retention.request_retention, MAX_RETENTION);
    }

    #[test]
    fn instant_arithmetic_clamps_instead_of_overflowing() {
        let now = Utc::now();
        assert_eq!(instant_after(now, chrono::Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(instant_before(now, chrono::Duration::MAX), DateTime::<Utc>::MIN_UTC);
        let hour = chrono::Duration::hours(1);
        assert_eq!(instant_after(now, hour), now + hour);
        assert_eq!(instant_before(now, hour), now - hour);
    }
}
