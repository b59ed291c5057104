//! Load test harness for the generation pipeline.
//!
//! A run submits one unbounded batch through the normal submission path, polls
//! it to completion, and records latency/throughput metrics on its own run record.

pub mod harness;
pub mod metrics;
pub mod run;

pub use harness::{LoadTestConfig, LoadTestError, LoadTestHarness, LoadTestPlan};
pub use metrics::{ErrorCategory, ErrorHistogram, LatencySummary, LoadTestMetrics};
pub use run::{
    InMemoryRunStore, LoadTestRun, RunOutcome, RunProgress, RunStatus, RunStore, RunStoreError,
};
