//! Load Test Harness.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, instrument, warn};

use docpipe_core::{DomainError, LoadTestRunId, RequestId, TenantId};
use docpipe_generation::{ConcurrencyMode, GenerationItem, ItemSpec, RequestStatus, VersionSelector};
use docpipe_infra::output_store::OutputStore;
use docpipe_infra::service::GenerationService;
use docpipe_infra::work_store::WorkStoreError;

use crate::metrics::LoadTestMetrics;
use crate::run::{LoadTestRun, RunOutcome, RunProgress, RunStatus, RunStore, RunStoreError};

#[derive(Debug, Clone, Error)]
pub enum LoadTestError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    RunStore(#[from] RunStoreError),
    #[error(transparent)]
    WorkStore(#[from] WorkStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTestConfig {
    pub poll_interval: Duration,
    /// A run still unfinished after this long is recorded as `FAILED`.
    pub timeout: Duration,
    /// Delete the run's generated documents once metrics are recorded.
    pub cleanup_outputs: bool,
    /// Largest `target_count` a plan may ask for.
    pub max_target_count: u32,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(600),
            cleanup_outputs: true,
            max_target_count: 100_000,
        }
    }
}

/// What a run submits: `target_count` items of one template, with data
/// records taken from `test_data` in turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestPlan {
    pub target_count: u32,
    pub template_ref: String,
    pub variant_ref: String,
    pub version: VersionSelector,
    #[serde(default)]
    pub test_data: Vec<serde_json::Value>,
}

impl LoadTestPlan {
    fn spec(&self, run_id: LoadTestRunId, index: usize) -> ItemSpec {
        let data = match self.test_data.len() {
            0 => serde_json::Value::Object(Default::default()),
            len => self.test_data[index % len].clone(),
        };
        ItemSpec::new(&self.template_ref, &self.variant_ref, self.version.clone(), data)
            .with_filename(format!("loadtest-{run_id}-{index}"))
    }

    fn specs(&self, run_id: LoadTestRunId) -> Vec<ItemSpec> {
        (0..self.target_count as usize)
            .map(|index| self.spec(run_id, index))
            .collect()
    }
}

/// Drives load test runs through the regular submission path.
#[derive(Clone)]
pub struct LoadTestHarness {
    service: GenerationService,
    outputs: Arc<dyn OutputStore>,
    runs: Arc<dyn RunStore>,
    config: LoadTestConfig,
}

impl LoadTestHarness {
    pub fn new(
        service: GenerationService,
        outputs: Arc<dyn OutputStore>,
        runs: Arc<dyn RunStore>,
        config: LoadTestConfig,
    ) -> Self {
        Self {
            service,
            outputs,
            runs,
            config,
        }
    }

    /// Validate the plan and record a `PENDING` run for it.
    pub async fn create_run(&self, tenant_id: TenantId, plan: &LoadTestPlan) -> Result<LoadTestRun, LoadTestError> {
        if plan.target_count > self.config.max_target_count {
            return Err(DomainError::validation(format!(
                "target_count must not exceed {}",
                self.config.max_target_count
            ))
            .into());
        }
        let run = LoadTestRun::new(tenant_id, plan.target_count, Utc::now())?;
        plan.spec(run.id, 0).validate()?;
        self.runs.create(run.clone()).await?;
        info!(run_id = %run.id, tenant_id = %tenant_id, target = plan.target_count, "load test created");
        Ok(run)
    }

    /// Create a run and drive it to its terminal status.
    pub async fn run(&self, tenant_id: TenantId, plan: LoadTestPlan) -> Result<LoadTestRun, LoadTestError> {
        let run = self.create_run(tenant_id, &plan).await?;
        self.execute(run, plan).await
    }

    /// Ask a running test to stop; it also cancels the underlying request.
    pub async fn cancel(&self, tenant_id: TenantId, run_id: LoadTestRunId) -> Result<bool, LoadTestError> {
        Ok(self.runs.request_cancel(tenant_id, run_id).await?)
    }

    pub async fn get(&self, tenant_id: TenantId, run_id: LoadTestRunId) -> Result<Option<LoadTestRun>, LoadTestError> {
        Ok(self.runs.get(tenant_id, run_id).await?)
    }

    /// Submit the batch, poll it to a stopping point and record the outcome.
    ///
    /// Every failure after the run was recorded ends it as `FAILED`; only a
    /// failure to record that outcome is returned as an error.
    #[instrument(skip(self, run, plan), fields(run_id = %run.id, tenant_id = %run.tenant_id), err)]
    pub async fn execute(&self, run: LoadTestRun, plan: LoadTestPlan) -> Result<LoadTestRun, LoadTestError> {
        let tenant_id = run.tenant_id;

        if self.runs.is_cancel_requested(run.id).await? {
            return self
                .finish(run.id, RunStatus::Cancelled, LoadTestMetrics::empty(run.target_count), None)
                .await;
        }

        let receipt = match self
            .service
            .submit_batch(tenant_id, plan.specs(run.id), ConcurrencyMode::Unbounded)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(error = %err, "load test submission failed");
                return self
                    .finish(
                        run.id,
                        RunStatus::Failed,
                        LoadTestMetrics::empty(run.target_count),
                        Some(format!("submission failed: {err}")),
                    )
                    .await;
            }
        };
        if let Err(err) = self
            .runs
            .mark_running(run.id, receipt.batch_id, receipt.request_id, Utc::now())
            .await
        {
            warn!(error = %err, "could not mark load test running");
            if let Err(cancel_err) = self.service.cancel(tenant_id, receipt.request_id).await {
                warn!(error = %cancel_err, "could not cancel orphaned load test batch");
            }
            return self
                .finish(
                    run.id,
                    RunStatus::Failed,
                    LoadTestMetrics::empty(run.target_count),
                    Some(format!("load test aborted: {err}")),
                )
                .await;
        }
        info!(request_id = %receipt.request_id, batch_id = %receipt.batch_id, "load test batch submitted");

        let started = Instant::now();
        let (mut status, mut error_message) = match self.poll(&run, receipt.request_id, started).await {
            Ok(stop) => stop,
            Err(err) => {
                warn!(error = %err, "load test polling aborted");
                (RunStatus::Failed, Some(format!("load test aborted: {err}")))
            }
        };
        let wall_clock = started.elapsed();

        let items = match self.service.list_items(tenant_id, receipt.request_id).await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "could not read load test items");
                if status == RunStatus::Completed {
                    status = RunStatus::Failed;
                    error_message = Some(format!("could not read results: {err}"));
                }
                Vec::new()
            }
        };
        let metrics = LoadTestMetrics::compute(run.target_count, &items, wall_clock);
        info!(
            status = ?status,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            throughput_per_sec = metrics.throughput_per_sec,
            "load test finished"
        );
        let finished = self.finish(run.id, status, metrics, error_message).await?;

        if self.config.cleanup_outputs {
            self.cleanup(tenant_id, &items).await;
        }
        Ok(finished)
    }

    async fn poll(
        &self,
        run: &LoadTestRun,
        request_id: RequestId,
        started: Instant,
    ) -> Result<(RunStatus, Option<String>), LoadTestError> {
        let tenant_id = run.tenant_id;
        loop {
            sleep(self.config.poll_interval).await;

            if self.runs.is_cancel_requested(run.id).await? {
                self.service.cancel(tenant_id, request_id).await?;
                return Ok((RunStatus::Cancelled, Some("load test cancelled".to_string())));
            }

            match self.service.get_status(tenant_id, request_id).await {
                Ok(Some(view)) => {
                    let progress = RunProgress {
                        completed: view.items.completed,
                        failed: view.items.failed,
                    };
                    self.runs.update_progress(run.id, progress).await?;

                    if view.items.terminal() >= run.target_count {
                        return Ok((RunStatus::Completed, None));
                    }
                    match view.request.status {
                        RequestStatus::Cancelled => {
                            return Ok((RunStatus::Cancelled, view.request.error_message));
                        }
                        RequestStatus::Failed => {
                            return Ok((RunStatus::Failed, view.request.error_message));
                        }
                        RequestStatus::Completed => return Ok((RunStatus::Completed, None)),
                        RequestStatus::Pending | RequestStatus::InProgress => {}
                    }
                }
                Ok(None) => {
                    return Ok((RunStatus::Failed, Some("generation request disappeared".to_string())));
                }
                // Store hiccups only cost a poll cycle.
                Err(err) => warn!(error = %err, "load test poll failed"),
            }

            if started.elapsed() >= self.config.timeout {
                return Ok((
                    RunStatus::Failed,
                    Some(format!("timed out after {}s", self.config.timeout.as_secs())),
                ));
            }
        }
    }

    async fn finish(
        &self,
        run_id: LoadTestRunId,
        status: RunStatus,
        metrics: LoadTestMetrics,
        error_message: Option<String>,
    ) -> Result<LoadTestRun, LoadTestError> {
        let outcome = RunOutcome {
            status,
            metrics,
            error_message,
        };
        Ok(self.runs.finish(run_id, outcome, Utc::now()).await?)
    }

    async fn cleanup(&self, tenant_id: TenantId, items: &[GenerationItem]) {
        let mut deleted = 0usize;
        for output_ref in items.iter().filter_map(|item| item.output_ref) {
            match self.outputs.delete(tenant_id, output_ref).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "failed to delete load test output"),
            }
        }
        info!(deleted, "load test outputs cleaned up");
    }
}
