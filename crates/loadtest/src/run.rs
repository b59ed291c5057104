//! Load test run records and their store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use docpipe_core::{BatchId, DomainError, DomainResult, LoadTestRunId, RequestId, TenantId};

use crate::metrics::LoadTestMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Live progress of the run's items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub completed: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestRun {
    pub id: LoadTestRunId,
    pub tenant_id: TenantId,
    pub target_count: u32,
    pub status: RunStatus,
    pub batch_id: Option<BatchId>,
    pub request_id: Option<RequestId>,
    pub progress: RunProgress,
    pub metrics: Option<LoadTestMetrics>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LoadTestRun {
    pub fn new(tenant_id: TenantId, target_count: u32, now: DateTime<Utc>) -> DomainResult<Self> {
        if target_count == 0 {
            return Err(DomainError::validation("target count must be at least 1"));
        }
        Ok(Self {
            id: LoadTestRunId::new(),
            tenant_id,
            target_count,
            status: RunStatus::Pending,
            batch_id: None,
            request_id: None,
            progress: RunProgress::default(),
            metrics: None,
            error_message: None,
            cancel_requested: false,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum RunStoreError {
    #[error("load test run not found: {0}")]
    NotFound(LoadTestRunId),
    #[error("run store error: {0}")]
    Storage(String),
}

/// Terminal outcome written once at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub metrics: LoadTestMetrics,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: LoadTestRun) -> Result<(), RunStoreError>;

    /// Tenant-scoped lookup; other tenants' runs read as absent.
    async fn get(&self, tenant_id: TenantId, run_id: LoadTestRunId) -> Result<Option<LoadTestRun>, RunStoreError>;

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<LoadTestRun>, RunStoreError>;

    async fn mark_running(
        &self,
        run_id: LoadTestRunId,
        batch_id: BatchId,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<(), RunStoreError>;

    async fn update_progress(&self, run_id: LoadTestRunId, progress: RunProgress) -> Result<(), RunStoreError>;

    /// Flag a non-terminal run for cancellation. `false` when absent, foreign or finished.
    async fn request_cancel(&self, tenant_id: TenantId, run_id: LoadTestRunId) -> Result<bool, RunStoreError>;

    async fn is_cancel_requested(&self, run_id: LoadTestRunId) -> Result<bool, RunStoreError>;

    /// Write the terminal outcome unless the run already finished. Returns the stored run.
    async fn finish(
        &self,
        run_id: LoadTestRunId,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> Result<LoadTestRun, RunStoreError>;
}

/// Process-local run store.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<LoadTestRunId, LoadTestRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(
        &self,
        run_id: LoadTestRunId,
        f: impl FnOnce(&mut LoadTestRun) -> T,
    ) -> Result<T, RunStoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|_| RunStoreError::Storage("run store lock poisoned".to_string()))?;
        let run = runs.get_mut(&run_id).ok_or(RunStoreError::NotFound(run_id))?;
        Ok(f(run))
    }

    fn snapshot(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<LoadTestRunId, LoadTestRun>>, RunStoreError> {
        self.runs
            .read()
            .map_err(|_| RunStoreError::Storage("run store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: LoadTestRun) -> Result<(), RunStoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|_| RunStoreError::Storage("run store lock poisoned".to_string()))?;
        runs.insert(run.id, run);
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, run_id: LoadTestRunId) -> Result<Option<LoadTestRun>, RunStoreError> {
        Ok(self
            .snapshot()?
            .get(&run_id)
            .filter(|run| run.tenant_id == tenant_id)
            .cloned())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<LoadTestRun>, RunStoreError> {
        let mut runs: Vec<_> = self
            .snapshot()?
            .values()
            .filter(|run| run.tenant_id == tenant_id)
            .cloned()
            .collect();
        runs.sort_by_key(|run| std::cmp::Reverse((run.created_at, run.id)));
        Ok(runs)
    }

    async fn mark_running(
        &self,
        run_id: LoadTestRunId,
        batch_id: BatchId,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<(), RunStoreError> {
        self.with_run(run_id, |run| {
            if run.status == RunStatus::Pending {
                run.status = RunStatus::Running;
                run.batch_id = Some(batch_id);
                run.request_id = Some(request_id);
                run.started_at = Some(now);
            }
        })
    }

    async fn update_progress(&self, run_id: LoadTestRunId, progress: RunProgress) -> Result<(), RunStoreError> {
        self.with_run(run_id, |run| {
            if !run.status.is_terminal() {
                run.progress = progress;
            }
        })
    }

    async fn request_cancel(&self, tenant_id: TenantId, run_id: LoadTestRunId) -> Result<bool, RunStoreError> {
        match self.with_run(run_id, |run| {
            if run.tenant_id != tenant_id || run.status.is_terminal() || run.cancel_requested {
                return false;
            }
            run.cancel_requested = true;
            true
        }) {
            Err(RunStoreError::NotFound(_)) => Ok(false),
            other => other,
        }
    }

    async fn is_cancel_requested(&self, run_id: LoadTestRunId) -> Result<bool, RunStoreError> {
        self.snapshot()?
            .get(&run_id)
            .map(|run| run.cancel_requested)
            .ok_or(RunStoreError::NotFound(run_id))
    }

    async fn finish(
        &self,
        run_id: LoadTestRunId,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> Result<LoadTestRun, RunStoreError> {
        self.with_run(run_id, |run| {
            if !run.status.is_terminal() {
                run.progress = RunProgress {
                    completed: outcome.metrics.succeeded,
                    failed: outcome.metrics.failed,
                };
                run.status = outcome.status;
                run.metrics = Some(outcome.metrics);
                run.error_message = outcome.error_message;
                run.completed_at = Some(now);
            }
            run.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stored_run(store: &InMemoryRunStore, tenant: TenantId) -> LoadTestRun {
        let run = LoadTestRun::new(tenant, 10, Utc::now()).unwrap();
        store.create(run.clone()).await.unwrap();
        run
    }

    #[test]
    fn zero_target_is_rejected() {
        assert!(LoadTestRun::new(TenantId::new(), 0, Utc::now()).is_err());
    }

    #[tokio::test]
    async fn runs_are_tenant_scoped() {
        let store = InMemoryRunStore::new();
        let tenant = TenantId::new();
        let run = stored_run(&store, tenant).await;

        assert!(store.get(tenant, run.id).await.unwrap().is_some());
        assert!(store.get(TenantId::new(), run.id).await.unwrap().is_none());
        assert!(!store.request_cancel(TenantId::new(), run.id).await.unwrap());
        assert!(store.list(TenantId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_flag_is_set_once() {
        let store = InMemoryRunStore::new();
        let tenant = TenantId::new();
        let run = stored_run(&store, tenant).await;

        assert!(store.request_cancel(tenant, run.id).await.unwrap());
        assert!(!store.request_cancel(tenant, run.id).await.unwrap());
        assert!(store.is_cancel_requested(run.id).await.unwrap());
        assert!(!store.request_cancel(tenant, LoadTestRunId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn first_outcome_wins() {
        let store = InMemoryRunStore::new();
        let tenant = TenantId::new();
        let run = stored_run(&store, tenant).await;

        let finished = store
            .finish(
                run.id,
                RunOutcome {
                    status: RunStatus::Completed,
                    metrics: LoadTestMetrics::empty(10),
                    error_message: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::Completed);

        let again = store
            .finish(
                run.id,
                RunOutcome {
                    status: RunStatus::Failed,
                    metrics: LoadTestMetrics::empty(10),
                    error_message: Some("late".to_string()),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(again.status, RunStatus::Completed);
        assert!(again.error_message.is_none());
        assert!(!store.request_cancel(tenant, run.id).await.unwrap());
    }
}
