//! Executor: renders the items of a claimed request in committed chunks.
//!
//! Each item is an independent checkpoint (`start → complete|fail`), and the
//! request counters are refreshed after every chunk, so a crash at any point
//! leaves state that stale recovery can hand to another worker. Item failures
//! are recorded on the item and never abort siblings or the request.
//!
//! Between chunks the executor re-reads the request and stops when it was
//! cancelled, lost its claim, or the worker is shutting down.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use docpipe_core::WorkerId;
use docpipe_generation::{ConcurrencyMode, GenerationItem, GenerationRequest, OutputRef, RequestStatus};

use super::PipelineDeps;
use crate::config::ExecutorConfig;
use crate::output_store::OutputStoreError;
use crate::rendering::{RenderError, ResolveError};
use crate::work_store::WorkStoreError;

/// Why one item failed. `Display` is the message stored on the item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemFailure {
    #[error("template resolution failed: {0}")]
    Resolution(#[from] ResolveError),
    #[error("{0}")]
    Render(#[from] RenderError),
    #[error("output size {size} bytes exceeds the limit of {limit} bytes")]
    OutputTooLarge { size: usize, limit: usize },
    #[error("failed to store output: {0}")]
    OutputStore(String),
}

impl From<OutputStoreError> for ItemFailure {
    fn from(err: OutputStoreError) -> Self {
        ItemFailure::OutputStore(err.to_string())
    }
}

/// How an execution pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// No pending items remain; the request is ready to finalize.
    Drained,
    /// The request was cancelled; processing stopped at a chunk boundary.
    Cancelled,
    /// Another worker (or stale recovery) took the request over.
    ClaimLost,
    /// Worker shutdown; the claim went back to the pool.
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub chunks: usize,
    pub completed: usize,
    pub failed: usize,
}

enum ItemResult {
    Completed,
    Failed,
    /// The item was no longer in the expected state.
    Skipped,
}

#[derive(Clone)]
pub struct Executor {
    deps: PipelineDeps,
    config: ExecutorConfig,
    worker_id: WorkerId,
}

impl Executor {
    pub fn new(deps: PipelineDeps, config: ExecutorConfig, worker_id: WorkerId) -> Self {
        Self {
            deps,
            config,
            worker_id,
        }
    }

    /// Process every pending item of a request this worker has claimed.
    ///
    /// Only store errors surface as `Err`; the request then stays claimed
    /// until stale recovery resets it.
    #[instrument(
        skip(self, request, shutdown),
        fields(worker_id = %self.worker_id, request_id = %request.id, tenant_id = %request.tenant_id),
        err
    )]
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        shutdown: &CancellationToken,
    ) -> Result<ExecutionReport, WorkStoreError> {
        let mut report = ExecutionReport {
            outcome: ExecutionOutcome::Drained,
            chunks: 0,
            completed: 0,
            failed: 0,
        };
        let chunk_size = self.config.chunk_size.max(1);

        loop {
            if let Some(outcome) = self.checkpoint(request, shutdown).await? {
                report.outcome = outcome;
                break;
            }

            let items = self.deps.store.pending_items(request.id, chunk_size).await?;
            if items.is_empty() {
                break;
            }

            let limit = match request.concurrency {
                ConcurrencyMode::Bounded => self.config.item_concurrency.max(1),
                ConcurrencyMode::Unbounded => items.len(),
            };
            let results: Vec<Result<ItemResult, WorkStoreError>> = stream::iter(items)
                .map(|item| self.process_item(item))
                .buffer_unordered(limit)
                .collect()
                .await;

            for result in results {
                match result? {
                    ItemResult::Completed => report.completed += 1,
                    ItemResult::Failed => report.failed += 1,
                    ItemResult::Skipped => {}
                }
            }

            let counts = self.deps.store.refresh_counts(request.id).await?;
            report.chunks += 1;
            debug!(
                chunk = report.chunks,
                completed = counts.completed,
                failed = counts.failed,
                total = counts.total,
                "chunk committed"
            );
        }

        info!(
            outcome = ?report.outcome,
            chunks = report.chunks,
            completed = report.completed,
            failed = report.failed,
            "execution pass finished"
        );
        Ok(report)
    }

    /// Chunk-boundary checks. `Some` means stop.
    async fn checkpoint(
        &self,
        request: &GenerationRequest,
        shutdown: &CancellationToken,
    ) -> Result<Option<ExecutionOutcome>, WorkStoreError> {
        let current = self.deps.store.load_request(request.id).await?;
        let Some(current) = current else {
            warn!("request disappeared while executing");
            return Ok(Some(ExecutionOutcome::ClaimLost));
        };

        if current.status == RequestStatus::Cancelled {
            info!("cancellation observed, stopping");
            return Ok(Some(ExecutionOutcome::Cancelled));
        }
        if !current.is_claimed_by(&self.worker_id) {
            warn!(status = %current.status, claimed_by = ?current.claimed_by, "claim lost, stopping");
            return Ok(Some(ExecutionOutcome::ClaimLost));
        }
        if shutdown.is_cancelled() {
            let released = self.deps.store.release_claim(request.id, &self.worker_id).await?;
            info!(released, "worker shutting down, claim handed back");
            return Ok(Some(if released {
                ExecutionOutcome::Released
            } else {
                ExecutionOutcome::ClaimLost
            }));
        }
        Ok(None)
    }

    async fn process_item(&self, item: GenerationItem) -> Result<ItemResult, WorkStoreError> {
        let store = &self.deps.store;
        if !store.start_item(item.request_id, item.id, Utc::now()).await? {
            return Ok(ItemResult::Skipped);
        }

        match self.produce(&item).await {
            Ok(output_ref) => {
                if store
                    .complete_item(item.request_id, item.id, output_ref, Utc::now())
                    .await?
                {
                    Ok(ItemResult::Completed)
                } else {
                    // Reset underneath us; the next attempt renders again.
                    if let Err(err) = self.deps.outputs.delete(item.tenant_id, output_ref).await {
                        warn!(item_id = %item.id, error = %err, "failed to drop orphaned output");
                    }
                    Ok(ItemResult::Skipped)
                }
            }
            Err(failure) => {
                debug!(item_id = %item.id, sequence = item.sequence, error = %failure, "item failed");
                if store
                    .fail_item(item.request_id, item.id, &failure.to_string(), Utc::now())
                    .await?
                {
                    Ok(ItemResult::Failed)
                } else {
                    Ok(ItemResult::Skipped)
                }
            }
        }
    }

    /// Resolve, render, size-check and persist one item's document.
    async fn produce(&self, item: &GenerationItem) -> Result<OutputRef, ItemFailure> {
        let definition = self
            .deps
            .resolver
            .resolve(item.tenant_id, &item.template_ref, &item.variant_ref, &item.version)
            .await?;

        let bytes = self.deps.renderer.render(&definition, &item.data).await?;
        if bytes.len() > self.config.max_output_bytes {
            return Err(ItemFailure::OutputTooLarge {
                size: bytes.len(),
                limit: self.config.max_output_bytes,
            });
        }

        let output_ref = self
            .deps
            .outputs
            .put(item.tenant_id, item.id, item.filename.as_deref(), bytes, Utc::now())
            .await?;
        Ok(output_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{deps, spec, ScriptedRenderer};
    use crate::work_store::{WorkStore, InMemoryWorkStore};
    use crate::jobs::BatchSubmitter;
    use docpipe_core::TenantId;
    use docpipe_generation::{ItemStatus, VersionSelector};
    use std::sync::Arc;

    async fn claimed(
        store: &Arc<InMemoryWorkStore>,
        specs: Vec<docpipe_generation::ItemSpec>,
        concurrency: ConcurrencyMode,
        worker: &WorkerId,
    ) -> (TenantId, GenerationRequest) {
        let tenant = TenantId::new();
        BatchSubmitter::new(store.clone())
            .submit_batch(tenant, specs, concurrency)
            .await
            .unwrap();
        let request = store.claim_next(worker, Utc::now()).await.unwrap().unwrap();
        (tenant, request)
    }

    #[tokio::test]
    async fn failures_are_isolated_per_item() {
        let store = InMemoryWorkStore::arc();
        let worker = WorkerId::generate("w");
        let renderer = ScriptedRenderer::failing_on(&["customer-1", "customer-3"]);
        let deps = deps(store.clone(), Arc::new(renderer));
        let (tenant, request) =
            claimed(&store, (0..5).map(spec).collect(), ConcurrencyMode::Bounded, &worker).await;

        let config = ExecutorConfig { chunk_size: 2, ..ExecutorConfig::default() };
        let report = Executor::new(deps, config, worker)
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Drained);
        assert_eq!(report.chunks, 3);
        assert_eq!((report.completed, report.failed), (3, 2));

        let items = store.list_items(tenant, request.id).await.unwrap();
        for item in &items {
            item.check_invariants().unwrap();
        }
        let failed: Vec<_> = items.iter().filter(|i| i.status == ItemStatus::Failed).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed[0].error_message.as_deref().unwrap().starts_with("validation error"));

        let request = store.load_request(request.id).await.unwrap().unwrap();
        assert_eq!((request.completed_count, request.failed_count), (3, 2));
    }

    #[tokio::test]
    async fn unresolved_environment_fails_only_that_item() {
        let store = InMemoryWorkStore::arc();
        let worker = WorkerId::generate("w");
        let deps = deps(store.clone(), Arc::new(ScriptedRenderer::default()));
        let mut specs: Vec<_> = (0..2).map(spec).collect();
        specs[1].version = VersionSelector::environment("nowhere");
        let (tenant, request) = claimed(&store, specs, ConcurrencyMode::Bounded, &worker).await;

        let report = Executor::new(deps, ExecutorConfig::default(), worker)
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((report.completed, report.failed), (1, 1));

        let items = store.list_items(tenant, request.id).await.unwrap();
        assert!(items[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("no active version for environment 'nowhere'"));
    }

    #[tokio::test]
    async fn oversized_output_is_an_item_failure() {
        let store = InMemoryWorkStore::arc();
        let worker = WorkerId::generate("w");
        let deps = deps(store.clone(), Arc::new(ScriptedRenderer::default()));
        let (tenant, request) =
            claimed(&store, vec![spec(0)], ConcurrencyMode::Unbounded, &worker).await;

        let config = ExecutorConfig { max_output_bytes: 4, ..ExecutorConfig::default() };
        let report = Executor::new(deps, config, worker)
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.failed, 1);

        let items = store.list_items(tenant, request.id).await.unwrap();
        assert!(items[0].error_message.as_deref().unwrap().contains("exceeds the limit of 4 bytes"));
        assert!(items[0].output_ref.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_chunk() {
        let store = InMemoryWorkStore::arc();
        let worker = WorkerId::generate("w");
        let deps = deps(store.clone(), Arc::new(ScriptedRenderer::default()));
        let (tenant, request) =
            claimed(&store, (0..4).map(spec).collect(), ConcurrencyMode::Bounded, &worker).await;

        let now = Utc::now();
        store
            .cancel_request(tenant, request.id, "cancelled by tenant", now, now)
            .await
            .unwrap();

        let report = Executor::new(deps, ExecutorConfig::default(), worker)
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
        assert_eq!(report.chunks, 0);
        assert_eq!(store.pending_items(request.id, 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn shutdown_releases_the_claim() {
        let store = InMemoryWorkStore::arc();
        let worker = WorkerId::generate("w");
        let deps = deps(store.clone(), Arc::new(ScriptedRenderer::default()));
        let (_, request) =
            claimed(&store, (0..2).map(spec).collect(), ConcurrencyMode::Bounded, &worker).await;

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let report = Executor::new(deps, ExecutorConfig::default(), worker)
            .execute(&request, &shutdown)
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Released);
        assert!(store.load_request(request.id).await.unwrap().unwrap().is_claimable());
    }

    #[tokio::test]
    async fn lost_claim_stops_without_touching_items() {
        let store = InMemoryWorkStore::arc();
        let owner = WorkerId::generate("owner");
        let deps = deps(store.clone(), Arc::new(ScriptedRenderer::default()));
        let (_, request) =
            claimed(&store, (0..2).map(spec).collect(), ConcurrencyMode::Bounded, &owner).await;

        let report = Executor::new(deps, ExecutorConfig::default(), WorkerId::generate("intruder"))
            .execute(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::ClaimLost);
        assert_eq!(store.pending_items(request.id, 10).await.unwrap().len(), 2);
    }
}
