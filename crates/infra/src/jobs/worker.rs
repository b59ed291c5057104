//! One claim → execute → finalize cycle, composed from the pipeline parts.

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use docpipe_core::{RequestId, WorkerId};

use super::{
    ClaimScheduler, CompletionAggregator, ExecutionOutcome, ExecutionReport, Executor,
    PipelineDeps,
};
use crate::config::{to_delta, PipelineConfig};
use crate::work_store::{FinalizeOutcome, WorkStoreError};

/// Result of processing one claimed request.
#[derive(Debug, Clone)]
pub struct ProcessedRequest {
    pub request_id: RequestId,
    pub execution: ExecutionReport,
    /// `None` when the pass ended without a terminal decision (claim lost or released).
    pub finalize: Option<FinalizeOutcome>,
}

#[derive(Clone)]
pub struct PipelineWorker {
    scheduler: ClaimScheduler,
    executor: Executor,
    aggregator: CompletionAggregator,
}

impl PipelineWorker {
    pub fn new(deps: PipelineDeps, config: &PipelineConfig) -> Self {
        let worker_id = config.scheduler.worker_id.clone();
        Self {
            scheduler: ClaimScheduler::new(deps.store.clone(), worker_id.clone()),
            aggregator: CompletionAggregator::new(
                deps.store.clone(),
                to_delta(config.retention.request_retention),
            ),
            executor: Executor::new(deps, config.executor, worker_id),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        self.scheduler.worker_id()
    }

    /// Claim one request and run it to a stopping point. `Ok(None)` when idle.
    #[instrument(skip(self, shutdown), fields(worker_id = %self.worker_id()), err)]
    pub async fn process_next(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<ProcessedRequest>, WorkStoreError> {
        let Some(request) = self.scheduler.poll().await? else {
            return Ok(None);
        };

        let execution = self.executor.execute(&request, shutdown).await?;
        let finalize = match execution.outcome {
            ExecutionOutcome::Drained => Some(
                self.aggregator
                    .finalize(request.id, false, Some(self.worker_id()))
                    .await?,
            ),
            // Already terminal; reports AlreadyTerminal(CANCELLED).
            ExecutionOutcome::Cancelled => Some(self.aggregator.finalize(request.id, true, None).await?),
            ExecutionOutcome::ClaimLost | ExecutionOutcome::Released => None,
        };

        Ok(Some(ProcessedRequest {
            request_id: request.id,
            execution,
            finalize,
        }))
    }
}
