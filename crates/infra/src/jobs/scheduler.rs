//! Claim Scheduler.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use docpipe_core::WorkerId;
use docpipe_generation::GenerationRequest;

use crate::work_store::{WorkStore, WorkStoreError};

/// Claims the oldest pending request for one worker instance.
///
/// Holds no state of its own; claim safety comes from the store's conditional
/// update, so any number of schedulers may poll the same store.
#[derive(Clone)]
pub struct ClaimScheduler {
    store: Arc<dyn WorkStore>,
    worker_id: WorkerId,
}

impl ClaimScheduler {
    pub fn new(store: Arc<dyn WorkStore>, worker_id: WorkerId) -> Self {
        Self { store, worker_id }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// One poll cycle. `Ok(None)` means there was nothing to claim.
    #[instrument(skip(self), fields(worker_id = %self.worker_id), err)]
    pub async fn poll(&self) -> Result<Option<GenerationRequest>, WorkStoreError> {
        let claimed = self.store.claim_next(&self.worker_id, Utc::now()).await?;
        if let Some(request) = &claimed {
            info!(
                request_id = %request.id,
                tenant_id = %request.tenant_id,
                total = request.total_count,
                "claimed request"
            );
        }
        Ok(claimed)
    }
}
