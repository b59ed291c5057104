use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use docpipe_core::{BatchId, DomainError, ItemId, RequestId, TenantId, WorkerId};
use docpipe_generation::{
    GenerationItem, GenerationRequest, OutputRef, ProgressCounts, RequestStatus, TerminalDecision,
};

/// Work store error.
#[derive(Debug, Clone, Error)]
pub enum WorkStoreError {
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// A request plus its items, written as one atomic unit.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub request: GenerationRequest,
    pub items: Vec<GenerationItem>,
}

impl NewRequest {
    /// Check that items belong to the request and match its declared total.
    pub fn validate(&self) -> Result<(), WorkStoreError> {
        let expected = usize::try_from(self.request.total_count)
            .map_err(|_| DomainError::invariant("total_count does not fit in memory"))?;
        if self.items.len() != expected {
            return Err(DomainError::invariant(format!(
                "request declares {} items but {} were supplied",
                self.request.total_count,
                self.items.len()
            ))
            .into());
        }
        for (position, item) in self.items.iter().enumerate() {
            if item.tenant_id != self.request.tenant_id {
                return Err(WorkStoreError::TenantIsolation(format!(
                    "item at position {position} belongs to another tenant"
                )));
            }
            if item.request_id != self.request.id {
                return Err(DomainError::invariant(format!(
                    "item at position {position} references request {}",
                    item.request_id
                ))
                .into());
            }
            if item.sequence as usize != position {
                return Err(DomainError::invariant(format!(
                    "item at position {position} has sequence {}",
                    item.sequence
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Result of an attempt to finalize a request.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// This call made the terminal decision.
    Finalized(GenerationRequest),
    /// An earlier decision already stands; nothing changed.
    AlreadyTerminal(RequestStatus),
    /// The request is no longer held by the expected worker; nothing changed.
    NotOwner,
}

/// What a stale-recovery pass reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub request_ids: Vec<RequestId>,
    pub items_reset: usize,
}

impl RecoveryReport {
    pub fn requests_reset(&self) -> usize {
        self.request_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.request_ids.is_empty() && self.items_reset == 0
    }
}

/// Item counts by status for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatusCounts {
    pub pending: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
}

impl ItemStatusCounts {
    pub fn total(&self) -> u32 {
        self.pending + self.in_progress + self.completed + self.failed
    }

    pub fn terminal(&self) -> u32 {
        self.completed + self.failed
    }
}

/// Filter for tenant-facing request listings (newest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub batch_id: Option<BatchId>,
    pub limit: usize,
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self {
            status: None,
            batch_id: None,
            limit: 50,
        }
    }
}

/// Durable state of generation requests and items.
///
/// Every mutation is conditional on the row's current status, so concurrent
/// workers in different processes can share one store without in-memory locks.
/// Conditional item/request transitions return `Ok(false)` (or a non-applied
/// outcome) when the row was not in the expected state.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Write a request and all of its items atomically.
    async fn insert_request(&self, new: NewRequest) -> Result<GenerationRequest, WorkStoreError>;

    /// Tenant-scoped lookup. Requests of other tenants read as absent.
    async fn get_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Option<GenerationRequest>, WorkStoreError>;

    /// Worker-side lookup by id.
    async fn load_request(&self, request_id: RequestId) -> Result<Option<GenerationRequest>, WorkStoreError>;

    async fn list_requests(
        &self,
        tenant_id: TenantId,
        filter: RequestFilter,
    ) -> Result<Vec<GenerationRequest>, WorkStoreError>;

    /// All items of a request in submission order.
    async fn list_items(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Vec<GenerationItem>, WorkStoreError>;

    async fn item_status_counts(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<ItemStatusCounts, WorkStoreError>;

    /// Claim the oldest pending, unclaimed request for `worker`.
    ///
    /// At most one caller wins a given request, however many race for it.
    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<GenerationRequest>, WorkStoreError>;

    /// Up to `limit` pending items of a request, in submission order.
    async fn pending_items(
        &self,
        request_id: RequestId,
        limit: usize,
    ) -> Result<Vec<GenerationItem>, WorkStoreError>;

    /// `PENDING → IN_PROGRESS`.
    async fn start_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError>;

    /// `IN_PROGRESS → COMPLETED` with the stored output.
    async fn complete_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        output_ref: OutputRef,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError>;

    /// `IN_PROGRESS → FAILED` with a bounded message.
    async fn fail_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError>;

    /// Recompute completed/failed counters from item statuses.
    ///
    /// Terminal requests keep their frozen counters; the current values are returned.
    async fn refresh_counts(&self, request_id: RequestId) -> Result<ProgressCounts, WorkStoreError>;

    /// Apply a terminal decision unless one already stands.
    ///
    /// With `owner` set, the request must still be in progress under that worker.
    async fn finalize_request(
        &self,
        request_id: RequestId,
        decision: &TerminalDecision,
        owner: Option<&WorkerId>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, WorkStoreError>;

    /// Reset in-progress requests claimed before `cutoff` (and their in-progress items) to pending.
    async fn recover_stale(&self, cutoff: DateTime<Utc>) -> Result<RecoveryReport, WorkStoreError>;

    /// Hand a claim back to the pool (e.g. on graceful shutdown).
    async fn release_claim(&self, request_id: RequestId, worker: &WorkerId) -> Result<bool, WorkStoreError>;

    /// Cancel a non-terminal request of `tenant_id`. `false` when absent, foreign or terminal.
    async fn cancel_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        message: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError>;

    /// Delete terminal requests whose retention expired; items go with them.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, WorkStoreError>;
}
