//! Tenant-facing facade over the pipeline.

use std::sync::Arc;

use serde::Serialize;

use docpipe_core::{RequestId, TenantId};
use docpipe_generation::{ConcurrencyMode, GenerationItem, GenerationRequest, ItemSpec};

use crate::config::PipelineConfig;
use crate::jobs::{BatchReceipt, BatchSubmitter, CancellationHandler};
use crate::work_store::{ItemStatusCounts, RequestFilter, WorkStore, WorkStoreError};

/// A request together with a live breakdown of its items.
#[derive(Debug, Clone, Serialize)]
pub struct RequestStatusView {
    pub request: GenerationRequest,
    pub items: ItemStatusCounts,
}

/// Submission, cancellation and status reads, always scoped to one tenant.
#[derive(Clone)]
pub struct GenerationService {
    store: Arc<dyn WorkStore>,
    submitter: BatchSubmitter,
    cancellation: CancellationHandler,
}

impl GenerationService {
    pub fn new(store: Arc<dyn WorkStore>, config: &PipelineConfig) -> Self {
        Self {
            submitter: BatchSubmitter::new(store.clone()),
            cancellation: CancellationHandler::new(
                store.clone(),
                config.retention.request_retention_delta(),
            ),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkStore> {
        &self.store
    }

    pub async fn submit_single(&self, tenant_id: TenantId, spec: ItemSpec) -> Result<RequestId, WorkStoreError> {
        self.submitter.submit_single(tenant_id, spec).await
    }

    pub async fn submit_batch(
        &self,
        tenant_id: TenantId,
        specs: Vec<ItemSpec>,
        concurrency: ConcurrencyMode,
    ) -> Result<BatchReceipt, WorkStoreError> {
        self.submitter.submit_batch(tenant_id, specs, concurrency).await
    }

    pub async fn cancel(&self, tenant_id: TenantId, request_id: RequestId) -> Result<bool, WorkStoreError> {
        self.cancellation.cancel(tenant_id, request_id).await
    }

    /// `None` when the request does not exist for this tenant.
    pub async fn get_status(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Option<RequestStatusView>, WorkStoreError> {
        let Some(request) = self.store.get_request(tenant_id, request_id).await? else {
            return Ok(None);
        };
        let items = self.store.item_status_counts(tenant_id, request_id).await?;
        Ok(Some(RequestStatusView { request, items }))
    }

    pub async fn list_items(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Vec<GenerationItem>, WorkStoreError> {
        self.store.list_items(tenant_id, request_id).await
    }

    pub async fn list_requests(
        &self,
        tenant_id: TenantId,
        filter: RequestFilter,
    ) -> Result<Vec<GenerationRequest>, WorkStoreError> {
        self.store.list_requests(tenant_id, filter).await
    }
}
