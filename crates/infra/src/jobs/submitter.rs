//! Batch Submitter: one request plus its items, written as a single unit.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use docpipe_core::{BatchId, DomainError, RequestId, TenantId};
use docpipe_generation::{
    assign_correlation_ids, ConcurrencyMode, GenerationItem, GenerationRequest, ItemSpec,
    RequestKind,
};

use crate::work_store::{NewRequest, WorkStore, WorkStoreError};

/// What a batch submission created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub batch_id: BatchId,
    pub request_id: RequestId,
    pub item_count: u32,
}

#[derive(Clone)]
pub struct BatchSubmitter {
    store: Arc<dyn WorkStore>,
}

impl BatchSubmitter {
    pub fn new(store: Arc<dyn WorkStore>) -> Self {
        Self { store }
    }

    /// Create a `BATCH` request with one pending item per spec.
    ///
    /// Items share a fresh batch id; each gets a correlation id unique within
    /// the batch. Nothing is persisted if validation or the insert fails.
    #[instrument(skip(self, specs), fields(tenant_id = %tenant_id, item_count = specs.len()), err)]
    pub async fn submit_batch(
        &self,
        tenant_id: TenantId,
        mut specs: Vec<ItemSpec>,
        concurrency: ConcurrencyMode,
    ) -> Result<BatchReceipt, WorkStoreError> {
        let total = u32::try_from(specs.len())
            .map_err(|_| DomainError::validation("batch has too many items"))?;
        validate_specs(&specs)?;

        let batch_id = BatchId::new();
        assign_correlation_ids(batch_id, &mut specs)?;

        let new = build(tenant_id, RequestKind::Batch, Some(batch_id), concurrency, specs, total)?;
        let request = self.store.insert_request(new).await?;

        info!(
            request_id = %request.id,
            batch_id = %batch_id,
            total = total,
            "batch submitted"
        );
        Ok(BatchReceipt {
            batch_id,
            request_id: request.id,
            item_count: total,
        })
    }

    /// Create a `SINGLE` request carrying exactly one item.
    #[instrument(skip(self, spec), fields(tenant_id = %tenant_id), err)]
    pub async fn submit_single(
        &self,
        tenant_id: TenantId,
        spec: ItemSpec,
    ) -> Result<RequestId, WorkStoreError> {
        let specs = vec![spec];
        validate_specs(&specs)?;

        let new = build(tenant_id, RequestKind::Single, None, ConcurrencyMode::Bounded, specs, 1)?;
        let request = self.store.insert_request(new).await?;

        info!(request_id = %request.id, "single request submitted");
        Ok(request.id)
    }
}

fn validate_specs(specs: &[ItemSpec]) -> Result<(), DomainError> {
    for (position, spec) in specs.iter().enumerate() {
        spec.validate().map_err(|e| match e {
            DomainError::Validation(msg) => {
                DomainError::validation(format!("item {position}: {msg}"))
            }
            other => other,
        })?;
    }
    Ok(())
}

fn build(
    tenant_id: TenantId,
    kind: RequestKind,
    batch_id: Option<BatchId>,
    concurrency: ConcurrencyMode,
    specs: Vec<ItemSpec>,
    total: u32,
) -> Result<NewRequest, DomainError> {
    let now = Utc::now();
    let request = GenerationRequest::new(tenant_id, kind, total, batch_id, concurrency, now)?;
    let items = specs
        .into_iter()
        .zip(0u32..)
        .map(|(spec, sequence)| GenerationItem::from_spec(request.id, tenant_id, sequence, spec, now))
        .collect();
    Ok(NewRequest { request, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spec;
    use crate::work_store::InMemoryWorkStore;
    use docpipe_generation::{ItemStatus, RequestStatus};

    fn submitter() -> (BatchSubmitter, Arc<InMemoryWorkStore>) {
        let store = InMemoryWorkStore::arc();
        (BatchSubmitter::new(store.clone()), store)
    }

    #[tokio::test]
    async fn batch_creates_pending_request_and_items() {
        let (submitter, store) = submitter();
        let tenant = TenantId::new();
        let receipt = submitter
            .submit_batch(tenant, (0..4).map(spec).collect(), ConcurrencyMode::Bounded)
            .await
            .unwrap();

        let request = store.get_request(tenant, receipt.request_id).await.unwrap().unwrap();
        assert_eq!(request.kind, RequestKind::Batch);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.total_count, 4);
        assert_eq!(request.batch_id, Some(receipt.batch_id));

        let items = store.list_items(tenant, receipt.request_id).await.unwrap();
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| i.status == ItemStatus::Pending));
        assert_eq!(items.iter().map(|i| i.sequence).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let (submitter, _) = submitter();
        let err = submitter
            .submit_batch(TenantId::new(), Vec::new(), ConcurrencyMode::Bounded)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkStoreError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn invalid_item_names_its_position_and_persists_nothing() {
        let (submitter, store) = submitter();
        let tenant = TenantId::new();
        let mut specs: Vec<_> = (0..3).map(spec).collect();
        specs[2].template_ref = "  ".to_string();

        let err = submitter
            .submit_batch(tenant, specs, ConcurrencyMode::Bounded)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("item 2"));
        assert!(store
            .list_requests(tenant, Default::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn single_request_has_one_item() {
        let (submitter, store) = submitter();
        let tenant = TenantId::new();
        let request_id = submitter.submit_single(tenant, spec(0)).await.unwrap();

        let request = store.get_request(tenant, request_id).await.unwrap().unwrap();
        assert_eq!(request.kind, RequestKind::Single);
        assert_eq!(request.total_count, 1);
        assert!(request.batch_id.is_none());
    }
}
