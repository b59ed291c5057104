//! Cancellation Handler.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use docpipe_core::{RequestId, TenantId};

use crate::config::instant_after;
use crate::work_store::{WorkStore, WorkStoreError};

pub const CANCELLED_BY_TENANT: &str = "cancelled by tenant";

/// Moves a tenant's non-terminal request to `CANCELLED`.
///
/// A running executor notices at its next chunk boundary.
#[derive(Clone)]
pub struct CancellationHandler {
    store: Arc<dyn WorkStore>,
    retention: chrono::Duration,
}

impl CancellationHandler {
    pub fn new(store: Arc<dyn WorkStore>, retention: chrono::Duration) -> Self {
        Self { store, retention }
    }

    /// `false` when the request is unknown, owned by another tenant, or already terminal.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, request_id = %request_id), err)]
    pub async fn cancel(&self, tenant_id: TenantId, request_id: RequestId) -> Result<bool, WorkStoreError> {
        let now = Utc::now();
        let expires_at = instant_after(now, self.retention);
        let cancelled = self
            .store
            .cancel_request(tenant_id, request_id, CANCELLED_BY_TENANT, now, expires_at)
            .await?;
        if cancelled {
            info!("request cancelled");
        }
        Ok(cancelled)
    }
}
