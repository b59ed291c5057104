//! Stale Recovery Monitor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::config::instant_before;
use crate::work_store::{RecoveryReport, WorkStore, WorkStoreError};

/// Hands requests abandoned by crashed workers back to the claimable pool.
#[derive(Clone)]
pub struct StaleRecoveryMonitor {
    store: Arc<dyn WorkStore>,
    stale_timeout: chrono::Duration,
}

impl StaleRecoveryMonitor {
    pub fn new(store: Arc<dyn WorkStore>, stale_timeout: chrono::Duration) -> Self {
        Self {
            store,
            stale_timeout,
        }
    }

    pub async fn recover(&self) -> Result<RecoveryReport, WorkStoreError> {
        self.recover_at(Utc::now()).await
    }

    /// Reset requests claimed more than the stale timeout before `now`.
    #[instrument(skip(self), err)]
    pub async fn recover_at(&self, now: DateTime<Utc>) -> Result<RecoveryReport, WorkStoreError> {
        let report = self.store.recover_stale(instant_before(now, self.stale_timeout)).await?;
        if !report.is_empty() {
            info!(
                requests_reset = report.requests_reset(),
                items_reset = report.items_reset,
                request_ids = ?report.request_ids,
                "recovered stale requests"
            );
        }
        Ok(report)
    }
}
