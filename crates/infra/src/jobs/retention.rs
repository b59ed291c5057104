//! Retention sweep for terminal requests and rendered outputs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use super::PipelineError;
use crate::config::instant_before;
use crate::output_store::OutputStore;
use crate::work_store::WorkStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub requests_deleted: usize,
    pub outputs_deleted: usize,
}

/// Deletes expired terminal requests (items go with them) and old outputs.
///
/// Outputs have their own retention period, independent of the request that
/// produced them.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn WorkStore>,
    outputs: Arc<dyn OutputStore>,
    output_retention: chrono::Duration,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn WorkStore>,
        outputs: Arc<dyn OutputStore>,
        output_retention: chrono::Duration,
    ) -> Self {
        Self {
            store,
            outputs,
            output_retention,
        }
    }

    #[instrument(skip(self), err)]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<RetentionReport, PipelineError> {
        let output_cutoff = instant_before(now, self.output_retention);
        let report = RetentionReport {
            requests_deleted: self.store.delete_expired(now).await?,
            outputs_deleted: self.outputs.delete_older_than(output_cutoff).await?,
        };
        if report != RetentionReport::default() {
            info!(
                requests_deleted = report.requests_deleted,
                outputs_deleted = report.outputs_deleted,
                "retention sweep"
            );
        }
        Ok(report)
    }
}
