//! Progress counting and terminal-status derivation.

use serde::{Deserialize, Serialize};

use docpipe_core::{DomainError, DomainResult};

use crate::item::ItemStatus;
use crate::request::RequestStatus;

/// Item outcome counts for one request.
///
/// Invariant: `completed + failed <= total`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl ProgressCounts {
    /// Tally item statuses. Items beyond `total` are an invariant violation.
    pub fn tally<'a>(total: u32, statuses: impl IntoIterator<Item = &'a ItemStatus>) -> DomainResult<Self> {
        let mut counts = Self { total, ..Self::default() };
        for status in statuses {
            match status {
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Pending | ItemStatus::InProgress => {}
            }
        }
        counts.validate()?;
        Ok(counts)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if u64::from(self.completed) + u64::from(self.failed) > u64::from(self.total) {
            return Err(DomainError::invariant(format!(
                "completed ({}) + failed ({}) exceeds total ({})",
                self.completed, self.failed, self.total
            )));
        }
        Ok(())
    }

    pub fn processed(&self) -> u32 {
        self.completed.saturating_add(self.failed)
    }

    pub fn is_drained(&self) -> bool {
        self.processed() == self.total
    }
}

/// Status (and optional summary message) to finalize a request with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalDecision {
    pub status: RequestStatus,
    pub message: Option<String>,
}

/// Derive a request's terminal status from its item counts.
///
/// - interrupted (cancelled or abandoned run) → `CANCELLED`
/// - every item failed → `FAILED`
/// - every item accounted for → `COMPLETED` (partial success included)
/// - anything else → `FAILED` with an "inconsistent counts" message
pub fn derive_terminal_status(counts: ProgressCounts, interrupted: bool) -> TerminalDecision {
    if interrupted {
        return TerminalDecision {
            status: RequestStatus::Cancelled,
            message: Some(format!(
                "stopped after {} of {} items",
                counts.processed(),
                counts.total
            )),
        };
    }

    if counts.failed == counts.total {
        return TerminalDecision {
            status: RequestStatus::Failed,
            message: Some(format!("all {} items failed", counts.total)),
        };
    }

    if counts.is_drained() {
        let message = (counts.failed > 0)
            .then(|| format!("{} of {} items failed", counts.failed, counts.total));
        return TerminalDecision {
            status: RequestStatus::Completed,
            message,
        };
    }

    TerminalDecision {
        status: RequestStatus::Failed,
        message: Some(format!(
            "inconsistent item counts: completed={}, failed={}, total={}",
            counts.completed, counts.failed, counts.total
        )),
    }
}
