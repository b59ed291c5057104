//! Generation requests: the unit that workers claim and finalize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docpipe_core::{BatchId, DomainError, DomainResult, RequestId, TenantId, WorkerId};

use crate::message::bounded_message;
use crate::outcome::ProgressCounts;

/// How the request was submitted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Single,
    Batch,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Single => "single",
            RequestKind::Batch => "batch",
        }
    }
}

impl core::str::FromStr for RequestKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(RequestKind::Single),
            "batch" => Ok(RequestKind::Batch),
            other => Err(DomainError::validation(format!("unknown request kind '{other}'"))),
        }
    }
}

/// Request lifecycle status.
///
/// `PENDING → IN_PROGRESS → {COMPLETED, FAILED, CANCELLED}`. Stale recovery may
/// move `IN_PROGRESS` back to `PENDING`; terminal states never change again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RequestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "in_progress" => Ok(RequestStatus::InProgress),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown request status '{other}'"))),
        }
    }
}

/// Item fan-out policy applied by the executor within one chunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Use the worker's configured item concurrency.
    #[default]
    Bounded,
    /// Issue every item of a chunk at once (load testing).
    Unbounded,
}

impl ConcurrencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Bounded => "bounded",
            ConcurrencyMode::Unbounded => "unbounded",
        }
    }
}

impl core::str::FromStr for ConcurrencyMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bounded" => Ok(ConcurrencyMode::Bounded),
            "unbounded" => Ok(ConcurrencyMode::Unbounded),
            other => Err(DomainError::validation(format!("unknown concurrency mode '{other}'"))),
        }
    }
}

/// A generation request (single document or batch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: RequestId,
    pub tenant_id: TenantId,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub claimed_by: Option<WorkerId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub total_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub error_message: Option<String>,
    pub batch_id: Option<BatchId>,
    pub concurrency: ConcurrencyMode,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GenerationRequest {
    /// Create a new pending request.
    pub fn new(
        tenant_id: TenantId,
        kind: RequestKind,
        total_count: u32,
        batch_id: Option<BatchId>,
        concurrency: ConcurrencyMode,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if total_count == 0 {
            return Err(DomainError::validation("a request needs at least one item"));
        }
        if kind == RequestKind::Single && total_count != 1 {
            return Err(DomainError::validation("a single request carries exactly one item"));
        }

        Ok(Self {
            id: RequestId::new(),
            tenant_id,
            kind,
            status: RequestStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            total_count,
            completed_count: 0,
            failed_count: 0,
            error_message: None,
            batch_id,
            concurrency,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the request is pending and nobody holds a claim on it.
    pub fn is_claimable(&self) -> bool {
        self.status == RequestStatus::Pending && self.claimed_by.is_none()
    }

    pub fn counts(&self) -> ProgressCounts {
        ProgressCounts {
            total: self.total_count,
            completed: self.completed_count,
            failed: self.failed_count,
        }
    }

    /// Claim for `worker`: `PENDING → IN_PROGRESS`.
    pub fn claim(&mut self, worker: &WorkerId, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_claimable() {
            return Err(DomainError::conflict(format!(
                "request {} is not claimable (status {})",
                self.id, self.status
            )));
        }
        self.status = RequestStatus::InProgress;
        self.claimed_by = Some(worker.clone());
        self.claimed_at = Some(now);
        self.started_at = Some(now);
        Ok(())
    }

    /// True when `worker` currently holds the in-progress claim.
    pub fn is_claimed_by(&self, worker: &WorkerId) -> bool {
        self.status == RequestStatus::InProgress && self.claimed_by.as_ref() == Some(worker)
    }

    /// Return the request to the claimable pool (stale recovery, claim release).
    pub fn reset_to_pending(&mut self) {
        self.status = RequestStatus::Pending;
        self.claimed_by = None;
        self.claimed_at = None;
        self.started_at = None;
    }

    /// Overwrite the progress counters; rejected once terminal or if they overflow the total.
    pub fn apply_counts(&mut self, counts: ProgressCounts) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::conflict(format!(
                "request {} is terminal ({}); counts are immutable",
                self.id, self.status
            )));
        }
        if counts.total != self.total_count {
            return Err(DomainError::invariant(format!(
                "count total {} does not match request total {}",
                counts.total, self.total_count
            )));
        }
        counts.validate()?;
        self.completed_count = counts.completed;
        self.failed_count = counts.failed;
        Ok(())
    }

    /// Move to a terminal status; the request may be swept after `expires_at`.
    pub fn finalize(
        &mut self,
        status: RequestStatus,
        message: Option<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot finalize request with non-terminal status {status}"
            )));
        }
        if self.is_terminal() {
            return Err(DomainError::conflict(format!(
                "request {} already finalized as {}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.error_message = message.map(bounded_message);
        self.completed_at = Some(now);
        self.expires_at = Some(expires_at);
        Ok(())
    }

    /// Cancel a non-terminal request. Returns `false` when already terminal.
    pub fn cancel(&mut self, message: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> bool {
        self.finalize(
            RequestStatus::Cancelled,
            Some(message.to_string()),
            now,
            expires_at,
        )
        .is_ok()
    }

    /// True once the retention window of a terminal request has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_terminal() && self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending(total: u32) -> GenerationRequest {
        GenerationRequest::new(
            TenantId::new(),
            RequestKind::Batch,
            total,
            Some(BatchId::new()),
            ConcurrencyMode::Bounded,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn empty_and_oversized_single_requests_are_rejected() {
        let tenant = TenantId::new();
        let now = Utc::now();
        assert!(GenerationRequest::new(tenant, RequestKind::Batch, 0, None, ConcurrencyMode::Bounded, now).is_err());
        assert!(GenerationRequest::new(tenant, RequestKind::Single, 2, None, ConcurrencyMode::Bounded, now).is_err());
    }

    #[test]
    fn claim_then_reset_clears_claim_fields() {
        let mut request = pending(3);
        let worker = WorkerId::generate("w");
        request.claim(&worker, Utc::now()).unwrap();

        assert_eq!(request.status, RequestStatus::InProgress);
        assert!(request.is_claimed_by(&worker));
        assert!(request.claim(&worker, Utc::now()).is_err());

        request.reset_to_pending();
        assert!(request.is_claimable());
        assert!(request.claimed_at.is_none());
        assert!(request.started_at.is_none());
    }

    #[test]
    fn terminal_requests_are_immutable() {
        let mut request = pending(2);
        request
            .apply_counts(ProgressCounts { total: 2, completed: 1, failed: 1 })
            .unwrap();
        request
            .finalize(RequestStatus::Completed, None, Utc::now(), Utc::now() + Duration::hours(1))
            .unwrap();

        assert!(request.expires_at.is_some());
        assert!(request
            .apply_counts(ProgressCounts { total: 2, completed: 2, failed: 0 })
            .is_err());
        assert!(request
            .finalize(RequestStatus::Failed, None, Utc::now(), Utc::now())
            .is_err());
        assert!(!request.cancel("stop", Utc::now(), Utc::now()));
        assert_eq!(request.status, RequestStatus::Completed);
    }

    #[test]
    fn counts_exceeding_total_are_rejected() {
        let mut request = pending(2);
        let err = request
            .apply_counts(ProgressCounts { total: 2, completed: 2, failed: 1 })
            .unwrap_err();
        assert!(matches!(err, DomainError::Invariant(_)));
    }

    #[test]
    fn expiry_only_applies_to_terminal_requests() {
        let mut request = pending(1);
        let now = Utc::now();
        assert!(!request.is_expired(now + Duration::days(365)));

        assert!(request.cancel("stop", now, now + Duration::hours(1)));
        assert_eq!(request.error_message.as_deref(), Some("stop"));
        assert!(!request.is_expired(now));
        assert!(request.is_expired(now + Duration::hours(2)));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::InProgress,
            RequestStatus::Completed,
            RequestStatus::Failed,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
    }
}
