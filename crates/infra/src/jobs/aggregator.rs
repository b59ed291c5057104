//! Completion Aggregator.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use docpipe_core::{RequestId, WorkerId};
use docpipe_generation::derive_terminal_status;

use crate::config::instant_after;
use crate::work_store::{FinalizeOutcome, WorkStore, WorkStoreError};

/// Turns item outcome counts into a request's terminal status.
///
/// Safe to call more than once for the same request: the first terminal
/// decision stands and later calls report `AlreadyTerminal` without writing.
#[derive(Clone)]
pub struct CompletionAggregator {
    store: Arc<dyn WorkStore>,
    retention: chrono::Duration,
}

impl CompletionAggregator {
    pub fn new(store: Arc<dyn WorkStore>, retention: chrono::Duration) -> Self {
        Self { store, retention }
    }

    /// Refresh the counters from item statuses and apply the derived status.
    ///
    /// `interrupted` marks a run that was stopped externally. With `owner`
    /// set, the decision only applies while that worker still holds the claim.
    #[instrument(skip(self, owner), fields(request_id = %request_id), err)]
    pub async fn finalize(
        &self,
        request_id: RequestId,
        interrupted: bool,
        owner: Option<&WorkerId>,
    ) -> Result<FinalizeOutcome, WorkStoreError> {
        let counts = self.store.refresh_counts(request_id).await?;
        let decision = derive_terminal_status(counts, interrupted);
        let now = Utc::now();
        let outcome = self
            .store
            .finalize_request(request_id, &decision, owner, now, instant_after(now, self.retention))
            .await?;

        match &outcome {
            FinalizeOutcome::Finalized(request) => info!(
                status = %request.status,
                completed = request.completed_count,
                failed = request.failed_count,
                total = request.total_count,
                "request finalized"
            ),
            FinalizeOutcome::AlreadyTerminal(status) => {
                info!(status = %status, "request already terminal, decision kept")
            }
            FinalizeOutcome::NotOwner => info!("claim no longer held, not finalizing"),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::new_request;
    use crate::work_store::InMemoryWorkStore;
    use chrono::Duration;
    use docpipe_core::TenantId;
    use docpipe_generation::{OutputRef, RequestStatus};

    async fn claimed_with_outcomes(outcomes: &[bool]) -> (Arc<InMemoryWorkStore>, RequestId, WorkerId) {
        let store = InMemoryWorkStore::arc();
        let new = new_request(TenantId::new(), outcomes.len());
        let request_id = new.request.id;
        let item_ids: Vec<_> = new.items.iter().map(|i| i.id).collect();
        store.insert_request(new).await.unwrap();

        let worker = WorkerId::generate("w");
        let now = Utc::now();
        store.claim_next(&worker, now).await.unwrap();
        for (item_id, ok) in item_ids.into_iter().zip(outcomes) {
            store.start_item(request_id, item_id, now).await.unwrap();
            if *ok {
                store.complete_item(request_id, item_id, OutputRef::new(), now).await.unwrap();
            } else {
                store.fail_item(request_id, item_id, "boom", now).await.unwrap();
            }
        }
        (store, request_id, worker)
    }

    fn finalized_status(outcome: &FinalizeOutcome) -> RequestStatus {
        match outcome {
            FinalizeOutcome::Finalized(r) => r.status,
            other => panic!("expected Finalized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_success_completes_with_expiry() {
        let (store, request_id, worker) = claimed_with_outcomes(&[true, false, true]).await;
        let aggregator = CompletionAggregator::new(store.clone(), Duration::hours(1));

        let outcome = aggregator.finalize(request_id, false, Some(&worker)).await.unwrap();
        assert_eq!(finalized_status(&outcome), RequestStatus::Completed);

        let request = store.load_request(request_id).await.unwrap().unwrap();
        assert_eq!((request.completed_count, request.failed_count), (2, 1));
        let completed_at = request.completed_at.unwrap();
        assert_eq!(request.expires_at, Some(completed_at + Duration::hours(1)));
    }

    #[tokio::test]
    async fn all_failed_is_failed() {
        let (store, request_id, worker) = claimed_with_outcomes(&[false, false]).await;
        let aggregator = CompletionAggregator::new(store.clone(), Duration::hours(1));

        let outcome = aggregator.finalize(request_id, false, Some(&worker)).await.unwrap();
        assert_eq!(finalized_status(&outcome), RequestStatus::Failed);
        let request = store.load_request(request_id).await.unwrap().unwrap();
        assert_eq!(request.error_message.as_deref(), Some("all 2 items failed"));
    }

    #[tokio::test]
    async fn second_finalize_keeps_first_decision() {
        let (store, request_id, worker) = claimed_with_outcomes(&[true]).await;
        let aggregator = CompletionAggregator::new(store.clone(), Duration::hours(1));

        aggregator.finalize(request_id, false, Some(&worker)).await.unwrap();
        let again = aggregator.finalize(request_id, true, None).await.unwrap();
        assert_eq!(again, FinalizeOutcome::AlreadyTerminal(RequestStatus::Completed));
        assert_eq!(
            store.load_request(request_id).await.unwrap().unwrap().status,
            RequestStatus::Completed
        );
    }

    #[tokio::test]
    async fn interrupted_run_is_cancelled() {
        let (store, request_id, worker) = claimed_with_outcomes(&[true, true]).await;
        let aggregator = CompletionAggregator::new(store.clone(), Duration::hours(1));

        let outcome = aggregator.finalize(request_id, true, Some(&worker)).await.unwrap();
        assert_eq!(finalized_status(&outcome), RequestStatus::Cancelled);
    }
}
