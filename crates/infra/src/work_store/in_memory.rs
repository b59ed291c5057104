//! In-memory work store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docpipe_core::{ItemId, RequestId, TenantId, WorkerId};
use docpipe_generation::{
    GenerationItem, GenerationRequest, ItemStatus, OutputRef, ProgressCounts, RequestStatus,
    TerminalDecision,
};

use super::r#trait::{
    FinalizeOutcome, ItemStatusCounts, NewRequest, RecoveryReport, RequestFilter, WorkStore,
    WorkStoreError,
};

#[derive(Debug, Default)]
struct State {
    requests: HashMap<RequestId, GenerationRequest>,
    /// Items per request, kept in sequence order.
    items: HashMap<RequestId, Vec<GenerationItem>>,
}

impl State {
    fn request(&self, request_id: RequestId) -> Result<&GenerationRequest, WorkStoreError> {
        self.requests
            .get(&request_id)
            .ok_or(WorkStoreError::RequestNotFound(request_id))
    }

    fn tenant_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<&GenerationRequest, WorkStoreError> {
        match self.requests.get(&request_id) {
            Some(request) if request.tenant_id == tenant_id => Ok(request),
            _ => Err(WorkStoreError::RequestNotFound(request_id)),
        }
    }

    fn item_mut(&mut self, request_id: RequestId, item_id: ItemId) -> Option<&mut GenerationItem> {
        self.items
            .get_mut(&request_id)?
            .iter_mut()
            .find(|item| item.id == item_id)
    }

    fn reset_in_progress_items(&mut self, request_id: RequestId) -> usize {
        let Some(items) = self.items.get_mut(&request_id) else {
            return 0;
        };
        let mut reset = 0;
        for item in items.iter_mut().filter(|i| i.status == ItemStatus::InProgress) {
            item.reset_to_pending();
            reset += 1;
        }
        reset
    }
}

/// In-memory work store.
///
/// One lock guards requests and items together, so every operation observes and
/// mutates a consistent snapshot, which is what the Postgres row locks give the
/// persistent store.
#[derive(Debug, Default)]
pub struct InMemoryWorkStore {
    state: RwLock<State>,
}

impl InMemoryWorkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, WorkStoreError> {
        self.state
            .read()
            .map_err(|_| WorkStoreError::Storage("work store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, WorkStoreError> {
        self.state
            .write()
            .map_err(|_| WorkStoreError::Storage("work store lock poisoned".to_string()))
    }
}

#[async_trait]
impl WorkStore for InMemoryWorkStore {
    async fn insert_request(&self, new: NewRequest) -> Result<GenerationRequest, WorkStoreError> {
        new.validate()?;
        let mut state = self.write()?;
        let request_id = new.request.id;
        if state.requests.contains_key(&request_id) {
            return Err(WorkStoreError::Conflict(format!(
                "request {request_id} already exists"
            )));
        }
        state.requests.insert(request_id, new.request.clone());
        state.items.insert(request_id, new.items);
        Ok(new.request)
    }

    async fn get_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Option<GenerationRequest>, WorkStoreError> {
        let state = self.read()?;
        Ok(state
            .requests
            .get(&request_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn load_request(&self, request_id: RequestId) -> Result<Option<GenerationRequest>, WorkStoreError> {
        Ok(self.read()?.requests.get(&request_id).cloned())
    }

    async fn list_requests(
        &self,
        tenant_id: TenantId,
        filter: RequestFilter,
    ) -> Result<Vec<GenerationRequest>, WorkStoreError> {
        let state = self.read()?;
        let mut result: Vec<_> = state
            .requests
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && filter.status.is_none_or(|s| r.status == s)
                    && filter.batch_id.is_none_or(|b| r.batch_id == Some(b))
            })
            .cloned()
            .collect();

        result.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        result.truncate(filter.limit);
        Ok(result)
    }

    async fn list_items(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Vec<GenerationItem>, WorkStoreError> {
        let state = self.read()?;
        state.tenant_request(tenant_id, request_id)?;
        Ok(state.items.get(&request_id).cloned().unwrap_or_default())
    }

    async fn item_status_counts(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<ItemStatusCounts, WorkStoreError> {
        let state = self.read()?;
        state.tenant_request(tenant_id, request_id)?;
        let mut counts = ItemStatusCounts::default();
        for item in state.items.get(&request_id).into_iter().flatten() {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InProgress => counts.in_progress += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<GenerationRequest>, WorkStoreError> {
        let mut state = self.write()?;

        // Oldest first; the id breaks ties between requests created in the same instant.
        let next = state
            .requests
            .values()
            .filter(|r| r.is_claimable())
            .min_by_key(|r| (r.created_at, r.id))
            .map(|r| r.id);

        let Some(request_id) = next else {
            return Ok(None);
        };
        let Some(request) = state.requests.get_mut(&request_id) else {
            return Ok(None);
        };
        request.claim(worker, now)?;
        Ok(Some(request.clone()))
    }

    async fn pending_items(
        &self,
        request_id: RequestId,
        limit: usize,
    ) -> Result<Vec<GenerationItem>, WorkStoreError> {
        let state = self.read()?;
        Ok(state
            .items
            .get(&request_id)
            .into_iter()
            .flatten()
            .filter(|i| i.status == ItemStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn start_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let mut state = self.write()?;
        let claimed = state
            .requests
            .get(&request_id)
            .is_some_and(|r| r.status == RequestStatus::InProgress);
        if !claimed {
            return Ok(false);
        }
        Ok(state
            .item_mut(request_id, item_id)
            .is_some_and(|item| item.start(now).is_ok()))
    }

    async fn complete_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        output_ref: OutputRef,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let mut state = self.write()?;
        Ok(state
            .item_mut(request_id, item_id)
            .is_some_and(|item| item.complete(output_ref, now).is_ok()))
    }

    async fn fail_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let mut state = self.write()?;
        Ok(state
            .item_mut(request_id, item_id)
            .is_some_and(|item| item.fail(message, now).is_ok()))
    }

    async fn refresh_counts(&self, request_id: RequestId) -> Result<ProgressCounts, WorkStoreError> {
        let mut state = self.write()?;
        let request = state.request(request_id)?;
        if request.is_terminal() {
            return Ok(request.counts());
        }

        let counts = ProgressCounts::tally(
            request.total_count,
            state
                .items
                .get(&request_id)
                .into_iter()
                .flatten()
                .map(|i| &i.status),
        )?;

        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(WorkStoreError::RequestNotFound(request_id))?;
        request.apply_counts(counts)?;
        Ok(counts)
    }

    async fn finalize_request(
        &self,
        request_id: RequestId,
        decision: &TerminalDecision,
        owner: Option<&WorkerId>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, WorkStoreError> {
        let mut state = self.write()?;
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(WorkStoreError::RequestNotFound(request_id))?;

        if request.is_terminal() {
            return Ok(FinalizeOutcome::AlreadyTerminal(request.status));
        }
        if let Some(owner) = owner {
            if !request.is_claimed_by(owner) {
                return Ok(FinalizeOutcome::NotOwner);
            }
        }

        request.finalize(decision.status, decision.message.clone(), now, expires_at)?;
        Ok(FinalizeOutcome::Finalized(request.clone()))
    }

    async fn recover_stale(&self, cutoff: DateTime<Utc>) -> Result<RecoveryReport, WorkStoreError> {
        let mut state = self.write()?;
        let stale: Vec<RequestId> = state
            .requests
            .values()
            .filter(|r| {
                r.status == RequestStatus::InProgress && r.claimed_at.is_some_and(|at| at < cutoff)
            })
            .map(|r| r.id)
            .collect();

        let mut report = RecoveryReport::default();
        for request_id in stale {
            if let Some(request) = state.requests.get_mut(&request_id) {
                request.reset_to_pending();
            }
            report.items_reset += state.reset_in_progress_items(request_id);
            report.request_ids.push(request_id);
        }
        report.request_ids.sort();
        Ok(report)
    }

    async fn release_claim(&self, request_id: RequestId, worker: &WorkerId) -> Result<bool, WorkStoreError> {
        let mut state = self.write()?;
        let Some(request) = state.requests.get_mut(&request_id) else {
            return Ok(false);
        };
        if !request.is_claimed_by(worker) {
            return Ok(false);
        }
        request.reset_to_pending();
        state.reset_in_progress_items(request_id);
        Ok(true)
    }

    async fn cancel_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        message: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let mut state = self.write()?;
        match state.requests.get_mut(&request_id) {
            Some(request) if request.tenant_id == tenant_id => {
                Ok(request.cancel(message, now, expires_at))
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, WorkStoreError> {
        let mut state = self.write()?;
        let expired: Vec<RequestId> = state
            .requests
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id)
            .collect();
        for request_id in &expired {
            state.requests.remove(request_id);
            state.items.remove(request_id);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::new_request;
    use chrono::Duration;

    #[tokio::test]
    async fn insert_and_claim() {
        let store = InMemoryWorkStore::new();
        let tenant = TenantId::new();
        let new = new_request(tenant, 3);
        let request_id = new.request.id;
        store.insert_request(new).await.unwrap();

        let worker = WorkerId::generate("w");
        let claimed = store.claim_next(&worker, Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, request_id);
        assert_eq!(claimed.status, RequestStatus::InProgress);
        assert!(claimed.is_claimed_by(&worker));

        assert!(store.claim_next(&worker, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_oldest_first() {
        let store = InMemoryWorkStore::new();
        let tenant = TenantId::new();
        let mut older = new_request(tenant, 1);
        older.request.created_at = Utc::now() - Duration::minutes(5);
        let newer = new_request(tenant, 1);
        let older_id = older.request.id;

        store.insert_request(newer).await.unwrap();
        store.insert_request(older).await.unwrap();

        let worker = WorkerId::generate("w");
        let claimed = store.claim_next(&worker, Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, older_id);
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let store = InMemoryWorkStore::new();
        let owner = TenantId::new();
        let other = TenantId::new();
        let new = new_request(owner, 2);
        let request_id = new.request.id;
        store.insert_request(new).await.unwrap();

        assert!(store.get_request(other, request_id).await.unwrap().is_none());
        assert!(matches!(
            store.list_items(other, request_id).await,
            Err(WorkStoreError::RequestNotFound(_))
        ));
        let now = Utc::now();
        assert!(!store.cancel_request(other, request_id, "x", now, now).await.unwrap());
        assert_eq!(
            store.get_request(owner, request_id).await.unwrap().unwrap().status,
            RequestStatus::Pending
        );
    }

    #[tokio::test]
    async fn mismatched_item_count_is_rejected() {
        let store = InMemoryWorkStore::new();
        let mut new = new_request(TenantId::new(), 3);
        new.items.pop();
        assert!(matches!(
            store.insert_request(new).await,
            Err(WorkStoreError::Domain(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_claimers_get_exactly_one_winner() {
        let store = InMemoryWorkStore::arc();
        store.insert_request(new_request(TenantId::new(), 1)).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let worker = WorkerId::generate(&format!("w{n}"));
                store.claim_next(&worker, Utc::now()).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn item_transitions_are_conditional() {
        let store = InMemoryWorkStore::new();
        let new = new_request(TenantId::new(), 2);
        let request_id = new.request.id;
        let item_id = new.items[0].id;
        store.insert_request(new).await.unwrap();
        let now = Utc::now();

        // Request not claimed yet: items may not start.
        assert!(!store.start_item(request_id, item_id, now).await.unwrap());

        let worker = WorkerId::generate("w");
        store.claim_next(&worker, now).await.unwrap();
        assert!(store.start_item(request_id, item_id, now).await.unwrap());
        assert!(!store.start_item(request_id, item_id, now).await.unwrap());
        assert!(store.complete_item(request_id, item_id, OutputRef::new(), now).await.unwrap());
        assert!(!store.fail_item(request_id, item_id, "late", now).await.unwrap());

        let counts = store.refresh_counts(request_id).await.unwrap();
        assert_eq!(counts, ProgressCounts { total: 2, completed: 1, failed: 0 });
        assert_eq!(store.pending_items(request_id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_resets_stale_claims_once() {
        let store = InMemoryWorkStore::new();
        let new = new_request(TenantId::new(), 2);
        let request_id = new.request.id;
        let item_id = new.items[0].id;
        store.insert_request(new).await.unwrap();

        let claimed_at = Utc::now() - Duration::minutes(30);
        let crashed = WorkerId::generate("crashed");
        store.claim_next(&crashed, claimed_at).await.unwrap();
        store.start_item(request_id, item_id, claimed_at).await.unwrap();

        let cutoff = Utc::now() - Duration::minutes(10);
        let report = store.recover_stale(cutoff).await.unwrap();
        assert_eq!(report.request_ids, vec![request_id]);
        assert_eq!(report.items_reset, 1);

        // A second pass finds nothing.
        assert!(store.recover_stale(cutoff).await.unwrap().is_empty());

        let request = store.load_request(request_id).await.unwrap().unwrap();
        assert!(request.is_claimable());
        assert_eq!(store.pending_items(request_id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fresh_claims_are_not_recovered() {
        let store = InMemoryWorkStore::new();
        store.insert_request(new_request(TenantId::new(), 1)).await.unwrap();
        store.claim_next(&WorkerId::generate("w"), Utc::now()).await.unwrap();

        let report = store.recover_stale(Utc::now() - Duration::minutes(10)).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn first_terminal_decision_wins() {
        let store = InMemoryWorkStore::new();
        let new = new_request(TenantId::new(), 1);
        let request_id = new.request.id;
        store.insert_request(new).await.unwrap();
        let worker = WorkerId::generate("w");
        let now = Utc::now();
        store.claim_next(&worker, now).await.unwrap();

        let completed = TerminalDecision { status: RequestStatus::Completed, message: None };
        let failed = TerminalDecision {
            status: RequestStatus::Failed,
            message: Some("late".to_string()),
        };

        let first = store
            .finalize_request(request_id, &completed, Some(&worker), now, now)
            .await
            .unwrap();
        assert!(matches!(first, FinalizeOutcome::Finalized(ref r) if r.status == RequestStatus::Completed));

        let second = store
            .finalize_request(request_id, &failed, None, now, now)
            .await
            .unwrap();
        assert_eq!(second, FinalizeOutcome::AlreadyTerminal(RequestStatus::Completed));
    }

    #[tokio::test]
    async fn finalize_requires_current_owner() {
        let store = InMemoryWorkStore::new();
        let new = new_request(TenantId::new(), 1);
        let request_id = new.request.id;
        store.insert_request(new).await.unwrap();
        let now = Utc::now();
        store.claim_next(&WorkerId::generate("a"), now).await.unwrap();

        let decision = TerminalDecision { status: RequestStatus::Completed, message: None };
        let outcome = store
            .finalize_request(request_id, &decision, Some(&WorkerId::generate("b")), now, now)
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::NotOwner);
    }

    #[tokio::test]
    async fn release_returns_claim_to_pool() {
        let store = InMemoryWorkStore::new();
        let new = new_request(TenantId::new(), 1);
        let request_id = new.request.id;
        store.insert_request(new).await.unwrap();
        let worker = WorkerId::generate("w");
        store.claim_next(&worker, Utc::now()).await.unwrap();

        assert!(!store.release_claim(request_id, &WorkerId::generate("x")).await.unwrap());
        assert!(store.release_claim(request_id, &worker).await.unwrap());
        assert!(store.load_request(request_id).await.unwrap().unwrap().is_claimable());
    }

    #[tokio::test]
    async fn expired_requests_are_deleted_with_items() {
        let store = InMemoryWorkStore::new();
        let tenant = TenantId::new();
        let new = new_request(tenant, 2);
        let request_id = new.request.id;
        store.insert_request(new).await.unwrap();
        store.insert_request(new_request(tenant, 1)).await.unwrap();

        let now = Utc::now();
        assert!(store
            .cancel_request(tenant, request_id, "stop", now, now + Duration::hours(1))
            .await
            .unwrap());

        assert_eq!(store.delete_expired(now).await.unwrap(), 0);
        assert_eq!(store.delete_expired(now + Duration::hours(2)).await.unwrap(), 1);
        assert!(store.load_request(request_id).await.unwrap().is_none());
        assert_eq!(
            store.list_requests(tenant, RequestFilter::default()).await.unwrap().len(),
            1
        );
    }
}
