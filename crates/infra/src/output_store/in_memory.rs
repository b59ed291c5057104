use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docpipe_core::{ItemId, TenantId};
use docpipe_generation::OutputRef;

use super::{OutputStore, OutputStoreError, StoredOutput};

/// In-memory output store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOutputStore {
    outputs: RwLock<HashMap<OutputRef, StoredOutput>>,
}

impl InMemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.outputs.read().map(|o| o.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> OutputStoreError {
    OutputStoreError::Storage("output store lock poisoned".to_string())
}

#[async_trait]
impl OutputStore for InMemoryOutputStore {
    async fn put(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        filename: Option<&str>,
        content: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<OutputRef, OutputStoreError> {
        let output_ref = OutputRef::new();
        let stored = StoredOutput {
            output_ref,
            tenant_id,
            item_id,
            filename: filename.map(str::to_owned),
            content,
            created_at: now,
        };
        self.outputs.write().map_err(|_| poisoned())?.insert(output_ref, stored);
        Ok(output_ref)
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        output_ref: OutputRef,
    ) -> Result<Option<StoredOutput>, OutputStoreError> {
        let outputs = self.outputs.read().map_err(|_| poisoned())?;
        Ok(outputs
            .get(&output_ref)
            .filter(|o| o.tenant_id == tenant_id)
            .cloned())
    }

    async fn delete(&self, tenant_id: TenantId, output_ref: OutputRef) -> Result<bool, OutputStoreError> {
        let mut outputs = self.outputs.write().map_err(|_| poisoned())?;
        match outputs.get(&output_ref) {
            Some(o) if o.tenant_id == tenant_id => {
                outputs.remove(&output_ref);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, OutputStoreError> {
        let mut outputs = self.outputs.write().map_err(|_| poisoned())?;
        let before = outputs.len();
        outputs.retain(|_, o| o.created_at >= cutoff);
        Ok(before - outputs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn outputs_are_tenant_scoped() {
        let store = InMemoryOutputStore::new();
        let owner = TenantId::new();
        let output = store
            .put(owner, ItemId::new(), Some("a.pdf"), b"pdf".to_vec(), Utc::now())
            .await
            .unwrap();

        assert!(store.get(TenantId::new(), output).await.unwrap().is_none());
        assert!(!store.delete(TenantId::new(), output).await.unwrap());
        assert_eq!(store.get(owner, output).await.unwrap().unwrap().content, b"pdf");
        assert!(store.delete(owner, output).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sweeps_only_old_outputs() {
        let store = InMemoryOutputStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();
        store
            .put(tenant, ItemId::new(), None, vec![1], now - Duration::days(10))
            .await
            .unwrap();
        store.put(tenant, ItemId::new(), None, vec![2], now).await.unwrap();

        assert_eq!(store.delete_older_than(now - Duration::days(7)).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
