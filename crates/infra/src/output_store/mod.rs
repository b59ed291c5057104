//! Storage for rendered documents.
//!
//! Outputs are addressed by `OutputRef` and retained on their own clock, so a
//! document can outlive the request that produced it (or be swept first).

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use docpipe_core::{ItemId, TenantId};
use docpipe_generation::OutputRef;

pub use in_memory::InMemoryOutputStore;
pub use postgres::PostgresOutputStore;

#[derive(Debug, Clone, Error)]
pub enum OutputStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutput {
    pub output_ref: OutputRef,
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub filename: Option<String>,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn put(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        filename: Option<&str>,
        content: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<OutputRef, OutputStoreError>;

    /// Tenant-scoped fetch; other tenants' outputs read as absent.
    async fn get(
        &self,
        tenant_id: TenantId,
        output_ref: OutputRef,
    ) -> Result<Option<StoredOutput>, OutputStoreError>;

    async fn delete(&self, tenant_id: TenantId, output_ref: OutputRef) -> Result<bool, OutputStoreError>;

    /// Drop every output created before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, OutputStoreError>;
}
