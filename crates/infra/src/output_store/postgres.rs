//! Postgres-backed output store (`generated_documents` table).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use docpipe_core::{ItemId, TenantId};
use docpipe_generation::OutputRef;

use super::{OutputStore, OutputStoreError, StoredOutput};

#[derive(Debug, Clone)]
pub struct PostgresOutputStore {
    pool: Arc<PgPool>,
}

impl PostgresOutputStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl OutputStore for PostgresOutputStore {
    #[instrument(skip(self, content), fields(tenant_id = %tenant_id, item_id = %item_id, size = content.len()), err)]
    async fn put(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        filename: Option<&str>,
        content: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<OutputRef, OutputStoreError> {
        let output_ref = OutputRef::new();
        let size = i64::try_from(content.len())
            .map_err(|_| OutputStoreError::Storage("output too large to record".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO generated_documents (id, tenant_id, item_id, filename, content, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(output_ref.0)
        .bind(tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(filename)
        .bind(content)
        .bind(size)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put", e))?;

        Ok(output_ref)
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        output_ref: OutputRef,
    ) -> Result<Option<StoredOutput>, OutputStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, item_id, filename, content, created_at
            FROM generated_documents
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(output_ref.0)
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e| map_sqlx_error("get", e);
        Ok(Some(StoredOutput {
            output_ref: OutputRef(row.try_get::<Uuid, _>("id").map_err(decode)?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
            item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode)?),
            filename: row.try_get("filename").map_err(decode)?,
            content: row.try_get("content").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
        }))
    }

    async fn delete(&self, tenant_id: TenantId, output_ref: OutputRef) -> Result<bool, OutputStoreError> {
        let result = sqlx::query("DELETE FROM generated_documents WHERE id = $1 AND tenant_id = $2")
            .bind(output_ref.0)
            .bind(tenant_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, OutputStoreError> {
        let result = sqlx::query("DELETE FROM generated_documents WHERE created_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_older_than", e))?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutputStoreError {
    match err {
        sqlx::Error::Database(db_err) => OutputStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            OutputStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => OutputStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
