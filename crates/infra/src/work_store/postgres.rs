//! Postgres-backed work store.
//!
//! Every state transition is a single conditional statement (or a short
//! transaction) keyed on the row's current status, so workers in separate
//! processes coordinate through the database alone.
//!
//! ## Claiming
//!
//! `claim_next` selects the oldest pending, unclaimed request with
//! `FOR UPDATE SKIP LOCKED` and flips it to `in_progress` in the same
//! statement. Concurrent claimers skip rows another transaction has locked,
//! so each request has at most one winner and nobody blocks.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | WorkStoreError | Scenario |
//! |------------|----------------------|----------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate request id, sequence or correlation id |
//! | Database (check constraint violation) | `23514` | `Domain` | Counts or routing columns violate a table invariant |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use docpipe_core::{BatchId, DomainError, ItemId, RequestId, TenantId, WorkerId};
use docpipe_generation::{
    bounded_message, GenerationItem, GenerationRequest, OutputRef, ProgressCounts, RequestStatus,
    TerminalDecision, VersionSelector,
};

use super::r#trait::{
    FinalizeOutcome, ItemStatusCounts, NewRequest, RecoveryReport, RequestFilter, WorkStore,
    WorkStoreError,
};

/// Items per multi-row INSERT; 17 binds each stays well under the 65535 bind limit.
const ITEM_INSERT_CHUNK: usize = 1000;

const REQUEST_COLUMNS: &str = "id, tenant_id, kind, status, claimed_by, claimed_at, total_count, \
    completed_count, failed_count, error_message, batch_id, concurrency, created_at, started_at, \
    completed_at, expires_at";

const ITEM_COLUMNS: &str = "id, request_id, tenant_id, sequence, template_ref, variant_ref, \
    version_ref, environment_ref, data, filename, correlation_id, status, error_message, \
    output_ref, created_at, started_at, completed_at";

/// Postgres-backed work store.
#[derive(Debug, Clone)]
pub struct PostgresWorkStore {
    pool: Arc<PgPool>,
}

const SCHEMA: &str = include_str!("../../migrations/0001_generation_pipeline.sql");

impl PostgresWorkStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the pipeline tables and indexes if they do not exist yet.
    ///
    /// Covers `generated_documents` too, so one call prepares the pool for
    /// both this store and `PostgresOutputStore`.
    #[instrument(skip(pool), err)]
    pub async fn apply_schema(pool: &PgPool) -> Result<(), WorkStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        debug!("generation pipeline schema applied");
        Ok(())
    }

    async fn current_state(
        &self,
        request_id: RequestId,
    ) -> Result<Option<(RequestStatus, Option<String>)>, WorkStoreError> {
        let row = sqlx::query("SELECT status, claimed_by FROM generation_requests WHERE id = $1")
            .bind(request_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_state", e))?;

        row.map(|row| -> Result<_, WorkStoreError> {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("current_state", e))?;
            let claimed_by: Option<String> =
                row.try_get("claimed_by").map_err(|e| map_sqlx_error("current_state", e))?;
            Ok((status.parse()?, claimed_by))
        })
        .transpose()
    }

    async fn ensure_tenant_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<(), WorkStoreError> {
        let exists = sqlx::query("SELECT 1 FROM generation_requests WHERE id = $1 AND tenant_id = $2")
            .bind(request_id.as_uuid())
            .bind(tenant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_tenant_request", e))?;
        match exists {
            Some(_) => Ok(()),
            None => Err(WorkStoreError::RequestNotFound(request_id)),
        }
    }
}

#[async_trait]
impl WorkStore for PostgresWorkStore {
    #[instrument(
        skip(self, new),
        fields(
            tenant_id = %new.request.tenant_id,
            request_id = %new.request.id,
            item_count = new.items.len()
        ),
        err
    )]
    async fn insert_request(&self, new: NewRequest) -> Result<GenerationRequest, WorkStoreError> {
        new.validate()?;
        let NewRequest { request, items } = new;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_request", e))?;

        sqlx::query(
            r#"
            INSERT INTO generation_requests (
                id, tenant_id, kind, status, total_count, completed_count, failed_count,
                batch_id, concurrency, created_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, 0, $6, $7, $8)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.tenant_id.as_uuid())
        .bind(request.kind.as_str())
        .bind(request.status.as_str())
        .bind(to_i32(request.total_count)?)
        .bind(request.batch_id.map(Uuid::from))
        .bind(request.concurrency.as_str())
        .bind(request.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_request", e))?;

        for chunk in items.chunks(ITEM_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO generation_items ({ITEM_COLUMNS}) "
            ));
            builder.push_values(chunk, |mut b, item| {
                let (version_ref, environment_ref) = item.version.to_parts();
                b.push_bind(*item.id.as_uuid())
                    .push_bind(*item.request_id.as_uuid())
                    .push_bind(*item.tenant_id.as_uuid())
                    .push_bind(item.sequence as i32)
                    .push_bind(item.template_ref.clone())
                    .push_bind(item.variant_ref.clone())
                    .push_bind(version_ref.map(str::to_owned))
                    .push_bind(environment_ref.map(str::to_owned))
                    .push_bind(item.data.clone())
                    .push_bind(item.filename.clone())
                    .push_bind(item.correlation_id.clone())
                    .push_bind(item.status.as_str())
                    .push_bind(item.error_message.clone())
                    .push_bind(item.output_ref.map(|o| o.0))
                    .push_bind(item.created_at)
                    .push_bind(item.started_at)
                    .push_bind(item.completed_at);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_items", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_request", e))?;

        debug!("request persisted");
        Ok(request)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, request_id = %request_id), err)]
    async fn get_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Option<GenerationRequest>, WorkStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM generation_requests WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(request_id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_request", e))?;

        row.map(|r| request_from_row(&r)).transpose()
    }

    async fn load_request(&self, request_id: RequestId) -> Result<Option<GenerationRequest>, WorkStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM generation_requests WHERE id = $1"
        ))
        .bind(request_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_request", e))?;

        row.map(|r| request_from_row(&r)).transpose()
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn list_requests(
        &self,
        tenant_id: TenantId,
        filter: RequestFilter,
    ) -> Result<Vec<GenerationRequest>, WorkStoreError> {
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM generation_requests
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR batch_id = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.batch_id.map(Uuid::from))
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_requests", e))?;

        rows.iter().map(request_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, request_id = %request_id), err)]
    async fn list_items(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<Vec<GenerationItem>, WorkStoreError> {
        self.ensure_tenant_request(tenant_id, request_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM generation_items WHERE request_id = $1 ORDER BY sequence"
        ))
        .bind(request_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn item_status_counts(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
    ) -> Result<ItemStatusCounts, WorkStoreError> {
        self.ensure_tenant_request(tenant_id, request_id).await?;
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending')     AS pending,
                COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                COUNT(*) FILTER (WHERE status = 'completed')   AS completed,
                COUNT(*) FILTER (WHERE status = 'failed')      AS failed
            FROM generation_items
            WHERE request_id = $1
            "#,
        )
        .bind(request_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("item_status_counts", e))?;

        let get = |column: &str| -> Result<u32, WorkStoreError> {
            let value: i64 = row
                .try_get(column)
                .map_err(|e| map_sqlx_error("item_status_counts", e))?;
            to_u32(value)
        };
        Ok(ItemStatusCounts {
            pending: get("pending")?,
            in_progress: get("in_progress")?,
            completed: get("completed")?,
            failed: get("failed")?,
        })
    }

    #[instrument(skip(self), fields(worker = %worker), err)]
    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<GenerationRequest>, WorkStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE generation_requests r
            SET status = 'in_progress',
                claimed_by = $1,
                claimed_at = $2,
                started_at = $2
            FROM (
                SELECT id
                FROM generation_requests
                WHERE status = 'pending' AND claimed_by IS NULL
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            ) candidate
            WHERE r.id = candidate.id AND r.status = 'pending'
            RETURNING {}
            "#,
            prefixed_request_columns("r")
        ))
        .bind(worker.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.map(|r| request_from_row(&r)).transpose()
    }

    async fn pending_items(
        &self,
        request_id: RequestId,
        limit: usize,
    ) -> Result<Vec<GenerationItem>, WorkStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM generation_items
            WHERE request_id = $1 AND status = 'pending'
            ORDER BY sequence
            LIMIT $2
            "#
        ))
        .bind(request_id.as_uuid())
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn start_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_items
            SET status = 'in_progress', started_at = $3
            WHERE id = $2 AND request_id = $1 AND status = 'pending'
              AND EXISTS (
                  SELECT 1 FROM generation_requests
                  WHERE id = $1 AND status = 'in_progress'
              )
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("start_item", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        output_ref: OutputRef,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_items
            SET status = 'completed', output_ref = $3, error_message = NULL, completed_at = $4
            WHERE id = $2 AND request_id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(output_ref.0)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_item", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_item(
        &self,
        request_id: RequestId,
        item_id: ItemId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_items
            SET status = 'failed', output_ref = NULL, error_message = $3, completed_at = $4
            WHERE id = $2 AND request_id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(bounded_message(message))
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail_item", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(request_id = %request_id), err)]
    async fn refresh_counts(&self, request_id: RequestId) -> Result<ProgressCounts, WorkStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE generation_requests r
            SET completed_count = c.completed, failed_count = c.failed
            FROM (
                SELECT
                    COUNT(*) FILTER (WHERE status = 'completed')::int AS completed,
                    COUNT(*) FILTER (WHERE status = 'failed')::int    AS failed
                FROM generation_items
                WHERE request_id = $1
            ) c
            WHERE r.id = $1 AND r.status IN ('pending', 'in_progress')
            RETURNING r.total_count, r.completed_count, r.failed_count
            "#,
        )
        .bind(request_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("refresh_counts", e))?;

        let row = match updated {
            Some(row) => row,
            // Terminal (frozen counters) or missing.
            None => sqlx::query(
                "SELECT total_count, completed_count, failed_count FROM generation_requests WHERE id = $1",
            )
            .bind(request_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("refresh_counts", e))?
            .ok_or(WorkStoreError::RequestNotFound(request_id))?,
        };

        let get = |column: &str| -> Result<u32, WorkStoreError> {
            let value: i32 = row
                .try_get(column)
                .map_err(|e| map_sqlx_error("refresh_counts", e))?;
            to_u32(i64::from(value))
        };
        let counts = ProgressCounts {
            total: get("total_count")?,
            completed: get("completed_count")?,
            failed: get("failed_count")?,
        };
        counts.validate()?;
        Ok(counts)
    }

    #[instrument(
        skip(self, decision),
        fields(request_id = %request_id, status = %decision.status),
        err
    )]
    async fn finalize_request(
        &self,
        request_id: RequestId,
        decision: &TerminalDecision,
        owner: Option<&WorkerId>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, WorkStoreError> {
        if !decision.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot finalize request with non-terminal status {}",
                decision.status
            ))
            .into());
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE generation_requests
            SET status = $2, error_message = $3, completed_at = $4, expires_at = $5
            WHERE id = $1
              AND status IN ('pending', 'in_progress')
              AND ($6::text IS NULL OR (status = 'in_progress' AND claimed_by = $6))
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request_id.as_uuid())
        .bind(decision.status.as_str())
        .bind(decision.message.as_deref().map(bounded_message))
        .bind(now)
        .bind(expires_at)
        .bind(owner.map(|w| w.as_str()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finalize_request", e))?;

        if let Some(row) = row {
            return Ok(FinalizeOutcome::Finalized(request_from_row(&row)?));
        }

        match self.current_state(request_id).await? {
            None => Err(WorkStoreError::RequestNotFound(request_id)),
            Some((status, _)) if status.is_terminal() => Ok(FinalizeOutcome::AlreadyTerminal(status)),
            Some(_) => Ok(FinalizeOutcome::NotOwner),
        }
    }

    #[instrument(skip(self), err)]
    async fn recover_stale(&self, cutoff: DateTime<Utc>) -> Result<RecoveryReport, WorkStoreError> {
        let row = sqlx::query(
            r#"
            WITH stale AS (
                SELECT id
                FROM generation_requests
                WHERE status = 'in_progress' AND claimed_at < $1
                FOR UPDATE SKIP LOCKED
            ),
            reset_items AS (
                UPDATE generation_items i
                SET status = 'pending', started_at = NULL
                FROM stale
                WHERE i.request_id = stale.id AND i.status = 'in_progress'
                RETURNING i.id
            ),
            reset_requests AS (
                UPDATE generation_requests r
                SET status = 'pending', claimed_by = NULL, claimed_at = NULL, started_at = NULL
                FROM stale
                WHERE r.id = stale.id AND r.status = 'in_progress'
                RETURNING r.id
            )
            SELECT
                (SELECT COUNT(*) FROM reset_items) AS items_reset,
                COALESCE((SELECT array_agg(id ORDER BY id) FROM reset_requests), '{}'::uuid[]) AS request_ids
            "#,
        )
        .bind(cutoff)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recover_stale", e))?;

        let items_reset: i64 = row
            .try_get("items_reset")
            .map_err(|e| map_sqlx_error("recover_stale", e))?;
        let request_ids: Vec<Uuid> = row
            .try_get("request_ids")
            .map_err(|e| map_sqlx_error("recover_stale", e))?;

        Ok(RecoveryReport {
            request_ids: request_ids.into_iter().map(RequestId::from_uuid).collect(),
            items_reset: usize::try_from(items_reset).unwrap_or_default(),
        })
    }

    #[instrument(skip(self), fields(request_id = %request_id, worker = %worker), err)]
    async fn release_claim(&self, request_id: RequestId, worker: &WorkerId) -> Result<bool, WorkStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("release_claim", e))?;

        let released = sqlx::query(
            r#"
            UPDATE generation_requests
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL, started_at = NULL
            WHERE id = $1 AND status = 'in_progress' AND claimed_by = $2
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(worker.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("release_claim", e))?
        .rows_affected()
            == 1;

        if released {
            sqlx::query(
                r#"
                UPDATE generation_items
                SET status = 'pending', started_at = NULL
                WHERE request_id = $1 AND status = 'in_progress'
                "#,
            )
            .bind(request_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("release_claim", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("release_claim", e))?;
        Ok(released)
    }

    #[instrument(skip(self, message), fields(tenant_id = %tenant_id, request_id = %request_id), err)]
    async fn cancel_request(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        message: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, WorkStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_requests
            SET status = 'cancelled', error_message = $3, completed_at = $4, expires_at = $5
            WHERE id = $1 AND tenant_id = $2 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(request_id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(bounded_message(message))
        .bind(now)
        .bind(expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel_request", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, WorkStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM generation_requests
            WHERE status IN ('completed', 'failed', 'cancelled') AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_expired", e))?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

fn prefixed_request_columns(alias: &str) -> String {
    REQUEST_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_i32(value: u32) -> Result<i32, WorkStoreError> {
    i32::try_from(value)
        .map_err(|_| DomainError::validation(format!("count {value} exceeds storage range")).into())
}

fn to_u32(value: i64) -> Result<u32, WorkStoreError> {
    u32::try_from(value)
        .map_err(|_| DomainError::invariant(format!("stored count {value} is out of range")).into())
}

/// Map SQLx errors to `WorkStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> WorkStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => WorkStoreError::Conflict(msg),
                Some("23514") => WorkStoreError::Domain(DomainError::invariant(msg)),
                _ => WorkStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            WorkStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => WorkStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Database row representation of a generation request.
struct RequestRow {
    id: Uuid,
    tenant_id: Uuid,
    kind: String,
    status: String,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    total_count: i32,
    completed_count: i32,
    failed_count: i32,
    error_message: Option<String>,
    batch_id: Option<Uuid>,
    concurrency: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for RequestRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RequestRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            claimed_by: row.try_get("claimed_by")?,
            claimed_at: row.try_get("claimed_at")?,
            total_count: row.try_get("total_count")?,
            completed_count: row.try_get("completed_count")?,
            failed_count: row.try_get("failed_count")?,
            error_message: row.try_get("error_message")?,
            batch_id: row.try_get("batch_id")?,
            concurrency: row.try_get("concurrency")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<RequestRow> for GenerationRequest {
    type Error = WorkStoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(GenerationRequest {
            id: RequestId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            claimed_by: row.claimed_by.map(WorkerId::new).transpose()?,
            claimed_at: row.claimed_at,
            total_count: to_u32(i64::from(row.total_count))?,
            completed_count: to_u32(i64::from(row.completed_count))?,
            failed_count: to_u32(i64::from(row.failed_count))?,
            error_message: row.error_message,
            batch_id: row.batch_id.map(BatchId::from_uuid),
            concurrency: row.concurrency.parse()?,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
        })
    }
}

fn request_from_row(row: &PgRow) -> Result<GenerationRequest, WorkStoreError> {
    RequestRow::from_row(row)
        .map_err(|e| WorkStoreError::Storage(format!("failed to decode request row: {e}")))?
        .try_into()
}

/// Database row representation of a generation item.
struct ItemRow {
    id: Uuid,
    request_id: Uuid,
    tenant_id: Uuid,
    sequence: i32,
    template_ref: String,
    variant_ref: String,
    version_ref: Option<String>,
    environment_ref: Option<String>,
    data: serde_json::Value,
    filename: Option<String>,
    correlation_id: Option<String>,
    status: String,
    error_message: Option<String>,
    output_ref: Option<Uuid>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            tenant_id: row.try_get("tenant_id")?,
            sequence: row.try_get("sequence")?,
            template_ref: row.try_get("template_ref")?,
            variant_ref: row.try_get("variant_ref")?,
            version_ref: row.try_get("version_ref")?,
            environment_ref: row.try_get("environment_ref")?,
            data: row.try_get("data")?,
            filename: row.try_get("filename")?,
            correlation_id: row.try_get("correlation_id")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            output_ref: row.try_get("output_ref")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TryFrom<ItemRow> for GenerationItem {
    type Error = WorkStoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let item = GenerationItem {
            id: ItemId::from_uuid(row.id),
            request_id: RequestId::from_uuid(row.request_id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            sequence: to_u32(i64::from(row.sequence))?,
            template_ref: row.template_ref,
            variant_ref: row.variant_ref,
            version: VersionSelector::from_parts(row.version_ref, row.environment_ref)?,
            data: row.data,
            filename: row.filename,
            correlation_id: row.correlation_id,
            status: row.status.parse()?,
            error_message: row.error_message,
            output_ref: row.output_ref.map(OutputRef),
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        };
        item.check_invariants()?;
        Ok(item)
    }
}

fn item_from_row(row: &PgRow) -> Result<GenerationItem, WorkStoreError> {
    ItemRow::from_row(row)
        .map_err(|e| WorkStoreError::Storage(format!("failed to decode item row: {e}")))?
        .try_into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_columns_are_alias_qualified() {
        let columns = prefixed_request_columns("r");
        assert!(columns.starts_with("r.id, r.tenant_id"));
        assert!(columns.ends_with("r.expires_at"));
        assert!(!columns.contains("r. "));
    }

    #[test]
    fn out_of_range_counts_are_rejected() {
        assert!(to_u32(-1).is_err());
        assert_eq!(to_u32(7).unwrap(), 7);
        assert!(to_i32(u32::MAX).is_err());
    }
}
