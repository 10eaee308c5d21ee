//! Persistence of the per-target sync status row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lotsync_core::error::AppError;
use lotsync_core::sync::SyncStatus;
use lotsync_core::traits::SyncStatusStore;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

#[derive(Clone)]
pub struct SyncStatusRepository {
    pool: Pool<Postgres>,
}

impl SyncStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStatusStore for SyncStatusRepository {
    async fn load_status(&self, id: &str) -> Result<Option<SyncStatus>, AppError> {
        let row: Option<SyncStatusRow> = sqlx::query_as(
            r#"
            SELECT id, run_id, status, current_page, records_processed, error_count,
                   total_pages, total_records, error_message, started_at, completed_at,
                   last_activity_at
            FROM sync_status
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        row.map(SyncStatus::try_from).transpose()
    }

    async fn save_status(&self, status: &SyncStatus) -> Result<(), AppError> {
        self.write(status, UPSERT_STATUS).await?;
        Ok(())
    }

    async fn claim_running(&self, status: &SyncStatus) -> Result<bool, AppError> {
        let affected = self.write(status, &claim_sql()).await?;
        Ok(affected == 1)
    }
}

impl SyncStatusRepository {
    /// Binds every column of `status` to `query`; returns the affected row count.
    async fn write(&self, status: &SyncStatus, query: &str) -> Result<u64, AppError> {
        let row = SyncStatusRow::try_from(status)?;

        let result = sqlx::query(query)
            .bind(&row.id)
            .bind(row.run_id)
            .bind(&row.status)
            .bind(row.current_page)
            .bind(row.records_processed)
            .bind(row.error_count)
            .bind(row.total_pages)
            .bind(row.total_records)
            .bind(&row.error_message)
            .bind(row.started_at)
            .bind(row.completed_at)
            .bind(row.last_activity_at)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected())
    }
}

const UPSERT_STATUS: &str = r#"
    INSERT INTO sync_status (
        id, run_id, status, current_page, records_processed, error_count,
        total_pages, total_records, error_message, started_at, completed_at,
        last_activity_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    ON CONFLICT (id)
    DO UPDATE SET
        run_id = EXCLUDED.run_id,
        status = EXCLUDED.status,
        current_page = EXCLUDED.current_page,
        records_processed = EXCLUDED.records_processed,
        error_count = EXCLUDED.error_count,
        total_pages = EXCLUDED.total_pages,
        total_records = EXCLUDED.total_records,
        error_message = EXCLUDED.error_message,
        started_at = EXCLUDED.started_at,
        completed_at = EXCLUDED.completed_at,
        last_activity_at = EXCLUDED.last_activity_at"#;

// A conflicting row that is already running is left as is and counts as 0 affected rows.
fn claim_sql() -> String {
    format!("{} WHERE sync_status.status <> 'running'", UPSERT_STATUS)
}

/// Column-typed mirror of [`SyncStatus`].
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
struct SyncStatusRow {
    id: String,
    run_id: Option<Uuid>,
    status: String,
    current_page: i32,
    records_processed: i64,
    error_count: i64,
    total_pages: Option<i32>,
    total_records: Option<i64>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
}

fn column<T, U>(value: T, name: &str) -> Result<U, AppError>
where
    T: Copy + std::fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value)
        .map_err(|_| AppError::Generic(format!("sync_status.{} out of range: {}", name, value)))
}

impl TryFrom<SyncStatusRow> for SyncStatus {
    type Error = AppError;

    fn try_from(row: SyncStatusRow) -> Result<Self, Self::Error> {
        Ok(SyncStatus {
            id: row.id,
            run_id: row.run_id,
            status: row.status.parse()?,
            current_page: column(row.current_page, "current_page")?,
            records_processed: column(row.records_processed, "records_processed")?,
            error_count: column(row.error_count, "error_count")?,
            total_pages: row
                .total_pages
                .map(|v| column(v, "total_pages"))
                .transpose()?,
            total_records: row
                .total_records
                .map(|v| column(v, "total_records"))
                .transpose()?,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_activity_at: row.last_activity_at,
        })
    }
}

impl TryFrom<&SyncStatus> for SyncStatusRow {
    type Error = AppError;

    fn try_from(status: &SyncStatus) -> Result<Self, Self::Error> {
        Ok(SyncStatusRow {
            id: status.id.clone(),
            run_id: status.run_id,
            status: status.status.as_str().to_string(),
            current_page: column(status.current_page, "current_page")?,
            records_processed: column(status.records_processed, "records_processed")?,
            error_count: column(status.error_count, "error_count")?,
            total_pages: status
                .total_pages
                .map(|v| column(v, "total_pages"))
                .transpose()?,
            total_records: status
                .total_records
                .map(|v| column(v, "total_records"))
                .transpose()?,
            error_message: status.error_message.clone(),
            started_at: status.started_at,
            completed_at: status.completed_at,
            last_activity_at: status.last_activity_at,
        })
    }
}
