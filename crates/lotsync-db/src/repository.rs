//! Inventory repository for PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lotsync_core::cursor::Cursor;
use lotsync_core::error::AppError;
use lotsync_core::models::{DatabaseStats, InventoryRecord, NewInventoryRecord, SortSpec};
use lotsync_core::query::InventoryFilter;
use lotsync_core::traits::InventoryStore;
use sqlx::{PgPool, Pool, Postgres};

use crate::query::{self, INVENTORY_COLUMNS};

/// Repository for the mirrored `inventory` table.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use lotsync_db::InventoryRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/lotsync")
///     .await?;
///
/// let repo = InventoryRepository::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InventoryRepository {
    pool: Pool<Postgres>,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Retrieves a record by id.
    pub async fn get(&self, id: &str) -> Result<Option<InventoryRecord>, AppError> {
        let query = format!("SELECT {} FROM inventory WHERE id = $1", INVENTORY_COLUMNS);
        let result = sqlx::query_as::<_, InventoryRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(result)
    }
}

#[async_trait]
impl InventoryStore for InventoryRepository {
    async fn get_hashes(&self, ids: &[String]) -> Result<HashMap<String, Option<String>>, AppError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<HashRow> = sqlx::query_as(
            r#"
            SELECT id, content_hash
            FROM inventory
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, row.content_hash))
            .collect())
    }

    /// Inserts or updates a record keyed by id.
    ///
    /// Rows whose stored hash equals the incoming one are left untouched, so
    /// replaying a page changes nothing, not even `last_synced_at`.
    /// `first_seen_at` is set on insert only; `created_at` keeps its stored
    /// value when upstream sends none.
    async fn upsert(&self, record: &NewInventoryRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO inventory (
                id,
                make,
                model,
                year,
                fuel,
                transmission,
                color,
                price_cents,
                mileage,
                rank_score,
                created_at,
                attributes,
                content_hash,
                first_seen_at,
                last_synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, COALESCE($11, NOW()), $12, $13, NOW(), NOW())
            ON CONFLICT (id)
            DO UPDATE SET
                make = EXCLUDED.make,
                model = EXCLUDED.model,
                year = EXCLUDED.year,
                fuel = EXCLUDED.fuel,
                transmission = EXCLUDED.transmission,
                color = EXCLUDED.color,
                price_cents = EXCLUDED.price_cents,
                mileage = EXCLUDED.mileage,
                rank_score = EXCLUDED.rank_score,
                created_at = COALESCE($11, inventory.created_at),
                attributes = EXCLUDED.attributes,
                content_hash = EXCLUDED.content_hash,
                last_synced_at = NOW()
            WHERE inventory.content_hash IS DISTINCT FROM EXCLUDED.content_hash
            "#,
        )
        .bind(&record.id)
        .bind(&record.make)
        .bind(&record.model)
        .bind(record.year)
        .bind(&record.fuel)
        .bind(&record.transmission)
        .bind(&record.color)
        .bind(record.price_cents)
        .bind(record.mileage)
        .bind(record.rank_score)
        .bind(record.created_at)
        .bind(&record.attributes)
        .bind(&record.content_hash)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(())
    }

    async fn count(&self, filter: &InventoryFilter) -> Result<u64, AppError> {
        let total: i64 = query::count(filter)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(total.max(0) as u64)
    }

    async fn fetch_after(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        let mut qb = query::page_after(filter, sort, after, limit);
        let rows = qb
            .build_query_as::<InventoryRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows)
    }

    async fn fetch_offset(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        let mut qb = query::page_at_offset(filter, sort, offset, limit);
        let rows = qb
            .build_query_as::<InventoryRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(rows)
    }

    /// Returns aggregated mirror statistics.
    async fn stats(&self) -> Result<DatabaseStats, AppError> {
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(DISTINCT make) as makes,
                MAX(last_synced_at) as last_synced
            FROM inventory
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(DatabaseStats {
            total_records: row.total.unwrap_or(0),
            distinct_makes: row.makes.unwrap_or(0),
            last_synced_at: row.last_synced,
        })
    }
}

/// Helper struct for deserializing stats query results
#[derive(sqlx::FromRow)]
struct StatsRow {
    total: Option<i64>,
    makes: Option<i64>,
    last_synced: Option<DateTime<Utc>>,
}

/// Helper struct for deserializing hash lookup query results
#[derive(sqlx::FromRow)]
struct HashRow {
    id: String,
    content_hash: Option<String>,
}
