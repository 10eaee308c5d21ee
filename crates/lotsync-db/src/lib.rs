//! Lotsync DB - PostgreSQL persistence for the inventory mirror.
//!
//! - [`InventoryRepository`] stores upserted records and serves filtered,
//!   sorted, keyset or offset paged reads.
//! - [`SyncStatusRepository`] keeps the single progress row per sync target.
//!
//! The schema lives in `migrations/` and is applied with [`migrate`].

mod query;
pub mod repository;
pub mod status;

use lotsync_core::error::AppError;
use sqlx::PgPool;

pub use repository::InventoryRepository;
pub use status::SyncStatusRepository;

/// Applies pending schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    tracing::info!("Database schema is up to date");
    Ok(())
}
