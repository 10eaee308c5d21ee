//! Seams between the sync/query logic and its I/O.
//!
//! - [`InventorySource`] - the upstream paginated API (e.g. `lotsync_client::InventoryClient`)
//! - [`InventoryStore`] - the mirrored table (e.g. `lotsync_db::InventoryRepository`)
//! - [`SyncStatusStore`] - the status row of a sync target
//! - [`CheckpointStore`] - the checkpoint document of a sync target

use std::collections::HashMap;

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::cursor::Cursor;
use crate::error::{AppError, FetchError};
use crate::models::{DatabaseStats, InventoryRecord, NewInventoryRecord, SortSpec, SourcePage};
use crate::query::InventoryFilter;
use crate::sync::SyncStatus;

#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Cheap request proving the endpoint exists and answers.
    async fn probe(&self) -> Result<(), FetchError>;

    /// Fetches one page (1-based) of `limit` items.
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<SourcePage, FetchError>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Stored content hashes for the given ids. Ids absent from the map are new.
    async fn get_hashes(&self, ids: &[String]) -> Result<HashMap<String, Option<String>>, AppError>;

    /// Inserts or updates a record keyed by `id`. Writing the same record twice is a no-op.
    async fn upsert(&self, record: &NewInventoryRecord) -> Result<(), AppError>;

    /// Number of records matching `filter`.
    async fn count(&self, filter: &InventoryFilter) -> Result<u64, AppError>;

    /// Up to `limit` matching records strictly after `after` in the global order.
    async fn fetch_after(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError>;

    /// Up to `limit` matching records starting at `offset` in the global order.
    async fn fetch_offset(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError>;

    async fn stats(&self) -> Result<DatabaseStats, AppError>;
}

#[async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn load_status(&self, id: &str) -> Result<Option<SyncStatus>, AppError>;

    /// Overwrites the status row keyed by `status.id`.
    async fn save_status(&self, status: &SyncStatus) -> Result<(), AppError>;

    /// Writes a `running` status unless the stored row is already running.
    ///
    /// The check and the write are one atomic step, so of several processes
    /// starting the same target at most one gets `true`.
    async fn claim_running(&self, status: &SyncStatus) -> Result<bool, AppError>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<Checkpoint>, AppError>;

    /// Atomically replaces the stored checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError>;

    /// Removes the checkpoint. Returns false when there was none.
    async fn clear(&self) -> Result<bool, AppError>;
}
