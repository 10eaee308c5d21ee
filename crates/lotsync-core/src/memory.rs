//! In-process implementation of the store traits.
//!
//! Applies the same filter, ordering and keyset semantics as the PostgreSQL
//! repository. Used for dry runs and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::cursor::Cursor;
use crate::error::AppError;
use crate::models::{DatabaseStats, InventoryRecord, NewInventoryRecord, SortSpec};
use crate::query::{compare_records, is_after_cursor, InventoryFilter};
use crate::sync::{SyncState, SyncStatus};
use crate::traits::{InventoryStore, SyncStatusStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<String, InventoryRecord>>,
    statuses: RwLock<HashMap<String, SyncStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records ordered by id.
    pub async fn snapshot(&self) -> Vec<InventoryRecord> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn sorted(&self, filter: &InventoryFilter, sort: SortSpec) -> Vec<InventoryRecord> {
        let rows = self.rows.read().await;
        let mut matching: Vec<InventoryRecord> =
            rows.values().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| compare_records(a, b, sort));
        matching
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn get_hashes(&self, ids: &[String]) -> Result<HashMap<String, Option<String>>, AppError> {
        let rows = self.rows.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                rows.get(id)
                    .map(|r| (id.clone(), Some(r.content_hash.clone())))
            })
            .collect())
    }

    async fn upsert(&self, record: &NewInventoryRecord) -> Result<(), AppError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;

        let (created_at, first_seen_at) = match rows.get(&record.id) {
            Some(existing) if existing.content_hash == record.content_hash => return Ok(()),
            Some(existing) => (
                record.created_at.unwrap_or(existing.created_at),
                existing.first_seen_at,
            ),
            None => (record.created_at.unwrap_or(now), now),
        };

        rows.insert(
            record.id.clone(),
            InventoryRecord {
                id: record.id.clone(),
                make: record.make.clone(),
                model: record.model.clone(),
                year: record.year,
                fuel: record.fuel.clone(),
                transmission: record.transmission.clone(),
                color: record.color.clone(),
                price_cents: record.price_cents,
                mileage: record.mileage,
                rank_score: record.rank_score,
                created_at,
                attributes: record.attributes.clone(),
                content_hash: record.content_hash.clone(),
                first_seen_at,
                last_synced_at: now,
            },
        );
        Ok(())
    }

    async fn count(&self, filter: &InventoryFilter) -> Result<u64, AppError> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn fetch_after(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        Ok(self
            .sorted(filter, sort)
            .await
            .into_iter()
            .filter(|r| after.is_none_or(|c| is_after_cursor(r, c, sort)))
            .take(limit as usize)
            .collect())
    }

    async fn fetch_offset(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        Ok(self
            .sorted(filter, sort)
            .await
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn stats(&self) -> Result<DatabaseStats, AppError> {
        let rows = self.rows.read().await;
        let mut makes: Vec<&str> = rows.values().map(|r| r.make.as_str()).collect();
        makes.sort_unstable();
        makes.dedup();
        Ok(DatabaseStats {
            total_records: rows.len() as i64,
            distinct_makes: makes.len() as i64,
            last_synced_at: rows.values().map(|r| r.last_synced_at).max(),
        })
    }
}

#[async_trait]
impl SyncStatusStore for MemoryStore {
    async fn load_status(&self, id: &str) -> Result<Option<SyncStatus>, AppError> {
        Ok(self.statuses.read().await.get(id).cloned())
    }

    async fn save_status(&self, status: &SyncStatus) -> Result<(), AppError> {
        self.statuses
            .write()
            .await
            .insert(status.id.clone(), status.clone());
        Ok(())
    }

    async fn claim_running(&self, status: &SyncStatus) -> Result<bool, AppError> {
        let mut statuses = self.statuses.write().await;
        if statuses
            .get(&status.id)
            .is_some_and(|s| s.status == SyncState::Running)
        {
            return Ok(false);
        }
        statuses.insert(status.id.clone(), status.clone());
        Ok(true)
    }
}
