//! Durable ingestion progress.
//!
//! A checkpoint promises that every page up to and including `last_page` is
//! durably upserted. It is stored as a single JSON document per sync target
//! and replaced atomically (write to a sibling temp file, then rename).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::traits::CheckpointStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub last_page: u32,
    pub total_processed: u64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: Uuid, last_page: u32, total_processed: u64, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            last_page,
            total_processed,
            start_time: now,
            last_update_time: now,
        }
    }

    /// Moves the checkpoint forward, keeping the run's start time.
    pub fn advance(&mut self, last_page: u32, total_processed: u64, now: DateTime<Utc>) {
        self.last_page = last_page;
        self.total_processed = total_processed;
        self.last_update_time = now;
    }

    /// A checkpoint older than `max_age` is too stale to resume from.
    pub fn is_valid(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.last_update_time <= max_age
    }

    /// First page a resumed run should fetch.
    pub fn resume_page(&self) -> u32 {
        self.last_page.saturating_add(1)
    }
}

/// Checkpoint persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, AppError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(checkpoint) => Ok(Some(checkpoint)),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Ignoring unreadable checkpoint file"
                    );
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(
            path = %self.path.display(),
            last_page = checkpoint.last_page,
            "Checkpoint written"
        );
        Ok(())
    }

    async fn clear(&self) -> Result<bool, AppError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Checkpoint held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, AppError> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        *self.inner.lock().await = Some(checkpoint.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<bool, AppError> {
        Ok(self.inner.lock().await.take().is_some())
    }
}
