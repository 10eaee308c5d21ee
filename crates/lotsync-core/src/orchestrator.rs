//! Sync control surface: start, resume, stop, status and checkpoint recovery.
//!
//! At most one run is active per orchestrator, and a persisted `running`
//! status from another process also blocks new runs unless it has gone stale.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::Checkpoint;
use crate::config::{RetryConfig, SyncConfig};
use crate::error::{AppError, ControlError};
use crate::pipeline::{IngestionPipeline, RunOptions, RunReport, SyncContext};
use crate::sync::{SyncState, SyncStatus};

/// How a run is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Discard any checkpoint and start from page 1 (or the requested page).
    Fresh,
    /// Continue after the latest valid checkpoint; degrades to a fresh run without one.
    Resume,
}

pub struct SyncOrchestrator {
    ctx: SyncContext,
    config: SyncConfig,
    retry: RetryConfig,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

/// Releases the in-process run slot when dropped.
struct ActiveRun {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext, config: SyncConfig, retry: RetryConfig) -> Self {
        Self {
            ctx,
            config,
            retry,
            active: Arc::new(Mutex::new(None)),
        }
    }

    fn claim(&self) -> Result<(ActiveRun, CancellationToken), ControlError> {
        let mut slot = self
            .active
            .lock()
            .map_err(|_| ControlError::Failed("run slot poisoned".to_string()))?;
        if slot.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok((
            ActiveRun {
                slot: Arc::clone(&self.active),
            },
            token,
        ))
    }

    fn is_active(&self) -> bool {
        self.active.lock().map(|s| s.is_some()).unwrap_or(true)
    }

    /// Loads the persisted status.
    ///
    /// With `recover` set, a `running` status left behind by a crashed run is
    /// marked failed. Only valid while no run is active in this process.
    async fn load_status(&self, recover: bool) -> Result<SyncStatus, AppError> {
        let mut status = self
            .ctx
            .statuses
            .load_status(&self.config.target_id)
            .await?
            .unwrap_or_else(|| SyncStatus::idle(&self.config.target_id));

        let now = Utc::now();
        if recover && status.is_stale(now, self.config.stale_run_after()) {
            tracing::warn!(
                last_activity = %status.last_activity_at,
                "Previous run stopped reporting; marking it interrupted"
            );
            status.finish(
                SyncState::Failed,
                Some("interrupted: run stopped reporting progress".to_string()),
                now,
            )?;
            self.ctx.statuses.save_status(&status).await?;
        }
        Ok(status)
    }

    /// Starts a run and drives it to a terminal status.
    ///
    /// `from_page` overrides the first page in either mode.
    pub async fn start(
        &self,
        mode: StartMode,
        from_page: Option<u32>,
    ) -> Result<RunReport, ControlError> {
        let (_guard, cancel) = self.claim()?;

        let mut status = self.load_status(true).await?;
        if status.status == SyncState::Running {
            return Err(ControlError::AlreadyRunning);
        }

        let now = Utc::now();
        // Checkpoints are only discarded once this process owns the target.
        let (start_page, checkpoint, discard) = match mode {
            StartMode::Fresh => (from_page.unwrap_or(1), None, true),
            StartMode::Resume => match self.ctx.checkpoints.load().await? {
                Some(cp) if cp.is_valid(now, self.config.checkpoint_max_age()) => {
                    tracing::info!(
                        last_page = cp.last_page,
                        total_processed = cp.total_processed,
                        "Resuming from checkpoint"
                    );
                    (from_page.unwrap_or_else(|| cp.resume_page()), Some(cp), false)
                }
                Some(cp) => {
                    tracing::warn!(
                        last_update = %cp.last_update_time,
                        "Checkpoint too old to trust; starting fresh"
                    );
                    (from_page.unwrap_or(1), None, true)
                }
                None => {
                    tracing::info!("No checkpoint found; starting fresh");
                    (from_page.unwrap_or(1), None, false)
                }
            },
        };

        let run_id = Uuid::new_v4();
        let records_so_far = checkpoint.as_ref().map_or(0, |cp| cp.total_processed);
        status.begin(
            run_id,
            start_page,
            records_so_far,
            checkpoint.is_none(),
            now,
        )?;
        if !self.ctx.statuses.claim_running(&status).await? {
            tracing::warn!("Another process is already running this sync target");
            return Err(ControlError::AlreadyRunning);
        }
        if discard && self.ctx.checkpoints.clear().await? {
            tracing::info!("Discarded existing checkpoint");
        }

        let pipeline = IngestionPipeline::new(
            self.ctx.clone(),
            self.config.clone(),
            self.retry.clone(),
        );
        let options = RunOptions {
            run_id,
            start_page,
            checkpoint,
            cancel,
        };

        let report = match pipeline.run(status.clone(), options).await {
            Ok(report) => report,
            Err(e) => {
                let message = e.user_message();
                tracing::error!(error = %e, "Ingestion run aborted");
                if status
                    .finish(SyncState::Failed, Some(message.clone()), Utc::now())
                    .is_ok()
                {
                    if let Err(save_err) = self.ctx.statuses.save_status(&status).await {
                        tracing::warn!(error = %save_err, "Failed to record failed status");
                    }
                }
                return Err(ControlError::Failed(message));
            }
        };

        if report.status.status == SyncState::Failed {
            return Err(ControlError::Failed(
                report
                    .status
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(report)
    }

    /// Signals the active run to stop at the next page boundary.
    ///
    /// Returns false when no run is active in this process.
    pub fn stop(&self) -> bool {
        match self.active.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Current status of the sync target.
    pub async fn status(&self) -> Result<SyncStatus, ControlError> {
        Ok(self.load_status(!self.is_active()).await?)
    }

    /// Latest stored checkpoint.
    pub async fn current_checkpoint(&self) -> Result<Checkpoint, ControlError> {
        self.ctx
            .checkpoints
            .load()
            .await?
            .ok_or(ControlError::NoCheckpoint)
    }

    async fn ensure_idle(&self) -> Result<SyncStatus, ControlError> {
        if self.is_active() {
            return Err(ControlError::AlreadyRunning);
        }
        let status = self.load_status(true).await?;
        if status.status == SyncState::Running {
            return Err(ControlError::AlreadyRunning);
        }
        Ok(status)
    }

    /// Writes a checkpoint at an operator-chosen page, so the next resume starts at `page + 1`.
    ///
    /// The processed count is taken from the status when it describes that
    /// page, and estimated as `page × page_size` otherwise.
    pub async fn checkpoint(&self, page: u32) -> Result<Checkpoint, ControlError> {
        let status = self.ensure_idle().await?;

        let total_processed = if status.current_page == page && status.records_processed > 0 {
            status.records_processed
        } else {
            page as u64 * self.config.page_size as u64
        };
        let run_id = status.run_id.unwrap_or_else(Uuid::new_v4);

        let checkpoint = Checkpoint::new(run_id, page, total_processed, Utc::now());
        self.ctx.checkpoints.save(&checkpoint).await?;
        tracing::info!(page, total_processed, "Manual checkpoint written");
        Ok(checkpoint)
    }

    /// Removes the stored checkpoint.
    pub async fn clear_checkpoint(&self) -> Result<(), ControlError> {
        self.ensure_idle().await?;
        if self.ctx.checkpoints.clear().await? {
            tracing::info!("Checkpoint cleared");
            Ok(())
        } else {
            Err(ControlError::NoCheckpoint)
        }
    }
}
