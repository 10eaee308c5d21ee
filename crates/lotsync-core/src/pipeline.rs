//! Ingestion pipeline: paged fetch, transform, idempotent upsert, checkpoint.
//!
//! Pages are processed strictly in sequence. The next page is not fetched
//! until the previous page's rows are upserted, so a checkpoint at page N
//! guarantees every page up to N is durable. Rows of one page are upserted
//! concurrently, since upserts are keyed and order inside a page is irrelevant.
//!
//! The stop signal is checked at page boundaries and while waiting out a
//! retry delay, never in the middle of a batch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::Checkpoint;
use crate::classifier::{Classifier, RetryAction};
use crate::completion::{CompletionOracle, StopReason};
use crate::config::{RetryConfig, SyncConfig};
use crate::error::{AppError, FetchError};
use crate::models::{NewInventoryRecord, SourceItem, SourcePage};
use crate::sync::{needs_reprocessing, AtomicSyncStats, SyncOutcome, SyncState, SyncStats, SyncStatus};
use crate::traits::{CheckpointStore, InventorySource, InventoryStore, SyncStatusStore};
use crate::transform::into_record;

/// The collaborators a sync run reads from and writes to.
#[derive(Clone)]
pub struct SyncContext {
    pub source: Arc<dyn InventorySource>,
    pub store: Arc<dyn InventoryStore>,
    pub statuses: Arc<dyn SyncStatusStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: Uuid,
    pub start_page: u32,
    /// Checkpoint the run continues from, if resuming.
    pub checkpoint: Option<Checkpoint>,
    pub cancel: CancellationToken,
}

/// Terminal status of a run and its row statistics.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: SyncStatus,
    pub stats: SyncStats,
}

enum PageFetch {
    Page(SourcePage),
    Failed(FetchError),
    Cancelled,
}

pub struct IngestionPipeline {
    ctx: SyncContext,
    classifier: Classifier,
    oracle: CompletionOracle,
    config: SyncConfig,
}

impl IngestionPipeline {
    pub fn new(ctx: SyncContext, config: SyncConfig, retry: RetryConfig) -> Self {
        Self {
            ctx,
            classifier: Classifier::new(retry),
            oracle: CompletionOracle::from_config(&config),
            config,
        }
    }

    /// Runs from `options.start_page` until the oracle stops the run, a page
    /// fails for good, or the stop signal fires.
    ///
    /// `status` must already be `running`. Upstream failures end in a
    /// `failed` status rather than an error; `Err` is returned only when the
    /// status row or the checkpoint cannot be written.
    pub async fn run(
        &self,
        mut status: SyncStatus,
        options: RunOptions,
    ) -> Result<RunReport, AppError> {
        let RunOptions {
            run_id,
            start_page,
            checkpoint,
            cancel,
        } = options;

        let mut run = RunState {
            run_id,
            checkpoint,
            last_done: None,
            pages_since_checkpoint: 0,
            stats: SyncStats::new(),
        };

        tracing::info!(%run_id, start_page, "Starting ingestion run");

        if let Err(err) = self.ctx.source.probe().await {
            let verdict = self.classifier.classify(&err, 1);
            if verdict.action == RetryAction::Abort {
                tracing::error!(category = %verdict.category, error = %err, "Connectivity probe failed");
                return self.fail(status, run, err, start_page).await;
            }
            tracing::warn!(category = %verdict.category, error = %err, "Connectivity probe failed, continuing");
        }

        let mut page = start_page.max(1);
        let mut empty_streak: u32 = 0;
        // Totals come from the first response that reports any.
        let mut totals_pending = true;
        let mut metadata_seen = status.total_pages.is_some() || status.total_records.is_some();

        loop {
            if cancel.is_cancelled() {
                return self.pause(status, run).await;
            }

            let fetched = match self.fetch_with_retry(page, &cancel).await {
                PageFetch::Page(p) => p,
                PageFetch::Cancelled => return self.pause(status, run).await,
                PageFetch::Failed(err) => return self.fail(status, run, err, page).await,
            };

            if let Some(meta) = &fetched.meta {
                if meta.total.is_some() || meta.last_page.is_some() {
                    metadata_seen = true;
                    if totals_pending {
                        totals_pending = false;
                        status.discover_totals(meta);
                        tracing::info!(
                            total = ?status.total_records,
                            last_page = ?status.total_pages,
                            "Discovered upstream totals"
                        );
                    }
                }
            }

            let page_stats = if fetched.data.is_empty() {
                empty_streak += 1;
                tracing::debug!(page, empty_streak, "Empty page");
                SyncStats::new()
            } else {
                empty_streak = 0;
                self.process_batch(fetched.data).await?
            };

            run.stats.merge(&page_stats);
            status.record_page(
                page,
                page_stats.successful() as u64,
                page_stats.failed as u64,
                Utc::now(),
            );
            run.last_done = Some(page);
            run.pages_since_checkpoint += 1;

            if run.pages_since_checkpoint >= self.config.checkpoint_interval {
                self.write_checkpoint(&mut run, page, status.records_processed)
                    .await?;
            }
            self.ctx.statuses.save_status(&status).await?;

            tracing::info!(
                page,
                created = page_stats.created,
                updated = page_stats.updated,
                unchanged = page_stats.unchanged,
                failed = page_stats.failed,
                records = status.records_processed,
                progress = ?status.progress_percent(),
                "Page processed"
            );

            if let Some(reason) = self
                .oracle
                .stop_reason(page, status.total_pages, empty_streak)
            {
                return self.finalize(status, run, reason, metadata_seen).await;
            }

            page = page.saturating_add(1);
        }
    }

    async fn fetch_with_retry(&self, page: u32, cancel: &CancellationToken) -> PageFetch {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .ctx
                .source
                .fetch_page(page, self.config.page_size)
                .await
            {
                Ok(p) => return PageFetch::Page(p),
                Err(err) => {
                    let verdict = self.classifier.classify(&err, attempt);
                    tracing::warn!(
                        page,
                        attempt,
                        category = %verdict.category,
                        delay_ms = verdict.delay_ms(),
                        error = %err,
                        "Page fetch failed"
                    );

                    if verdict.action == RetryAction::Abort || attempt >= self.config.max_attempts {
                        return PageFetch::Failed(err);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(verdict.delay) => {}
                        _ = cancel.cancelled() => return PageFetch::Cancelled,
                    }
                }
            }
        }
    }

    /// Transforms and upserts one page of items. Row failures are counted, not raised.
    async fn process_batch(&self, items: Vec<SourceItem>) -> Result<SyncStats, AppError> {
        let stats = Arc::new(AtomicSyncStats::new());

        // Later duplicates of an id within a page win.
        let mut records: HashMap<String, NewInventoryRecord> = HashMap::new();
        for item in items {
            match into_record(item) {
                Ok(record) => {
                    records.insert(record.id.clone(), record);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping untransformable item");
                    stats.record(SyncOutcome::Failed);
                }
            }
        }

        let ids: Vec<String> = records.keys().cloned().collect();
        let existing = self.ctx.store.get_hashes(&ids).await?;

        stream::iter(records.into_values())
            .map(|record| {
                let store = Arc::clone(&self.ctx.store);
                let stats = Arc::clone(&stats);
                let decision = needs_reprocessing(existing.get(&record.id), &record.content_hash);
                async move {
                    if !decision.needs_write {
                        stats.record(SyncOutcome::Unchanged);
                        return;
                    }
                    match store.upsert(&record).await {
                        Ok(()) => stats.record(decision.outcome),
                        Err(e) => {
                            tracing::warn!(record = %record.id, error = %e, "Failed to upsert record");
                            stats.record(SyncOutcome::Failed);
                        }
                    }
                }
            })
            .buffer_unordered(self.config.upsert_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        Ok(stats.to_stats())
    }

    async fn write_checkpoint(
        &self,
        run: &mut RunState,
        page: u32,
        total_processed: u64,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let checkpoint = match run.checkpoint.as_mut() {
            Some(cp) => {
                cp.run_id = run.run_id;
                cp.advance(page, total_processed, now);
                cp.clone()
            }
            None => {
                let cp = Checkpoint::new(run.run_id, page, total_processed, now);
                run.checkpoint = Some(cp.clone());
                cp
            }
        };
        self.ctx.checkpoints.save(&checkpoint).await?;
        run.pages_since_checkpoint = 0;
        tracing::debug!(page, total_processed, "Checkpoint saved");
        Ok(())
    }

    /// Writes a checkpoint at the last fully processed page of this run, if it moved.
    async fn flush_checkpoint(&self, run: &mut RunState, status: &SyncStatus) -> Result<(), AppError> {
        if let Some(page) = run.last_done {
            if run.pages_since_checkpoint > 0 {
                self.write_checkpoint(run, page, status.records_processed)
                    .await?;
            }
        }
        Ok(())
    }

    async fn finalize(
        &self,
        mut status: SyncStatus,
        mut run: RunState,
        reason: StopReason,
        metadata_seen: bool,
    ) -> Result<RunReport, AppError> {
        let natural = match reason {
            StopReason::KnownEnd => true,
            StopReason::EmptyStreak => !metadata_seen,
        };
        let outcome = self.oracle.final_status(
            status.records_processed,
            status.total_records,
            natural,
            status.error_count > 0,
        );

        let now = Utc::now();
        match outcome {
            SyncState::Running => {
                self.flush_checkpoint(&mut run, &status).await?;
                let message = format!(
                    "stopped after {} consecutive empty pages at page {} with {} of {:?} records; resume required",
                    self.config.empty_page_threshold,
                    status.current_page,
                    status.records_processed,
                    status.total_records
                );
                tracing::warn!("{}", message);
                status.finish(SyncState::Paused, Some(message), now)?;
            }
            outcome => {
                self.ctx.checkpoints.clear().await?;
                let message = (status.error_count > 0)
                    .then(|| format!("{} records failed to sync", status.error_count));
                status.finish(outcome, message, now)?;
                tracing::info!(
                    status = %status.status,
                    records = status.records_processed,
                    errors = status.error_count,
                    ?reason,
                    "Ingestion run finished"
                );
            }
        }

        self.ctx.statuses.save_status(&status).await?;
        Ok(RunReport {
            status,
            stats: run.stats,
        })
    }

    async fn pause(&self, mut status: SyncStatus, mut run: RunState) -> Result<RunReport, AppError> {
        self.flush_checkpoint(&mut run, &status).await?;
        status.finish(
            SyncState::Paused,
            Some(format!("stopped on request after page {}", status.current_page)),
            Utc::now(),
        )?;
        self.ctx.statuses.save_status(&status).await?;
        tracing::info!(page = status.current_page, "Ingestion run paused");
        Ok(RunReport {
            status,
            stats: run.stats,
        })
    }

    async fn fail(
        &self,
        mut status: SyncStatus,
        mut run: RunState,
        err: FetchError,
        page: u32,
    ) -> Result<RunReport, AppError> {
        self.flush_checkpoint(&mut run, &status).await?;
        let message = format!(
            "page {}: {}",
            page,
            AppError::Upstream(err).user_message()
        );
        tracing::error!(page, "Ingestion run failed: {}", message);
        status.finish(SyncState::Failed, Some(message), Utc::now())?;
        self.ctx.statuses.save_status(&status).await?;
        Ok(RunReport {
            status,
            stats: run.stats,
        })
    }
}

struct RunState {
    run_id: Uuid,
    checkpoint: Option<Checkpoint>,
    /// Last page fully processed in this run.
    last_done: Option<u32>,
    pages_since_checkpoint: u32,
    stats: SyncStats,
}
