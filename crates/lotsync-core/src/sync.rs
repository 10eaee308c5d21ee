//! Sync state machine, run statistics and delta detection.
//!
//! [`SyncStatus`] is the single persisted status row of a sync target. It is
//! only mutated through the transition methods below, which reject moves the
//! state machine does not allow:
//!
//! ```text
//! idle ──► running ──► completed | completed_with_errors | failed | paused
//!              ▲                                              │
//!              └──────────── start / resume ◄─────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::PageMeta;

/// Lifecycle state of a sync target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Paused,
}

impl SyncState {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::Completed => "completed",
            SyncState::CompletedWithErrors => "completed_with_errors",
            SyncState::Failed => "failed",
            SyncState::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Completed
                | SyncState::CompletedWithErrors
                | SyncState::Failed
                | SyncState::Paused
        )
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: SyncState) -> bool {
        match (self, to) {
            (SyncState::Running, SyncState::Running) => false,
            (_, SyncState::Running) => true,
            (SyncState::Running, t) => t.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncState::Idle),
            "running" => Ok(SyncState::Running),
            "completed" => Ok(SyncState::Completed),
            "completed_with_errors" => Ok(SyncState::CompletedWithErrors),
            "failed" => Ok(SyncState::Failed),
            "paused" => Ok(SyncState::Paused),
            other => Err(AppError::Generic(format!("unknown sync state '{}'", other))),
        }
    }
}

/// Persisted progress of the sync target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub id: String,
    pub run_id: Option<Uuid>,
    pub status: SyncState,
    pub current_page: u32,
    pub records_processed: u64,
    /// Rows that failed to transform or upsert during the current run.
    pub error_count: u64,
    /// Discovered from upstream metadata; never lowered within a run.
    pub total_pages: Option<u32>,
    /// Discovered from upstream metadata; never lowered within a run.
    pub total_records: Option<u64>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

impl SyncStatus {
    pub fn idle(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            run_id: None,
            status: SyncState::Idle,
            current_page: 0,
            records_processed: 0,
            error_count: 0,
            total_pages: None,
            total_records: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            last_activity_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: SyncState, now: DateTime<Utc>) -> Result<(), AppError> {
        if !self.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.last_activity_at = now;
        Ok(())
    }

    /// Enters `running` for a new run starting at `start_page`.
    ///
    /// `records_so_far` carries the processed count of a resumed run.
    /// A fresh run forgets previously discovered totals.
    pub fn begin(
        &mut self,
        run_id: Uuid,
        start_page: u32,
        records_so_far: u64,
        fresh: bool,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.transition(SyncState::Running, now)?;
        self.run_id = Some(run_id);
        self.current_page = start_page.saturating_sub(1);
        self.records_processed = records_so_far;
        self.error_count = 0;
        self.error_message = None;
        self.started_at = Some(now);
        self.completed_at = None;
        if fresh {
            self.total_pages = None;
            self.total_records = None;
        }
        Ok(())
    }

    /// Stores totals reported by upstream metadata. Smaller estimates never replace larger ones.
    pub fn discover_totals(&mut self, meta: &PageMeta) {
        if let Some(total) = meta.total {
            if self.total_records.is_none_or(|known| total > known) {
                self.total_records = Some(total);
            }
        }
        if let Some(last_page) = meta.last_page {
            if self.total_pages.is_none_or(|known| last_page > known) {
                self.total_pages = Some(last_page);
            }
        }
    }

    /// Records a fully processed page.
    pub fn record_page(&mut self, page: u32, processed: u64, failed: u64, now: DateTime<Utc>) {
        self.current_page = page;
        self.records_processed += processed;
        self.error_count += failed;
        self.last_activity_at = now;
    }

    /// Leaves `running` with the given outcome.
    pub fn finish(
        &mut self,
        outcome: SyncState,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.transition(outcome, now)?;
        self.error_message = message;
        if matches!(
            outcome,
            SyncState::Completed | SyncState::CompletedWithErrors
        ) {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Percentage of the discovered total processed so far.
    pub fn progress_percent(&self) -> Option<f64> {
        match self.total_records {
            Some(total) if total > 0 => Some(self.records_processed as f64 / total as f64 * 100.0),
            _ => None,
        }
    }

    /// A `running` status whose last activity is older than `after`.
    pub fn is_stale(&self, now: DateTime<Utc>, after: chrono::Duration) -> bool {
        self.status == SyncState::Running && now - self.last_activity_at > after
    }
}

/// Outcome of processing a single record during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Content hash matches the stored row; nothing written
    Unchanged,
    /// Content changed; row rewritten
    Updated,
    /// First time seeing this record
    Created,
    /// Transform or upsert failed
    Failed,
}

/// Statistics for a sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub unchanged: usize,
    pub updated: usize,
    pub created: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Failed => self.failed += 1,
        }
    }

    /// Adds another tracker's counters to this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.unchanged += other.unchanged;
        self.updated += other.updated;
        self.created += other.created;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.unchanged + self.updated + self.created + self.failed
    }

    pub fn successful(&self) -> usize {
        self.unchanged + self.updated + self.created
    }
}

/// Thread-safe counters for concurrent upserts within a page.
#[derive(Debug, Default)]
pub struct AtomicSyncStats {
    unchanged: AtomicUsize,
    updated: AtomicUsize,
    created: AtomicUsize,
    failed: AtomicUsize,
}

impl AtomicSyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: SyncOutcome) {
        let counter = match outcome {
            SyncOutcome::Unchanged => &self.unchanged,
            SyncOutcome::Updated => &self.updated,
            SyncOutcome::Created => &self.created,
            SyncOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_stats(&self) -> SyncStats {
        SyncStats {
            unchanged: self.unchanged.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Result of delta detection for a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReprocessingDecision {
    /// Whether the row must be written
    pub needs_write: bool,
    pub outcome: SyncOutcome,
    /// Human-readable reason for the decision
    pub reason: &'static str,
}

/// Decides whether a record must be written, based on content hash comparison.
///
/// # Arguments
/// * `existing_hash` - The stored content hash (None if the record is new)
/// * `new_hash` - The hash computed from the upstream data
pub fn needs_reprocessing(
    existing_hash: Option<&Option<String>>,
    new_hash: &str,
) -> ReprocessingDecision {
    match existing_hash {
        Some(Some(hash)) if hash == new_hash => ReprocessingDecision {
            needs_write: false,
            outcome: SyncOutcome::Unchanged,
            reason: "content hash matches",
        },
        Some(Some(_)) => ReprocessingDecision {
            needs_write: true,
            outcome: SyncOutcome::Updated,
            reason: "content hash changed",
        },
        Some(None) => ReprocessingDecision {
            needs_write: true,
            outcome: SyncOutcome::Updated,
            reason: "stored row without hash",
        },
        None => ReprocessingDecision {
            needs_write: true,
            outcome: SyncOutcome::Created,
            reason: "new record",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> SyncStatus {
        let mut status = SyncStatus::idle("inventory");
        status
            .begin(Uuid::new_v4(), 1, 0, true, Utc::now())
            .unwrap();
        status
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            SyncState::Idle,
            SyncState::Running,
            SyncState::Completed,
            SyncState::CompletedWithErrors,
            SyncState::Failed,
            SyncState::Paused,
        ] {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
        assert!("done".parse::<SyncState>().is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(SyncState::Idle.can_transition_to(SyncState::Running));
        assert!(SyncState::Failed.can_transition_to(SyncState::Running));
        assert!(SyncState::Paused.can_transition_to(SyncState::Running));
        assert!(SyncState::Completed.can_transition_to(SyncState::Running));
        assert!(!SyncState::Running.can_transition_to(SyncState::Running));
        assert!(SyncState::Running.can_transition_to(SyncState::Paused));
        assert!(!SyncState::Idle.can_transition_to(SyncState::Completed));
        assert!(!SyncState::Failed.can_transition_to(SyncState::Paused));
    }

    #[test]
    fn test_begin_twice_rejected() {
        let mut status = running();
        let err = status
            .begin(Uuid::new_v4(), 1, 0, true, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn test_finish_from_idle_rejected() {
        let mut status = SyncStatus::idle("inventory");
        assert!(status
            .finish(SyncState::Completed, None, Utc::now())
            .is_err());
    }

    #[test]
    fn test_begin_resume_keeps_totals() {
        let mut status = running();
        status.discover_totals(&PageMeta {
            total: Some(1000),
            last_page: Some(40),
        });
        status
            .finish(SyncState::Paused, None, Utc::now())
            .unwrap();

        status
            .begin(Uuid::new_v4(), 11, 250, false, Utc::now())
            .unwrap();
        assert_eq!(status.current_page, 10);
        assert_eq!(status.records_processed, 250);
        assert_eq!(status.total_records, Some(1000));

        status
            .finish(SyncState::Failed, Some("x".into()), Utc::now())
            .unwrap();
        status
            .begin(Uuid::new_v4(), 1, 0, true, Utc::now())
            .unwrap();
        assert_eq!(status.total_records, None);
        assert_eq!(status.error_message, None);
    }

    #[test]
    fn test_discover_totals_never_downgrades() {
        let mut status = running();
        status.discover_totals(&PageMeta {
            total: Some(150_000),
            last_page: Some(6000),
        });
        status.discover_totals(&PageMeta {
            total: Some(120_000),
            last_page: Some(5000),
        });
        assert_eq!(status.total_records, Some(150_000));
        assert_eq!(status.total_pages, Some(6000));

        status.discover_totals(&PageMeta {
            total: Some(151_000),
            last_page: None,
        });
        assert_eq!(status.total_records, Some(151_000));
        assert_eq!(status.total_pages, Some(6000));
    }

    #[test]
    fn test_progress_percent() {
        let mut status = running();
        assert_eq!(status.progress_percent(), None);
        status.discover_totals(&PageMeta {
            total: Some(200),
            last_page: None,
        });
        status.record_page(1, 50, 0, Utc::now());
        assert_eq!(status.progress_percent(), Some(25.0));
    }

    #[test]
    fn test_finish_sets_completed_at() {
        let mut status = running();
        status
            .finish(SyncState::CompletedWithErrors, None, Utc::now())
            .unwrap();
        assert!(status.completed_at.is_some());

        let mut status = running();
        status
            .finish(SyncState::Paused, None, Utc::now())
            .unwrap();
        assert!(status.completed_at.is_none());
    }

    #[test]
    fn test_is_stale() {
        let mut status = running();
        let now = Utc::now();
        status.last_activity_at = now - chrono::Duration::minutes(30);
        assert!(status.is_stale(now, chrono::Duration::minutes(15)));
        assert!(!status.is_stale(now, chrono::Duration::minutes(45)));

        status
            .finish(SyncState::Failed, None, now)
            .unwrap();
        status.last_activity_at = now - chrono::Duration::minutes(30);
        assert!(!status.is_stale(now, chrono::Duration::minutes(15)));
    }

    #[test]
    fn test_sync_stats_record_and_merge() {
        let mut stats = SyncStats::new();
        stats.record(SyncOutcome::Unchanged);
        stats.record(SyncOutcome::Updated);
        stats.record(SyncOutcome::Created);
        stats.record(SyncOutcome::Failed);

        let mut total = SyncStats::new();
        total.merge(&stats);
        total.merge(&stats);
        assert_eq!(total.total(), 8);
        assert_eq!(total.successful(), 6);
    }

    #[test]
    fn test_atomic_stats() {
        let stats = AtomicSyncStats::new();
        stats.record(SyncOutcome::Created);
        stats.record(SyncOutcome::Created);
        stats.record(SyncOutcome::Failed);
        let snapshot = stats.to_stats();
        assert_eq!(snapshot.created, 2);
        assert_eq!(snapshot.failed, 1);
    }

    #[test]
    fn test_needs_reprocessing_unchanged() {
        let hash = "abc123".to_string();
        let existing = Some(Some(hash.clone()));
        let decision = needs_reprocessing(existing.as_ref(), &hash);

        assert!(!decision.needs_write);
        assert_eq!(decision.outcome, SyncOutcome::Unchanged);
    }

    #[test]
    fn test_needs_reprocessing_updated() {
        let existing = Some(Some("abc123".to_string()));
        let decision = needs_reprocessing(existing.as_ref(), "def456");

        assert!(decision.needs_write);
        assert_eq!(decision.outcome, SyncOutcome::Updated);
        assert_eq!(decision.reason, "content hash changed");
    }

    #[test]
    fn test_needs_reprocessing_missing_hash() {
        let existing: Option<Option<String>> = Some(None);
        let decision = needs_reprocessing(existing.as_ref(), "new_hash");
        assert_eq!(decision.outcome, SyncOutcome::Updated);
    }

    #[test]
    fn test_needs_reprocessing_new() {
        let decision = needs_reprocessing(None, "new_hash");
        assert!(decision.needs_write);
        assert_eq!(decision.outcome, SyncOutcome::Created);
        assert_eq!(decision.reason, "new record");
    }
}
