//! Decides when paging through the upstream source is finished.
//!
//! Two stop conditions are combined. When upstream metadata reported a last
//! page, paging stops once the current page is past it plus a small buffer
//! (upstream pagination is sometimes off by a few pages). Independently, a
//! long streak of empty pages stops the run; the threshold is high because
//! upstream pagination can have holes.

use crate::config::SyncConfig;
use crate::sync::SyncState;

/// Why the oracle asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Current page passed the reported last page plus the buffer.
    KnownEnd,
    /// Too many consecutive empty pages.
    EmptyStreak,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionOracle {
    buffer: u32,
    empty_page_threshold: u32,
    completion_ratio: f64,
}

impl CompletionOracle {
    pub fn new(buffer: u32, empty_page_threshold: u32, completion_ratio: f64) -> Self {
        Self {
            buffer,
            empty_page_threshold: empty_page_threshold.max(1),
            completion_ratio,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.completion_buffer,
            config.empty_page_threshold,
            config.completion_ratio,
        )
    }

    /// Returns the stop condition met after processing `current_page`, if any.
    pub fn stop_reason(
        &self,
        current_page: u32,
        api_last_page: Option<u32>,
        consecutive_empty_pages: u32,
    ) -> Option<StopReason> {
        if let Some(last) = api_last_page {
            if current_page > last.saturating_add(self.buffer) {
                return Some(StopReason::KnownEnd);
            }
        }
        if consecutive_empty_pages >= self.empty_page_threshold {
            return Some(StopReason::EmptyStreak);
        }
        None
    }

    pub fn should_stop(
        &self,
        current_page: u32,
        api_last_page: Option<u32>,
        consecutive_empty_pages: u32,
    ) -> bool {
        self.stop_reason(current_page, api_last_page, consecutive_empty_pages)
            .is_some()
    }

    /// Status a stopped run ends in.
    ///
    /// The mirror counts as complete when the run stopped at the known end or
    /// processed at least `completion_ratio` of the reported total. Row errors
    /// turn a complete run into `completed_with_errors`. An incomplete run
    /// without errors stays `running`: the caller must resume it.
    pub fn final_status(
        &self,
        records_processed: u64,
        api_total: Option<u64>,
        stopped_naturally: bool,
        had_errors: bool,
    ) -> SyncState {
        let reached_total = api_total
            .is_some_and(|total| records_processed as f64 >= self.completion_ratio * total as f64);

        match (stopped_naturally || reached_total, had_errors) {
            (true, false) => SyncState::Completed,
            (_, true) => SyncState::CompletedWithErrors,
            (false, false) => SyncState::Running,
        }
    }
}

impl Default for CompletionOracle {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_ingestion_scenario() {
        let oracle = CompletionOracle::default();
        assert!(!oracle.should_stop(5700, Some(6000), 8));
        assert!(oracle.should_stop(6010, Some(6000), 0));
        assert_eq!(
            oracle.stop_reason(6010, Some(6000), 0),
            Some(StopReason::KnownEnd)
        );
    }

    #[test]
    fn test_buffer_boundary() {
        let oracle = CompletionOracle::default();
        assert!(!oracle.should_stop(6005, Some(6000), 0));
        assert!(oracle.should_stop(6006, Some(6000), 0));
    }

    #[test]
    fn test_empty_streak_threshold() {
        let oracle = CompletionOracle::default();
        assert!(!oracle.should_stop(100, None, 24));
        assert_eq!(
            oracle.stop_reason(100, None, 25),
            Some(StopReason::EmptyStreak)
        );
    }

    #[test]
    fn test_final_status() {
        let oracle = CompletionOracle::default();
        assert_eq!(
            oracle.final_status(10, Some(1000), true, false),
            SyncState::Completed
        );
        assert_eq!(
            oracle.final_status(950, Some(1000), false, false),
            SyncState::Completed
        );
        assert_eq!(
            oracle.final_status(949, Some(1000), false, false),
            SyncState::Running
        );
        assert_eq!(
            oracle.final_status(500, Some(1000), false, true),
            SyncState::CompletedWithErrors
        );
        assert_eq!(
            oracle.final_status(1000, Some(1000), true, true),
            SyncState::CompletedWithErrors
        );
        assert_eq!(oracle.final_status(10, None, false, false), SyncState::Running);
    }

    #[test]
    fn test_configured_constants() {
        let oracle = CompletionOracle::new(0, 3, 0.5);
        assert!(oracle.should_stop(11, Some(10), 0));
        assert!(oracle.should_stop(2, None, 3));
        assert_eq!(
            oracle.final_status(50, Some(100), false, false),
            SyncState::Completed
        );
    }
}
