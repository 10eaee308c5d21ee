//! Maps upstream failures to a category and a retry policy.
//!
//! Deployment, auth and config failures are environment problems: retrying
//! cannot fix them, so the run aborts with an actionable message. Network,
//! server and timeout failures are transient and are retried after a delay.

use std::fmt;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ErrorKind, FetchError};

/// Category assigned to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Deployment,
    Network,
    Auth,
    Config,
    Server,
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Deployment => "deployment",
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Config => "config",
            ErrorCategory::Server => "server",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pipeline does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Verdict for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub recoverable: bool,
    pub delay: Duration,
    pub action: RetryAction,
}

impl Classification {
    fn abort(category: ErrorCategory) -> Self {
        Self {
            category,
            recoverable: false,
            delay: Duration::ZERO,
            action: RetryAction::Abort,
        }
    }

    fn retry(category: ErrorCategory, delay: Duration) -> Self {
        Self {
            category,
            recoverable: true,
            delay,
            action: RetryAction::Retry,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay.as_millis() as u64
    }
}

/// Classifier parameterised by retry delays.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    retry: RetryConfig,
}

impl Classifier {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// Classifies `error` seen on the given 1-based `attempt`.
    ///
    /// Server delays grow with the attempt count and are capped at
    /// `server_max_delay_ms`; the other delays are fixed.
    pub fn classify(&self, error: &FetchError, attempt: u32) -> Classification {
        match error.kind {
            ErrorKind::Deployment => Classification::abort(ErrorCategory::Deployment),
            ErrorKind::Network | ErrorKind::Other => Classification::retry(
                ErrorCategory::Network,
                Duration::from_millis(self.retry.network_delay_ms),
            ),
            ErrorKind::Auth => Classification::abort(ErrorCategory::Auth),
            ErrorKind::Config => Classification::abort(ErrorCategory::Config),
            ErrorKind::Server { .. } => {
                let exponent = attempt.saturating_sub(1).min(16);
                let delay = self
                    .retry
                    .server_base_delay_ms
                    .saturating_mul(1u64 << exponent)
                    .min(self.retry.server_max_delay_ms);
                Classification::retry(ErrorCategory::Server, Duration::from_millis(delay))
            }
            ErrorKind::Timeout => Classification::retry(
                ErrorCategory::Timeout,
                Duration::from_millis(self.retry.timeout_delay_ms),
            ),
        }
    }
}

/// Classifies with the default retry delays.
pub fn classify(error: &FetchError, attempt: u32) -> Classification {
    Classifier::default().classify(error, attempt)
}
