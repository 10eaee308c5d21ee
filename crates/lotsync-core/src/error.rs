use std::fmt;

use thiserror::Error;

/// Kind of an upstream failure, tagged by the HTTP client where the failure happened.
///
/// The classifier matches on this closed set instead of inspecting error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The upstream endpoint is unreachable or was never deployed
    /// (connectivity probe timed out, endpoint answered 404).
    Deployment,
    /// A connection could not be established at all.
    Network,
    /// Credentials were missing or rejected.
    Auth,
    /// A required setting is missing or the request was rejected as malformed.
    Config,
    /// The upstream answered with a 5xx status (or 429), or an unreadable body.
    Server { status: u16 },
    /// The request was sent but no response arrived before the deadline.
    Timeout,
    /// Anything the client could not tag more precisely.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Deployment => write!(f, "deployment"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Server { status } => write!(f, "server ({})", status),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Other => write!(f, "unknown"),
        }
    }
}

/// A failed call to the upstream inventory API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn deployment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deployment, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server { status }, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

/// Application-wide error types.
///
/// Most errors convert automatically from their source types:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `std::io::Error` → `AppError::IoError`
/// - `FetchError` → `AppError::Upstream`
///
/// # Examples
///
/// ```no_run
/// use lotsync_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Upstream inventory API call failed after classification.
    #[error("Upstream error: {0}")]
    Upstream(#[from] FetchError),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Local file operation failed (checkpoint file, config file).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file could not be parsed or holds invalid values.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An upstream item could not be converted into an inventory record.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A query request violated its own invariants (unknown field, both modes set, ...).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A sync status transition that the state machine does not allow.
    #[error("Invalid sync transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    ///
    /// Upstream failures always carry their category and a hint about what to check.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check DATABASE_URL."
                        .to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::Upstream(e) => match e.kind {
                ErrorKind::Deployment => format!(
                    "[deployment] Inventory API is unreachable: {}\n   Check deployment and INVENTORY_API_URL.",
                    e.message
                ),
                ErrorKind::Auth => format!(
                    "[auth] Inventory API rejected the credentials: {}\n   Check INVENTORY_API_KEY.",
                    e.message
                ),
                ErrorKind::Config => format!(
                    "[config] Inventory API request is misconfigured: {}\n   Check the sync configuration.",
                    e.message
                ),
                ErrorKind::Network => format!(
                    "[network] Cannot reach the inventory API: {}\n   Check your network connection.",
                    e.message
                ),
                ErrorKind::Server { status } => format!(
                    "[server] Inventory API answered HTTP {}: {}\n   The upstream may be overloaded. Resume later.",
                    status, e.message
                ),
                ErrorKind::Timeout => format!(
                    "[timeout] Inventory API did not answer in time: {}\n   Resume later or raise http.timeout_secs.",
                    e.message
                ),
                ErrorKind::Other => format!(
                    "[network] Inventory API call failed: {}\n   Resume to retry.",
                    e.message
                ),
            },
            AppError::ConfigError(msg) => {
                format!("Configuration error: {}\n   Check your config.toml.", msg)
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is worth retrying.
    ///
    /// # Examples
    ///
    /// ```
    /// use lotsync_core::error::{AppError, FetchError};
    ///
    /// let err = AppError::Upstream(FetchError::network("connection reset"));
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::Upstream(FetchError::auth("401"));
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Upstream(e) => crate::classifier::classify(e, 1).recoverable,
            _ => false,
        }
    }
}

/// Failure codes of the sync control surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    #[error("no checkpoint available")]
    NoCheckpoint,

    #[error("sync failed: {0}")]
    Failed(String),
}

impl ControlError {
    /// Process exit code used by the CLI for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            ControlError::Failed(_) => 1,
            ControlError::AlreadyRunning => 2,
            ControlError::NoCheckpoint => 3,
        }
    }
}

impl From<AppError> for ControlError {
    fn from(err: AppError) -> Self {
        ControlError::Failed(err.user_message())
    }
}
