//! lotsync Core - ingestion pipeline, sync state machine and pagination engine.
//!
//! I/O lives behind the traits in [`traits`]; the HTTP client and the
//! PostgreSQL repositories are in sibling crates.

pub mod checkpoint;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod cursor;
pub mod error;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod pagination;
pub mod pipeline;
pub mod query;
pub mod sync;
pub mod traits;
pub mod transform;

pub use checkpoint::{Checkpoint, FileCheckpointStore, MemoryCheckpointStore};
pub use classifier::{classify, Classification, Classifier, ErrorCategory, RetryAction};
pub use completion::{CompletionOracle, StopReason};
pub use config::{
    default_config_path, load_config, AppConfig, DbConfig, HttpConfig, QueryConfig, RetryConfig,
    SyncConfig,
};
pub use cursor::Cursor;
pub use error::{AppError, ControlError, ErrorKind, FetchError};
pub use memory::MemoryStore;
pub use models::{
    DatabaseStats, InventoryRecord, NewInventoryRecord, PageMeta, SortDirection, SortField,
    SortSpec, SortValue, SourceItem, SourcePage,
};
pub use orchestrator::{StartMode, SyncOrchestrator};
pub use pagination::PaginationEngine;
pub use pipeline::{IngestionPipeline, RunOptions, RunReport, SyncContext};
pub use query::{
    FilterField, InventoryFilter, ModeParam, PageMode, PageResponse, QueryParams, QueryRequest,
    Range,
};
pub use sync::{
    needs_reprocessing, AtomicSyncStats, ReprocessingDecision, SyncOutcome, SyncState, SyncStats,
    SyncStatus,
};
pub use traits::{CheckpointStore, InventorySource, InventoryStore, SyncStatusStore};
pub use transform::into_record;
