#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lotsync_core::{
    AppError, CheckpointStore, Cursor, DatabaseStats, FetchError, InventoryFilter,
    InventoryRecord, InventorySource, InventoryStore, MemoryCheckpointStore, MemoryStore,
    NewInventoryRecord, RetryConfig, SortSpec, SourcePage, SyncConfig,
    SyncContext, SyncOrchestrator, SyncStatus, SyncStatusStore,
};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};

/// What page metadata the fake upstream reports.
#[derive(Debug, Clone, Copy)]
pub enum MetaMode {
    None,
    Full,
    TotalOnly(u64),
    /// No metadata before the given page, full metadata from it on.
    FullFrom(u32),
}

/// Pauses a fetch of `page` until the test releases it.
pub struct Gate {
    pub page: u32,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
    armed: AtomicBool,
}

/// Upstream fake serving a fixed item list with scripted failures.
pub struct ScriptedSource {
    items: Mutex<Vec<Value>>,
    meta: MetaMode,
    failures: Mutex<HashMap<u32, VecDeque<FetchError>>>,
    probe_error: Mutex<Option<FetchError>>,
    fetched: Mutex<Vec<u32>>,
    gate: Option<Gate>,
}

impl ScriptedSource {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: Mutex::new(items),
            meta: MetaMode::Full,
            failures: Mutex::new(HashMap::new()),
            probe_error: Mutex::new(None),
            fetched: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn with_meta(mut self, meta: MetaMode) -> Self {
        self.meta = meta;
        self
    }

    pub fn failing(mut self, page: u32, errors: Vec<FetchError>) -> Self {
        self.failures.get_mut().insert(page, errors.into());
        self
    }

    pub fn probe_failing(mut self, error: FetchError) -> Self {
        *self.probe_error.get_mut() = Some(error);
        self
    }

    pub fn gated(mut self, page: u32) -> Self {
        self.gate = Some(Gate {
            page,
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            armed: AtomicBool::new(true),
        });
        self
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("source is not gated")
    }

    pub async fn fetched_pages(&self) -> Vec<u32> {
        self.fetched.lock().await.clone()
    }

    pub async fn replace_item(&self, index: usize, item: Value) {
        self.items.lock().await[index] = item;
    }
}

#[async_trait]
impl InventorySource for ScriptedSource {
    async fn probe(&self) -> Result<(), FetchError> {
        match self.probe_error.lock().await.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch_page(&self, page: u32, limit: u32) -> Result<SourcePage, FetchError> {
        self.fetched.lock().await.push(page);

        if let Some(gate) = &self.gate {
            if gate.page == page && gate.armed.swap(false, Ordering::SeqCst) {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }

        if let Some(queue) = self.failures.lock().await.get_mut(&page) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }

        let items = self.items.lock().await;
        let start = ((page - 1) * limit) as usize;
        let data: Vec<Value> = items
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect();

        let total = items.len() as u64;
        let full = json!({
            "total": total,
            "last_page": total.div_ceil(limit as u64),
        });
        let meta = match self.meta {
            MetaMode::None => Value::Null,
            MetaMode::Full => full,
            MetaMode::TotalOnly(claimed) => json!({ "total": claimed }),
            MetaMode::FullFrom(first) if page >= first => full,
            MetaMode::FullFrom(_) => Value::Null,
        };

        // Same decoding path as a real response body.
        serde_json::from_value::<SourcePage>(json!({ "data": data, "meta": meta }))
            .map_err(|e| FetchError::server(200, e.to_string()))
    }
}

/// Store wrapper whose upserts fail for selected ids.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub fail_ids: HashSet<String>,
}

#[async_trait]
impl InventoryStore for FlakyStore {
    async fn get_hashes(&self, ids: &[String]) -> Result<HashMap<String, Option<String>>, AppError> {
        self.inner.get_hashes(ids).await
    }

    async fn upsert(&self, record: &NewInventoryRecord) -> Result<(), AppError> {
        if self.fail_ids.contains(&record.id) {
            return Err(AppError::Generic(format!("constraint violation on {}", record.id)));
        }
        self.inner.upsert(record).await
    }

    async fn count(&self, filter: &InventoryFilter) -> Result<u64, AppError> {
        self.inner.count(filter).await
    }

    async fn fetch_after(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        after: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        self.inner.fetch_after(filter, sort, after, limit).await
    }

    async fn fetch_offset(
        &self,
        filter: &InventoryFilter,
        sort: SortSpec,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        self.inner.fetch_offset(filter, sort, offset, limit).await
    }

    async fn stats(&self) -> Result<DatabaseStats, AppError> {
        self.inner.stats().await
    }
}

/// Status store of a second process whose read happened before the
/// first process marked the target running.
pub struct StaleReader(pub Arc<MemoryStore>);

#[async_trait]
impl SyncStatusStore for StaleReader {
    async fn load_status(&self, _id: &str) -> Result<Option<SyncStatus>, AppError> {
        Ok(None)
    }

    async fn save_status(&self, status: &SyncStatus) -> Result<(), AppError> {
        self.0.save_status(status).await
    }

    async fn claim_running(&self, status: &SyncStatus) -> Result<bool, AppError> {
        self.0.claim_running(status).await
    }
}

const MAKES: [&str; 4] = ["Toyota", "Honda", "Ford", "BMW"];

/// Deterministic upstream item number `i`. Every seventh item has no price
/// and every fifth has no rank; the remaining ranks take only seven values.
pub fn vehicle(i: usize) -> Value {
    let price = if i % 7 == 0 {
        Value::Null
    } else {
        json!(5_000.0 + ((i * 37) % 20) as f64 * 250.0)
    };
    let rank = if i % 5 == 0 {
        Value::Null
    } else {
        json!(((i * 13) % 7) as f64 / 4.0)
    };
    let fuel = if i % 2 == 0 { "petrol" } else { "diesel" };
    json!({
        "id": format!("veh-{:04}", i),
        "make": MAKES[i % MAKES.len()],
        "model": format!("Model {}", i % 5),
        "year": 2010 + (i % 12) as i64,
        "fuel": fuel,
        "price": price,
        "mileage": (i * 1_337 % 90_000) as i64,
        "rank_score": rank,
        "created_at": format!("2024-03-{:02}T10:00:00Z", 1 + i % 28),
        "dealer": {"branch": i % 3}
    })
}

pub fn vehicles(n: usize) -> Vec<Value> {
    (1..=n).map(vehicle).collect()
}

pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        page_size: 10,
        checkpoint_interval: 2,
        max_attempts: 3,
        upsert_concurrency: 4,
        empty_page_threshold: 3,
        completion_buffer: 1,
        ..SyncConfig::default()
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        network_delay_ms: 1,
        server_base_delay_ms: 1,
        server_max_delay_ms: 4,
        timeout_delay_ms: 1,
    }
}

pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub store: Arc<MemoryStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    pub fn new(source: ScriptedSource) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(source, store.clone(), store)
    }

    pub fn with_failing_ids(source: ScriptedSource, ids: &[&str]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            fail_ids: ids.iter().map(|s| s.to_string()).collect(),
        });
        Self::build(source, flaky, store)
    }

    fn build(
        source: ScriptedSource,
        inventory: Arc<dyn InventoryStore>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let source = Arc::new(source);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let ctx = SyncContext {
            source: source.clone(),
            store: inventory,
            statuses: store.clone(),
            checkpoints: checkpoints.clone(),
        };
        let orchestrator = Arc::new(SyncOrchestrator::new(ctx, test_sync_config(), fast_retry()));
        Self {
            source,
            store,
            checkpoints,
            orchestrator,
        }
    }

    pub async fn checkpoint_page(&self) -> Option<u32> {
        self.checkpoints.load().await.unwrap().map(|cp| cp.last_page)
    }
}
