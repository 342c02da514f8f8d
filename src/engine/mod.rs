//! The task engine.
//!
//! A [`TaskEngine`] owns one committed snapshot of the task graph together
//! with its work queue, query cache and sync coordinator. Writes are routed
//! through the queue and applied under an async write lock to a clone of
//! the snapshot. The clone is checked for integrity, persisted, and only
//! then published with a single pointer swap, so readers see either the
//! previous snapshot or the new one, never a partial batch.
//!
//! Reads never take the write lock.

mod intents;
mod mirror;
mod query;
mod tasks;

pub use mirror::MirrorReconcile;
pub use query::{EngineStats, QueryResult, SortField, SortOrder, TaskQuery};
pub use tasks::{BatchItem, BatchOp, BatchOutcome, DeleteMode, WriteOptions};

use crate::cache::QueryCache;
use crate::config::EngineConfig;
use crate::consistency::{self, CheckOptions, CheckReport};
use crate::error::{EngineError, EngineResult};
use crate::queue::WorkQueue;
use crate::store::{self, JsonFileStore, MemoryStore, StoreBackend};
use crate::sync::{SyncCoordinator, ToolExecution};
use crate::types::{OperationRecord, TaskGraph, now_iso};
use arc_swap::ArcSwap;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Labels a write for the operation history and, when tagged with an
/// intent, for that intent's tool chain.
#[derive(Debug, Clone)]
pub(crate) struct Commit {
    operation: String,
    intent_id: Option<String>,
    tool_name: Option<String>,
    parameters: Value,
}

impl Commit {
    pub(crate) fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            intent_id: None,
            tool_name: None,
            parameters: Value::Null,
        }
    }

    fn tool_name(&self) -> String {
        self.tool_name
            .clone()
            .unwrap_or_else(|| self.operation.clone())
    }
}

/// Result of applying a write to the working copy.
#[derive(Debug)]
pub(crate) struct Applied<T> {
    pub value: T,
    pub created: Vec<String>,
    pub modified: Vec<String>,
}

impl<T> Applied<T> {
    pub(crate) fn unchanged(value: T) -> Self {
        Self {
            value,
            created: Vec::new(),
            modified: Vec::new(),
        }
    }
}

struct Shared {
    config: EngineConfig,
    snapshot: ArcSwap<TaskGraph>,
    /// Serializes commits and sync-state writes.
    write_lock: tokio::sync::Mutex<()>,
    cache: Mutex<QueryCache<QueryResult>>,
    queue: WorkQueue,
    sync: Mutex<SyncCoordinator>,
    backend: Arc<dyn StoreBackend>,
}

/// Handle to an engine instance. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskEngine {
    shared: Arc<Shared>,
}

impl TaskEngine {
    /// Open the JSON document at `config.store.path`.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        let backend = Arc::new(JsonFileStore::new(config.store.path.clone()));
        Self::with_backend(config, backend).await
    }

    /// An engine persisting to memory only.
    pub async fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        Self::with_backend(config, Arc::new(MemoryStore::new())).await
    }

    pub async fn with_backend(
        config: EngineConfig,
        backend: Arc<dyn StoreBackend>,
    ) -> EngineResult<Self> {
        let loaded = store::load_document(backend.as_ref()).await?;
        info!(
            store = %backend.describe(),
            tasks = loaded.graph.tasks.len(),
            intents = loaded.sync.intents.len(),
            repaired = loaded.report.fixed_issues.len(),
            recovered = loaded.recovered,
            "Task store opened"
        );

        let cache = QueryCache::new(config.cache.capacity, config.cache.stale_after());
        let queue = WorkQueue::new(config.queue.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                snapshot: ArcSwap::from_pointee(loaded.graph),
                write_lock: tokio::sync::Mutex::new(()),
                cache: Mutex::new(cache),
                queue,
                sync: Mutex::new(SyncCoordinator::new(loaded.sync)),
                backend,
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The last committed snapshot.
    pub fn snapshot(&self) -> Arc<TaskGraph> {
        self.shared.snapshot.load_full()
    }

    /// Commit counter of the current snapshot.
    pub fn revision(&self) -> u64 {
        self.shared.snapshot.load().metadata.revision
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.shared.queue
    }

    /// Wait until every admitted write has finished.
    pub async fn wait_for_idle(&self) {
        self.shared.queue.wait_for_completion().await;
    }

    /// Route a write through the queue and commit it.
    pub(crate) async fn write<T, F>(&self, commit: Commit, apply: F) -> EngineResult<T>
    where
        F: FnOnce(&mut TaskGraph) -> EngineResult<Applied<T>> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared
            .queue
            .submit(move || async move { shared.commit(commit, apply).await })
            .await
    }

    /// Mutate sync state and persist it next to the current snapshot.
    pub(crate) async fn update_sync<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut SyncCoordinator) -> EngineResult<T> + Send,
        T: Send,
    {
        let _guard = self.shared.write_lock.lock().await;
        let mut next = self.shared.coordinator().clone();
        let value = f(&mut next)?;
        let graph = self.shared.snapshot.load_full();
        self.shared.save(&graph, &next).await?;
        *self.shared.coordinator() = next;
        Ok(value)
    }
}

impl Shared {
    fn coordinator(&self) -> MutexGuard<'_, SyncCoordinator> {
        self.sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache(&self) -> MutexGuard<'_, QueryCache<QueryResult>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn commit<T, F>(&self, commit: Commit, apply: F) -> EngineResult<T>
    where
        F: FnOnce(&mut TaskGraph) -> EngineResult<Applied<T>>,
    {
        let _guard = self.write_lock.lock().await;
        let started = Instant::now();
        let current = self.snapshot.load_full();
        let mut next = TaskGraph::clone(&current);

        let applied = match apply(&mut next) {
            Ok(applied) => applied,
            Err(err) => {
                self.record_failure(&commit, &err, started).await;
                return Err(err);
            }
        };
        next.recount();
        if let Err(err) = self.enforce_integrity(&current, &mut next) {
            self.record_failure(&commit, &err, started).await;
            return Err(err);
        }

        if next == *current {
            debug!(operation = %commit.operation, "Write changed nothing, skipping commit");
            if commit.intent_id.is_some() {
                let execution = execution_for(&commit, &applied, started, current.metadata.revision);
                self.record_execution(&commit, execution).await?;
            }
            return Ok(applied.value);
        }

        let revision = current.metadata.revision + 1;
        next.metadata.revision = revision;
        next.metadata.last_updated = Some(now_iso());
        self.push_history(&mut next, &commit, &applied);

        let mut coordinator = self.coordinator().clone();
        if let Some(intent_id) = &commit.intent_id {
            let execution = execution_for(&commit, &applied, started, revision);
            coordinator.add_tool_execution(intent_id, execution, None)?;
        }

        // Nothing is published unless the document reached the backend
        self.save(&next, &coordinator).await?;

        let next = Arc::new(next);
        self.snapshot.store(Arc::clone(&next));
        *self.coordinator() = coordinator;
        let invalidated = self.cache().invalidate_by_version(revision);

        info!(
            operation = %commit.operation,
            revision,
            created = applied.created.len(),
            modified = applied.modified.len(),
            invalidated,
            elapsed_ms = elapsed_ms(started),
            "Committed"
        );

        if self.config.store.auto_write_mirror && self.config.store.mirror_path.is_some() {
            if let Err(err) = self.write_mirror_locked(&next, false).await {
                warn!(code = ?err.code, "Mirror not updated after commit: {}", err.message);
            }
        }
        Ok(applied.value)
    }

    /// Run the consistency pass over the working copy. Errors already
    /// present in the committed snapshot are tolerated; new ones are
    /// logged, or rejected in strict mode.
    fn enforce_integrity(&self, before: &TaskGraph, next: &mut TaskGraph) -> EngineResult<CheckReport> {
        let policy = &self.config.consistency;
        let report = if policy.auto_fix {
            consistency::check(next, CheckOptions::auto_fix())
        } else {
            consistency::validate(next)
        };
        for fix in &report.fixed_issues {
            debug!("Commit repaired: {}", fix);
        }
        if report.errors.is_empty() {
            return Ok(report);
        }

        let baseline = consistency::validate(before);
        let introduced: Vec<String> = report
            .errors
            .iter()
            .filter(|f| {
                !baseline
                    .errors
                    .iter()
                    .any(|b| b.code == f.code && b.message == f.message)
            })
            .map(|f| f.message.clone())
            .collect();
        if introduced.is_empty() {
            return Ok(report);
        }
        if policy.strict {
            warn!(errors = introduced.len(), "Rejected commit introducing integrity errors");
            return Err(EngineError::integrity(&introduced));
        }
        for message in &introduced {
            warn!("Commit introduced integrity error: {}", message);
        }
        Ok(report)
    }

    fn push_history<T>(&self, graph: &mut TaskGraph, commit: &Commit, applied: &Applied<T>) {
        let mut task_ids: Vec<String> = Vec::new();
        for id in applied.created.iter().chain(&applied.modified) {
            if !task_ids.contains(id) {
                task_ids.push(id.clone());
            }
        }
        graph.operation_history.push(OperationRecord {
            id: Uuid::now_v7().to_string(),
            operation: commit.operation.clone(),
            task_ids,
            timestamp: now_iso(),
            intent_id: commit.intent_id.clone(),
        });

        let limit = self.config.consistency.history_limit;
        let len = graph.operation_history.len();
        if len > limit {
            graph.operation_history.drain(..len - limit);
        }
    }

    async fn save(&self, graph: &TaskGraph, sync: &SyncCoordinator) -> EngineResult<()> {
        let text = store::encode_document(graph, sync.state())?;
        self.backend.save(&text).await.map_err(|err| {
            warn!(store = %self.backend.describe(), error = %err, "Persist failed, keeping previous snapshot");
            EngineError::from(err)
        })
    }

    /// Append an execution to the commit's intent and persist sync state.
    async fn record_execution(&self, commit: &Commit, execution: ToolExecution) -> EngineResult<()> {
        let Some(intent_id) = &commit.intent_id else {
            return Ok(());
        };
        let mut coordinator = self.coordinator().clone();
        coordinator.add_tool_execution(intent_id, execution, None)?;
        let graph = self.snapshot.load_full();
        self.save(&graph, &coordinator).await?;
        *self.coordinator() = coordinator;
        Ok(())
    }

    async fn record_failure(&self, commit: &Commit, err: &EngineError, started: Instant) {
        if commit.intent_id.is_none() {
            return;
        }
        let execution = ToolExecution {
            parameters: commit.parameters.clone(),
            execution_time: elapsed_ms(started),
            ..ToolExecution::failed(commit.tool_name(), err.to_string())
        };
        if let Err(record_err) = self.record_execution(commit, execution).await {
            warn!(
                intent_id = commit.intent_id.as_deref().unwrap_or_default(),
                error = %record_err,
                "Failed to record failed tool execution"
            );
        }
    }
}

fn execution_for<T>(commit: &Commit, applied: &Applied<T>, started: Instant, revision: u64) -> ToolExecution {
    ToolExecution {
        parameters: commit.parameters.clone(),
        result: json!({ "revision": revision }),
        todo_tasks_created: applied.created.clone(),
        todo_tasks_modified: applied.modified.clone(),
        execution_time: elapsed_ms(started),
        ..ToolExecution::succeeded(commit.tool_name())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
