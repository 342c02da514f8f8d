//! Persisted store document.
//!
//! Backends move raw document text; decoding, repair and encoding live
//! here so every backend loads the same way.

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::consistency::{CheckOptions, CheckReport, FindingCode, check_document};
use crate::error::EngineError;
use crate::sync::KnowledgeGraphSync;
use crate::types::{STORE_FORMAT_VERSION, TaskGraph};
use crate::version::is_compatible;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode store document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Store backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::store(err)
    }
}

/// Where the store document lives.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Human-readable location for logs.
    fn describe(&self) -> String;

    /// Raw document text, or `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<String>, StoreError>;

    /// Replace the document. Must not leave a partially written document.
    async fn save(&self, contents: &str) -> Result<(), StoreError>;
}

/// A decoded, repaired store document.
#[derive(Debug, Clone)]
pub struct LoadedStore {
    pub graph: TaskGraph,
    pub sync: KnowledgeGraphSync,
    /// Result of the load-time consistency pass.
    pub report: CheckReport,
    /// The document was unreadable and replaced by an empty default.
    pub recovered: bool,
}

impl LoadedStore {
    fn fresh(recovered: bool) -> Self {
        Self {
            graph: TaskGraph::default(),
            sync: KnowledgeGraphSync::default(),
            report: CheckReport::from_findings(Vec::new(), Vec::new()),
            recovered,
        }
    }
}

/// Load, repair and decode the document. Corrupted JSON falls back to an
/// empty default; only backend I/O failures are errors.
pub async fn load_document(backend: &dyn StoreBackend) -> Result<LoadedStore, StoreError> {
    let Some(text) = backend.load().await? else {
        info!(store = %backend.describe(), "No store document yet, starting empty");
        return Ok(LoadedStore::fresh(false));
    };
    Ok(decode_document(&text, &backend.describe()))
}

/// Decode document text. Never fails.
pub fn decode_document(text: &str, origin: &str) -> LoadedStore {
    let mut doc: Value = match serde_json::from_str(text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(store = origin, error = %e, "Store document is not valid JSON, starting empty");
            return LoadedStore::fresh(true);
        }
    };

    let checked = check_document(&mut doc, CheckOptions::auto_fix());
    if !checked
        .report
        .errors_with(FindingCode::MalformedDocument)
        .is_empty()
    {
        warn!(store = origin, "Store document root is not an object, starting empty");
        return LoadedStore {
            report: checked.report,
            ..LoadedStore::fresh(true)
        };
    }

    let mut graph = checked.graph;
    if !is_compatible(STORE_FORMAT_VERSION, &graph.version) {
        warn!(
            store = origin,
            found = %graph.version,
            expected = STORE_FORMAT_VERSION,
            "Store format version is not compatible, loading anyway"
        );
    }
    graph.version = STORE_FORMAT_VERSION.to_string();

    let sync = doc
        .get("knowledgeGraphSync")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    for fix in &checked.report.fixed_issues {
        info!(store = origin, "Repaired on load: {}", fix);
    }
    for finding in &checked.report.errors {
        warn!(store = origin, code = ?finding.code, "{}", finding.message);
    }

    LoadedStore {
        graph,
        sync,
        report: checked.report,
        recovered: false,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRef<'a> {
    #[serde(flatten)]
    graph: &'a TaskGraph,
    knowledge_graph_sync: &'a KnowledgeGraphSync,
}

/// Encode the graph and sync state as pretty-printed document text.
pub fn encode_document(graph: &TaskGraph, sync: &KnowledgeGraphSync) -> Result<String, StoreError> {
    let mut doc = serde_json::to_value(DocumentRef {
        graph,
        knowledge_graph_sync: sync,
    })?;
    if let Some(tasks) = doc.get_mut("tasks").and_then(Value::as_object_mut) {
        for (id, raw) in &graph.unparsed_tasks {
            tasks.entry(id.clone()).or_insert_with(|| raw.clone());
        }
    }
    Ok(serde_json::to_string_pretty(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::NewIntent;
    use crate::types::Task;

    #[tokio::test]
    async fn corrupted_json_falls_back_to_default() {
        let store = MemoryStore::with_contents("{ this is not json");
        let loaded = load_document(&store).await.unwrap();
        assert!(loaded.recovered);
        assert!(loaded.graph.tasks.is_empty());
        assert_eq!(loaded.graph.sections.len(), 4);
    }

    #[tokio::test]
    async fn non_object_root_falls_back_to_default() {
        let store = MemoryStore::with_contents("[1, 2]");
        let loaded = load_document(&store).await.unwrap();
        assert!(loaded.recovered);
        assert!(loaded.graph.tasks.is_empty());
    }

    #[tokio::test]
    async fn empty_store_is_fresh() {
        let loaded = load_document(&MemoryStore::new()).await.unwrap();
        assert!(!loaded.recovered);
        assert!(loaded.report.is_valid);
    }

    #[tokio::test]
    async fn encode_then_load_keeps_graph_and_sync() {
        let mut graph = TaskGraph::default();
        graph.tasks.insert("t1".into(), Task::new("t1", "First"));
        graph.place_in_section("t1", &crate::types::TaskStatus::Pending);
        graph.recount();
        let mut sync = crate::sync::SyncCoordinator::default();
        sync.create_intent(NewIntent {
            human_request: "do it".into(),
            ..NewIntent::default()
        })
        .unwrap();

        let text = encode_document(&graph, sync.state()).unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert!(doc.get("knowledgeGraphSync").is_some());
        assert!(doc.get("operationHistory").is_some());

        let loaded = load_document(&MemoryStore::with_contents(&text)).await.unwrap();
        assert_eq!(loaded.graph.tasks, graph.tasks);
        assert_eq!(loaded.sync.intents.len(), 1);
        assert!(loaded.report.fixed_issues.is_empty());
    }

    #[test]
    fn undecodable_entries_survive_reencoding() {
        let text = r#"{
            "tasks": {
                "t1": { "id": "t1", "title": "One", "status": "pending",
                        "createdAt": "2025-01-01T00:00:00Z", "updatedAt": "2025-01-01T00:00:00Z" },
                "t2": { "id": "t2", "title": "Two", "status": "pending", "priority": "someday" }
            },
            "sections": [{ "id": "pending", "tasks": ["t1", "t2"] }],
            "metadata": { "totalTasks": 1, "completedTasks": 0 }
        }"#;
        let loaded = decode_document(text, "test");
        assert!(loaded.graph.unparsed_tasks.contains_key("t2"));

        let encoded = encode_document(&loaded.graph, &loaded.sync).unwrap();
        let doc: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(doc["tasks"]["t2"]["priority"], "someday");
        assert_eq!(doc["sections"][0]["tasks"][1], "t2");
    }

    #[test]
    fn load_repairs_orphans() {
        let text = r#"{
            "tasks": { "t1": { "id": "t1", "title": "One", "status": "pending",
                               "createdAt": "2025-01-01T00:00:00Z", "updatedAt": "2025-01-01T00:00:00Z" } },
            "sections": [{ "id": "pending", "tasks": ["t1", "ghost"] }],
            "metadata": { "totalTasks": 1, "completedTasks": 0 }
        }"#;
        let loaded = decode_document(text, "test");
        assert_eq!(loaded.report.fixed_issues.len(), 1);
        assert_eq!(loaded.graph.sections[0].tasks, vec!["t1"]);
    }
}
