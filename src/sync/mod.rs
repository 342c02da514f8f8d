//! Intent tracking and mirror-file synchronization state.
//!
//! The coordinator records externally triggered goals (intents), the chain
//! of tool executions performed for each, and whether the Markdown mirror
//! of the task list was last touched by a human or by the engine.

pub mod mirror;
pub mod watcher;

use crate::error::{EngineError, EngineResult};
use crate::types::{Priority, now_iso};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use tracing::{debug, info};
use uuid::Uuid;

/// Intent lifecycle: `planning -> executing -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    #[default]
    Planning,
    Executing,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Planning => "planning",
            IntentStatus::Executing => "executing",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(IntentStatus::Planning),
            "executing" => Some(IntentStatus::Executing),
            "completed" => Some(IntentStatus::Completed),
            "failed" => Some(IntentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Completed | IntentStatus::Failed)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool invocation performed while satisfying an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub result: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub todo_tasks_created: Vec<String>,
    #[serde(default)]
    pub todo_tasks_modified: Vec<String>,
    /// Wall time in milliseconds.
    #[serde(default)]
    pub execution_time: u64,
    pub timestamp: String,
}

impl ToolExecution {
    pub fn succeeded(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters: Value::Null,
            result: Value::Null,
            success: true,
            error: None,
            todo_tasks_created: Vec::new(),
            todo_tasks_modified: Vec::new(),
            execution_time: 0,
            timestamp: now_iso(),
        }
    }

    pub fn failed(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(tool_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub intent_id: String,
    pub human_request: String,
    #[serde(default)]
    pub parsed_goals: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub timestamp: String,
    #[serde(default)]
    pub tool_chain: Vec<ToolExecution>,
    #[serde(default)]
    pub current_status: IntentStatus,
    /// Mirror file content when the intent was last touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo_md_snapshot: Option<String>,
}

/// Input for [`SyncCoordinator::create_intent`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIntent {
    pub human_request: String,
    #[serde(default)]
    pub parsed_goals: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    Pending,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifiedBy {
    Human,
    #[default]
    Tool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(default)]
    pub last_sync_timestamp: Option<String>,
    #[serde(default)]
    pub todo_md_hash: Option<String>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub last_modified_by: ModifiedBy,
}

/// Persisted coordinator state (`knowledgeGraphSync` in the store document).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGraphSync {
    #[serde(default)]
    pub intents: Vec<Intent>,
    #[serde(default)]
    pub sync_state: SyncState,
}

/// Outcome of comparing mirror content with the last recorded hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetection {
    pub has_changes: bool,
    pub previous_hash: Option<String>,
    pub current_hash: String,
    pub sync_status: SyncStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub tool_name: String,
    pub usage_count: usize,
}

/// Derived on every read; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAnalytics {
    pub total_intents: usize,
    pub completed_intents: usize,
    pub failed_intents: usize,
    /// Neither completed nor failed.
    pub active_intents: usize,
    /// `completed / total`, 0 when there are no intents.
    pub average_goal_completion: f64,
    /// Descending by count, ties by name.
    pub most_used_tools: Vec<ToolUsage>,
}

/// Lowercase hex SHA-256 of mirror content.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Owns intents and mirror sync state for one engine.
#[derive(Debug, Clone, Default)]
pub struct SyncCoordinator {
    state: KnowledgeGraphSync,
}

impl SyncCoordinator {
    pub fn new(state: KnowledgeGraphSync) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &KnowledgeGraphSync {
        &self.state
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.state.sync_state
    }

    pub fn intents(&self) -> &[Intent] {
        &self.state.intents
    }

    pub fn create_intent(&mut self, input: NewIntent) -> EngineResult<Intent> {
        if input.human_request.trim().is_empty() {
            return Err(EngineError::missing_field("human_request"));
        }
        let intent = Intent {
            intent_id: format!("intent-{}", Uuid::now_v7()),
            human_request: input.human_request,
            parsed_goals: input.parsed_goals,
            priority: input.priority,
            timestamp: now_iso(),
            tool_chain: Vec::new(),
            current_status: IntentStatus::Planning,
            todo_md_snapshot: None,
        };
        info!(intent_id = %intent.intent_id, "Intent created");
        self.state.intents.push(intent.clone());
        Ok(intent)
    }

    pub fn get_intent(&self, intent_id: &str) -> EngineResult<&Intent> {
        self.state
            .intents
            .iter()
            .find(|i| i.intent_id == intent_id)
            .ok_or_else(|| EngineError::intent_not_found(intent_id))
    }

    fn intent_mut(&mut self, intent_id: &str) -> EngineResult<&mut Intent> {
        self.state
            .intents
            .iter_mut()
            .find(|i| i.intent_id == intent_id)
            .ok_or_else(|| EngineError::intent_not_found(intent_id))
    }

    /// Append a tool execution and advance the intent.
    ///
    /// A success moves `planning` to `executing`; a failure moves any state
    /// to `failed`. A success never revives a failed intent; that takes an
    /// explicit [`update_intent_status`](Self::update_intent_status).
    pub fn add_tool_execution(
        &mut self,
        intent_id: &str,
        execution: ToolExecution,
        mirror_snapshot: Option<String>,
    ) -> EngineResult<Intent> {
        let intent = self.intent_mut(intent_id)?;
        let before = intent.current_status;

        let after = match (before, execution.success) {
            (_, false) => IntentStatus::Failed,
            (IntentStatus::Planning, true) => IntentStatus::Executing,
            (status, true) => status,
        };

        debug!(
            intent_id,
            tool = %execution.tool_name,
            success = execution.success,
            "Recorded tool execution"
        );
        intent.tool_chain.push(execution);
        intent.current_status = after;
        if mirror_snapshot.is_some() {
            intent.todo_md_snapshot = mirror_snapshot;
        }
        if before != after {
            info!(intent_id, from = %before, to = %after, "Intent status changed");
        }
        Ok(intent.clone())
    }

    /// Explicit transition to executing, completed or failed.
    pub fn update_intent_status(
        &mut self,
        intent_id: &str,
        status: IntentStatus,
    ) -> EngineResult<Intent> {
        let intent = self.intent_mut(intent_id)?;
        if status == IntentStatus::Planning && intent.current_status != IntentStatus::Planning {
            return Err(EngineError::invalid_state(format!(
                "Intent {} cannot return to planning from {}",
                intent_id, intent.current_status
            )));
        }
        let before = intent.current_status;
        intent.current_status = status;
        if before != status {
            info!(intent_id, from = %before, to = %status, "Intent status changed");
        }
        Ok(intent.clone())
    }

    /// Intents whose tool chain created or modified a task.
    pub fn intents_touching(&self, task_id: &str) -> Vec<&Intent> {
        self.state
            .intents
            .iter()
            .filter(|intent| {
                intent.tool_chain.iter().any(|exec| {
                    exec.todo_tasks_created.iter().any(|t| t == task_id)
                        || exec.todo_tasks_modified.iter().any(|t| t == task_id)
                })
            })
            .collect()
    }

    /// Compare mirror content with the recorded hash. A mismatch marks the
    /// mirror as pending a human-edit reconcile.
    pub fn detect_todo_changes(&mut self, content: &str) -> ChangeDetection {
        let current_hash = content_hash(content);
        let sync = &mut self.state.sync_state;
        let previous_hash = sync.todo_md_hash.clone();
        let has_changes = previous_hash.as_deref() != Some(current_hash.as_str());

        if has_changes {
            sync.sync_status = SyncStatus::Pending;
            sync.last_modified_by = ModifiedBy::Human;
            info!(
                previous = previous_hash.as_deref().unwrap_or("none"),
                current = %current_hash,
                "Mirror file drift detected"
            );
        }

        ChangeDetection {
            has_changes,
            previous_hash,
            current_hash,
            sync_status: sync.sync_status,
        }
    }

    /// Record content the engine itself wrote to the mirror.
    pub fn record_tool_snapshot(&mut self, content: &str) {
        self.mark_synced(content, ModifiedBy::Tool);
    }

    /// Record mirror content as reconciled with the store.
    pub fn mark_synced(&mut self, content: &str, by: ModifiedBy) {
        let sync = &mut self.state.sync_state;
        sync.todo_md_hash = Some(content_hash(content));
        sync.sync_status = SyncStatus::Synced;
        sync.last_modified_by = by;
        sync.last_sync_timestamp = Some(now_iso());
    }

    pub fn mark_conflict(&mut self) {
        self.state.sync_state.sync_status = SyncStatus::Conflict;
        info!("Mirror file marked as conflicted");
    }

    pub fn analytics(&self) -> IntentAnalytics {
        let intents = &self.state.intents;
        let total = intents.len();
        let completed = intents
            .iter()
            .filter(|i| i.current_status == IntentStatus::Completed)
            .count();
        let failed = intents
            .iter()
            .filter(|i| i.current_status == IntentStatus::Failed)
            .count();

        let mut usage: HashMap<&str, usize> = HashMap::new();
        for exec in intents.iter().flat_map(|i| &i.tool_chain) {
            *usage.entry(exec.tool_name.as_str()).or_insert(0) += 1;
        }
        let mut most_used_tools: Vec<ToolUsage> = usage
            .into_iter()
            .map(|(name, count)| ToolUsage {
                tool_name: name.to_string(),
                usage_count: count,
            })
            .collect();
        most_used_tools.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| a.tool_name.cmp(&b.tool_name))
        });

        IntentAnalytics {
            total_intents: total,
            completed_intents: completed,
            failed_intents: failed,
            active_intents: total - completed - failed,
            average_goal_completion: if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64
            },
            most_used_tools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn intent(coordinator: &mut SyncCoordinator) -> String {
        coordinator
            .create_intent(NewIntent {
                human_request: "Ship the login page".to_string(),
                parsed_goals: vec!["build form".into(), "wire auth".into()],
                priority: Priority::High,
            })
            .unwrap()
            .intent_id
    }

    #[test]
    fn state_machine_follows_executions() {
        let mut c = SyncCoordinator::default();
        let id = intent(&mut c);
        assert_eq!(c.get_intent(&id).unwrap().current_status, IntentStatus::Planning);

        let after = c
            .add_tool_execution(&id, ToolExecution::succeeded("create_task"), None)
            .unwrap();
        assert_eq!(after.current_status, IntentStatus::Executing);

        let after = c
            .add_tool_execution(&id, ToolExecution::failed("update_task", "boom"), None)
            .unwrap();
        assert_eq!(after.current_status, IntentStatus::Failed);
        assert_eq!(after.tool_chain.len(), 2);
    }

    #[test]
    fn failed_intent_is_not_revived_by_success() {
        let mut c = SyncCoordinator::default();
        let id = intent(&mut c);
        c.add_tool_execution(&id, ToolExecution::failed("x", "nope"), None)
            .unwrap();
        let after = c
            .add_tool_execution(&id, ToolExecution::succeeded("x"), None)
            .unwrap();
        assert_eq!(after.current_status, IntentStatus::Failed);

        let revived = c.update_intent_status(&id, IntentStatus::Executing).unwrap();
        assert_eq!(revived.current_status, IntentStatus::Executing);
    }

    #[test]
    fn explicit_completion_and_no_return_to_planning() {
        let mut c = SyncCoordinator::default();
        let id = intent(&mut c);
        c.update_intent_status(&id, IntentStatus::Completed).unwrap();
        let err = c
            .update_intent_status(&id, IntentStatus::Planning)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[test]
    fn unknown_intent_is_not_found() {
        let mut c = SyncCoordinator::default();
        let err = c
            .add_tool_execution("missing", ToolExecution::succeeded("x"), None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IntentNotFound);
        let err = c
            .update_intent_status("missing", IntentStatus::Completed)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IntentNotFound);
    }

    #[test]
    fn empty_request_is_rejected() {
        let mut c = SyncCoordinator::default();
        let err = c.create_intent(NewIntent::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRequiredField);
    }

    #[test]
    fn snapshot_is_kept_on_last_touch() {
        let mut c = SyncCoordinator::default();
        let id = intent(&mut c);
        c.add_tool_execution(&id, ToolExecution::succeeded("a"), Some("v1".into()))
            .unwrap();
        let after = c
            .add_tool_execution(&id, ToolExecution::succeeded("b"), None)
            .unwrap();
        assert_eq!(after.todo_md_snapshot.as_deref(), Some("v1"));
    }

    #[test]
    fn drift_detection_distinguishes_human_and_tool() {
        let mut c = SyncCoordinator::default();
        c.record_tool_snapshot("- [ ] one");
        assert_eq!(c.sync_state().last_modified_by, ModifiedBy::Tool);
        assert_eq!(c.sync_state().sync_status, SyncStatus::Synced);

        let unchanged = c.detect_todo_changes("- [ ] one");
        assert!(!unchanged.has_changes);
        assert_eq!(unchanged.sync_status, SyncStatus::Synced);

        let changed = c.detect_todo_changes("- [x] one");
        assert!(changed.has_changes);
        assert_eq!(changed.sync_status, SyncStatus::Pending);
        assert_eq!(c.sync_state().last_modified_by, ModifiedBy::Human);

        c.mark_conflict();
        assert_eq!(c.sync_state().sync_status, SyncStatus::Conflict);
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn analytics_aggregate_tools_and_outcomes() {
        let mut c = SyncCoordinator::default();
        assert_eq!(c.analytics().average_goal_completion, 0.0);

        let a = intent(&mut c);
        let b = intent(&mut c);
        let _planning = intent(&mut c);
        for tool in ["create_task", "create_task", "update_task"] {
            c.add_tool_execution(&a, ToolExecution::succeeded(tool), None)
                .unwrap();
        }
        c.add_tool_execution(&b, ToolExecution::succeeded("create_task"), None)
            .unwrap();
        c.update_intent_status(&a, IntentStatus::Completed).unwrap();
        c.add_tool_execution(&b, ToolExecution::failed("delete_task", "no"), None)
            .unwrap();

        let stats = c.analytics();
        assert_eq!(stats.total_intents, 3);
        assert_eq!(stats.completed_intents, 1);
        assert_eq!(stats.failed_intents, 1);
        assert_eq!(stats.active_intents, 1);
        assert!((stats.average_goal_completion - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            stats.most_used_tools[0],
            ToolUsage {
                tool_name: "create_task".into(),
                usage_count: 3
            }
        );
        assert_eq!(stats.most_used_tools.len(), 3);
    }

    #[test]
    fn intents_touching_a_task() {
        let mut c = SyncCoordinator::default();
        let id = intent(&mut c);
        let mut exec = ToolExecution::succeeded("create_task");
        exec.todo_tasks_created = vec!["t1".into()];
        c.add_tool_execution(&id, exec, None).unwrap();
        assert_eq!(c.intents_touching("t1").len(), 1);
        assert!(c.intents_touching("t2").is_empty());
    }
}
