//! Task writes: create, update, delete and batches of them.
//!
//! Each operation validates completely before it touches the working copy,
//! so a rejected item in a `continue_on_error` batch leaves no trace.

use super::{Applied, Commit, TaskEngine};
use crate::consistency::is_valid_date;
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::types::{NewTask, Task, TaskGraph, TaskPatch, now_iso};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

/// How delete treats tasks that still reference the deleted one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Refuse with `DEPENDENCY_REFERENCED` while any reference remains.
    #[default]
    Restrict,
    /// Sever dependency, parent and child references, then delete.
    Cascade,
}

/// One operation in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    Create {
        task: NewTask,
    },
    Update {
        id: String,
        patch: TaskPatch,
    },
    Delete {
        id: String,
        #[serde(default)]
        mode: DeleteMode,
    },
}

impl BatchOp {
    fn label(&self) -> &'static str {
        match self {
            BatchOp::Create { .. } => "create_task",
            BatchOp::Update { .. } => "update_task",
            BatchOp::Delete { .. } => "delete_task",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOptions {
    /// Keep going past failed items instead of rejecting the whole batch.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Record the write in this intent's tool chain.
    #[serde(default)]
    pub intent_id: Option<String>,
    /// Tool name for the tool chain entry (defaults to the operation).
    #[serde(default)]
    pub tool_name: Option<String>,
}

impl WriteOptions {
    pub fn for_intent(intent_id: impl Into<String>) -> Self {
        Self {
            intent_id: Some(intent_id.into()),
            ..Self::default()
        }
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }
}

/// Per-item result of a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BatchItem {
    Created { task: Task },
    Updated { task: Task },
    Deleted { id: String },
    Failed { index: usize, error: EngineError },
}

impl BatchItem {
    pub fn is_failed(&self) -> bool {
        matches!(self, BatchItem::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub items: Vec<BatchItem>,
    pub succeeded: usize,
    pub failed: usize,
}

impl TaskEngine {
    pub async fn create_task(&self, input: NewTask) -> EngineResult<Task> {
        let outcome = self
            .batch(vec![BatchOp::Create { task: input }], WriteOptions::default())
            .await?;
        match outcome.items.into_iter().next() {
            Some(BatchItem::Created { task }) => Ok(task),
            _ => Err(EngineError::internal("create produced no task")),
        }
    }

    pub async fn update_task(&self, task_id: &str, patch: TaskPatch) -> EngineResult<Task> {
        let op = BatchOp::Update {
            id: task_id.to_string(),
            patch,
        };
        let outcome = self.batch(vec![op], WriteOptions::default()).await?;
        match outcome.items.into_iter().next() {
            Some(BatchItem::Updated { task }) => Ok(task),
            _ => Err(EngineError::internal("update produced no task")),
        }
    }

    pub async fn delete_task(&self, task_id: &str, mode: DeleteMode) -> EngineResult<()> {
        let op = BatchOp::Delete {
            id: task_id.to_string(),
            mode,
        };
        self.batch(vec![op], WriteOptions::default()).await?;
        Ok(())
    }

    /// Apply several operations as one commit.
    ///
    /// Without `continue_on_error` the first failure rejects the batch and
    /// nothing is committed.
    pub async fn batch(&self, ops: Vec<BatchOp>, options: WriteOptions) -> EngineResult<BatchOutcome> {
        if ops.is_empty() {
            return Ok(BatchOutcome {
                items: Vec::new(),
                succeeded: 0,
                failed: 0,
            });
        }
        let operation = match ops.as_slice() {
            [single] => single.label(),
            _ => "batch",
        };
        let commit = Commit {
            parameters: serde_json::to_value(&ops).unwrap_or(Value::Null),
            intent_id: options.intent_id,
            tool_name: options.tool_name,
            ..Commit::new(operation)
        };
        let continue_on_error = options.continue_on_error;
        self.write(commit, move |graph| apply_batch(graph, ops, continue_on_error))
            .await
    }
}

#[derive(Default)]
struct Changes {
    created: Vec<String>,
    modified: Vec<String>,
}

impl Changes {
    fn modified(&mut self, id: &str) {
        if !self.modified.iter().any(|m| m == id) && !self.created.iter().any(|c| c == id) {
            self.modified.push(id.to_string());
        }
    }
}

fn apply_batch(
    graph: &mut TaskGraph,
    ops: Vec<BatchOp>,
    continue_on_error: bool,
) -> EngineResult<Applied<BatchOutcome>> {
    let mut changes = Changes::default();
    let mut items = Vec::with_capacity(ops.len());
    let mut failed = 0;

    for (index, op) in ops.into_iter().enumerate() {
        let result = match op {
            BatchOp::Create { task } => {
                create_in(graph, task, &mut changes).map(|task| BatchItem::Created { task })
            }
            BatchOp::Update { id, patch } => {
                update_in(graph, &id, patch, &mut changes).map(|task| BatchItem::Updated { task })
            }
            BatchOp::Delete { id, mode } => {
                delete_in(graph, &id, mode, &mut changes).map(|id| BatchItem::Deleted { id })
            }
        };
        match result {
            Ok(item) => items.push(item),
            Err(error) if continue_on_error => {
                warn!(index, code = ?error.code, "Batch item failed: {}", error.message);
                failed += 1;
                items.push(BatchItem::Failed { index, error });
            }
            Err(error) => return Err(error),
        }
    }

    let succeeded = items.len() - failed;
    Ok(Applied {
        value: BatchOutcome {
            items,
            succeeded,
            failed,
        },
        created: changes.created,
        modified: changes.modified,
    })
}

fn require_task<'g>(graph: &'g TaskGraph, id: &str, field: &str) -> EngineResult<&'g Task> {
    graph
        .tasks
        .get(id)
        .ok_or_else(|| EngineError::task_not_found(id).with_field(field))
}

fn validate_new_id(id: &str) -> EngineResult<()> {
    if id.is_empty() || id.chars().any(char::is_whitespace) || id.starts_with('#') {
        return Err(EngineError::new(
            ErrorCode::MalformedId,
            format!("Task id '{}' must be non-empty, without whitespace or a leading '#'", id),
        )
        .with_field("id"));
    }
    Ok(())
}

fn validate_date(field: &str, value: &str) -> EngineResult<()> {
    if is_valid_date(value) {
        Ok(())
    } else {
        Err(EngineError::invalid_value(
            field,
            &format!("'{}' is not an ISO 8601 date", value),
        ))
    }
}

/// Dependencies must exist, must not include the task itself, and are
/// deduplicated in order.
fn validate_dependencies(graph: &TaskGraph, task_id: &str, deps: &[String]) -> EngineResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(deps.len());
    for dep in deps {
        if dep == task_id {
            return Err(EngineError::invalid_value(
                "dependencies",
                "a task cannot depend on itself",
            ));
        }
        require_task(graph, dep, "dependencies")?;
        if !out.contains(dep) {
            out.push(dep.clone());
        }
    }
    Ok(out)
}

fn link_dependencies(graph: &mut TaskGraph, task_id: &str, deps: &[String]) {
    for dep in deps {
        if let Some(target) = graph.tasks.get_mut(dep) {
            if !target.blocked_by.iter().any(|b| b == task_id) {
                target.blocked_by.push(task_id.to_string());
            }
        }
    }
}

fn unlink_dependencies(graph: &mut TaskGraph, task_id: &str, deps: &[String]) {
    for dep in deps {
        if let Some(target) = graph.tasks.get_mut(dep) {
            target.blocked_by.retain(|b| b != task_id);
        }
    }
}

fn link_parent(graph: &mut TaskGraph, task_id: &str, parent_id: &str) {
    if let Some(parent) = graph.tasks.get_mut(parent_id) {
        if !parent.subtasks.iter().any(|s| s == task_id) {
            parent.subtasks.push(task_id.to_string());
        }
    }
}

fn unlink_parent(graph: &mut TaskGraph, task_id: &str, parent_id: &str) {
    if let Some(parent) = graph.tasks.get_mut(parent_id) {
        parent.subtasks.retain(|s| s != task_id);
    }
}

/// Whether `candidate` is `task_id` or one of its descendants.
fn is_descendant(graph: &TaskGraph, task_id: &str, candidate: &str) -> bool {
    let mut current = Some(candidate.to_string());
    let mut steps = 0;
    while let Some(id) = current {
        if id == task_id {
            return true;
        }
        steps += 1;
        if steps > graph.tasks.len() {
            return false;
        }
        current = graph.tasks.get(&id).and_then(|t| t.parent_task_id.clone());
    }
    false
}

fn create_in(graph: &mut TaskGraph, input: NewTask, changes: &mut Changes) -> EngineResult<Task> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(EngineError::missing_field("title"));
    }
    let id = match input.id {
        Some(id) => {
            validate_new_id(&id)?;
            id
        }
        None => Uuid::now_v7().to_string(),
    };
    if graph.has_entry(&id) {
        return Err(EngineError::already_exists(&id));
    }
    if let Some(due) = &input.due_date {
        validate_date("due_date", due)?;
    }
    let dependencies = validate_dependencies(graph, &id, &input.dependencies)?;
    if let Some(parent) = &input.parent_task_id {
        require_task(graph, parent, "parent_task_id")?;
    }

    let mut task = Task::new(&id, title);
    task.description = input.description;
    task.status = input.status.unwrap_or_default();
    task.priority = input.priority.unwrap_or_default();
    task.due_date = input.due_date;
    task.dependencies = dependencies;
    task.parent_task_id = input.parent_task_id;
    task.tags = input.tags;
    task.assignee = input.assignee;
    task.category = input.category;
    task.metadata = input.metadata;
    if task.status.is_completed() {
        task.completed_at = task.created_at.clone();
    }

    link_dependencies(graph, &id, &task.dependencies);
    if let Some(parent) = &task.parent_task_id {
        link_parent(graph, &id, parent);
    }
    graph.tasks.insert(id.clone(), task.clone());
    graph.place_in_section(&id, &task.status);
    changes.created.push(id);
    Ok(task)
}

fn update_in(
    graph: &mut TaskGraph,
    task_id: &str,
    patch: TaskPatch,
    changes: &mut Changes,
) -> EngineResult<Task> {
    let before = require_task(graph, task_id, "id")?.clone();
    let mut task = before.clone();
    let mut fields: Vec<String> = Vec::new();

    if let Some(title) = patch.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(EngineError::invalid_value("title", "must not be empty"));
        }
        if title != task.title {
            task.title = title.to_string();
            fields.push("title".into());
        }
    }
    if let Some(description) = patch.description {
        if description != task.description {
            task.description = description;
            fields.push("description".into());
        }
    }
    if let Some(status) = patch.status {
        if status != task.status {
            task.completed_at = if status.is_completed() {
                Some(now_iso())
            } else {
                None
            };
            task.status = status;
            fields.push("status".into());
        }
    }
    if let Some(priority) = patch.priority {
        if priority != task.priority {
            task.priority = priority;
            fields.push("priority".into());
        }
    }
    if let Some(due_date) = patch.due_date {
        if let Some(due) = &due_date {
            validate_date("due_date", due)?;
        }
        if due_date != task.due_date {
            task.due_date = due_date;
            fields.push("dueDate".into());
        }
    }
    if let Some(archived) = patch.archived {
        if archived != task.archived {
            task.archived = archived;
            fields.push("archived".into());
        }
    }
    if let Some(deps) = patch.dependencies {
        let deps = validate_dependencies(graph, task_id, &deps)?;
        if deps != task.dependencies {
            task.dependencies = deps;
            fields.push("dependencies".into());
        }
    }
    if let Some(parent) = patch.parent_task_id {
        if let Some(parent_id) = &parent {
            require_task(graph, parent_id, "parent_task_id")?;
            if is_descendant(graph, task_id, parent_id) {
                return Err(EngineError::invalid_value(
                    "parent_task_id",
                    "a task cannot be nested under itself or its own subtask",
                ));
            }
        }
        if parent != task.parent_task_id {
            task.parent_task_id = parent;
            fields.push("parentTaskId".into());
        }
    }
    if let Some(tags) = patch.tags {
        if tags != task.tags {
            task.tags = tags;
            fields.push("tags".into());
        }
    }
    if let Some(assignee) = patch.assignee {
        if assignee != task.assignee {
            task.assignee = assignee;
            fields.push("assignee".into());
        }
    }
    if let Some(category) = patch.category {
        if category != task.category {
            task.category = category;
            fields.push("category".into());
        }
    }
    if let Some(entries) = patch.metadata {
        let merged = merge_metadata(&task.metadata, entries);
        if merged != task.metadata {
            task.metadata = merged;
            fields.push("metadata".into());
        }
    }

    if fields.is_empty() && patch.note.is_none() {
        return Ok(before);
    }

    // Validation is done; from here on the working copy changes
    if task.dependencies != before.dependencies {
        unlink_dependencies(graph, task_id, &before.dependencies);
        link_dependencies(graph, task_id, &task.dependencies);
    }
    if task.parent_task_id != before.parent_task_id {
        if let Some(old) = &before.parent_task_id {
            unlink_parent(graph, task_id, old);
        }
        if let Some(new) = &task.parent_task_id {
            link_parent(graph, task_id, new);
        }
    }
    if task.status != before.status {
        graph.place_in_section(task_id, &task.status);
    }

    task.touch("updated", fields, patch.note);
    graph.tasks.insert(task_id.to_string(), task.clone());
    changes.modified(task_id);
    Ok(task)
}

/// `null` values remove keys; everything else is inserted or replaced.
fn merge_metadata(
    current: &BTreeMap<String, Value>,
    entries: BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut merged = current.clone();
    for (key, value) in entries {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }
    merged
}

fn delete_in(
    graph: &mut TaskGraph,
    task_id: &str,
    mode: DeleteMode,
    changes: &mut Changes,
) -> EngineResult<String> {
    let task = require_task(graph, task_id, "id")?.clone();

    let referrers: Vec<String> = graph
        .tasks
        .values()
        .filter(|t| t.id != task_id)
        .filter(|t| {
            t.dependencies.iter().any(|d| d == task_id)
                || t.parent_task_id.as_deref() == Some(task_id)
                || t.subtasks.iter().any(|s| s == task_id)
        })
        .map(|t| t.id.clone())
        .collect();

    if mode == DeleteMode::Restrict && !referrers.is_empty() {
        return Err(EngineError::dependency_referenced(task_id, &referrers));
    }

    let note = Some(format!("Deleted task {}", task_id));
    for other in graph.tasks.values_mut().filter(|t| t.id != task_id) {
        let mut fields: Vec<String> = Vec::new();
        if other.dependencies.iter().any(|d| d == task_id) {
            other.dependencies.retain(|d| d != task_id);
            fields.push("dependencies".into());
        }
        if other.parent_task_id.as_deref() == Some(task_id) {
            other.parent_task_id = None;
            fields.push("parentTaskId".into());
        }
        other.blocked_by.retain(|b| b != task_id);
        other.subtasks.retain(|s| s != task_id);
        if !fields.is_empty() {
            other.touch("reference_removed", fields, note.clone());
            if !changes.modified.iter().any(|m| m == &other.id) {
                changes.modified.push(other.id.clone());
            }
        }
    }

    graph.tasks.remove(task_id);
    graph.remove_from_sections(task_id);
    changes.created.retain(|c| c != task_id);
    changes.modified(&task.id);
    Ok(task.id)
}
