//! Core types for the task store.

use chrono::{SecondsFormat, Utc};
use heck::ToTitleCase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Format version written into every persisted document.
pub const STORE_FORMAT_VERSION: &str = "1.0.0";

/// Sections every fresh graph starts with, in display order.
pub const DEFAULT_SECTIONS: &[&str] = &["pending", "in_progress", "blocked", "completed"];

/// Current time as an ISO 8601 string with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Task status. Unknown strings are kept as `Custom` so domain-specific
/// states survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
    Custom(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Custom(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "pending" | "todo" => TaskStatus::Pending,
            "in_progress" => TaskStatus::InProgress,
            "completed" | "done" => TaskStatus::Completed,
            "blocked" => TaskStatus::Blocked,
            "cancelled" | "canceled" => TaskStatus::Cancelled,
            _ => TaskStatus::Custom(s.to_string()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        TaskStatus::parse(&s)
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority, ordered from least to most important. Decoding accepts
/// any casing and the `urgent` alias.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Parse a priority string. Returns `None` for unrecognized values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" | "urgent" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl TryFrom<String> for Priority {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Priority::parse(&s).ok_or_else(|| format!("unknown priority '{}'", s))
    }
}

/// One entry of a task's append-only change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub timestamp: String,
    pub action: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A task in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,

    // Timestamps are kept as strings so malformed values can be reported
    // instead of failing the whole load.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,

    #[serde(default)]
    pub archived: bool,

    // Graph edges
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Inverse of `dependencies`: tasks that list this one as a dependency.
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,

    // Categorization
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Typed extension point for caller-defined attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    #[serde(default = "default_task_version")]
    pub version: u64,
    #[serde(default)]
    pub change_log: Vec<ChangeLogEntry>,
}

fn default_task_version() -> u64 {
    1
}

impl Task {
    /// Build a fresh pending task stamped with the current time.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_iso();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            created_at: Some(now.clone()),
            updated_at: Some(now.clone()),
            due_date: None,
            completed_at: None,
            archived: false,
            dependencies: Vec::new(),
            blocked_by: Vec::new(),
            parent_task_id: None,
            subtasks: Vec::new(),
            tags: Vec::new(),
            assignee: None,
            category: None,
            metadata: BTreeMap::new(),
            version: 1,
            change_log: vec![ChangeLogEntry {
                timestamp: now,
                action: "created".to_string(),
                fields: Vec::new(),
                note: None,
            }],
        }
    }

    /// Stamp a mutation: bump version, refresh `updatedAt`, append to the change log.
    pub fn touch(&mut self, action: &str, fields: Vec<String>, note: Option<String>) {
        let now = now_iso();
        self.version += 1;
        self.updated_at = Some(now.clone());
        self.change_log.push(ChangeLogEntry {
            timestamp: now,
            action: action.to_string(),
            fields,
            note,
        });
    }
}

/// A named, ordered bucket of task ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl Section {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let title = id.to_title_case();
        Self {
            id,
            title,
            tasks: Vec::new(),
        }
    }
}

/// Denormalized aggregate facts about the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub completed_tasks: usize,
    #[serde(default)]
    pub last_updated: Option<String>,
    /// Commit counter; cache entries are tagged with it.
    #[serde(default)]
    pub revision: u64,
}

/// Bookkeeping for the external scoring collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringSync {
    #[serde(default)]
    pub last_score_update: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One committed write, kept in the bounded operation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    pub operation: String,
    #[serde(default)]
    pub task_ids: Vec<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
}

/// Aggregate root: tasks, sections and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGraph {
    #[serde(default = "default_format_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub scoring_sync: ScoringSync,
    #[serde(default)]
    pub automation_rules: Vec<Value>,
    #[serde(default)]
    pub templates: Vec<Value>,
    #[serde(default)]
    pub recurring_tasks: Vec<Value>,
    #[serde(default)]
    pub operation_history: Vec<OperationRecord>,
    /// Task entries that could not be decoded, verbatim. They are written
    /// back on save and count as existing for reference checks.
    #[serde(skip)]
    pub unparsed_tasks: BTreeMap<String, Value>,
}

fn default_format_version() -> String {
    STORE_FORMAT_VERSION.to_string()
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self {
            version: default_format_version(),
            metadata: Metadata {
                last_updated: Some(now_iso()),
                ..Metadata::default()
            },
            tasks: BTreeMap::new(),
            sections: DEFAULT_SECTIONS.iter().map(|s| Section::new(*s)).collect(),
            scoring_sync: ScoringSync::default(),
            automation_rules: Vec::new(),
            templates: Vec::new(),
            recurring_tasks: Vec::new(),
            operation_history: Vec::new(),
            unparsed_tasks: BTreeMap::new(),
        }
    }
}

impl TaskGraph {
    /// Whether `id` names a task entry, decoded or not.
    pub fn has_entry(&self, id: &str) -> bool {
        self.tasks.contains_key(id) || self.unparsed_tasks.contains_key(id)
    }

    /// Count of tasks whose status is completed.
    pub fn completed_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status.is_completed()).count()
    }

    /// Overwrite both metadata totals from the task map.
    pub fn recount(&mut self) {
        self.metadata.total_tasks = self.tasks.len();
        self.metadata.completed_tasks = self.completed_count();
    }

    /// Index of the section a task with this status belongs in, creating
    /// the section when no section carries the status id.
    pub fn section_index_for(&mut self, status: &TaskStatus) -> usize {
        if let Some(idx) = self.sections.iter().position(|s| s.id == status.as_str()) {
            return idx;
        }
        self.sections.push(Section::new(status.as_str()));
        self.sections.len() - 1
    }

    /// Move a task id into the section matching its status, removing it
    /// from every other section.
    pub fn place_in_section(&mut self, task_id: &str, status: &TaskStatus) {
        for section in &mut self.sections {
            section.tasks.retain(|id| id != task_id);
        }
        let idx = self.section_index_for(status);
        self.sections[idx].tasks.push(task_id.to_string());
    }

    /// Remove a task id from every section.
    pub fn remove_from_sections(&mut self, task_id: &str) {
        for section in &mut self.sections {
            section.tasks.retain(|id| id != task_id);
        }
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// Custom task id (optional, UUID7 generated if not provided)
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update for a task. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<Option<String>>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub parent_task_id: Option<Option<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub assignee: Option<Option<String>>,
    #[serde(default)]
    pub category: Option<Option<String>>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
    /// Free-form note recorded in the change log.
    #[serde(default)]
    pub note: Option<String>,
}

/// Aggregate statistics over the committed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub archived_tasks: usize,
    pub overdue_tasks: usize,
    pub completion_rate: f64,
    pub tasks_by_status: BTreeMap<String, usize>,
    pub tasks_by_priority: BTreeMap<String, usize>,
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_known_and_custom_values() {
        assert_eq!(TaskStatus::parse("in-progress"), TaskStatus::InProgress);
        assert_eq!(TaskStatus::parse("Done"), TaskStatus::Completed);
        let custom: TaskStatus = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(custom, TaskStatus::Custom("review".to_string()));
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"review\"");
    }

    #[test]
    fn priority_is_ordered() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::parse("urgent"), Some(Priority::Critical));
        assert_eq!(Priority::parse("someday"), None);
    }

    #[test]
    fn priority_decodes_leniently() {
        let urgent: Priority = serde_json::from_str("\"urgent\"").unwrap();
        assert_eq!(urgent, Priority::Critical);
        let high: Priority = serde_json::from_str("\"High\"").unwrap();
        assert_eq!(high, Priority::High);
        assert_eq!(serde_json::to_string(&high).unwrap(), "\"high\"");
        assert!(serde_json::from_str::<Priority>("\"someday\"").is_err());
    }

    #[test]
    fn default_graph_has_titled_sections() {
        let graph = TaskGraph::default();
        let titles: Vec<_> = graph.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Pending", "In Progress", "Blocked", "Completed"]);
    }

    #[test]
    fn place_in_section_moves_between_sections() {
        let mut graph = TaskGraph::default();
        graph.place_in_section("t1", &TaskStatus::Pending);
        graph.place_in_section("t1", &TaskStatus::Completed);
        let holders: Vec<_> = graph
            .sections
            .iter()
            .filter(|s| s.tasks.iter().any(|id| id == "t1"))
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(holders, vec!["completed"]);
    }

    #[test]
    fn place_in_section_creates_custom_section() {
        let mut graph = TaskGraph::default();
        graph.place_in_section("t1", &TaskStatus::Custom("review".into()));
        assert_eq!(graph.sections.last().unwrap().id, "review");
        assert_eq!(graph.sections.last().unwrap().title, "Review");
    }

    #[test]
    fn touch_bumps_version_and_logs() {
        let mut task = Task::new("t1", "Write docs");
        task.touch("updated", vec!["title".into()], None);
        assert_eq!(task.version, 2);
        assert_eq!(task.change_log.len(), 2);
        assert_eq!(task.change_log[1].fields, vec!["title".to_string()]);
    }
}
