//! Integrity checking and repair for task graphs.
//!
//! Checking is two-phase: [`rules`] collects findings without touching the
//! graph, then [`repair`] applies the remediations attached to fixable
//! findings. Auto-fix never re-validates; calling [`check`] again on a
//! repaired graph reports zero fixes.
//!
//! Entry points:
//! - [`check`] / [`validate`] for a typed [`TaskGraph`]
//! - [`check_document`] for a raw JSON document, which can also report
//!   malformed containers (non-map `tasks`, non-list `sections`, null task
//!   values) that a typed graph cannot represent
//! - [`quick_check`], a boolean-only variant for hot paths

mod document;
mod repair;
mod rules;

pub use document::{DocumentCheck, check_document};
pub use rules::quick_check;
pub(crate) use rules::{is_valid_date, parse_date};

use crate::types::{TaskGraph, TaskStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Machine-readable finding codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCode {
    // Referential integrity
    OrphanedTaskReference,
    TaskNotInSection,
    DuplicateTaskReference,
    // Metadata accuracy
    MetadataMismatch,
    // Dependencies and hierarchy
    MissingDependency,
    CircularDependency,
    MissingParent,
    MissingSubtask,
    // Field integrity
    EmptyTitle,
    IdMismatch,
    InvalidDate,
    MissingTimestamp,
    // Malformed containers
    MalformedDocument,
    MalformedTasks,
    MalformedSections,
    MalformedSection,
    MalformedSectionTasks,
    MalformedMetadata,
    NullTask,
    InvalidTask,
    // External collaborators
    StaleScoringSync,
}

/// A remediation attached to a fixable finding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Remedy {
    RemoveReference { section_index: usize, task_id: String },
    DropDuplicates { task_id: String },
    AddToSection { task_id: String, status: TaskStatus },
    RecountMetadata,
    /// Applied directly to a raw document; the typed graph already holds an empty list.
    InitSectionTasks { section_index: usize, section_id: String },
    /// Applied directly to a raw document; the typed graph never holds the entries.
    DropNonStringEntries { section_index: usize, section_id: String },
}

/// One detected violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub code: FindingCode,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip)]
    pub(crate) remedy: Option<Remedy>,
}

impl Finding {
    pub(crate) fn error(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            task_id: None,
            remedy: None,
        }
    }

    pub(crate) fn warning(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    pub(crate) fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub(crate) fn fixable(mut self, remedy: Remedy) -> Self {
        self.remedy = Some(remedy);
        self
    }

    /// Whether auto-fix can repair this finding.
    pub fn is_fixable(&self) -> bool {
        self.remedy.is_some()
    }
}

/// Options for a check run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOptions {
    #[serde(default)]
    pub auto_fix: bool,
}

impl CheckOptions {
    pub fn auto_fix() -> Self {
        Self { auto_fix: true }
    }
}

/// Outcome of a check run.
///
/// Findings that were repaired appear only in `fixed_issues`, never in
/// `errors` or `warnings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub is_valid: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub fixed_issues: Vec<String>,
}

impl CheckReport {
    /// Error findings with the given code.
    pub fn errors_with(&self, code: FindingCode) -> Vec<&Finding> {
        self.errors.iter().filter(|f| f.code == code).collect()
    }

    /// Warning findings with the given code.
    pub fn warnings_with(&self, code: FindingCode) -> Vec<&Finding> {
        self.warnings.iter().filter(|f| f.code == code).collect()
    }

    pub(crate) fn from_findings(findings: Vec<Finding>, fixed_issues: Vec<String>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = findings
            .into_iter()
            .partition(|f| f.severity == Severity::Error);
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            fixed_issues,
        }
    }
}

/// Which containers of a graph are sound enough to check.
///
/// A typed graph is always fully in scope; raw documents may exclude
/// containers that failed to decode.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    pub tasks: bool,
    pub sections: bool,
    pub metadata: bool,
    /// Undecodable task entries were already reported while decoding.
    pub decode_errors_reported: bool,
}

impl Scope {
    pub fn full() -> Self {
        Self {
            tasks: true,
            sections: true,
            metadata: true,
            decode_errors_reported: false,
        }
    }
}

/// Check a graph without modifying it.
pub fn validate(graph: &TaskGraph) -> CheckReport {
    CheckReport::from_findings(rules::collect(graph, &Scope::full()), Vec::new())
}

/// Check a graph, applying every available remediation when `auto_fix` is set.
pub fn check(graph: &mut TaskGraph, options: CheckOptions) -> CheckReport {
    let findings = rules::collect(graph, &Scope::full());
    if !options.auto_fix {
        return CheckReport::from_findings(findings, Vec::new());
    }

    let (fixable, remaining): (Vec<_>, Vec<_>) =
        findings.into_iter().partition(Finding::is_fixable);
    let fixed = repair::apply(graph, &fixable);
    debug!(
        fixed = fixed.len(),
        remaining = remaining.len(),
        "Consistency check applied fixes"
    );
    CheckReport::from_findings(remaining, fixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Section, Task, TaskStatus};

    fn graph_with(tasks: &[(&str, TaskStatus)], sections: Vec<Section>) -> TaskGraph {
        let mut graph = TaskGraph {
            sections,
            ..TaskGraph::default()
        };
        for (id, status) in tasks {
            let mut task = Task::new(*id, format!("Task {}", id));
            task.status = status.clone();
            graph.tasks.insert(id.to_string(), task);
        }
        graph.recount();
        graph
    }

    fn section(id: &str, tasks: &[&str]) -> Section {
        Section {
            tasks: tasks.iter().map(|s| s.to_string()).collect(),
            ..Section::new(id)
        }
    }

    #[test]
    fn ghost_reference_is_removed_with_one_fix() {
        let mut graph = graph_with(
            &[("t1", TaskStatus::Pending)],
            vec![section("pending", &["t1", "ghost"])],
        );

        let report = check(&mut graph, CheckOptions::auto_fix());

        let orphan_fixes: Vec<_> = report
            .fixed_issues
            .iter()
            .filter(|f| f.contains("orphaned task reference"))
            .collect();
        assert_eq!(orphan_fixes.len(), 1);
        assert_eq!(report.fixed_issues.len(), 1);
        assert_eq!(graph.sections[0].tasks, vec!["t1".to_string()]);
        assert!(report.is_valid);
    }

    #[test]
    fn auto_fix_is_idempotent() {
        let mut graph = graph_with(
            &[
                ("a", TaskStatus::Pending),
                ("b", TaskStatus::Completed),
                ("c", TaskStatus::InProgress),
            ],
            vec![
                section("pending", &["a", "ghost", "b"]),
                section("completed", &["b", "b"]),
            ],
        );
        graph.metadata.total_tasks = 9;

        let first = check(&mut graph, CheckOptions::auto_fix());
        assert!(!first.fixed_issues.is_empty());

        let second = check(&mut graph, CheckOptions::auto_fix());
        assert!(second.fixed_issues.is_empty(), "{:?}", second.fixed_issues);
        assert!(second.is_valid);
    }

    #[test]
    fn every_task_in_exactly_one_section_after_fix() {
        let mut graph = graph_with(
            &[
                ("a", TaskStatus::Pending),
                ("b", TaskStatus::Completed),
                ("c", TaskStatus::Custom("review".into())),
            ],
            vec![section("pending", &["a", "b"]), section("completed", &["b", "a"])],
        );

        check(&mut graph, CheckOptions::auto_fix());

        for id in graph.tasks.keys() {
            let occurrences: usize = graph
                .sections
                .iter()
                .map(|s| s.tasks.iter().filter(|t| *t == id).count())
                .sum();
            assert_eq!(occurrences, 1, "task {} appears {} times", id, occurrences);
        }
        // First occurrence wins for duplicates
        assert_eq!(graph.sections[0].tasks, vec!["a", "b"]);
        assert!(graph.sections.iter().any(|s| s.id == "review"));
    }

    #[test]
    fn metadata_fix_is_atomic_and_not_reported_as_warning() {
        let mut graph = graph_with(
            &[("a", TaskStatus::Completed), ("b", TaskStatus::Pending)],
            vec![section("completed", &["a"]), section("pending", &["b"])],
        );
        graph.metadata.total_tasks = 5;
        graph.metadata.completed_tasks = 0;

        let report = check(&mut graph, CheckOptions::auto_fix());

        assert_eq!(graph.metadata.total_tasks, 2);
        assert_eq!(graph.metadata.completed_tasks, 1);
        assert!(report.warnings_with(FindingCode::MetadataMismatch).is_empty());
        assert_eq!(report.fixed_issues.len(), 1);
    }

    #[test]
    fn metadata_mismatch_is_warning_without_fix() {
        let mut graph = graph_with(&[("a", TaskStatus::Pending)], vec![section("pending", &["a"])]);
        graph.metadata.total_tasks = 3;

        let report = validate(&graph);
        assert!(report.is_valid);
        assert_eq!(report.warnings_with(FindingCode::MetadataMismatch).len(), 1);
    }

    #[test]
    fn two_and_three_node_cycles_are_flagged() {
        let mut graph = graph_with(
            &[
                ("a", TaskStatus::Pending),
                ("b", TaskStatus::Pending),
                ("x", TaskStatus::Pending),
                ("y", TaskStatus::Pending),
                ("z", TaskStatus::Pending),
            ],
            vec![section("pending", &["a", "b", "x", "y", "z"])],
        );
        graph.tasks.get_mut("a").unwrap().dependencies = vec!["b".into()];
        graph.tasks.get_mut("b").unwrap().dependencies = vec!["a".into()];
        graph.tasks.get_mut("x").unwrap().dependencies = vec!["y".into()];
        graph.tasks.get_mut("y").unwrap().dependencies = vec!["z".into()];
        graph.tasks.get_mut("z").unwrap().dependencies = vec!["x".into()];

        let report = check(&mut graph, CheckOptions::auto_fix());

        let cycles = report.errors_with(FindingCode::CircularDependency);
        assert_eq!(cycles.len(), 2);
        assert!(cycles.iter().any(|c| c.message.contains("a -> b -> a")));
        assert!(cycles.iter().any(|c| c.message.contains("x -> y -> z -> x")));
        // Cycles are reported, never broken
        assert_eq!(graph.tasks["a"].dependencies, vec!["b".to_string()]);
        assert!(report.fixed_issues.is_empty());
    }

    #[test]
    fn missing_dependency_parent_and_subtask_are_errors() {
        let mut graph = graph_with(&[("a", TaskStatus::Pending)], vec![section("pending", &["a"])]);
        let task = graph.tasks.get_mut("a").unwrap();
        task.dependencies = vec!["nope".into()];
        task.parent_task_id = Some("missing-parent".into());
        task.subtasks = vec!["missing-child".into()];

        let report = validate(&graph);
        assert!(!report.is_valid);
        assert_eq!(report.errors_with(FindingCode::MissingDependency).len(), 1);
        assert_eq!(report.errors_with(FindingCode::MissingParent).len(), 1);
        assert_eq!(report.errors_with(FindingCode::MissingSubtask).len(), 1);
    }

    #[test]
    fn field_integrity_findings() {
        let mut graph = graph_with(
            &[("a", TaskStatus::Pending), ("b", TaskStatus::Pending)],
            vec![section("pending", &["a", "b"])],
        );
        let a = graph.tasks.get_mut("a").unwrap();
        a.title = "   ".into();
        a.due_date = Some("next tuesday".into());
        let b = graph.tasks.get_mut("b").unwrap();
        b.id = "not-b".into();
        b.created_at = None;

        let report = validate(&graph);
        assert_eq!(report.errors_with(FindingCode::EmptyTitle).len(), 1);
        assert_eq!(report.errors_with(FindingCode::InvalidDate).len(), 1);
        assert_eq!(report.errors_with(FindingCode::IdMismatch).len(), 1);
        assert_eq!(report.warnings_with(FindingCode::MissingTimestamp).len(), 1);
    }

    #[test]
    fn stale_scoring_sync_is_warning() {
        let mut graph = graph_with(&[], vec![section("pending", &[])]);
        graph.metadata.last_updated = Some("2025-06-01T00:00:00Z".into());
        graph.scoring_sync.last_score_update = Some("2025-05-01T00:00:00Z".into());

        let report = check(&mut graph, CheckOptions::auto_fix());
        assert_eq!(report.warnings_with(FindingCode::StaleScoringSync).len(), 1);
        assert!(report.fixed_issues.is_empty());
    }

    #[test]
    fn full_check_over_thousand_tasks_is_fast() {
        let ids: Vec<String> = (0..1000).map(|i| format!("task-{:04}", i)).collect();
        let mut graph = TaskGraph::default();
        for (i, id) in ids.iter().enumerate() {
            let mut task = Task::new(id.clone(), format!("Task number {}", i));
            if i > 0 {
                task.dependencies = vec![ids[i - 1].clone()];
            }
            graph.tasks.insert(id.clone(), task);
            graph.place_in_section(id, &TaskStatus::Pending);
        }
        graph.recount();

        let start = std::time::Instant::now();
        let report = check(&mut graph, CheckOptions::auto_fix());
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        assert!(report.is_valid);
    }

    #[test]
    fn quick_check_over_five_thousand_tasks_is_fast() {
        let mut graph = TaskGraph::default();
        for i in 0..5000 {
            let id = format!("task-{:05}", i);
            graph.tasks.insert(id.clone(), Task::new(id.clone(), "Quick"));
            graph.place_in_section(&id, &TaskStatus::Pending);
        }
        graph.recount();

        let start = std::time::Instant::now();
        assert!(quick_check(&graph));
        assert!(start.elapsed() < std::time::Duration::from_millis(100));

        graph.sections[0].tasks.push("ghost".into());
        assert!(!quick_check(&graph));
    }
}
