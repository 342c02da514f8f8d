//! Detection rules. Everything here is pure: findings are collected, never applied.

use super::{Finding, FindingCode, Remedy, Scope};
use crate::types::TaskGraph;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};

/// Run every rule the scope allows.
pub(crate) fn collect(graph: &TaskGraph, scope: &Scope) -> Vec<Finding> {
    let mut findings = Vec::new();

    if scope.tasks && scope.sections {
        referential(graph, &mut findings);
    }
    if scope.tasks && scope.metadata {
        metadata(graph, &mut findings);
    }
    if scope.tasks {
        dependencies(graph, &mut findings);
        cycles(graph, &mut findings);
        hierarchy(graph, &mut findings);
        if !scope.decode_errors_reported {
            unparsed(graph, &mut findings);
        }
        fields(graph, &mut findings);
    }
    if scope.metadata {
        scoring_sync(graph, &mut findings);
    }

    findings
}

fn referential(graph: &TaskGraph, out: &mut Vec<Finding>) {
    let known = |id: &str| graph.has_entry(id);

    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    let mut orphans: HashSet<(usize, &str)> = HashSet::new();

    for (idx, section) in graph.sections.iter().enumerate() {
        for id in &section.tasks {
            if !known(id) {
                if orphans.insert((idx, id.as_str())) {
                    out.push(
                        Finding::error(
                            FindingCode::OrphanedTaskReference,
                            format!(
                                "Section '{}' references missing task '{}'",
                                section.id, id
                            ),
                        )
                        .for_task(id.clone())
                        .fixable(Remedy::RemoveReference {
                            section_index: idx,
                            task_id: id.clone(),
                        }),
                    );
                }
                continue;
            }
            let count = occurrences.entry(id.as_str()).or_insert(0);
            if *count == 0 {
                first_seen.push(id.as_str());
            }
            *count += 1;
        }
    }

    for id in first_seen {
        let count = occurrences[id];
        if count > 1 {
            out.push(
                Finding::error(
                    FindingCode::DuplicateTaskReference,
                    format!("Task '{}' is listed {} times across sections", id, count),
                )
                .for_task(id)
                .fixable(Remedy::DropDuplicates {
                    task_id: id.to_string(),
                }),
            );
        }
    }

    for (id, task) in &graph.tasks {
        if !occurrences.contains_key(id.as_str()) {
            out.push(
                Finding::error(
                    FindingCode::TaskNotInSection,
                    format!("Task '{}' is not listed in any section", id),
                )
                .for_task(id.clone())
                .fixable(Remedy::AddToSection {
                    task_id: id.clone(),
                    status: task.status.clone(),
                }),
            );
        }
    }
}

fn metadata(graph: &TaskGraph, out: &mut Vec<Finding>) {
    let total = graph.tasks.len();
    let completed = graph.completed_count();
    let meta = &graph.metadata;
    if meta.total_tasks != total || meta.completed_tasks != completed {
        out.push(
            Finding::warning(
                FindingCode::MetadataMismatch,
                format!(
                    "Metadata reports {} total / {} completed, actual {} / {}",
                    meta.total_tasks, meta.completed_tasks, total, completed
                ),
            )
            .fixable(Remedy::RecountMetadata),
        );
    }
}

fn dependencies(graph: &TaskGraph, out: &mut Vec<Finding>) {
    for (id, task) in &graph.tasks {
        for dep in &task.dependencies {
            if !graph.has_entry(dep) {
                out.push(
                    Finding::error(
                        FindingCode::MissingDependency,
                        format!("Task '{}' depends on missing task '{}'", id, dep),
                    )
                    .for_task(id.clone()),
                );
            }
        }
    }
}

/// Depth-first traversal over `dependencies` edges with an explicit
/// recursion stack. An edge back into the active stack is a cycle; each
/// distinct cycle is reported once, rotated to start at its smallest id.
fn cycles(graph: &TaskGraph, out: &mut Vec<Finding>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(graph.tasks.len());
    let mut reported: HashSet<Vec<&str>> = HashSet::new();

    for root in graph.tasks.keys() {
        if marks.contains_key(root.as_str()) {
            continue;
        }

        // (node, index of next edge to explore)
        let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
        marks.insert(root.as_str(), Mark::Active);

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let edges = graph
                .tasks
                .get(node)
                .map(|t| t.dependencies.as_slice())
                .unwrap_or(&[]);

            if next >= edges.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let target = edges[next].as_str();
            if !graph.tasks.contains_key(target) {
                continue;
            }
            match marks.get(target) {
                None => {
                    marks.insert(target, Mark::Active);
                    stack.push((target, 0));
                }
                Some(Mark::Active) => {
                    let start = stack
                        .iter()
                        .position(|(n, _)| *n == target)
                        .unwrap_or(0);
                    let mut cycle: Vec<&str> = stack[start..].iter().map(|(n, _)| *n).collect();
                    let min_pos = cycle
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, id)| **id)
                        .map(|(i, _)| i)
                        .unwrap_or(0);
                    cycle.rotate_left(min_pos);
                    if reported.insert(cycle.clone()) {
                        let mut path = cycle.clone();
                        path.push(cycle[0]);
                        out.push(
                            Finding::error(
                                FindingCode::CircularDependency,
                                format!("Circular dependency detected: {}", path.join(" -> ")),
                            )
                            .for_task(cycle[0]),
                        );
                    }
                }
                Some(Mark::Done) => {}
            }
        }
    }
}

fn hierarchy(graph: &TaskGraph, out: &mut Vec<Finding>) {
    let exists = |id: &str| graph.has_entry(id);
    for (id, task) in &graph.tasks {
        if let Some(parent) = &task.parent_task_id {
            if !exists(parent) {
                out.push(
                    Finding::error(
                        FindingCode::MissingParent,
                        format!("Task '{}' has missing parent '{}'", id, parent),
                    )
                    .for_task(id.clone()),
                );
            }
        }
        for child in &task.subtasks {
            if !exists(child) {
                out.push(
                    Finding::error(
                        FindingCode::MissingSubtask,
                        format!("Task '{}' lists missing subtask '{}'", id, child),
                    )
                    .for_task(id.clone()),
                );
            }
        }
    }
}

/// Entries kept verbatim are never repaired, only reported.
fn unparsed(graph: &TaskGraph, out: &mut Vec<Finding>) {
    for (key, raw) in &graph.unparsed_tasks {
        let (code, message) = if raw.is_null() {
            (FindingCode::NullTask, format!("Task entry '{}' is null", key))
        } else {
            (
                FindingCode::InvalidTask,
                format!("Task entry '{}' could not be decoded and is kept as stored", key),
            )
        };
        out.push(Finding::error(code, message).for_task(key.clone()));
    }
}

fn fields(graph: &TaskGraph, out: &mut Vec<Finding>) {
    for (key, task) in &graph.tasks {
        if task.title.trim().is_empty() {
            out.push(
                Finding::error(FindingCode::EmptyTitle, format!("Task '{}' has an empty title", key))
                    .for_task(key.clone()),
            );
        }
        if *key != task.id {
            out.push(
                Finding::error(
                    FindingCode::IdMismatch,
                    format!("Task stored under '{}' has id '{}'", key, task.id),
                )
                .for_task(key.clone()),
            );
        }

        let dates = [
            ("createdAt", &task.created_at),
            ("updatedAt", &task.updated_at),
            ("dueDate", &task.due_date),
            ("completedAt", &task.completed_at),
        ];
        for (field, value) in dates {
            if let Some(value) = value {
                if !is_valid_date(value) {
                    out.push(
                        Finding::error(
                            FindingCode::InvalidDate,
                            format!("Task '{}' has malformed {}: '{}'", key, field, value),
                        )
                        .for_task(key.clone()),
                    );
                }
            }
        }

        for (field, value) in [("createdAt", &task.created_at), ("updatedAt", &task.updated_at)] {
            if value.is_none() {
                out.push(
                    Finding::warning(
                        FindingCode::MissingTimestamp,
                        format!("Task '{}' is missing {}", key, field),
                    )
                    .for_task(key.clone()),
                );
            }
        }
    }
}

fn scoring_sync(graph: &TaskGraph, out: &mut Vec<Finding>) {
    let (Some(scored), Some(updated)) = (
        graph.scoring_sync.last_score_update.as_deref().and_then(parse_date),
        graph.metadata.last_updated.as_deref().and_then(parse_date),
    ) else {
        return;
    };
    if scored < updated {
        out.push(Finding::warning(
            FindingCode::StaleScoringSync,
            format!(
                "Scores last updated {} but tasks changed at {}",
                scored, updated
            ),
        ));
    }
}

/// Accepts RFC 3339 timestamps, naive date-times and plain dates.
pub(crate) fn is_valid_date(value: &str) -> bool {
    parse_date(value).is_some()
}

pub(crate) fn parse_date(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Boolean-only check for hot paths.
///
/// Covers section references, exactly-one-section membership, metadata
/// totals, id/key agreement, non-empty titles and dangling dependencies.
/// It does NOT detect dependency cycles, validate date strings, or check
/// the parent/subtask hierarchy; run the full check for those.
pub fn quick_check(graph: &TaskGraph) -> bool {
    let mut seen: HashSet<&str> = HashSet::with_capacity(graph.tasks.len());
    for section in &graph.sections {
        for id in &section.tasks {
            if !graph.has_entry(id) || !seen.insert(id.as_str()) {
                return false;
            }
        }
    }
    if !graph.tasks.keys().all(|id| seen.contains(id.as_str())) {
        return false;
    }
    if graph.metadata.total_tasks != graph.tasks.len()
        || graph.metadata.completed_tasks != graph.completed_count()
    {
        return false;
    }
    graph.tasks.iter().all(|(key, task)| {
        *key == task.id
            && !task.title.trim().is_empty()
            && task.dependencies.iter().all(|d| graph.has_entry(d))
    })
}
