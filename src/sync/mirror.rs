//! Markdown checklist mirror of the task list.
//!
//! Layout: one `##` heading per section, one `- [ ]` / `- [x]` item per
//! task, each item tagged with an `<!-- id:TASK_ID -->` marker so edits can
//! be mapped back to tasks. Prose outside checklist items is ignored.

use crate::types::{TaskGraph, TaskStatus};
use heck::ToTitleCase;
use serde::Serialize;
use std::collections::HashSet;

const ID_MARKER_OPEN: &str = "<!-- id:";
const ID_MARKER_CLOSE: &str = "-->";

/// One checklist line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorItem {
    /// Nearest `##` heading above the item.
    pub heading: Option<String>,
    pub checked: bool,
    pub title: String,
    pub task_id: Option<String>,
    /// 1-based line number.
    pub line: usize,
}

/// Differences between the mirror and the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorDiff {
    /// Checked in the mirror, not completed in the store.
    pub to_complete: Vec<String>,
    /// Unchecked in the mirror, completed in the store.
    pub to_reopen: Vec<String>,
    /// Title edited in the mirror: (task id, new title).
    pub retitled: Vec<(String, String)>,
    /// Items without an id marker, by title.
    pub untracked: Vec<String>,
    /// Marker ids with no task in the store.
    pub unknown_ids: Vec<String>,
    /// Store tasks absent from the mirror.
    pub missing: Vec<String>,
}

impl MirrorDiff {
    /// Whether applying the diff would change any task.
    pub fn has_task_changes(&self) -> bool {
        !self.to_complete.is_empty()
            || !self.to_reopen.is_empty()
            || !self.retitled.is_empty()
            || !self.untracked.is_empty()
    }
}

/// Render the graph as a checklist. Archived tasks are omitted.
pub fn render(graph: &TaskGraph) -> String {
    let mut out = String::from("# Tasks\n");
    for section in &graph.sections {
        let heading = if section.title.trim().is_empty() {
            section.id.to_title_case()
        } else {
            section.title.clone()
        };
        out.push_str("\n## ");
        out.push_str(&heading);
        out.push_str("\n\n");

        let mut any = false;
        for id in &section.tasks {
            let Some(task) = graph.tasks.get(id) else {
                continue;
            };
            if task.archived {
                continue;
            }
            any = true;
            let mark = if task.status.is_completed() { 'x' } else { ' ' };
            out.push_str(&format!(
                "- [{}] {} {}{} {}\n",
                mark,
                single_line(&task.title),
                ID_MARKER_OPEN,
                task.id,
                ID_MARKER_CLOSE
            ));
        }
        if !any {
            out.push_str("_No tasks_\n");
        }
    }
    out
}

/// Extract checklist items. Lines that are not `-`/`*`/`+` checklist
/// items are skipped.
pub fn parse(content: &str) -> Vec<MirrorItem> {
    let mut heading: Option<String> = None;
    let mut items = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if let Some(h) = line.strip_prefix("## ") {
            heading = Some(h.trim().to_string());
            continue;
        }
        let Some(rest) = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .or_else(|| line.strip_prefix("+ "))
        else {
            continue;
        };
        let (checked, body) = if let Some(body) = rest.strip_prefix("[ ]") {
            (false, body)
        } else if let Some(body) = rest
            .strip_prefix("[x]")
            .or_else(|| rest.strip_prefix("[X]"))
        {
            (true, body)
        } else {
            continue;
        };

        let (title, task_id) = split_marker(body);
        items.push(MirrorItem {
            heading: heading.clone(),
            checked,
            title,
            task_id,
            line: idx + 1,
        });
    }
    items
}

fn split_marker(body: &str) -> (String, Option<String>) {
    if let Some(start) = body.find(ID_MARKER_OPEN) {
        let after = &body[start + ID_MARKER_OPEN.len()..];
        if let Some(end) = after.find(ID_MARKER_CLOSE) {
            let id = after[..end].trim();
            let title = format!("{}{}", &body[..start], &after[end + ID_MARKER_CLOSE.len()..]);
            let id = (!id.is_empty()).then(|| id.to_string());
            return (title.trim().to_string(), id);
        }
    }
    (body.trim().to_string(), None)
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compare parsed mirror items with the graph. Only the first item per
/// id counts.
pub fn reconcile(graph: &TaskGraph, items: &[MirrorItem]) -> MirrorDiff {
    let mut diff = MirrorDiff::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for item in items {
        let Some(id) = item.task_id.as_deref() else {
            if !item.title.is_empty() {
                diff.untracked.push(item.title.clone());
            }
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        let Some(task) = graph.tasks.get(id) else {
            diff.unknown_ids.push(id.to_string());
            continue;
        };
        let completed = task.status == TaskStatus::Completed;
        if item.checked && !completed {
            diff.to_complete.push(id.to_string());
        } else if !item.checked && completed {
            diff.to_reopen.push(id.to_string());
        }
        if !item.title.is_empty() && item.title != single_line(&task.title) {
            diff.retitled.push((id.to_string(), item.title.clone()));
        }
    }

    diff.missing = graph
        .tasks
        .values()
        .filter(|t| !t.archived && !seen.contains(t.id.as_str()))
        .map(|t| t.id.clone())
        .collect();
    diff
}
