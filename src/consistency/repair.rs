//! Remediation of fixable findings.

use super::{Finding, Remedy};
use crate::types::TaskGraph;

/// Apply each remedy exactly once. Returns one description per remediation
/// that actually changed the graph.
pub(crate) fn apply(graph: &mut TaskGraph, findings: &[Finding]) -> Vec<String> {
    let mut fixed = Vec::new();

    for finding in findings {
        let Some(remedy) = &finding.remedy else {
            continue;
        };
        if let Some(description) = apply_one(graph, remedy) {
            fixed.push(description);
        }
    }

    fixed
}

fn apply_one(graph: &mut TaskGraph, remedy: &Remedy) -> Option<String> {
    match remedy {
        Remedy::RemoveReference {
            section_index,
            task_id,
        } => {
            let section = graph.sections.get_mut(*section_index)?;
            let before = section.tasks.len();
            section.tasks.retain(|id| id != task_id);
            (section.tasks.len() < before).then(|| {
                format!(
                    "Removed orphaned task reference '{}' from section '{}'",
                    task_id, section.id
                )
            })
        }
        Remedy::DropDuplicates { task_id } => {
            let mut kept = false;
            let mut removed = 0usize;
            for section in &mut graph.sections {
                section.tasks.retain(|id| {
                    if id != task_id {
                        return true;
                    }
                    if kept {
                        removed += 1;
                        false
                    } else {
                        kept = true;
                        true
                    }
                });
            }
            (removed > 0).then(|| {
                format!(
                    "Removed {} duplicate reference(s) to task '{}'",
                    removed, task_id
                )
            })
        }
        Remedy::AddToSection { task_id, status } => {
            let idx = graph.section_index_for(status);
            let section = &mut graph.sections[idx];
            section.tasks.push(task_id.clone());
            Some(format!(
                "Added task '{}' to section '{}'",
                task_id, section.id
            ))
        }
        Remedy::RecountMetadata => {
            let before = (graph.metadata.total_tasks, graph.metadata.completed_tasks);
            graph.recount();
            let after = (graph.metadata.total_tasks, graph.metadata.completed_tasks);
            (before != after).then(|| {
                format!(
                    "Updated metadata totals: totalTasks {} -> {}, completedTasks {} -> {}",
                    before.0, after.0, before.1, after.1
                )
            })
        }
        // Raw-document remedy; the document layer applies it to the JSON value.
        Remedy::InitSectionTasks { .. } | Remedy::DropNonStringEntries { .. } => None,
    }
}
