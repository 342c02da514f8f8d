//! Checking raw JSON documents.
//!
//! A persisted document can be malformed in ways the typed graph cannot
//! express. This layer reports those shapes, decodes whatever is sound into
//! a [`TaskGraph`], runs the typed rules on the sound parts, and writes the
//! repaired containers back into the document.

use super::{CheckOptions, CheckReport, Finding, FindingCode, Remedy, Scope, repair, rules};
use crate::types::{
    DEFAULT_SECTIONS, Metadata, OperationRecord, ScoringSync, Section, Task, TaskGraph,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Result of checking a raw document.
#[derive(Debug, Clone)]
pub struct DocumentCheck {
    pub report: CheckReport,
    /// Everything that could be decoded. Undecodable task entries are kept
    /// verbatim in `unparsed_tasks`.
    pub graph: TaskGraph,
}

/// Check (and optionally repair) a raw document in place.
///
/// Never panics on malformed input: every malformed container is reported
/// as an error and every check that can still run does run.
pub fn check_document(doc: &mut Value, options: CheckOptions) -> DocumentCheck {
    let Some(root) = doc.as_object() else {
        warn!("Store document is not a JSON object");
        return DocumentCheck {
            report: CheckReport::from_findings(
                vec![Finding::error(
                    FindingCode::MalformedDocument,
                    "Document root is not an object",
                )],
                Vec::new(),
            ),
            graph: TaskGraph::default(),
        };
    };

    let mut findings = Vec::new();
    let mut scope = Scope {
        decode_errors_reported: true,
        ..Scope::full()
    };
    let mut graph = TaskGraph {
        sections: Vec::new(),
        ..TaskGraph::default()
    };

    if let Some(version) = root.get("version").and_then(Value::as_str) {
        graph.version = version.to_string();
    }

    // Tasks
    match root.get("tasks") {
        None => {}
        Some(Value::Object(map)) => {
            for (key, value) in map {
                match value {
                    Value::Null => {
                        graph.unparsed_tasks.insert(key.clone(), Value::Null);
                        findings.push(
                            Finding::error(
                                FindingCode::NullTask,
                                format!("Task entry '{}' is null", key),
                            )
                            .for_task(key.clone()),
                        );
                    }
                    other => match serde_json::from_value::<Task>(other.clone()) {
                        Ok(task) => {
                            graph.tasks.insert(key.clone(), task);
                        }
                        Err(e) => {
                            graph.unparsed_tasks.insert(key.clone(), other.clone());
                            findings.push(
                                Finding::error(
                                    FindingCode::InvalidTask,
                                    format!("Task entry '{}' could not be decoded: {}", key, e),
                                )
                                .for_task(key.clone()),
                            );
                        }
                    },
                }
            }
        }
        Some(_) => {
            scope.tasks = false;
            findings.push(Finding::error(
                FindingCode::MalformedTasks,
                "tasks is not a map of task objects",
            ));
        }
    }

    // Sections
    match root.get("sections") {
        None => {
            graph.sections = DEFAULT_SECTIONS.iter().map(|id| Section::new(*id)).collect();
        }
        Some(Value::Array(entries)) => {
            for (idx, entry) in entries.iter().enumerate() {
                let Some(obj) = entry.as_object() else {
                    scope.sections = false;
                    findings.push(Finding::error(
                        FindingCode::MalformedSection,
                        format!("Section at index {} is not an object", idx),
                    ));
                    continue;
                };
                let id = obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("section-{}", idx));
                let mut section = Section::new(id.clone());
                if let Some(title) = obj.get("title").and_then(Value::as_str) {
                    section.title = title.to_string();
                }
                match obj.get("tasks") {
                    Some(Value::Array(ids)) => {
                        section.tasks = ids
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect();
                        let invalid = ids.len() - section.tasks.len();
                        if invalid > 0 {
                            findings.push(
                                Finding::error(
                                    FindingCode::MalformedSectionTasks,
                                    format!(
                                        "Section '{}' lists {} entries that are not task ids",
                                        id, invalid
                                    ),
                                )
                                .fixable(Remedy::DropNonStringEntries {
                                    section_index: idx,
                                    section_id: id.clone(),
                                }),
                            );
                        }
                    }
                    _ => {
                        findings.push(
                            Finding::error(
                                FindingCode::MalformedSectionTasks,
                                format!("Section '{}' has no task list", id),
                            )
                            .fixable(Remedy::InitSectionTasks {
                                section_index: idx,
                                section_id: id.clone(),
                            }),
                        );
                    }
                }
                graph.sections.push(section);
            }
        }
        Some(_) => {
            scope.sections = false;
            findings.push(Finding::error(
                FindingCode::MalformedSections,
                "sections is not a list",
            ));
        }
    }

    // Metadata
    match root.get("metadata") {
        None => graph.metadata = Metadata::default(),
        Some(value) if value.is_object() => match serde_json::from_value::<Metadata>(value.clone()) {
            Ok(metadata) => graph.metadata = metadata,
            Err(e) => {
                scope.metadata = false;
                findings.push(Finding::error(
                    FindingCode::MalformedMetadata,
                    format!("metadata could not be decoded: {}", e),
                ));
            }
        },
        Some(_) => {
            scope.metadata = false;
            findings.push(Finding::error(
                FindingCode::MalformedMetadata,
                "metadata is not an object",
            ));
        }
    }

    // Pass-through containers decode leniently
    graph.scoring_sync = decode_or_default::<ScoringSync>(root.get("scoringSync"));
    graph.automation_rules = decode_or_default::<Vec<Value>>(root.get("automationRules"));
    graph.templates = decode_or_default::<Vec<Value>>(root.get("templates"));
    graph.recurring_tasks = decode_or_default::<Vec<Value>>(root.get("recurringTasks"));
    graph.operation_history =
        decode_or_default::<Vec<OperationRecord>>(root.get("operationHistory"));

    findings.extend(rules::collect(&graph, &scope));

    if !options.auto_fix {
        return DocumentCheck {
            report: CheckReport::from_findings(findings, Vec::new()),
            graph,
        };
    }

    let (fixable, mut remaining): (Vec<_>, Vec<_>) =
        findings.into_iter().partition(Finding::is_fixable);

    let mut fixed = Vec::new();
    for finding in &fixable {
        match apply_raw(doc, finding.remedy.as_ref()) {
            Some(Ok(description)) => fixed.push(description),
            Some(Err(())) => remaining.push(finding.clone()),
            None => {}
        }
    }

    let typed_fixes = repair::apply(&mut graph, &fixable);
    if !typed_fixes.is_empty() {
        write_back(doc, &graph, &scope);
    }
    fixed.extend(typed_fixes);

    debug!(fixed = fixed.len(), "Document check applied fixes");
    DocumentCheck {
        report: CheckReport::from_findings(remaining, fixed),
        graph,
    }
}

/// Apply a remedy that only exists at the document level. `None` for
/// typed remedies, `Err` when the section is no longer there.
fn apply_raw(doc: &mut Value, remedy: Option<&Remedy>) -> Option<Result<String, ()>> {
    let (section_index, section_id) = match remedy? {
        Remedy::InitSectionTasks {
            section_index,
            section_id,
        }
        | Remedy::DropNonStringEntries {
            section_index,
            section_id,
        } => (*section_index, section_id),
        _ => return None,
    };
    let Some(section) = doc
        .get_mut("sections")
        .and_then(|s| s.get_mut(section_index))
        .and_then(Value::as_object_mut)
    else {
        return Some(Err(()));
    };
    let description = match remedy? {
        Remedy::InitSectionTasks { .. } => {
            section.insert("tasks".to_string(), json!([]));
            format!("Initialized missing task list for section '{}'", section_id)
        }
        _ => {
            if let Some(Value::Array(ids)) = section.get_mut("tasks") {
                ids.retain(Value::is_string);
            }
            format!("Dropped non-string task entries from section '{}'", section_id)
        }
    };
    Some(Ok(description))
}

/// Typed remediations only touch sections and metadata.
fn write_back(doc: &mut Value, graph: &TaskGraph, scope: &Scope) {
    let Some(root) = doc.as_object_mut() else {
        return;
    };
    if scope.sections {
        if let Ok(sections) = serde_json::to_value(&graph.sections) {
            root.insert("sections".to_string(), sections);
        }
    }
    if scope.metadata {
        if let Ok(metadata) = serde_json::to_value(&graph.metadata) {
            root.insert("metadata".to_string(), metadata);
        }
    }
}

fn decode_or_default<T: serde::de::DeserializeOwned + Default>(value: Option<&Value>) -> T {
    value
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}
