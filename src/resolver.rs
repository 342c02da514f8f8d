//! Partial task id resolution.

use crate::error::{EngineError, ErrorCode};
use crate::search::similarity;
use crate::types::{TaskGraph, TaskStatus};
use serde::Serialize;
use thiserror::Error;

/// Minimum similarity for a suggestion without context bias.
const SUGGESTION_FLOOR: f64 = 0.3;
const RECENT_BONUS: f64 = 0.2;
const STATUS_BONUS: f64 = 0.1;

/// How a resolution was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub id: String,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    pub score: f64,
}

/// Optional hints that bias suggestions when nothing resolves.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Recently touched ids, most recent first.
    pub recent_ids: Vec<String>,
    pub preferred_status: Option<TaskStatus>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("Task id is empty")]
    Empty,

    #[error("Task id '{input}' contains whitespace; try '{hint}'")]
    Whitespace { input: String, hint: String },

    #[error("Task id '{input}' starts with '#'; try '{hint}'")]
    LeadingHash { input: String, hint: String },

    #[error("Task id '{input}' is too short; use at least {min} characters")]
    TooShort { input: String, min: usize },

    #[error("'{input}' matches {} tasks: {}", .candidates.len(), .candidates.join(", "))]
    Ambiguous {
        input: String,
        candidates: Vec<String>,
        hint: String,
    },

    #[error("No task matches '{input}'")]
    NotFound {
        input: String,
        suggestions: Vec<Suggestion>,
    },
}

impl From<ResolveError> for EngineError {
    fn from(err: ResolveError) -> Self {
        let message = err.to_string();
        match err {
            ResolveError::Empty
            | ResolveError::Whitespace { .. }
            | ResolveError::LeadingHash { .. }
            | ResolveError::TooShort { .. } => {
                EngineError::new(ErrorCode::MalformedId, message).with_field("task_id")
            }
            ResolveError::Ambiguous { hint, .. } => {
                EngineError::new(ErrorCode::AmbiguousId, message).with_details(hint)
            }
            ResolveError::NotFound { suggestions, .. } => {
                let err = EngineError::new(ErrorCode::TaskNotFound, message);
                if suggestions.is_empty() {
                    err
                } else {
                    let ids: Vec<&str> = suggestions.iter().map(|s| s.id.as_str()).collect();
                    err.with_details(format!("Did you mean: {}", ids.join(", ")))
                }
            }
        }
    }
}

/// Resolves possibly-partial ids against a snapshot.
pub struct TaskIdResolver<'a> {
    graph: &'a TaskGraph,
    min_length: usize,
    max_suggestions: usize,
}

impl<'a> TaskIdResolver<'a> {
    pub fn new(graph: &'a TaskGraph, min_length: usize, max_suggestions: usize) -> Self {
        Self {
            graph,
            min_length: min_length.max(1),
            max_suggestions,
        }
    }

    pub fn resolve(
        &self,
        input: &str,
        context: Option<&ResolveContext>,
    ) -> Result<Resolution, ResolveError> {
        self.validate(input)?;

        if self.graph.tasks.contains_key(input) {
            return Ok(Resolution {
                id: input.to_string(),
                kind: MatchKind::Exact,
            });
        }

        let needle = input.to_lowercase();
        let folded: Vec<&String> = self
            .graph
            .tasks
            .keys()
            .filter(|id| id.to_lowercase() == needle)
            .collect();
        if let [only] = folded.as_slice() {
            return Ok(Resolution {
                id: (*only).clone(),
                kind: MatchKind::CaseInsensitive,
            });
        }

        let candidates: Vec<String> = self
            .graph
            .tasks
            .keys()
            .filter(|id| id.to_lowercase().starts_with(&needle))
            .cloned()
            .collect();
        match candidates.len() {
            0 => Err(ResolveError::NotFound {
                input: input.to_string(),
                suggestions: self.suggest(&needle, context),
            }),
            1 => Ok(Resolution {
                id: candidates.into_iter().next().unwrap_or_default(),
                kind: MatchKind::Prefix,
            }),
            _ => {
                let shared = common_prefix(&candidates);
                let hint = format!(
                    "Use a longer prefix than '{}' to pick one of {} tasks",
                    shared,
                    candidates.len()
                );
                Err(ResolveError::Ambiguous {
                    input: input.to_string(),
                    candidates,
                    hint,
                })
            }
        }
    }

    /// Reject malformed input before any lookup.
    fn validate(&self, input: &str) -> Result<(), ResolveError> {
        if input.trim().is_empty() {
            return Err(ResolveError::Empty);
        }
        if input.chars().any(char::is_whitespace) {
            return Err(ResolveError::Whitespace {
                input: input.to_string(),
                hint: input.split_whitespace().collect(),
            });
        }
        if let Some(stripped) = input.strip_prefix('#') {
            return Err(ResolveError::LeadingHash {
                input: input.to_string(),
                hint: stripped.trim_start_matches('#').to_string(),
            });
        }
        if input.chars().count() < self.min_length {
            return Err(ResolveError::TooShort {
                input: input.to_string(),
                min: self.min_length,
            });
        }
        Ok(())
    }

    /// Similarity-ranked ids, biased towards recently touched ids and the
    /// preferred status.
    pub fn suggest(&self, needle: &str, context: Option<&ResolveContext>) -> Vec<Suggestion> {
        let mut scored: Vec<Suggestion> = self
            .graph
            .tasks
            .values()
            .filter_map(|task| {
                let id = task.id.to_lowercase();
                let mut score = similarity(needle, &id);
                if id.contains(needle) {
                    score = score.max(0.5);
                }
                let mut biased = score;
                if let Some(ctx) = context {
                    if ctx.recent_ids.iter().any(|r| *r == task.id) {
                        biased += RECENT_BONUS;
                    }
                    if ctx.preferred_status.as_ref() == Some(&task.status) {
                        biased += STATUS_BONUS;
                    }
                }
                (score >= SUGGESTION_FLOOR).then(|| Suggestion {
                    id: task.id.clone(),
                    title: task.title.clone(),
                    score: biased,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(self.max_suggestions);
        scored
    }
}

fn common_prefix(ids: &[String]) -> String {
    let Some(first) = ids.first() else {
        return String::new();
    };
    let mut len = first.len();
    for id in &ids[1..] {
        len = first
            .char_indices()
            .zip(id.chars())
            .take_while(|((_, a), b)| a.eq_ignore_ascii_case(b))
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(len);
    }
    first[..len].to_string()
}
