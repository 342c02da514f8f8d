//! Reads against the committed snapshot.

use super::{Applied, Commit, TaskEngine};
use crate::cache::CacheStats;
use crate::consistency::{self, CheckOptions, CheckReport, parse_date};
use crate::error::{EngineError, EngineResult};
use crate::queue::QueueStats;
use crate::resolver::{ResolveContext, Resolution, Suggestion, TaskIdResolver};
use crate::search::{ComprehensiveResult, SearchIndex};
use crate::types::{Priority, Task, TaskGraph, TaskStats, TaskStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueDate,
    Priority,
    Title,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter, sort and page over tasks. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    /// Any of these statuses.
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
    /// At least this priority.
    #[serde(default)]
    pub min_priority: Option<Priority>,
    /// All of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    /// Case-insensitive substring of title or description.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default)]
    pub overdue_only: bool,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = field;
        self.sort_order = order;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn cache_key(&self) -> String {
        format!("query:{}", serde_json::to_string(self).unwrap_or_default())
    }

    fn matches(&self, task: &Task, now: chrono::NaiveDateTime) -> bool {
        if task.archived && !self.include_archived {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if self.min_priority.is_some_and(|min| task.priority < min) {
            return false;
        }
        if !self.tags.iter().all(|tag| task.tags.contains(tag)) {
            return false;
        }
        if self.assignee.is_some() && task.assignee != self.assignee {
            return false;
        }
        if self.category.is_some() && task.category != self.category {
            return false;
        }
        if self.parent_task_id.is_some() && task.parent_task_id != self.parent_task_id {
            return false;
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let in_title = task.title.to_lowercase().contains(&needle);
            let in_description = task
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_title && !in_description {
                return false;
            }
        }
        if self.overdue_only && !is_overdue(task, now) {
            return false;
        }
        true
    }

    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let primary = match self.sort_by {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            // Undated tasks sort after dated ones in either order
            SortField::DueDate => match (&a.due_date, &b.due_date) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            SortField::Priority => a.priority.cmp(&b.priority),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
        };
        let primary = match self.sort_order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub tasks: Vec<Task>,
    /// Matches before paging.
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
    /// Snapshot revision the result was computed from.
    pub revision: u64,
}

/// Task, cache and queue statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub tasks: TaskStats,
    pub cache: CacheStats,
    pub queue: QueueStats,
}

fn is_overdue(task: &Task, now: chrono::NaiveDateTime) -> bool {
    if task.status.is_completed() || task.status == TaskStatus::Cancelled || task.archived {
        return false;
    }
    task.due_date
        .as_deref()
        .and_then(parse_date)
        .is_some_and(|due| due < now)
}

pub(crate) fn run_query(graph: &TaskGraph, query: &TaskQuery) -> QueryResult {
    let now = Utc::now().naive_utc();
    let mut matched: Vec<&Task> = graph.tasks.values().filter(|t| query.matches(t, now)).collect();
    matched.sort_by(|a, b| query.compare(a, b));

    let total = matched.len();
    let page = matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    QueryResult {
        tasks: page,
        total,
        offset: query.offset,
        limit: query.limit,
        revision: graph.metadata.revision,
    }
}

pub(crate) fn compute_stats(graph: &TaskGraph) -> TaskStats {
    let now = Utc::now().naive_utc();
    let mut tasks_by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut tasks_by_priority: BTreeMap<String, usize> = BTreeMap::new();
    let mut archived = 0;
    let mut overdue = 0;

    for task in graph.tasks.values() {
        *tasks_by_status.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        *tasks_by_priority.entry(task.priority.as_str().to_string()).or_insert(0) += 1;
        if task.archived {
            archived += 1;
        }
        if is_overdue(task, now) {
            overdue += 1;
        }
    }

    let total = graph.tasks.len();
    let completed = graph.completed_count();
    TaskStats {
        total_tasks: total,
        completed_tasks: completed,
        archived_tasks: archived,
        overdue_tasks: overdue,
        completion_rate: if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        },
        tasks_by_status,
        tasks_by_priority,
        revision: graph.metadata.revision,
    }
}

impl TaskEngine {
    pub fn get_task(&self, task_id: &str) -> EngineResult<Task> {
        self.snapshot()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::task_not_found(task_id))
    }

    /// Run a query, serving repeated queries against the same revision
    /// from the cache.
    pub fn query(&self, query: &TaskQuery) -> QueryResult {
        let graph = self.snapshot();
        let revision = graph.metadata.revision;
        let key = query.cache_key();

        if let Some(hit) = self.shared.cache().get_current(&key, revision) {
            debug!(revision, "Query served from cache");
            return hit;
        }
        let result = run_query(&graph, query);
        self.shared.cache().set(key, result.clone(), revision);
        result
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            tasks: compute_stats(&self.snapshot()),
            cache: self.cache_stats(),
            queue: self.shared.queue.stats(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache().stats()
    }

    /// Drop cache entries older than the configured staleness window.
    pub fn invalidate_stale_cache(&self) -> usize {
        self.shared.cache().invalidate_stale()
    }

    pub fn clear_cache(&self) {
        self.shared.cache().clear();
    }

    /// Check the committed snapshot without changing it.
    pub fn validate(&self) -> CheckReport {
        consistency::validate(&self.snapshot())
    }

    pub fn quick_check(&self) -> bool {
        consistency::quick_check(&self.snapshot())
    }

    /// Check the snapshot; with `auto_fix`, commit the repairs.
    pub async fn check_consistency(&self, auto_fix: bool) -> EngineResult<CheckReport> {
        if !auto_fix {
            return Ok(self.validate());
        }
        self.write(Commit::new("repair"), |graph| {
            let report = consistency::check(graph, CheckOptions::auto_fix());
            Ok(Applied::unchanged(report))
        })
        .await
    }

    pub fn resolve_id(&self, input: &str, context: Option<&ResolveContext>) -> EngineResult<Resolution> {
        let graph = self.snapshot();
        let config = &self.shared.config.resolver;
        let resolver = TaskIdResolver::new(&graph, config.min_length, config.max_suggestions);
        Ok(resolver.resolve(input, context)?)
    }

    /// Resolve a possibly-partial id to its task.
    pub fn resolve_task(&self, input: &str, context: Option<&ResolveContext>) -> EngineResult<Task> {
        let resolution = self.resolve_id(input, context)?;
        self.get_task(&resolution.id)
    }

    pub fn suggest_ids(&self, needle: &str, context: Option<&ResolveContext>) -> Vec<Suggestion> {
        let graph = self.snapshot();
        let config = &self.shared.config.resolver;
        TaskIdResolver::new(&graph, config.min_length, config.max_suggestions).suggest(needle, context)
    }

    /// Tiered search (exact, then fuzzy, then id), capped at the configured limit.
    pub fn search(&self, query: &str) -> ComprehensiveResult {
        let mut result = self.with_search_index(|index| index.comprehensive(query));
        result.hits.truncate(self.shared.config.search.limit);
        result
    }

    /// Run any search against the current snapshot.
    pub fn with_search_index<R>(&self, f: impl FnOnce(&SearchIndex<'_>) -> R) -> R {
        let graph = self.snapshot();
        let index = SearchIndex::new(&graph, self.shared.config.search.fuzzy_threshold);
        f(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> TaskGraph {
        let mut graph = TaskGraph::default();
        let specs = [
            ("a", "Alpha", TaskStatus::Pending, Priority::Low, Some("2000-01-01")),
            ("b", "bravo", TaskStatus::Completed, Priority::High, Some("2000-01-01")),
            ("c", "Charlie", TaskStatus::InProgress, Priority::Critical, None),
            ("d", "Delta", TaskStatus::Pending, Priority::Medium, Some("2999-01-01")),
        ];
        for (id, title, status, priority, due) in specs {
            let mut task = Task::new(id, title);
            task.status = status.clone();
            task.priority = priority;
            task.due_date = due.map(String::from);
            if id == "d" {
                task.tags = vec!["ops".into()];
            }
            graph.tasks.insert(id.into(), task);
            graph.place_in_section(id, &status);
        }
        graph.recount();
        graph
    }

    fn ids(result: &QueryResult) -> Vec<&str> {
        result.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn filters_combine() {
        let g = graph();
        let q = TaskQuery::new().status(TaskStatus::Pending);
        assert_eq!(ids(&run_query(&g, &q)), vec!["a", "d"]);

        let q = TaskQuery {
            min_priority: Some(Priority::High),
            ..TaskQuery::default()
        };
        assert_eq!(run_query(&g, &q).total, 2);

        let q = TaskQuery::new().tag("ops");
        assert_eq!(ids(&run_query(&g, &q)), vec!["d"]);

        let q = TaskQuery {
            overdue_only: true,
            ..TaskQuery::default()
        };
        assert_eq!(ids(&run_query(&g, &q)), vec!["a"]);
    }

    #[test]
    fn sort_and_page() {
        let g = graph();
        let q = TaskQuery::new()
            .sort(SortField::Priority, SortOrder::Desc)
            .page(1, 2);
        let result = run_query(&g, &q);
        assert_eq!(result.total, 4);
        assert_eq!(ids(&result), vec!["b", "d"]);

        let q = TaskQuery::new().sort(SortField::Title, SortOrder::Asc);
        assert_eq!(ids(&run_query(&g, &q)), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn undated_tasks_sort_last_both_ways() {
        let g = graph();
        for order in [SortOrder::Asc, SortOrder::Desc] {
            let q = TaskQuery::new().sort(SortField::DueDate, order);
            assert_eq!(ids(&run_query(&g, &q)).last(), Some(&"c"));
        }
    }

    #[test]
    fn archived_hidden_unless_requested() {
        let mut g = graph();
        g.tasks.get_mut("a").unwrap().archived = true;
        assert_eq!(run_query(&g, &TaskQuery::new()).total, 3);
        let q = TaskQuery {
            include_archived: true,
            ..TaskQuery::default()
        };
        assert_eq!(run_query(&g, &q).total, 4);
    }

    #[test]
    fn stats_count_everything() {
        let stats = compute_stats(&graph());
        assert_eq!(stats.total_tasks, 4);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.overdue_tasks, 1);
        assert!((stats.completion_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats.tasks_by_status["pending"], 2);
        assert_eq!(stats.tasks_by_priority["critical"], 1);
    }
}
