//! Search over a committed snapshot.
//!
//! [`SearchIndex`] borrows the graph and keeps no state of its own, so it is
//! built per query against whatever snapshot the caller holds.

use crate::types::{Task, TaskGraph};
use regex_lite::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Queries longer than this get a "shorten your query" hint.
const LONG_QUERY_CHARS: usize = 50;

/// Similarity above which an id is offered by the id tier.
const ID_SIMILARITY: f64 = 0.5;

/// Searchable task fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Id,
    Title,
    Description,
    Tags,
    Assignee,
    Category,
    Status,
}

impl SearchField {
    pub const ALL: [SearchField; 7] = [
        SearchField::Id,
        SearchField::Title,
        SearchField::Description,
        SearchField::Tags,
        SearchField::Assignee,
        SearchField::Category,
        SearchField::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Id => "id",
            SearchField::Title => "title",
            SearchField::Description => "description",
            SearchField::Tags => "tags",
            SearchField::Assignee => "assignee",
            SearchField::Category => "category",
            SearchField::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s.to_lowercase())
    }

    /// Weight used when the caller gives none.
    pub fn default_weight(&self) -> f64 {
        match self {
            SearchField::Title => 3.0,
            SearchField::Id | SearchField::Tags => 2.0,
            SearchField::Description => 1.0,
            SearchField::Assignee | SearchField::Category | SearchField::Status => 0.5,
        }
    }

    fn values<'t>(&self, task: &'t Task) -> Vec<&'t str> {
        match self {
            SearchField::Id => vec![task.id.as_str()],
            SearchField::Title => vec![task.title.as_str()],
            SearchField::Description => task.description.as_deref().into_iter().collect(),
            SearchField::Tags => task.tags.iter().map(String::as_str).collect(),
            SearchField::Assignee => task.assignee.as_deref().into_iter().collect(),
            SearchField::Category => task.category.as_deref().into_iter().collect(),
            SearchField::Status => vec![task.status.as_str()],
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub task: Task,
    pub score: f64,
    pub matched_fields: Vec<SearchField>,
}

/// Which fallback tier produced a comprehensive result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTier {
    Exact,
    Fuzzy,
    Id,
    None,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensiveResult {
    pub tier: SearchTier,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestions {
    pub hints: Vec<String>,
    pub similar_terms: Vec<String>,
}

/// Read-only search view over a graph snapshot.
pub struct SearchIndex<'a> {
    graph: &'a TaskGraph,
    fuzzy_threshold: f64,
}

impl<'a> SearchIndex<'a> {
    pub fn new(graph: &'a TaskGraph, fuzzy_threshold: f64) -> Self {
        Self {
            graph,
            fuzzy_threshold: fuzzy_threshold.clamp(0.0, 1.0),
        }
    }

    /// Case-insensitive substring match on id or title. An exact id match
    /// ranks first.
    pub fn exact(&self, query: &str) -> Vec<SearchHit> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .graph
            .tasks
            .values()
            .filter_map(|task| {
                let id = task.id.to_lowercase();
                let mut fields = Vec::new();
                let mut score = 0.0;
                if id == needle {
                    fields.push(SearchField::Id);
                    score += 2.0;
                } else if id.contains(&needle) {
                    fields.push(SearchField::Id);
                    score += 1.0;
                }
                if task.title.to_lowercase().contains(&needle) {
                    fields.push(SearchField::Title);
                    score += 1.0;
                }
                (!fields.is_empty()).then(|| hit(task, score, fields))
            })
            .collect();
        rank(&mut hits);
        hits
    }

    /// Edit-distance match on titles. `threshold` (0..1) is the
    /// minimum similarity; raising it only removes results.
    pub fn fuzzy(&self, query: &str, threshold: Option<f64>) -> Vec<SearchHit> {
        let threshold = threshold.unwrap_or(self.fuzzy_threshold).clamp(0.0, 1.0);
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .graph
            .tasks
            .values()
            .filter_map(|task| {
                let score = text_similarity(&needle, &task.title.to_lowercase());
                (score >= threshold).then(|| hit(task, score, vec![SearchField::Title]))
            })
            .collect();
        rank(&mut hits);
        hits
    }

    /// Regular expression match over `fields` (all fields when empty).
    /// An invalid pattern is searched as a literal string.
    pub fn regex(&self, pattern: &str, fields: &[SearchField]) -> Vec<SearchHit> {
        let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                debug!(pattern, error = %e, "Invalid search pattern, using literal match");
                match RegexBuilder::new(&regex_lite::escape(pattern))
                    .case_insensitive(true)
                    .build()
                {
                    Ok(re) => re,
                    Err(_) => return Vec::new(),
                }
            }
        };
        let fields: &[SearchField] = if fields.is_empty() {
            &SearchField::ALL
        } else {
            fields
        };

        let mut hits: Vec<SearchHit> = self
            .graph
            .tasks
            .values()
            .filter_map(|task| {
                let matched: Vec<SearchField> = fields
                    .iter()
                    .copied()
                    .filter(|f| f.values(task).iter().any(|v| re.is_match(v)))
                    .collect();
                (!matched.is_empty()).then(|| hit(task, matched.len() as f64, matched))
            })
            .collect();
        rank(&mut hits);
        hits
    }

    /// Weighted relevance over several fields. Each field contributes
    /// `weight * strength`, where strength is 1.0 for an equal value, 0.8
    /// for a prefix, 0.6 for a substring and scaled similarity for a close
    /// fuzzy match.
    pub fn multi_field(&self, query: &str, fields: &[(SearchField, Option<f64>)]) -> Vec<SearchHit> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let weighted: Vec<(SearchField, f64)> = if fields.is_empty() {
            SearchField::ALL
                .iter()
                .map(|f| (*f, f.default_weight()))
                .collect()
        } else {
            fields
                .iter()
                .map(|(f, w)| (*f, w.unwrap_or_else(|| f.default_weight())))
                .collect()
        };

        let mut hits: Vec<SearchHit> = self
            .graph
            .tasks
            .values()
            .filter_map(|task| {
                let mut score = 0.0;
                let mut matched = Vec::new();
                for (field, weight) in &weighted {
                    let strength = field
                        .values(task)
                        .iter()
                        .map(|v| self.match_strength(&needle, &v.to_lowercase()))
                        .fold(0.0, f64::max);
                    if strength > 0.0 {
                        score += weight * strength;
                        matched.push(*field);
                    }
                }
                (score > 0.0).then(|| hit(task, score, matched))
            })
            .collect();
        rank(&mut hits);
        hits
    }

    fn match_strength(&self, needle: &str, value: &str) -> f64 {
        if value == needle {
            1.0
        } else if value.starts_with(needle) {
            0.8
        } else if value.contains(needle) {
            0.6
        } else {
            let sim = text_similarity(needle, value);
            if sim >= self.fuzzy_threshold.max(0.5) {
                0.4 * sim
            } else {
                0.0
            }
        }
    }

    /// Exact, then fuzzy, then id search; the first tier with results wins.
    pub fn comprehensive(&self, query: &str) -> ComprehensiveResult {
        let exact = self.exact(query);
        if !exact.is_empty() {
            return ComprehensiveResult {
                tier: SearchTier::Exact,
                hits: exact,
            };
        }
        let fuzzy = self.fuzzy(query, None);
        if !fuzzy.is_empty() {
            return ComprehensiveResult {
                tier: SearchTier::Fuzzy,
                hits: fuzzy,
            };
        }
        let ids = self.by_id(query);
        let tier = if ids.is_empty() {
            SearchTier::None
        } else {
            SearchTier::Id
        };
        ComprehensiveResult { tier, hits: ids }
    }

    /// Id search ignoring case and separators, plus close id matches.
    pub fn by_id(&self, query: &str) -> Vec<SearchHit> {
        let needle = normalize_id(query);
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .graph
            .tasks
            .values()
            .filter_map(|task| {
                let id = normalize_id(&task.id);
                let score = if id.contains(&needle) {
                    1.0
                } else {
                    similarity(&needle, &id)
                };
                (score >= ID_SIMILARITY).then(|| hit(task, score, vec![SearchField::Id]))
            })
            .collect();
        rank(&mut hits);
        hits
    }

    /// Hints for refining a query, plus corpus terms close to it.
    pub fn suggestions(&self, query: &str) -> Suggestions {
        let query = query.trim();
        let mut hints = Vec::new();

        if query.is_empty() {
            hints.push("Enter a search term".to_string());
            return Suggestions {
                hints,
                similar_terms: Vec::new(),
            };
        }
        if query.chars().count() > LONG_QUERY_CHARS {
            hints.push("Query too long, try a shorter term".to_string());
        }
        if query.chars().any(|c| "^$*+?()[]{}|\\".contains(c)) {
            hints.push("Query contains pattern characters, try regex search".to_string());
        }

        let exact_empty = self.exact(query).is_empty();
        if exact_empty {
            hints.push("No exact matches, try fuzzy search".to_string());
            if query.split_whitespace().count() > 1 {
                hints.push("Try fewer words".to_string());
            }
        }

        let similar_terms = self.similar_terms(query, 5);
        if exact_empty && !similar_terms.is_empty() {
            hints.push(format!("Did you mean '{}'?", similar_terms[0]));
        }

        Suggestions {
            hints,
            similar_terms,
        }
    }

    /// Title words and tags most similar to the query's words.
    fn similar_terms(&self, query: &str, limit: usize) -> Vec<String> {
        let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let mut corpus: BTreeSet<String> = BTreeSet::new();
        for task in self.graph.tasks.values() {
            corpus.extend(task.title.split_whitespace().map(clean_word).filter(|w| w.len() > 2));
            corpus.extend(task.tags.iter().map(|t| t.to_lowercase()));
        }

        let mut scored: Vec<(f64, String)> = corpus
            .into_iter()
            .filter(|term| !tokens.contains(term))
            .filter_map(|term| {
                let best = tokens
                    .iter()
                    .map(|t| similarity(t, &term))
                    .fold(0.0, f64::max);
                (best >= 0.6).then_some((best, term))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.into_iter().take(limit).map(|(_, t)| t).collect()
    }
}

fn hit(task: &Task, score: f64, matched_fields: Vec<SearchField>) -> SearchHit {
    SearchHit {
        task: task.clone(),
        score,
        matched_fields,
    }
}

/// Descending score, then id for a stable order.
fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.task.id.cmp(&b.task.id))
    });
}

fn normalize_id(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn clean_word(w: &str) -> String {
    w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

/// Levenshtein distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / longer length`, in 0..1.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Similarity of a query against free text: the better of whole-string
/// similarity and the mean best per-word similarity.
fn text_similarity(query: &str, text: &str) -> f64 {
    let whole = similarity(query, text);
    let words: Vec<String> = text.split_whitespace().map(clean_word).collect();
    let tokens: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() || tokens.is_empty() {
        return whole;
    }
    let per_token: f64 = tokens
        .iter()
        .map(|t| {
            words
                .iter()
                .map(|w| similarity(t, w))
                .fold(0.0, f64::max)
        })
        .sum::<f64>()
        / tokens.len() as f64;
    whole.max(per_token)
}
