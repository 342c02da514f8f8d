//! Configuration types and structures.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub consistency: ConsistencyConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl EngineConfig {
    /// Load configuration from a single YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_queue_size == 0 {
            return Err(anyhow!("queue.max_queue_size must be at least 1"));
        }
        if self.queue.batch_size == 0 {
            return Err(anyhow!("queue.batch_size must be at least 1"));
        }
        if self.queue.max_concurrent_batches == 0 {
            return Err(anyhow!("queue.max_concurrent_batches must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.search.fuzzy_threshold) {
            return Err(anyhow!(
                "search.fuzzy_threshold must be between 0 and 1, got {}",
                self.search.fuzzy_threshold
            ));
        }
        Ok(())
    }

    /// Ensure the store's parent directory exists.
    pub fn ensure_store_dir(&self) -> Result<()> {
        if let Some(parent) = self.store.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Where the task document and its mirror live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the persisted JSON document.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Path to the Markdown checklist mirror (optional).
    #[serde(default)]
    pub mirror_path: Option<PathBuf>,

    /// Rewrite the mirror after every commit (default: false).
    #[serde(default)]
    pub auto_write_mirror: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            mirror_path: None,
            auto_write_mirror: false,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("task-store/tasks.json")
}

/// Work queue limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum admitted-but-unfinished operations (default: 1000).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Delay submissions instead of rejecting them (default: true).
    #[serde(default = "default_true")]
    pub backpressure_enabled: bool,

    /// Operations per batch (default: 10).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches allowed to run at once (default: 3).
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Outstanding count at which backpressure kicks in (default: 800).
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
}

impl QueueConfig {
    /// Outstanding count at which submissions start waiting. Never above
    /// `max_queue_size`, never zero.
    pub fn backpressure_limit(&self) -> usize {
        self.backpressure_threshold.min(self.max_queue_size).max(1)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            backpressure_enabled: true,
            batch_size: default_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            backpressure_threshold: default_backpressure_threshold(),
        }
    }
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent_batches() -> usize {
    3
}

fn default_backpressure_threshold() -> usize {
    800
}

fn default_true() -> bool {
    true
}

/// Query cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached query results (default: 500).
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Age after which an entry is stale, in milliseconds (default: 300000 = 5 minutes).
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl CacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

fn default_cache_capacity() -> usize {
    500
}

fn default_stale_after_ms() -> u64 {
    300_000
}

/// Commit-time integrity policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Repair fixable findings on every commit (default: true).
    #[serde(default = "default_true")]
    pub auto_fix: bool,

    /// Reject commits that introduce new integrity errors (default: false).
    #[serde(default)]
    pub strict: bool,

    /// Operation history entries kept in the document (default: 100).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            auto_fix: true,
            strict: false,
            history_limit: default_history_limit(),
        }
    }
}

fn default_history_limit() -> usize {
    100
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum similarity for fuzzy matches, 0..1 (default: 0.6).
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Maximum results returned by a search (default: 50).
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            limit: default_search_limit(),
        }
    }
}

fn default_fuzzy_threshold() -> f64 {
    0.6
}

fn default_search_limit() -> usize {
    50
}

/// Partial id resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Shortest partial id accepted (default: 3).
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Suggestions returned when nothing matches (default: 5).
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

fn default_min_length() -> usize {
    3
}

fn default_max_suggestions() -> usize {
    5
}
