//! Configuration loader with tier-based merging.

use super::merge::deep_merge_all;
use super::types::EngineConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILE: &str = "config.yaml";

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Built-in defaults (lowest priority)
    Defaults = 0,
    /// Project-level config ($CWD/task-store/)
    Project = 1,
    /// User-level config (~/.task-store/)
    User = 2,
    /// Environment variables (highest priority)
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for each file-backed tier.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        // User dir: TASK_STORE_USER_DIR or ~/.task-store
        let user_dir = std::env::var("TASK_STORE_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".task-store")));

        // Project dir: TASK_STORE_PROJECT_DIR or $CWD/task-store
        let project_dir = std::env::var("TASK_STORE_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("task-store")));

        Self {
            project_dir,
            user_dir,
        }
    }

    /// Create paths with explicit directories.
    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }
}

/// Loads [`EngineConfig`] from defaults, project, user and environment tiers.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: EngineConfig,
    /// Highest-priority config file that contributed, if any.
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration from all tiers with proper merging.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    /// Load configuration with explicit paths.
    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        Self::load_with_env(paths, |key| std::env::var(key).ok())
    }

    /// Load with a custom environment lookup.
    pub fn load_with_env(
        paths: ConfigPaths,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // An explicit config file replaces every file tier
        if let Some(explicit) = env("TASK_STORE_CONFIG_PATH") {
            let path = PathBuf::from(explicit);
            let mut config = EngineConfig::load(&path)?;
            Self::apply_env_overrides(&mut config, &env);
            return Ok(Self {
                paths,
                config,
                config_path: Some(path),
            });
        }

        let mut tiers: Vec<Value> = vec![serde_json::to_value(EngineConfig::default())?];
        let mut config_path = None;

        for (tier, dir) in [
            (ConfigTier::Project, paths.project_dir.as_deref()),
            (ConfigTier::User, paths.user_dir.as_deref()),
        ] {
            let Some(dir) = dir else { continue };
            let file = dir.join(CONFIG_FILE);
            if let Some(value) = read_tier(&file, tier) {
                tiers.push(value);
                config_path = Some(file);
            }
        }

        let merged = deep_merge_all(tiers);
        let mut config: EngineConfig =
            serde_json::from_value(merged).context("Merged configuration is invalid")?;

        Self::apply_env_overrides(&mut config, &env);
        config.validate()?;

        Ok(Self {
            paths,
            config,
            config_path,
        })
    }

    fn apply_env_overrides(config: &mut EngineConfig, env: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = env("TASK_STORE_PATH") {
            config.store.path = PathBuf::from(path);
        }

        if let Some(mirror) = env("TASK_STORE_MIRROR_PATH") {
            config.store.mirror_path = Some(PathBuf::from(mirror));
        }

        if let Some(strict) = env("TASK_STORE_STRICT") {
            match strict.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.consistency.strict = true,
                "0" | "false" | "no" | "off" => config.consistency.strict = false,
                other => warn!(value = other, "Ignoring unrecognized TASK_STORE_STRICT"),
            }
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> EngineConfig {
        self.config
    }

    /// Get the config file path that was used.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// Read one YAML tier. Unreadable or unparsable files are skipped with a warning.
fn read_tier(file: &Path, tier: ConfigTier) -> Option<Value> {
    if !file.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => {
            warn!(%tier, path = %file.display(), error = %e, "Failed to read config tier");
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&content) {
        Ok(value) => {
            debug!(%tier, path = %file.display(), "Loaded config tier");
            Some(value)
        }
        Err(e) => {
            warn!(%tier, path = %file.display(), error = %e, "Failed to parse config tier");
            None
        }
    }
}
