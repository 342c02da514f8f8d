//! Engine configuration.
//!
//! Consolidates configuration from three tiers with field-by-field YAML merging:
//! 1. **Defaults** - built into the binary
//! 2. **Project** - `$CWD/task-store/config.yaml`
//! 3. **User** - `~/.task-store/config.yaml` and environment variables
//!
//! ## Environment Variables
//! - `TASK_STORE_CONFIG_PATH` - Explicit config file (overrides all tiers)
//! - `TASK_STORE_PATH` - Store document path
//! - `TASK_STORE_MIRROR_PATH` - Mirror checklist path
//! - `TASK_STORE_STRICT` - Reject commits that introduce integrity errors
//! - `TASK_STORE_USER_DIR` - User config dir (default: `~/.task-store`)
//! - `TASK_STORE_PROJECT_DIR` - Project config dir (default: `./task-store`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::{deep_merge, deep_merge_all};
pub use types::*;
