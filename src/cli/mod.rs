//! CLI command definitions for task-store.
//!
//! This module defines the CLI structure using clap's derive macros.
//! Command implementations live in the binary.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Inspect and maintain a task store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the store document (overrides config)
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    /// Path to the Markdown mirror (overrides config)
    #[arg(short, long, global = true)]
    pub mirror: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check store integrity
    Check(CheckArgs),

    /// Show task, cache and queue statistics
    Stats,

    /// Search tasks
    Search(SearchArgs),

    /// Resolve a partial task id
    Resolve(ResolveArgs),

    /// Work with the Markdown mirror
    Mirror(MirrorArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Repair fixable problems and save the result
    #[arg(long, conflicts_with = "quick")]
    pub fix: bool,

    /// Fast pass without cycle detection or date validation
    #[arg(long)]
    pub quick: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search text (a pattern when --mode regex)
    pub query: String,

    /// Search strategy
    #[arg(long, value_enum, default_value_t = SearchMode::Auto)]
    pub mode: SearchMode,

    /// Fuzzy similarity threshold, 0..1 (overrides config)
    #[arg(long)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SearchMode {
    /// Exact, then fuzzy, then id matching
    #[default]
    Auto,
    Exact,
    Fuzzy,
    Regex,
    Id,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Full or partial task id
    pub input: String,
}

#[derive(Args, Debug)]
pub struct MirrorArgs {
    #[command(subcommand)]
    pub action: MirrorCommand,
}

#[derive(Subcommand, Debug)]
pub enum MirrorCommand {
    /// Print the rendered mirror, or write it with --write
    Render {
        /// Write to the mirror path instead of printing
        #[arg(long)]
        write: bool,
        /// Overwrite even if the file changed since the last sync
        #[arg(long, requires = "write")]
        force: bool,
    },

    /// Report whether the mirror changed since the last sync
    Detect,

    /// Compare mirror items with the store
    Reconcile {
        /// Apply mirror edits to the store
        #[arg(long)]
        apply: bool,
    },

    /// Watch the mirror and report drift until interrupted
    Watch {
        /// Debounce window in milliseconds
        #[arg(long, default_value_t = 500)]
        debounce_ms: u64,
    },
}
