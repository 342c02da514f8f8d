//! task-store: inspect and maintain a task store from the command line.

use anyhow::{Result, bail};
use clap::Parser;
use serde::Serialize;
use std::time::Duration;
use task_store_engine::cli::{
    CheckArgs, Cli, Command, MirrorCommand, OutputFormat, ResolveArgs, SearchArgs, SearchMode,
};
use task_store_engine::config::{ConfigLoader, ConfigPaths, EngineConfig};
use task_store_engine::engine::TaskEngine;
use task_store_engine::logging::{self, LogTarget};
use task_store_engine::search::SearchHit;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let config = load_config(&cli)?;
    let engine = TaskEngine::open(config).await?;
    let format = cli.format;

    match cli.command {
        Command::Check(args) => run_check(&engine, args, format).await,
        Command::Stats => print(format, &engine.stats(), |stats| {
            let t = &stats.tasks;
            println!(
                "Tasks:      {} ({} completed, {} archived, {} overdue)",
                t.total_tasks,
                t.completed_tasks,
                t.archived_tasks,
                t.overdue_tasks
            );
            println!("Completion: {:.1}%", t.completion_rate * 100.0);
            println!("Revision:   {}", t.revision);
            for (status, count) in &t.tasks_by_status {
                println!("  {:<12} {}", status, count);
            }
            println!("Cache:      {}/{} entries", stats.cache.size, stats.cache.capacity);
        }),
        Command::Search(args) => run_search(&engine, args, format),
        Command::Resolve(args) => run_resolve(&engine, args, format),
        Command::Mirror(args) => run_mirror(&engine, args.action, format).await,
    }
}

/// Tiered config, with the --config file taking the place of
/// TASK_STORE_CONFIG_PATH and CLI paths applied last.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let explicit = cli.config.clone();
    let loader = ConfigLoader::load_with_env(ConfigPaths::discover(), |key| {
        if key == "TASK_STORE_CONFIG_PATH" {
            if let Some(path) = &explicit {
                return Some(path.display().to_string());
            }
        }
        std::env::var(key).ok()
    })?;
    if let Some(path) = loader.config_path() {
        debug!("Using config file {}", path.display());
    }

    let mut config = loader.into_config();
    if let Some(store) = &cli.store {
        config.store.path = store.clone();
    }
    if let Some(mirror) = &cli.mirror {
        config.store.mirror_path = Some(mirror.clone());
    }
    config.validate()?;
    Ok(config)
}

fn print<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

async fn run_check(engine: &TaskEngine, args: CheckArgs, format: OutputFormat) -> Result<()> {
    if args.quick {
        let ok = engine.quick_check();
        print(format, &serde_json::json!({ "ok": ok }), |_| {
            println!("{}", if ok { "ok" } else { "inconsistent" });
        })?;
        if !ok {
            bail!("quick check failed");
        }
        return Ok(());
    }

    let report = engine.check_consistency(args.fix).await?;
    print(format, &report, |report| {
        for fix in &report.fixed_issues {
            println!("fixed    {}", fix);
        }
        for finding in &report.errors {
            println!("error    {:?}: {}", finding.code, finding.message);
        }
        for finding in &report.warnings {
            println!("warning  {:?}: {}", finding.code, finding.message);
        }
        println!(
            "{} errors, {} warnings, {} fixed",
            report.errors.len(),
            report.warnings.len(),
            report.fixed_issues.len()
        );
    })?;
    if !report.is_valid {
        bail!("store has {} integrity errors", report.errors.len());
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No matches.");
    }
    for hit in hits {
        println!("{:<40} {:.2}  {}", hit.task.id, hit.score, hit.task.title);
    }
}

fn run_search(engine: &TaskEngine, args: SearchArgs, format: OutputFormat) -> Result<()> {
    let limit = engine.config().search.limit;
    if args.mode == SearchMode::Auto {
        let result = engine.search(&args.query);
        return print(format, &result, |result| {
            println!("Tier: {:?}", result.tier);
            print_hits(&result.hits);
        });
    }

    let mut hits = engine.with_search_index(|index| match args.mode {
        SearchMode::Exact => index.exact(&args.query),
        SearchMode::Fuzzy => index.fuzzy(&args.query, args.threshold),
        SearchMode::Regex => index.regex(&args.query, &[]),
        SearchMode::Id | SearchMode::Auto => index.by_id(&args.query),
    });
    hits.truncate(limit);
    print(format, &hits, |hits| print_hits(hits))
}

fn run_resolve(engine: &TaskEngine, args: ResolveArgs, format: OutputFormat) -> Result<()> {
    let task = engine.resolve_task(&args.input, None)?;
    print(format, &task, |task| {
        println!("{}  [{}]  {}", task.id, task.status, task.title);
    })
}

async fn run_mirror(engine: &TaskEngine, action: MirrorCommand, format: OutputFormat) -> Result<()> {
    match action {
        MirrorCommand::Render { write: false, .. } => {
            print!("{}", engine.render_mirror());
            Ok(())
        }
        MirrorCommand::Render { write: true, force } => {
            let content = engine.write_mirror(force).await?;
            info!(bytes = content.len(), "Mirror written");
            println!("Wrote {}", engine.mirror_path()?.display());
            Ok(())
        }
        MirrorCommand::Detect => {
            let detection = engine.detect_mirror_drift().await?;
            print(format, &detection, |d| {
                if d.has_changes {
                    println!("Mirror changed since last sync ({:?})", d.sync_status);
                } else {
                    println!("Mirror in sync");
                }
            })
        }
        MirrorCommand::Reconcile { apply } => {
            let outcome = engine.reconcile_mirror(apply).await?;
            print(format, &outcome, |o| {
                let d = &o.diff;
                println!("to complete: {:?}", d.to_complete);
                println!("to reopen:   {:?}", d.to_reopen);
                println!("retitled:    {:?}", d.retitled);
                println!("untracked:   {:?}", d.untracked);
                println!("unknown ids: {:?}", d.unknown_ids);
                println!("missing:     {:?}", d.missing);
                if let Some(applied) = &o.applied {
                    println!("applied {} edits, {} failed", applied.succeeded, applied.failed);
                }
            })
        }
        MirrorCommand::Watch { debounce_ms } => {
            let mut handle = engine.watch_mirror(Duration::from_millis(debounce_ms)).await?;
            println!("Watching {} (Ctrl-C to stop)", engine.mirror_path()?.display());
            loop {
                tokio::select! {
                    event = handle.wait_for_change() => {
                        let Some(event) = event else { break };
                        if !event.requires_check() {
                            continue;
                        }
                        let detection = engine.detect_mirror_drift().await?;
                        if detection.has_changes {
                            println!("Mirror drift detected ({})", detection.current_hash);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            Ok(())
        }
    }
}
