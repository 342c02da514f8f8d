//! Mirror file operations: render, drift detection, reconcile, guarded
//! writes and watching.

use super::{BatchOp, BatchOutcome, Shared, TaskEngine, WriteOptions};
use crate::error::{EngineError, EngineResult};
use crate::sync::mirror::{self, MirrorDiff, MirrorItem};
use crate::sync::watcher::{MirrorWatcherHandle, start_mirror_watcher};
use crate::sync::{ChangeDetection, ModifiedBy, content_hash};
use crate::types::{NewTask, TaskGraph, TaskPatch, TaskStatus};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of [`TaskEngine::reconcile_mirror`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorReconcile {
    pub diff: MirrorDiff,
    /// Set when the diff was applied to the store.
    pub applied: Option<BatchOutcome>,
}

/// Mirror content, or empty when the file does not exist yet.
pub(crate) async fn read_mirror(path: &Path) -> EngineResult<String> {
    Ok(read_mirror_opt(path).await?.unwrap_or_default())
}

async fn read_mirror_opt(path: &Path) -> EngineResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::store(format!(
            "Failed to read mirror {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_file(path: &Path, content: &str) -> EngineResult<()> {
    let io_err = |e: std::io::Error| {
        EngineError::store(format!("Failed to write mirror {}: {}", path.display(), e))
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }
    tokio::fs::write(path, content).await.map_err(io_err)
}

fn no_mirror() -> EngineError {
    EngineError::invalid_state("No mirror path is configured").with_field("store.mirror_path")
}

/// Writes that bring the store in line with the mirror.
fn reconcile_ops(diff: &MirrorDiff, items: &[MirrorItem]) -> Vec<BatchOp> {
    let mut ops = Vec::new();
    for id in &diff.to_complete {
        ops.push(status_op(id, TaskStatus::Completed));
    }
    for id in &diff.to_reopen {
        ops.push(status_op(id, TaskStatus::Pending));
    }
    for (id, title) in &diff.retitled {
        ops.push(BatchOp::Update {
            id: id.clone(),
            patch: TaskPatch {
                title: Some(title.clone()),
                note: Some("Renamed in mirror".into()),
                ..TaskPatch::default()
            },
        });
    }
    for item in items.iter().filter(|i| i.task_id.is_none() && !i.title.is_empty()) {
        let status = if item.checked {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        };
        ops.push(BatchOp::Create {
            task: NewTask {
                status: Some(status),
                ..NewTask::titled(item.title.clone())
            },
        });
    }
    ops
}

fn status_op(id: &str, status: TaskStatus) -> BatchOp {
    BatchOp::Update {
        id: id.to_string(),
        patch: TaskPatch {
            status: Some(status),
            note: Some("Changed in mirror".into()),
            ..TaskPatch::default()
        },
    }
}

impl TaskEngine {
    pub fn mirror_path(&self) -> EngineResult<PathBuf> {
        self.shared
            .config
            .store
            .mirror_path
            .clone()
            .ok_or_else(no_mirror)
    }

    /// Render the committed snapshot as a checklist.
    pub fn render_mirror(&self) -> String {
        mirror::render(&self.snapshot())
    }

    /// Compare the mirror file with the hash of the last synced content.
    pub async fn detect_mirror_drift(&self) -> EngineResult<ChangeDetection> {
        let content = read_mirror(&self.mirror_path()?).await?;
        self.update_sync(move |sync| Ok(sync.detect_todo_changes(&content)))
            .await
    }

    /// Diff the mirror against the store. With `apply`, human edits are
    /// written to the store and the mirror is rewritten from the result.
    pub async fn reconcile_mirror(&self, apply: bool) -> EngineResult<MirrorReconcile> {
        let path = self.mirror_path()?;
        let content = read_mirror(&path).await?;
        let items = mirror::parse(&content);
        let diff = mirror::reconcile(&self.snapshot(), &items);

        if !apply {
            return Ok(MirrorReconcile {
                diff,
                applied: None,
            });
        }
        if !diff.has_task_changes() {
            self.update_sync(move |sync| {
                sync.mark_synced(&content, ModifiedBy::Human);
                Ok(())
            })
            .await?;
            return Ok(MirrorReconcile {
                diff,
                applied: None,
            });
        }

        let ops = reconcile_ops(&diff, &items);
        let options = WriteOptions::default().continue_on_error().tool("mirror_reconcile");
        let outcome = self.batch(ops, options).await?;
        info!(
            path = %path.display(),
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "Applied mirror edits"
        );
        // Rewrite so newly created tasks get id markers
        self.write_mirror(true).await?;
        Ok(MirrorReconcile {
            diff,
            applied: Some(outcome),
        })
    }

    /// Render and write the mirror. Unless `force`, refuses with
    /// `MIRROR_CONFLICT` when the file changed since the engine last
    /// wrote or synced it.
    pub async fn write_mirror(&self, force: bool) -> EngineResult<String> {
        let _guard = self.shared.write_lock.lock().await;
        let graph = self.snapshot();
        self.shared.write_mirror_locked(&graph, force).await
    }

    /// Watch the mirror file for edits.
    pub async fn watch_mirror(&self, debounce: Duration) -> EngineResult<MirrorWatcherHandle> {
        let path = self.mirror_path()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(EngineError::store)?;
            }
        }
        start_mirror_watcher(path, debounce).map_err(EngineError::internal)
    }
}

impl Shared {
    /// Caller holds the write lock.
    pub(super) async fn write_mirror_locked(&self, graph: &TaskGraph, force: bool) -> EngineResult<String> {
        let path = self.config.store.mirror_path.clone().ok_or_else(no_mirror)?;
        let on_disk = read_mirror_opt(&path).await?;
        let mut coordinator = self.coordinator().clone();

        if !force {
            let recorded = coordinator.sync_state().todo_md_hash.clone();
            if let (Some(existing), Some(recorded)) = (&on_disk, recorded) {
                if content_hash(existing) != recorded {
                    coordinator.mark_conflict();
                    self.save(graph, &coordinator).await?;
                    *self.coordinator() = coordinator;
                    warn!(path = %path.display(), "Mirror changed on disk since last sync, not overwriting");
                    return Err(EngineError::mirror_conflict(&path.display().to_string()));
                }
            }
        }

        let content = mirror::render(graph);
        write_file(&path, &content).await?;
        coordinator.record_tool_snapshot(&content);
        self.save(graph, &coordinator).await?;
        *self.coordinator() = coordinator;
        info!(path = %path.display(), bytes = content.len(), "Mirror written");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_ops_cover_every_edit() {
        let items = mirror::parse(
            "- [x] Done now <!-- id:t1 -->\n- [ ] Renamed <!-- id:t2 -->\n- [x] Fresh item\n",
        );
        let diff = MirrorDiff {
            to_complete: vec!["t1".into()],
            retitled: vec![("t2".into(), "Renamed".into())],
            untracked: vec!["Fresh item".into()],
            ..MirrorDiff::default()
        };

        let ops = reconcile_ops(&diff, &items);
        assert_eq!(ops.len(), 3);
        assert!(matches!(
            &ops[0],
            BatchOp::Update { id, patch } if id == "t1" && patch.status == Some(TaskStatus::Completed)
        ));
        assert!(matches!(
            &ops[2],
            BatchOp::Create { task } if task.title == "Fresh item" && task.status == Some(TaskStatus::Completed)
        ));
    }

    #[tokio::test]
    async fn missing_mirror_reads_as_empty() {
        let temp = tempfile::TempDir::new().unwrap();
        let content = read_mirror(&temp.path().join("TODO.md")).await.unwrap();
        assert!(content.is_empty());
    }
}
