//! File watcher for the mirror checklist.
//!
//! Watches the mirror's parent directory (editors often replace files
//! rather than writing in place) and emits debounced events through a
//! tokio watch channel. Consumers decide whether a change is drift by
//! comparing content hashes via the coordinator.

use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// How often the event loop checks whether the handle was dropped.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    /// The mirror file was created, modified or replaced.
    Changed(PathBuf),
    /// The mirror file no longer exists.
    Removed(PathBuf),
    /// Watcher encountered an error.
    Error(String),
}

impl MirrorEvent {
    /// Returns true if this event warrants a drift check.
    pub fn requires_check(&self) -> bool {
        !matches!(self, MirrorEvent::Error(_))
    }
}

/// Handle to a running mirror watcher. Dropping it stops the watch.
pub struct MirrorWatcherHandle {
    pub events: watch::Receiver<Option<MirrorEvent>>,
    _task_handle: tokio::task::JoinHandle<()>,
}

impl MirrorWatcherHandle {
    /// Wait for the next event. Returns `None` once the watcher stops.
    pub async fn wait_for_change(&mut self) -> Option<MirrorEvent> {
        loop {
            if self.events.changed().await.is_err() {
                return None;
            }
            let event = self.events.borrow().clone();
            if event.is_some() {
                return event;
            }
        }
    }

    pub fn latest_event(&self) -> Option<MirrorEvent> {
        self.events.borrow().clone()
    }
}

/// Start watching `mirror_path`. The parent directory must exist.
pub fn start_mirror_watcher(
    mirror_path: PathBuf,
    debounce: Duration,
) -> Result<MirrorWatcherHandle, notify::Error> {
    let (event_tx, event_rx) = watch::channel(None);
    let (notify_tx, notify_rx) = mpsc::channel();

    let mut debouncer = new_debouncer(debounce, notify_tx)?;
    let dir = match mirror_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    info!("Watching mirror file: {}", mirror_path.display());
    debouncer
        .watcher()
        .watch(&dir, notify::RecursiveMode::NonRecursive)?;

    let task_handle = tokio::task::spawn_blocking(move || {
        // Keep the debouncer alive for the lifetime of the task
        let _debouncer = debouncer;
        process_notify_events(notify_rx, event_tx, &mirror_path);
    });

    Ok(MirrorWatcherHandle {
        events: event_rx,
        _task_handle: task_handle,
    })
}

fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    tx: watch::Sender<Option<MirrorEvent>>,
    mirror_path: &Path,
) {
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(events)) => {
                if let Some(event) = classify_events(&events, mirror_path) {
                    debug!("Mirror change detected: {:?}", event);
                    if tx.send(Some(event)).is_err() {
                        info!("Mirror watcher receiver dropped, stopping");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                error!("Mirror watcher error: {}", e);
                let _ = tx.send(Some(MirrorEvent::Error(e.to_string())));
            }
            Err(RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    info!("Mirror watcher handle dropped, stopping");
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                info!("Mirror watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Collapse a debounced batch into at most one event for the mirror file.
fn classify_events(events: &[DebouncedEvent], mirror_path: &Path) -> Option<MirrorEvent> {
    let touched = events.iter().any(|event| {
        matches!(
            event.kind,
            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
        ) && same_file(&event.path, mirror_path)
    });
    if !touched {
        return None;
    }
    if mirror_path.exists() {
        Some(MirrorEvent::Changed(mirror_path.to_path_buf()))
    } else {
        Some(MirrorEvent::Removed(mirror_path.to_path_buf()))
    }
}

/// Notify reports canonical absolute paths; the configured path may be
/// relative or pass through a symlinked directory.
fn same_file(event_path: &Path, mirror_path: &Path) -> bool {
    if event_path == mirror_path {
        return true;
    }
    if event_path.file_name() != mirror_path.file_name() {
        return false;
    }
    let dir = |p: &Path| {
        p.parent()
            .map(|d| if d.as_os_str().is_empty() { Path::new(".") } else { d })
            .and_then(|d| d.canonicalize().ok())
    };
    match (dir(event_path), dir(mirror_path)) {
        (Some(a), Some(b)) => a == b,
        _ => event_path.ends_with(mirror_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str) -> DebouncedEvent {
        DebouncedEvent {
            path: PathBuf::from(path),
            kind: DebouncedEventKind::Any,
        }
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let events = vec![event("/work/notes.md"), event("/work/tasks.json")];
        assert_eq!(classify_events(&events, Path::new("/work/TODO.md")), None);
    }

    #[test]
    fn removed_mirror_is_reported() {
        let temp = tempfile::TempDir::new().unwrap();
        let mirror = temp.path().join("TODO.md");
        let events = vec![DebouncedEvent {
            path: mirror.clone(),
            kind: DebouncedEventKind::Any,
        }];
        assert_eq!(
            classify_events(&events, &mirror),
            Some(MirrorEvent::Removed(mirror.clone()))
        );

        std::fs::write(&mirror, "- [ ] a").unwrap();
        assert_eq!(
            classify_events(&events, &mirror),
            Some(MirrorEvent::Changed(mirror))
        );
    }

    #[test]
    fn relative_mirror_path_matches_absolute_event() {
        let abs = std::path::absolute("docs/TODO.md").unwrap();
        assert!(same_file(&abs, Path::new("docs/TODO.md")));
        assert!(!same_file(&abs, Path::new("docs/OTHER.md")));
    }

    #[test]
    fn error_events_do_not_require_check() {
        assert!(MirrorEvent::Changed(PathBuf::new()).requires_check());
        assert!(!MirrorEvent::Error("x".into()).requires_check());
    }

    #[tokio::test]
    async fn watcher_reports_edits() {
        let temp = tempfile::TempDir::new().unwrap();
        let mirror = temp.path().join("TODO.md");
        std::fs::write(&mirror, "- [ ] a").unwrap();

        let mut handle = start_mirror_watcher(mirror.clone(), Duration::from_millis(50)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&mirror, "- [x] a").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), handle.wait_for_change())
            .await
            .expect("watcher timed out");
        assert!(matches!(event, Some(MirrorEvent::Changed(_))));
    }
}
