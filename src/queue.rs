//! Bounded work queue with backpressure and batched execution.
//!
//! Operations are admitted against a capacity that counts everything not
//! yet finished (queued plus executing). Admitted operations are grouped
//! into batches of at most `batch_size`, and at most
//! `max_concurrent_batches` batches run at once. Every operation runs in
//! its own task, so a failure or panic is reported to that caller only.
//!
//! When the queue is full:
//! - backpressure enabled: `submit` waits until capacity frees up
//! - backpressure disabled: `submit` fails fast with `QUEUE_OVERFLOW`

use crate::config::QueueConfig;
use crate::error::{EngineError, EngineResult};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

type Job = BoxFuture<'static, ()>;

/// Counters exposed by [`WorkQueue::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queue_length: usize,
    pub processing: usize,
    pub backpressure_active: bool,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub batches: u64,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    /// Admitted and not yet finished (pending + executing).
    outstanding: usize,
    executing: usize,
    active_batches: usize,
    stats: QueueStats,
}

struct Inner {
    config: Mutex<QueueConfig>,
    state: Mutex<QueueState>,
    /// Bumped whenever capacity frees up; waiters re-check state.
    changed: watch::Sender<u64>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn config(&self) -> QueueConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn notify(&self) {
        self.changed.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Bounded, batching work queue. Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                state: Mutex::new(QueueState::default()),
                changed,
            }),
        }
    }

    /// Replace the queue limits. Already admitted work is unaffected.
    pub fn configure(&self, config: QueueConfig) {
        *self.inner.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
        self.inner.notify();
        pump(&self.inner);
    }

    /// Submit an operation and wait for its result.
    ///
    /// The operation is not started until its batch is scheduled.
    pub async fn submit<T, F, Fut>(&self, op: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.admit().await?;

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let job = async move {
            let result = op().await;
            if result.is_err() {
                inner.state().stats.failed += 1;
            }
            let _ = tx.send(result);
        }
        .boxed();

        {
            let mut state = self.inner.state();
            state.pending.push_back(job);
            state.stats.submitted += 1;
        }
        pump(&self.inner);

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::cancelled()),
        }
    }

    /// Reserve capacity for one operation, waiting or failing per config.
    async fn admit(&self) -> EngineResult<()> {
        let mut changes = self.inner.changed.subscribe();
        let mut waited = false;
        loop {
            let config = self.inner.config();
            {
                let mut state = self.inner.state();
                if config.backpressure_enabled {
                    if state.outstanding < config.backpressure_limit() {
                        state.outstanding += 1;
                        if waited {
                            debug!(outstanding = state.outstanding, "Backpressure released");
                        }
                        return Ok(());
                    }
                } else if state.outstanding < config.max_queue_size {
                    state.outstanding += 1;
                    return Ok(());
                } else {
                    state.stats.rejected += 1;
                    warn!(
                        max_queue_size = config.max_queue_size,
                        "Queue overflow, rejecting submission"
                    );
                    return Err(EngineError::queue_overflow(config.max_queue_size));
                }
            }

            if !waited {
                debug!("Backpressure active, delaying submission");
                waited = true;
            }
            if changes.changed().await.is_err() {
                return Err(EngineError::internal("work queue shut down"));
            }
        }
    }

    /// Operations admitted but not yet started.
    pub fn queue_length(&self) -> usize {
        self.inner.state().pending.len()
    }

    /// Operations currently executing.
    pub fn processing(&self) -> usize {
        self.inner.state().executing
    }

    /// Operations admitted and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.inner.state().outstanding
    }

    /// Whether new submissions would currently be delayed.
    pub fn backpressure_active(&self) -> bool {
        let config = self.inner.config();
        config.backpressure_enabled
            && self.inner.state().outstanding >= config.backpressure_limit()
    }

    /// Wait until every admitted operation has finished.
    pub async fn wait_for_completion(&self) {
        let mut changes = self.inner.changed.subscribe();
        loop {
            if self.inner.state().outstanding == 0 {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Drop every queued operation that has not started. Their callers
    /// receive `CANCELLED`; executing batches run to completion.
    pub fn clear(&self) -> usize {
        let dropped: Vec<Job> = {
            let mut state = self.inner.state();
            let dropped: Vec<Job> = state.pending.drain(..).collect();
            state.outstanding -= dropped.len();
            state.stats.cancelled += dropped.len() as u64;
            dropped
        };
        let count = dropped.len();
        drop(dropped);
        if count > 0 {
            debug!(dropped = count, "Cleared queued operations");
        }
        self.inner.notify();
        count
    }

    pub fn stats(&self) -> QueueStats {
        let backpressure_active = self.backpressure_active();
        let state = self.inner.state();
        QueueStats {
            queue_length: state.pending.len(),
            processing: state.executing,
            backpressure_active,
            ..state.stats.clone()
        }
    }
}

/// Start as many batches as the concurrency limit allows.
fn pump(inner: &Arc<Inner>) {
    let config = inner.config();
    let batch_size = config.batch_size.max(1);
    let max_batches = config.max_concurrent_batches.max(1);

    let mut batches: Vec<Vec<Job>> = Vec::new();
    {
        let mut state = inner.state();
        while state.active_batches < max_batches && !state.pending.is_empty() {
            let take = batch_size.min(state.pending.len());
            let batch: Vec<Job> = state.pending.drain(..take).collect();
            state.active_batches += 1;
            state.executing += batch.len();
            state.stats.batches += 1;
            batches.push(batch);
        }
    }

    for batch in batches {
        let inner = Arc::clone(inner);
        tokio::spawn(run_batch(inner, batch));
    }
}

async fn run_batch(inner: Arc<Inner>, batch: Vec<Job>) {
    let size = batch.len();
    let handles: Vec<_> = batch.into_iter().map(tokio::spawn).collect();
    for joined in join_all(handles).await {
        if let Err(e) = joined {
            // The caller's channel was dropped with the task and reports CANCELLED
            warn!(error = %e, "Queued operation panicked");
        }
    }

    {
        let mut state = inner.state();
        state.active_batches -= 1;
        state.executing -= size;
        state.outstanding -= size;
        state.stats.completed += size as u64;
    }
    inner.notify();
    pump(&inner);
}
