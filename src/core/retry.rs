// src/core/retry.rs

//! A keyed retry queue for fire-and-forget provider operations.
//!
//! Each task is identified by a caller-chosen id, runs through a schedule
//! of explicit delays up to `max_attempts`, and yields a shareable future.
//! Re-adding an id that is still pending returns the existing future, so
//! callers are free to schedule the same logical work twice.

use crate::core::errors::MirrorError;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The shareable completion handle of a scheduled task.
pub type RetryFuture = Shared<BoxFuture<'static, Result<(), MirrorError>>>;

/// The operation a task retries. Invoked with the 1-based attempt number;
/// must be safe to run multiple times.
pub type RetryOp =
    Box<dyn Fn(u32) -> BoxFuture<'static, Result<(), MirrorError>> + Send + Sync + 'static>;

/// Relative ordering among pending tasks, used when draining diagnostics
/// and when the cleanup pass has to shed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RetryPriority {
    High,
    #[default]
    Normal,
    Low,
}

/// Everything needed to schedule one task.
pub struct RetryTask {
    pub id: String,
    pub priority: RetryPriority,
    pub max_attempts: u32,
    /// Delay before attempt N+1 is `delays[N-1]`; the last entry repeats if
    /// the schedule is shorter than the attempt budget.
    pub delays: Vec<Duration>,
    pub op: RetryOp,
    pub on_success: Option<Box<dyn FnOnce() + Send + 'static>>,
    pub on_failure: Option<Box<dyn FnOnce(MirrorError) + Send + 'static>>,
}

struct RetryEntry {
    future: RetryFuture,
    cancel: CancellationToken,
    priority: RetryPriority,
    first_attempt_at: Instant,
}

/// Tasks whose first attempt is older than this are cancelled by the
/// hourly cleanup; whatever they were retrying is stale by then.
const STALE_TASK_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
pub struct RetryQueue {
    tasks: Arc<DashMap<String, RetryEntry>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Schedules a task, or returns the pending future when the id is
    /// already queued.
    pub fn schedule(&self, task: RetryTask) -> RetryFuture {
        if let Some(existing) = self.tasks.get(&task.id) {
            return existing.future.clone();
        }

        let RetryTask {
            id,
            priority,
            max_attempts,
            delays,
            op,
            on_success,
            on_failure,
        } = task;

        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel::<Result<(), MirrorError>>();
        let future: RetryFuture = async move { rx.await.unwrap_or(Err(MirrorError::Cancelled)) }
            .boxed()
            .shared();

        self.tasks.insert(
            id.clone(),
            RetryEntry {
                future: future.clone(),
                cancel: cancel.clone(),
                priority,
                first_attempt_at: Instant::now(),
            },
        );

        let tasks = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            let result = Self::drive(&id, max_attempts, &delays, &op, &cancel).await;
            match &result {
                Ok(()) => {
                    if let Some(cb) = on_success {
                        cb();
                    }
                }
                Err(e) => {
                    if let Some(cb) = on_failure {
                        cb(e.clone());
                    }
                }
            }
            tasks.remove(&id);
            let _ = tx.send(result);
        });

        future
    }

    /// Runs the attempt ladder for one task.
    async fn drive(
        id: &str,
        max_attempts: u32,
        delays: &[Duration],
        op: &RetryOp,
        cancel: &CancellationToken,
    ) -> Result<(), MirrorError> {
        let mut last_err = MirrorError::Internal(format!("retry task '{id}' made no attempts"));
        for attempt in 1..=max_attempts.max(1) {
            if attempt > 1 {
                let idx = (attempt - 2) as usize;
                let delay = delays
                    .get(idx)
                    .or_else(|| delays.last())
                    .copied()
                    .unwrap_or(Duration::from_secs(1));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
                }
            }

            let attempt_fut = op(attempt);
            let outcome = tokio::select! {
                r = attempt_fut => r,
                _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(task = id, attempt, error = %e, "retry attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Cancels one pending task by id.
    pub fn cancel(&self, id: &str) {
        if let Some((_, entry)) = self.tasks.remove(id) {
            entry.cancel.cancel();
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pending task ids ordered by priority, for diagnostics.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<(RetryPriority, String)> = self
            .tasks
            .iter()
            .map(|e| (e.priority, e.key().clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Hourly cleanup: cancels tasks whose first attempt is older than one
    /// hour. Returns the number of tasks shed.
    pub fn cleanup_stale(&self) -> usize {
        let mut stale = Vec::new();
        for entry in self.tasks.iter() {
            if entry.first_attempt_at.elapsed() >= STALE_TASK_AGE {
                stale.push(entry.key().clone());
            }
        }
        for id in &stale {
            warn!(task = %id, "cancelling stale retry task");
            self.cancel(id);
        }
        stale.len()
    }

    /// Cancels everything; used on shutdown.
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel(&id);
        }
    }
}
