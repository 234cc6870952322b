use crate::config::CloudSettings;
use crate::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Succeeded,
    FailedPermanently,
}

#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: u64,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub retries: u32,
    pub state: TaskState,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    not_before: Option<Instant>,
}

impl UploadTask {
    fn is_ready(&self, now: Instant) -> bool {
        self.state == TaskState::Pending && self.not_before.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CloudSettings::default())
    }
}

impl From<&CloudSettings> for RetryPolicy {
    fn from(settings: &CloudSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_secs(settings.retry_base_delay_secs),
            max_delay: Duration::from_secs(settings.retry_max_delay_secs),
        }
    }
}

/// Delay before the attempt following the `retries`-th failure:
/// `base * 2^(retries - 1)`, capped at `max`.
pub fn backoff_delay(retries: u32, base: Duration, max: Duration) -> Duration {
    let exponent = retries.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}

/// What the drain worker should do next.
#[derive(Debug)]
pub enum Ready {
    Task(UploadTask),
    /// Only delayed tasks remain; the earliest becomes eligible at this instant.
    WaitUntil(Instant),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
    Abandoned,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueueItem {
    pub id: u64,
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
    pub state: TaskState,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueueSnapshot {
    pub queue_size: usize,
    pub items: Vec<QueueItem>,
}

struct Inner {
    tasks: VecDeque<UploadTask>,
    next_id: u64,
}

/// FIFO of pending uploads. Every access goes through one lock that is never
/// held across an await, so snapshots never wait on a running upload.
pub struct UploadQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    policy: RetryPolicy,
}

impl UploadQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                next_id: 1,
            }),
            notify: Notify::new(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn enqueue(&self, path: &Path) -> u64 {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.tasks.push_back(UploadTask {
                id,
                path: path.to_path_buf(),
                created_at: Utc::now(),
                retries: 0,
                state: TaskState::Pending,
                last_error: None,
                next_attempt_at: None,
                not_before: None,
            });
            id
        };
        info!("Queued upload #{} for {:?}", id, path);
        self.notify.notify_one();
        id
    }

    /// Marks the first eligible task in-flight and hands out a copy of it.
    pub fn next_ready(&self) -> Ready {
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(task) = inner.tasks.iter_mut().find(|t| t.is_ready(now)) {
            task.state = TaskState::InFlight;
            task.next_attempt_at = None;
            return Ready::Task(task.clone());
        }

        inner
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Pending)
            .filter_map(|t| t.not_before)
            .min()
            .map_or(Ready::Empty, Ready::WaitUntil)
    }

    pub fn complete(&self, id: u64) -> Option<UploadTask> {
        let mut task = self.remove(id)?;
        task.state = TaskState::Succeeded;
        info!("Upload #{} succeeded: {:?}", id, task.path);
        Some(task)
    }

    /// Records a failed attempt. Retryable failures go back to the tail after
    /// their backoff; everything else leaves the queue for good.
    pub fn fail(&self, id: u64, err: &Error) -> FailureOutcome {
        let mut inner = self.lock();
        let Some(pos) = inner.tasks.iter().position(|t| t.id == id) else {
            return FailureOutcome::Abandoned;
        };
        let Some(mut task) = inner.tasks.remove(pos) else {
            return FailureOutcome::Abandoned;
        };

        task.retries += 1;
        task.last_error = Some(err.to_string());

        if err.is_retryable() && task.retries < self.policy.max_retries {
            let delay = backoff_delay(task.retries, self.policy.base_delay, self.policy.max_delay);
            task.state = TaskState::Pending;
            task.not_before = Some(Instant::now() + delay);
            task.next_attempt_at = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| Utc::now() + d);
            warn!(
                "Upload #{} failed (attempt {}), retrying in {:?}: {}",
                id, task.retries, delay, err
            );
            let attempt = task.retries;
            inner.tasks.push_back(task);
            drop(inner);
            self.notify.notify_one();
            FailureOutcome::Retry { attempt, delay }
        } else {
            task.state = TaskState::FailedPermanently;
            error!(
                "Upload #{} failed permanently after {} attempt(s): {:?}: {}",
                id, task.retries, task.path, err
            );
            FailureOutcome::Exhausted {
                attempts: task.retries,
            }
        }
    }

    /// Puts an in-flight task back without counting an attempt.
    pub fn release(&self, id: u64) {
        let mut inner = self.lock();
        if let Some(task) = inner.tasks.iter_mut().find(|t| t.id == id) {
            task.state = TaskState::Pending;
        }
    }

    fn remove(&self, id: u64) -> Option<UploadTask> {
        let mut inner = self.lock();
        let pos = inner.tasks.iter().position(|t| t.id == id)?;
        inner.tasks.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            queue_size: inner.tasks.len(),
            items: inner
                .tasks
                .iter()
                .map(|t| QueueItem {
                    id: t.id,
                    path: t.path.clone(),
                    timestamp: t.created_at,
                    retries: t.retries,
                    state: t.state,
                    last_error: t.last_error.clone(),
                    next_attempt_at: t.next_attempt_at,
                })
                .collect(),
        }
    }

    pub(crate) async fn wait_for_work(&self) {
        self.notify.notified().await
    }
}
