//! relaybot-engine: the task lifecycle engine.
//!
//! Ties together the store, the automation-agent boundary, and the
//! notification channel: durable scheduling, at-most-once execution per
//! task, bounded-wait monitoring, and exactly one terminal notification
//! per task.

pub mod executor;
pub mod notify;
pub mod scheduler;
pub mod state;

use chrono::{DateTime, FixedOffset};

use relaybot_store::{StoreError, TaskStore};
use relaybot_types::{InvalidTask, ScheduledTask, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidTask(#[from] InvalidTask),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task {0} belongs to another owner")]
    NotOwner(String),
    #[error("task {id} can no longer be cancelled (status: {status})")]
    NotCancellable { id: String, status: TaskStatus },
}

/// Create and persist a new `Pending` task. Validation (future time,
/// http(s) webhook URL) happens before anything touches the store, so a
/// rejected request never enters the lifecycle.
pub async fn schedule_task(
    store: &TaskStore,
    owner: &str,
    scheduled_at: DateTime<FixedOffset>,
    webhook_url: &str,
    notes: &str,
) -> Result<ScheduledTask, EngineError> {
    let task = ScheduledTask::new(owner, scheduled_at, webhook_url, notes)?;
    store.create(&task).await?;
    tracing::info!(
        task_id = %task.id,
        owner = %task.owner,
        scheduled_at = %task.scheduled_at,
        "Task scheduled"
    );
    Ok(task)
}

/// Cancel a `Pending` task owned by `owner`. With `purge` the row is
/// deleted outright; otherwise it is marked `Cancelled` and retained for
/// listing. Cancellation is terminal and sends no notification. Tasks
/// already dispatched cannot be cancelled this way; a running executor is
/// only stopped cooperatively at shutdown.
pub async fn cancel_task(
    store: &TaskStore,
    owner: &str,
    id: &str,
    purge: bool,
) -> Result<ScheduledTask, EngineError> {
    let task = store
        .get(id)
        .await?
        .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
    if task.owner != owner {
        return Err(EngineError::NotOwner(id.to_string()));
    }
    if task.status != TaskStatus::Pending {
        return Err(EngineError::NotCancellable {
            id: id.to_string(),
            status: task.status,
        });
    }

    if purge {
        // The status guard in delete keeps a concurrent claim from losing
        // a running task's row.
        if !store.delete(id).await? {
            return Err(EngineError::NotCancellable {
                id: id.to_string(),
                status: TaskStatus::Running,
            });
        }
        tracing::info!(task_id = %id, "Task cancelled and purged");
        Ok(task)
    } else {
        let cancelled = store
            .update(id, |t| t.status = TaskStatus::Cancelled)
            .await?;
        tracing::info!(task_id = %id, "Task cancelled");
        Ok(cancelled)
    }
}

/// Restart bootstrap: reload persisted state and re-queue tasks a
/// previous process left in flight. Must run before the scheduler's
/// first poll.
pub async fn recover_on_startup(store: &TaskStore) -> Result<usize, EngineError> {
    Ok(store.recover().await?)
}
