//! relaybot-store: SQLite-backed persistence for scheduled tasks.
//!
//! One row per task. The store offers durable CRUD plus two atomic
//! primitives the engine builds on: `update` (transactional
//! read-modify-write with a version bump) and `claim` (compare-and-swap
//! dispatch of a pending task). No lifecycle behavior lives here beyond
//! guarding transition validity on writes.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;

use relaybot_types::{ScheduledTask, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("result payload encode/decode error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task id already exists: {0}")]
    DuplicateId(String),
    #[error("illegal status transition for task {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("stored task row is corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    scheduled_at TEXT NOT NULL,
    due_at_ms INTEGER NOT NULL,
    webhook_url TEXT NOT NULL,
    notes TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    result TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_status_due
    ON scheduled_tasks (status, due_at_ms);
CREATE INDEX IF NOT EXISTS idx_tasks_owner
    ON scheduled_tasks (owner, due_at_ms);";

const COLUMNS: &str = "id, owner, scheduled_at, webhook_url, notes, status, \
                       attempts, result, error, created_at, updated_at, version";

/// SQLite-backed store for [`ScheduledTask`] rows.
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let parse_failure = |col: &str, value: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("bad {col} value: {value}").into(),
        )
    };

    let scheduled_at: String = row.get(2)?;
    let status: String = row.get(5)?;
    let result_json: Option<String> = row.get(7)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(ScheduledTask {
        id: row.get(0)?,
        owner: row.get(1)?,
        scheduled_at: DateTime::parse_from_rfc3339(&scheduled_at)
            .map_err(|_| parse_failure("scheduled_at", &scheduled_at))?,
        webhook_url: row.get(3)?,
        notes: row.get(4)?,
        status: status
            .parse()
            .map_err(|_| parse_failure("status", &status))?,
        attempts: row.get(6)?,
        result: match result_json {
            Some(json) => Some(
                serde_json::from_str(&json).map_err(|_| parse_failure("result", &json))?,
            ),
            None => None,
        },
        error: row.get(8)?,
        created_at: created_at
            .parse()
            .map_err(|_| parse_failure("created_at", &created_at))?,
        updated_at: updated_at
            .parse()
            .map_err(|_| parse_failure("updated_at", &updated_at))?,
        version: row.get(11)?,
    })
}

impl TaskStore {
    /// Open (or create) the task database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Task store opened: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a freshly created task. Rejects duplicate ids.
    pub async fn create(&self, task: &ScheduledTask) -> Result<String> {
        let conn = self.conn.clone();
        let task = task.clone();
        let result_json = task
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO scheduled_tasks
                     (id, owner, scheduled_at, due_at_ms, webhook_url, notes, status,
                      attempts, result, error, created_at, updated_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    task.id,
                    task.owner,
                    task.scheduled_at.to_rfc3339(),
                    task.scheduled_at.timestamp_millis(),
                    task.webhook_url,
                    task.notes,
                    task.status.as_str(),
                    task.attempts,
                    result_json,
                    task.error,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                    task.version,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::DuplicateId(task.id));
            }
            Ok(task.id)
        })
        .await?
    }

    /// Get a task by id.
    pub async fn get(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let task = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                    rusqlite::params![id],
                    row_to_task,
                )
                .optional()?;
            Ok(task)
        })
        .await?
    }

    /// All `Pending` tasks whose scheduled time has passed, oldest first.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.clone();
        let now_ms = now.timestamp_millis();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM scheduled_tasks
                 WHERE status = 'pending' AND due_at_ms <= ?1
                 ORDER BY due_at_ms"
            ))?;
            let tasks = stmt
                .query_map(rusqlite::params![now_ms], row_to_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
        .await?
    }

    /// All tasks belonging to an owner, soonest first. Terminal tasks are
    /// retained, so this backs task-listing views.
    pub async fn list_by_owner(&self, owner: &str) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.clone();
        let owner = owner.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM scheduled_tasks
                 WHERE owner = ?1 ORDER BY due_at_ms"
            ))?;
            let tasks = stmt
                .query_map(rusqlite::params![owner], row_to_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
        .await?
    }

    /// Atomic read-modify-write. The mutation runs inside a transaction;
    /// `version` and `updated_at` are bumped on commit. Status changes
    /// must follow the lifecycle graph, and terminal rows are immutable.
    pub async fn update<F>(&self, id: &str, mutation: F) -> Result<ScheduledTask>
    where
        F: FnOnce(&mut ScheduledTask) + Send + 'static,
    {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;

            let mut task = tx
                .query_row(
                    &format!("SELECT {COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                    rusqlite::params![id],
                    row_to_task,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;

            let prev_status = task.status;
            let prev_version = task.version;
            mutation(&mut task);

            if task.status != prev_status && !prev_status.can_transition_to(task.status) {
                return Err(StoreError::IllegalTransition {
                    id,
                    from: prev_status,
                    to: task.status,
                });
            }
            if prev_status.is_terminal() {
                return Err(StoreError::IllegalTransition {
                    id,
                    from: prev_status,
                    to: task.status,
                });
            }

            task.version = prev_version + 1;
            task.updated_at = Utc::now();
            let result_json = task
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let changed = tx.execute(
                "UPDATE scheduled_tasks
                 SET status = ?1, attempts = ?2, result = ?3, error = ?4,
                     updated_at = ?5, version = ?6
                 WHERE id = ?7 AND version = ?8",
                rusqlite::params![
                    task.status.as_str(),
                    task.attempts,
                    result_json,
                    task.error,
                    task.updated_at.to_rfc3339(),
                    task.version,
                    task.id,
                    prev_version,
                ],
            )?;
            if changed == 0 {
                // Version moved under us; the connection mutex should make
                // this unreachable, but surface it rather than lose a write.
                return Err(StoreError::Corrupt(format!(
                    "version conflict updating task {}",
                    task.id
                )));
            }
            tx.commit()?;
            Ok(task)
        })
        .await?
    }

    /// Atomically flip a `Pending` task to `Running` and return it.
    /// Returns `None` when the task is gone or no longer pending, which is
    /// how the scheduler avoids double dispatch.
    pub async fn claim(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn.execute(
                "UPDATE scheduled_tasks
                 SET status = 'running', updated_at = ?1, version = version + 1
                 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![Utc::now().to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let task = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                    rusqlite::params![id],
                    row_to_task,
                )
                .optional()?;
            Ok(task)
        })
        .await?
    }

    /// Remove a `Pending` task. Returns whether a row was deleted; tasks
    /// that have left `Pending` are never deleted.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let deleted = conn.execute(
                "DELETE FROM scheduled_tasks WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![id],
            )?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Restart recovery: re-queue tasks a crashed process left in flight.
    /// An in-flight browser session cannot be inherited across a process
    /// boundary, so `Running`/`Cooldown` rows go back to `Pending` with
    /// their attempt counts preserved. Returns the number re-queued.
    pub async fn recover(&self) -> Result<usize> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let requeued = conn.execute(
                "UPDATE scheduled_tasks
                 SET status = 'pending', updated_at = ?1, version = version + 1
                 WHERE status IN ('running', 'cooldown')",
                rusqlite::params![Utc::now().to_rfc3339()],
            )?;
            if requeued > 0 {
                tracing::info!(count = requeued, "Re-queued in-flight tasks from prior run");
            }
            Ok(requeued)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};
    use relaybot_types::SubmissionResult;

    fn sample_task(owner: &str, minutes_ahead: i64) -> ScheduledTask {
        let at = (Utc::now() + Duration::minutes(minutes_ahead)).fixed_offset();
        ScheduledTask::new(owner, at, "https://example.com/hook", "store test").unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let store = TaskStore::open_in_memory().unwrap();
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let at = ist.with_ymd_and_hms(2099, 1, 15, 20, 15, 0).unwrap();
        let task = ScheduledTask::new("42", at, "https://example.com/hook", "round trip").unwrap();

        store.create(&task).await.unwrap();
        let loaded = store.get(&task.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.owner, "42");
        assert_eq!(loaded.scheduled_at, task.scheduled_at);
        assert_eq!(loaded.scheduled_at.offset(), task.scheduled_at.offset());
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.attempts, 0);
        assert!(loaded.result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = sample_task("42", 5);
        store.create(&task).await.unwrap();
        let err = store.create(&task).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let store = TaskStore::open_in_memory().unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_due_filters_and_orders() {
        let store = TaskStore::open_in_memory().unwrap();
        let soon = sample_task("42", 1);
        let later = sample_task("42", 2);
        let far = sample_task("42", 600);
        store.create(&later).await.unwrap();
        store.create(&soon).await.unwrap();
        store.create(&far).await.unwrap();

        let now = Utc::now() + Duration::minutes(5);
        let due = store.list_due(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, soon.id);
        assert_eq!(due[1].id, later.id);

        // A claimed task is no longer due.
        store.claim(&soon.id).await.unwrap();
        let due = store.list_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, later.id);
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create(&sample_task("alice", 5)).await.unwrap();
        store.create(&sample_task("alice", 10)).await.unwrap();
        store.create(&sample_task("bob", 5)).await.unwrap();

        assert_eq!(store.list_by_owner("alice").await.unwrap().len(), 2);
        assert_eq!(store.list_by_owner("bob").await.unwrap().len(), 1);
        assert!(store.list_by_owner("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exactly_once() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = sample_task("42", 1);
        store.create(&task).await.unwrap();

        let claimed = store.claim(&task.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.version, 1);

        // Second claim must lose.
        assert!(store.claim(&task.id).await.unwrap().is_none());
        // Claiming a missing task is also a no-op.
        assert!(store.claim("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_persists_result() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = sample_task("42", 1);
        store.create(&task).await.unwrap();
        store.claim(&task.id).await.unwrap();

        let updated = store
            .update(&task.id, |t| {
                t.status = TaskStatus::Cooldown;
                t.attempts = 1;
            })
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Cooldown);
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.version, 2);

        let done = store
            .update(&task.id, |t| {
                t.status = TaskStatus::Completed;
                t.result = Some(SubmissionResult {
                    accuracy: Some(91.0),
                    response_time_ms: Some(120.0),
                    position: Some(2),
                });
            })
            .await
            .unwrap();
        assert_eq!(done.version, 3);

        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.result.unwrap().position, Some(2));
    }

    #[tokio::test]
    async fn test_update_rejects_illegal_transition() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = sample_task("42", 1);
        store.create(&task).await.unwrap();

        // Pending -> Completed skips the lifecycle graph.
        let err = store
            .update(&task.id, |t| t.status = TaskStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_terminal_rows_are_immutable() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = sample_task("42", 1);
        store.create(&task).await.unwrap();
        store
            .update(&task.id, |t| t.status = TaskStatus::Cancelled)
            .await
            .unwrap();

        let err = store
            .update(&task.id, |t| t.attempts = 99)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_update_not_found() {
        let store = TaskStore::open_in_memory().unwrap();
        let err = store.update("nope", |_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_only_pending() {
        let store = TaskStore::open_in_memory().unwrap();
        let pending = sample_task("42", 1);
        let running = sample_task("42", 1);
        store.create(&pending).await.unwrap();
        store.create(&running).await.unwrap();
        store.claim(&running.id).await.unwrap();

        assert!(store.delete(&pending.id).await.unwrap());
        assert!(store.get(&pending.id).await.unwrap().is_none());

        assert!(!store.delete(&running.id).await.unwrap());
        assert!(store.get(&running.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reopen_preserves_tasks_and_recovers_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");

        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let at = ist.with_ymd_and_hms(2099, 1, 15, 20, 15, 0).unwrap();
        let task = ScheduledTask::new("42", at, "https://example.com/hook", "reopen").unwrap();

        {
            let store = TaskStore::open(&db_path).unwrap();
            store.create(&task).await.unwrap();
            store.claim(&task.id).await.unwrap();
            store
                .update(&task.id, |t| {
                    t.status = TaskStatus::Cooldown;
                    t.attempts = 1;
                })
                .await
                .unwrap();
        }

        // A second open on the same path sees the persisted row intact,
        // offset included, and recovery re-queues it.
        let store = TaskStore::open(&db_path).unwrap();
        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Cooldown);
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.scheduled_at, task.scheduled_at);
        assert_eq!(loaded.scheduled_at.offset(), task.scheduled_at.offset());
        assert_eq!(loaded.webhook_url, task.webhook_url);

        assert_eq!(store.recover().await.unwrap(), 1);
        let recovered = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, TaskStatus::Pending);
        assert_eq!(recovered.attempts, 1);
    }

    #[tokio::test]
    async fn test_recover_requeues_in_flight_preserving_attempts() {
        let store = TaskStore::open_in_memory().unwrap();
        let running = sample_task("42", 1);
        let cooling = sample_task("42", 1);
        let done = sample_task("42", 1);
        for t in [&running, &cooling, &done] {
            store.create(t).await.unwrap();
        }

        store.claim(&running.id).await.unwrap();
        store
            .update(&running.id, |t| t.attempts = 2)
            .await
            .unwrap();
        store.claim(&cooling.id).await.unwrap();
        store
            .update(&cooling.id, |t| t.status = TaskStatus::Cooldown)
            .await
            .unwrap();
        store.claim(&done.id).await.unwrap();
        store
            .update(&done.id, |t| t.status = TaskStatus::Cooldown)
            .await
            .unwrap();
        store
            .update(&done.id, |t| t.status = TaskStatus::Completed)
            .await
            .unwrap();

        let requeued = store.recover().await.unwrap();
        assert_eq!(requeued, 2);

        let running = store.get(&running.id).await.unwrap().unwrap();
        assert_eq!(running.status, TaskStatus::Pending);
        assert_eq!(running.attempts, 2);

        let cooling = store.get(&cooling.id).await.unwrap().unwrap();
        assert_eq!(cooling.status, TaskStatus::Pending);

        let done = store.get(&done.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        // Recovered tasks are due for re-dispatch once their time passes.
        let due = store
            .list_due(Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(due.len(), 2);
    }
}
