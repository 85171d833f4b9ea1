use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Task Status ────────────────────

/// Lifecycle status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its scheduled time.
    Pending,
    /// Claimed by an executor; login/submit in progress.
    Running,
    /// Submitted; waiting for the platform to publish a result.
    Cooldown,
    /// Result payload received.
    Completed,
    /// Gave up after exhausting the retry budget.
    Failed,
    /// Monitoring window elapsed without a result.
    TimedOut,
    /// Cancelled by the owner before dispatch.
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::TimedOut
                | TaskStatus::Cancelled
        )
    }

    /// Whether a task in this status is owned by a live executor.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Cooldown)
    }

    /// Validity of a forward transition in the lifecycle graph.
    ///
    /// Statuses never move back to `Pending` through this check; the
    /// restart-time re-queue is a store-level recovery step, not a
    /// lifecycle transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(next, Running | Cancelled),
            Running => matches!(next, Cooldown | Failed),
            Cooldown => matches!(next, Completed | TimedOut | Failed),
            Completed | Failed | TimedOut | Cancelled => false,
        }
    }

    /// Lowercase label used in persistence and log output.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Cooldown => "cooldown",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = InvalidTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "cooldown" => Ok(TaskStatus::Cooldown),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "timed_out" => Ok(TaskStatus::TimedOut),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(InvalidTask::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── Result Payload ────────────────────

/// Scoring payload scraped/fetched from the platform once a submission
/// has been evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Accuracy percentage (0.0–100.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Average response time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    /// Leaderboard position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl SubmissionResult {
    /// One-line summary for task listings.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(acc) = self.accuracy {
            parts.push(format!("accuracy {acc}%"));
        }
        if let Some(rt) = self.response_time_ms {
            parts.push(format!("avg response {rt}ms"));
        }
        if let Some(pos) = self.position {
            parts.push(format!("position #{pos}"));
        }
        if parts.is_empty() {
            "submission processed".to_string()
        } else {
            parts.join(", ")
        }
    }
}

// ──────────────────── Scheduled Task ────────────────────

/// Validation errors raised before a task is ever created.
#[derive(Debug, thiserror::Error)]
pub enum InvalidTask {
    #[error("scheduled time must be in the future")]
    PastSchedule,
    #[error("webhook URL is not a valid absolute http(s) URL: {0}")]
    InvalidWebhookUrl(String),
    #[error("owner must not be empty")]
    EmptyOwner,
    #[error("unknown task status: {0}")]
    UnknownStatus(String),
}

/// The sole persistent entity: one future-dated submission to perform
/// and monitor on behalf of an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique, assigned at creation, immutable.
    pub id: String,
    /// Opaque identity of the requesting user.
    pub owner: String,
    /// When to perform the submission. Offset-preserving so the owner's
    /// local wall-clock intent round-trips through persistence.
    pub scheduled_at: DateTime<FixedOffset>,
    pub webhook_url: String,
    pub notes: String,
    pub status: TaskStatus,
    /// Automation-agent invocation retries so far.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmissionResult>,
    /// Last-error descriptor, set on failure paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every update; supports conflict detection.
    #[serde(default)]
    pub version: i64,
}

impl ScheduledTask {
    /// Build a new `Pending` task, validating the creation invariants:
    /// the scheduled time is strictly in the future and the webhook URL
    /// is an absolute http(s) URL.
    pub fn new(
        owner: impl Into<String>,
        scheduled_at: DateTime<FixedOffset>,
        webhook_url: impl Into<String>,
        notes: impl Into<String>,
    ) -> Result<Self, InvalidTask> {
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(InvalidTask::EmptyOwner);
        }

        let now = Utc::now();
        if scheduled_at <= now {
            return Err(InvalidTask::PastSchedule);
        }

        let webhook_url = webhook_url.into();
        match url::Url::parse(&webhook_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(InvalidTask::InvalidWebhookUrl(webhook_url)),
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            scheduled_at,
            webhook_url,
            notes: notes.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Whether the task is due for dispatch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at <= now
    }
}
