//! Notification dispatch: exactly one terminal message per task.
//!
//! Delivery goes through the [`Notifier`] trait so the engine never knows
//! which channel (Telegram, test mock, ...) is on the other side. Delivery
//! failures are retried a bounded number of times and then logged; they
//! never feed back into the task lifecycle.

use std::time::Duration;

use tracing::{error, info, warn};

use relaybot_types::{ScheduledTask, TaskStatus};

/// Delivery channel for user-facing messages.
///
/// Use `&self`; implementations keep mutable state behind interior
/// mutability.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message to the owner's external channel.
    async fn send(&self, owner: &str, message: &str) -> anyhow::Result<()>;
}

/// Wraps a [`Notifier`] with retry policy and message formatting.
pub struct NotificationDispatcher {
    notifier: std::sync::Arc<dyn Notifier>,
    /// Additional delivery attempts after the first failure.
    retries: u32,
    retry_delay: Duration,
}

impl NotificationDispatcher {
    pub fn new(notifier: std::sync::Arc<dyn Notifier>, retries: u32) -> Self {
        Self {
            notifier,
            retries,
            retry_delay: Duration::from_secs(2),
        }
    }

    #[cfg(test)]
    fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Send the single terminal notification for a task. Called exactly
    /// once per task, after the terminal status has been persisted.
    pub async fn notify_terminal(&self, task: &ScheduledTask) {
        let message = terminal_message(task);
        self.deliver(task, &message).await;
    }

    /// Best-effort courtesy message on entry into `Cooldown`. Non-terminal;
    /// a delivery failure is logged and forgotten.
    pub async fn notify_cooldown(&self, task: &ScheduledTask) {
        let message = cooldown_message(task);
        if let Err(e) = self.notifier.send(&task.owner, &message).await {
            warn!(task_id = %task.id, "Cooldown courtesy notification failed: {e}");
        }
    }

    async fn deliver(&self, task: &ScheduledTask, message: &str) {
        let mut attempt = 0;
        loop {
            match self.notifier.send(&task.owner, message).await {
                Ok(()) => {
                    info!(task_id = %task.id, status = %task.status, "Notification delivered");
                    return;
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        task_id = %task.id,
                        attempt,
                        "Notification delivery failed, retrying: {e}"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        task_id = %task.id,
                        "Giving up on notification after {} attempts: {e}",
                        attempt + 1
                    );
                    return;
                }
            }
        }
    }
}

/// Structured terminal summary in the register of the bot's chat output.
pub fn terminal_message(task: &ScheduledTask) -> String {
    match task.status {
        TaskStatus::Completed => {
            let mut msg = format!(
                "*Task completed*\n\nNotes: {}\nWebhook: {}\n",
                task.notes, task.webhook_url
            );
            if let Some(result) = &task.result {
                msg.push_str("\nResults:\n");
                if let Some(acc) = result.accuracy {
                    msg.push_str(&format!("  Accuracy: {acc}%\n"));
                }
                if let Some(rt) = result.response_time_ms {
                    msg.push_str(&format!("  Avg response: {rt}ms\n"));
                }
                if let Some(pos) = result.position {
                    msg.push_str(&format!("  Position: #{pos}\n"));
                }
            } else {
                msg.push_str("\nSubmission processed (no metrics published).\n");
            }
            msg.push_str(&format!(
                "\nCompleted at: {}",
                task.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            msg
        }
        TaskStatus::Failed => format!(
            "*Task failed*\n\nNotes: {}\nWebhook: {}\nError: {}",
            task.notes,
            task.webhook_url,
            task.error.as_deref().unwrap_or("unknown error")
        ),
        TaskStatus::TimedOut => format!(
            "*Monitoring timed out*\n\nNotes: {}\nWebhook: {}\n\n\
             The submission went through but no result appeared within the \
             monitoring window. It may still post on the platform itself, \
             so it is worth checking manually.",
            task.notes, task.webhook_url
        ),
        // Cancellation produces no notification; non-terminal statuses
        // never reach this function.
        other => format!("Task {} is now {other}", task.id),
    }
}

/// Courtesy message for the cooldown phase.
pub fn cooldown_message(task: &ScheduledTask) -> String {
    format!(
        "*Submission in cooldown*\n\nNotes: {}\nWebhook: {}\n\n\
         The submission was accepted but the result is not available yet. \
         Monitoring continues; you will get one final message either way.",
        task.notes, task.webhook_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use relaybot_types::SubmissionResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyNotifier {
        failures_remaining: AtomicU32,
        sent: tokio::sync::Mutex<Vec<(String, String)>>,
    }

    impl FlakyNotifier {
        fn new(failures: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(failures),
                sent: tokio::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, owner: &str, message: &str) -> anyhow::Result<()> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("channel unreachable");
            }
            self.sent
                .lock()
                .await
                .push((owner.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn terminal_task(status: TaskStatus) -> ScheduledTask {
        let at = (Utc::now() + ChronoDuration::minutes(5)).fixed_offset();
        let mut task =
            ScheduledTask::new("42", at, "https://example.com/hook", "notify test").unwrap();
        task.status = status;
        task
    }

    #[tokio::test]
    async fn test_delivery_retries_then_succeeds() {
        let notifier = Arc::new(FlakyNotifier::new(2));
        let dispatcher = NotificationDispatcher::new(notifier.clone(), 3)
            .with_retry_delay(Duration::from_millis(1));

        dispatcher
            .notify_terminal(&terminal_task(TaskStatus::Failed))
            .await;

        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "42");
        assert!(sent[0].1.contains("Task failed"));
    }

    #[tokio::test]
    async fn test_delivery_gives_up_after_budget() {
        let notifier = Arc::new(FlakyNotifier::new(10));
        let dispatcher = NotificationDispatcher::new(notifier.clone(), 2)
            .with_retry_delay(Duration::from_millis(1));

        dispatcher
            .notify_terminal(&terminal_task(TaskStatus::Failed))
            .await;

        assert!(notifier.sent.lock().await.is_empty());
        // 1 initial + 2 retries consumed from the failure budget.
        assert_eq!(notifier.failures_remaining.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_cooldown_courtesy_is_single_attempt() {
        let notifier = Arc::new(FlakyNotifier::new(1));
        let dispatcher = NotificationDispatcher::new(notifier.clone(), 5)
            .with_retry_delay(Duration::from_millis(1));

        dispatcher
            .notify_cooldown(&terminal_task(TaskStatus::Cooldown))
            .await;

        // One failure consumed, no retries attempted.
        assert_eq!(notifier.failures_remaining.load(Ordering::SeqCst), 0);
        assert!(notifier.sent.lock().await.is_empty());
    }

    #[test]
    fn test_completed_message_includes_metrics() {
        let mut task = terminal_task(TaskStatus::Completed);
        task.result = Some(SubmissionResult {
            accuracy: Some(87.5),
            response_time_ms: Some(210.0),
            position: Some(3),
        });
        let msg = terminal_message(&task);
        assert!(msg.contains("Accuracy: 87.5%"));
        assert!(msg.contains("Avg response: 210ms"));
        assert!(msg.contains("Position: #3"));
        assert!(msg.contains("notify test"));
    }

    #[test]
    fn test_completed_message_without_metrics() {
        let msg = terminal_message(&terminal_task(TaskStatus::Completed));
        assert!(msg.contains("no metrics published"));
    }

    #[test]
    fn test_timeout_message_points_at_platform() {
        let msg = terminal_message(&terminal_task(TaskStatus::TimedOut));
        assert!(msg.contains("Monitoring timed out"));
        assert!(msg.contains("checking manually"));
    }
}
