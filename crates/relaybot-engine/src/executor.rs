//! Task executor: drives one claimed task from `Running` to a terminal
//! state.
//!
//! The executor owns no lifecycle logic of its own: it performs agent
//! calls, asks the monitoring state machine what each outcome means, and
//! persists every transition through the store *before* any notification
//! side effect. A crash between the two leaves a terminal-but-unnotified
//! task, which restart recovery can observe.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaybot_agent::{AgentError, BrowserAutomationAgent, Session, SubmissionRef};
use relaybot_store::TaskStore;
use relaybot_types::{ScheduledTask, SubmissionResult, TaskStatus};

use crate::notify::NotificationDispatcher;
use crate::state::{MonitoringStateMachine, PollDecision, SubmitDecision};

/// Executes exactly one task. Constructed per dispatch by the scheduler.
pub struct TaskExecutor {
    store: Arc<TaskStore>,
    agent: Arc<dyn BrowserAutomationAgent>,
    dispatcher: Arc<NotificationDispatcher>,
    machine: MonitoringStateMachine,
    cancel: CancellationToken,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<TaskStore>,
        agent: Arc<dyn BrowserAutomationAgent>,
        dispatcher: Arc<NotificationDispatcher>,
        machine: MonitoringStateMachine,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            agent,
            dispatcher,
            machine,
            cancel,
        }
    }

    /// Run the task to its terminal state. The task must already have been
    /// claimed (`Running`) by the scheduler; no other executor may hold it.
    ///
    /// On cooperative cancellation the task is left at its last persisted
    /// status and picked up again by restart recovery.
    pub async fn run(&self, task: ScheduledTask) -> anyhow::Result<()> {
        info!(task_id = %task.id, owner = %task.owner, "Executing task");
        let started = Instant::now();

        let Some((session, submission)) = self.submit_phase(&task).await? else {
            return Ok(());
        };
        self.monitor_phase(&task, session, submission, started).await
    }

    /// Login + submit with retry/backoff. Returns `None` when the task
    /// already reached a terminal state or was cancelled.
    async fn submit_phase(
        &self,
        task: &ScheduledTask,
    ) -> anyhow::Result<Option<(Session, SubmissionRef)>> {
        let mut retries = task.attempts;
        loop {
            if self.cancel.is_cancelled() {
                info!(task_id = %task.id, "Cancelled before submit; left for restart recovery");
                return Ok(None);
            }

            match self.try_submit(task).await {
                Ok(pair) => {
                    let updated = self
                        .store
                        .update(&task.id, |t| t.status = TaskStatus::Cooldown)
                        .await?;
                    info!(task_id = %task.id, "Submission accepted, monitoring for results");
                    self.dispatcher.notify_cooldown(&updated).await;
                    return Ok(Some(pair));
                }
                Err(err) => match self.machine.on_submit_error(retries, &err) {
                    SubmitDecision::Retry { delay, .. } => {
                        retries += 1;
                        self.store.update(&task.id, |t| t.attempts += 1).await?;
                        warn!(
                            task_id = %task.id,
                            retries,
                            "Submit attempt failed, backing off: {err}"
                        );
                        if !self.pause(delay).await {
                            return Ok(None);
                        }
                    }
                    SubmitDecision::Fail(msg) => {
                        self.finish(&task.id, TaskStatus::Failed, None, Some(msg))
                            .await?;
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// A single login + submit sequence. Each attempt opens a fresh
    /// session, so a dead driver from the previous attempt is never reused.
    async fn try_submit(
        &self,
        task: &ScheduledTask,
    ) -> Result<(Session, SubmissionRef), AgentError> {
        let session = self.agent.login().await?;
        let submission = self
            .agent
            .submit(&session, &task.webhook_url, &task.notes)
            .await?;
        Ok((session, submission))
    }

    /// Poll until the state machine declares a terminal state. `session`
    /// drops to `None` when a retry requires a fresh login.
    async fn monitor_phase(
        &self,
        task: &ScheduledTask,
        session: Session,
        submission: SubmissionRef,
        started: Instant,
    ) -> anyhow::Result<()> {
        let mut session = Some(session);
        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                info!(task_id = %task.id, "Cancelled mid-monitoring; left for restart recovery");
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed > self.machine.policy().max_monitoring_time {
                self.finish(
                    &task.id,
                    TaskStatus::TimedOut,
                    None,
                    Some("monitoring window elapsed without a result".into()),
                )
                .await?;
                return Ok(());
            }

            let step = match &session {
                Some(s) => self.agent.poll_status(s, &submission).await,
                None => match self.agent.login().await {
                    Ok(fresh) => {
                        session = Some(fresh);
                        continue;
                    }
                    Err(e) => Err(e),
                },
            };

            let decision = match step {
                Ok(outcome) => {
                    debug!(task_id = %task.id, ?outcome, "Poll signal");
                    self.machine.on_poll(&outcome, elapsed)
                }
                Err(err) => {
                    warn!(task_id = %task.id, retries, "Poll attempt failed: {err}");
                    self.machine.on_poll_error(retries, &err, elapsed)
                }
            };

            match decision {
                PollDecision::KeepWaiting => {
                    if !self.pause(self.machine.policy().poll_interval).await {
                        return Ok(());
                    }
                }
                PollDecision::Retry {
                    delay,
                    fresh_session,
                } => {
                    retries += 1;
                    self.store.update(&task.id, |t| t.attempts += 1).await?;
                    if fresh_session {
                        session = None;
                    }
                    if !self.pause(delay).await {
                        return Ok(());
                    }
                }
                PollDecision::Complete(result) => {
                    self.finish(&task.id, TaskStatus::Completed, Some(result), None)
                        .await?;
                    return Ok(());
                }
                PollDecision::TimedOut => {
                    self.finish(
                        &task.id,
                        TaskStatus::TimedOut,
                        None,
                        Some("monitoring window elapsed without a result".into()),
                    )
                    .await?;
                    return Ok(());
                }
                PollDecision::Fail(msg) => {
                    self.finish(&task.id, TaskStatus::Failed, None, Some(msg))
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    /// Persist the terminal status, then send the single terminal
    /// notification. The store write must succeed before the message goes
    /// out; a failed write means no notification.
    async fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<SubmissionResult>,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        let updated = self
            .store
            .update(id, move |t| {
                t.status = status;
                if result.is_some() {
                    t.result = result;
                }
                if error.is_some() {
                    t.error = error;
                }
            })
            .await?;
        info!(task_id = %id, status = %status, "Task reached terminal state");
        self.dispatcher.notify_terminal(&updated).await;
        Ok(())
    }

    /// Cancellable sleep. Returns false when cancellation fired first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
