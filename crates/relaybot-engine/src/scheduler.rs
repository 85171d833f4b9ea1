//! Due-task scheduler: a single polling loop that dispatches, never
//! executes.
//!
//! Each tick reads the due tasks and claims them one by one through the
//! store's compare-and-swap, so a task is handed to exactly one executor
//! even across restarts and overlapping ticks. Executor concurrency is
//! capped by a semaphore rather than spawning unboundedly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relaybot_agent::BrowserAutomationAgent;
use relaybot_store::TaskStore;

use crate::executor::TaskExecutor;
use crate::notify::NotificationDispatcher;
use crate::state::{MonitoringPolicy, MonitoringStateMachine};

pub struct Scheduler {
    store: Arc<TaskStore>,
    agent: Arc<dyn BrowserAutomationAgent>,
    dispatcher: Arc<NotificationDispatcher>,
    policy: MonitoringPolicy,
    interval: Duration,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<TaskStore>,
        agent: Arc<dyn BrowserAutomationAgent>,
        dispatcher: Arc<NotificationDispatcher>,
        policy: MonitoringPolicy,
        interval: Duration,
        max_concurrent_tasks: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            agent,
            dispatcher,
            policy,
            interval,
            workers: Arc::new(Semaphore::new(max_concurrent_tasks)),
            cancel,
        }
    }

    /// Run the polling loop until cancelled. Spawn as a background task.
    pub async fn run(self: Arc<Self>) {
        info!(interval = ?self.interval, "Scheduler started");
        loop {
            if let Err(e) = self.dispatch_due().await {
                warn!("Scheduler tick failed: {e}");
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Scheduler stopped");
    }

    /// One tick: claim every due pending task and start an executor for
    /// each successful claim. Returns the number dispatched.
    pub async fn dispatch_due(&self) -> anyhow::Result<usize> {
        let due = self.store.list_due(Utc::now()).await?;
        let mut dispatched = 0;

        for task in due {
            // Waits here when the worker pool is saturated.
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(dispatched),
                permit = self.workers.clone().acquire_owned() => permit?,
            };

            // The claim is the single-dispatch gate: a concurrent tick, a
            // prior claim, or a cancellation between listing and claiming
            // all make this return None.
            let Some(claimed) = self.store.claim(&task.id).await? else {
                drop(permit);
                continue;
            };

            info!(task_id = %claimed.id, owner = %claimed.owner, "Dispatching due task");
            dispatched += 1;

            let executor = TaskExecutor::new(
                self.store.clone(),
                self.agent.clone(),
                self.dispatcher.clone(),
                MonitoringStateMachine::new(self.policy.clone()),
                self.cancel.child_token(),
            );
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = executor.run(claimed).await {
                    warn!("Task executor failed: {e}");
                }
            });
        }

        Ok(dispatched)
    }
}
