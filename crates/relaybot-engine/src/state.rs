//! Monitoring state machine: pure decision logic, no I/O.
//!
//! The executor feeds it submit results, poll outcomes, and elapsed time;
//! it answers with the next move. The bounded-wait rule lives here: any
//! poll signal that is not positively a result counts as "still cooling",
//! and the whole wait is capped by the monitoring window, so every task
//! reaches a terminal state in finite time.

use std::time::Duration;

use relaybot_agent::{AgentError, PollOutcome};
use relaybot_types::SubmissionResult;

/// Timing and retry policy, fixed at construction.
#[derive(Debug, Clone)]
pub struct MonitoringPolicy {
    /// Retry budget for transient agent failures.
    pub max_retries: u32,
    /// Wall-clock cap on the whole Running + Cooldown phase.
    pub max_monitoring_time: Duration,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Base delay for exponential retry backoff.
    pub retry_backoff_base: Duration,
}

impl Default for MonitoringPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_monitoring_time: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
            retry_backoff_base: Duration::from_secs(2),
        }
    }
}

impl MonitoringPolicy {
    /// Exponential backoff for the given retry number (1-based), capped
    /// at one minute.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_backoff_base
            .saturating_mul(factor)
            .min(Duration::from_secs(60))
    }
}

/// Next move after a failed login/submit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitDecision {
    /// Try again after the delay. `fresh_session` means the current
    /// session is unusable and login must run first.
    Retry {
        delay: Duration,
        fresh_session: bool,
    },
    /// Budget exhausted or unrecoverable; the task fails.
    Fail(String),
}

/// Next move after a poll attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PollDecision {
    /// No result yet; poll again after the poll interval.
    KeepWaiting,
    /// Result payload arrived.
    Complete(SubmissionResult),
    /// Monitoring window elapsed.
    TimedOut,
    /// Transient poll failure; retry after the delay.
    Retry {
        delay: Duration,
        fresh_session: bool,
    },
    /// Unrecoverable poll failure; the task fails.
    Fail(String),
}

/// Pure transition logic for one task's monitoring phase.
#[derive(Debug, Clone)]
pub struct MonitoringStateMachine {
    policy: MonitoringPolicy,
}

impl MonitoringStateMachine {
    pub fn new(policy: MonitoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MonitoringPolicy {
        &self.policy
    }

    /// Classify a failed submit invocation. `retries_used` counts the
    /// retries already spent (0 on the first failure).
    ///
    /// Login failures get exactly one fresh-session attempt; transient
    /// failures draw on the retry budget with exponential backoff.
    pub fn on_submit_error(&self, retries_used: u32, err: &AgentError) -> SubmitDecision {
        match err {
            AgentError::LoginFailure(msg) => {
                if retries_used == 0 {
                    SubmitDecision::Retry {
                        delay: self.policy.backoff(1),
                        fresh_session: true,
                    }
                } else {
                    SubmitDecision::Fail(format!("login failed: {msg}"))
                }
            }
            transient if transient.is_transient() && retries_used < self.policy.max_retries => {
                SubmitDecision::Retry {
                    delay: self.policy.backoff(retries_used + 1),
                    fresh_session: transient.needs_fresh_session(),
                }
            }
            other => SubmitDecision::Fail(other.to_string()),
        }
    }

    /// Classify a poll outcome, given time elapsed since the task started
    /// running. The timeout check comes first: once the window is spent,
    /// nothing short of an already-delivered result matters.
    pub fn on_poll(&self, outcome: &PollOutcome, elapsed: Duration) -> PollDecision {
        match outcome {
            PollOutcome::Ready(result) => PollDecision::Complete(result.clone()),
            // Both "still cooling" and an ambiguous page state wait it
            // out; the window bounds the loop.
            PollOutcome::Cooldown | PollOutcome::Error(_) => {
                if elapsed > self.policy.max_monitoring_time {
                    PollDecision::TimedOut
                } else {
                    PollDecision::KeepWaiting
                }
            }
        }
    }

    /// Classify an agent error raised while polling.
    pub fn on_poll_error(
        &self,
        retries_used: u32,
        err: &AgentError,
        elapsed: Duration,
    ) -> PollDecision {
        if elapsed > self.policy.max_monitoring_time {
            return PollDecision::TimedOut;
        }
        if err.is_transient() && retries_used < self.policy.max_retries {
            PollDecision::Retry {
                delay: self.policy.backoff(retries_used + 1),
                fresh_session: err.needs_fresh_session(),
            }
        } else {
            PollDecision::Fail(err.to_string())
        }
    }
}
