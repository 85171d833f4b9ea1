//! Browser-automation agent boundary.
//!
//! The lifecycle engine never inspects raw page content. Everything the
//! platform reports is funneled through the three-way [`PollOutcome`] so the
//! monitoring state machine only ever sees signals it can classify.

pub mod arena;

use relaybot_types::SubmissionResult;

/// Errors raised by an automation agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Credential or session problem. Gets exactly one fresh-session
    /// attempt before the task fails.
    #[error("login failed: {0}")]
    LoginFailure(String),
    /// Transient transport problem; retried with backoff.
    #[error("network error: {0}")]
    Network(String),
    /// The underlying driver died; a fresh session is required before
    /// the next retry.
    #[error("driver crashed: {0}")]
    DriverCrash(String),
}

impl AgentError {
    /// Transient errors are retried up to the configured budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Network(_) | AgentError::DriverCrash(_))
    }

    /// Whether recovery requires tearing down and re-creating the session.
    pub fn needs_fresh_session(&self) -> bool {
        matches!(self, AgentError::DriverCrash(_) | AgentError::LoginFailure(_))
    }
}

/// An authenticated platform session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque session token.
    pub token: String,
}

/// Handle to a submission made within a session.
#[derive(Debug, Clone)]
pub struct SubmissionRef {
    /// Platform-assigned submission identifier.
    pub id: String,
}

/// What a status poll observed.
///
/// `Error` carries an ambiguous page/API state the agent could not
/// positively classify; the state machine treats it as still cooling,
/// bounded by the monitoring window.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Result not yet available; poll again later.
    Cooldown,
    /// Evaluation finished; payload available.
    Ready(SubmissionResult),
    /// Unclassifiable platform state (throttle page, partial render, ...).
    Error(String),
}

/// Drives the external competition platform on behalf of one task.
///
/// Use `&self` for all methods; implementations keep mutable state behind
/// interior mutability.
#[async_trait::async_trait]
pub trait BrowserAutomationAgent: Send + Sync {
    /// Authenticate and open a session.
    async fn login(&self) -> Result<Session, AgentError>;

    /// Submit the webhook URL with the given notes.
    async fn submit(
        &self,
        session: &Session,
        webhook_url: &str,
        notes: &str,
    ) -> Result<SubmissionRef, AgentError>;

    /// Check whether the submission has been evaluated yet.
    async fn poll_status(
        &self,
        session: &Session,
        submission: &SubmissionRef,
    ) -> Result<PollOutcome, AgentError>;
}
