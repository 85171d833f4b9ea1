//! HTTP client for the competition platform's submission API.
//!
//! This is the default [`BrowserAutomationAgent`] collaborator. It drives the
//! platform over its JSON API rather than a browser; DOM-level automation
//! would slot in behind the same trait.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use relaybot_types::SubmissionResult;

use crate::{AgentError, BrowserAutomationAgent, PollOutcome, Session, SubmissionRef};

/// Agent driving the platform over HTTP.
pub struct ArenaClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    webhook_url: &'a str,
    notes: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

/// Raw submission status document as the platform reports it.
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub avg_response_ms: Option<f64>,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl StatusResponse {
    /// Collapse the platform's status vocabulary into the three-way
    /// outcome the state machine understands. Anything unrecognized is an
    /// ambiguous `Error` signal, never a hard failure.
    pub fn classify(self) -> PollOutcome {
        match self.status.as_str() {
            "scored" => PollOutcome::Ready(SubmissionResult {
                accuracy: self.accuracy,
                response_time_ms: self.avg_response_ms,
                position: self.position,
            }),
            "cooldown" | "submitted" | "processing" | "queued" => PollOutcome::Cooldown,
            other => PollOutcome::Error(
                self.detail
                    .unwrap_or_else(|| format!("unrecognized submission status: {other}")),
            ),
        }
    }
}

impl ArenaClient {
    /// Create a client for the given platform base URL and credentials.
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn transport_error(context: &str, e: reqwest::Error) -> AgentError {
    AgentError::Network(format!("{context}: {e}"))
}

/// Map an unexpected HTTP status on an authenticated call. Expired
/// sessions surface as `DriverCrash` so the executor re-logins before
/// the next retry.
fn auth_status_error(context: &str, status: StatusCode) -> AgentError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AgentError::DriverCrash(format!("{context}: session expired ({status})"))
    } else {
        AgentError::Network(format!("{context}: unexpected status {status}"))
    }
}

#[async_trait::async_trait]
impl BrowserAutomationAgent for ArenaClient {
    async fn login(&self) -> Result<Session, AgentError> {
        let resp = self
            .client
            .post(self.url("/api/v1/auth/login"))
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| transport_error("login request", e))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(AgentError::LoginFailure("credentials rejected".into()));
        }
        if !resp.status().is_success() {
            return Err(AgentError::Network(format!(
                "login: unexpected status {}",
                resp.status()
            )));
        }

        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| transport_error("login response parse", e))?;
        debug!("platform login succeeded");
        Ok(Session { token: body.token })
    }

    async fn submit(
        &self,
        session: &Session,
        webhook_url: &str,
        notes: &str,
    ) -> Result<SubmissionRef, AgentError> {
        let resp = self
            .client
            .post(self.url("/api/v1/submissions"))
            .bearer_auth(&session.token)
            .json(&SubmitRequest { webhook_url, notes })
            .send()
            .await
            .map_err(|e| transport_error("submit request", e))?;

        if !resp.status().is_success() {
            return Err(auth_status_error("submit", resp.status()));
        }

        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| transport_error("submit response parse", e))?;
        debug!(submission_id = %body.id, "webhook submitted");
        Ok(SubmissionRef { id: body.id })
    }

    async fn poll_status(
        &self,
        session: &Session,
        submission: &SubmissionRef,
    ) -> Result<PollOutcome, AgentError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/v1/submissions/{}", submission.id)))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| transport_error("poll request", e))?;

        if !resp.status().is_success() {
            return Err(auth_status_error("poll", resp.status()));
        }

        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| transport_error("poll response parse", e))?;
        Ok(body.classify())
    }
}
