//! Blocking HTTP client for the coordinator API.
//!
//! The poll loop is deliberately single-threaded, so this wraps
//! `reqwest::blocking`. Session tokens are opaque; on a 401 the client
//! drops its token and logs in again once before giving up on the
//! request, which makes agent restarts and coordinator restarts
//! equally harmless.

use api_types::ApiResponse;
use api_types::KillListResponse;
use api_types::LoginRequest;
use api_types::LoginResponse;
use api_types::StatusReport;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::blocking::Client as BlockingClient;
use reqwest::blocking::Response;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use tracing::info;

use crate::config::AgentArgs;
use crate::error::AgentError;
use crate::error::AgentResult;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AgentClient {
    http: BlockingClient,
    server_url: String,
    server_id: String,
    password: String,
    token: Option<String>,
}

impl AgentClient {
    pub fn new(args: &AgentArgs) -> AgentResult<Self> {
        let http = BlockingClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .change_context(AgentError::Configuration {
                message: "Failed to create blocking HTTP client".into(),
            })?;

        info!(server_url = %args.server_url, server_id = %args.server_id, "agent client created");

        Ok(Self {
            http,
            server_url: args.server_url.trim_end_matches('/').to_string(),
            server_id: args.server_id.clone(),
            password: args.password.clone(),
            token: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}?server_id={}", self.server_url, path, self.server_id)
    }

    /// Log in as the server identity and cache the session token.
    pub fn login(&mut self) -> AgentResult<String> {
        let resp = self
            .http
            .post(format!("{}/server/login", self.server_url))
            .json(&LoginRequest {
                id: self.server_id.clone(),
                password: self.password.clone(),
            })
            .send()
            .change_context(AgentError::Network {
                message: "login request failed".into(),
            })?;

        let login: LoginResponse = decode(resp)?;
        info!(server_id = %self.server_id, "logged in to coordinator");
        self.token = Some(login.token.clone());
        Ok(login.token)
    }

    fn session_token(&mut self) -> AgentResult<String> {
        match &self.token {
            Some(token) => Ok(token.clone()),
            None => self.login(),
        }
    }

    /// Push the occupancy snapshot, re-logging-in once on a stale session.
    pub fn push_status(&mut self, report: &StatusReport) -> AgentResult<()> {
        self.with_session(|client, token| {
            let resp = client
                .http
                .post(client.endpoint("/server/status"))
                .bearer_auth(token)
                .json(report)
                .send()
                .change_context(AgentError::Network {
                    message: "status push failed".into(),
                })?;
            check_ok(resp)?;
            debug!("snapshot pushed");
            Ok(())
        })
    }

    /// Pull the pids the coordinator wants gone right now.
    pub fn fetch_kill_list(&mut self) -> AgentResult<Vec<u32>> {
        self.with_session(|client, token| {
            let resp = client
                .http
                .get(client.endpoint("/server/kill"))
                .bearer_auth(token)
                .send()
                .change_context(AgentError::Network {
                    message: "kill-list fetch failed".into(),
                })?;
            let kill: KillListResponse = decode(resp)?;
            Ok(kill.killing_pid_list)
        })
    }

    fn with_session<T>(
        &mut self,
        mut op: impl FnMut(&Self, &str) -> AgentResult<T>,
    ) -> AgentResult<T> {
        let token = self.session_token()?;
        match op(self, &token) {
            Err(report) if matches!(report.current_context(), AgentError::SessionExpired) => {
                debug!("session expired, re-logging in");
                self.token = None;
                let token = self.session_token()?;
                op(self, &token)
            }
            other => other,
        }
    }
}

/// Check the HTTP status and decode the `data` field of the envelope.
fn decode<T: DeserializeOwned>(resp: Response) -> AgentResult<T> {
    let envelope: ApiResponse<T> = check_ok(resp)?
        .json()
        .change_context(AgentError::Serialization {
            message: "failed to decode response envelope".into(),
        })?;
    envelope.data.ok_or_else(|| {
        Report::new(AgentError::Serialization {
            message: "response envelope carried no data".into(),
        })
    })
}

fn check_ok(resp: Response) -> AgentResult<Response> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(Report::new(AgentError::SessionExpired));
    }
    if !status.is_success() {
        let message = resp.text().unwrap_or_default();
        return Err(Report::new(AgentError::Http {
            status: status.as_u16(),
            message,
        }));
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn test_args() -> AgentArgs {
        AgentArgs {
            server_url: "http://coordinator:8000/".to_string(),
            server_id: "S1".to_string(),
            password: "pw".to_string(),
            interval_secs: 10,
            term_grace_secs: 5,
        }
    }

    #[test]
    fn endpoints_carry_the_server_identity() {
        let client = AgentClient::new(&test_args()).expect("client should build");

        assert_eq!(
            client.endpoint("/server/kill"),
            "http://coordinator:8000/server/kill?server_id=S1"
        );
    }

    #[test]
    fn trailing_slash_in_server_url_is_normalized() {
        let client = AgentClient::new(&test_args()).expect("client should build");

        assert_eq!(
            client.endpoint("/server/status"),
            "http://coordinator:8000/server/status?server_id=S1"
        );
    }
}
