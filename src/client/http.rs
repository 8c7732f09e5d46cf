//! HTTP binding for a Cloud Director style control plane.
//!
//! Conventions implemented here:
//! - `POST /api/sessions` with basic credentials; the session token comes
//!   back in the `x-vmware-vcloud-access-token` header
//! - `202 Accepted` plus a `Location` header means the operation runs as an
//!   asynchronous task at that URL
//! - Task documents carry `status` and `details` fields
//! - `401` means the session expired

use crate::client::remote::{
    AuthProvider, Method, RemoteApi, RemoteOutcome, RemoteRequest, SessionToken, TaskHandle,
    TaskStatus,
};
use crate::models::{CutoverError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const ACCESS_TOKEN_HEADER: &str = "x-vmware-vcloud-access-token";
const ACCEPT_HEADER: &str = "application/*+json;version=37.0";

/// reqwest-backed implementation of [`RemoteApi`] and [`AuthProvider`].
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    org: String,
    username: String,
    password: String,
}

impl HttpApi {
    pub fn new(
        base_url: impl Into<String>,
        org: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(CutoverError::Network)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            org: org.into(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Pull a human-readable diagnostic out of an error body.
///
/// Falls back to the raw body, then to the bare status code; the message
/// reaches the operator verbatim, so keep whatever the remote side said.
fn error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        body.trim().to_string()
    }
}

/// Map a task document to a [`TaskStatus`].
fn parse_task_document(document: &Value) -> Result<TaskStatus> {
    let status = document
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| CutoverError::ParseError("task document without status".to_string()))?;

    match status {
        "queued" | "preRunning" | "running" => Ok(TaskStatus::Running),
        "success" => Ok(TaskStatus::Succeeded),
        "error" | "aborted" => {
            let details = document
                .get("details")
                .and_then(Value::as_str)
                .unwrap_or("task failed without details");
            Ok(TaskStatus::Failed(details.to_string()))
        }
        other => Err(CutoverError::ParseError(format!(
            "unknown task status: {other}"
        ))),
    }
}

#[async_trait]
impl AuthProvider for HttpApi {
    async fn login(&self) -> Result<SessionToken> {
        let url = self.url("api/sessions");
        let response = self
            .client
            .post(&url)
            .basic_auth(format!("{}@{}", self.username, self.org), Some(&self.password))
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CutoverError::AuthenticationFailed(error_message(
                status, &body,
            )));
        }

        let token = response
            .headers()
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                CutoverError::AuthenticationFailed(
                    "login response missing access token header".to_string(),
                )
            })?;

        debug!(org = %self.org, "Logged in");
        Ok(SessionToken::new(token))
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn execute(
        &self,
        token: &SessionToken,
        request: &RemoteRequest,
    ) -> Result<RemoteOutcome> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        builder = builder
            .bearer_auth(&token.secret)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.as_u16() == 401 {
            return Err(CutoverError::SessionExpired);
        }

        if status.as_u16() == 202 {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    CutoverError::ParseError(format!(
                        "{}: accepted without task location",
                        request.operation
                    ))
                })?;
            debug!(operation = %request.operation, task = location, "Operation accepted as task");
            return Ok(RemoteOutcome::Accepted(TaskHandle {
                operation: request.operation.clone(),
                url: location.to_string(),
            }));
        }

        if status.is_success() {
            let body = response.text().await?;
            let value = if body.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&body).map_err(|e| {
                    CutoverError::ParseError(format!("{}: {e}", request.operation))
                })?
            };
            return Ok(RemoteOutcome::Completed(value));
        }

        let body = response.text().await.unwrap_or_default();
        Err(CutoverError::RemoteOperation(error_message(
            status.as_u16(),
            &body,
        )))
    }

    async fn task_status(&self, token: &SessionToken, handle: &TaskHandle) -> Result<TaskStatus> {
        let response = self
            .client
            .get(&handle.url)
            .bearer_auth(&token.secret)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            return Err(CutoverError::SessionExpired);
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CutoverError::RemoteOperation(error_message(status, &body)));
        }

        let document: Value = response.json().await?;
        parse_task_document(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_statuses_map_to_lifecycle_states() {
        for status in ["queued", "preRunning", "running"] {
            let doc = json!({ "status": status });
            assert_eq!(parse_task_document(&doc).unwrap(), TaskStatus::Running);
        }

        let doc = json!({ "status": "success" });
        assert_eq!(parse_task_document(&doc).unwrap(), TaskStatus::Succeeded);
    }

    #[test]
    fn failed_task_keeps_remote_details_verbatim() {
        let doc = json!({ "status": "error", "details": "Gateway creation failed: pool exhausted" });
        assert_eq!(
            parse_task_document(&doc).unwrap(),
            TaskStatus::Failed("Gateway creation failed: pool exhausted".to_string())
        );

        let doc = json!({ "status": "aborted" });
        assert!(matches!(
            parse_task_document(&doc).unwrap(),
            TaskStatus::Failed(_)
        ));
    }

    #[test]
    fn unknown_status_is_a_parse_error() {
        let doc = json!({ "status": "dancing" });
        assert!(parse_task_document(&doc).is_err());
        let doc = json!({ "details": "no status at all" });
        assert!(parse_task_document(&doc).is_err());
    }

    #[test]
    fn error_message_prefers_the_message_field() {
        let body = r#"{"minorErrorCode":"BAD_REQUEST","message":"Network still attached"}"#;
        assert_eq!(error_message(400, body), "Network still attached");
        assert_eq!(error_message(500, "plain failure text"), "plain failure text");
        assert_eq!(error_message(503, ""), "HTTP 503");
    }
}
