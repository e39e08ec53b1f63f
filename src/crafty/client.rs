use super::auth::{AuthError, TokenProvider};
use super::models::{ApiResponse, LogLines, ResponseData, ServerStats};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time;
use tracing::{debug, error, info, warn};

const API_PREFIX: &str = "/api/v2";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const OUTER_GRACE: Duration = Duration::from_secs(5);
const REDACTED: &str = "REDACTED";

/// Transport-level failures of a single Crafty request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CraftyError {
    #[error("connection error: {message}")]
    Connection { message: String, status: Option<u16> },
    #[error("request timed out: {message}")]
    Timeout { message: String, status: Option<u16> },
    #[error("{message}")]
    Response { message: String, status: Option<u16> },
}

impl CraftyError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Connection { status, .. }
            | Self::Timeout { status, .. }
            | Self::Response { status, .. } => *status,
        }
    }

    fn into_response(self) -> ApiResponse {
        let code = self.status_code();
        ApiResponse::failure(self.to_string(), code)
    }
}

impl From<reqwest::Error> for CraftyError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = e.to_string();
        if e.is_timeout() {
            Self::Timeout { message, status }
        } else if e.is_connect() || e.is_request() {
            Self::Connection { message, status }
        } else {
            Self::Response { message, status }
        }
    }
}

/// Power actions exposed under `/servers/{id}/action/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    Restart,
    Kill,
    Backup,
}

impl ServerAction {
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Start => "start_server",
            Self::Stop => "stop_server",
            Self::Restart => "restart_server",
            Self::Kill => "kill_server",
            Self::Backup => "backup_server",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Kill => "kill",
            Self::Backup => "back up",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
            Self::Kill => "killed",
            Self::Backup => "backed up",
        }
    }
}

/// Copy of `headers` that is safe to log. Only the exact key
/// `Authorization` is masked.
pub fn redact_authorization(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| {
            let value = if key == "Authorization" {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}

enum Payload {
    Empty,
    Text(String),
}

/// Client for the Crafty Controller v2 REST API.
///
/// Every lifecycle operation is total with respect to transport problems:
/// they come back as a failed [`ApiResponse`]. Only credential failures are
/// returned as `Err`, so callers can tell a misconfigured bot apart from an
/// unreachable panel.
pub struct CraftyClient {
    base_url: String,
    http: reqwest::Client,
    credentials: Arc<TokenProvider>,
    outer_timeout: Duration,
}

impl CraftyClient {
    pub fn new(base_url: &str, credentials: Arc<TokenProvider>) -> Result<Self, CraftyError> {
        Self::with_timeout(base_url, credentials, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        credentials: Arc<TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, CraftyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| CraftyError::Connection {
                message: e.to_string(),
                status: None,
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            credentials,
            outer_timeout: timeout + OUTER_GRACE,
        })
    }

    pub async fn start_server(&self, server_id: &str) -> Result<ApiResponse, AuthError> {
        self.run_action(server_id, ServerAction::Start).await
    }

    pub async fn stop_server(&self, server_id: &str) -> Result<ApiResponse, AuthError> {
        self.run_action(server_id, ServerAction::Stop).await
    }

    pub async fn restart_server(&self, server_id: &str) -> Result<ApiResponse, AuthError> {
        self.run_action(server_id, ServerAction::Restart).await
    }

    pub async fn kill_server(&self, server_id: &str) -> Result<ApiResponse, AuthError> {
        self.run_action(server_id, ServerAction::Kill).await
    }

    pub async fn backup_server(&self, server_id: &str) -> Result<ApiResponse, AuthError> {
        self.run_action(server_id, ServerAction::Backup).await
    }

    pub async fn run_action(
        &self,
        server_id: &str,
        action: ServerAction,
    ) -> Result<ApiResponse, AuthError> {
        let path = format!("/servers/{}/action/{}", server_id, action.endpoint());
        let token = self.credentials.current_token().await?;

        Ok(match self.send(&token, Method::POST, &path, Payload::Empty, None).await {
            Ok(data) => ApiResponse::ok(
                format!("Server {} successfully", action.past_tense()),
                json_data(data),
            ),
            Err(e) => {
                warn!("Failed to {} server {}: {}", action.verb(), server_id, e);
                e.into_response()
            }
        })
    }

    pub async fn get_server_info(&self, server_id: &str) -> Result<ApiResponse, AuthError> {
        let path = format!("/servers/{}", server_id);
        let token = self.credentials.current_token().await?;

        Ok(match self.send(&token, Method::GET, &path, Payload::Empty, None).await {
            Ok(data) => ApiResponse::ok("Server information retrieved", json_data(data)),
            Err(e) => e.into_response(),
        })
    }

    pub async fn get_server_stats(&self, server_id: &str) -> Result<ApiResponse, AuthError> {
        let path = format!("/servers/{}/stats", server_id);
        let token = self.credentials.current_token().await?;

        let data = match self.send(&token, Method::GET, &path, Payload::Empty, None).await {
            Ok(data) => data,
            Err(e) => return Ok(e.into_response()),
        };

        Ok(match ServerStats::from_value(server_id, &data) {
            Ok(stats) => ApiResponse::ok(
                "Server statistics retrieved",
                Some(ResponseData::Stats(stats)),
            ),
            Err(reason) => {
                error!("Failed to parse stats for server {}: {}", server_id, reason);
                ApiResponse::failure(format!("Failed to parse server stats: {}", reason), Some(500))
            }
        })
    }

    pub async fn get_server_logs(
        &self,
        server_id: &str,
        lines: usize,
    ) -> Result<ApiResponse, AuthError> {
        let path = format!("/servers/{}/logs", server_id);
        let token = self.credentials.current_token().await?;
        let query = Some(("lines", lines.to_string()));

        Ok(match self.send(&token, Method::GET, &path, Payload::Empty, query).await {
            Ok(data) => {
                let logs = LogLines::from_value(&data);
                ApiResponse::ok(
                    format!("Retrieved {} log lines", logs.len()),
                    Some(ResponseData::Logs(logs)),
                )
            }
            Err(e) => e.into_response(),
        })
    }

    pub async fn send_stdin_command(
        &self,
        server_id: &str,
        command: &str,
    ) -> Result<ApiResponse, AuthError> {
        if command.trim().is_empty() {
            return Ok(ApiResponse::failure("Command cannot be empty", Some(400)));
        }

        let path = format!("/servers/{}/stdin", server_id);
        let token = self.credentials.current_token().await?;
        let payload = Payload::Text(command.to_string());

        Ok(match self.send(&token, Method::POST, &path, payload, None).await {
            Ok(data) => ApiResponse::ok("Command sent", json_data(data)),
            Err(e) => e.into_response(),
        })
    }

    /// Performs one request and unwraps the `{status, data, error}` envelope.
    async fn send(
        &self,
        token: &str,
        method: Method,
        path: &str,
        payload: Payload,
        query: Option<(&str, String)>,
    ) -> Result<Value, CraftyError> {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        let content_type = match payload {
            Payload::Empty => "application/json",
            Payload::Text(_) => "text/plain",
        };
        let headers = HashMap::from([
            ("Authorization".to_string(), format!("Bearer {}", token)),
            ("Content-Type".to_string(), content_type.to_string()),
        ]);

        debug!("{} {} headers={:?}", method, url, redact_authorization(&headers));

        let mut request = self.http.request(method.clone(), &url);
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(pair) = &query {
            request = request.query(&[pair]);
        }
        if let Payload::Text(body) = payload {
            request = request.body(body);
        }

        let started = Instant::now();
        let response = time::timeout(self.outer_timeout, request.send())
            .await
            .map_err(|_| CraftyError::Timeout {
                message: format!("no response within {}s", self.outer_timeout.as_secs()),
                status: None,
            })??;

        let status = response.status();
        info!(
            "{} {} -> {} in {}ms",
            method,
            url,
            status.as_u16(),
            started.elapsed().as_millis()
        );

        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Invalid JSON from {}: {}", url, e);
            Value::Object(Map::new())
        });

        if status == StatusCode::OK && body["status"] == "ok" {
            return Ok(body.get("data").cloned().unwrap_or(Value::Null));
        }

        let message = body["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        Err(CraftyError::Response {
            message,
            status: Some(status.as_u16()),
        })
    }
}

fn json_data(data: Value) -> Option<ResponseData> {
    (!data.is_null()).then_some(ResponseData::Json(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const ID: &str = "f1bf6997-9f43-4f36-b06f-9d3daaac7a3e";

    fn client(server: &MockServer) -> CraftyClient {
        let credentials = Arc::new(TokenProvider::from_static("secret-token"));
        CraftyClient::new(&server.base_url(), credentials).unwrap()
    }

    #[tokio::test]
    async fn start_server_succeeds_on_ok_envelope() {
        let server = MockServer::start();
        let start = server.mock(|when, then| {
            when.method(POST)
                .path(format!("/api/v2/servers/{}/action/start_server", ID))
                .header("authorization", "Bearer secret-token")
                .header("content-type", "application/json");
            then.status(200).json_body(json!({"status": "ok", "data": {}}));
        });

        let response = client(&server).start_server(ID).await.unwrap();
        assert!(response.success);
        assert_eq!(response.message, "Server started successfully");
        assert_eq!(response.error_code, None);
        start.assert_calls(1);
    }

    #[tokio::test]
    async fn http_error_becomes_failed_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path(format!("/api/v2/servers/{}/action/start_server", ID));
            then.status(404).json_body(json!({"error": "Server not found"}));
        });

        let response = client(&server).start_server(ID).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(404));
        assert_eq!(response.message, "Server not found");
    }

    #[tokio::test]
    async fn non_ok_status_field_fails_even_with_200() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(format!("/api/v2/servers/{}/action/kill_server", ID));
            then.status(200)
                .json_body(json!({"status": "error", "error": "NOT_AUTHORIZED"}));
        });

        let response = client(&server).kill_server(ID).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(200));
        assert_eq!(response.message, "NOT_AUTHORIZED");
    }

    #[tokio::test]
    async fn invalid_json_is_a_failed_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(format!("/api/v2/servers/{}/action/stop_server", ID));
            then.status(502).body("<html>Bad Gateway</html>");
        });

        let response = client(&server).stop_server(ID).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(502));
        assert_eq!(response.message, "HTTP 502");
    }

    #[tokio::test]
    async fn empty_stats_payload_uses_defaults() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/api/v2/servers/{}/stats", ID));
            then.status(200).json_body(json!({"status": "ok", "data": {}}));
        });

        let response = client(&server).get_server_stats(ID).await.unwrap();
        assert!(response.success);
        assert_eq!(response.stats(), Some(&ServerStats::empty(ID)));
    }

    #[tokio::test]
    async fn non_numeric_cpu_is_zero() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/api/v2/servers/{}/stats", ID));
            then.status(200)
                .json_body(json!({"status": "ok", "data": {"cpu": "n/a", "running": true}}));
        });

        let response = client(&server).get_server_stats(ID).await.unwrap();
        let stats = response.stats().unwrap();
        assert_eq!(stats.cpu, 0.0);
        assert!(stats.running);
    }

    #[tokio::test]
    async fn non_object_stats_payload_is_internal_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/api/v2/servers/{}/stats", ID));
            then.status(200).json_body(json!({"status": "ok", "data": ["cpu", 1]}));
        });

        let response = client(&server).get_server_stats(ID).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(500));
    }

    #[tokio::test]
    async fn logs_are_requested_with_line_count() {
        let server = MockServer::start();
        let logs = server.mock(|when, then| {
            when.method(GET)
                .path(format!("/api/v2/servers/{}/logs", ID))
                .query_param("lines", "20");
            then.status(200)
                .json_body(json!({"status": "ok", "data": {"logs": ["[INFO] Done (3.2s)!"]}}));
        });

        let response = client(&server).get_server_logs(ID, 20).await.unwrap();
        assert!(response.success);
        assert_eq!(
            response.logs().map(|l| l.joined()),
            Some("[INFO] Done (3.2s)!".to_string())
        );
        logs.assert_calls(1);
    }

    #[tokio::test]
    async fn stdin_sends_plain_text() {
        let server = MockServer::start();
        let stdin = server.mock(|when, then| {
            when.method(POST)
                .path(format!("/api/v2/servers/{}/stdin", ID))
                .header("content-type", "text/plain")
                .body("say hello");
            then.status(200).json_body(json!({"status": "ok"}));
        });

        let response = client(&server).send_stdin_command(ID, "say hello").await.unwrap();
        assert!(response.success);
        stdin.assert_calls(1);
    }

    #[tokio::test]
    async fn blank_stdin_command_is_rejected_locally() {
        let server = MockServer::start();
        let stdin = server.mock(|when, then| {
            when.method(POST).path(format!("/api/v2/servers/{}/stdin", ID));
            then.status(200).json_body(json!({"status": "ok"}));
        });

        let response = client(&server).send_stdin_command(ID, "   ").await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(400));
        assert_eq!(stdin.calls(), 0);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(format!("/api/v2/servers/{}/action/backup_server", ID));
            then.status(200)
                .json_body(json!({"status": "ok"}))
                .delay(Duration::from_secs(2));
        });

        let credentials = Arc::new(TokenProvider::from_static("secret-token"));
        let client =
            CraftyClient::with_timeout(&server.base_url(), credentials, Duration::from_millis(200))
                .unwrap();
        let response = client.backup_server(ID).await.unwrap();
        assert!(!response.success);
        assert!(response.message.starts_with("request timed out"));
        assert_eq!(response.error_code, None);
    }

    #[tokio::test]
    async fn unreachable_backend_is_connection_failure() {
        let credentials = Arc::new(TokenProvider::from_static("secret-token"));
        let client = CraftyClient::new("http://127.0.0.1:1", credentials).unwrap();
        let response = client.restart_server(ID).await.unwrap();
        assert!(!response.success);
        assert!(response.message.starts_with("connection error"));
    }

    #[tokio::test]
    async fn auth_failure_is_returned_as_error() {
        let server = MockServer::start();
        let credentials = Arc::new(TokenProvider::from_static(""));
        let client = CraftyClient::new(&server.base_url(), credentials).unwrap();
        assert_eq!(client.start_server(ID).await, Err(AuthError::EmptyToken));
    }

    #[test]
    fn redaction_is_case_sensitive() {
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer X".to_string()),
            ("authorization".to_string(), "Bearer Y".to_string()),
            ("Content-Type".to_string(), "Z".to_string()),
        ]);
        let redacted = redact_authorization(&headers);
        assert_eq!(redacted["Authorization"], REDACTED);
        assert_eq!(redacted["authorization"], "Bearer Y");
        assert_eq!(redacted["Content-Type"], "Z");
    }

    #[test]
    fn transport_errors_carry_status() {
        let err = CraftyError::Response {
            message: "boom".into(),
            status: Some(503),
        };
        assert_eq!(err.status_code(), Some(503));
        let response = err.into_response();
        assert_eq!(response.error_code, Some(503));
        assert_eq!(response.message, "boom");
    }
}
