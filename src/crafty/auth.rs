use crate::config::{Config, CraftyAuth};
use crate::database::Database;
use crate::utils::redact_username;
use chrono::{DateTime, NaiveDateTime};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const LOGIN_ENDPOINT: &str = "/api/v2/auth/login";

/// Tokens this close to expiry are treated as already expired.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("the configured Crafty API token is empty")]
    EmptyToken,
    #[error("login failed: {message}")]
    Rejected { message: String, status: Option<u16> },
    #[error("login connection error: {0}")]
    Connection(String),
    #[error("login request timed out")]
    Timeout,
    #[error("credential provider has been closed")]
    Closed,
}

impl AuthError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => *status,
            _ => None,
        }
    }
}

/// On-disk copy of the last exchanged token.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct TokenCache {
    pub username: String,
    pub token: Option<String>,
    pub expires_at: Option<SystemTime>,
    pub cached_at: Option<SystemTime>,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    token: String,
    expires_at: Option<SystemTime>,
}

impl IssuedToken {
    fn usable(&self, margin: Duration, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin < expires_at,
            None => true,
        }
    }
}

struct ExchangeState {
    token: Option<IssuedToken>,
    http: Option<reqwest::Client>,
}

struct Exchange {
    base_url: String,
    username: String,
    password: String,
    state: Mutex<ExchangeState>,
    cache: Option<Database<TokenCache>>,
}

enum Source {
    Static(String),
    Exchange(Exchange),
}

/// Supplies the bearer token for Crafty requests.
///
/// In credential mode the token is obtained from the login endpoint and
/// refreshed lazily. The state mutex is held for the whole exchange, so
/// concurrent callers wait for the in-flight login and share its result.
pub struct TokenProvider {
    source: Source,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Source::Static(_) => f.write_str("TokenProvider(static)"),
            Source::Exchange(exchange) => f
                .debug_struct("TokenProvider")
                .field("base_url", &exchange.base_url)
                .field("username", &redact_username(&exchange.username))
                .finish(),
        }
    }
}

impl TokenProvider {
    pub fn from_static(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
        }
    }

    pub fn with_credentials(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Connection(e.to_string()))?;

        Ok(Self {
            source: Source::Exchange(Exchange {
                base_url: base_url.trim_end_matches('/').to_string(),
                username: username.into(),
                password: password.into(),
                state: Mutex::new(ExchangeState {
                    token: None,
                    http: Some(http),
                }),
                cache: None,
            }),
        })
    }

    /// Attaches an on-disk cache and adopts its token when it belongs to the
    /// same user and has not expired. Static providers ignore the cache.
    pub async fn with_cache(mut self, cache: Database<TokenCache>) -> Self {
        if let Source::Exchange(exchange) = &mut self.source {
            let cached = cache.get_data().await;
            let path = cache.path().await;
            exchange.cache = Some(cache);

            match cached.token {
                Some(token) if cached.username == exchange.username => {
                    let issued = IssuedToken {
                        token,
                        expires_at: cached.expires_at,
                    };
                    if issued.usable(Duration::ZERO, SystemTime::now()) {
                        info!("Loaded cached Crafty token from {}", path);
                        exchange.state.get_mut().token = Some(issued);
                    } else {
                        debug!("Ignoring expired cached token in {}", path);
                    }
                }
                Some(_) => debug!("Ignoring cached token for a different user in {}", path),
                None => {}
            }
        }
        self
    }

    pub async fn from_config(config: &Config) -> Result<Self, crate::Error> {
        match &config.auth {
            CraftyAuth::Token(token) => Ok(Self::from_static(token.clone())),
            CraftyAuth::Credentials { username, password } => {
                let provider = Self::with_credentials(&config.crafty_url, username, password)?;
                match &config.token_cache {
                    Some(path) => Ok(provider.with_cache(Database::new(path.clone()).await?).await),
                    None => Ok(provider),
                }
            }
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.source, Source::Static(_))
    }

    /// Returns a token that stays valid for at least [`REFRESH_MARGIN`],
    /// logging in first when needed.
    pub async fn current_token(&self) -> Result<String, AuthError> {
        self.token_within(REFRESH_MARGIN).await.map(|(token, _)| token)
    }

    /// Logs in ahead of time when the token expires within `lead`.
    /// Returns whether a login happened.
    pub async fn refresh_if_expiring(&self, lead: Duration) -> Result<bool, AuthError> {
        self.token_within(lead).await.map(|(_, refreshed)| refreshed)
    }

    async fn token_within(&self, margin: Duration) -> Result<(String, bool), AuthError> {
        let exchange = match &self.source {
            Source::Static(token) if token.trim().is_empty() => return Err(AuthError::EmptyToken),
            Source::Static(token) => return Ok((token.clone(), false)),
            Source::Exchange(exchange) => exchange,
        };

        let mut state = exchange.state.lock().await;
        if let Some(current) = state.token.as_ref() {
            if current.usable(margin, SystemTime::now()) {
                return Ok((current.token.clone(), false));
            }
            debug!("Crafty token expires within {:?}, refreshing", margin);
        }

        let http = state.http.clone().ok_or(AuthError::Closed)?;
        let issued = exchange.login(&http).await?;
        state.token = Some(issued.clone());
        drop(state);

        exchange.persist(&issued).await;
        Ok((issued.token, true))
    }

    pub async fn has_token(&self) -> bool {
        match &self.source {
            Source::Static(token) => !token.trim().is_empty(),
            Source::Exchange(exchange) => exchange.state.lock().await.token.is_some(),
        }
    }

    pub async fn expires_at(&self) -> Option<SystemTime> {
        match &self.source {
            Source::Static(_) => None,
            Source::Exchange(exchange) => exchange
                .state
                .lock()
                .await
                .token
                .as_ref()
                .and_then(|t| t.expires_at),
        }
    }

    /// Forgets the current token (memory and disk) so the next call logs in.
    pub async fn clear(&self) {
        if let Source::Exchange(exchange) = &self.source {
            exchange.state.lock().await.token = None;
            if let Some(cache) = &exchange.cache {
                if let Err(e) = cache.reset().await {
                    warn!("Failed to delete token cache: {}", e);
                }
            }
            debug!("Crafty token cleared");
        }
    }

    /// Releases the login HTTP client. Safe to call more than once.
    pub async fn close(&self) {
        if let Source::Exchange(exchange) = &self.source {
            if exchange.state.lock().await.http.take().is_some() {
                debug!("Token provider closed");
            }
        }
    }

    #[cfg(test)]
    async fn prime(&self, token: &str, expires_at: Option<SystemTime>) {
        if let Source::Exchange(exchange) = &self.source {
            exchange.state.lock().await.token = Some(IssuedToken {
                token: token.to_string(),
                expires_at,
            });
        }
    }
}

impl Exchange {
    async fn login(&self, http: &reqwest::Client) -> Result<IssuedToken, AuthError> {
        let correlation_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let user = redact_username(&self.username);
        let url = format!("{}{}", self.base_url, LOGIN_ENDPOINT);

        info!(
            "[{}] Starting authentication attempt - user: {}, url: {}",
            correlation_id, user, url
        );

        let response = http
            .post(&url)
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await
            .map_err(|e| {
                error!(
                    "[{}] Authentication connection error - user: {}, error: {}",
                    correlation_id, user, e
                );
                if e.is_timeout() {
                    AuthError::Timeout
                } else {
                    AuthError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status == StatusCode::OK && body["status"] == "ok" {
            let token = body["data"]["token"]
                .as_str()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AuthError::Rejected {
                    message: "token not found in login response".to_string(),
                    status: Some(status.as_u16()),
                })?;
            let expires_at = parse_expiry(&body["data"]["expires"]);

            info!(
                "[{}] Authentication successful - user: {}, expires: {}",
                correlation_id,
                user,
                expires_at
                    .map(|t| DateTime::<chrono::Utc>::from(t).to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            );

            return Ok(IssuedToken {
                token: token.to_string(),
                expires_at,
            });
        }

        let message = body["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));
        error!(
            "[{}] Authentication failed - user: {}, status: {}, error: {}",
            correlation_id, user, status, message
        );
        Err(AuthError::Rejected {
            message,
            status: Some(status.as_u16()),
        })
    }

    async fn persist(&self, issued: &IssuedToken) {
        let Some(cache) = &self.cache else { return };
        let username = self.username.clone();
        let issued = issued.clone();
        let result = cache
            .transaction(move |data| {
                data.username = username;
                data.token = Some(issued.token);
                data.expires_at = issued.expires_at;
                data.cached_at = Some(SystemTime::now());
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!("Failed to save token cache: {}", e);
        }
    }
}

/// Crafty reports expiry as RFC 3339, a naive ISO timestamp (UTC) or unix
/// seconds. Anything else means the expiry is unknown.
fn parse_expiry(value: &Value) -> Option<SystemTime> {
    let from_unix = |secs: f64| {
        if secs <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|offset| UNIX_EPOCH.checked_add(offset))
    };

    match value {
        Value::Number(n) => n.as_f64().and_then(from_unix),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(SystemTime::from)
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                        .ok()
                        .map(|naive| SystemTime::from(naive.and_utc()))
                })
                .or_else(|| s.parse::<f64>().ok().and_then(from_unix))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use httpmock::prelude::*;
    use std::sync::Arc;

    fn login_ok(token: &str, expires_in: Duration) -> Value {
        let expires = SystemTime::now() + expires_in;
        json!({
            "status": "ok",
            "data": {
                "token": token,
                "expires": DateTime::<chrono::Utc>::from(expires).to_rfc3339(),
            }
        })
    }

    fn provider(server: &MockServer) -> TokenProvider {
        TokenProvider::with_credentials(&server.base_url(), "admin", "hunter2").unwrap()
    }

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let provider = TokenProvider::from_static("abc");
        assert_eq!(provider.current_token().await.unwrap(), "abc");
        assert!(provider.is_static());
        assert_eq!(provider.expires_at().await, None);
    }

    #[tokio::test]
    async fn empty_static_token_is_an_auth_error() {
        let provider = TokenProvider::from_static("  ");
        assert_eq!(provider.current_token().await, Err(AuthError::EmptyToken));
        assert!(!provider.has_token().await);
    }

    #[tokio::test]
    async fn login_result_is_reused_while_valid() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST)
                .path(LOGIN_ENDPOINT)
                .json_body(json!({"username": "admin", "password": "hunter2"}));
            then.status(200).json_body(login_ok("tok-1", Duration::from_secs(3600)));
        });

        let provider = provider(&server);
        assert_eq!(provider.current_token().await.unwrap(), "tok-1");
        assert_eq!(provider.current_token().await.unwrap(), "tok-1");
        assert_eq!(login.calls(), 1);
        assert!(provider.expires_at().await.is_some());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path(LOGIN_ENDPOINT);
            then.status(200)
                .json_body(login_ok("fresh", Duration::from_secs(3600)))
                .delay(Duration::from_millis(200));
        });

        let provider = Arc::new(provider(&server));
        provider
            .prime("stale", Some(SystemTime::now() - Duration::from_secs(5)))
            .await;

        let tokens = join_all((0..8).map(|_| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.current_token().await })
        }))
        .await;

        assert_eq!(login.calls(), 1);
        for token in tokens {
            assert_eq!(token.unwrap().unwrap(), "fresh");
        }
    }

    #[tokio::test]
    async fn token_inside_safety_margin_is_refreshed() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path(LOGIN_ENDPOINT);
            then.status(200).json_body(login_ok("renewed", Duration::from_secs(3600)));
        });

        let provider = provider(&server);
        provider
            .prime("almost", Some(SystemTime::now() + Duration::from_secs(30)))
            .await;
        assert_eq!(provider.current_token().await.unwrap(), "renewed");
        login.assert_calls(1);
    }

    #[tokio::test]
    async fn refresh_if_expiring_respects_lead_time() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path(LOGIN_ENDPOINT);
            then.status(200).json_body(login_ok("next", Duration::from_secs(7200)));
        });

        let provider = provider(&server);
        provider
            .prime("current", Some(SystemTime::now() + Duration::from_secs(300)))
            .await;

        assert!(!provider.refresh_if_expiring(Duration::from_secs(60)).await.unwrap());
        assert!(provider.refresh_if_expiring(Duration::from_secs(600)).await.unwrap());
        assert_eq!(provider.current_token().await.unwrap(), "next");
        assert_eq!(login.calls(), 1);
    }

    #[tokio::test]
    async fn failed_login_is_not_cached() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path(LOGIN_ENDPOINT);
            then.status(401)
                .json_body(json!({"status": "error", "error": "ACCESS_DENIED"}));
        });

        let provider = provider(&server);
        let err = provider.current_token().await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Rejected {
                message: "ACCESS_DENIED".into(),
                status: Some(401)
            }
        );
        assert_eq!(err.status_code(), Some(401));
        assert!(!provider.has_token().await);

        assert!(provider.current_token().await.is_err());
        assert_eq!(login.calls(), 2);
    }

    #[tokio::test]
    async fn login_without_token_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(LOGIN_ENDPOINT);
            then.status(200).json_body(json!({"status": "ok", "data": {}}));
        });

        let err = provider(&server).current_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { status: Some(200), .. }));
    }

    #[tokio::test]
    async fn closed_provider_cannot_log_in() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path(LOGIN_ENDPOINT);
            then.status(200).json_body(login_ok("tok", Duration::from_secs(3600)));
        });

        let provider = provider(&server);
        provider.close().await;
        provider.close().await;
        assert_eq!(provider.current_token().await, Err(AuthError::Closed));
        assert_eq!(login.calls(), 0);
    }

    #[tokio::test]
    async fn cached_token_survives_restart() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path(LOGIN_ENDPOINT);
            then.status(200).json_body(login_ok("persisted", Duration::from_secs(3600)));
        });
        let path = std::env::temp_dir()
            .join(format!("craftybot-auth-{}", uuid::Uuid::new_v4()))
            .join("token.db")
            .to_string_lossy()
            .into_owned();

        let first = provider(&server)
            .with_cache(Database::new(path.clone()).await.unwrap())
            .await;
        assert_eq!(first.current_token().await.unwrap(), "persisted");

        let second = provider(&server)
            .with_cache(Database::new(path.clone()).await.unwrap())
            .await;
        assert_eq!(second.current_token().await.unwrap(), "persisted");
        assert_eq!(login.calls(), 1);

        let other_user = TokenProvider::with_credentials(&server.base_url(), "bob", "pw")
            .unwrap()
            .with_cache(Database::new(path.clone()).await.unwrap())
            .await;
        assert!(!other_user.has_token().await);

        second.clear().await;
        assert!(!second.has_token().await);
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn parses_expiry_formats() {
        let expected = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(parse_expiry(&json!(1_700_000_000)), Some(expected));
        assert_eq!(parse_expiry(&json!("1700000000")), Some(expected));
        assert_eq!(parse_expiry(&json!("2023-11-14T22:13:20Z")), Some(expected));
        assert_eq!(parse_expiry(&json!("2023-11-14T22:13:20")), Some(expected));
        assert_eq!(parse_expiry(&json!("2023-11-14 22:13:20")), Some(expected));
        assert_eq!(parse_expiry(&json!("soon")), None);
        assert_eq!(parse_expiry(&Value::Null), None);
        assert_eq!(parse_expiry(&json!(1e30)), None);
        assert_eq!(parse_expiry(&json!("1e30")), None);
        assert_eq!(parse_expiry(&json!(-5)), None);
    }
}
