use super::auth::{AuthError, TokenProvider};
use crate::tasks::Task;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const CHECK_INTERVAL: Duration = Duration::from_secs(300);
const REFRESH_LEAD: Duration = Duration::from_secs(600);
const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Renews the Crafty login token before it expires so that commands rarely
/// pay for a login round-trip.
#[derive(Debug)]
pub struct TokenRefreshTask {
    credentials: Arc<TokenProvider>,
    base_delay: Duration,
}

impl TokenRefreshTask {
    pub fn new(credentials: Arc<TokenProvider>) -> Self {
        Self {
            credentials,
            base_delay: BASE_DELAY,
        }
    }

    async fn refresh_with_retry(&self) -> Result<bool, AuthError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.credentials.refresh_if_expiring(REFRESH_LEAD).await {
                Ok(refreshed) => return Ok(refreshed),
                Err(AuthError::Closed) => return Err(AuthError::Closed),
                Err(e) if attempt >= MAX_ATTEMPTS => return Err(e),
                Err(e) => {
                    let delay = backoff_delay(self.base_delay, attempt);
                    warn!(
                        "Token refresh attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, MAX_ATTEMPTS, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Exponential delay for the given 1-based attempt, capped at
/// [`MAX_DELAY`], plus up to 10% jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_DELAY);
    let jitter = exponential.mul_f64(fastrand::f64() * 0.1);
    exponential + jitter
}

#[async_trait]
impl Task for TokenRefreshTask {
    fn name(&self) -> &str {
        "TokenRefresh"
    }

    fn schedule(&self) -> Option<Duration> {
        (!self.credentials.is_static()).then_some(CHECK_INTERVAL)
    }

    async fn execute(&mut self) -> Result<(), crate::Error> {
        match self.refresh_with_retry().await {
            Ok(true) => info!(
                "Crafty token refreshed ahead of expiry, now valid until {}",
                self.credentials
                    .expires_at()
                    .await
                    .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
                    .unwrap_or_else(|| "further notice".to_string())
            ),
            Ok(false) => debug!("Crafty token still valid, no refresh needed"),
            Err(e) => {
                warn!("Proactive token refresh failed: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }
}
