use super::format;
use crate::config::Config;
use crate::cooldown::{wait_seconds, CooldownTracker};
use crate::crafty::{ApiResponse, AuthError, CraftyClient, LogLines, ServerAction, TokenProvider};
use crate::default_struct;
use crate::gatekeeper::{self, InteractionContext, Reply};
use crate::Error;
use poise::serenity_prelude::CreateAttachment;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

pub const TIMEOUT_MESSAGE: &str = "⚠️ Crafty API timed-out.";
const START_LOG_LINES: usize = 20;

default_struct! {
    #[derive(Debug, Clone)]
    pub struct Timeouts {
        pub action: Duration = Duration::from_secs(10),
        pub log_wait: Duration = Duration::from_secs(30),
        pub log_poll: Duration = Duration::from_secs(2),
        pub probe: Duration = Duration::from_secs(20),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    Start,
    Stop,
    Restart,
    Kill,
    Status,
}

impl ServerCommand {
    fn title(self) -> &'static str {
        match self {
            Self::Start => "Server Start",
            Self::Stop => "Server Stop",
            Self::Restart => "Server Restart",
            Self::Kill => "Server Kill",
            Self::Status => "Server Status",
        }
    }

    fn action(self) -> Option<ServerAction> {
        match self {
            Self::Start => Some(ServerAction::Start),
            Self::Stop => Some(ServerAction::Stop),
            Self::Restart => Some(ServerAction::Restart),
            Self::Kill => Some(ServerAction::Kill),
            Self::Status => None,
        }
    }
}

/// Owns everything a server command needs that outlives one invocation:
/// the credential provider and the `/start` cooldown map.
#[derive(Debug)]
pub struct ServerController {
    base_url: String,
    server_id: String,
    credentials: Arc<TokenProvider>,
    start_cooldown: CooldownTracker,
    timeouts: Timeouts,
}

impl ServerController {
    pub fn new(
        base_url: impl Into<String>,
        server_id: impl Into<String>,
        credentials: Arc<TokenProvider>,
        start_cooldown: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            server_id: server_id.into(),
            credentials,
            start_cooldown: CooldownTracker::new(start_cooldown),
            timeouts: Timeouts::default(),
        }
    }

    pub fn from_config(config: &Config, credentials: Arc<TokenProvider>) -> Self {
        Self::new(
            config.crafty_url.clone(),
            config.server_id.clone(),
            credentials,
            config.start_cooldown,
        )
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Runs one server command end to end. Every outcome, including
    /// unexpected failures, is reported through the gatekeeper.
    pub async fn handle(&self, command: ServerCommand, ctx: &InteractionContext) {
        let started = Instant::now();
        match self.execute(command, ctx).await {
            Ok(()) => debug!(
                "{} handled for user {} in {}ms",
                command.title(),
                ctx.user_id,
                started.elapsed().as_millis()
            ),
            Err(e) => {
                error!(
                    interaction_id = ctx.id,
                    user_id = ctx.user_id,
                    command = %ctx.command,
                    "{} failed: {}",
                    command.title(),
                    e
                );
                gatekeeper::report_error(ctx, &e).await;
            }
        }
    }

    async fn execute(&self, command: ServerCommand, ctx: &InteractionContext) -> Result<(), Error> {
        if !gatekeeper::defer(ctx, false).await {
            return Ok(());
        }

        if command == ServerCommand::Start {
            if let Err(remaining) = self.start_cooldown.try_acquire(ctx.user_id) {
                debug!("User {} is on /start cooldown for {:?}", ctx.user_id, remaining);
                let message = format!(
                    "⏳ Please wait {} seconds before starting the server again.",
                    wait_seconds(remaining)
                );
                gatekeeper::followup(ctx, Reply::text(message).ephemeral(true)).await;
                return Ok(());
            }
        }

        // Dropped on every return path, which closes its connection pool.
        let client = CraftyClient::new(&self.base_url, Arc::clone(&self.credentials))?;

        let response = match timeout(self.timeouts.action, self.call(&client, command)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("Crafty authentication failed during {}: {}", command.title(), e);
                gatekeeper::followup(ctx, Reply::text(auth_message(&e)).ephemeral(true)).await;
                return Ok(());
            }
            Err(_) => {
                warn!(
                    "{} timed out after {:?}",
                    command.title(),
                    self.timeouts.action
                );
                gatekeeper::followup(ctx, Reply::text(TIMEOUT_MESSAGE).ephemeral(true)).await;
                return Ok(());
            }
        };

        if response.error_code == Some(401) && !self.credentials.is_static() {
            warn!("Crafty rejected the current token, forcing a new login");
            self.credentials.clear().await;
        }

        let embed = match response.stats() {
            Some(stats) if command == ServerCommand::Status && response.success => {
                format::status_embed(stats)
            }
            _ => format::action_embed(&response, command.title(), &self.server_id),
        };
        let delivered = gatekeeper::followup(ctx, Reply::embed(embed)).await;

        if delivered && command == ServerCommand::Start && response.success {
            if let Some(logs) = self.wait_for_start_logs(&client).await {
                let attachment = CreateAttachment::bytes(logs.joined().into_bytes(), "start.log");
                let reply = Reply::text(format!("📜 Last {} lines of the server log", logs.len()))
                    .attachment(attachment);
                gatekeeper::followup(ctx, reply).await;
            }
        }

        Ok(())
    }

    async fn call(
        &self,
        client: &CraftyClient,
        command: ServerCommand,
    ) -> Result<ApiResponse, AuthError> {
        match command.action() {
            Some(action) => client.run_action(&self.server_id, action).await,
            None => client.get_server_stats(&self.server_id).await,
        }
    }

    /// Polls the console until it has output or the wait budget runs out.
    async fn wait_for_start_logs(&self, client: &CraftyClient) -> Option<LogLines> {
        let poll = async {
            loop {
                match client.get_server_logs(&self.server_id, START_LOG_LINES).await {
                    Ok(response) => {
                        if let Some(logs) = response.logs().filter(|logs| !logs.is_empty()) {
                            return Some(LogLines(logs.tail(START_LOG_LINES).to_vec()));
                        }
                    }
                    Err(e) => {
                        warn!("Stopped waiting for start logs: {}", e);
                        return None;
                    }
                }
                sleep(self.timeouts.log_poll).await;
            }
        };

        timeout(self.timeouts.log_wait, poll).await.unwrap_or_else(|_| {
            debug!("No start logs within {:?}", self.timeouts.log_wait);
            None
        })
    }

    /// One stats call at startup to surface misconfiguration early.
    pub async fn check_connectivity(&self) -> bool {
        let started = Instant::now();
        let client = match CraftyClient::new(&self.base_url, Arc::clone(&self.credentials)) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build Crafty client: {}", e);
                return false;
            }
        };

        match timeout(self.timeouts.probe, client.get_server_stats(&self.server_id)).await {
            Ok(Ok(response)) if response.success => {
                info!(
                    "Crafty API reachable, server {} answered in {}ms",
                    self.server_id,
                    started.elapsed().as_millis()
                );
                true
            }
            Ok(Ok(response)) => {
                warn!(
                    "Crafty API check failed: {} (code {:?})",
                    response.message, response.error_code
                );
                false
            }
            Ok(Err(e)) => {
                error!("Crafty API authentication failed: {}", e);
                false
            }
            Err(_) => {
                error!("Crafty API check timed out after {:?}", self.timeouts.probe);
                false
            }
        }
    }
}

fn auth_message(e: &AuthError) -> String {
    match e {
        AuthError::EmptyToken => {
            "❌ Bot configuration error: the Crafty API token is empty.".to_string()
        }
        AuthError::Rejected { .. } => format!(
            "❌ Crafty Controller rejected the bot's credentials{}. Check CRAFTY_USERNAME and CRAFTY_PASSWORD.",
            e.status_code()
                .map(|s| format!(" (HTTP {})", s))
                .unwrap_or_default()
        ),
        AuthError::Connection(_) | AuthError::Timeout => {
            "❌ Could not reach Crafty Controller to log in.".to_string()
        }
        AuthError::Closed => "❌ The bot is shutting down.".to_string(),
    }
}
