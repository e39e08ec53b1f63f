use crate::utils::{truncate, MESSAGE_LIMIT};
use async_trait::async_trait;
use poise::serenity_prelude::{
    CommandInteraction, CreateAttachment, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, Http,
};
use serenity::http::HttpError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Time Discord allows for the initial response (or defer).
pub const INITIAL_WINDOW: Duration = Duration::from_secs(3);
/// Lifetime of the interaction token used for follow-ups.
pub const FOLLOWUP_WINDOW: Duration = Duration::from_secs(15 * 60);

const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;
const ALREADY_ACKNOWLEDGED: isize = 40060;
const UNKNOWN_INTERACTION: isize = 10062;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("interaction has already been acknowledged")]
    AlreadyAcknowledged,
    #[error("unknown interaction")]
    UnknownInteraction,
    #[error("Discord API error {code} (HTTP {status}): {message}")]
    Http {
        code: isize,
        status: u16,
        message: String,
    },
    #[error("{0}")]
    Other(String),
}

impl DeliveryError {
    fn reason(&self) -> &'static str {
        match self {
            Self::AlreadyAcknowledged => "already_responded",
            Self::UnknownInteraction => "unknown_interaction",
            Self::Http { .. } => "http_error",
            Self::Other(_) => "unexpected_error",
        }
    }
}

impl From<serenity::Error> for DeliveryError {
    fn from(e: serenity::Error) -> Self {
        if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &e {
            return match response.error.code {
                ALREADY_ACKNOWLEDGED => Self::AlreadyAcknowledged,
                UNKNOWN_INTERACTION => Self::UnknownInteraction,
                code => Self::Http {
                    code,
                    status: response.status_code.as_u16(),
                    message: response.error.message.clone(),
                },
            };
        }
        Self::Other(e.to_string())
    }
}

/// A message to deliver through either channel.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub content: Option<String>,
    pub embed: Option<CreateEmbed>,
    pub attachment: Option<CreateAttachment>,
    pub ephemeral: bool,
}

impl Reply {
    pub fn text(content: impl AsRef<str>) -> Self {
        Self {
            content: Some(truncate(content.as_ref(), MESSAGE_LIMIT)),
            ..Default::default()
        }
    }

    pub fn embed(embed: CreateEmbed) -> Self {
        Self {
            embed: Some(embed),
            ..Default::default()
        }
    }

    pub fn attachment(mut self, attachment: CreateAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }
}

/// The two delivery channels of an interaction, plus the defer
/// acknowledgement.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn create_response(&self, reply: &Reply) -> Result<(), DeliveryError>;
    async fn create_followup(&self, reply: &Reply) -> Result<(), DeliveryError>;
    async fn defer(&self, ephemeral: bool) -> Result<(), DeliveryError>;
}

pub struct DiscordResponder {
    http: Arc<Http>,
    interaction: CommandInteraction,
}

impl DiscordResponder {
    pub fn new(http: Arc<Http>, interaction: CommandInteraction) -> Self {
        Self { http, interaction }
    }
}

#[async_trait]
impl Responder for DiscordResponder {
    async fn create_response(&self, reply: &Reply) -> Result<(), DeliveryError> {
        let mut message = CreateInteractionResponseMessage::new().ephemeral(reply.ephemeral);
        if let Some(content) = &reply.content {
            message = message.content(content);
        }
        if let Some(embed) = &reply.embed {
            message = message.embed(embed.clone());
        }
        if let Some(attachment) = &reply.attachment {
            message = message.add_file(attachment.clone());
        }

        self.interaction
            .create_response(self.http.as_ref(), CreateInteractionResponse::Message(message))
            .await
            .map_err(DeliveryError::from)
    }

    async fn create_followup(&self, reply: &Reply) -> Result<(), DeliveryError> {
        let mut followup = CreateInteractionResponseFollowup::new().ephemeral(reply.ephemeral);
        if let Some(content) = &reply.content {
            followup = followup.content(content);
        }
        if let Some(embed) = &reply.embed {
            followup = followup.embed(embed.clone());
        }
        if let Some(attachment) = &reply.attachment {
            followup = followup.add_file(attachment.clone());
        }

        self.interaction
            .create_followup(self.http.as_ref(), followup)
            .await
            .map(|_| ())
            .map_err(DeliveryError::from)
    }

    async fn defer(&self, ephemeral: bool) -> Result<(), DeliveryError> {
        let message = CreateInteractionResponseMessage::new().ephemeral(ephemeral);
        self.interaction
            .create_response(self.http.as_ref(), CreateInteractionResponse::Defer(message))
            .await
            .map_err(DeliveryError::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    Fresh,
    Replied,
    Expired,
}

/// One inbound slash command as seen by the delivery logic.
///
/// `replied` tracks whether the single direct-reply slot (response or defer)
/// has been used.
pub struct InteractionContext {
    pub id: u64,
    pub user_id: u64,
    pub command: String,
    received_at: Instant,
    backdated: Duration,
    replied: AtomicBool,
    responder: Arc<dyn Responder>,
}

impl std::fmt::Debug for InteractionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionContext")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("command", &self.command)
            .field("state", &self.state())
            .finish()
    }
}

impl InteractionContext {
    pub fn new(
        id: u64,
        user_id: u64,
        command: impl Into<String>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            id,
            user_id,
            command: command.into(),
            received_at: Instant::now(),
            backdated: Duration::ZERO,
            replied: AtomicBool::new(false),
            responder,
        }
    }

    /// Backdates the context by `age`.
    pub fn with_age(mut self, age: Duration) -> Self {
        self.backdated = age;
        self
    }

    pub fn with_replied(self, replied: bool) -> Self {
        self.replied.store(replied, Ordering::SeqCst);
        self
    }

    /// Wraps a poise slash-command invocation. Prefix invocations have no
    /// interaction and yield `None`.
    pub fn from_poise(ctx: crate::Context<'_>) -> Option<Self> {
        let poise::Context::Application(app) = ctx else {
            return None;
        };
        let interaction = app.interaction;
        let responder = DiscordResponder::new(ctx.serenity_context().http.clone(), interaction.clone());

        Some(
            Self::new(
                interaction.id.get(),
                interaction.user.id.get(),
                ctx.command().qualified_name.clone(),
                Arc::new(responder),
            )
            .with_age(snowflake_age(interaction.id.get(), SystemTime::now()))
            .with_replied(app.has_sent_initial_response.load(Ordering::SeqCst)),
        )
    }

    /// Tells poise whether the initial response slot was used, so its own
    /// replies pick the right channel.
    pub fn sync_to_poise(&self, ctx: crate::Context<'_>) {
        if let poise::Context::Application(app) = ctx {
            if self.is_replied() {
                app.has_sent_initial_response.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn is_replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> InteractionState {
        self.state_at(Instant::now())
    }

    pub fn state_at(&self, now: Instant) -> InteractionState {
        let elapsed = now
            .saturating_duration_since(self.received_at)
            .saturating_add(self.backdated);
        let replied = self.is_replied();

        if elapsed >= FOLLOWUP_WINDOW || (!replied && elapsed >= INITIAL_WINDOW) {
            InteractionState::Expired
        } else if replied {
            InteractionState::Replied
        } else {
            InteractionState::Fresh
        }
    }

    fn claim(&self) -> bool {
        self.replied
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.replied.store(false, Ordering::SeqCst);
    }
}

/// Time elapsed since Discord created the snowflake `id`.
pub fn snowflake_age(id: u64, now: SystemTime) -> Duration {
    let created_ms = (id >> 22) + DISCORD_EPOCH_MS;
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    Duration::from_millis(now_ms.saturating_sub(created_ms))
}

fn log_skip(ctx: &InteractionContext, reason: &'static str) {
    warn!(
        interaction_id = ctx.id,
        user_id = ctx.user_id,
        command = %ctx.command,
        skip_reason = reason,
        "Skipping interaction delivery"
    );
}

fn log_failure(ctx: &InteractionContext, e: &DeliveryError) {
    error!(
        interaction_id = ctx.id,
        user_id = ctx.user_id,
        command = %ctx.command,
        skip_reason = e.reason(),
        error = %e,
        "Interaction delivery failed"
    );
}

pub fn can_reply(ctx: &InteractionContext) -> bool {
    ctx.state() != InteractionState::Expired
}

/// Acknowledges the interaction so the result can follow later.
pub async fn defer(ctx: &InteractionContext, ephemeral: bool) -> bool {
    if !can_reply(ctx) {
        log_skip(ctx, "interaction_expired");
        return false;
    }
    if !ctx.claim() {
        debug!(interaction_id = ctx.id, "Interaction already acknowledged, not deferring");
        return true;
    }

    match ctx.responder.defer(ephemeral).await {
        Ok(()) => true,
        Err(DeliveryError::AlreadyAcknowledged) => {
            log_skip(ctx, "already_responded");
            true
        }
        Err(e @ DeliveryError::UnknownInteraction) => {
            log_failure(ctx, &e);
            false
        }
        Err(e) => {
            ctx.release();
            log_failure(ctx, &e);
            false
        }
    }
}

/// Delivers `reply` through the direct response when it is still unused,
/// otherwise as a follow-up. Never fails; returns whether it was delivered.
pub async fn reply(ctx: &InteractionContext, reply: Reply) -> bool {
    if !can_reply(ctx) {
        log_skip(ctx, "interaction_expired");
        return false;
    }

    if ctx.claim() {
        match ctx.responder.create_response(&reply).await {
            Ok(()) => return true,
            Err(DeliveryError::AlreadyAcknowledged) => log_skip(ctx, "already_responded"),
            Err(e @ DeliveryError::UnknownInteraction) => {
                log_failure(ctx, &e);
                return false;
            }
            Err(e) => {
                ctx.release();
                log_failure(ctx, &e);
                return false;
            }
        }
    }

    send_followup(ctx, &reply).await
}

/// Like [`reply`] but always uses the follow-up channel.
pub async fn followup(ctx: &InteractionContext, reply: Reply) -> bool {
    if !can_reply(ctx) {
        log_skip(ctx, "interaction_expired");
        return false;
    }
    send_followup(ctx, &reply).await
}

const GENERIC_ERROR: &str = "❌ An error occurred while processing your command.";

/// Tells the user a command failed. If that message cannot be delivered a
/// generic one is tried once more; after that the failure is only logged.
pub async fn report_error(ctx: &InteractionContext, error: &(dyn std::fmt::Display + Sync)) -> bool {
    let message = format!("❌ Sorry, that command failed: {}", error);
    let message = if message.chars().count() > MESSAGE_LIMIT {
        GENERIC_ERROR.to_string()
    } else {
        message
    };

    if reply(ctx, Reply::text(message).ephemeral(true)).await {
        return true;
    }
    if can_reply(ctx) && reply(ctx, Reply::text(GENERIC_ERROR).ephemeral(true)).await {
        return true;
    }

    error!(
        interaction_id = ctx.id,
        user_id = ctx.user_id,
        command = %ctx.command,
        "Failed to send any error response"
    );
    false
}

async fn send_followup(ctx: &InteractionContext, reply: &Reply) -> bool {
    match ctx.responder.create_followup(reply).await {
        Ok(()) => true,
        Err(e) => {
            log_failure(ctx, &e);
            false
        }
    }
}
