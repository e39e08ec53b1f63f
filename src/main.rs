use craftybot::config::Config;
use craftybot::crafty::{task::TokenRefreshTask, TokenProvider};
use craftybot::events::EventManager;
use craftybot::gatekeeper::{self, InteractionContext, Reply};
use craftybot::modules::{server, system::events::ReadyHandler, utils::help};
use craftybot::tasks::TaskManager;
use craftybot::{Data, Error};
use poise::serenity_prelude::{self as serenity, CreateAllowedMentions, GuildId};
use std::sync::Arc;
use tracing::{error, info, trace};
use tracing_subscriber::EnvFilter;

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    let (ctx, message) = match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!(
                "Command {} failed for {}: {}",
                ctx.command().qualified_name,
                ctx.author().tag(),
                error
            );
            if let Some(interaction) = InteractionContext::from_poise(ctx) {
                gatekeeper::report_error(&interaction, &error).await;
                interaction.sync_to_poise(ctx);
            }
            return;
        }
        poise::FrameworkError::ArgumentParse { ctx, .. } => (
            ctx,
            "❌ Invalid argument provided. Please check your input.".to_string(),
        ),
        poise::FrameworkError::CooldownHit {
            remaining_cooldown,
            ctx,
            ..
        } => (
            ctx,
            format!(
                "❌ Command is on cooldown. Try again in {:.2} seconds.",
                remaining_cooldown.as_secs_f64()
            ),
        ),
        poise::FrameworkError::MissingUserPermissions { ctx, .. } => (
            ctx,
            "❌ You don't have permission to use this command.".to_string(),
        ),
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling framework error: {}", e);
            }
            return;
        }
    };

    if let Some(interaction) = InteractionContext::from_poise(ctx) {
        gatekeeper::reply(&interaction, Reply::text(message).ephemeral(true)).await;
        interaction.sync_to_poise(ctx);
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("starting craftybot");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Managing Crafty server {} at {} ({:?})",
        config.server_id, config.crafty_url, config.auth
    );

    let credentials = match TokenProvider::from_config(&config).await {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            error!("Failed to set up Crafty credentials: {}", e);
            std::process::exit(1);
        }
    };

    let controller = Arc::new(server::ServerController::from_config(
        &config,
        Arc::clone(&credentials),
    ));
    controller.check_connectivity().await;

    let task_manager = Arc::new(TaskManager::new());
    task_manager
        .add_task(TokenRefreshTask::new(Arc::clone(&credentials)))
        .await;

    let event_manager = Arc::new(EventManager::new());
    event_manager.add_handler(ReadyHandler).await;

    let guild_id = config.guild_id.map(GuildId::new);
    let data = Data {
        controller,
        task_manager: Arc::clone(&task_manager),
        event_manager,
    };

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions::<Data, Error> {
            allowed_mentions: Some(CreateAllowedMentions::new().empty_roles().empty_users()),
            commands: vec![
                server::start(),
                server::stop(),
                server::restart(),
                server::kill(),
                server::status(),
                help(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    trace!(
                        "Command {} used by {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        ctx.guild_id()
                            .map_or_else(|| "DM".to_string(), |id| id.to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command {} completed for {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        ctx.guild_id()
                            .map_or_else(|| "DM".to_string(), |id| id.to_string())
                    );
                })
            },
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    data.event_manager.handle_event(ctx, event).await;
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("{} is ready, registering commands", ready.user.name);
                let commands = &framework.options().commands;

                if let Some(guild_id) = guild_id {
                    match poise::builtins::register_in_guild(ctx, commands, guild_id).await {
                        Ok(()) => info!("Registered {} commands in guild {}", commands.len(), guild_id),
                        Err(e) => error!("Guild command registration failed: {}", e),
                    }
                }
                match poise::builtins::register_globally(ctx, commands).await {
                    Ok(()) => info!("Registered {} commands globally", commands.len()),
                    Err(e) => error!("Global command registration failed: {}", e),
                }

                data.task_manager.start_tasks().await;
                Ok(data)
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged();
    let mut client = match serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create Discord client: {}", e);
            std::process::exit(1);
        }
    };

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    if let Err(e) = client.start().await {
        error!("Discord client error: {}", e);
    }

    task_manager.shutdown().await;
    credentials.close().await;
    info!("craftybot stopped");
}
