use super::controller::ServerCommand;
use crate::gatekeeper::InteractionContext;
use crate::{Context, Error};

async fn run(ctx: Context<'_>, command: ServerCommand) -> Result<(), Error> {
    let interaction =
        InteractionContext::from_poise(ctx).ok_or("server commands are only available as slash commands")?;
    ctx.data().controller.handle(command, &interaction).await;
    interaction.sync_to_poise(ctx);
    Ok(())
}

/// Start the Crafty Controller server
#[poise::command(slash_command)]
pub async fn start(ctx: Context<'_>) -> Result<(), Error> {
    run(ctx, ServerCommand::Start).await
}

/// Stop the Crafty Controller server
#[poise::command(slash_command)]
pub async fn stop(ctx: Context<'_>) -> Result<(), Error> {
    run(ctx, ServerCommand::Stop).await
}

/// Restart the Crafty Controller server
#[poise::command(slash_command)]
pub async fn restart(ctx: Context<'_>) -> Result<(), Error> {
    run(ctx, ServerCommand::Restart).await
}

/// Force kill the Crafty Controller server
#[poise::command(slash_command)]
pub async fn kill(ctx: Context<'_>) -> Result<(), Error> {
    run(ctx, ServerCommand::Kill).await
}

/// Check server status and statistics
#[poise::command(slash_command)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    run(ctx, ServerCommand::Status).await
}
