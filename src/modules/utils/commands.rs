use crate::gatekeeper::{self, InteractionContext, Reply};
use crate::modules::server::format::help_embed;
use crate::{Context, Error};

/// Show available commands
#[poise::command(slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let interaction =
        InteractionContext::from_poise(ctx).ok_or("help is only available as a slash command")?;
    let embed = help_embed(ctx.data().controller.server_id());

    gatekeeper::reply(&interaction, Reply::embed(embed)).await;
    interaction.sync_to_poise(ctx);
    Ok(())
}
