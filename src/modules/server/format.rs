use crate::crafty::{ApiResponse, ServerStats};
use poise::serenity_prelude::{Colour, CreateEmbed, CreateEmbedFooter, Timestamp};

pub const FOOTER: &str = "Crafty Controller Bot";
const SERVER_ID_FIELD: &str = "Server ID";

const GREEN: Colour = Colour::new(0x2ECC71);
const RED: Colour = Colour::new(0xE74C3C);
const ORANGE: Colour = Colour::new(0xE67E22);
const BLUE: Colour = Colour::new(0x3498DB);

/// `online_players` -> `Online Players`
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Result embed for a lifecycle action such as "Server Start".
pub fn action_embed(response: &ApiResponse, action: &str, server_id: &str) -> CreateEmbed {
    let (title, colour) = if response.success {
        (format!("✅ {} Successful", action), GREEN)
    } else {
        (format!("❌ {} Failed", action), RED)
    };

    let mut embed = CreateEmbed::new()
        .title(title)
        .description(&response.message)
        .colour(colour)
        .timestamp(Timestamp::now())
        .field(SERVER_ID_FIELD, server_id, true);

    if response.success {
        for (key, value) in response.json_fields() {
            embed = embed.field(title_case(&key), value, true);
        }
    } else if let Some(code) = response.error_code {
        embed = embed.field("Error Code", code.to_string(), true);
    }

    embed.footer(CreateEmbedFooter::new(FOOTER))
}

pub fn server_state(stats: &ServerStats) -> (&'static str, &'static str, Colour) {
    if stats.crashed {
        ("💥", "Crashed", ORANGE)
    } else if stats.updating {
        ("🔄", "Updating", BLUE)
    } else if stats.running {
        ("🟢", "Running", GREEN)
    } else {
        ("🔴", "Stopped", RED)
    }
}

pub fn status_embed(stats: &ServerStats) -> CreateEmbed {
    let (emoji, state, colour) = server_state(stats);

    let mut fields = vec![
        ("Status", format!("{} {}", emoji, state)),
        (SERVER_ID_FIELD, stats.server_id.clone()),
        ("Version", stats.version.clone()),
        ("CPU Usage", format!("{:.1}%", stats.cpu)),
        (
            "Memory Usage",
            format!("{} ({:.1}%)", stats.memory, stats.mem_percent),
        ),
        (
            "Players Online",
            format!("{}/{}", stats.online_players, stats.max_players),
        ),
    ];

    if !stats.world_name.is_empty() && stats.world_name != "Unknown" {
        fields.push(("World Name", stats.world_name.clone()));
    }
    if !matches!(stats.world_size.as_str(), "" | "0MB" | "Unknown") {
        fields.push(("World Size", stats.world_size.clone()));
    }
    if stats.running && stats.started != "Unknown" {
        fields.push(("Started", stats.started.clone()));
    }

    CreateEmbed::new()
        .title(format!("📊 Server Status: {}", stats.server_name))
        .colour(colour)
        .timestamp(Timestamp::now())
        .fields(fields.into_iter().map(|(name, value)| (name, value, true)))
        .footer(CreateEmbedFooter::new(FOOTER))
}

const COMMANDS: &[(&str, &str)] = &[
    ("/start", "Start the server"),
    ("/stop", "Stop the server"),
    ("/restart", "Restart the server"),
    ("/kill", "Force kill the server"),
    ("/status", "Check server status and statistics"),
    ("/help", "Show this help message"),
];

pub fn help_embed(server_id: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("🤖 {} Commands", FOOTER))
        .description("Available slash commands for managing your Minecraft server")
        .colour(BLUE)
        .timestamp(Timestamp::now())
        .fields(COMMANDS.iter().map(|(name, description)| (*name, *description, false)))
        .footer(CreateEmbedFooter::new(format!("Managing server ID: {}", server_id)))
}
