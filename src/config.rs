use crate::utils::redact_username;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

const MIN_DISCORD_TOKEN_LEN: usize = 50;
const DEFAULT_TOKEN_CACHE: &str = "data/token.db";
const DEFAULT_START_COOLDOWN_SECS: u64 = 30;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("SERVER_ID must be a valid UUID (got {0:?})")]
    InvalidServerId(String),
    #[error("DISCORD_TOKEN appears to be invalid (too short)")]
    InvalidDiscordToken,
    #[error("GUILD_ID must be a positive integer (got {0:?})")]
    InvalidGuildId(String),
    #[error("{0} must be a whole number of seconds (got {1:?})")]
    InvalidNumber(&'static str, String),
    #[error("either CRAFTY_TOKEN or both CRAFTY_USERNAME and CRAFTY_PASSWORD must be set")]
    MissingCraftyAuth,
}

/// How the bot proves its identity to Crafty Controller.
#[derive(Clone, PartialEq)]
pub enum CraftyAuth {
    Token(String),
    Credentials { username: String, password: String },
}

impl std::fmt::Debug for CraftyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(REDACTED)"),
            Self::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", &redact_username(username))
                .field("password", &"REDACTED")
                .finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,
    pub crafty_url: String,
    pub server_id: String,
    pub auth: CraftyAuth,
    pub guild_id: Option<u64>,
    pub token_cache: Option<String>,
    pub start_cooldown: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discord_token = get("DISCORD_TOKEN");
        let crafty_url = get("CRAFTY_URL");
        let server_id = get("SERVER_ID");

        let missing: Vec<&'static str> = [
            ("DISCORD_TOKEN", discord_token.is_none()),
            ("CRAFTY_URL", crafty_url.is_none()),
            ("SERVER_ID", server_id.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (Some(discord_token), Some(crafty_url), Some(server_id)) =
            (discord_token, crafty_url, server_id)
        else {
            return Err(ConfigError::Missing(missing));
        };

        let server_id = Uuid::parse_str(&server_id)
            .map_err(|_| ConfigError::InvalidServerId(server_id.clone()))?
            .hyphenated()
            .to_string();

        if discord_token.len() < MIN_DISCORD_TOKEN_LEN {
            return Err(ConfigError::InvalidDiscordToken);
        }

        let auth = match (get("CRAFTY_TOKEN"), get("CRAFTY_USERNAME"), get("CRAFTY_PASSWORD")) {
            (Some(token), username, password) => {
                if username.is_some() || password.is_some() {
                    warn!("Both CRAFTY_TOKEN and username/password provided, token takes precedence");
                }
                CraftyAuth::Token(token)
            }
            (None, Some(username), Some(password)) => CraftyAuth::Credentials { username, password },
            _ => return Err(ConfigError::MissingCraftyAuth),
        };

        let guild_id = match get("GUILD_ID") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(id) if id > 0 => Some(id),
                _ => return Err(ConfigError::InvalidGuildId(raw)),
            },
            None => None,
        };

        let token_cache = match get("CRAFTY_TOKEN_CACHE") {
            Some(path) if path.eq_ignore_ascii_case("off") => None,
            Some(path) => Some(path),
            None => Some(DEFAULT_TOKEN_CACHE.to_string()),
        };

        let start_cooldown = match get("START_COOLDOWN_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidNumber("START_COOLDOWN_SECS", raw))?,
            None => Duration::from_secs(DEFAULT_START_COOLDOWN_SECS),
        };

        Ok(Self {
            discord_token,
            crafty_url: crafty_url.trim_end_matches('/').to_string(),
            server_id,
            auth,
            guild_id,
            token_cache,
            start_cooldown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SERVER_ID: &str = "f1bf6997-9f43-4f36-b06f-9d3daaac7a3e";

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("DISCORD_TOKEN", "d".repeat(60)),
            ("CRAFTY_URL", "https://crafty.local:8443/".to_string()),
            ("SERVER_ID", SERVER_ID.to_string()),
            ("CRAFTY_TOKEN", "static-token".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn loads_static_token_configuration() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.crafty_url, "https://crafty.local:8443");
        assert_eq!(config.server_id, SERVER_ID);
        assert_eq!(config.auth, CraftyAuth::Token("static-token".into()));
        assert_eq!(config.guild_id, None);
        assert_eq!(config.token_cache.as_deref(), Some(DEFAULT_TOKEN_CACHE));
        assert_eq!(config.start_cooldown, Duration::from_secs(30));
    }

    #[test]
    fn reports_every_missing_variable() {
        let env = HashMap::new();
        assert_eq!(
            load(&env).unwrap_err(),
            ConfigError::Missing(vec!["DISCORD_TOKEN", "CRAFTY_URL", "SERVER_ID"])
        );
    }

    #[test]
    fn rejects_malformed_server_id() {
        let mut env = base_env();
        env.insert("SERVER_ID", "not-a-uuid".into());
        assert!(matches!(load(&env), Err(ConfigError::InvalidServerId(_))));
    }

    #[test]
    fn normalises_server_id_case() {
        let mut env = base_env();
        env.insert("SERVER_ID", SERVER_ID.to_uppercase());
        assert_eq!(load(&env).unwrap().server_id, SERVER_ID);
    }

    #[test]
    fn falls_back_to_username_and_password() {
        let mut env = base_env();
        env.remove("CRAFTY_TOKEN");
        env.insert("CRAFTY_USERNAME", "admin".into());
        env.insert("CRAFTY_PASSWORD", "hunter2".into());
        let config = load(&env).unwrap();
        assert!(matches!(config.auth, CraftyAuth::Credentials { ref username, .. } if username == "admin"));
        assert!(!format!("{:?}", config.auth).contains("hunter2"));
    }

    #[test]
    fn requires_some_crafty_credential() {
        let mut env = base_env();
        env.remove("CRAFTY_TOKEN");
        env.insert("CRAFTY_USERNAME", "admin".into());
        assert_eq!(load(&env).unwrap_err(), ConfigError::MissingCraftyAuth);
    }

    #[test]
    fn validates_optional_values() {
        let mut env = base_env();
        env.insert("GUILD_ID", "0".into());
        assert!(matches!(load(&env), Err(ConfigError::InvalidGuildId(_))));

        env.insert("GUILD_ID", "123456789".into());
        env.insert("CRAFTY_TOKEN_CACHE", "off".into());
        env.insert("START_COOLDOWN_SECS", "5".into());
        let config = load(&env).unwrap();
        assert_eq!(config.guild_id, Some(123456789));
        assert_eq!(config.token_cache, None);
        assert_eq!(config.start_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn rejects_short_discord_token() {
        let mut env = base_env();
        env.insert("DISCORD_TOKEN", "short".into());
        assert_eq!(load(&env).unwrap_err(), ConfigError::InvalidDiscordToken);
    }

    #[test]
    fn debug_output_hides_credentials() {
        let auth = CraftyAuth::Credentials {
            username: "admin".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("a***"));
        assert!(!rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert_eq!(format!("{:?}", CraftyAuth::Token("secret".into())), "Token(REDACTED)");
    }
}
