//! Configuration: a TOML file overlaid with the deployment's environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lessons: LessonsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot access token
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Cards with images can take a long time to render, so this is generous
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub image_hosting_url: Option<String>,
}

fn default_api_base_url() -> String {
    "https://webexapis.com/v1".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
            image_hosting_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served under /static (card images)
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Public URL of the webhook endpoint. When set, the bot registers
    /// its webhook with the platform on startup.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Messages and button presses accepted per person per minute; 0 disables
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
}

fn default_rate_limit() -> usize {
    20
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7001
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            static_dir: default_static_dir(),
            webhook_url: None,
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

/// What to do in a multi-party space once no allow-listed member remains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeavePolicy {
    /// Stay in the space and ignore all input
    #[default]
    Idle,
    /// Post a notice and leave the space
    Exit,
}

/// Beta-mode gating
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Emails of the users allowed to activate the bot
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Reserved: require every member to be allow-listed. Not implemented.
    #[serde(default)]
    pub exclusive_mode: bool,
    #[serde(default)]
    pub on_last_valid_user_left: LeavePolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Sqlite,
    /// Nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreKind,
    /// SQLite database path, defaults to ~/.cardschool/state.db
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config_dir().join("state.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonsConfig {
    /// Directory holding lesson-list.json and lesson-N.json
    #[serde(default = "default_lessons_dir")]
    pub dir: PathBuf,
}

fn default_lessons_dir() -> PathBuf {
    PathBuf::from("generated")
}

impl Default for LessonsConfig {
    fn default() -> Self {
        Self {
            dir: default_lessons_dir(),
        }
    }
}

/// Where usage and feedback notifications go. A room wins over an email.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

/// Default config directory (~/.cardschool)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cardschool")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Split a BETA_USER_EMAILS style list on spaces and commas
pub fn parse_user_list(raw: &str) -> Vec<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load the config file (if present) and apply environment overrides.
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            info!("Loading config from {:?}", path);
            Self::parse(&content)?
        } else if required {
            return Err(ConfigError::Io {
                path,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        } else {
            debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay the environment variables the bot has always been deployed with
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TOKEN") {
            self.bot.token = token;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a port number: {}", port)))?;
        }
        if let Some(users) = lookup("BETA_USER_EMAILS") {
            let users = parse_user_list(&users);
            if !users.is_empty() {
                self.gate.enabled = true;
                self.gate.allowed_users = users;
            }
        }
        if let Some(email) = lookup("ADMIN_EMAIL") {
            self.admin.email = Some(email);
        }
        if let Some(room) = lookup("METRICS_ROOM_ID") {
            self.admin.room_id = Some(room);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        if let Some(url) = lookup("IMAGE_HOSTING_URL") {
            self.bot.image_hosting_url = Some(url);
        }
        if let Some(url) = lookup("WEBHOOK_URL") {
            self.server.webhook_url = Some(url);
        }
        Ok(())
    }

    /// Checks that must pass before the bot can talk to the platform
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "missing bot token (set bot.token or the TOKEN environment variable)".to_string(),
            ));
        }
        if self.bot.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "bot.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.gate.enabled && self.gate.allowed_users.is_empty() {
            warn!("Gating is enabled but no allowed users are configured. Bot will work in all spaces");
        }
        if self.admin.room_id.is_none() && self.admin.email.is_none() {
            warn!("No admin room or admin email configured. Will not notify anyone about bot activity");
        }
        Ok(())
    }
}

/// Written by `cardschool init`
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# cardschool configuration
#
# Every value here can also be supplied through the environment:
# TOKEN, PORT, BETA_USER_EMAILS, ADMIN_EMAIL, METRICS_ROOM_ID,
# LOG_LEVEL, IMAGE_HOSTING_URL, WEBHOOK_URL

# log_level = "info"

[bot]
token = ""
# api_base_url = "https://webexapis.com/v1"
# request_timeout_secs = 60
# image_hosting_url = "https://example.com/images"

[server]
# bind = "0.0.0.0"
# port = 7001
# static_dir = "public"
# webhook_url = "https://bot.example.com/webhook"
# rate_limit_per_minute = 20

[gate]
# Restrict the bot to spaces that include at least one of these users
enabled = false
allowed_users = []
# What to do in a group space once no allowed user remains: "idle" or "exit"
on_last_valid_user_left = "idle"

[store]
# "sqlite" or "memory"
backend = "sqlite"
# path = "/var/lib/cardschool/state.db"

[lessons]
dir = "generated"

[admin]
# room_id = ""
# email = ""
"#;
