//! Server configuration loading from file and environment variables.

use callbridge_types::BusinessProfile;
use callbridge_voice::{ModelConfig, ModelProvider};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Voice model provider and credentials.
    #[serde(default)]
    pub model: ModelConfig,

    /// Tool backend endpoint.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Telephony provider REST credentials and stream handshake limits.
    #[serde(default)]
    pub telephony: TelephonyConfig,

    /// Per-call session tunables and caller-facing fallback phrases.
    #[serde(default)]
    pub session: SessionConfig,

    /// Business profiles seeded into the database at start-up.
    #[serde(default)]
    pub businesses: Vec<BusinessProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build media stream URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "callbridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tools_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Deadline for one tool backend call.
    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Clone, Deserialize)]
pub struct TelephonyConfig {
    #[serde(default)]
    pub account_sid: String,

    #[serde(default)]
    pub auth_token: String,

    #[serde(default = "default_telephony_api_base")]
    pub api_base: String,

    /// How long a new media stream may take to send its `start` frame.
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Time the other connection gets to close after one side ends.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Outbound telephony frames buffered before audio is dropped.
    #[serde(default = "default_outbound_queue_frames")]
    pub outbound_queue_frames: usize,

    /// Spoken when the voice model cannot be reached.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    /// Spoken before hanging up on a number with no business profile.
    #[serde(default = "default_goodbye_message")]
    pub goodbye_message: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_db_path() -> String {
    "callbridge.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tools_url() -> String {
    "http://localhost:8080/tools".to_string()
}

fn default_tool_timeout_ms() -> u64 {
    8_000
}

fn default_telephony_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_start_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_outbound_queue_frames() -> usize {
    // Ten seconds of 20ms frames plus marks.
    600
}

fn default_fallback_message() -> String {
    "We're sorry, we're experiencing technical difficulties. Please try your call again in a few minutes."
        .to_string()
}

fn default_goodbye_message() -> String {
    "Sorry, this number isn't set up to take calls right now. Goodbye.".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tools_url(),
            api_key: None,
            timeout_ms: default_tool_timeout_ms(),
        }
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            api_base: default_telephony_api_base(),
            start_timeout_ms: default_start_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
            outbound_queue_frames: default_outbound_queue_frames(),
            fallback_message: default_fallback_message(),
            goodbye_message: default_goodbye_message(),
        }
    }
}

impl fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl fmt::Debug for TelephonyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelephonyConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("start_timeout_ms", &self.start_timeout_ms)
            .finish()
    }
}

impl TelephonyConfig {
    /// True when REST call control can be used.
    pub fn has_credentials(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }
}

impl Config {
    /// Per-session settings derived from the loaded configuration.
    pub fn session_settings(&self) -> crate::session::SessionSettings {
        crate::session::SessionSettings {
            connect_timeout: Duration::from_millis(self.model.connect_timeout_ms),
            start_timeout: Duration::from_millis(self.telephony.start_timeout_ms),
            shutdown_grace: Duration::from_millis(self.session.shutdown_grace_ms),
            tool_timeout: Duration::from_millis(self.tools.timeout_ms),
            outbound_queue_frames: self.session.outbound_queue_frames.max(1),
            fallback_message: self.session.fallback_message.clone(),
            goodbye_message: self.session.goodbye_message.clone(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLBRIDGE_HOST`, `CALLBRIDGE_PORT`, `CALLBRIDGE_PUBLIC_URL`
/// - `CALLBRIDGE_DB_PATH`
/// - `CALLBRIDGE_LOG_LEVEL`, `CALLBRIDGE_LOG_JSON` ("true" or "1")
/// - `CALLBRIDGE_MODEL_PROVIDER`, `CALLBRIDGE_MODEL_API_KEY`
/// - `CALLBRIDGE_TOOLS_URL`
/// - `CALLBRIDGE_TWILIO_ACCOUNT_SID`, `CALLBRIDGE_TWILIO_AUTH_TOKEN`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("CALLBRIDGE_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("CALLBRIDGE_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(url) = var("CALLBRIDGE_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Some(db_path) = var("CALLBRIDGE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("CALLBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CALLBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(provider) = var("CALLBRIDGE_MODEL_PROVIDER") {
        match provider.parse::<ModelProvider>() {
            Ok(parsed) => config.model.provider = parsed,
            Err(e) => tracing::warn!("ignoring CALLBRIDGE_MODEL_PROVIDER: {}", e),
        }
    }
    if let Some(key) = var("CALLBRIDGE_MODEL_API_KEY") {
        config.model.api_key = key;
    }
    if let Some(url) = var("CALLBRIDGE_TOOLS_URL") {
        config.tools.base_url = url;
    }
    if let Some(sid) = var("CALLBRIDGE_TWILIO_ACCOUNT_SID") {
        config.telephony.account_sid = sid;
    }
    if let Some(token) = var("CALLBRIDGE_TWILIO_AUTH_TOKEN") {
        config.telephony.auth_token = token;
    }
}
