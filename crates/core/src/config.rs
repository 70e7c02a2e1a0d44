use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub platform: PlatformConfig,
    pub discord: DiscordConfig,
    pub urls: UrlsConfig,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub url: String,
    /// TTL for modal staging blobs.
    pub staging_ttl_secs: u64,
    /// Sliding-window limits per event class, events per minute.
    pub command_limit_per_minute: u32,
    pub button_limit_per_minute: u32,
    pub modal_limit_per_minute: u32,
}

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub bot_token: SecretString,
    pub app_id: String,
}

#[derive(Clone, Debug)]
pub struct UrlsConfig {
    pub web: String,
    pub support: String,
    pub status: String,
    pub help_chat: String,
}

impl Default for UrlsConfig {
    fn default() -> Self {
        Self {
            web: "https://app.example.community".to_string(),
            support: "https://support.example.community".to_string(),
            status: "https://status.example.community".to_string(),
            help_chat: "https://chat.example.community/help".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// 64 hex characters; feeds the token sealer.
    pub token_seal_key: SecretString,
    pub account_age_floor_days: i64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub cache_url: Option<String>,
    pub platform_base_url: Option<String>,
    pub platform_api_key: Option<String>,
    pub discord_bot_token: Option<String>,
    pub discord_app_id: Option<String>,
    pub token_seal_key: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://taskbridge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            cache: CacheConfig {
                url: String::new(),
                staging_ttl_secs: 300,
                command_limit_per_minute: 5,
                button_limit_per_minute: 10,
                modal_limit_per_minute: 10,
            },
            platform: PlatformConfig {
                base_url: String::new(),
                api_key: String::new().into(),
                timeout_secs: 10,
                max_retries: 3,
            },
            discord: DiscordConfig { bot_token: String::new().into(), app_id: String::new() },
            urls: UrlsConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            security: SecurityConfig {
                token_seal_key: String::new().into(),
                account_age_floor_days: 7,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    cache: Option<CachePatch>,
    platform: Option<PlatformPatch>,
    discord: Option<DiscordPatch>,
    urls: Option<UrlsPatch>,
    server: Option<ServerPatch>,
    security: Option<SecurityPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    url: Option<String>,
    staging_ttl_secs: Option<u64>,
    command_limit_per_minute: Option<u32>,
    button_limit_per_minute: Option<u32>,
    modal_limit_per_minute: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordPatch {
    bot_token: Option<String>,
    app_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UrlsPatch {
    web: Option<String>,
    support: Option<String>,
    status: Option<String>,
    help_chat: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    token_seal_key: Option<String>,
    account_age_floor_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("taskbridge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(url) = cache.url {
                self.cache.url = url;
            }
            if let Some(ttl) = cache.staging_ttl_secs {
                self.cache.staging_ttl_secs = ttl;
            }
            if let Some(limit) = cache.command_limit_per_minute {
                self.cache.command_limit_per_minute = limit;
            }
            if let Some(limit) = cache.button_limit_per_minute {
                self.cache.button_limit_per_minute = limit;
            }
            if let Some(limit) = cache.modal_limit_per_minute {
                self.cache.modal_limit_per_minute = limit;
            }
        }

        if let Some(platform) = patch.platform {
            if let Some(base_url) = platform.base_url {
                self.platform.base_url = base_url;
            }
            if let Some(api_key_value) = platform.api_key {
                self.platform.api_key = secret_value(api_key_value);
            }
            if let Some(timeout_secs) = platform.timeout_secs {
                self.platform.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = platform.max_retries {
                self.platform.max_retries = max_retries;
            }
        }

        if let Some(discord) = patch.discord {
            if let Some(bot_token_value) = discord.bot_token {
                self.discord.bot_token = secret_value(bot_token_value);
            }
            if let Some(app_id) = discord.app_id {
                self.discord.app_id = app_id;
            }
        }

        if let Some(urls) = patch.urls {
            if let Some(web) = urls.web {
                self.urls.web = web;
            }
            if let Some(support) = urls.support {
                self.urls.support = support;
            }
            if let Some(status) = urls.status {
                self.urls.status = status;
            }
            if let Some(help_chat) = urls.help_chat {
                self.urls.help_chat = help_chat;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(security) = patch.security {
            if let Some(token_seal_key_value) = security.token_seal_key {
                self.security.token_seal_key = secret_value(token_seal_key_value);
            }
            if let Some(days) = security.account_age_floor_days {
                self.security.account_age_floor_days = days;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TASKBRIDGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TASKBRIDGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TASKBRIDGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TASKBRIDGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TASKBRIDGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKBRIDGE_CACHE_URL") {
            self.cache.url = value;
        }
        if let Some(value) = read_env("TASKBRIDGE_CACHE_STAGING_TTL_SECS") {
            self.cache.staging_ttl_secs = parse_u64("TASKBRIDGE_CACHE_STAGING_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKBRIDGE_PLATFORM_BASE_URL") {
            self.platform.base_url = value;
        }
        if let Some(value) = read_env("TASKBRIDGE_PLATFORM_API_KEY") {
            self.platform.api_key = secret_value(value);
        }
        if let Some(value) = read_env("TASKBRIDGE_PLATFORM_TIMEOUT_SECS") {
            self.platform.timeout_secs = parse_u64("TASKBRIDGE_PLATFORM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TASKBRIDGE_PLATFORM_MAX_RETRIES") {
            self.platform.max_retries = parse_u32("TASKBRIDGE_PLATFORM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TASKBRIDGE_DISCORD_BOT_TOKEN") {
            self.discord.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("TASKBRIDGE_DISCORD_APP_ID") {
            self.discord.app_id = value;
        }

        if let Some(value) = read_env("TASKBRIDGE_WEB_URL") {
            self.urls.web = value;
        }
        if let Some(value) = read_env("TASKBRIDGE_SUPPORT_URL") {
            self.urls.support = value;
        }
        if let Some(value) = read_env("TASKBRIDGE_STATUS_URL") {
            self.urls.status = value;
        }
        if let Some(value) = read_env("TASKBRIDGE_HELP_CHAT_URL") {
            self.urls.help_chat = value;
        }

        if let Some(value) = read_env("TASKBRIDGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TASKBRIDGE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("TASKBRIDGE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        if let Some(value) = read_env("TASKBRIDGE_TOKEN_SEAL_KEY") {
            self.security.token_seal_key = secret_value(value);
        }
        if let Some(value) = read_env("TASKBRIDGE_ACCOUNT_AGE_FLOOR_DAYS") {
            self.security.account_age_floor_days = parse_u64("TASKBRIDGE_ACCOUNT_AGE_FLOOR_DAYS", &value)? as i64;
        }

        let log_level =
            read_env("TASKBRIDGE_LOGGING_LEVEL").or_else(|| read_env("TASKBRIDGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TASKBRIDGE_LOGGING_FORMAT").or_else(|| read_env("TASKBRIDGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(cache_url) = overrides.cache_url {
            self.cache.url = cache_url;
        }
        if let Some(base_url) = overrides.platform_base_url {
            self.platform.base_url = base_url;
        }
        if let Some(api_key) = overrides.platform_api_key {
            self.platform.api_key = secret_value(api_key);
        }
        if let Some(bot_token) = overrides.discord_bot_token {
            self.discord.bot_token = secret_value(bot_token);
        }
        if let Some(app_id) = overrides.discord_app_id {
            self.discord.app_id = app_id;
        }
        if let Some(seal_key) = overrides.token_seal_key {
            self.security.token_seal_key = secret_value(seal_key);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation("database.max_connections must be positive".into()));
        }
        if self.cache.url.trim().is_empty() {
            return Err(ConfigError::Validation("cache.url must not be empty".into()));
        }
        if self.platform.base_url.trim().is_empty() {
            return Err(ConfigError::Validation("platform.base_url must not be empty".into()));
        }
        if self.platform.api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation("platform.api_key must not be empty".into()));
        }
        if self.discord.bot_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation("discord.bot_token must not be empty".into()));
        }
        if self.discord.app_id.trim().is_empty() {
            return Err(ConfigError::Validation("discord.app_id must not be empty".into()));
        }
        let seal_key = self.security.token_seal_key.expose_secret();
        if seal_key.trim().len() != 64 {
            return Err(ConfigError::Validation(
                "security.token_seal_key must be 64 hex characters".into(),
            ));
        }
        if self.security.account_age_floor_days < 0 {
            return Err(ConfigError::Validation(
                "security.account_age_floor_days must not be negative".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("taskbridge.toml"), PathBuf::from("config/taskbridge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(inner) => key.push(inner),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
        } else {
            output.push(ch);
        }
    }

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}
