use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use taskbridge_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "TASKBRIDGE_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "TASKBRIDGE_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "TASKBRIDGE_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line("cache.url", &config.cache.url, source("cache.url", "TASKBRIDGE_CACHE_URL")));
    lines.push(render_line(
        "cache.staging_ttl_secs",
        &config.cache.staging_ttl_secs.to_string(),
        source("cache.staging_ttl_secs", "TASKBRIDGE_CACHE_STAGING_TTL_SECS"),
    ));

    lines.push(render_line(
        "platform.base_url",
        &config.platform.base_url,
        source("platform.base_url", "TASKBRIDGE_PLATFORM_BASE_URL"),
    ));
    lines.push(render_line(
        "platform.api_key",
        &redact_secret(config.platform.api_key.expose_secret()),
        source("platform.api_key", "TASKBRIDGE_PLATFORM_API_KEY"),
    ));
    lines.push(render_line(
        "platform.timeout_secs",
        &config.platform.timeout_secs.to_string(),
        source("platform.timeout_secs", "TASKBRIDGE_PLATFORM_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "platform.max_retries",
        &config.platform.max_retries.to_string(),
        source("platform.max_retries", "TASKBRIDGE_PLATFORM_MAX_RETRIES"),
    ));

    lines.push(render_line(
        "discord.bot_token",
        &redact_secret(config.discord.bot_token.expose_secret()),
        source("discord.bot_token", "TASKBRIDGE_DISCORD_BOT_TOKEN"),
    ));
    lines.push(render_line(
        "discord.app_id",
        &config.discord.app_id,
        source("discord.app_id", "TASKBRIDGE_DISCORD_APP_ID"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "TASKBRIDGE_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
        source("server.health_check_port", "TASKBRIDGE_SERVER_HEALTH_CHECK_PORT"),
    ));

    lines.push(render_line(
        "security.token_seal_key",
        &redact_secret(config.security.token_seal_key.expose_secret()),
        source("security.token_seal_key", "TASKBRIDGE_TOKEN_SEAL_KEY"),
    ));
    lines.push(render_line(
        "security.account_age_floor_days",
        &config.security.account_age_floor_days.to_string(),
        source("security.account_age_floor_days", "TASKBRIDGE_ACCOUNT_AGE_FLOOR_DAYS"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "TASKBRIDGE_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "TASKBRIDGE_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("taskbridge.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/taskbridge.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        return "<empty>".to_string();
    }

    "<redacted>".to_string()
}
