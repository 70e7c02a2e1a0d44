use crate::commands::CommandResult;
use secrecy::ExposeSecret;
use taskbridge_core::config::{AppConfig, LoadOptions};
use taskbridge_core::seal::TokenSealer;
use taskbridge_db::connect_with_settings;

/// Startup preflight. Exercises the same dependencies bootstrap does, without
/// opening the gateway or mutating the database.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "start",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    if let Err(error) = TokenSealer::from_hex_key(config.security.token_seal_key.expose_secret()) {
        return CommandResult::failure(
            "start",
            "seal_key",
            format!("token seal key rejected: {error}"),
            2,
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "start",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success("start", "preflight checks passed"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("start", error_class, message, exit_code)
        }
    }
}
