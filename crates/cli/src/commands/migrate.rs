use colloquy_core::config::{AppConfig, LoadOptions};
use colloquy_db::{connect_with_settings, migrations};

use crate::commands::{CommandResult, ErrorClass};

const COMMAND: &str = "migrate";

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                ErrorClass::ConfigValidation,
                format!("configuration issue: {error}"),
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                ErrorClass::RuntimeInit,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let outcome = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| (ErrorClass::DbConnectivity, error.to_string()))?;

        let before = migrations::applied_count(&pool).await.unwrap_or(0);
        migrations::run_pending(&pool)
            .await
            .map_err(|error| (ErrorClass::Migration, error.to_string()))?;
        let after = migrations::applied_count(&pool)
            .await
            .map_err(|error| (ErrorClass::Migration, error.to_string()))?;
        pool.close().await;

        Ok::<(i64, i64), (ErrorClass, String)>((after - before, after))
    });

    match outcome {
        Ok((newly_applied, total)) => CommandResult::success(
            COMMAND,
            format!(
                "applied {newly_applied} pending migration(s); {total} recorded in `{}`",
                config.database.url
            ),
        ),
        Err((error_class, message)) => CommandResult::failure(COMMAND, error_class, message),
    }
}
