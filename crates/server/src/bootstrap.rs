use std::sync::Arc;

use colloquy_agent::{ChatService, LlmError};
use colloquy_core::config::{AppConfig, CacheBackend, ConfigError};
use colloquy_db::repositories::{
    ConversationStore, InMemoryTurnCache, SqlConversationStore, SqlTurnCache, TurnCache,
};
use colloquy_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub chat: Arc<ChatService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model backend client could not be built: {0}")]
    Backend(#[from] LlmError),
}

#[cfg(test)]
pub async fn bootstrap(
    options: colloquy_core::config::LoadOptions,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store: Arc<dyn ConversationStore> = Arc::new(SqlConversationStore::new(db_pool.clone()));
    let cache: Arc<dyn TurnCache> = match config.chat.cache_backend {
        CacheBackend::Memory => Arc::new(InMemoryTurnCache::default()),
        CacheBackend::Sqlite => {
            let cache = SqlTurnCache::new(db_pool.clone());
            match cache.purge_expired().await {
                Ok(purged) => info!(
                    event_name = "system.bootstrap.cache_purged",
                    correlation_id = "bootstrap",
                    purged,
                    "expired turn cache rows removed"
                ),
                Err(error) => warn!(
                    event_name = "system.bootstrap.cache_purge_failed",
                    correlation_id = "bootstrap",
                    error = %error,
                    "could not purge expired turn cache rows"
                ),
            }
            Arc::new(cache)
        }
    };
    let chat = Arc::new(ChatService::from_config(&config, store, cache)?);

    info!(
        event_name = "system.bootstrap.chat_ready",
        correlation_id = "bootstrap",
        reply_path = chat.reply_path().as_str(),
        cache_backend = ?config.chat.cache_backend,
        "chat service wired"
    );

    Ok(Application { config, db_pool, chat })
}
