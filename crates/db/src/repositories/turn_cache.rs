use std::time::Duration;

use chrono::Utc;

use colloquy_core::domain::turn::CachedTurn;

use super::{RepositoryError, TurnCache};
use crate::DbPool;

/// SQLite-backed turn cache for deployments without a dedicated cache server.
pub struct SqlTurnCache {
    pool: DbPool,
}

impl SqlTurnCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Drops expired rows, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM turn_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl TurnCache for SqlTurnCache {
    async fn set(
        &self,
        key: &str,
        turn: &CachedTurn,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        let payload =
            serde_json::to_string(turn).map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_millis);

        sqlx::query(
            "INSERT INTO turn_cache (cache_key, payload, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(cache_key) DO UPDATE SET
                 payload = excluded.payload,
                 expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CachedTurn>, RepositoryError> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM turn_cache WHERE cache_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        payload
            .map(|raw| {
                serde_json::from_str::<CachedTurn>(&raw)
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .transpose()
    }
}
