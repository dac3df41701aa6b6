use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use colloquy_core::domain::message::{Message, Role};
use colloquy_core::domain::session::{Session, SessionId, SessionKey};
use colloquy_core::domain::turn::CachedTurn;

pub mod conversation;
pub mod memory;
pub mod turn_cache;

pub use conversation::SqlConversationStore;
pub use memory::{InMemoryConversationStore, InMemoryTurnCache};
pub use turn_cache::SqlTurnCache;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session {0:?} does not exist or has been deleted")]
    MissingSession(SessionId),
}

/// Durable storage for sessions and their ordered messages.
///
/// Soft-deleted rows are invisible to every read. Implementations must be
/// safe to share between concurrently running turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_session(&self, title: &str) -> Result<Session, RepositoryError>;

    async fn find_session_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError>;

    /// Most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<Session>, RepositoryError>;

    /// Ascending creation time.
    async fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>, RepositoryError>;

    /// Appends one message and bumps the session's `updated_at`.
    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: &str,
    ) -> Result<Message, RepositoryError>;

    /// Appends a completed turn (user message, then assistant message) as a
    /// single unit: either both rows are written or neither is.
    async fn append_exchange(
        &self,
        session_id: SessionId,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<(Message, Message), RepositoryError>;

    /// Returns `false` when no live session has this key.
    async fn soft_delete_session(&self, key: &SessionKey) -> Result<bool, RepositoryError>;
}

/// Short-lived record of the latest exchange per session.
#[async_trait]
pub trait TurnCache: Send + Sync {
    /// Overwrites any previous value stored under `key`.
    async fn set(&self, key: &str, turn: &CachedTurn, ttl: Duration)
        -> Result<(), RepositoryError>;

    async fn get(&self, key: &str) -> Result<Option<CachedTurn>, RepositoryError>;
}

/// Fixed-width RFC 3339 so lexical order in SQLite matches time order.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{value}`: {e}")))
}
