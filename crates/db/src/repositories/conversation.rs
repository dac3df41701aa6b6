use chrono::Utc;
use sqlx::{Row, SqliteConnection};

use colloquy_core::domain::message::{Message, MessageId, Role};
use colloquy_core::domain::session::{Session, SessionId, SessionKey};

use super::{decode_timestamp, encode_timestamp, ConversationStore, RepositoryError};
use crate::DbPool;

pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let key: String =
        row.try_get("session_key").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let title: String = row.try_get("title").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Session {
        id: SessionId(id),
        key: SessionKey(key),
        title,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let session_id: i64 =
        row.try_get("session_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let role: String = row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let content: String =
        row.try_get("content").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Message {
        id: MessageId(id),
        session_id: SessionId(session_id),
        role: role.parse().map_err(|e: colloquy_core::DomainError| {
            RepositoryError::Decode(e.to_string())
        })?,
        content,
        created_at: decode_timestamp(&created_at)?,
    })
}

async fn touch_session(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    updated_at: &str,
) -> Result<(), RepositoryError> {
    let result =
        sqlx::query("UPDATE chat_session SET updated_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(updated_at)
            .bind(session_id.0)
            .execute(&mut *conn)
            .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::MissingSession(session_id));
    }
    Ok(())
}

async fn insert_message(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    role: Role,
    content: &str,
) -> Result<Message, RepositoryError> {
    let created_at = Utc::now();
    let result = sqlx::query(
        "INSERT INTO chat_message (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(session_id.0)
    .bind(role.as_str())
    .bind(content)
    .bind(encode_timestamp(&created_at))
    .execute(&mut *conn)
    .await?;

    Ok(Message {
        id: MessageId(result.last_insert_rowid()),
        session_id,
        role,
        content: content.to_string(),
        created_at: decode_timestamp(&encode_timestamp(&created_at))?,
    })
}

#[async_trait::async_trait]
impl ConversationStore for SqlConversationStore {
    async fn create_session(&self, title: &str) -> Result<Session, RepositoryError> {
        let key = SessionKey::generate();
        let now = encode_timestamp(&Utc::now());

        let result = sqlx::query(
            "INSERT INTO chat_session (session_key, title, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(key.as_str())
        .bind(title)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let timestamp = decode_timestamp(&now)?;
        Ok(Session {
            id: SessionId(result.last_insert_rowid()),
            key,
            title: title.to_string(),
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    async fn find_session_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, session_key, title, created_at, updated_at
             FROM chat_session WHERE session_key = ? AND deleted_at IS NULL",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, session_key, title, created_at, updated_at
             FROM chat_session
             WHERE deleted_at IS NULL
             ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect::<Result<Vec<_>, _>>()
    }

    async fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, session_id, role, content, created_at
             FROM chat_message
             WHERE session_id = ? AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: &str,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let message = insert_message(&mut *tx, session_id, role, content).await?;
        touch_session(&mut *tx, session_id, &encode_timestamp(&message.created_at)).await?;
        tx.commit().await?;
        Ok(message)
    }

    async fn append_exchange(
        &self,
        session_id: SessionId,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<(Message, Message), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let user = insert_message(&mut *tx, session_id, Role::User, user_content).await?;
        let assistant =
            insert_message(&mut *tx, session_id, Role::Assistant, assistant_content).await?;
        touch_session(&mut *tx, session_id, &encode_timestamp(&assistant.created_at)).await?;
        tx.commit().await?;
        Ok((user, assistant))
    }

    async fn soft_delete_session(&self, key: &SessionKey) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let session_id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM chat_session WHERE session_key = ? AND deleted_at IS NULL",
        )
        .bind(key.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(session_id) = session_id else {
            return Ok(false);
        };

        let now = encode_timestamp(&Utc::now());
        sqlx::query("UPDATE chat_session SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE chat_message SET deleted_at = ? WHERE session_id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use colloquy_core::domain::message::Role;
    use colloquy_core::domain::session::{SessionId, SessionKey};

    use super::SqlConversationStore;
    use crate::repositories::{ConversationStore, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlConversationStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlConversationStore::new(pool)
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    #[tokio::test]
    async fn created_session_is_found_by_key_with_empty_history() {
        let store = store().await;
        let session = store.create_session("Demo").await.expect("create session");

        assert!(!session.key.as_str().is_empty());
        assert_eq!(session.created_at, session.updated_at);

        let found = store.find_session_by_key(&session.key).await.expect("find session");
        assert_eq!(found, Some(session.clone()));

        let messages = store.load_messages(session.id).await.expect("load messages");
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let store = store().await;
        let found = store.find_session_by_key(&SessionKey::from("missing")).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn list_sessions_orders_by_most_recent_update() {
        let store = store().await;
        let first = store.create_session("first").await.expect("create first");
        tick().await;
        let second = store.create_session("second").await.expect("create second");
        tick().await;

        let listed = store.list_sessions().await.expect("list");
        assert_eq!(
            listed.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(),
            ["second", "first"]
        );

        store.append_message(first.id, Role::User, "bump").await.expect("append");
        let listed = store.list_sessions().await.expect("list after append");
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert!(listed[0].updated_at > listed[1].updated_at);
    }

    #[tokio::test]
    async fn messages_load_in_ascending_time_order() {
        let store = store().await;
        let session = store.create_session("ordering").await.expect("create");

        for index in 0..5 {
            let role = if index % 2 == 0 { Role::User } else { Role::Assistant };
            store.append_message(session.id, role, &format!("m{index}")).await.expect("append");
        }

        let messages = store.load_messages(session.id).await.expect("load");
        let contents = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, ["m0", "m1", "m2", "m3", "m4"]);
        assert!(messages.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
    }

    #[tokio::test]
    async fn append_exchange_writes_user_then_assistant() {
        let store = store().await;
        let session = store.create_session("exchange").await.expect("create");

        let (user, assistant) =
            store.append_exchange(session.id, "hello", "hi there").await.expect("exchange");
        assert_eq!(user.role, Role::User);
        assert_eq!(assistant.role, Role::Assistant);
        assert!(user.id < assistant.id);

        let messages = store.load_messages(session.id).await.expect("load");
        assert_eq!(messages, vec![user, assistant]);
    }

    #[tokio::test]
    async fn append_exchange_to_missing_session_writes_nothing() {
        let store = store().await;
        let session = store.create_session("real").await.expect("create");

        let error = store
            .append_exchange(SessionId(session.id.0 + 100), "hello", "hi")
            .await
            .expect_err("missing session should fail");
        assert!(matches!(error, RepositoryError::Database(_) | RepositoryError::MissingSession(_)));

        let orphaned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_message")
            .fetch_one(&store.pool)
            .await
            .expect("count messages");
        assert_eq!(orphaned, 0, "a failed exchange must not leave a message behind");
    }

    #[tokio::test]
    async fn soft_deleted_sessions_disappear_from_reads() {
        let store = store().await;
        let kept = store.create_session("kept").await.expect("create kept");
        let dropped = store.create_session("dropped").await.expect("create dropped");
        store.append_exchange(dropped.id, "q", "a").await.expect("exchange");

        assert!(store.soft_delete_session(&dropped.key).await.expect("delete"));
        assert!(!store.soft_delete_session(&dropped.key).await.expect("second delete"));

        assert!(store.find_session_by_key(&dropped.key).await.expect("find").is_none());
        assert!(store.load_messages(dropped.id).await.expect("load").is_empty());
        let listed = store.list_sessions().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);

        let error = store
            .append_message(dropped.id, Role::User, "late")
            .await
            .expect_err("appending to deleted session should fail");
        assert!(matches!(error, RepositoryError::MissingSession(_)));
    }
}
