use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;

use colloquy_core::domain::message::{Message, MessageId, Role};
use colloquy_core::domain::session::{Session, SessionId, SessionKey};
use colloquy_core::domain::turn::CachedTurn;

use super::{ConversationStore, RepositoryError, TurnCache};

#[derive(Clone, Debug)]
struct StoredSession {
    session: Session,
    deleted: bool,
}

#[derive(Clone, Debug)]
struct StoredMessage {
    message: Message,
    deleted: bool,
}

#[derive(Default)]
struct ConversationState {
    sessions: Vec<StoredSession>,
    messages: Vec<StoredMessage>,
    next_session_id: i64,
    next_message_id: i64,
}

impl ConversationState {
    fn live_session_mut(&mut self, session_id: SessionId) -> Option<&mut StoredSession> {
        self.sessions.iter_mut().find(|stored| stored.session.id == session_id && !stored.deleted)
    }

    fn push_message(&mut self, session_id: SessionId, role: Role, content: &str) -> Message {
        self.next_message_id += 1;
        let message = Message {
            id: MessageId(self.next_message_id),
            session_id,
            role,
            content: content.to_string(),
            created_at: now(),
        };
        self.messages.push(StoredMessage { message: message.clone(), deleted: false });
        message
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Process-local conversation store. Used by tests and by embedders that do
/// not need durability.
#[derive(Default)]
pub struct InMemoryConversationStore {
    state: RwLock<ConversationState>,
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_session(&self, title: &str) -> Result<Session, RepositoryError> {
        let mut state = self.state.write().await;
        state.next_session_id += 1;
        let created_at = now();
        let session = Session {
            id: SessionId(state.next_session_id),
            key: SessionKey::generate(),
            title: title.to_string(),
            created_at,
            updated_at: created_at,
        };
        state.sessions.push(StoredSession { session: session.clone(), deleted: false });
        Ok(session)
    }

    async fn find_session_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .iter()
            .find(|stored| &stored.session.key == key && !stored.deleted)
            .map(|stored| stored.session.clone()))
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        let state = self.state.read().await;
        let mut sessions = state
            .sessions
            .iter()
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.session.clone())
            .collect::<Vec<_>>();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let mut messages = state
            .messages
            .iter()
            .filter(|stored| stored.message.session_id == session_id && !stored.deleted)
            .map(|stored| stored.message.clone())
            .collect::<Vec<_>>();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: &str,
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        if state.live_session_mut(session_id).is_none() {
            return Err(RepositoryError::MissingSession(session_id));
        }

        let message = state.push_message(session_id, role, content);
        if let Some(stored) = state.live_session_mut(session_id) {
            stored.session.updated_at = message.created_at;
        }
        Ok(message)
    }

    async fn append_exchange(
        &self,
        session_id: SessionId,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<(Message, Message), RepositoryError> {
        let mut state = self.state.write().await;
        if state.live_session_mut(session_id).is_none() {
            return Err(RepositoryError::MissingSession(session_id));
        }

        let user = state.push_message(session_id, Role::User, user_content);
        let assistant = state.push_message(session_id, Role::Assistant, assistant_content);
        if let Some(stored) = state.live_session_mut(session_id) {
            stored.session.updated_at = assistant.created_at;
        }
        Ok((user, assistant))
    }

    async fn soft_delete_session(&self, key: &SessionKey) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(stored) =
            state.sessions.iter_mut().find(|stored| &stored.session.key == key && !stored.deleted)
        else {
            return Ok(false);
        };

        stored.deleted = true;
        stored.session.updated_at = now();
        let session_id = stored.session.id;
        for message in state.messages.iter_mut().filter(|m| m.message.session_id == session_id) {
            message.deleted = true;
        }
        Ok(true)
    }
}

/// TTL cache kept in process memory; entries expire lazily on read.
#[derive(Default)]
pub struct InMemoryTurnCache {
    entries: RwLock<HashMap<String, (CachedTurn, Instant)>>,
}

impl InMemoryTurnCache {
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|(_, expires)| *expires > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl TurnCache for InMemoryTurnCache {
    async fn set(
        &self,
        key: &str,
        turn: &CachedTurn,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(86_400 * 365));
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (turn.clone(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CachedTurn>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(turn, _)| turn.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use colloquy_core::domain::message::Role;
    use colloquy_core::domain::session::SessionId;
    use colloquy_core::domain::turn::CachedTurn;

    use crate::repositories::{
        ConversationStore, InMemoryConversationStore, InMemoryTurnCache, RepositoryError,
        TurnCache,
    };

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemoryConversationStore::default();
        let session = store.create_session("Demo").await.expect("create");

        let (user, assistant) =
            store.append_exchange(session.id, "hello", "hi").await.expect("exchange");
        let messages = store.load_messages(session.id).await.expect("load");

        assert_eq!(messages, vec![user, assistant]);
        let found = store.find_session_by_key(&session.key).await.expect("find").expect("found");
        assert!(found.updated_at >= session.updated_at);
    }

    #[tokio::test]
    async fn in_memory_store_lists_most_recently_updated_first() {
        let store = InMemoryConversationStore::default();
        let first = store.create_session("first").await.expect("create first");
        let second = store.create_session("second").await.expect("create second");
        tokio::time::sleep(Duration::from_millis(2)).await;

        store.append_message(first.id, Role::User, "bump").await.expect("append");
        let listed = store.list_sessions().await.expect("list");

        assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn in_memory_store_rejects_unknown_session() {
        let store = InMemoryConversationStore::default();
        let error = store
            .append_exchange(SessionId(42), "hello", "hi")
            .await
            .expect_err("unknown session");
        assert!(matches!(error, RepositoryError::MissingSession(SessionId(42))));
    }

    #[tokio::test]
    async fn in_memory_store_soft_delete_hides_session_and_messages() {
        let store = InMemoryConversationStore::default();
        let session = store.create_session("gone").await.expect("create");
        store.append_exchange(session.id, "q", "a").await.expect("exchange");

        assert!(store.soft_delete_session(&session.key).await.expect("delete"));
        assert!(store.find_session_by_key(&session.key).await.expect("find").is_none());
        assert!(store.load_messages(session.id).await.expect("load").is_empty());
        assert!(store.list_sessions().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn in_memory_cache_expires_entries() {
        let cache = InMemoryTurnCache::default();
        cache
            .set("chat:a:latest", &CachedTurn::new("hi", "hello"), Duration::from_millis(5))
            .await
            .expect("set short");
        cache
            .set("chat:b:latest", &CachedTurn::new("hi", "hello"), Duration::from_secs(60))
            .await
            .expect("set long");

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.get("chat:a:latest").await.expect("get a").is_none());
        assert!(cache.get("chat:b:latest").await.expect("get b").is_some());
        assert_eq!(cache.len().await, 1);
    }
}
