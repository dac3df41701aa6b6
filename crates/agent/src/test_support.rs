use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use colloquy_core::domain::message::{Message, Role};
use colloquy_core::domain::session::{Session, SessionId, SessionKey};
use colloquy_core::domain::turn::CachedTurn;
use colloquy_db::repositories::{
    ConversationStore, InMemoryConversationStore, RepositoryError, TurnCache,
};

use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// Answers classifier calls (temperature 0) and reply calls from separate scripts.
#[derive(Default)]
pub struct ScriptedLlm {
    pub intent: Mutex<Option<Result<String, String>>>,
    pub replies: Mutex<VecDeque<Result<Vec<String>, String>>>,
    pub reply_requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(intent: Result<&str, &str>, replies: Vec<Result<Vec<String>, String>>) -> Self {
        Self {
            intent: Mutex::new(Some(intent.map(str::to_string).map_err(str::to_string))),
            replies: Mutex::new(replies.into()),
            reply_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(intent: &str, reply: &str) -> Self {
        Self::new(Ok(intent), vec![Ok(vec![reply.to_string()])])
    }

    pub fn last_reply_request(&self) -> Option<CompletionRequest> {
        self.reply_requests.lock().expect("lock").last().cloned()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete_chat(&self, request: &CompletionRequest) -> Result<Vec<String>, LlmError> {
        if request.temperature == 0.0 {
            let intent = self.intent.lock().expect("lock").clone();
            return match intent {
                Some(Ok(label)) => Ok(vec![label]),
                Some(Err(message)) => Err(LlmError::Transport(message)),
                None => Ok(Vec::new()),
            };
        }

        self.reply_requests.lock().expect("lock").push(request.clone());
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
            .map_err(LlmError::Transport)
    }
}

pub struct FailingCache;

#[async_trait]
impl TurnCache for FailingCache {
    async fn set(&self, _: &str, _: &CachedTurn, _: Duration) -> Result<(), RepositoryError> {
        Err(RepositoryError::Decode("cache offline".to_string()))
    }

    async fn get(&self, _: &str) -> Result<Option<CachedTurn>, RepositoryError> {
        Err(RepositoryError::Decode("cache offline".to_string()))
    }
}

/// Reads succeed, but every write of a completed turn fails.
#[derive(Default)]
pub struct ReadOnlyStore {
    pub inner: InMemoryConversationStore,
}

#[async_trait]
impl ConversationStore for ReadOnlyStore {
    async fn create_session(&self, title: &str) -> Result<Session, RepositoryError> {
        self.inner.create_session(title).await
    }

    async fn find_session_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        self.inner.find_session_by_key(key).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        self.inner.list_sessions().await
    }

    async fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>, RepositoryError> {
        self.inner.load_messages(session_id).await
    }

    async fn append_message(
        &self,
        _: SessionId,
        _: Role,
        _: &str,
    ) -> Result<Message, RepositoryError> {
        Err(disk_full())
    }

    async fn append_exchange(
        &self,
        _: SessionId,
        _: &str,
        _: &str,
    ) -> Result<(Message, Message), RepositoryError> {
        Err(disk_full())
    }

    async fn soft_delete_session(&self, key: &SessionKey) -> Result<bool, RepositoryError> {
        self.inner.soft_delete_session(key).await
    }
}

fn disk_full() -> RepositoryError {
    RepositoryError::Decode("database or disk is full".to_string())
}
