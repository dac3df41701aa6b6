use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use colloquy_core::config::AppConfig;
use colloquy_core::domain::message::Message;
use colloquy_core::domain::session::{Session, SessionHistory, SessionKey};
use colloquy_core::domain::turn::CachedTurn;
use colloquy_core::errors::ChatError;
use colloquy_db::repositories::{ConversationStore, TurnCache};

use crate::context::ContextBuilder;
use crate::intent::IntentClassifier;
use crate::invoker::ModelInvoker;
use crate::llm::{LlmClient, LlmError, OpenAiCompatibleClient};
use crate::orchestrator::{store_error, ReplyPath, TurnOrchestrator, TurnReport};

/// Session and turn operations exposed to the HTTP layer.
pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn TurnCache>,
    orchestrator: TurnOrchestrator,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn TurnCache>,
        orchestrator: TurnOrchestrator,
    ) -> Self {
        Self { store, cache, orchestrator }
    }

    /// Wires the reqwest backend when `llm` is configured; otherwise every
    /// turn is answered offline.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn TurnCache>,
    ) -> Result<Self, LlmError> {
        let client = if config.llm.is_configured() {
            let client: Arc<dyn LlmClient> =
                Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
            Some(client)
        } else {
            None
        };
        Ok(Self::with_client(config, store, cache, client))
    }

    pub fn with_client(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn TurnCache>,
        client: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        let context = ContextBuilder::new(config.chat.persona.clone(), config.chat.history_window);
        let mut orchestrator = TurnOrchestrator::new(
            store.clone(),
            cache.clone(),
            context,
            Duration::from_secs(config.chat.cache_ttl_secs),
        );
        if let Some(client) = client {
            let classifier = IntentClassifier::new(
                client.clone(),
                Duration::from_secs(config.llm.classifier_timeout_secs),
                config.llm.classifier_max_tokens,
            );
            orchestrator =
                orchestrator.with_model(classifier, ModelInvoker::from_config(client, &config.llm));
        }

        info!(
            event_name = "chat.service.ready",
            path = orchestrator.reply_path().as_str(),
            "chat service initialised"
        );
        Self::new(store, cache, orchestrator)
    }

    pub fn reply_path(&self) -> ReplyPath {
        self.orchestrator.reply_path()
    }

    pub async fn create_session(&self, title: &str) -> Result<Session, ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::InvalidInput("title must not be empty".to_string()));
        }
        let session = self.store.create_session(title).await.map_err(store_error)?;
        info!(event_name = "chat.session.created", session_key = %session.key, "session created");
        Ok(session)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, ChatError> {
        self.store.list_sessions().await.map_err(store_error)
    }

    pub async fn get_history(&self, key: &SessionKey) -> Result<SessionHistory, ChatError> {
        let session = self
            .store
            .find_session_by_key(key)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ChatError::SessionNotFound(key.to_string()))?;
        let messages = self.store.load_messages(session.id).await.map_err(store_error)?;
        Ok(SessionHistory { session, messages })
    }

    /// Returns the assistant message of the completed turn.
    pub async fn send_turn(&self, key: &SessionKey, utterance: &str) -> Result<Message, ChatError> {
        self.run_turn(key, utterance).await.map(|report| report.reply)
    }

    pub async fn run_turn(
        &self,
        key: &SessionKey,
        utterance: &str,
    ) -> Result<TurnReport, ChatError> {
        self.orchestrator.run_turn(key, utterance).await
    }

    pub async fn delete_session(&self, key: &SessionKey) -> Result<(), ChatError> {
        if self.store.soft_delete_session(key).await.map_err(store_error)? {
            info!(event_name = "chat.session.deleted", session_key = %key, "session soft-deleted");
            Ok(())
        } else {
            Err(ChatError::SessionNotFound(key.to_string()))
        }
    }

    /// Latest cached exchange, if it has not expired.
    pub async fn latest_turn(&self, key: &SessionKey) -> Result<Option<CachedTurn>, ChatError> {
        self.cache.get(&key.cache_key()).await.map_err(store_error)
    }
}
