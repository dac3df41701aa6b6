use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use colloquy_core::domain::message::Message;
use colloquy_core::domain::session::{Session, SessionKey};
use colloquy_core::domain::turn::{CachedTurn, IntentLabel};
use colloquy_core::errors::ChatError;
use colloquy_db::repositories::{ConversationStore, RepositoryError, TurnCache};

use crate::context::ContextBuilder;
use crate::fallback::FallbackResponder;
use crate::intent::IntentClassifier;
use crate::invoker::ModelInvoker;
use crate::locks::SessionLocks;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Start,
    ClassifyIntent,
    BuildContext,
    ModelPath,
    FallbackPath,
    PersistOnSuccess,
    CacheWrite,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPath {
    Model,
    Fallback,
}

impl ReplyPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    pub reply: Message,
    pub user_message: Message,
    pub intent: IntentLabel,
    pub path: ReplyPath,
    pub trace: Vec<TurnState>,
}

/// Backend pieces that only exist when a model credential is configured.
struct ModelBackend {
    classifier: IntentClassifier,
    invoker: ModelInvoker,
}

pub struct TurnOrchestrator {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn TurnCache>,
    context: ContextBuilder,
    fallback: FallbackResponder,
    backend: Option<ModelBackend>,
    locks: SessionLocks,
    cache_ttl: Duration,
}

impl TurnOrchestrator {
    /// Without a model backend every turn takes the fallback path.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn TurnCache>,
        context: ContextBuilder,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            context,
            fallback: FallbackResponder::new(),
            backend: None,
            locks: SessionLocks::new(),
            cache_ttl,
        }
    }

    pub fn with_model(mut self, classifier: IntentClassifier, invoker: ModelInvoker) -> Self {
        self.backend = Some(ModelBackend { classifier, invoker });
        self
    }

    pub fn reply_path(&self) -> ReplyPath {
        if self.backend.is_some() {
            ReplyPath::Model
        } else {
            ReplyPath::Fallback
        }
    }

    pub async fn run_turn(
        &self,
        session_key: &SessionKey,
        utterance: &str,
    ) -> Result<TurnReport, ChatError> {
        if utterance.trim().is_empty() {
            return Err(ChatError::InvalidInput("message must not be empty".to_string()));
        }

        let correlation_id = Uuid::new_v4().to_string();
        let mut trace = vec![TurnState::Start];
        info!(
            event_name = "chat.turn.started",
            correlation_id = %correlation_id,
            session_key = %session_key,
            path = self.reply_path().as_str(),
            "turn started"
        );
        debug!(correlation_id = %correlation_id, utterance, "turn utterance");

        trace.push(TurnState::ClassifyIntent);
        let (intent, classified) = match &self.backend {
            Some(backend) => backend.classifier.classify(utterance).await,
            None => (IntentLabel::unknown(), false),
        };
        info!(
            event_name = "chat.intent.classified",
            correlation_id = %correlation_id,
            intent = %intent,
            classified,
            "intent resolved"
        );

        let session = match self.find_session(session_key).await {
            Ok(session) => session,
            Err(error) => return Err(self.fail(&correlation_id, &mut trace, error)),
        };

        let (reply, path) = match &self.backend {
            Some(backend) => {
                trace.push(TurnState::BuildContext);
                let history = match self.store.load_messages(session.id).await {
                    Ok(history) => history,
                    Err(error) => {
                        return Err(self.fail(&correlation_id, &mut trace, store_error(error)))
                    }
                };
                let prompt = self.context.build(&session, &history, utterance, &intent);

                trace.push(TurnState::ModelPath);
                match backend.invoker.invoke(prompt).await {
                    Ok(reply) => (reply, ReplyPath::Model),
                    Err(failure) => {
                        return Err(self.fail(&correlation_id, &mut trace, failure.into()))
                    }
                }
            }
            None => {
                trace.push(TurnState::FallbackPath);
                (self.fallback.respond(utterance), ReplyPath::Fallback)
            }
        };

        trace.push(TurnState::PersistOnSuccess);
        let _guard = self.locks.acquire(session.id).await;
        let (user_message, reply_message) =
            match self.store.append_exchange(session.id, utterance, &reply).await {
                Ok(pair) => pair,
                Err(RepositoryError::MissingSession(_)) => {
                    let error = ChatError::SessionNotFound(session_key.to_string());
                    return Err(self.fail(&correlation_id, &mut trace, error));
                }
                Err(error) => {
                    return Err(self.fail(&correlation_id, &mut trace, store_error(error)));
                }
            };

        trace.push(TurnState::CacheWrite);
        let cached = CachedTurn::new(utterance, &reply);
        if let Err(error) =
            self.cache.set(&session.key.cache_key(), &cached, self.cache_ttl).await
        {
            warn!(
                event_name = "chat.cache.write_failed",
                correlation_id = %correlation_id,
                session_key = %session_key,
                error = %error,
                "latest turn was not cached"
            );
        }

        trace.push(TurnState::Done);
        info!(
            event_name = "chat.turn.completed",
            correlation_id = %correlation_id,
            session_key = %session_key,
            path = path.as_str(),
            reply_message_id = reply_message.id.0,
            "turn completed"
        );

        Ok(TurnReport { reply: reply_message, user_message, intent, path, trace })
    }

    async fn find_session(&self, key: &SessionKey) -> Result<Session, ChatError> {
        self.store
            .find_session_by_key(key)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ChatError::SessionNotFound(key.to_string()))
    }

    fn fail(
        &self,
        correlation_id: &str,
        trace: &mut Vec<TurnState>,
        error: ChatError,
    ) -> ChatError {
        let reached = trace.last().copied().unwrap_or(TurnState::Start);
        trace.push(TurnState::Failed);
        warn!(
            event_name = "chat.turn.failed",
            correlation_id,
            reached = ?reached,
            error = %error,
            "turn failed; nothing persisted"
        );
        error
    }
}

pub(crate) fn store_error(error: RepositoryError) -> ChatError {
    ChatError::Store(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use colloquy_core::domain::message::Role;
    use colloquy_core::domain::session::SessionKey;
    use colloquy_core::errors::{ChatError, ModelFailure};
    use colloquy_db::repositories::{
        ConversationStore, InMemoryConversationStore, InMemoryTurnCache, TurnCache,
    };

    use super::{ReplyPath, TurnOrchestrator, TurnState};
    use crate::context::ContextBuilder;
    use crate::intent::IntentClassifier;
    use crate::invoker::ModelInvoker;
    use crate::llm::PromptRole;
    use crate::test_support::{FailingCache, ReadOnlyStore, ScriptedLlm};

    const TTL: Duration = Duration::from_secs(86_400);

    fn fallback_only(
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn TurnCache>,
    ) -> TurnOrchestrator {
        TurnOrchestrator::new(store, cache, ContextBuilder::new("You are helpful.", 10), TTL)
    }

    fn with_model(
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn TurnCache>,
        llm: Arc<ScriptedLlm>,
    ) -> TurnOrchestrator {
        fallback_only(store, cache).with_model(
            IntentClassifier::new(llm.clone(), Duration::from_secs(10), 20),
            ModelInvoker::new(llm, 0.7, 1000, Duration::from_secs(30)),
        )
    }

    #[tokio::test]
    async fn model_turn_persists_exchange_and_caches_it() {
        let store = Arc::new(InMemoryConversationStore::default());
        let cache = Arc::new(InMemoryTurnCache::default());
        let llm = Arc::new(ScriptedLlm::replying("question", "Rust is a language."));
        let orchestrator = with_model(store.clone(), cache.clone(), llm.clone());
        let session = store.create_session("Demo").await.expect("session");

        let report = orchestrator.run_turn(&session.key, "what is rust?").await.expect("turn");

        assert_eq!(report.path, ReplyPath::Model);
        assert_eq!(report.intent.as_str(), "question");
        assert_eq!(report.reply.content, "Rust is a language.");
        assert_eq!(
            report.trace,
            vec![
                TurnState::Start,
                TurnState::ClassifyIntent,
                TurnState::BuildContext,
                TurnState::ModelPath,
                TurnState::PersistOnSuccess,
                TurnState::CacheWrite,
                TurnState::Done,
            ]
        );

        let messages = store.load_messages(session.id).await.expect("messages");
        assert_eq!(
            messages.iter().map(|m| m.role).collect::<Vec<_>>(),
            vec![Role::User, Role::Assistant]
        );

        let cached = cache.get(&session.key.cache_key()).await.expect("get").expect("cached");
        assert_eq!(cached.user_message, "what is rust?");
        assert_eq!(cached.ai_message, "Rust is a language.");

        let request = llm.last_reply_request().expect("reply request");
        assert_eq!(request.turns[0].role, PromptRole::System);
        assert!(request.turns[0].content.contains("question"));
    }

    #[tokio::test]
    async fn model_failure_persists_and_caches_nothing() {
        for reply in [Err("connection reset".to_string()), Ok(vec![])] {
            let store = Arc::new(InMemoryConversationStore::default());
            let cache = Arc::new(InMemoryTurnCache::default());
            let llm = Arc::new(ScriptedLlm::new(Ok("chat"), vec![reply.clone()]));
            let orchestrator = with_model(store.clone(), cache.clone(), llm);
            let session = store.create_session("Demo").await.expect("session");
            store.append_exchange(session.id, "earlier", "answer").await.expect("seed");

            let error = orchestrator.run_turn(&session.key, "hello").await.expect_err("fails");

            match reply {
                Ok(_) => assert_eq!(error, ChatError::Model(ModelFailure::EmptyResponse)),
                Err(_) => assert!(matches!(error, ChatError::Model(ModelFailure::Transport(_)))),
            }
            assert_eq!(store.load_messages(session.id).await.expect("messages").len(), 2);
            assert!(cache.is_empty().await);
        }
    }

    #[tokio::test]
    async fn classification_failure_does_not_stop_the_turn() {
        let store = Arc::new(InMemoryConversationStore::default());
        let llm = Arc::new(ScriptedLlm::new(Err("timeout"), vec![Ok(vec!["fine".to_string()])]));
        let orchestrator =
            with_model(store.clone(), Arc::new(InMemoryTurnCache::default()), llm.clone());
        let session = store.create_session("Demo").await.expect("session");

        let report = orchestrator.run_turn(&session.key, "hello").await.expect("turn");

        assert!(report.intent.is_unknown());
        assert_eq!(report.reply.content, "fine");
        let request = llm.last_reply_request().expect("reply request");
        assert!(request.turns[0].content.ends_with("unknown"));
    }

    #[tokio::test]
    async fn prompt_carries_only_recent_history() {
        let store = Arc::new(InMemoryConversationStore::default());
        let llm = Arc::new(ScriptedLlm::replying("chat", "ok"));
        let orchestrator =
            with_model(store.clone(), Arc::new(InMemoryTurnCache::default()), llm.clone());
        let session = store.create_session("Long").await.expect("session");
        for i in 0..8 {
            store
                .append_exchange(session.id, &format!("q{i}"), &format!("a{i}"))
                .await
                .expect("seed");
        }

        orchestrator.run_turn(&session.key, "latest").await.expect("turn");

        let request = llm.last_reply_request().expect("reply request");
        assert_eq!(request.turns.len(), 12);
        assert_eq!(request.turns[1].content, "q3");
        assert_eq!(request.turns[10].content, "a7");
        assert_eq!(request.turns[11].content, "latest");
    }

    #[tokio::test]
    async fn fallback_turn_writes_user_then_assistant() {
        let store = Arc::new(InMemoryConversationStore::default());
        let orchestrator = fallback_only(store.clone(), Arc::new(InMemoryTurnCache::default()));
        let session = store.create_session("Demo").await.expect("session");

        let report = orchestrator.run_turn(&session.key, "hello").await.expect("turn");

        assert_eq!(report.path, ReplyPath::Fallback);
        assert!(report.intent.is_unknown());
        assert!(!report.trace.contains(&TurnState::BuildContext));
        let messages = store.load_messages(session.id).await.expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!((messages[0].role, messages[0].content.as_str()), (Role::User, "hello"));
        assert_eq!(messages[1], report.reply);
    }

    #[tokio::test]
    async fn cache_failure_is_absorbed() {
        let store = Arc::new(InMemoryConversationStore::default());
        let orchestrator = fallback_only(store.clone(), Arc::new(FailingCache));
        let session = store.create_session("Demo").await.expect("session");

        let report = orchestrator.run_turn(&session.key, "bye").await.expect("turn");

        assert_eq!(report.trace.last(), Some(&TurnState::Done));
        assert_eq!(store.load_messages(session.id).await.expect("messages").len(), 2);
    }

    #[tokio::test]
    async fn unknown_session_fails_on_both_paths() {
        let unknown = SessionKey::from("missing");
        let store = Arc::new(InMemoryConversationStore::default());

        let fallback = fallback_only(store.clone(), Arc::new(InMemoryTurnCache::default()));
        let model = with_model(
            store.clone(),
            Arc::new(InMemoryTurnCache::default()),
            Arc::new(ScriptedLlm::replying("chat", "never")),
        );

        for orchestrator in [fallback, model] {
            let error = orchestrator.run_turn(&unknown, "hello").await.expect_err("not found");
            assert_eq!(error, ChatError::SessionNotFound("missing".to_string()));
        }
    }

    #[tokio::test]
    async fn store_failure_surfaces_and_skips_cache() {
        let store = Arc::new(ReadOnlyStore::default());
        let cache = Arc::new(InMemoryTurnCache::default());
        let orchestrator = fallback_only(store.clone(), cache.clone());
        let session = store.create_session("Demo").await.expect("session");

        let error = orchestrator.run_turn(&session.key, "hello").await.expect_err("store down");

        assert!(matches!(error, ChatError::Store(_)));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn blank_utterance_is_rejected_before_any_io() {
        let store = Arc::new(InMemoryConversationStore::default());
        let orchestrator = fallback_only(store, Arc::new(InMemoryTurnCache::default()));

        let error =
            orchestrator.run_turn(&SessionKey::from("any"), "   ").await.expect_err("invalid");

        assert!(matches!(error, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_keep_exchanges_adjacent() {
        let store = Arc::new(InMemoryConversationStore::default());
        let orchestrator =
            Arc::new(fallback_only(store.clone(), Arc::new(InMemoryTurnCache::default())));
        let session = store.create_session("Busy").await.expect("session");

        let tasks = (0..6)
            .map(|i| {
                let (orchestrator, key) = (orchestrator.clone(), session.key.clone());
                tokio::spawn(async move { orchestrator.run_turn(&key, &format!("msg {i}")).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.expect("join").expect("turn");
        }

        let messages = store.load_messages(session.id).await.expect("messages");
        assert_eq!(messages.len(), 12);
        for pair in messages.chunks(2) {
            assert_eq!((pair[0].role, pair[1].role), (Role::User, Role::Assistant));
        }
    }
}
