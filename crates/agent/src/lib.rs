//! Turn processing for colloquy.
//!
//! A turn flows through a constrained pipeline:
//! 1. **Intent classification** (`intent`) - best-effort label, never fatal
//! 2. **Context assembly** (`context`) - persona directive plus a bounded history window
//! 3. **Reply generation** - `invoker` against the model backend, or `fallback`
//!    when no backend credential is configured
//! 4. **Persistence** (`orchestrator`) - the user and assistant messages are
//!    written together, and only after a reply exists
//! 5. **Cache write** - latest exchange recorded with a TTL, failures absorbed
//!
//! `ChatService` is the facade consumed by the HTTP layer.

pub mod context;
pub mod fallback;
pub mod intent;
pub mod invoker;
pub mod llm;
pub mod locks;
pub mod orchestrator;
pub mod service;

pub use context::ContextBuilder;
pub use fallback::FallbackResponder;
pub use intent::IntentClassifier;
pub use invoker::{ModelInvoker, RetryPolicy};
pub use llm::{
    CompletionRequest, LlmClient, LlmError, OpenAiCompatibleClient, PromptRole, PromptTurn,
};
pub use locks::SessionLocks;
pub use orchestrator::{ReplyPath, TurnOrchestrator, TurnReport, TurnState};
pub use service::ChatService;

#[cfg(test)]
mod test_support;
