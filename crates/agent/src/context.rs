use colloquy_core::domain::message::{Message, Role};
use colloquy_core::domain::session::Session;
use colloquy_core::domain::turn::IntentLabel;

use crate::llm::PromptTurn;

/// Assembles the prompt for one turn: a system directive, a bounded window of
/// prior messages, then the new utterance.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    persona: String,
    window: usize,
}

impl ContextBuilder {
    pub fn new(persona: impl Into<String>, window: usize) -> Self {
        Self { persona: persona.into(), window }
    }

    /// `history` must already be in ascending time order. Only the most
    /// recent `window` messages are kept; nothing is summarised.
    pub fn build(
        &self,
        _session: &Session,
        history: &[Message],
        utterance: &str,
        intent: &IntentLabel,
    ) -> Vec<PromptTurn> {
        let skip = history.len().saturating_sub(self.window);
        let mut turns = Vec::with_capacity(history.len() - skip + 2);

        turns.push(PromptTurn::system(self.directive(intent)));
        turns.extend(history[skip..].iter().map(|message| match message.role {
            Role::Assistant => PromptTurn::assistant(message.content.clone()),
            Role::User | Role::System => PromptTurn::user(message.content.clone()),
        }));
        turns.push(PromptTurn::user(utterance));

        turns
    }

    fn directive(&self, intent: &IntentLabel) -> String {
        format!("{} The current user intent is: {}", self.persona.trim_end(), intent)
    }
}
