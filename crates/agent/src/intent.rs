use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use colloquy_core::domain::turn::IntentLabel;

use crate::llm::{CompletionRequest, LlmClient, PromptTurn};

const CLASSIFIER_INSTRUCTION: &str =
    "Classify the intent of this input and return only the category name";
const CLASSIFIER_DIRECTIVE: &str = "You are an intent classification assistant. \
Classify the user's input into exactly one of these categories:\n\
- question: asking for information\n\
- chat: casual conversation\n\
- task: asking for something to be done\n\
- command: an explicit instruction\n\
- other: anything that does not fit\n\
Reply with the category name only, without any explanation.";

/// Labels a single utterance with a coarse intent category.
///
/// Every failure mode (transport error, empty output, deadline) collapses to
/// the `unknown` label with `ok = false`; callers proceed either way.
pub struct IntentClassifier {
    client: Arc<dyn LlmClient>,
    deadline: Duration,
    max_tokens: u32,
}

impl IntentClassifier {
    pub fn new(client: Arc<dyn LlmClient>, deadline: Duration, max_tokens: u32) -> Self {
        Self { client, deadline, max_tokens }
    }

    pub async fn classify(&self, utterance: &str) -> (IntentLabel, bool) {
        let request = CompletionRequest {
            turns: vec![
                PromptTurn::system(CLASSIFIER_DIRECTIVE),
                PromptTurn::user(format!("{CLASSIFIER_INSTRUCTION}: {utterance}")),
            ],
            temperature: 0.0,
            max_tokens: self.max_tokens,
            deadline: self.deadline,
        };

        let outcome =
            tokio::time::timeout(self.deadline, self.client.complete_chat(&request)).await;
        let completions = match outcome {
            Ok(Ok(completions)) => completions,
            Ok(Err(error)) => {
                warn!(
                    event_name = "chat.intent.failed",
                    error = %error,
                    "intent classification failed"
                );
                return (IntentLabel::unknown(), false);
            }
            Err(_) => {
                warn!(
                    event_name = "chat.intent.failed",
                    deadline_ms = self.deadline.as_millis() as u64,
                    "intent classification timed out"
                );
                return (IntentLabel::unknown(), false);
            }
        };

        match completions.first().map(|label| label.trim()).filter(|label| !label.is_empty()) {
            Some(label) => {
                debug!(event_name = "chat.intent.raw", label, "intent classifier answered");
                (IntentLabel(label.to_string()), true)
            }
            None => {
                warn!(event_name = "chat.intent.failed", "intent classifier returned no label");
                (IntentLabel::unknown(), false)
            }
        }
    }
}
