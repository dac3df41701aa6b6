use chrono::{DateTime, Local};

const GREETING_REPLY: &str =
    "Hello! I'm your AI assistant and I'm glad to help. What can I do for you?";
const FAREWELL_REPLY: &str = "Goodbye! Thanks for chatting, and see you next time!";
const HELP_REPLY: &str = "I can chat with you and answer simple questions. \
     This is a demo mode with basic conversation support.";

const GREETING_KEYWORDS: &[&str] = &["你好", "hello", "hi"];
const FAREWELL_KEYWORDS: &[&str] = &["再见", "拜拜", "bye"];
const HELP_KEYWORDS: &[&str] = &["帮助", "help"];
const TIME_KEYWORDS: &[&str] = &["时间", "几点", "time"];

const TEMPLATE_COUNT: usize = 5;

/// Offline responder used when no model backend is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct FallbackResponder;

impl FallbackResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn respond(&self, utterance: &str) -> String {
        self.respond_at(utterance, Local::now())
    }

    /// Keyword groups are checked in order (greeting, farewell, help, time);
    /// otherwise a template is picked by `byte length % template count`.
    pub fn respond_at(&self, utterance: &str, now: DateTime<Local>) -> String {
        let lowered = utterance.to_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|keyword| lowered.contains(keyword));

        if matches(GREETING_KEYWORDS) {
            GREETING_REPLY.to_string()
        } else if matches(FAREWELL_KEYWORDS) {
            FAREWELL_REPLY.to_string()
        } else if matches(HELP_KEYWORDS) {
            HELP_REPLY.to_string()
        } else if matches(TIME_KEYWORDS) {
            format!("The current time is: {}", now.format("%Y-%m-%d %H:%M:%S"))
        } else {
            template(utterance.len() % TEMPLATE_COUNT, utterance)
        }
    }
}

fn template(index: usize, utterance: &str) -> String {
    match index {
        0 => format!("This is a simulated AI reply. Your message was: {utterance}"),
        1 => format!("I understand you said: {utterance}. This is a demo reply."),
        2 => "Thanks for your message! As an AI assistant, I'm providing a simulated reply."
            .to_string(),
        3 => format!("Hi there! I'm a simulated assistant handling your message: {utterance}"),
        _ => {
            format!("This is a test reply demonstrating the chat feature. Your input: {utterance}")
        }
    }
}
