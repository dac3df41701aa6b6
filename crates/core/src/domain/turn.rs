use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Label used whenever the classifier is unavailable or fails.
pub const UNKNOWN_INTENT: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentLabel(pub String);

impl IntentLabel {
    pub fn unknown() -> Self {
        Self(UNKNOWN_INTENT.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_INTENT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IntentLabel {
    fn default() -> Self {
        Self::unknown()
    }
}

impl std::fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest exchange of a session, kept in the ephemeral cache only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTurn {
    pub user_message: String,
    pub ai_message: String,
    /// Unix seconds.
    pub timestamp: i64,
}

impl CachedTurn {
    pub fn new(user_message: impl Into<String>, ai_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ai_message: ai_message.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }
}
