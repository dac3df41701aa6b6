pub mod config;
pub mod domain;
pub mod errors;

pub use domain::message::{Message, MessageId, Role};
pub use domain::session::{Session, SessionHistory, SessionId, SessionKey};
pub use domain::turn::{CachedTurn, IntentLabel, UNKNOWN_INTENT};
pub use errors::{ChatError, DomainError, InterfaceError, ModelFailure};
