use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown message role `{0}`")]
    UnknownRole(String),
}

/// Failure of the single model invocation made for a turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelFailure {
    #[error("model backend transport failure: {0}")]
    Transport(String),
    #[error("model backend returned no completions")]
    EmptyResponse,
}

/// Failures surfaced to callers of the chat core.
///
/// Classification and cache failures never show up here; they are absorbed
/// where they happen.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Model(#[from] ModelFailure),
    #[error("conversation store failure: {0}")]
    Store(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("bad gateway: {message}")]
    BadGateway { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "Chat not found",
            Self::BadGateway { .. } => {
                "The assistant could not produce a reply. Nothing was saved; please retry."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ChatError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::BadGateway { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ChatError> for InterfaceError {
    fn from(value: ChatError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ChatError::InvalidInput(message) => Self::BadRequest { message, correlation_id },
            ChatError::SessionNotFound(key) => {
                Self::NotFound { message: format!("session `{key}` not found"), correlation_id }
            }
            ChatError::Model(failure) => {
                Self::BadGateway { message: failure.to_string(), correlation_id }
            }
            ChatError::Store(message) => Self::ServiceUnavailable { message, correlation_id },
            ChatError::Domain(error) => {
                Self::Internal { message: error.to_string(), correlation_id }
            }
        }
    }
}
