pub mod config;
pub mod doctor;
pub mod migrate;

use serde::Serialize;

/// What a `colloquy` subcommand prints and the process exit code it maps to.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Failure classes reported by `migrate`. Each one owns a distinct exit code
/// so scripts can branch without parsing the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ConfigValidation,
    RuntimeInit,
    DbConnectivity,
    Migration,
}

impl ErrorClass {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::ConfigValidation => 2,
            Self::RuntimeInit => 3,
            Self::DbConnectivity => 4,
            Self::Migration => 5,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Ok,
    Error,
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: Status,
    error_class: Option<ErrorClass>,
    message: String,
}

impl CommandResult {
    /// Plain text output with a zero exit code.
    pub fn text(output: impl Into<String>) -> Self {
        Self { exit_code: 0, output: output.into() }
    }

    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let outcome = CommandOutcome {
            command,
            status: Status::Ok,
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: render(&outcome) }
    }

    pub fn failure(command: &str, error_class: ErrorClass, message: impl Into<String>) -> Self {
        let outcome = CommandOutcome {
            command,
            status: Status::Error,
            error_class: Some(error_class),
            message: message.into(),
        };
        Self { exit_code: error_class.exit_code(), output: render(&outcome) }
    }
}

fn render(outcome: &CommandOutcome<'_>) -> String {
    serde_json::to_string(outcome).unwrap_or_else(|error| {
        serde_json::json!({
            "command": outcome.command,
            "status": "error",
            "error_class": "serialization",
            "message": error.to_string(),
        })
        .to_string()
    })
}
