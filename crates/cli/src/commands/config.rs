use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use colloquy_core::config::{AppConfig, LoadOptions, PLACEHOLDER_API_KEY};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, file_doc.as_ref(), file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: String, env_keys: &[&str]| {
        lines.push(format!("- {key} = {value} (source: {})", source(key, env_keys)));
    };

    push("database.url", config.database.url.clone(), &["COLLOQUY_DATABASE_URL"]);
    push(
        "database.max_connections",
        config.database.max_connections.to_string(),
        &["COLLOQUY_DATABASE_MAX_CONNECTIONS"],
    );
    push(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        &["COLLOQUY_DATABASE_TIMEOUT_SECS"],
    );
    push("llm.api_key", redact_api_key(&config), &["COLLOQUY_LLM_API_KEY", "OPENAI_API_KEY"]);
    push(
        "llm.base_url",
        config.llm.base_url.clone(),
        &["COLLOQUY_LLM_BASE_URL", "OPENAI_BASE_URL"],
    );
    push("llm.model", config.llm.model.clone(), &["COLLOQUY_LLM_MODEL"]);
    push("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["COLLOQUY_LLM_TIMEOUT_SECS"]);
    push(
        "llm.classifier_timeout_secs",
        config.llm.classifier_timeout_secs.to_string(),
        &["COLLOQUY_LLM_CLASSIFIER_TIMEOUT_SECS"],
    );
    push("llm.temperature", config.llm.temperature.to_string(), &["COLLOQUY_LLM_TEMPERATURE"]);
    push("llm.max_tokens", config.llm.max_tokens.to_string(), &["COLLOQUY_LLM_MAX_TOKENS"]);
    push("llm.max_retries", config.llm.max_retries.to_string(), &["COLLOQUY_LLM_MAX_RETRIES"]);
    push(
        "chat.history_window",
        config.chat.history_window.to_string(),
        &["COLLOQUY_CHAT_HISTORY_WINDOW"],
    );
    push("chat.persona", config.chat.persona.clone(), &["COLLOQUY_CHAT_PERSONA"]);
    push(
        "chat.cache_ttl_secs",
        config.chat.cache_ttl_secs.to_string(),
        &["COLLOQUY_CHAT_CACHE_TTL_SECS"],
    );
    push(
        "chat.cache_backend",
        format!("{:?}", config.chat.cache_backend).to_lowercase(),
        &["COLLOQUY_CHAT_CACHE_BACKEND"],
    );
    push(
        "server.bind_address",
        config.server.bind_address.clone(),
        &["COLLOQUY_SERVER_BIND_ADDRESS"],
    );
    push("server.port", config.server.port.to_string(), &["COLLOQUY_SERVER_PORT", "APP_PORT"]);
    push(
        "server.graceful_shutdown_secs",
        config.server.graceful_shutdown_secs.to_string(),
        &["COLLOQUY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    );
    push(
        "logging.level",
        config.logging.level.clone(),
        &["COLLOQUY_LOGGING_LEVEL", "COLLOQUY_LOG_LEVEL"],
    );
    push(
        "logging.format",
        format!("{:?}", config.logging.format).to_lowercase(),
        &["COLLOQUY_LOGGING_FORMAT", "COLLOQUY_LOG_FORMAT"],
    );

    lines.push(format!(
        "- reply_path = {}",
        if config.llm.is_configured() { "model" } else { "fallback" }
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["colloquy.toml", "config/colloquy.toml"].into_iter().map(PathBuf::from).find(|p| p.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_api_key(config: &AppConfig) -> String {
    match config.llm.api_key.as_ref().map(|key| key.expose_secret().trim().to_string()) {
        None => "<unset>".to_string(),
        Some(key) if key.is_empty() => "<empty>".to_string(),
        Some(key) if key == PLACEHOLDER_API_KEY => "<placeholder>".to_string(),
        Some(key) => match key.split_once('-') {
            Some((prefix, _)) => format!("{prefix}-***"),
            None => "<redacted>".to_string(),
        },
    }
}
