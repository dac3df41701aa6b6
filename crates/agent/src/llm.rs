use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use colloquy_core::config::LlmConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTurn {
    pub role: PromptRole,
    pub content: String,
}

impl PromptTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: PromptRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: PromptRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: PromptRole::Assistant, content: content.into() }
    }
}

/// One chat-completion call: the prompt plus its sampling limits and deadline.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub turns: Vec<PromptTurn>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub deadline: Duration,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model backend is not configured")]
    NotConfigured,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode backend response: {0}")]
    Decode(String),
    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
}

/// Language-model backend. Returns every completion the backend produced,
/// possibly none.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_chat(&self, request: &CompletionRequest) -> Result<Vec<String>, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [PromptTurn],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any backend speaking the OpenAI `chat/completions` protocol.
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder().build().map_err(|e| LlmError::Transport(e.to_string()))?;
        let endpoint = if base_url.ends_with("/chat/completions") {
            base_url.to_string()
        } else {
            format!("{}/chat/completions", base_url.trim_end_matches('/'))
        };

        Ok(Self { client, endpoint, api_key, model: model.into() })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if !config.is_configured() {
            return Err(LlmError::NotConfigured);
        }
        let api_key = config.api_key.clone().ok_or(LlmError::NotConfigured)?;
        Self::new(&config.base_url, api_key, config.model.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete_chat(&self, request: &CompletionRequest) -> Result<Vec<String>, LlmError> {
        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.turns,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .timeout(request.deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, request.deadline))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest_error(e, request.deadline))?;

        Ok(completion.choices.into_iter().filter_map(|choice| choice.message.content).collect())
    }
}

fn classify_reqwest_error(error: reqwest::Error, deadline: Duration) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout(deadline)
    } else if error.is_decode() {
        LlmError::Decode(error.to_string())
    } else {
        LlmError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::{CompletionRequest, LlmClient, LlmError, OpenAiCompatibleClient, PromptTurn};

    async fn spawn_backend(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    fn request(deadline: Duration) -> CompletionRequest {
        CompletionRequest {
            turns: vec![PromptTurn::system("be brief"), PromptTurn::user("hello")],
            temperature: 0.7,
            max_tokens: 1000,
            deadline,
        }
    }

    fn client(addr: SocketAddr) -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(
            &format!("http://{addr}/v1"),
            SecretString::from("sk-test".to_string()),
            "gpt-test",
        )
        .expect("client")
    }

    #[tokio::test]
    async fn sends_prompt_and_returns_completions() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value == "Bearer sk-test");
                if !authorized {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
                }
                let echoed = format!(
                    "{}:{}:{}",
                    body["model"].as_str().unwrap_or_default(),
                    body["messages"][1]["role"].as_str().unwrap_or_default(),
                    body["max_tokens"]
                );
                (StatusCode::OK, Json(json!({"choices": [{"message": {"content": echoed}}]})))
            }),
        );
        let addr = spawn_backend(router).await;

        let completions =
            client(addr).complete_chat(&request(Duration::from_secs(5))).await.expect("complete");

        assert_eq!(completions, vec!["gpt-test:user:1000".to_string()]);
    }

    #[tokio::test]
    async fn zero_choices_yield_empty_completion_list() {
        let router = Router::new()
            .route("/v1/chat/completions", post(|| async { Json(json!({"choices": []})) }));
        let addr = spawn_backend(router).await;

        let completions =
            client(addr).complete_chat(&request(Duration::from_secs(5))).await.expect("complete");

        assert!(completions.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let addr = spawn_backend(router).await;

        let error = client(addr)
            .complete_chat(&request(Duration::from_secs(5)))
            .await
            .expect_err("status error");

        assert!(matches!(error, LlmError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn slow_backend_hits_deadline() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"choices": []}))
            }),
        );
        let addr = spawn_backend(router).await;

        let error = client(addr)
            .complete_chat(&request(Duration::from_millis(50)))
            .await
            .expect_err("timeout");

        assert!(matches!(error, LlmError::Timeout(_)));
    }

    #[test]
    fn endpoint_is_derived_from_base_url() {
        let key = || SecretString::from("k".to_string());
        let plain = OpenAiCompatibleClient::new("https://api.example.com/v1/", key(), "m")
            .expect("client");
        let explicit =
            OpenAiCompatibleClient::new("https://proxy.example.com/chat/completions", key(), "m")
                .expect("client");

        assert_eq!(plain.endpoint(), "https://api.example.com/v1/chat/completions");
        assert_eq!(explicit.endpoint(), "https://proxy.example.com/chat/completions");
    }
}
