use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use colloquy_agent::ChatService;
use colloquy_core::domain::message::Message;
use colloquy_core::domain::session::{Session, SessionHistory, SessionKey};
use colloquy_core::errors::{ChatError, InterfaceError};
use colloquy_db::DbPool;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct ChatState {
    chat: Arc<ChatService>,
}

#[derive(Debug, Serialize)]
pub struct ApiSuccess<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

type ApiResult<T> = Result<(StatusCode, Json<ApiSuccess<T>>), (StatusCode, Json<ApiError>)>;

pub fn router(chat: Arc<ChatService>, db_pool: DbPool) -> Router {
    let reply_path = chat.reply_path();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/api/v1/chats", get(list_chats).post(create_chat))
        .route("/api/v1/chats/{session_key}", get(get_chat).delete(delete_chat))
        .route("/api/v1/chats/{session_key}/messages", post(send_message))
        .with_state(ChatState { chat })
        .merge(health::router(db_pool, reply_path))
        .layer(cors)
}

async fn list_chats(State(state): State<ChatState>) -> ApiResult<Vec<Session>> {
    let sessions = state.chat.list_sessions().await.map_err(reject)?;
    Ok(ok(StatusCode::OK, sessions))
}

async fn create_chat(
    State(state): State<ChatState>,
    request: Result<Json<CreateChatRequest>, JsonRejection>,
) -> ApiResult<Session> {
    let Json(request) = request.map_err(invalid_body)?;
    let session = state.chat.create_session(&request.title).await.map_err(reject)?;
    Ok(ok(StatusCode::CREATED, session))
}

async fn get_chat(
    Path(session_key): Path<String>,
    State(state): State<ChatState>,
) -> ApiResult<SessionHistory> {
    let history = state.chat.get_history(&SessionKey(session_key)).await.map_err(reject)?;
    Ok(ok(StatusCode::OK, history))
}

async fn send_message(
    Path(session_key): Path<String>,
    State(state): State<ChatState>,
    request: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<Message> {
    let Json(request) = request.map_err(invalid_body)?;
    let reply =
        state.chat.send_turn(&SessionKey(session_key), &request.message).await.map_err(reject)?;
    Ok(ok(StatusCode::OK, reply))
}

async fn delete_chat(
    Path(session_key): Path<String>,
    State(state): State<ChatState>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state.chat.delete_session(&SessionKey(session_key)).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

fn ok<T>(status: StatusCode, data: T) -> (StatusCode, Json<ApiSuccess<T>>) {
    (status, Json(ApiSuccess { success: true, data }))
}

fn invalid_body(rejection: JsonRejection) -> (StatusCode, Json<ApiError>) {
    reject(ChatError::InvalidInput(rejection.body_text()))
}

fn reject(error: ChatError) -> (StatusCode, Json<ApiError>) {
    let correlation_id = Uuid::new_v4().to_string();
    let interface = error.into_interface(correlation_id.clone());
    let status = status_for(&interface);

    if status.is_server_error() {
        error!(
            event_name = "http.request.failed",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %interface,
            "chat request failed"
        );
    } else {
        warn!(
            event_name = "http.request.rejected",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %interface,
            "chat request rejected"
        );
    }

    (status, Json(ApiError { error: interface.user_message().to_string(), correlation_id }))
}

fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
