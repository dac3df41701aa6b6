use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use colloquy_agent::ReplyPath;
use colloquy_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    reply_path: ReplyPath,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub backend: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, reply_path: ReplyPath) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, reply_path })
}

/// The backend check never degrades readiness: running without a model
/// credential is a supported offline mode.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "colloquy-server runtime initialized".to_string(),
        },
        database,
        backend: backend_check(state.reply_path),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn backend_check(reply_path: ReplyPath) -> HealthCheck {
    match reply_path {
        ReplyPath::Model => {
            HealthCheck { status: "ready", detail: "model backend configured".to_string() }
        }
        ReplyPath::Fallback => HealthCheck {
            status: "offline",
            detail: "no model credential; replies come from the fallback responder".to_string(),
        },
    }
}
