use axum::{
    extract::State,
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::AppError,
    models::{Message, SheetSchema},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/session/load", post(load_workbook))
        .route("/session/ask", post(ask_question))
        .route("/session/messages", get(list_messages))
        .route("/session/reset", post(reset_session))
        .layer(cors)
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    file_name: String,
    /// Declared content type; checked before the file is fetched.
    #[serde(default)]
    content_type: Option<String>,
    signed_url: String,
}

#[derive(Debug, Serialize)]
pub struct LoadResponse {
    message: Message,
    schema: Vec<SheetSchema>,
}

#[axum::debug_handler]
async fn load_workbook(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> Result<Json<LoadResponse>, AppError> {
    let start = std::time::Instant::now();
    tracing::info!(file = %request.file_name, "loading workbook");

    let message = state
        .session
        .load_from_url(
            &request.file_name,
            request.content_type.as_deref(),
            &request.signed_url,
        )
        .await?;

    let schema = state
        .session
        .schemas()
        .map(|s| s.as_ref().clone())
        .unwrap_or_default();

    tracing::info!(
        sheets = schema.len(),
        elapsed = ?start.elapsed(),
        "workbook ready"
    );

    Ok(Json(LoadResponse { message, schema }))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    message: Message,
}

#[axum::debug_handler]
async fn ask_question(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let start = std::time::Instant::now();

    let message = state.session.ask(&request.question).await?;

    tracing::info!(elapsed = ?start.elapsed(), "question answered");
    Ok(Json(AskResponse { message }))
}

#[axum::debug_handler]
async fn list_messages(State(state): State<Arc<AppState>>) -> Json<Vec<Message>> {
    Json(state.session.messages())
}

#[axum::debug_handler]
async fn reset_session(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.session.reset();
    Json(serde_json::json!({ "status": "reset" }))
}
