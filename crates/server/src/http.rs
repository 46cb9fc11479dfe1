//! HTTP endpoints
//!
//! REST API over the engine: query (plain and SSE streaming),
//! conversation management, settings, cache administration, health and
//! Prometheus metrics.

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use policy_qa_core::{Answer, Error};
use policy_qa_engine::{QueryEvent, QueryRequest};

use crate::sanitize::{sanitize_question, SanitizeError};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let settings = state.engine.settings();
    let cors_layer = build_cors_layer(&settings.server.cors_origins, settings.server.cors_enabled);

    Router::new()
        // Query endpoints
        .route("/api/query", post(query))
        .route("/api/query/stream", post(query_stream))
        // Conversation
        .route("/api/conversation/clear", post(conversation_clear))
        // Settings
        .route("/api/settings", get(settings_get))
        .route("/api/settings", put(settings_put))
        .route("/api/settings/reset", post(settings_reset))
        // Cache administration
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/invalidate", post(cache_invalidate))
        .route("/api/cache/clear", post(cache_clear))
        // Health and metrics
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins; empty configuration
/// defaults to localhost for safety.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Invalid CORS origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().expect("valid origin"))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
}

/// Error answer body with a wire status
fn error_response(status: StatusCode, text: &str, kind: &str) -> (StatusCode, Json<Answer>) {
    (status, Json(Answer::error(text, kind)))
}

fn map_engine_error(error: Error) -> (StatusCode, Json<Answer>) {
    let status = match &error {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::LlmBusy => StatusCode::TOO_MANY_REQUESTS,
        Error::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!(kind = error.kind(), error = %error, "Query failed");
    error_response(status, &error.to_string(), error.kind())
}

fn map_sanitize_error(error: SanitizeError) -> (StatusCode, Json<Answer>) {
    match error {
        SanitizeError::Empty => {
            error_response(StatusCode::BAD_REQUEST, "question is empty", "invalid_input")
        }
        SanitizeError::TooLong => error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "question is too long",
            "invalid_input",
        ),
    }
}

/// Query endpoint (non-streaming)
async fn query(
    State(state): State<AppState>,
    Json(mut request): Json<QueryRequest>,
) -> Result<Json<Answer>, (StatusCode, Json<Answer>)> {
    request.question = sanitize_question(&request.question).map_err(map_sanitize_error)?;

    state
        .engine
        .query(request)
        .await
        .map(Json)
        .map_err(map_engine_error)
}

/// Streaming query endpoint (SSE)
async fn query_stream(
    State(state): State<AppState>,
    Json(mut request): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<Answer>)> {
    request.question = sanitize_question(&request.question).map_err(map_sanitize_error)?;

    let events = Arc::clone(&state.engine)
        .query_stream(request)
        .map(|event| {
            let event = match Event::default().json_data(&event) {
                Ok(event) => event,
                Err(e) => Event::default()
                    .json_data(&QueryEvent::Error(e.to_string()))
                    .unwrap_or_default(),
            };
            Ok(event)
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct ConversationClearRequest {
    conversation_id: String,
}

async fn conversation_clear(
    State(state): State<AppState>,
    Json(request): Json<ConversationClearRequest>,
) -> Json<serde_json::Value> {
    let cleared = state.engine.clear_conversation(&request.conversation_id);
    Json(serde_json::json!({ "cleared": cleared }))
}

async fn settings_get(State(state): State<AppState>) -> Json<serde_json::Value> {
    let settings = state.engine.settings();
    Json(serde_json::to_value(&*settings).unwrap_or_default())
}

async fn settings_put(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<Answer>)> {
    let updated = state.engine.update_settings(patch).map_err(map_engine_error)?;
    Ok(Json(serde_json::to_value(&*updated).unwrap_or_default()))
}

async fn settings_reset(State(state): State<AppState>) -> Json<serde_json::Value> {
    let settings = state.engine.reset_settings();
    Json(serde_json::to_value(&*settings).unwrap_or_default())
}

async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.cache_stats())
}

#[derive(Debug, Deserialize)]
struct CacheInvalidateRequest {
    text: String,
}

async fn cache_invalidate(
    State(state): State<AppState>,
    Json(request): Json<CacheInvalidateRequest>,
) -> Json<serde_json::Value> {
    state.engine.cache_invalidate(&request.text).await;
    Json(serde_json::json!({ "invalidated": true }))
}

async fn cache_clear(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.cache_clear_all().await;
    Json(serde_json::json!({ "cleared": true }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.health().await)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
