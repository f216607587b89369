use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use forumgate_common::topics::RAW_MESSAGES;
use forumgate_common::{KnowledgeArticle, PipelineError, RawMessage};
use forumgate_events::{publish_json, EventBus};
use forumgate_pipeline::KnowledgeBase;

#[derive(Clone)]
pub struct AppState {
    bus: Arc<dyn EventBus>,
    knowledge: Arc<KnowledgeBase>,
    /// Bearer token the chat transport presents on intake.
    intake_token: Arc<str>,
}

impl AppState {
    pub fn new(
        bus: Arc<dyn EventBus>,
        knowledge: Arc<KnowledgeBase>,
        intake_token: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            bus,
            knowledge,
            intake_token: intake_token.into(),
        }
    }
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let intake = Router::new()
        .route("/raw-messages", post(ingest_raw_message))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_intake_token,
        ));

    Router::new()
        .merge(intake)
        .route("/knowledge-base", get(find_knowledge))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn require_intake_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !is_authorized(&headers, &state.intake_token) {
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    next.run(request).await
}

/// `Authorization: Bearer <token>`. An empty configured token admits nobody.
fn is_authorized(headers: &HeaderMap, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    let Some(presented) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    constant_time_eq(presented.as_bytes(), token.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct Accepted {
    seq: i64,
}

async fn ingest_raw_message(
    State(state): State<AppState>,
    Json(message): Json<RawMessage>,
) -> Response {
    match publish_json(state.bus.as_ref(), RAW_MESSAGES, &message).await {
        Ok(seq) => (StatusCode::ACCEPTED, Json(Accepted { seq })).into_response(),
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "Failed to enqueue raw message");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "event bus unavailable")
        }
    }
}

#[derive(Deserialize)]
struct KnowledgeQuery {
    q: String,
}

#[derive(Serialize)]
struct KnowledgeResponse {
    articles: Vec<KnowledgeArticle>,
}

async fn find_knowledge(
    State(state): State<AppState>,
    Query(query): Query<KnowledgeQuery>,
) -> Response {
    if query.q.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query parameter q is empty");
    }

    match state.knowledge.find_relevant(&query.q).await {
        Ok(articles) => Json(KnowledgeResponse { articles }).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Knowledge base lookup failed");
            let status = match e {
                PipelineError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            error_response(status, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_must_match_exactly() {
        assert!(is_authorized(&bearer("Bearer s3cret"), "s3cret"));
        assert!(!is_authorized(&bearer("Bearer s3cre"), "s3cret"));
        assert!(!is_authorized(&bearer("Basic s3cret"), "s3cret"));
        assert!(!is_authorized(&HeaderMap::new(), "s3cret"));
    }

    #[test]
    fn empty_configured_token_rejects_everything() {
        assert!(!is_authorized(&bearer("Bearer "), ""));
    }
}
