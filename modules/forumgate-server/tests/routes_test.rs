use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use forumgate_common::topics::RAW_MESSAGES;
use forumgate_common::RawMessage;
use forumgate_events::{EventBus, MemoryEventBus};
use forumgate_pipeline::testing::*;
use forumgate_pipeline::traits::VectorMatch;
use forumgate_pipeline::{KnowledgeBase, KnowledgeConfig};
use forumgate_server::routes::{build_router, AppState};

const TOKEN: &str = "intake-secret";

fn app(bus: Arc<MemoryEventBus>, index: MemoryVectorIndex) -> Router {
    let knowledge = KnowledgeBase::new(
        Arc::new(FixedEmbedder::new()),
        Arc::new(index),
        KnowledgeConfig::builder().build(),
    );
    build_router(
        AppState::new(bus as Arc<dyn EventBus>, Arc::new(knowledge), TOKEN),
        &[],
    )
}

fn intake_request(message: &RawMessage, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/raw-messages").header("content-type", "application/json");
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder
        .body(Body::from(serde_json::to_vec(message).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let response = app(Arc::new(MemoryEventBus::new()), MemoryVectorIndex::new())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn raw_message_is_published_to_the_bus() {
    let bus = Arc::new(MemoryEventBus::new());
    let message = forum_post("thread-1", "exit 137");

    let response = app(bus.clone(), MemoryVectorIndex::new())
        .oneshot(intake_request(&message, Some(&format!("Bearer {TOKEN}"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(body_json(response).await["seq"].is_i64());
    let published = bus.published(RAW_MESSAGES);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["channelId"], "thread-1");
}

#[tokio::test]
async fn intake_without_token_is_unauthorized() {
    let bus = Arc::new(MemoryEventBus::new());
    let message = forum_post("thread-1", "exit 137");

    let response = app(bus.clone(), MemoryVectorIndex::new())
        .oneshot(intake_request(&message, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(bus.total_published(), 0);
}

#[tokio::test]
async fn intake_with_wrong_token_is_unauthorized() {
    let bus = Arc::new(MemoryEventBus::new());
    let message = forum_post("thread-1", "exit 137");

    let response = app(bus.clone(), MemoryVectorIndex::new())
        .oneshot(intake_request(&message, Some("Bearer not-the-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(bus.total_published(), 0);
}

#[tokio::test]
async fn bus_outage_is_service_unavailable() {
    let bus = Arc::new(MemoryEventBus::new());
    bus.fail_publishes_to(RAW_MESSAGES);

    let response = app(bus, MemoryVectorIndex::new())
        .oneshot(intake_request(
            &community_message("m1", "hi"),
            Some(&format!("Bearer {TOKEN}")),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn knowledge_query_returns_relevant_articles() {
    let index = MemoryVectorIndex::new().with_matches(vec![
        VectorMatch {
            id: "a".into(),
            score: 0.8,
            metadata: Some(json!({
                "url": "https://docs.example.com/deploy",
                "title": "Deploying",
                "text": "Run deploy.",
            })),
        },
        VectorMatch {
            id: "b".into(),
            score: 0.1,
            metadata: None,
        },
    ]);

    let response = app(Arc::new(MemoryEventBus::new()), index)
        .oneshot(
            Request::get("/knowledge-base?q=how%20to%20deploy")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let articles = body["articles"].as_array().unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0]["title"], "Deploying");
}

#[tokio::test]
async fn blank_knowledge_query_is_rejected() {
    let response = app(Arc::new(MemoryEventBus::new()), MemoryVectorIndex::new())
        .oneshot(
            Request::get("/knowledge-base?q=%20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
