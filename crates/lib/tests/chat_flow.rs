//! Integration test: start a mock retrieval backend on a free port and drive
//! the controller end-to-end (startup, promotion, citations, clear, reload).
//! The server task is left running when the test ends.

use axum::{routing::get, routing::post, Json, Router};
use lib::backend::{BackendClient, QueryBackend};
use lib::controller::{SessionController, FALLBACK_REPLY};
use lib::session::ArticleNumber;
use lib::store::SessionStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn temp_sessions_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("docent-chat-flow-test-{}", uuid::Uuid::new_v4()))
        .join("sessions.json")
}

async fn chat(Json(req): Json<serde_json::Value>) -> Json<serde_json::Value> {
    // A conversation the backend has not seen yet gets "sess-42".
    let session_id = req
        .get("session_id")
        .and_then(|v| v.as_str())
        .unwrap_or("sess-42")
        .to_string();
    let query = req.get("query").and_then(|v| v.as_str()).unwrap_or("");
    Json(serde_json::json!({
        "response": format!("Answer to: {}", query),
        "sources": [
            {"title": "GDPR", "article_number": 5, "relevance_score": 0.92},
            {"title": "GDPR", "article_number": "5(1)", "relevance_score": 0.61}
        ],
        "session_id": session_id,
    }))
}

async fn start_mock_backend(port: u16) {
    let app = Router::new()
        .route("/", get(|| async { Json(serde_json::json!({"status": "ok"})) }))
        .route("/api/chat", post(chat))
        .route("/api/session/clear", post(|| async {}))
        .route("/api/reload", post(|| async {}));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind mock backend");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("mock backend did not come up on {}", url);
}

#[tokio::test]
async fn full_chat_flow_against_a_live_backend() {
    let port = free_port();
    start_mock_backend(port).await;

    let backend = Arc::new(BackendClient::new(Some(format!("http://127.0.0.1:{}", port))));
    let store = SessionStore::new(temp_sessions_path());
    let controller = SessionController::new(backend.clone(), store.clone());

    // Empty store: startup auto-creates a pending session.
    controller.start().await;
    let temp_id = controller.current_session_id().await.expect("current session");
    assert!(temp_id.starts_with("temp-"));

    // First answered query promotes to the backend-issued id.
    controller.send_message("What is Article 5?").await.unwrap();
    assert_eq!(controller.current_session_id().await.as_deref(), Some("sess-42"));
    let current = controller.current_session().await.unwrap();
    assert_eq!(current.messages.len(), 2);
    let sources = current.messages[1].sources.as_ref().unwrap();
    assert_eq!(sources[0].relevance_score, 0.92);
    assert_eq!(sources[1].article_number, ArticleNumber::Text("5(1)".to_string()));

    // The store mirrors memory: one record, promoted id, no temp leftover.
    let stored = store.load_all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id(), "sess-42");

    // A follow-up stays on the confirmed id.
    controller.send_message("And Article 6?").await.unwrap();
    assert_eq!(controller.current_messages().await.len(), 4);
    assert_eq!(controller.current_session_id().await.as_deref(), Some("sess-42"));

    // Clear goes through the backend, then empties local state.
    controller.clear_session("sess-42").await.unwrap();
    assert!(controller.current_messages().await.is_empty());
    assert!(store.load_all()[0].messages.is_empty());

    // Reload is a plain 200.
    backend.reload_documents().await.unwrap();
}

#[tokio::test]
async fn unreachable_backend_degrades_to_a_fallback_reply() {
    // Nothing listens on this port.
    let port = free_port();
    let backend = Arc::new(BackendClient::new(Some(format!("http://127.0.0.1:{}", port))));
    let controller = SessionController::new(backend, SessionStore::new(temp_sessions_path()));
    controller.start().await;
    let temp_id = controller.current_session_id().await.unwrap();

    let reply = controller.send_message("hello?").await.unwrap();
    assert_eq!(reply.content, FALLBACK_REPLY);
    assert!(reply.sources.is_none());

    // Session keeps its pending identity and both messages; loading cleared.
    assert_eq!(controller.current_session_id().await.as_deref(), Some(temp_id.as_str()));
    assert_eq!(controller.current_messages().await.len(), 2);
    assert!(!controller.is_loading());
}
