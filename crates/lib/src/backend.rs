//! HTTP client for the retrieval backend (http://localhost:8000 by default).
//!
//! Three single-shot JSON operations: send a query, clear a session's
//! server-side history, trigger a document reload. No retries, no caching;
//! transport and API errors are surfaced unmodified to the caller.

use crate::session::Source;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
}

/// Answer to one query: response text, citations, and the id the backend
/// filed the conversation under (newly assigned on the first query).
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub session_id: String,
}

/// The backend operations the session controller depends on. Implemented by
/// [`BackendClient`] over HTTP and by in-memory fakes in tests.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// POST /api/chat. `session_id` is `None` for a conversation the backend
    /// has not seen yet; the response carries the id it assigned.
    async fn send_query(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<QueryResponse, BackendError>;

    /// POST /api/session/clear — drop the session's server-side history.
    async fn clear_session(&self, session_id: &str) -> Result<(), BackendError>;

    /// POST /api/reload — re-index the document corpus.
    async fn reload_documents(&self) -> Result<(), BackendError>;
}

/// reqwest-backed [`QueryBackend`].
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `path` with a JSON body; non-2xx becomes `Api(status body)`.
    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let res = self.client.post(&url).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        Ok(res)
    }
}

#[async_trait]
impl QueryBackend for BackendClient {
    async fn send_query(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<QueryResponse, BackendError> {
        let body = ChatRequest {
            query: query.to_string(),
            session_id: session_id.map(String::from),
        };
        let res = self.post("/api/chat", &body).await?;
        let data: QueryResponse = res.json().await?;
        Ok(data)
    }

    async fn clear_session(&self, session_id: &str) -> Result<(), BackendError> {
        let body = ClearRequest {
            session_id: session_id.to_string(),
        };
        // Status-only response; the body is ignored.
        self.post("/api/session/clear", &body).await?;
        Ok(())
    }

    async fn reload_documents(&self) -> Result<(), BackendError> {
        self.post("/api/reload", &serde_json::json!({})).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClearRequest {
    session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ArticleNumber;

    #[test]
    fn chat_request_omits_absent_session_id() {
        let body = ChatRequest {
            query: "What is Article 5?".to_string(),
            session_id: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, serde_json::json!({"query": "What is Article 5?"}));

        let body = ChatRequest {
            query: "And 6?".to_string(),
            session_id: Some("sess-42".to_string()),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["session_id"], "sess-42");
    }

    #[test]
    fn query_response_parses_sources_and_defaults() {
        let data: QueryResponse = serde_json::from_str(
            r#"{
                "response": "Article 5 sets out the principles.",
                "sources": [{"title": "GDPR", "article_number": 5, "relevance_score": 0.92}],
                "session_id": "sess-42"
            }"#,
        )
        .unwrap();
        assert_eq!(data.session_id, "sess-42");
        assert_eq!(data.sources.len(), 1);
        assert_eq!(data.sources[0].article_number, ArticleNumber::Number(5));

        // Sources may be absent entirely.
        let data: QueryResponse =
            serde_json::from_str(r#"{"response": "ok", "session_id": "sess-1"}"#).unwrap();
        assert!(data.sources.is_empty());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BackendClient::new(Some("http://localhost:9000/".to_string()));
        assert_eq!(client.base_url(), "http://localhost:9000");
        let client = BackendClient::new(None);
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
