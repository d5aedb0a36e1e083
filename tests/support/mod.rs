//! Local stand-in for the primary LLM server
#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// One `data:` frame carrying `text` as the delta content
pub fn sse_delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": text}}]})
    )
}

/// Scripted primary provider
pub struct MockPrimary {
    pub health_status: StatusCode,
    pub health_delay: Duration,
    pub chat_status: StatusCode,
    /// Raw body pieces, each written as its own chunk
    pub body: Vec<String>,
    /// Abort the connection after the last body piece
    pub break_stream: bool,
    pub health_requests: AtomicUsize,
    pub chat_requests: AtomicUsize,
    pub last_request: Mutex<Option<Value>>,
}

impl MockPrimary {
    pub fn streaming<S: AsRef<str>>(body: &[S]) -> Self {
        Self {
            health_status: StatusCode::OK,
            health_delay: Duration::ZERO,
            chat_status: StatusCode::OK,
            body: body.iter().map(|s| s.as_ref().to_string()).collect(),
            break_stream: false,
            health_requests: AtomicUsize::new(0),
            chat_requests: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Stream `deltas` followed by the terminal sentinel
    pub fn replying(deltas: &[&str]) -> Self {
        let mut body: Vec<String> = deltas.iter().map(|d| sse_delta(d)).collect();
        body.push(SSE_DONE.to_string());
        Self::streaming(&body)
    }

    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    pub fn with_health_status(mut self, status: StatusCode) -> Self {
        self.health_status = status;
        self
    }

    pub fn with_chat_status(mut self, status: StatusCode) -> Self {
        self.chat_status = status;
        self
    }

    pub fn breaking_stream(mut self) -> Self {
        self.break_stream = true;
        self
    }

    pub fn chat_requests(&self) -> usize {
        self.chat_requests.load(Ordering::SeqCst)
    }

    pub fn health_requests(&self) -> usize {
        self.health_requests.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Value> {
        self.last_request.lock().unwrap().clone()
    }
}

async fn health(State(mock): State<Arc<MockPrimary>>) -> StatusCode {
    mock.health_requests.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(mock.health_delay).await;
    mock.health_status
}

async fn chat(State(mock): State<Arc<MockPrimary>>, Json(request): Json<Value>) -> Response {
    mock.chat_requests.fetch_add(1, Ordering::SeqCst);
    *mock.last_request.lock().unwrap() = Some(request);

    if !mock.chat_status.is_success() {
        return mock.chat_status.into_response();
    }

    let mut pieces: Vec<Result<Bytes, std::io::Error>> = mock
        .body
        .iter()
        .map(|piece| Ok(Bytes::from(piece.clone())))
        .collect();
    if mock.break_stream {
        pieces.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "stream dropped",
        )));
    }

    // Pausing between pieces makes each one reach the client on its own
    let paced = futures::stream::iter(pieces).then(|piece| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        piece
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(paced))
        .unwrap()
}

/// Serve `mock` on an ephemeral port of the current runtime; returns its base URL
pub async fn serve(mock: Arc<MockPrimary>) -> String {
    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Base URL nothing listens on
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:9";
