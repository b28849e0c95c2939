//! Shared helpers for the server's router tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, BodyDataStream};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chatly_core::{AuthContext, Chatly};
use chatly_store::Store;
use futures::StreamExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::time::timeout;
use tower::ServiceExt;

use crate::api::{build_router, AppState, USER_HEADER};
use crate::blob_store::LocalBlobStore;
use crate::config::ServerConfig;

pub(crate) async fn test_state() -> (AppState, TempDir) {
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(
        LocalBlobStore::new(dir.path().to_path_buf(), "http://test", 1024 * 1024)
            .await
            .unwrap(),
    );
    let store = Store::open_in_memory().unwrap();
    let state = AppState {
        chatly: Chatly::new(store, blobs.clone(), AuthContext::new()),
        blobs,
        config: Arc::new(ServerConfig::default()),
    };
    (state, dir)
}

pub(crate) async fn test_app() -> (Router, TempDir) {
    let (state, dir) = test_state().await;
    (build_router(state), dir)
}

/// Send one JSON request and decode the JSON reply (`Null` when empty).
pub(crate) async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header(USER_HEADER, user);
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

pub(crate) async fn get(app: &Router, uri: &str, user: &str) -> (StatusCode, Value) {
    call(app, "GET", uri, Some(user), None).await
}

pub(crate) async fn post(app: &Router, uri: &str, user: &str, body: Value) -> (StatusCode, Value) {
    call(app, "POST", uri, Some(user), Some(body)).await
}

/// Register `u1` (alice) and `u2` (bob).
pub(crate) async fn register_pair(app: &Router) {
    for (id, email, name) in [
        ("u1", "alice@example.com", "Alice"),
        ("u2", "bob@example.com", "Bob"),
    ] {
        let body = json!({ "email": email, "fullName": name });
        let (status, _) = post(app, "/users", id, body).await;
        assert_eq!(status, StatusCode::OK);
    }
}

/// Make `u1` and `u2` friends and return their chat id.
pub(crate) async fn befriend(app: &Router) -> String {
    let (status, request) = post(app, "/friend-requests", "u1", json!({ "to": "u2" })).await;
    assert_eq!(status, StatusCode::OK);
    let uri = format!("/friend-requests/{}/respond", request["id"].as_str().unwrap());
    let (status, outcome) = post(app, &uri, "u2", json!({ "action": "accepted" })).await;
    assert_eq!(status, StatusCode::OK);
    outcome["chatId"].as_str().unwrap().to_string()
}

/// Open an event stream and return its body.
pub(crate) async fn open_stream(app: &Router, uri: &str, user: &str) -> Body {
    let req = Request::builder()
        .uri(uri)
        .header(USER_HEADER, user)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    resp.into_body()
}

/// Reads server-sent events off a response body.
pub(crate) struct EventReader {
    body: BodyDataStream,
    buf: String,
}

impl EventReader {
    pub(crate) fn new(body: Body) -> Self {
        Self {
            body: body.into_data_stream(),
            buf: String::new(),
        }
    }

    /// Next event as `(name, data)`, skipping keep-alive comments.
    pub(crate) async fn next(&mut self) -> (String, Value) {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(end) = self.buf.find("\n\n") {
                    let frame: String = self.buf.drain(..end + 2).collect();
                    let mut name = String::new();
                    let mut data = String::new();
                    for line in frame.lines() {
                        if let Some(v) = line.strip_prefix("event:") {
                            name = v.trim().to_string();
                        } else if let Some(v) = line.strip_prefix("data:") {
                            data.push_str(v.trim_start());
                        }
                    }
                    if data.is_empty() {
                        continue;
                    }
                    return (name, serde_json::from_str(&data).unwrap());
                }
                let chunk = self.body.next().await.expect("stream ended").unwrap();
                self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Data of the first event satisfying `pred`.
    pub(crate) async fn until(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        loop {
            let (_, data) = self.next().await;
            if pred(&data) {
                return data;
            }
        }
    }
}
