//! Scripted in-process transport and token helpers for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::ClientError;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Build an unsigned JWT-shaped token carrying `uid` and `username`.
pub fn token(uid: i64, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({ "uid": uid, "username": username, "role": "user" });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

pub fn config() -> Config {
    Config::new("http://gateway.test")
}

/// Clock that only moves when told to, independent of the tokio timer.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A canned reply, optionally delayed.
#[derive(Debug, Clone)]
pub struct Reply {
    delay: Duration,
    outcome: Outcome,
}

#[derive(Debug, Clone)]
enum Outcome {
    Respond(ApiResponse),
    NetworkError,
}

impl Reply {
    pub fn status(status: StatusCode) -> Self {
        Self::json(status, serde_json::json!({}))
    }

    pub fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Outcome::Respond(ApiResponse::new(status, body.to_string())),
        }
    }

    pub fn ok() -> Self {
        Self::status(StatusCode::OK)
    }

    /// A successful `/api/refresh` answer carrying `token` without prefix.
    pub fn refreshed(token: &str) -> Self {
        Self::json(StatusCode::OK, serde_json::json!({ "access_token": token }))
    }

    pub fn network_error() -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Outcome::NetworkError,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Recorded call: path plus the `Authorization` header it carried.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// Transport answering from per-path reply queues. The last reply of a queue
/// repeats; unscripted paths answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, path: &str, replies: Vec<Reply>) {
        self.replies
            .lock()
            .insert(path.to_string(), replies.into_iter().collect());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls_to(path).len()
    }

    fn next_reply(&self, path: &str) -> Reply {
        let mut replies = self.replies.lock();
        match replies.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(Reply::ok),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Reply::status(StatusCode::NOT_FOUND)),
            None => Reply::status(StatusCode::NOT_FOUND),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        authorization: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        self.calls.lock().push(Call {
            path: request.path.clone(),
            authorization: authorization.map(str::to_string),
            body: request.body.clone(),
        });
        let reply = self.next_reply(&request.path);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        match reply.outcome {
            Outcome::Respond(resp) => Ok(resp),
            Outcome::NetworkError => Err(ClientError::Network("connection refused".into())),
        }
    }
}
