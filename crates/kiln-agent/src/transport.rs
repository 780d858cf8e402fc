//! HTTP transport seam
//!
//! Providers only describe requests; the transport sends them. Tests and dry runs
//! swap in [`ScriptedTransport`].

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use kiln_core::InvocationError;
use parking_lot::Mutex;
use serde_json::Value;

/// One outbound POST with a JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Serialized body size in bytes
    pub fn body_size(&self) -> usize {
        self.body.to_string().len()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ModelTransport: Send + Sync + std::fmt::Debug {
    /// Send the request. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, InvocationError>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, InvocationError> {
        let secs = request.timeout.as_secs();
        let mut builder = self
            .http_client
            .post(&request.url)
            .timeout(request.timeout)
            .header("Content-Type", "application/json");

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = builder.json(&request.body).send().await.map_err(|e| {
            if e.is_timeout() {
                InvocationError::Timeout { secs }
            } else {
                InvocationError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                InvocationError::Timeout { secs }
            } else {
                InvocationError::Network(e.to_string())
            }
        })?;

        Ok(HttpResponse { status, body })
    }
}

/// In-memory transport that replays queued replies in order and records every
/// request it was handed.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, InvocationError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Result<HttpResponse, InvocationError>) -> &Self {
        self.replies.lock().push_back(reply);
        self
    }

    pub fn push_status(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push(Ok(HttpResponse::new(status, body)))
    }

    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        self.push(Ok(HttpResponse::json(status, &body)))
    }

    /// Queue a 200 in the Gemini response shape
    pub fn push_gemini_text(&self, text: &str) -> &Self {
        self.push_json(
            200,
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}),
        )
    }

    /// Queue a 200 in the OpenAI chat completion shape
    pub fn push_chat_text(&self, text: &str) -> &Self {
        self.push_json(
            200,
            serde_json::json!({"choices": [{"message": {"role": "assistant", "content": text}}]}),
        )
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn pending(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, InvocationError> {
        self.requests.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(InvocationError::Network("no scripted reply left".to_string())))
    }
}
