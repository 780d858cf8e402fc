//! Outbound network interception
//!
//! The sandbox is isolated: every request an artifact makes is routed here. Calls to
//! known model hosts are recorded and answered from a mock; everything else is
//! blocked.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kiln_core::ProbeError;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Hosts whose requests count as generative-model calls
pub const AI_HOSTS: &[&str] = &[
    "generativelanguage.googleapis.com",
    "moonshot.cn",
    "openai",
    "api.anthropic.com",
];

lazy_static! {
    static ref FETCH_CALL: Regex = Regex::new(r#"fetch\(\s*["'`]([^"'`]+)["'`]"#).unwrap();
    static ref METHOD_OPTION: Regex =
        Regex::new(r#"method\s*:\s*["'`](\w+)["'`]"#).unwrap();
}

pub fn is_ai_request(url: &str) -> bool {
    AI_HOSTS.iter().any(|host| url.contains(host))
}

/// A request the artifact attempted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A recorded model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// JSON-decoded body; a non-JSON body is kept as a string
    pub body: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterceptedResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Default)]
pub struct NetworkInterceptor {
    requests: RwLock<Vec<InterceptedRequest>>,
    mock: RwLock<Option<Value>>,
}

impl NetworkInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interceptor that answers model calls with `response`
    pub fn with_mock(response: Value) -> Self {
        let interceptor = Self::new();
        interceptor.mock_ai_response(response);
        interceptor
    }

    pub fn mock_ai_response(&self, response: Value) {
        *self.mock.write() = Some(response);
    }

    pub fn fetch(&self, request: OutboundRequest) -> Result<InterceptedResponse, ProbeError> {
        if !is_ai_request(&request.url) {
            debug!("Blocked outbound {} {}", request.method, request.url);
            return Err(ProbeError::NetworkBlocked(request.url));
        }

        let body = request
            .body
            .as_deref()
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())));
        info!("Intercepted AI request: {} {}", request.method, request.url);
        self.requests.write().push(InterceptedRequest {
            url: request.url.clone(),
            method: request.method,
            headers: request.headers,
            body,
            timestamp: Utc::now(),
        });

        match self.mock.read().clone() {
            Some(body) => Ok(InterceptedResponse { status: 200, body }),
            None => Err(ProbeError::NetworkBlocked(format!(
                "{} (no mock response set)",
                request.url
            ))),
        }
    }

    pub fn get_last_ai_request(&self) -> Option<InterceptedRequest> {
        self.requests.read().last().cloned()
    }

    pub fn get_all_ai_requests(&self) -> Vec<InterceptedRequest> {
        self.requests.read().clone()
    }

    /// Forget recorded requests and the mock
    pub fn clear_ai_requests(&self) {
        self.requests.write().clear();
        *self.mock.write() = None;
    }

    /// Route every literal `fetch("...")` in the scripts through the interceptor.
    ///
    /// Returns how many of them reached a model host.
    pub fn replay_artifact_fetches(&self, scripts: &str) -> usize {
        FETCH_CALL
            .captures_iter(scripts)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let url = caps.get(1)?.as_str();
                let window: String = scripts[whole.end()..].chars().take(300).collect();
                let method = METHOD_OPTION
                    .captures(&window)
                    .and_then(|m| m.get(1))
                    .map(|m| m.as_str().to_uppercase())
                    .unwrap_or_else(|| "GET".to_string());
                let request = OutboundRequest {
                    method,
                    ..OutboundRequest::get(url)
                };
                let reached_model = is_ai_request(url);
                // blocked and unmocked calls are expected here
                let _ = self.fetch(request);
                Some(reached_model)
            })
            .filter(|reached| *reached)
            .count()
    }
}
