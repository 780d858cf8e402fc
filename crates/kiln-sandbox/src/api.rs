//! Probe API
//!
//! The surface self-registered suites drive: actions with settle delays, queries,
//! storage access, assertions and the network interceptor.

use std::time::{Duration, Instant};

use kiln_core::sandbox::{ElementSnapshot, Sandbox, SandboxAction};
use kiln_core::{ExecutorSettings, ProbeError};
use serde_json::Value;
use tracing::debug;

use crate::interceptor::{InterceptedResponse, NetworkInterceptor, OutboundRequest};

type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// JavaScript `==` on JSON values
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            let s = s.trim();
            let parsed = if s.is_empty() { Some(0.0) } else { s.parse::<f64>().ok() };
            parsed.is_some() && parsed == n.as_f64()
        }
        (Value::Bool(flag), other) | (other, Value::Bool(flag)) if !other.is_boolean() => {
            let as_number = Value::from(if *flag { 1 } else { 0 });
            loose_eq(&as_number, other)
        }
        _ => a == b,
    }
}

pub struct ProbeApi<'a> {
    sandbox: &'a mut dyn Sandbox,
    interceptor: &'a NetworkInterceptor,
    settings: &'a ExecutorSettings,
}

impl std::fmt::Debug for ProbeApi<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeApi")
            .field("loaded", &self.sandbox.is_loaded())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<'a> ProbeApi<'a> {
    pub fn new(
        sandbox: &'a mut dyn Sandbox,
        interceptor: &'a NetworkInterceptor,
        settings: &'a ExecutorSettings,
    ) -> Self {
        Self {
            sandbox,
            interceptor,
            settings,
        }
    }

    pub fn sandbox(&self) -> &dyn Sandbox {
        &*self.sandbox
    }

    pub fn interceptor(&self) -> &NetworkInterceptor {
        self.interceptor
    }

    fn find(&self, selector: &str) -> ProbeResult<ElementSnapshot> {
        self.sandbox
            .query_first(selector)?
            .ok_or_else(|| ProbeError::ElementNotFound(selector.to_string()))
    }

    async fn settle(ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    // Actions

    pub async fn click(&mut self, selector: &str) -> ProbeResult<()> {
        let target = self.find(selector)?.handle;
        debug!("click {}", selector);
        self.sandbox.dispatch(&SandboxAction::Click { target })?;
        Self::settle(self.settings.click_settle_ms).await;
        Ok(())
    }

    pub async fn type_text(&mut self, selector: &str, text: &str) -> ProbeResult<()> {
        let target = self.find(selector)?.handle;
        self.sandbox.dispatch(&SandboxAction::SetValue {
            target,
            value: text.to_string(),
        })?;
        Self::settle(self.settings.input_settle_ms).await;
        Ok(())
    }

    pub async fn select(&mut self, selector: &str, value: &str) -> ProbeResult<()> {
        let target = self.find(selector)?.handle;
        self.sandbox.dispatch(&SandboxAction::SelectOption {
            target,
            value: value.to_string(),
        })?;
        Self::settle(self.settings.input_settle_ms).await;
        Ok(())
    }

    pub async fn wait(&self, ms: u64) {
        Self::settle(ms).await;
    }

    /// Poll until `selector` matches or the timeout elapses
    pub async fn wait_for(&self, selector: &str, timeout_ms: Option<u64>) -> ProbeResult<()> {
        let timeout = timeout_ms.unwrap_or(self.settings.wait_for_timeout_ms);
        let started = Instant::now();
        loop {
            if self.sandbox.exists(selector)? {
                return Ok(());
            }
            if started.elapsed() >= Duration::from_millis(timeout) {
                return Err(ProbeError::Timeout {
                    target: selector.to_string(),
                    ms: timeout,
                });
            }
            if self.settings.wait_poll_ms > 0 {
                Self::settle(self.settings.wait_poll_ms).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    // Queries

    pub fn get_value(&self, selector: &str) -> ProbeResult<String> {
        Ok(self.find(selector)?.value.unwrap_or_default())
    }

    pub fn get_text(&self, selector: &str) -> ProbeResult<String> {
        Ok(self.find(selector)?.text_trimmed().to_string())
    }

    /// A missing element is not visible
    pub fn is_visible(&self, selector: &str) -> ProbeResult<bool> {
        Ok(self
            .sandbox
            .query_first(selector)?
            .map(|el| el.visible)
            .unwrap_or(false))
    }

    pub fn count(&self, selector: &str) -> ProbeResult<usize> {
        self.sandbox.count(selector)
    }

    pub fn exists(&self, selector: &str) -> ProbeResult<bool> {
        self.sandbox.exists(selector)
    }

    // Storage

    /// Stored value, JSON-decoded when possible
    pub fn check_storage(&self, key: &str) -> Option<Value> {
        self.sandbox
            .read_storage(key)
            .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }

    pub fn set_storage(&mut self, key: &str, value: &Value) {
        let encoded = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.sandbox.write_storage(key, encoded);
    }

    // Assertions

    pub fn assert_ok(&self, condition: bool, message: &str) -> ProbeResult<()> {
        if condition {
            Ok(())
        } else {
            Err(ProbeError::AssertionFailed(message.to_string()))
        }
    }

    pub fn assert_equal(&self, actual: &Value, expected: &Value, message: &str) -> ProbeResult<()> {
        self.assert_ok(
            loose_eq(actual, expected),
            &format!("{} (expected {}, got {})", message, expected, actual),
        )
    }

    pub fn assert_not_equal(
        &self,
        actual: &Value,
        unexpected: &Value,
        message: &str,
    ) -> ProbeResult<()> {
        self.assert_ok(
            !loose_eq(actual, unexpected),
            &format!("{} (got {})", message, actual),
        )
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> ProbeResult<()> {
        let text = self.get_text(selector)?;
        self.assert_ok(
            text.contains(expected),
            &format!("{} text `{}` does not contain `{}`", selector, text, expected),
        )
    }

    pub fn assert_attribute(&self, selector: &str, name: &str, expected: &str) -> ProbeResult<()> {
        let el = self.find(selector)?;
        let actual = el.attr(name).unwrap_or("");
        self.assert_ok(
            actual == expected,
            &format!("{} [{}] is `{}`, expected `{}`", selector, name, actual, expected),
        )
    }

    pub fn assert_property(&self, selector: &str, name: &str, expected: &Value) -> ProbeResult<()> {
        let el = self.find(selector)?;
        let actual = el.property(name).unwrap_or(Value::Null);
        self.assert_equal(&actual, expected, &format!("{}.{}", selector, name))
    }

    pub fn assert_visible(&self, selector: &str) -> ProbeResult<()> {
        let visible = self.is_visible(selector)?;
        self.assert_ok(visible, &format!("{} is not visible", selector))
    }

    pub fn assert_class_contains(&self, selector: &str, class_name: &str) -> ProbeResult<()> {
        let el = self.find(selector)?;
        self.assert_ok(
            el.has_class(class_name),
            &format!("{} has no class `{}`", selector, class_name),
        )
    }

    // Network

    pub fn mock_ai_response(&self, response: Value) {
        self.interceptor.mock_ai_response(response);
    }

    pub fn fetch(&self, request: OutboundRequest) -> ProbeResult<InterceptedResponse> {
        self.interceptor.fetch(request)
    }
}
