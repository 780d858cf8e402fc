pub mod gemini;
pub mod openai_compatible;

use std::time::Duration;

use kiln_core::{InvocationError, ProviderSettings};
use serde_json::Value;

use crate::invoker::GenerationRequest;
use crate::transport::HttpRequest;

pub use gemini::GeminiProvider;
pub use openai_compatible::OpenAiCompatibleProvider;

/// Describes how one provider family frames a generation request.
///
/// Providers never talk to the network; the invoker hands the built request to a
/// [`ModelTransport`](crate::transport::ModelTransport).
pub trait ModelProvider: Send + Sync + std::fmt::Debug {
    /// Provider id as configured
    fn id(&self) -> &str;

    /// Default model name
    fn model(&self) -> &str;

    /// Frame `request` for this provider, authenticated with `credential`
    fn build_request(
        &self,
        credential: &str,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<HttpRequest, InvocationError>;

    /// Extract the completion text from a 2xx body
    fn parse_response(&self, body: &str) -> Result<String, InvocationError> {
        parse_completion(body)
    }
}

/// Accepts the OpenAI shape (`choices[0].message.content`), the Gemini shape
/// (`candidates[0].content.parts[*].text`) and the legacy bare-string candidate.
pub fn parse_completion(body: &str) -> Result<String, InvocationError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| InvocationError::EmptyResponse(format!("response is not JSON: {}", e)))?;

    if let Some(content) = json.pointer("/choices/0/message/content").and_then(Value::as_str) {
        return non_empty(content);
    }

    if let Some(parts) = json.pointer("/candidates/0/content/parts").and_then(Value::as_array) {
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        return non_empty(&text);
    }

    if let Some(text) = json.pointer("/candidates/0").and_then(Value::as_str) {
        return non_empty(text);
    }

    Err(InvocationError::EmptyResponse(
        error_text(&json).unwrap_or_else(|| truncate(&json.to_string(), 300)),
    ))
}

fn non_empty(text: &str) -> Result<String, InvocationError> {
    if text.trim().is_empty() {
        Err(InvocationError::EmptyResponse("empty completion".to_string()))
    } else {
        Ok(text.to_string())
    }
}

fn error_text(json: &Value) -> Option<String> {
    json.pointer("/error/message")
        .or_else(|| json.get("msg"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Human-readable error from a non-2xx body
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| error_text(&json))
        .unwrap_or_else(|| truncate(body.trim(), 300))
}

fn truncate(text: &str, max_chars: usize) -> String {
    kiln_core::text::head_chars(text, max_chars).to_string()
}

/// Build a provider from its configured settings
pub fn from_settings(id: &str, settings: &ProviderSettings) -> Box<dyn ModelProvider> {
    match settings {
        ProviderSettings::Gemini {
            model,
            temperature,
            max_tokens,
            ..
        } => {
            let mut provider = GeminiProvider::new(
                id,
                model.clone().unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string()),
            );
            if let Some(temperature) = temperature {
                provider = provider.with_temperature(*temperature);
            }
            if let Some(max_tokens) = max_tokens {
                provider = provider.with_max_tokens(*max_tokens);
            }
            Box::new(provider)
        }
        ProviderSettings::OpenAiCompatible {
            base_url,
            model,
            temperature,
            max_tokens,
            ..
        } => {
            let mut provider = OpenAiCompatibleProvider::new(id, base_url.as_str(), model.as_str());
            if let Some(temperature) = temperature {
                provider = provider.with_temperature(*temperature);
            }
            if let Some(max_tokens) = max_tokens {
                provider = provider.with_max_tokens(*max_tokens);
            }
            Box::new(provider)
        }
    }
}
