use std::time::Duration;

use kiln_core::InvocationError;
use serde::Serialize;

use super::ModelProvider;
use crate::invoker::GenerationRequest;
use crate::transport::HttpRequest;

/// Any `/chat/completions` endpoint with bearer auth (OpenAI, Moonshot, ...)
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    id: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.3,
            max_tokens: 16_384,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// A base URL that already names the completions route is used as is
    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

impl ModelProvider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        credential: &str,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<HttpRequest, InvocationError> {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: request.system_prompt.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let body = ChatCompletionRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        Ok(HttpRequest {
            url: self.endpoint(),
            headers: vec![(
                "Authorization".to_string(),
                format!("Bearer {}", credential.trim()),
            )],
            body: serde_json::to_value(&body)
                .map_err(|e| InvocationError::Network(format!("failed to encode request: {}", e)))?,
            timeout,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}
