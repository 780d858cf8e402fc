use std::time::Duration;

use kiln_core::InvocationError;
use serde::Serialize;

use super::ModelProvider;
use crate::invoker::GenerationRequest;
use crate::transport::HttpRequest;

pub const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Native Gemini `generateContent` endpoint, key passed as a URL parameter
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    id: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl GeminiProvider {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: API_BASE.to_string(),
            model: model.into(),
            temperature: 0.5,
            max_tokens: 65_536,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self, model: &str, credential: &str) -> Result<String, InvocationError> {
        let base = format!("{}/models/{}:generateContent", self.base_url, model);
        reqwest::Url::parse_with_params(&base, &[("key", credential.trim())])
            .map(|url| url.to_string())
            .map_err(|e| InvocationError::Network(format!("invalid Gemini endpoint {}: {}", base, e)))
    }
}

impl ModelProvider for GeminiProvider {
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
        let model = request.model.as_deref().unwrap_or(&self.model);

        let body = GeminiRequest {
            system_instruction: (!request.system_prompt.is_empty()).then(|| GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: request.system_prompt.clone(),
                }],
            }),
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        Ok(HttpRequest {
            url: self.endpoint(model, credential)?,
            headers: Vec::new(),
            body: serde_json::to_value(&body)
                .map_err(|e| InvocationError::Network(format!("failed to encode request: {}", e)))?,
            timeout,
        })
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    system_instruction: Option<GeminiSystemInstruction>,
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_key_in_url() {
        let provider = GeminiProvider::new("gemini", DEFAULT_MODEL);
        let request = GenerationRequest::new("You are a builder.", "Build a todo app");
        let http = provider
            .build_request("AIza+key/1", &request, Duration::from_secs(500))
            .unwrap();

        assert!(http
            .url
            .starts_with("https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key="));
        assert!(http.url.ends_with("key=AIza%2Bkey%2F1"));
        assert!(http.header("Authorization").is_none());

        assert_eq!(http.body["contents"][0]["role"], "user");
        assert_eq!(http.body["contents"][0]["parts"][0]["text"], "Build a todo app");
        assert_eq!(http.body["systemInstruction"]["parts"][0]["text"], "You are a builder.");
        assert_eq!(http.body["generationConfig"]["maxOutputTokens"], 65536);
        assert_eq!(http.body["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn test_model_override() {
        let provider = GeminiProvider::new("gemini", DEFAULT_MODEL).with_base_url("http://localhost:9/v1/");
        let request = GenerationRequest::new("", "p").with_model("gemini-2.0-pro");
        let http = provider.build_request("k", &request, Duration::from_secs(1)).unwrap();
        assert!(http.url.starts_with("http://localhost:9/v1/models/gemini-2.0-pro:generateContent"));
        assert!(http.body.get("systemInstruction").is_none());
    }
}
