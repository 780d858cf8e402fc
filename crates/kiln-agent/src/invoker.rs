//! Model Invocation Layer
//!
//! `invoke` issues one generation request against a provider's credential pool:
//!
//! - a rate-limited credential rotates to the next one right away; once every usable
//!   credential was rate-limited in the same round the invoker backs off, honoring a
//!   "retry in Xs" hint when the payload has one
//! - a rejected credential is marked invalid for the session and rotated away from
//! - network faults, timeouts and 5xx responses back off and retry the same credential
//!
//! `generate` wraps `invoke` with truncation continuation: it keeps asking the model
//! to resume until the terminal marker shows up or the continuation budget runs out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_core::text::{overlap_len, strip_leading_fence, strip_think_blocks, tail_chars};
use kiln_core::{CandidateArtifact, InvocationError, InvocationSettings, KilnConfig, SessionLog};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::credentials::CredentialPool;
use crate::prompts;
use crate::providers::{self, error_message, ModelProvider};
use crate::transport::ModelTransport;

const MODULE: &str = "model";

/// Request bodies above this size are logged as a transfer risk
pub const LARGE_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Shorter overlaps between a continuation chunk and the artifact tail are
/// treated as coincidence, not a repeated prefix.
const MIN_OVERLAP_BYTES: usize = 20;

lazy_static! {
    static ref RETRY_IN: Regex = Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)s").unwrap();
    static ref RETRY_DELAY: Regex = Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).unwrap();
}

/// Server-suggested wait found in a rate-limit payload
pub fn retry_hint(body: &str) -> Option<Duration> {
    let caps = RETRY_IN.captures(body).or_else(|| RETRY_DELAY.captures(body))?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_millis((secs * 1000.0).ceil() as u64))
}

/// 400 `API_KEY_INVALID`, 401 and 403 all mean the credential itself is bad
pub fn is_invalid_credential(status: u16, body: &str) -> bool {
    matches!(status, 401 | 403) || (status == 400 && body.contains("API_KEY_INVALID"))
}

/// A single generation request. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub prompt: String,
    /// Provider id; the invoker's default when `None`
    pub provider_id: Option<String>,
    /// Model override for this request
    pub model: Option<String>,
    /// Continuation budget override for this request
    pub max_continuations: Option<u32>,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            provider_id: None,
            model: None,
            max_continuations: None,
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_continuations(mut self, max_continuations: u32) -> Self {
        self.max_continuations = Some(max_continuations);
        self
    }

    /// Same provider, model and system prompt with a new user prompt
    pub fn continuation(&self, prompt: String) -> Self {
        Self {
            prompt,
            ..self.clone()
        }
    }
}

/// Text returned by one successful invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub provider_id: String,
    pub credential_index: usize,
    /// Masked credential fingerprint
    pub credential: String,
    /// HTTP requests issued, including rotations and retries
    pub requests: u32,
    pub elapsed_ms: u64,
}

/// Artifact produced by a first response plus its continuations
#[derive(Debug, Clone)]
pub struct Generation {
    pub artifact: CandidateArtifact,
    pub continuations: u32,
    pub provider_id: String,
}

#[derive(Debug)]
struct ProviderSlot {
    provider: Box<dyn ModelProvider>,
    pool: Mutex<CredentialPool>,
}

#[derive(Debug)]
pub struct ModelInvoker {
    settings: InvocationSettings,
    transport: Arc<dyn ModelTransport>,
    slots: BTreeMap<String, ProviderSlot>,
    default_provider: Option<String>,
    log: Arc<SessionLog>,
}

impl ModelInvoker {
    pub fn new(settings: InvocationSettings, transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            settings,
            transport,
            slots: BTreeMap::new(),
            default_provider: None,
            log: Arc::new(SessionLog::new()),
        }
    }

    /// Register every configured provider with its resolved keys
    pub fn from_config(config: &KilnConfig, transport: Arc<dyn ModelTransport>) -> Self {
        let mut invoker = Self::new(config.invocation.clone(), transport);
        for (id, settings) in &config.providers {
            invoker = invoker.with_provider(providers::from_settings(id, settings), settings.resolve_keys());
        }
        if let Ok(id) = config.generation_provider() {
            invoker.default_provider = Some(id.to_string());
        }
        invoker
    }

    /// Register a provider; the first one becomes the default
    pub fn with_provider(mut self, provider: Box<dyn ModelProvider>, keys: Vec<String>) -> Self {
        let id = provider.id().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(id.clone());
        }
        let pool = CredentialPool::new(id.clone(), keys);
        self.slots.insert(
            id,
            ProviderSlot {
                provider,
                pool: Mutex::new(pool),
            },
        );
        self
    }

    pub fn with_log(mut self, log: Arc<SessionLog>) -> Self {
        self.log = log;
        self
    }

    pub fn settings(&self) -> &InvocationSettings {
        &self.settings
    }

    pub fn log(&self) -> &Arc<SessionLog> {
        &self.log
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Snapshot of a provider's credential pool
    pub fn pool(&self, provider_id: &str) -> Option<CredentialPool> {
        self.slots.get(provider_id).map(|slot| slot.pool.lock().clone())
    }

    fn slot(&self, request: &GenerationRequest) -> Result<(&str, &ProviderSlot), InvocationError> {
        let id = request
            .provider_id
            .as_deref()
            .or(self.default_provider.as_deref())
            .ok_or_else(|| InvocationError::UnknownProvider("(none configured)".to_string()))?;
        self.slots
            .get_key_value(id)
            .map(|(id, slot)| (id.as_str(), slot))
            .ok_or_else(|| InvocationError::UnknownProvider(id.to_string()))
    }

    fn backoff_delay(&self, round: u32) -> Duration {
        let exponent = round.saturating_sub(1).min(20);
        let ms = self
            .settings
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.settings.max_backoff_ms);
        Duration::from_millis(ms)
    }

    fn rate_limit_delay(&self, body: &str, round: u32) -> Duration {
        if self.settings.honor_retry_hint {
            if let Some(hint) = retry_hint(body) {
                return hint + Duration::from_millis(self.settings.retry_hint_buffer_ms);
            }
        }
        self.backoff_delay(round)
    }

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Issue one generation request, rotating credentials and backing off as needed
    pub async fn invoke(&self, request: &GenerationRequest) -> Result<Completion, InvocationError> {
        let (provider_id, slot) = self.slot(request)?;
        let timeout = Duration::from_secs(self.settings.request_timeout_secs);
        let started = Instant::now();

        let mut rate_limited: BTreeSet<usize> = BTreeSet::new();
        let mut backoffs: u32 = 0;
        let mut requests: u32 = 0;

        loop {
            let (index, credential) = {
                let pool = slot.pool.lock();
                let credential = pool.current()?.clone();
                (pool.current_index(), credential)
            };
            let fingerprint = credential.fingerprint();

            let http = slot.provider.build_request(&credential.key, request, timeout)?;
            let body_size = http.body_size();
            if body_size > LARGE_BODY_BYTES {
                warn!(provider = %provider_id, body_size, "Large request body, transfer may time out");
                self.log.warn(
                    MODULE,
                    format!("Request body is {:.2} MB, transfer may time out", body_size as f64 / (1024.0 * 1024.0)),
                );
            }

            requests += 1;
            let attempt_started = Instant::now();
            let result = self.transport.send(http).await;
            let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

            let failure = match result {
                Ok(response) if response.is_success() => {
                    let text = match slot.provider.parse_response(&response.body) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(provider = %provider_id, credential = %fingerprint, elapsed_ms, "Unusable response: {}", err);
                            self.log.error(MODULE, format!("{} returned no usable content: {}", provider_id, err));
                            return Err(err);
                        }
                    };
                    info!(
                        provider = %provider_id,
                        credential = %fingerprint,
                        attempt = requests,
                        elapsed_ms,
                        chars = text.len(),
                        "Model response received"
                    );
                    self.log.success(
                        MODULE,
                        format!(
                            "{} responded in {} ms with key #{} ({} chars)",
                            provider_id,
                            elapsed_ms,
                            index + 1,
                            text.len()
                        ),
                    );
                    return Ok(Completion {
                        text,
                        provider_id: provider_id.to_string(),
                        credential_index: index,
                        credential: fingerprint,
                        requests,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Ok(response) if response.status == 429 => {
                    rate_limited.insert(index);
                    let (next, valid) = {
                        let mut pool = slot.pool.lock();
                        (pool.rotate(), pool.valid_count())
                    };
                    warn!(provider = %provider_id, credential = %fingerprint, attempt = requests, elapsed_ms, "Rate limited");

                    if rate_limited.len() < valid {
                        self.log.warn(
                            MODULE,
                            format!("Rate limited on key #{}, rotating to key #{}", index + 1, next + 1),
                        );
                        continue;
                    }

                    backoffs += 1;
                    if backoffs >= self.settings.max_attempts {
                        self.log.error(
                            MODULE,
                            format!("{} still rate limited after {} attempts", provider_id, backoffs),
                        );
                        return Err(InvocationError::RateLimited {
                            provider: provider_id.to_string(),
                            attempts: backoffs,
                        });
                    }

                    let delay = self.rate_limit_delay(&response.body, backoffs);
                    self.log.warn(
                        MODULE,
                        format!("Rate limited (429), retrying in {:.1}s", delay.as_secs_f64()),
                    );
                    rate_limited.clear();
                    Self::pause(delay).await;
                    continue;
                }
                Ok(response) if is_invalid_credential(response.status, &response.body) => {
                    warn!(provider = %provider_id, credential = %fingerprint, status = response.status, "Credential rejected");
                    self.log.error(
                        MODULE,
                        format!("Key #{} rejected by {} (HTTP {})", index + 1, provider_id, response.status),
                    );
                    rate_limited.remove(&index);
                    let mut pool = slot.pool.lock();
                    pool.mark_invalid(index);
                    if pool.valid_count() == 0 {
                        return Err(pool.exhausted());
                    }
                    let next = pool.rotate();
                    drop(pool);
                    self.log.warn(MODULE, format!("Trying key #{}", next + 1));
                    continue;
                }
                Ok(response) => InvocationError::Http {
                    status: response.status,
                    body: error_message(&response.body),
                },
                Err(err) => err,
            };

            if !failure.is_retryable() {
                warn!(provider = %provider_id, credential = %fingerprint, elapsed_ms, "Invocation failed: {}", failure);
                self.log.error(MODULE, format!("{} request failed: {}", provider_id, failure));
                return Err(failure);
            }

            backoffs += 1;
            if backoffs >= self.settings.max_attempts {
                self.log.error(
                    MODULE,
                    format!("{} request failed after {} attempts: {}", provider_id, backoffs, failure),
                );
                return Err(failure);
            }
            let delay = self.backoff_delay(backoffs);
            warn!(
                provider = %provider_id,
                credential = %fingerprint,
                attempt = requests,
                elapsed_ms,
                delay_ms = delay.as_millis() as u64,
                "Transient failure: {}",
                failure
            );
            self.log.warn(
                MODULE,
                format!("{}; retrying in {:.1}s", failure, delay.as_secs_f64()),
            );
            Self::pause(delay).await;
        }
    }

    /// Generate a complete artifact, issuing continuation requests while the
    /// terminal marker is missing.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Generation, InvocationError> {
        let budget = request
            .max_continuations
            .unwrap_or(self.settings.max_continuations);

        let first = self.invoke(request).await?;
        let provider_id = first.provider_id.clone();
        let mut artifact = CandidateArtifact::empty(self.settings.terminal_marker.clone());
        artifact.append(&strip_think_blocks(&first.text));

        let mut continuations = 0;
        while !artifact.is_complete() {
            if continuations >= budget {
                self.log.error(
                    MODULE,
                    format!(
                        "Output still truncated after {} continuations ({} bytes)",
                        continuations,
                        artifact.size_bytes()
                    ),
                );
                return Err(InvocationError::IncompleteGeneration {
                    continuations,
                    size_bytes: artifact.size_bytes(),
                });
            }
            continuations += 1;

            let tail = tail_chars(artifact.content(), self.settings.continuation_tail_chars);
            let window = tail.len();
            let follow_up = request.continuation(prompts::continuation_prompt(tail));
            info!(
                provider = %provider_id,
                continuation = continuations,
                size_bytes = artifact.size_bytes(),
                "Terminal marker missing, requesting continuation"
            );
            self.log.warn(
                MODULE,
                format!(
                    "Output truncated at {} bytes, continuation {}/{}",
                    artifact.size_bytes(),
                    continuations,
                    budget
                ),
            );

            let chunk = self.invoke(&follow_up).await?;
            let chunk = strip_leading_fence(&strip_think_blocks(&chunk.text));
            let overlap = overlap_len(artifact.content(), &chunk, window);
            let skip = if overlap >= MIN_OVERLAP_BYTES { overlap } else { 0 };
            if skip > 0 {
                debug!(overlap = skip, "Dropping repeated prefix from continuation");
            }
            artifact.append(&chunk[skip..]);
        }

        if continuations > 0 {
            self.log.success(
                MODULE,
                format!("Output completed after {} continuations", continuations),
            );
        }

        Ok(Generation {
            artifact,
            continuations,
            provider_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_hint_formats() {
        assert_eq!(
            retry_hint("Quota exceeded. Please retry in 40.772213184s."),
            Some(Duration::from_millis(40_773))
        );
        assert_eq!(
            retry_hint(r#"{"details": [{"retryDelay": "12s"}]}"#),
            Some(Duration::from_secs(12))
        );
        assert_eq!(retry_hint("slow down"), None);
    }

    #[test]
    fn test_invalid_credential_statuses() {
        assert!(is_invalid_credential(400, r#"{"error": {"details": [{"reason": "API_KEY_INVALID"}]}}"#));
        assert!(!is_invalid_credential(400, "bad request"));
        assert!(is_invalid_credential(401, ""));
        assert!(is_invalid_credential(403, ""));
        assert!(!is_invalid_credential(429, ""));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let settings = InvocationSettings {
            base_backoff_ms: 5_000,
            max_backoff_ms: 30_000,
            ..InvocationSettings::default()
        };
        let invoker = ModelInvoker::new(settings, Arc::new(crate::transport::ScriptedTransport::new()));
        assert_eq!(invoker.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(invoker.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(invoker.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(invoker.backoff_delay(4), Duration::from_secs(30));
        assert_eq!(
            invoker.rate_limit_delay("retry in 2s", 1),
            Duration::from_millis(3_500)
        );
    }

    #[test]
    fn test_continuation_keeps_request_shape() {
        let request = GenerationRequest::new("sys", "build")
            .with_provider("gemini")
            .with_model("gemini-2.5-flash");
        let follow_up = request.continuation("resume".into());
        assert_eq!(follow_up.system_prompt, "sys");
        assert_eq!(follow_up.provider_id.as_deref(), Some("gemini"));
        assert_eq!(follow_up.prompt, "resume");
    }
}
