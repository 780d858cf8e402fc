//! Session configuration
//!
//! Loaded from TOML or JSON, then adjusted with `with_*` builders. Every delay is a
//! plain millisecond count so tests can zero them out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{KilnError, Result};

/// Default terminal marker of the artifact format
pub const DEFAULT_TERMINAL_MARKER: &str = "</html>";

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "KILN_CONFIG";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Provider used for the initial generation
    pub default_provider: Option<String>,

    /// Provider used for repair cycles (falls back to `default_provider`)
    pub repair_provider: Option<String>,

    /// Configured providers keyed by id
    pub providers: BTreeMap<String, ProviderSettings>,

    /// Retry, backoff and continuation budgets
    pub invocation: InvocationSettings,

    /// Sandbox settle delays and advisory checks
    pub executor: ExecutorSettings,

    /// Auto-repair loop budget and guardrails
    pub repair: RepairSettings,

    /// Skill collaborator locations
    pub skills: SkillSettings,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            repair_provider: None,
            providers: BTreeMap::new(),
            invocation: InvocationSettings::default(),
            executor: ExecutorSettings::default(),
            repair: RepairSettings::default(),
            skills: SkillSettings::default(),
        }
    }
}

impl KilnConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider
    pub fn with_provider(mut self, id: impl Into<String>, settings: ProviderSettings) -> Self {
        let id = id.into();
        if self.default_provider.is_none() {
            self.default_provider = Some(id.clone());
        }
        self.providers.insert(id, settings);
        self
    }

    /// Set the provider used for generation
    pub fn with_default_provider(mut self, id: impl Into<String>) -> Self {
        self.default_provider = Some(id.into());
        self
    }

    /// Set the provider used for repairs
    pub fn with_repair_provider(mut self, id: impl Into<String>) -> Self {
        self.repair_provider = Some(id.into());
        self
    }

    /// Replace the invocation settings
    pub fn with_invocation(mut self, invocation: InvocationSettings) -> Self {
        self.invocation = invocation;
        self
    }

    /// Replace the executor settings
    pub fn with_executor(mut self, executor: ExecutorSettings) -> Self {
        self.executor = executor;
        self
    }

    /// Set the repair attempt budget
    pub fn with_max_repair_attempts(mut self, max_attempts: u32) -> Self {
        self.repair.max_attempts = max_attempts;
        self
    }

    /// Zero every timer. Used by tests and dry runs.
    pub fn without_delays(mut self) -> Self {
        self.invocation.base_backoff_ms = 0;
        self.invocation.max_backoff_ms = 0;
        self.invocation.retry_hint_buffer_ms = 0;
        self.invocation.honor_retry_hint = false;
        self.executor.load_settle_ms = 0;
        self.executor.click_settle_ms = 0;
        self.executor.input_settle_ms = 0;
        self.executor.between_probes_ms = 0;
        self.executor.wait_poll_ms = 0;
        self
    }

    /// Provider id for generation
    pub fn generation_provider(&self) -> Result<&str> {
        self.default_provider
            .as_deref()
            .or_else(|| self.providers.keys().next().map(String::as_str))
            .ok_or_else(|| KilnError::Config("no provider configured".to_string()))
    }

    /// Provider id for repair
    pub fn repair_provider_id(&self) -> Result<&str> {
        match self.repair_provider.as_deref() {
            Some(id) => Ok(id),
            None => self.generation_provider(),
        }
    }

    /// Load configuration from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config: Self = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build providers from the environment when no file is given.
    ///
    /// Recognises `GEMINI_API_KEYS`/`GEMINI_API_KEY` and
    /// `OPENAI_API_KEYS`/`OPENAI_API_KEY` (+ `OPENAI_BASE_URL`, `OPENAI_MODEL`).
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(path);
        }

        let mut config = Self::default();

        let gemini_env = ["GEMINI_API_KEYS", "GEMINI_API_KEY"]
            .into_iter()
            .find(|name| std::env::var(name).map(|v| !v.trim().is_empty()).unwrap_or(false));
        if let Some(env) = gemini_env {
            config = config.with_provider(
                "gemini",
                ProviderSettings::Gemini {
                    api_keys: Vec::new(),
                    api_keys_env: Some(env.to_string()),
                    model: std::env::var("GEMINI_MODEL").ok(),
                    temperature: None,
                    max_tokens: None,
                },
            );
        }

        let openai_env = ["OPENAI_API_KEYS", "OPENAI_API_KEY"]
            .into_iter()
            .find(|name| std::env::var(name).map(|v| !v.trim().is_empty()).unwrap_or(false));
        if let Some(env) = openai_env {
            config = config.with_provider(
                "openai",
                ProviderSettings::OpenAiCompatible {
                    api_keys: Vec::new(),
                    api_keys_env: Some(env.to_string()),
                    base_url: std::env::var("OPENAI_BASE_URL")
                        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                    model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                    temperature: None,
                    max_tokens: None,
                },
            );
        }

        if config.providers.is_empty() {
            return Err(KilnError::Config(
                "No providers found. Set GEMINI_API_KEY(S), OPENAI_API_KEY(S) or KILN_CONFIG.".to_string(),
            ));
        }

        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.repair.min_size_ratio) {
            return Err(KilnError::Config(format!(
                "repair.min_size_ratio must be in [0, 1], got {}",
                self.repair.min_size_ratio
            )));
        }
        if self.invocation.max_attempts == 0 {
            return Err(KilnError::Config("invocation.max_attempts must be at least 1".into()));
        }
        if self.invocation.terminal_marker.is_empty() {
            return Err(KilnError::Config("invocation.terminal_marker must not be empty".into()));
        }
        for id in [&self.default_provider, &self.repair_provider].into_iter().flatten() {
            if !self.providers.contains_key(id) {
                return Err(KilnError::Config(format!("provider `{}` is not configured", id)));
            }
        }
        Ok(())
    }
}

/// Provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderSettings {
    Gemini {
        #[serde(default)]
        api_keys: Vec<String>,
        api_keys_env: Option<String>,
        model: Option<String>,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
    },
    OpenAiCompatible {
        #[serde(default)]
        api_keys: Vec<String>,
        api_keys_env: Option<String>,
        base_url: String,
        model: String,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
    },
}

impl ProviderSettings {
    /// Convenience constructor for a Gemini pool
    pub fn gemini(keys: Vec<String>) -> Self {
        Self::Gemini {
            api_keys: keys,
            api_keys_env: None,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Convenience constructor for an OpenAI-compatible pool
    pub fn openai_compatible(
        keys: Vec<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self::OpenAiCompatible {
            api_keys: keys,
            api_keys_env: None,
            base_url: base_url.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Inline keys, or the comma-separated keys in `api_keys_env`
    pub fn resolve_keys(&self) -> Vec<String> {
        let (inline, env) = match self {
            Self::Gemini { api_keys, api_keys_env, .. } => (api_keys, api_keys_env),
            Self::OpenAiCompatible { api_keys, api_keys_env, .. } => (api_keys, api_keys_env),
        };

        if !inline.is_empty() {
            return inline.clone();
        }

        env.as_ref()
            .and_then(|name| std::env::var(name).ok())
            .map(|value| {
                value
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Model invocation budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationSettings {
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Backoff rounds before surfacing `RateLimited`
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Honor "retry in Xs" hints found in rate-limit payloads
    pub honor_retry_hint: bool,
    pub retry_hint_buffer_ms: u64,
    pub max_continuations: u32,
    pub continuation_tail_chars: usize,
    pub terminal_marker: String,
}

impl Default for InvocationSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 500,
            max_attempts: 5,
            base_backoff_ms: 5_000,
            max_backoff_ms: 120_000,
            honor_retry_hint: true,
            retry_hint_buffer_ms: 1_500,
            max_continuations: 3,
            continuation_tail_chars: 500,
            terminal_marker: DEFAULT_TERMINAL_MARKER.to_string(),
        }
    }
}

/// When the advisory AI-integration checks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiCheckMode {
    Off,
    /// Only when the artifact talks to a known model host
    Auto,
    Always,
}

/// Sandbox timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub load_settle_ms: u64,
    pub click_settle_ms: u64,
    pub input_settle_ms: u64,
    pub between_probes_ms: u64,
    pub wait_for_timeout_ms: u64,
    pub wait_poll_ms: u64,
    pub ai_checks: AiCheckMode,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            load_settle_ms: 200,
            click_settle_ms: 100,
            input_settle_ms: 50,
            between_probes_ms: 50,
            wait_for_timeout_ms: 3_000,
            wait_poll_ms: 100,
            ai_checks: AiCheckMode::Auto,
        }
    }
}

/// Auto-repair loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
    pub max_attempts: u32,
    /// A repair smaller than this fraction of the live artifact is rejected
    pub min_size_ratio: f64,
    /// Skills attached to a diagnostic prompt
    pub max_skills: usize,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_size_ratio: 0.7,
            max_skills: 4,
        }
    }
}

/// Skill collaborator locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillSettings {
    pub project_dir: String,
    pub library_dir: Option<String>,
    pub bridge_url: Option<String>,
}

impl Default for SkillSettings {
    fn default() -> Self {
        Self {
            project_dir: ".agent/skills".to_string(),
            library_dir: None,
            bridge_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_budgets() {
        let config = KilnConfig::default();
        assert_eq!(config.invocation.max_attempts, 5);
        assert_eq!(config.invocation.request_timeout_secs, 500);
        assert_eq!(config.invocation.terminal_marker, "</html>");
        assert_eq!(config.repair.max_attempts, 3);
        assert!((config.repair.min_size_ratio - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.executor.click_settle_ms, 100);
    }

    #[test]
    fn test_first_provider_becomes_default() {
        let config = KilnConfig::new()
            .with_provider("gemini", ProviderSettings::gemini(vec!["k1".into()]))
            .with_provider("openai", ProviderSettings::openai_compatible(vec![], "http://x", "m"));

        assert_eq!(config.generation_provider().unwrap(), "gemini");
        assert_eq!(config.repair_provider_id().unwrap(), "gemini");

        let config = config.with_repair_provider("openai");
        assert_eq!(config.repair_provider_id().unwrap(), "openai");
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        std::fs::write(
            &path,
            r#"
default_provider = "gemini"

[providers.gemini]
type = "gemini"
api_keys = ["a", "b"]

[repair]
max_attempts = 5
"#,
        )
        .unwrap();

        let config = KilnConfig::from_file(&path).unwrap();
        assert_eq!(config.repair.max_attempts, 5);
        assert_eq!(config.providers["gemini"].resolve_keys(), vec!["a", "b"]);
        // untouched sections keep their defaults
        assert_eq!(config.invocation.max_continuations, 3);
    }

    #[test]
    fn test_validate_rejects_unknown_default() {
        let config = KilnConfig::new().with_default_provider("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keys_from_env_are_split() {
        std::env::set_var("KILN_TEST_KEYS_SPLIT", "k1, k2 ,,k3");
        let settings = ProviderSettings::Gemini {
            api_keys: vec![],
            api_keys_env: Some("KILN_TEST_KEYS_SPLIT".into()),
            model: None,
            temperature: None,
            max_tokens: None,
        };
        assert_eq!(settings.resolve_keys(), vec!["k1", "k2", "k3"]);
    }
}
