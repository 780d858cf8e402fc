//! Error types for Kiln Core
//!
//! Every failure the pipeline can meet is converted into one of the kinds below.
//! We use `thiserror` for the Display/Error implementations; the kinds map onto the
//! recovery policy: transport faults are retried, budget exhaustion is terminal.

use thiserror::Error;

/// Result type alias for Kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;

/// Main error type for Kiln operations
#[derive(Error, Debug)]
pub enum KilnError {
    /// Model invocation errors
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    /// Probe execution errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Repair candidate rejected
    #[error("Repair rejected: {0}")]
    Repair(#[from] RepairError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Specification document could not be interpreted
    #[error("Specification error: {0}")]
    Spec(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<KilnError>,
    },
}

/// Errors raised while talking to a model provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Provider returned no usable content: {0}")]
    EmptyResponse(String),

    #[error("Rate limited by {provider} after {attempts} backoff attempts")]
    RateLimited { provider: String, attempts: u32 },

    #[error("Credential {fingerprint} rejected by provider")]
    InvalidCredential { fingerprint: String },

    #[error("All {pool_size} credentials for {provider} are exhausted")]
    AllCredentialsExhausted { provider: String, pool_size: usize },

    #[error("Truncated output: still incomplete after {continuations} continuations ({size_bytes} bytes)")]
    IncompleteGeneration { continuations: u32, size_bytes: usize },

    #[error("No credentials configured for provider {0}")]
    MissingCredentials(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl InvocationError {
    /// Transport faults that deserve another try with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether a retry budget (credentials, backoff, continuations) ran out
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::AllCredentialsExhausted { .. }
                | Self::IncompleteGeneration { .. }
                | Self::MissingCredentials(_)
                | Self::UnknownProvider(_)
        )
    }
}

/// Errors raised by a single probe. They never abort a test run: the executor
/// downgrades them to skipped entries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timed out after {ms}ms waiting for {target}")]
    Timeout { target: String, ms: u64 },

    #[error("Outbound request blocked by sandbox: {0}")]
    NetworkBlocked(String),

    #[error("No document loaded in sandbox")]
    NotLoaded,

    #[error("Sandbox fault: {0}")]
    Sandbox(String),
}

/// Why a repair candidate was discarded. The attempt still counts and the live
/// artifact is kept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepairError {
    #[error("Response contains no recognizable document")]
    UnextractableArtifact,

    #[error("Response is missing the terminal marker `{marker}`")]
    MissingTerminalMarker { marker: String },

    #[error("Suspected regression: repair is {:.0}% of the live artifact (minimum {:.0}%)", .ratio * 100.0, .min_ratio * 100.0)]
    SuspectedRegression { ratio: f64, min_ratio: f64 },
}

impl KilnError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}
