//! Kiln Agent - model invocation and the auto-repair loop
//!
//! Two layers sit on top of `kiln-core` and `kiln-sandbox`:
//!
//! 1. **Invocation** (`invoker`): per-provider credential pools, rate-limit rotation,
//!    exponential backoff and continuation of truncated output
//! 2. **Orchestration** (`orchestrator`): the generate → test → repair state machine,
//!    with every repair candidate filtered through the core guardrail
//!
//! Providers speak through a [`ModelTransport`]. [`HttpTransport`] talks to the real
//! endpoints and [`ScriptedTransport`] replays canned replies, which is how the whole
//! loop runs offline:
//!
//! ```
//! use std::sync::Arc;
//! use kiln_agent::{GenerationRequest, ModelInvoker, ScriptedTransport};
//! use kiln_agent::providers::gemini::GeminiProvider;
//! use kiln_core::InvocationSettings;
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(ScriptedTransport::new());
//! transport.push_gemini_text("<!DOCTYPE html><html><body>ok</body></html>");
//!
//! let invoker = ModelInvoker::new(InvocationSettings::default(), transport.clone())
//!     .with_provider(Box::new(GeminiProvider::new("gemini", "gemini-2.5-flash")), vec!["key-1".into()]);
//!
//! let generation = invoker.generate(&GenerationRequest::new("system", "build it")).await.unwrap();
//! assert!(generation.artifact.is_complete());
//! assert_eq!(generation.continuations, 0);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod credentials;
pub mod invoker;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod skills;
pub mod transport;

pub use credentials::{CredentialPool, ModelCredential};
pub use invoker::{Completion, Generation, GenerationRequest, ModelInvoker};
pub use orchestrator::{
    ActionError, ManualAction, Phase, RepairOrchestrator, RepairRecord, SessionOutcome, SessionStats,
};
pub use providers::ModelProvider;
pub use skills::{BridgeSkillSource, FsSkillSource, SkillError, SkillSource, SkillSummary};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ModelTransport, ScriptedTransport};
