//! Kiln Core - data model and rules for the generate → test → repair loop
//!
//! Kiln treats a generative model as an unreliable producer of runnable web
//! artifacts. This crate holds everything that does not touch the network or a
//! document engine:
//!
//! 1. **Specification** (`spec`): immutable spec text plus extracted requirements
//! 2. **Compiler** (`compiler`): deterministic spec → probe descriptors
//! 3. **Sandbox contract** (`sandbox`): what an executor must expose to probes
//! 4. **Reports** (`probe`): probe results and the aggregated test report
//! 5. **Guardrails** (`guardrail`): rejects repairs that look like data loss
//!
//! # Quick Start
//!
//! ```
//! use kiln_core::compiler::compile;
//! use kiln_core::spec::SpecDocument;
//!
//! let spec = SpecDocument::from_text("新增待辦事項，含輸入框與新增按鈕");
//! let cases = compile(&spec);
//!
//! let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
//! assert!(ids.contains(&"TODO-001"));
//! assert!(ids.contains(&"TODO-002"));
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod artifact;
pub mod compiler;
pub mod config;
pub mod cycle;
pub mod error;
pub mod guardrail;
pub mod probe;
pub mod sandbox;
pub mod session_log;
pub mod spec;
pub mod text;

pub use artifact::CandidateArtifact;
pub use config::{
    AiCheckMode, ExecutorSettings, InvocationSettings, KilnConfig, ProviderSettings,
    RepairSettings, SkillSettings,
};
pub use cycle::RepairCycleState;
pub use error::{InvocationError, KilnError, ProbeError, RepairError, Result, ResultExt};
pub use guardrail::{GuardrailDecision, RepairGuardrail};
pub use probe::{
    DescriptorSummary, Outcome, ProbeResult, ReportEntry, TestCaseDescriptor, TestCategory,
    TestReport,
};
pub use sandbox::{ElementHandle, ElementSnapshot, LoadReport, Sandbox, SandboxAction};
pub use session_log::{LogEntry, LogLevel, SessionLog};
pub use spec::{SpecDocument, SpecItem, UserStory};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
