//! Kiln Sandbox - isolated execution of spec-derived probes
//!
//! Loads a candidate artifact into a disposable static DOM (`scraper`), runs the
//! compiled [`TestCaseDescriptor`](kiln_core::TestCaseDescriptor)s against it, then the
//! artifact's own self-registered suite, then the advisory AI-integration checks.
//!
//! Nothing in the artifact is executed. Script faults are found by a lexical scan and
//! outbound requests only exist as far as the probe API or a literal `fetch(...)`
//! produce them; both go through the [`NetworkInterceptor`]. When the scripts build
//! markup or a suite step follows an interaction, a failure that only script execution
//! could settle is reported as skipped.
//!
//! ```
//! use kiln_core::compiler::compile;
//! use kiln_core::{ExecutorSettings, Outcome, SpecDocument};
//! use kiln_sandbox::ProbeExecutor;
//!
//! # tokio_test::block_on(async {
//! let spec = SpecDocument::from_text("新增待辦事項，含輸入框與新增按鈕");
//! let artifact = "<!DOCTYPE html><html><head><title>Todo</title></head>\
//!     <body><input id=\"new\"><button id=\"add\">新增</button><ul id=\"list\"></ul></body></html>";
//!
//! let executor = ProbeExecutor::new(ExecutorSettings::default());
//! let report = executor.execute(artifact, &compile(&spec)).await;
//! let todo = report.entries.iter().find(|e| e.descriptor.id == "TODO-001").unwrap();
//! assert_eq!(todo.outcome, Outcome::Passed);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod ai_checks;
pub mod api;
pub mod dom;
pub mod executor;
pub mod interceptor;
pub mod script_scan;
pub mod suite;
pub mod visibility;

pub use api::ProbeApi;
pub use dom::StaticDomSandbox;
pub use executor::ProbeExecutor;
pub use interceptor::{InterceptedRequest, InterceptedResponse, NetworkInterceptor, OutboundRequest};
pub use suite::{SuiteStep, SuiteTest, SUITE_SCRIPT_TYPE};
