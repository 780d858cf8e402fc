//! Sandboxed Probe Executor
//!
//! One disposable sandbox per run. Descriptors run sequentially; a probe that errors
//! or panics becomes a skipped entry and never aborts the rest of the run.
//!
//! A sandbox that does not run scripts cannot see elements the artifact builds at run
//! time. When the scripts build markup, a failing non-baseline probe is reported as
//! skipped with a `needs script execution` note instead of failed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_core::compiler::is_baseline;
use kiln_core::probe::{Outcome, ProbeResult, TestCaseDescriptor, TestReport};
use kiln_core::sandbox::Sandbox;
use kiln_core::{AiCheckMode, ExecutorSettings, ProbeError, SessionLog};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ai_checks;
use crate::api::ProbeApi;
use crate::dom::StaticDomSandbox;
use crate::interceptor::NetworkInterceptor;
use crate::{script_scan, suite};

const MODULE: &str = "sandbox-test";

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "probe panicked".to_string())
}

#[derive(Debug)]
pub struct ProbeExecutor {
    settings: ExecutorSettings,
    log: Arc<SessionLog>,
    ai_mock: Option<Value>,
}

impl Default for ProbeExecutor {
    fn default() -> Self {
        Self::new(ExecutorSettings::default())
    }
}

impl ProbeExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            settings,
            log: Arc::new(SessionLog::new()),
            ai_mock: None,
        }
    }

    /// Append to a shared session log
    pub fn with_log(mut self, log: Arc<SessionLog>) -> Self {
        self.log = log;
        self
    }

    /// Answer model calls made by the artifact with `response`
    pub fn with_ai_mock(mut self, response: Value) -> Self {
        self.ai_mock = Some(response);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn log(&self) -> &Arc<SessionLog> {
        &self.log
    }

    async fn pause(ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Run `descriptors` against `artifact` in a fresh static DOM sandbox
    pub async fn execute(&self, artifact: &str, descriptors: &[TestCaseDescriptor]) -> TestReport {
        let mut sandbox = StaticDomSandbox::new();
        self.execute_in(&mut sandbox, artifact, descriptors).await
    }

    /// Run against a caller-provided sandbox, e.g. a browser-backed one
    pub async fn execute_in(
        &self,
        sandbox: &mut dyn Sandbox,
        artifact: &str,
        descriptors: &[TestCaseDescriptor],
    ) -> TestReport {
        let started = Instant::now();
        let mut report = TestReport::new();
        self.log.info(
            MODULE,
            format!("Running {} probes against {} bytes", descriptors.len(), artifact.len()),
        );

        if let Err(err) = sandbox.load(artifact) {
            self.log.error(MODULE, format!("Sandbox failed to load artifact: {}", err));
            for descriptor in descriptors {
                report.push(
                    descriptor.summary(),
                    Outcome::Skipped,
                    ProbeResult::fail(format!("sandbox unavailable: {}", err)),
                );
            }
            return report;
        }
        if let Some(load_error) = sandbox.load_error() {
            self.log.warn(MODULE, format!("Load error recorded: {}", load_error));
        }
        Self::pause(self.settings.load_settle_ms).await;

        let script_rendered =
            !sandbox.runs_scripts() && script_scan::renders_elements(&sandbox.script_text());
        if script_rendered {
            self.log.info(MODULE, "Scripts build markup at run time; static checks on it are advisory");
        }

        for (idx, descriptor) in descriptors.iter().enumerate() {
            if idx > 0 {
                Self::pause(self.settings.between_probes_ms).await;
            }
            self.run_descriptor(&*sandbox, descriptor, script_rendered, &mut report);
        }

        let interceptor = match &self.ai_mock {
            Some(response) => NetworkInterceptor::with_mock(response.clone()),
            None => NetworkInterceptor::new(),
        };
        {
            let mut api = ProbeApi::new(&mut *sandbox, &interceptor, &self.settings);
            let injected = suite::run_injected(&mut api, &mut report, &self.log).await;
            if injected == 0 {
                self.log.debug(MODULE, "No self-registered suite found");
            }
        }

        let run_ai_checks = match self.settings.ai_checks {
            AiCheckMode::Off => false,
            AiCheckMode::Auto => ai_checks::talks_to_model(&*sandbox),
            AiCheckMode::Always => true,
        };
        if run_ai_checks {
            self.run_ai_checks(&*sandbox, &mut report);
        }

        let elapsed = started.elapsed().as_millis() as u64;
        info!(elapsed_ms = elapsed, "{}", report.summary_line());
        self.log.info(MODULE, report.summary_line());
        report
    }

    fn run_descriptor(
        &self,
        sandbox: &dyn Sandbox,
        descriptor: &TestCaseDescriptor,
        script_rendered: bool,
        report: &mut TestReport,
    ) {
        let summary = descriptor.summary();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| descriptor.verify(sandbox)));
        match outcome {
            Ok(Ok(result)) if !result.passed && script_rendered && !is_baseline(&descriptor.id) => {
                self.log.warn(
                    MODULE,
                    format!("SKIP {}: {} (target may be built by script)", descriptor.id, result.details),
                );
                report.push(
                    summary,
                    Outcome::Skipped,
                    ProbeResult::fail(format!("needs script execution: {}", result.details)),
                );
            }
            Ok(Ok(result)) => {
                if result.passed {
                    debug!("PASS {} {}", descriptor.id, result.details);
                    self.log.success(MODULE, format!("PASS {}: {}", descriptor.id, descriptor.name));
                } else {
                    self.log.error(
                        MODULE,
                        format!("FAIL {}: {} - {}", descriptor.id, descriptor.name, result.details),
                    );
                }
                report.record(summary, result);
            }
            Ok(Err(ProbeError::NotLoaded)) => {
                self.log.warn(MODULE, format!("SKIP {}: DOM inaccessible", descriptor.id));
                report.push(summary, Outcome::Skipped, ProbeResult::fail("DOM inaccessible"));
            }
            Ok(Err(err)) => {
                self.log.warn(MODULE, format!("SKIP {}: {}", descriptor.id, err));
                report.push(summary, Outcome::Skipped, ProbeResult::fail(err.to_string()));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(probe = %descriptor.id, "Probe panicked: {}", message);
                self.log.warn(MODULE, format!("SKIP {}: {}", descriptor.id, message));
                report.push(summary, Outcome::Skipped, ProbeResult::fail(message));
            }
        }
    }

    fn run_ai_checks(&self, sandbox: &dyn Sandbox, report: &mut TestReport) {
        self.log.info(MODULE, "Running AI integration checks");
        let checks = ai_checks::all_checks();
        let mut passed = 0;
        for check in &checks {
            let result = match check.verify(sandbox) {
                Ok(result) => result,
                Err(err) => ProbeResult::fail(err.to_string()),
            };
            let outcome = if result.passed {
                passed += 1;
                Outcome::Passed
            } else {
                self.log.warn(MODULE, format!("WARN {}: {}", check.id, result.details));
                Outcome::Warned
            };
            report.push(check.summary(), outcome, result);
        }
        self.log.info(
            MODULE,
            format!("AI integration checks: {}/{} passed", passed, checks.len()),
        );
    }
}
