//! Auto-Repair Orchestrator
//!
//! `Idle → Generating → Testing → (Accepted | Repairing → Testing → …) → terminal`
//!
//! Exactly one artifact is live at a time. A repair candidate either passes the
//! guardrail and replaces it wholesale, or is discarded; the attempt is consumed
//! either way. Only budget exhaustion (repair attempts, credentials, rate-limit
//! backoff) ends a session early, and every terminal phase offers manual actions.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kiln_core::compiler::compile;
use kiln_core::probe::{DescriptorSummary, ProbeResult, TestCategory};
use kiln_core::text::{extract_document, head_chars};
use kiln_core::{
    CandidateArtifact, InvocationError, KilnConfig, RepairCycleState, RepairError, RepairGuardrail,
    RepairSettings, SessionLog, SpecDocument, TestCaseDescriptor, TestReport,
};
use kiln_sandbox::ProbeExecutor;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::invoker::{GenerationRequest, ModelInvoker};
use crate::prompts::{self, RepairPrompt, GENERATION_SYSTEM_PROMPT, REPAIR_SYSTEM_PROMPT};
use crate::skills::{self, SkillSource};
use crate::transport::ModelTransport;

const MODULE: &str = "orchestrator";
const GENERATE_MODULE: &str = "implement";
const REPAIR_MODULE: &str = "auto-fix";

/// Report id used when a truncated artifact is held back from testing
pub const INCOMPLETE_ARTIFACT_ID: &str = "ARTIFACT-001";

/// A single failing entry standing in for a test run of a truncated artifact
fn incomplete_report(marker: &str) -> TestReport {
    let mut report = TestReport::new();
    report.record(
        DescriptorSummary {
            id: INCOMPLETE_ARTIFACT_ID.to_string(),
            category: TestCategory::Structure,
            name: "Artifact is complete".to_string(),
            description: format!("The artifact ends with `{}`", marker),
        },
        ProbeResult::fail(format!(
            "truncated output: `{}` not found, probes were not run",
            marker
        )),
    );
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Generating,
    Testing,
    Repairing,
    /// Every probe passed
    Accepted,
    /// Probes still fail after `max_attempts` repair cycles
    AttemptsExhausted,
    /// An invocation budget ran out (credentials, rate limits, continuations)
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Accepted | Phase::AttemptsExhausted | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Generating => "generating",
            Phase::Testing => "testing",
            Phase::Repairing => "repairing",
            Phase::Accepted => "accepted",
            Phase::AttemptsExhausted => "attempts exhausted",
            Phase::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// What a caller may do once the session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualAction {
    /// Reset the attempt counter and repair the live artifact again
    RetryRepair,
    /// Drop the live artifact and generate from scratch
    Regenerate,
}

impl fmt::Display for ManualAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualAction::RetryRepair => write!(f, "retry repair"),
            ManualAction::Regenerate => write!(f, "regenerate from scratch"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("session is still running ({0})")]
    NotTerminal(Phase),

    #[error("there is no artifact to repair")]
    NothingToRepair,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub generations: u32,
    pub continuations: u32,
    pub test_runs: u32,
    pub repairs_accepted: u32,
    pub repairs_rejected: u32,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            generations: 0,
            continuations: 0,
            test_runs: 0,
            repairs_accepted: 0,
            repairs_rejected: 0,
        }
    }
}

/// One repair cycle as it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub attempt: u32,
    pub accepted: bool,
    /// Why the candidate was discarded
    pub reason: Option<String>,
    pub size_ratio: f64,
    pub primary_blocker: Option<String>,
}

/// Final state handed back by [`RepairOrchestrator::run`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub phase: Phase,
    pub artifact: Option<CandidateArtifact>,
    pub report: Option<TestReport>,
    pub attempts: u32,
    pub error: Option<String>,
    pub actions: Vec<ManualAction>,
    pub stats: SessionStats,
    pub repairs: Vec<RepairRecord>,
}

impl SessionOutcome {
    pub fn is_accepted(&self) -> bool {
        self.phase == Phase::Accepted
    }

    /// User-facing next steps, `None` when accepted
    pub fn manual_action_prompt(&self) -> Option<String> {
        if self.actions.is_empty() {
            return None;
        }
        let reason = match (self.phase, &self.error) {
            (Phase::Failed, Some(error)) => format!("Session failed: {}", error),
            _ => {
                let failing = self.report.as_ref().map(|r| r.failed_count).unwrap_or(0);
                format!(
                    "Auto-repair stopped after {} attempts with {} failing probes",
                    self.attempts, failing
                )
            }
        };
        let options: Vec<String> = self.actions.iter().map(ToString::to_string).collect();
        Some(format!("{}. Available actions: {}.", reason, options.join(", ")))
    }
}

/// Drives one generation session through the generate → test → repair loop
#[derive(Debug)]
pub struct RepairOrchestrator {
    spec: SpecDocument,
    descriptors: Vec<TestCaseDescriptor>,
    invoker: ModelInvoker,
    executor: ProbeExecutor,
    guardrail: RepairGuardrail,
    repair_settings: RepairSettings,
    skills: Option<Box<dyn SkillSource>>,
    generation_provider: Option<String>,
    repair_provider: Option<String>,
    phase: Phase,
    artifact: Option<CandidateArtifact>,
    report: Option<TestReport>,
    cycle: RepairCycleState,
    failure: Option<InvocationError>,
    stats: SessionStats,
    repairs: Vec<RepairRecord>,
    log: Arc<SessionLog>,
}

impl RepairOrchestrator {
    /// Assemble a session from its parts. The invoker's session log is shared with
    /// the orchestrator.
    pub fn new(
        spec: SpecDocument,
        invoker: ModelInvoker,
        executor: ProbeExecutor,
        repair_settings: RepairSettings,
    ) -> Self {
        let log = invoker.log().clone();
        let guardrail = RepairGuardrail::new(
            invoker.settings().terminal_marker.clone(),
            repair_settings.min_size_ratio,
        );
        let descriptors = compile(&spec);
        Self {
            spec,
            descriptors,
            invoker,
            executor,
            guardrail,
            cycle: RepairCycleState::new(repair_settings.max_attempts),
            repair_settings,
            skills: None,
            generation_provider: None,
            repair_provider: None,
            phase: Phase::Idle,
            artifact: None,
            report: None,
            failure: None,
            stats: SessionStats::default(),
            repairs: Vec::new(),
            log,
        }
    }

    /// Build every component from configuration around one shared session log
    pub fn from_config(spec: SpecDocument, config: &KilnConfig, transport: Arc<dyn ModelTransport>) -> Self {
        let log = Arc::new(SessionLog::new());
        let invoker = ModelInvoker::from_config(config, transport).with_log(log.clone());
        let executor = ProbeExecutor::new(config.executor.clone()).with_log(log);
        let mut orchestrator = Self::new(spec, invoker, executor, config.repair.clone());
        orchestrator.generation_provider = config.generation_provider().ok().map(str::to_string);
        orchestrator.repair_provider = config.repair_provider_id().ok().map(str::to_string);
        orchestrator
    }

    pub fn with_skills(mut self, source: Box<dyn SkillSource>) -> Self {
        self.skills = Some(source);
        self
    }

    pub fn with_repair_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.repair_provider = Some(provider_id.into());
        self
    }

    /// Skip generation and start testing an existing artifact
    pub fn with_artifact(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.log.info(
            MODULE,
            format!("Starting from an existing artifact ({} bytes)", content.len()),
        );
        let artifact = CandidateArtifact::from_content(content, self.guardrail.terminal_marker.clone());
        if !artifact.is_complete() {
            self.log.warn(
                MODULE,
                format!("Artifact has no `{}`, it will be repaired before testing", artifact.terminal_marker()),
            );
        }
        self.artifact = Some(artifact);
        self.phase = Phase::Testing;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn spec(&self) -> &SpecDocument {
        &self.spec
    }

    pub fn descriptors(&self) -> &[TestCaseDescriptor] {
        &self.descriptors
    }

    pub fn artifact(&self) -> Option<&CandidateArtifact> {
        self.artifact.as_ref()
    }

    pub fn report(&self) -> Option<&TestReport> {
        self.report.as_ref()
    }

    pub fn cycle(&self) -> &RepairCycleState {
        &self.cycle
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn repairs(&self) -> &[RepairRecord] {
        &self.repairs
    }

    pub fn invoker(&self) -> &ModelInvoker {
        &self.invoker
    }

    pub fn log(&self) -> &Arc<SessionLog> {
        &self.log
    }

    fn transition(&mut self, next: Phase) {
        if next == self.phase {
            return;
        }
        info!(from = %self.phase, to = %next, attempt = self.cycle.attempt, "Phase transition");
        self.log
            .info(MODULE, format!("{} → {}", self.phase, next));
        self.phase = next;
    }

    fn fail(&mut self, error: InvocationError) {
        warn!("Session failed: {}", error);
        self.log.error(MODULE, format!("Session failed: {}", error));
        self.failure = Some(error);
        self.transition(Phase::Failed);
    }

    /// Perform exactly one state transition and return the new phase
    pub async fn step(&mut self) -> Phase {
        match self.phase {
            Phase::Idle => self.transition(Phase::Generating),
            Phase::Generating => self.generate().await,
            Phase::Testing => self.test().await,
            Phase::Repairing => self.repair().await,
            Phase::Accepted | Phase::AttemptsExhausted | Phase::Failed => {}
        }
        self.phase
    }

    /// Step until a terminal phase
    pub async fn run(&mut self) -> SessionOutcome {
        while !self.phase.is_terminal() {
            self.step().await;
        }
        self.outcome()
    }

    async fn generate(&mut self) {
        let query = if self.spec.feature_name().is_empty() {
            head_chars(self.spec.text(), 300).to_string()
        } else {
            self.spec.feature_name().to_string()
        };
        let skill_text = skills::skill_context(
            self.skills.as_deref(),
            &query,
            self.repair_settings.max_skills,
            &self.log,
        )
        .await;

        let mut request = GenerationRequest::new(
            GENERATION_SYSTEM_PROMPT,
            prompts::generation_prompt(&self.spec, &skill_text),
        );
        if let Some(provider) = &self.generation_provider {
            request = request.with_provider(provider.clone());
        }

        self.log.info(
            GENERATE_MODULE,
            format!("Generating artifact ({} char prompt)", request.prompt.len()),
        );
        match self.invoker.generate(&request).await {
            Ok(generation) => {
                self.stats.generations += 1;
                self.stats.continuations += generation.continuations;

                let doc = extract_document(generation.artifact.content());
                if !doc.extracted {
                    self.log.warn(
                        GENERATE_MODULE,
                        "No <!DOCTYPE html> document found, keeping the cleaned response",
                    );
                }
                let artifact = CandidateArtifact::from_content(doc.html, self.guardrail.terminal_marker.clone());
                self.log.success(
                    GENERATE_MODULE,
                    format!(
                        "Artifact committed: {} bytes, {} continuations",
                        artifact.size_bytes(),
                        generation.continuations
                    ),
                );
                self.artifact = Some(artifact);
                self.report = None;
                self.cycle.reset();
                self.transition(Phase::Testing);
            }
            Err(err) => self.fail(err),
        }
    }

    async fn test(&mut self) {
        let Some(artifact) = &self.artifact else {
            self.transition(Phase::Generating);
            return;
        };

        // Probes only ever see a complete artifact
        let report = if artifact.is_complete() {
            let report = self
                .executor
                .execute(artifact.content(), &self.descriptors)
                .await;
            self.stats.test_runs += 1;
            report
        } else {
            self.log.warn(
                MODULE,
                format!("Artifact is truncated (no `{}`), skipping the test run", artifact.terminal_marker()),
            );
            incomplete_report(artifact.terminal_marker())
        };
        self.cycle.record(&report);

        let next = if report.is_passing() {
            self.log.success(MODULE, format!("All probes passed ({})", report.summary_line()));
            Phase::Accepted
        } else if self.cycle.can_repair() {
            Phase::Repairing
        } else {
            self.log.warn(
                REPAIR_MODULE,
                format!(
                    "Repair budget spent ({} of {}), {} probes still failing",
                    self.cycle.attempt, self.cycle.max_attempts, report.failed_count
                ),
            );
            Phase::AttemptsExhausted
        };
        self.report = Some(report);
        self.transition(next);
    }

    async fn repair(&mut self) {
        let (Some(live), Some(report)) = (self.artifact.clone(), self.report.clone()) else {
            self.transition(Phase::Testing);
            return;
        };

        let attempt = self.cycle.begin_attempt();
        let primary = report
            .primary_blocker()
            .map(|e| format!("[{}] {}", e.descriptor.id, e.descriptor.name));
        self.log.info(
            REPAIR_MODULE,
            format!(
                "Repair attempt {}/{}: {} failures, primary blocker {}",
                attempt,
                self.cycle.max_attempts,
                report.failed_count,
                primary.as_deref().unwrap_or("(none)")
            ),
        );

        let skill_text = skills::skill_context(
            self.skills.as_deref(),
            &prompts::skill_query(&report),
            self.repair_settings.max_skills,
            &self.log,
        )
        .await;
        let checklist = self.spec.checklist_markdown();
        let prompt = RepairPrompt {
            attempt,
            max_attempts: self.cycle.max_attempts,
            report: &report,
            checklist: checklist.as_deref(),
            current_code: live.content(),
            skills: &skill_text,
        }
        .render();
        let Some(prompt) = prompt else {
            self.transition(Phase::Testing);
            return;
        };

        let mut request = GenerationRequest::new(REPAIR_SYSTEM_PROMPT, prompt);
        if let Some(provider) = self.repair_provider.as_ref().or(self.generation_provider.as_ref()) {
            request = request.with_provider(provider.clone());
        }

        let response = match self.invoker.generate(&request).await {
            Ok(generation) => {
                self.stats.continuations += generation.continuations;
                generation.artifact.into_content()
            }
            Err(err) if ends_session(&err) => {
                self.fail(err);
                return;
            }
            Err(InvocationError::IncompleteGeneration { .. }) => {
                let reason = RepairError::MissingTerminalMarker {
                    marker: self.guardrail.terminal_marker.clone(),
                };
                self.reject(attempt, primary, reason.to_string(), 0.0);
                return;
            }
            Err(err) => {
                self.reject(attempt, primary, err.to_string(), 0.0);
                return;
            }
        };

        let decision = self.guardrail.evaluate(live.content(), &response);
        match decision.candidate {
            Some(candidate) if decision.allowed => {
                self.stats.repairs_accepted += 1;
                self.log.success(
                    REPAIR_MODULE,
                    format!(
                        "Repair {} accepted: {} → {} bytes ({:.0}%)",
                        attempt,
                        live.size_bytes(),
                        candidate.len(),
                        decision.size_ratio * 100.0
                    ),
                );
                self.repairs.push(RepairRecord {
                    attempt,
                    accepted: true,
                    reason: None,
                    size_ratio: decision.size_ratio,
                    primary_blocker: primary,
                });
                self.artifact = Some(CandidateArtifact::from_content(
                    candidate,
                    self.guardrail.terminal_marker.clone(),
                ));
                self.transition(Phase::Testing);
            }
            _ => {
                let reason = decision
                    .reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "rejected by guardrail".to_string());
                self.reject(attempt, primary, reason, decision.size_ratio);
            }
        }
    }

    /// Discard a repair candidate; the live artifact and its report stay
    fn reject(&mut self, attempt: u32, primary: Option<String>, reason: String, size_ratio: f64) {
        self.stats.repairs_rejected += 1;
        warn!(attempt, "Repair rejected: {}", reason);
        self.log.warn(
            REPAIR_MODULE,
            format!("Repair {} rejected, keeping the live artifact: {}", attempt, reason),
        );
        self.repairs.push(RepairRecord {
            attempt,
            accepted: false,
            reason: Some(reason),
            size_ratio,
            primary_blocker: primary,
        });

        if self.cycle.can_repair() {
            self.transition(Phase::Repairing);
        } else {
            self.log.warn(
                REPAIR_MODULE,
                format!("Repair budget spent ({} of {})", self.cycle.attempt, self.cycle.max_attempts),
            );
            self.transition(Phase::AttemptsExhausted);
        }
    }

    /// Manual actions available in the current phase
    pub fn available_actions(&self) -> Vec<ManualAction> {
        match self.phase {
            Phase::AttemptsExhausted => vec![ManualAction::RetryRepair, ManualAction::Regenerate],
            Phase::Failed if self.artifact.is_some() && self.report.is_some() => {
                vec![ManualAction::RetryRepair, ManualAction::Regenerate]
            }
            Phase::Failed => vec![ManualAction::Regenerate],
            _ => Vec::new(),
        }
    }

    /// Resume a stopped session. Both actions reset the attempt counter.
    pub fn apply(&mut self, action: ManualAction) -> Result<Phase, ActionError> {
        if !self.phase.is_terminal() {
            return Err(ActionError::NotTerminal(self.phase));
        }
        if action == ManualAction::RetryRepair && self.artifact.is_none() {
            return Err(ActionError::NothingToRepair);
        }
        self.log.info(MODULE, format!("Manual action: {}", action));
        self.cycle.reset();
        self.failure = None;

        match action {
            ManualAction::RetryRepair => {
                let failing = self.report.as_ref().map(|r| !r.is_passing()).unwrap_or(false);
                self.transition(if failing { Phase::Repairing } else { Phase::Testing });
            }
            ManualAction::Regenerate => {
                self.artifact = None;
                self.report = None;
                self.transition(Phase::Generating);
            }
        }
        Ok(self.phase)
    }

    pub fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            phase: self.phase,
            artifact: self.artifact.clone(),
            report: self.report.clone(),
            attempts: self.cycle.attempt,
            error: self.failure.as_ref().map(ToString::to_string),
            actions: self.available_actions(),
            stats: self.stats.clone(),
            repairs: self.repairs.clone(),
        }
    }
}

/// Failures that end the session instead of consuming one repair attempt
fn ends_session(error: &InvocationError) -> bool {
    matches!(
        error,
        InvocationError::RateLimited { .. }
            | InvocationError::AllCredentialsExhausted { .. }
            | InvocationError::MissingCredentials(_)
            | InvocationError::UnknownProvider(_)
    )
}
