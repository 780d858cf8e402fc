use std::sync::Arc;

use kiln_agent::orchestrator::INCOMPLETE_ARTIFACT_ID;
use kiln_agent::{ActionError, ManualAction, Phase, RepairOrchestrator, ScriptedTransport};
use kiln_core::{KilnConfig, ProviderSettings, SpecDocument};

/// Fails STRUCT-002: no title
fn untitled_page(filler: usize) -> String {
    format!(
        "<!DOCTYPE html><html><head></head><body><p>{}</p></body></html>",
        "hello ".repeat(filler)
    )
}

fn titled_page(filler: usize) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>Hello</title></head><body><p>{}</p></body></html>",
        "hello ".repeat(filler)
    )
}

fn config(keys: &[&str]) -> KilnConfig {
    KilnConfig::new()
        .with_provider(
            "gemini",
            ProviderSettings::gemini(keys.iter().map(|k| k.to_string()).collect()),
        )
        .with_default_provider("gemini")
        .without_delays()
}

fn session(config: &KilnConfig) -> (RepairOrchestrator, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let orchestrator = RepairOrchestrator::from_config(
        SpecDocument::from_text("A hello page"),
        config,
        transport.clone(),
    );
    (orchestrator, transport)
}

#[tokio::test]
async fn test_first_generation_accepted() {
    let (mut orchestrator, transport) = session(&config(&["key-a"]));
    transport.push_gemini_text(&format!("Here you go:\n```html\n{}\n```", titled_page(3)));

    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Accepted);
    assert!(outcome.is_accepted());
    assert_eq!(outcome.attempts, 0);
    assert_eq!(outcome.stats.generations, 1);
    assert!(outcome.actions.is_empty());
    assert!(outcome.manual_action_prompt().is_none());
    assert_eq!(outcome.artifact.unwrap().content(), titled_page(3));

    let transitions: Vec<String> = orchestrator
        .log()
        .by_module("orchestrator")
        .into_iter()
        .map(|e| e.message)
        .filter(|m| m.contains('→'))
        .collect();
    assert_eq!(
        transitions,
        vec!["idle → generating", "generating → testing", "testing → accepted"]
    );
}

#[tokio::test]
async fn test_step_performs_one_transition() {
    let (mut orchestrator, transport) = session(&config(&["key-a"]));
    transport.push_gemini_text(&untitled_page(3));

    assert_eq!(orchestrator.phase(), Phase::Idle);
    assert_eq!(orchestrator.step().await, Phase::Generating);
    assert_eq!(transport.request_count(), 0);
    assert_eq!(orchestrator.step().await, Phase::Testing);
    assert_eq!(transport.request_count(), 1);
    assert_eq!(orchestrator.step().await, Phase::Repairing);
    assert_eq!(
        orchestrator.report().unwrap().primary_blocker().unwrap().descriptor.id,
        "STRUCT-002"
    );
}

#[tokio::test]
async fn test_truncated_generation_is_continued() {
    let (mut orchestrator, transport) = session(&config(&["key-a"]));
    let head = format!(
        "<!DOCTYPE html><html><head><title>Big</title></head><body><p>{}</p>",
        "x".repeat(50_000)
    );
    transport.push_gemini_text(&head).push_gemini_text("</body></html>");

    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Accepted);
    assert_eq!(outcome.stats.continuations, 1);
    assert!(outcome.artifact.unwrap().is_complete());
}

#[tokio::test]
async fn test_failing_artifact_repaired() {
    let (orchestrator, transport) = session(&config(&["key-a"]));
    let mut orchestrator = orchestrator.with_artifact(untitled_page(20));
    transport.push_gemini_text(&titled_page(20));

    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Accepted);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.stats.repairs_accepted, 1);
    assert_eq!(outcome.stats.test_runs, 2);
    assert!(outcome.repairs[0].accepted);
    assert_eq!(outcome.repairs[0].primary_blocker.as_deref(), Some("[STRUCT-002] Page title exists"));

    let prompt = transport.requests()[0].body.to_string();
    assert!(prompt.contains("precise code debugger"));
    assert!(prompt.contains("repair attempt #1 of 3"));
    assert!(prompt.contains("[PRIMARY] [STRUCT-002] Page title exists"));
}

#[tokio::test]
async fn test_truncated_artifact_is_repaired_before_testing() {
    let (orchestrator, transport) = session(&config(&["key-a"]));
    let truncated = titled_page(20).replace("</p></body></html>", "");
    let mut orchestrator = orchestrator.with_artifact(truncated.clone());
    assert!(!orchestrator.artifact().unwrap().is_complete());

    assert_eq!(orchestrator.step().await, Phase::Repairing);
    assert_eq!(orchestrator.stats().test_runs, 0);
    let report = orchestrator.report().unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.failed_count, 1);
    let blocker = report.primary_blocker().unwrap();
    assert_eq!(blocker.descriptor.id, INCOMPLETE_ARTIFACT_ID);
    assert!(blocker.result.details.starts_with("truncated output"));

    transport.push_gemini_text(&titled_page(20));
    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Accepted);
    assert_eq!(outcome.stats.test_runs, 1);
    assert_eq!(outcome.attempts, 1);

    let prompt = transport.requests()[0].body.to_string();
    assert!(prompt.contains("[PRIMARY] [ARTIFACT-001] Artifact is complete"));
    assert!(prompt.contains(&truncated));
}

#[tokio::test]
async fn test_shrunken_repair_rejected() {
    let (orchestrator, transport) = session(&config(&["key-a"]));
    let live = untitled_page(200);
    let mut orchestrator = orchestrator.with_artifact(live.clone());
    let hash = orchestrator.artifact().unwrap().hash();
    transport.push_gemini_text(&titled_page(100));

    assert_eq!(orchestrator.step().await, Phase::Repairing);
    assert_eq!(orchestrator.step().await, Phase::Repairing);

    assert_eq!(orchestrator.cycle().attempt, 1);
    assert_eq!(orchestrator.artifact().unwrap().hash(), hash);
    assert_eq!(orchestrator.artifact().unwrap().content(), live);

    let record = &orchestrator.repairs()[0];
    assert!(!record.accepted);
    assert!(record.size_ratio < 0.7);
    assert!(record.reason.as_deref().unwrap().starts_with("Suspected regression"));
    assert_eq!(orchestrator.stats().repairs_rejected, 1);
}

#[tokio::test]
async fn test_repair_without_marker_rejected() {
    let mut config = config(&["key-a"]);
    config.invocation.max_continuations = 0;
    let (orchestrator, transport) = session(&config);
    let mut orchestrator = orchestrator.with_artifact(untitled_page(20));
    transport.push_gemini_text("I fixed the title, but here is only a summary of the change.");

    orchestrator.step().await;
    orchestrator.step().await;
    let record = &orchestrator.repairs()[0];
    assert!(!record.accepted);
    assert!(record
        .reason
        .as_deref()
        .unwrap()
        .starts_with("Response is missing the terminal marker"));
    assert_eq!(orchestrator.cycle().attempt, 1);
    assert_eq!(orchestrator.artifact().unwrap().content(), untitled_page(20));
}

#[tokio::test]
async fn test_attempts_exhausted_then_manual_retry() {
    let (orchestrator, transport) = session(&config(&["key-a"]));
    let mut orchestrator = orchestrator.with_artifact(untitled_page(20));
    for _ in 0..3 {
        transport.push_gemini_text(&untitled_page(20));
    }

    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::AttemptsExhausted);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(transport.request_count(), 3);
    assert_eq!(outcome.stats.repairs_accepted, 3);
    assert_eq!(
        outcome.actions,
        vec![ManualAction::RetryRepair, ManualAction::Regenerate]
    );
    assert!(outcome
        .manual_action_prompt()
        .unwrap()
        .starts_with("Auto-repair stopped after 3 attempts with 1 failing probes"));

    assert_eq!(orchestrator.apply(ManualAction::RetryRepair), Ok(Phase::Repairing));
    assert_eq!(orchestrator.cycle().attempt, 0);

    transport.push_gemini_text(&titled_page(20));
    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Accepted);
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_manual_regenerate_starts_over() {
    let mut config = config(&["key-a"]);
    config.repair.max_attempts = 1;
    let (orchestrator, transport) = session(&config);
    let mut orchestrator = orchestrator.with_artifact(untitled_page(20));
    transport.push_gemini_text(&untitled_page(20));

    assert_eq!(orchestrator.run().await.phase, Phase::AttemptsExhausted);
    assert_eq!(orchestrator.apply(ManualAction::Regenerate), Ok(Phase::Generating));
    assert!(orchestrator.artifact().is_none());

    transport.push_gemini_text(&titled_page(2));
    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Accepted);
    assert_eq!(outcome.stats.generations, 1);
}

#[tokio::test]
async fn test_actions_refused_while_running() {
    let (mut orchestrator, _transport) = session(&config(&["key-a"]));
    assert_eq!(
        orchestrator.apply(ManualAction::Regenerate),
        Err(ActionError::NotTerminal(Phase::Idle))
    );
}

#[tokio::test]
async fn test_rejected_credentials_fail_the_session() {
    let (mut orchestrator, transport) = session(&config(&["key-a"]));
    transport.push_status(401, r#"{"error": {"message": "API key not valid"}}"#);

    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("exhausted"));
    assert_eq!(outcome.actions, vec![ManualAction::Regenerate]);
    assert_eq!(
        orchestrator.apply(ManualAction::RetryRepair),
        Err(ActionError::NothingToRepair)
    );
    assert_eq!(orchestrator.phase(), Phase::Failed);

    // The rejected key is not tried again
    orchestrator.apply(ManualAction::Regenerate).unwrap();
    assert_eq!(orchestrator.run().await.phase, Phase::Failed);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_rate_limit_during_repair_fails_session() {
    let mut config = config(&["key-a"]);
    config.invocation.max_attempts = 1;
    let (orchestrator, transport) = session(&config);
    let mut orchestrator = orchestrator.with_artifact(untitled_page(20));
    transport.push_status(429, "quota");

    let outcome = orchestrator.run().await;
    assert_eq!(outcome.phase, Phase::Failed);
    assert_eq!(outcome.artifact.unwrap().content(), untitled_page(20));
    assert_eq!(
        outcome.actions,
        vec![ManualAction::RetryRepair, ManualAction::Regenerate]
    );
}

#[tokio::test]
async fn test_transient_repair_failure_consumes_attempt() {
    let mut config = config(&["key-a"]);
    config.invocation.max_attempts = 1;
    let (orchestrator, transport) = session(&config);
    let mut orchestrator = orchestrator.with_artifact(untitled_page(20));
    transport.push_status(500, "upstream error");

    orchestrator.step().await;
    assert_eq!(orchestrator.step().await, Phase::Repairing);
    assert_eq!(orchestrator.cycle().attempt, 1);
    assert!(orchestrator.repairs()[0].reason.as_deref().unwrap().contains("HTTP 500"));
}

#[tokio::test]
async fn test_repair_uses_repair_provider() {
    let config = config(&["key-a"])
        .with_provider(
            "backup",
            ProviderSettings::openai_compatible(vec!["sk-b".into()], "http://backup.test/v1", "coder"),
        )
        .with_repair_provider("backup");
    let (orchestrator, transport) = session(&config);
    let mut orchestrator = orchestrator.with_artifact(untitled_page(20));
    transport.push_chat_text(&titled_page(20));

    assert_eq!(orchestrator.run().await.phase, Phase::Accepted);
    let request = &transport.requests()[0];
    assert_eq!(request.url, "http://backup.test/v1/chat/completions");
    assert_eq!(request.header("authorization"), Some("Bearer sk-b"));
    assert_eq!(request.body["model"], "coder");
}
