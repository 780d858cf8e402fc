//! `kiln run` / `kiln repair` / `kiln test`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_agent::{BridgeSkillSource, FsSkillSource, HttpTransport, RepairOrchestrator, SkillSource};
use kiln_core::compiler::compile;
use kiln_core::{KilnConfig, SpecDocument, TestReport};
use kiln_sandbox::ProbeExecutor;
use tracing::info;

use crate::render;
use crate::OutputArgs;

fn skill_source(config: &KilnConfig) -> Box<dyn SkillSource> {
    match &config.skills.bridge_url {
        Some(url) => Box::new(BridgeSkillSource::new(url.clone())),
        None => Box::new(FsSkillSource::from_settings(".", &config.skills)),
    }
}

/// `<short-name>.html`, or `artifact.html` for an unnamed spec
pub(crate) fn default_artifact_path(spec: &SpecDocument) -> PathBuf {
    if spec.short_name().is_empty() {
        PathBuf::from("artifact.html")
    } else {
        PathBuf::from(format!("{}.html", spec.short_name()))
    }
}

/// Run a full session, starting from `artifact` when given
pub async fn run(
    spec: SpecDocument,
    config: &KilnConfig,
    artifact: Option<String>,
    output: &OutputArgs,
) -> Result<()> {
    let out = output
        .out
        .clone()
        .unwrap_or_else(|| default_artifact_path(&spec));

    let transport = Arc::new(HttpTransport::new());
    let mut orchestrator =
        RepairOrchestrator::from_config(spec, config, transport).with_skills(skill_source(config));
    if let Some(content) = artifact {
        orchestrator = orchestrator.with_artifact(content);
    }

    render::print_session_start(&orchestrator);
    while !orchestrator.phase().is_terminal() {
        let phase = orchestrator.step().await;
        render::print_phase(phase, orchestrator.cycle());
    }
    let outcome = orchestrator.outcome();

    if let Some(artifact) = &outcome.artifact {
        write(&out, artifact.content())?;
        info!(path = %out.display(), bytes = artifact.size_bytes(), "Artifact written");
    }
    if let (Some(path), Some(report)) = (&output.report, &outcome.report) {
        write(path, &serde_json::to_string_pretty(report)?)?;
    }
    if let Some(path) = &output.log {
        write(path, &orchestrator.log().export_text())?;
    }

    render::print_outcome(&outcome, outcome.artifact.as_ref().map(|_| out.as_path()));
    if !outcome.is_accepted() {
        anyhow::bail!("session ended in phase: {}", outcome.phase);
    }
    Ok(())
}

/// Run the compiled probes against an artifact on disk
pub async fn test(spec: &SpecDocument, config: &KilnConfig, artifact: &Path) -> Result<TestReport> {
    let content = std::fs::read_to_string(artifact)
        .with_context(|| format!("reading artifact {}", artifact.display()))?;
    let executor = ProbeExecutor::new(config.executor.clone());
    Ok(executor.execute(&content, &compile(spec)).await)
}

fn write(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_artifact_path() {
        let named = SpecDocument::from_markdown("---\nfeatureName: Todo\nshortName: todo-app\n---\n");
        assert_eq!(default_artifact_path(&named), PathBuf::from("todo-app.html"));
        assert_eq!(
            default_artifact_path(&SpecDocument::from_text("anything")),
            PathBuf::from("artifact.html")
        );
    }

    #[tokio::test]
    async fn test_offline_test_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.html");
        std::fs::write(
            &path,
            "<!DOCTYPE html><html><head><title>Hi</title></head><body>hello</body></html>",
        )
        .unwrap();

        let config = KilnConfig::new().without_delays();
        let report = test(&SpecDocument::from_text("A hello page"), &config, &path)
            .await
            .unwrap();
        assert!(report.is_passing());
        assert_eq!(report.failed_count, 0);
    }
}
