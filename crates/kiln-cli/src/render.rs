//! Terminal output

use std::path::Path;

use colored::{ColoredString, Colorize};
use kiln_agent::{Phase, RepairOrchestrator, SessionOutcome};
use kiln_core::{Outcome, RepairCycleState, SpecDocument, TestCaseDescriptor, TestReport};

fn outcome_icon(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "✓",
        Outcome::Failed => "✗",
        Outcome::Skipped => "○",
        Outcome::Warned => "⚠",
    }
}

fn colored_icon(outcome: Outcome) -> ColoredString {
    let icon = outcome_icon(outcome);
    match outcome {
        Outcome::Passed => icon.green(),
        Outcome::Failed => icon.red().bold(),
        Outcome::Skipped => icon.dimmed(),
        Outcome::Warned => icon.yellow(),
    }
}

fn title(spec: &SpecDocument) -> &str {
    if spec.feature_name().is_empty() {
        "(unnamed specification)"
    } else {
        spec.feature_name()
    }
}

pub fn print_descriptors(spec: &SpecDocument, cases: &[TestCaseDescriptor]) {
    println!("{} {}", "▶".cyan(), title(spec).bold());
    println!("  {} probes", cases.len());
    println!();
    for case in cases {
        println!(
            "  {:<18} {:<14} {}",
            case.id.cyan(),
            case.category.to_string().dimmed(),
            case.name
        );
    }
}

pub fn print_report(report: &TestReport) {
    for entry in &report.entries {
        println!(
            "  {} {:<18} {}",
            colored_icon(entry.outcome),
            entry.descriptor.id,
            entry.descriptor.name
        );
        if entry.outcome != Outcome::Passed {
            println!("      {}", entry.result.details.dimmed());
        }
    }
    println!();
    let summary = report.summary_line();
    if report.is_passing() {
        println!("  {}", summary.green().bold());
    } else {
        println!("  {}", summary.red().bold());
    }
}

pub fn print_session_start(orchestrator: &RepairOrchestrator) {
    println!("{} {}", "▶ Kiln session:".bold(), title(orchestrator.spec()));
    println!(
        "  Probes: {}  Providers: {}",
        orchestrator.descriptors().len(),
        orchestrator.invoker().provider_ids().join(", ")
    );
    println!();
}

pub fn print_phase(phase: Phase, cycle: &RepairCycleState) {
    let label = match phase {
        Phase::Repairing => format!("repairing (attempt {} of {})", cycle.attempt + 1, cycle.max_attempts),
        other => other.to_string(),
    };
    let line = format!("  → {}", label);
    match phase {
        Phase::Accepted => println!("{}", line.green().bold()),
        Phase::AttemptsExhausted | Phase::Failed => println!("{}", line.red().bold()),
        _ => println!("{}", line.cyan()),
    }
}

pub fn print_outcome(outcome: &SessionOutcome, written: Option<&Path>) {
    println!();
    if let Some(report) = &outcome.report {
        print_report(report);
        println!();
    }

    let stats = &outcome.stats;
    println!(
        "  Generations: {}  Continuations: {}  Repairs: {} accepted, {} rejected",
        stats.generations, stats.continuations, stats.repairs_accepted, stats.repairs_rejected
    );
    if let Some(path) = written {
        println!("  Artifact: {}", path.display());
    }

    if outcome.is_accepted() {
        println!("{}", "✓ Artifact accepted".green().bold());
    } else if let Some(prompt) = outcome.manual_action_prompt() {
        println!("{}", prompt.red());
        println!(
            "{}",
            "  Re-run `kiln repair --artifact <file>` to retry the repair, or `kiln run` to regenerate."
                .dimmed()
        );
    }
}
