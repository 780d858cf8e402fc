//! Test-case descriptors, probe results and the aggregated report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ProbeError;
use crate::sandbox::Sandbox;

/// Signature of a descriptor's check
pub type VerifyFn = Arc<dyn Fn(&dyn Sandbox) -> Result<ProbeResult, ProbeError> + Send + Sync>;

/// Category tag shown in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    Structure,
    Element,
    Visibility,
    Interaction,
    Style,
    /// Suite registered by the artifact itself
    Injected,
    /// Advisory checks of model-calling artifacts
    AiIntegration,
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TestCategory::Structure => "structure",
            TestCategory::Element => "element",
            TestCategory::Visibility => "visibility",
            TestCategory::Interaction => "interaction",
            TestCategory::Style => "style",
            TestCategory::Injected => "injected",
            TestCategory::AiIntegration => "ai-integration",
        };
        write!(f, "{}", label)
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub passed: bool,
    pub details: String,
}

impl ProbeResult {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }

    pub fn check(passed: bool, details: impl Into<String>) -> Self {
        Self {
            passed,
            details: details.into(),
        }
    }
}

/// A deterministic, spec-derived check
#[derive(Clone)]
pub struct TestCaseDescriptor {
    pub id: String,
    pub category: TestCategory,
    pub name: String,
    pub description: String,
    verify: VerifyFn,
}

impl TestCaseDescriptor {
    pub fn new<F>(
        id: impl Into<String>,
        category: TestCategory,
        name: impl Into<String>,
        description: impl Into<String>,
        verify: F,
    ) -> Self
    where
        F: Fn(&dyn Sandbox) -> Result<ProbeResult, ProbeError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            category,
            name: name.into(),
            description: description.into(),
            verify: Arc::new(verify),
        }
    }

    /// Run the check against a loaded sandbox
    pub fn verify(&self, sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
        (self.verify)(sandbox)
    }

    pub fn summary(&self) -> DescriptorSummary {
        DescriptorSummary {
            id: self.id.clone(),
            category: self.category,
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

impl fmt::Debug for TestCaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCaseDescriptor")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Serializable part of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSummary {
    pub id: String,
    pub category: TestCategory,
    pub name: String,
    pub description: String,
}

/// How an entry counts in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    /// The probe itself faulted
    Skipped,
    /// An advisory check did not hold; never blocks acceptance
    Warned,
}

/// One row of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub descriptor: DescriptorSummary,
    pub outcome: Outcome,
    pub result: ProbeResult,
}

/// Aggregated result of one executor run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub warned_count: usize,
    pub entries: Vec<ReportEntry>,
}

impl TestReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: DescriptorSummary, outcome: Outcome, result: ProbeResult) {
        match outcome {
            Outcome::Passed => self.passed_count += 1,
            Outcome::Failed => self.failed_count += 1,
            Outcome::Skipped => self.skipped_count += 1,
            Outcome::Warned => self.warned_count += 1,
        }
        self.entries.push(ReportEntry {
            descriptor,
            outcome,
            result,
        });
    }

    /// Record a probe result, deriving the outcome from `passed`
    pub fn record(&mut self, descriptor: DescriptorSummary, result: ProbeResult) {
        let outcome = if result.passed {
            Outcome::Passed
        } else {
            Outcome::Failed
        };
        self.push(descriptor, outcome, result);
    }

    /// Every failed entry, in emission order
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.outcome == Outcome::Failed)
    }

    /// The first failure in emission order
    pub fn primary_blocker(&self) -> Option<&ReportEntry> {
        self.failures().next()
    }

    pub fn is_passing(&self) -> bool {
        self.failed_count == 0
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "passed={} failed={} skipped={} warned={}",
            self.passed_count, self.failed_count, self.skipped_count, self.warned_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str) -> DescriptorSummary {
        DescriptorSummary {
            id: id.to_string(),
            category: TestCategory::Structure,
            name: id.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_counts_and_primary_blocker() {
        let mut report = TestReport::new();
        report.record(summary("STRUCT-001"), ProbeResult::pass("ok"));
        report.record(summary("FR-001-LIST"), ProbeResult::fail("no list"));
        report.push(summary("FR-002-DISP"), Outcome::Skipped, ProbeResult::fail("boom"));
        report.record(summary("TODO-001"), ProbeResult::fail("no input"));
        report.push(summary("TC-AI-CFG-1"), Outcome::Warned, ProbeResult::fail("no model"));

        assert_eq!(report.passed_count, 1);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.warned_count, 1);
        assert_eq!(report.primary_blocker().unwrap().descriptor.id, "FR-001-LIST");
        assert!(!report.is_passing());
    }

    #[test]
    fn test_warnings_do_not_block() {
        let mut report = TestReport::new();
        report.push(summary("TC-I18N-1"), Outcome::Warned, ProbeResult::fail("none"));
        assert!(report.is_passing());
        assert!(report.primary_blocker().is_none());
    }
}
