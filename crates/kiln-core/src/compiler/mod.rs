//! Specification-to-Test Compiler
//!
//! Maps a [`SpecDocument`] to an ordered list of deterministic [`TestCaseDescriptor`]s.
//! The mapping is data-driven: a requirement keyword battery ([`patterns`]) runs over
//! every requirement and success criterion, then a feature catalog ([`features`]) runs
//! over the feature name. Matching is additive and never fails; a spec that matches
//! nothing still yields the structural baseline.

pub mod features;
pub mod patterns;

use std::collections::HashSet;

use crate::error::ProbeError;
use crate::probe::{ProbeResult, TestCaseDescriptor, TestCategory};
use crate::sandbox::Sandbox;
use crate::spec::{SpecDocument, SpecItem};

pub use features::{FeatureProbe, FeatureRule};
pub use patterns::{Emit, PatternRule};

/// A check bound into a descriptor
pub type ProbeFn = fn(&dyn Sandbox) -> Result<ProbeResult, ProbeError>;

/// Rule-driven compiler
#[derive(Debug, Clone)]
pub struct SpecCompiler {
    patterns: Vec<PatternRule>,
    features: Vec<FeatureRule>,
}

impl Default for SpecCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecCompiler {
    /// Compiler with the built-in battery and catalog
    pub fn new() -> Self {
        Self {
            patterns: patterns::standard_battery(),
            features: features::standard_catalog(),
        }
    }

    /// Compiler with custom tables
    pub fn with_tables(patterns: Vec<PatternRule>, features: Vec<FeatureRule>) -> Self {
        Self { patterns, features }
    }

    pub fn patterns(&self) -> &[PatternRule] {
        &self.patterns
    }

    pub fn features(&self) -> &[FeatureRule] {
        &self.features
    }

    /// Compile a specification into probes, baseline first
    pub fn compile(&self, spec: &SpecDocument) -> Vec<TestCaseDescriptor> {
        let mut cases = baseline();

        cases.extend(self.expand_items("FR", spec.requirements()));
        cases.extend(self.expand_items("SC", spec.success_criteria()));

        // Without a feature name the whole text stands in for it
        let haystack = if spec.feature_name().trim().is_empty() {
            spec.text().to_lowercase()
        } else {
            spec.feature_name().to_lowercase()
        };
        for rule in &self.features {
            if rule.matches(&haystack) {
                cases.extend(rule.descriptors());
            }
        }

        let mut seen = HashSet::new();
        cases.retain(|case| seen.insert(case.id.clone()));

        tracing::debug!(
            requirements = spec.requirements().len(),
            criteria = spec.success_criteria().len(),
            descriptors = cases.len(),
            "Compiled specification"
        );
        cases
    }

    fn expand_items(&self, kind: &str, items: &[SpecItem]) -> Vec<TestCaseDescriptor> {
        let mut cases = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            if item.text.trim().is_empty() {
                continue;
            }
            let prefix = format!("{}-{:03}", kind, idx + 1);
            let lowered = item.text.to_lowercase();
            for rule in &self.patterns {
                if rule.matches(&lowered) {
                    cases.extend(rule.emit(&prefix, &item.text));
                }
            }
        }
        cases
    }
}

/// Compile with the built-in tables
pub fn compile(spec: &SpecDocument) -> Vec<TestCaseDescriptor> {
    SpecCompiler::new().compile(spec)
}

/// Case-folded substring match; `haystack` must already be lowercase
pub(crate) fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

const BASELINE_IDS: &[&str] = &["STRUCT-001", "STRUCT-002", "STRUCT-003"];

/// Whether `id` is one of the structural cases every specification gets
pub fn is_baseline(id: &str) -> bool {
    BASELINE_IDS.contains(&id)
}

/// Structural cases every specification gets
fn baseline() -> Vec<TestCaseDescriptor> {
    vec![
        TestCaseDescriptor::new(
            "STRUCT-001",
            TestCategory::Structure,
            "Document structure is complete",
            "DOCTYPE, <html>, <head> and <body> are present",
            check_document_structure,
        ),
        TestCaseDescriptor::new(
            "STRUCT-002",
            TestCategory::Structure,
            "Page title exists",
            "A non-empty <title> element is present",
            check_title,
        ),
        TestCaseDescriptor::new(
            "STRUCT-003",
            TestCategory::Structure,
            "Scripts load without errors",
            "The loader recorded no script evaluation error",
            check_load_error,
        ),
    ]
}

fn check_document_structure(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let report = sandbox.load_report().ok_or(ProbeError::NotLoaded)?;
    let doctype = report.has_doctype;
    let html = sandbox.declares_tag("html");
    let head = sandbox.declares_tag("head");
    let body = sandbox.declares_tag("body");
    Ok(ProbeResult::check(
        doctype && html && head && body,
        format!(
            "DOCTYPE: {}, <html>: {}, <head>: {}, <body>: {}",
            mark(doctype),
            mark(html),
            mark(head),
            mark(body)
        ),
    ))
}

fn check_title(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let title = sandbox
        .query_first("title")?
        .map(|t| t.text_trimmed().to_string())
        .filter(|t| !t.is_empty());
    Ok(match title {
        Some(t) => ProbeResult::pass(format!("Title: \"{}\"", t)),
        None => ProbeResult::fail("No <title> element, or the title is empty"),
    })
}

fn check_load_error(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    if !sandbox.is_loaded() {
        return Err(ProbeError::NotLoaded);
    }
    Ok(match sandbox.load_error() {
        Some(err) => ProbeResult::fail(format!("Error: {}", err)),
        None => ProbeResult::pass("Scripts evaluated cleanly"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(cases: &[TestCaseDescriptor]) -> Vec<String> {
        cases.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn test_unmatched_spec_yields_baseline_only() {
        let cases = compile(&SpecDocument::from_text("lorem ipsum"));
        assert_eq!(ids(&cases), vec!["STRUCT-001", "STRUCT-002", "STRUCT-003"]);
    }

    #[test]
    fn test_requirement_prefixes_follow_position() {
        let spec = SpecDocument::from_text("").with_items(
            vec![
                SpecItem::new("FR-001", "Show the list of tasks"),
                SpecItem::new("FR-002", ""),
                SpecItem::new("FR-003", "Users can delete a task"),
            ],
            vec![SpecItem::new("SC-001", "Responsive on phones")],
        );
        let got = ids(&compile(&spec));
        assert!(got.contains(&"FR-001-DISP".to_string()));
        assert!(got.contains(&"FR-001-LIST".to_string()));
        assert!(got.contains(&"FR-003-DEL".to_string()));
        assert!(got.contains(&"SC-001-RESP".to_string()));
        assert!(!got.iter().any(|id| id.starts_with("FR-002")));
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let spec = SpecDocument::from_text("")
            .with_feature_name("Todo tasks")
            .with_items(vec![], vec![]);
        let compiler = SpecCompiler::with_tables(
            vec![],
            vec![features::standard_catalog()[3].clone(), features::standard_catalog()[3].clone()],
        );
        let got = ids(&compiler.compile(&spec));
        assert_eq!(got.iter().filter(|id| *id == "TODO-001").count(), 1);
    }

    #[test]
    fn test_feature_name_takes_precedence_over_text() {
        let spec = SpecDocument::from_text("a todo list").with_feature_name("Calculator");
        let got = ids(&compile(&spec));
        assert!(got.contains(&"CALC-001".to_string()));
        assert!(!got.contains(&"TODO-001".to_string()));
    }
}
