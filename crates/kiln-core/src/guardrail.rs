//! Repair guardrails
//!
//! Blocks a repair candidate from replacing the live artifact when it looks like
//! a hallucinated rewrite: no document, no terminal marker, or too small.

use serde::{Deserialize, Serialize};

use crate::error::RepairError;
use crate::text::{contains_marker, extract_document, strip_think_blocks};

/// Outcome of reviewing one repair response
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailDecision {
    pub allowed: bool,
    pub reason: Option<RepairError>,
    /// Candidate size over live size, in bytes
    pub size_ratio: f64,
    /// The extracted document, present only when allowed
    pub candidate: Option<String>,
}

impl GuardrailDecision {
    fn reject(reason: RepairError, size_ratio: f64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            size_ratio,
            candidate: None,
        }
    }
}

/// Marker and size checks applied before a repair is committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairGuardrail {
    pub terminal_marker: String,
    pub min_size_ratio: f64,
}

impl RepairGuardrail {
    pub fn new(terminal_marker: impl Into<String>, min_size_ratio: f64) -> Self {
        Self {
            terminal_marker: terminal_marker.into(),
            min_size_ratio,
        }
    }

    /// Review a raw repair response against the live artifact
    pub fn evaluate(&self, live: &str, response: &str) -> GuardrailDecision {
        let doc = extract_document(response);

        if !doc.extracted {
            let cleaned = strip_think_blocks(response);
            let reason = if contains_marker(&cleaned, &self.terminal_marker) {
                RepairError::UnextractableArtifact
            } else {
                RepairError::MissingTerminalMarker {
                    marker: self.terminal_marker.clone(),
                }
            };
            return GuardrailDecision::reject(reason, 0.0);
        }

        let ratio = size_ratio(live, &doc.html);

        if !contains_marker(&doc.html, &self.terminal_marker) {
            return GuardrailDecision::reject(
                RepairError::MissingTerminalMarker {
                    marker: self.terminal_marker.clone(),
                },
                ratio,
            );
        }

        if ratio < self.min_size_ratio {
            return GuardrailDecision::reject(
                RepairError::SuspectedRegression {
                    ratio,
                    min_ratio: self.min_size_ratio,
                },
                ratio,
            );
        }

        GuardrailDecision {
            allowed: true,
            reason: None,
            size_ratio: ratio,
            candidate: Some(doc.html),
        }
    }
}

fn size_ratio(live: &str, candidate: &str) -> f64 {
    if live.is_empty() {
        return 1.0;
    }
    candidate.len() as f64 / live.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn page(body: &str) -> String {
        format!("<!DOCTYPE html><html><head><title>t</title></head><body>{}</body></html>", body)
    }

    #[test]
    fn test_identical_repair_is_accepted() {
        let live = page("<ul id=\"list\"></ul>");
        let guard = RepairGuardrail::new("</html>", 0.7);
        let decision = guard.evaluate(&live, &live);
        assert!(decision.allowed);
        assert_eq!(decision.candidate.as_deref(), Some(live.as_str()));
        assert!((decision.size_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shrunken_repair_is_rejected() {
        let live = page(&"x".repeat(1000));
        let repair = page(&"x".repeat(550));
        let decision = RepairGuardrail::new("</html>", 0.7).evaluate(&live, &repair);
        assert!(!decision.allowed);
        assert!(matches!(decision.reason, Some(RepairError::SuspectedRegression { .. })));
        assert!(decision.candidate.is_none());
    }

    #[test]
    fn test_response_without_document() {
        let guard = RepairGuardrail::new("</html>", 0.7);
        let decision = guard.evaluate(&page("a"), "Sorry, I cannot help with that.");
        assert_eq!(
            decision.reason,
            Some(RepairError::MissingTerminalMarker { marker: "</html>".into() })
        );

        let decision = guard.evaluate(&page("a"), "<body>half</body></html>");
        assert_eq!(decision.reason, Some(RepairError::UnextractableArtifact));
    }

    #[test]
    fn test_repair_is_cleaned_before_measuring() {
        let live = page("<p>hello</p>");
        let response = format!("<think>reasoning</think>```html\n{}\n```", live);
        let decision = RepairGuardrail::new("</html>", 0.7).evaluate(&live, &response);
        assert!(decision.allowed);
        assert_eq!(decision.candidate.as_deref(), Some(live.as_str()));
    }

    proptest! {
        #[test]
        fn prop_below_threshold_always_rejected(live_len in 200usize..3000, pct in 0usize..70) {
            let live = page(&"a".repeat(live_len));
            let target = live.len() * pct / 100;
            let filler = target.saturating_sub(page("").len());
            let repair = page(&"b".repeat(filler));
            prop_assume!((repair.len() as f64) < live.len() as f64 * 0.7);
            let decision = RepairGuardrail::new("</html>", 0.7).evaluate(&live, &repair);
            prop_assert!(!decision.allowed);
        }
    }
}
