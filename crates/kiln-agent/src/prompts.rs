//! Prompt construction for generation, continuation and repair.

use kiln_core::probe::{ReportEntry, TestReport};
use kiln_core::spec::SpecDocument;

pub const GENERATION_SYSTEM_PROMPT: &str = "You are a professional software engineer who follows \
Spec-Driven Development. You turn specifications into complete, runnable single-file web apps.";

pub const REPAIR_SYSTEM_PROMPT: &str =
    "You are a precise code debugger. Only fix specific issues. Return raw HTML.";

const NOT_PROVIDED: &str = "(not provided)";

/// Ask the model to resume a truncated response from `tail`
pub fn continuation_prompt(tail: &str) -> String {
    let flattened = tail.replace(['\r', '\n'], " ");
    format!(
        "The previous output was truncated because of length limits.\n\
         Please CONTINUE generating the HTML code EXACTLY from where it stopped.\n\n\
         The last part of the code was ending with:\n\
         \"...{}\"\n\n\
         INSTRUCTIONS:\n\
         1. Do NOT repeat the last part provided above.\n\
         2. Start immediately with the next character.\n\
         3. Output ONLY the remaining code.",
        flattened
    )
}

/// Initial implementation prompt for a specification
pub fn generation_prompt(spec: &SpecDocument, skills: &str) -> String {
    let checklist = spec.checklist_markdown();
    let mut prompt = String::from(
        "# Role\nYou are an elite full-stack engineer. Implement the specification below as a \
         SINGLE, SELF-CONTAINED HTML FILE.\n",
    );

    if !skills.is_empty() {
        prompt.push_str(skills);
        prompt.push('\n');
    }

    if !spec.feature_name().is_empty() {
        prompt.push_str(&format!("\n# Feature\n{}\n", spec.feature_name()));
    }
    prompt.push_str(&format!("\n# Specification\n{}\n", spec.text().trim()));
    prompt.push_str(&format!(
        "\n# CHECKLIST\n{}\n",
        checklist.as_deref().unwrap_or(NOT_PROVIDED)
    ));

    prompt.push_str(
        "\n# Rules\n\
         1. **One file**: all CSS inside <style>, all JavaScript inside <script>. No requests to other \
         origins except CDN stylesheets and fonts.\n\
         2. **Full logic**: implement every requirement. No placeholders, no \"TODO\" stubs.\n\
         3. **Stable IDs**: give every interactive element a descriptive id. The result is checked by \
         automated structural probes that read the HTML without executing scripts, so declare inputs, \
         buttons, lists and boards in the markup instead of creating them only from JavaScript.\n\
         4. **Clean scripts**: never put markdown fences inside <script>. Do not instantiate classes you \
         did not define.\n\
         5. **Own checks (optional)**: you may ship checks as \
         <script type=\"application/x-test-suite\"> holding a JSON array of \
         {\"id\", \"name\", \"steps\": [{\"action\": \"assert_exists\" | \"assert_count\" | \"assert_attribute\" | ..., ...}]}. \
         Scripts are not executed while checks run: assert on what the markup declares, never on what a \
         click or type handler would change.\n\
         6. **Complete document**: start with <!DOCTYPE html> and end with </html>.\n\
         \n# Output\nReturn the full HTML file only.",
    );
    prompt
}

fn failure_hint(details: &str) -> &'static str {
    if details.contains("undefined") {
        "context may be lost or not injected"
    } else if details.contains("Button") && details.contains("not found") {
        "check that the ID/text matches"
    } else {
        ""
    }
}

fn failure_line(index: usize, entry: &ReportEntry) -> String {
    let marker = if index == 0 { "🔺 [PRIMARY] " } else { "- " };
    let hint = failure_hint(&entry.result.details);
    let mut line = format!(
        "{}[{}] {}: {}",
        marker, entry.descriptor.id, entry.descriptor.name, entry.result.details
    );
    if !hint.is_empty() {
        line.push_str(&format!(" ({})", hint));
    }
    line
}

/// Every failure, primary blocker first
pub fn failure_table(report: &TestReport) -> String {
    report
        .failures()
        .enumerate()
        .map(|(idx, entry)| failure_line(idx, entry))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Query used to rank skills against the current failures
pub fn skill_query(report: &TestReport) -> String {
    let names: Vec<&str> = report
        .failures()
        .map(|e| e.descriptor.name.as_str())
        .collect();
    let primary = report
        .primary_blocker()
        .map(|e| e.result.details.as_str())
        .unwrap_or_default();
    format!(
        "Failures: {}. Details of primary blocker: {}",
        names.join(", "),
        primary
    )
}

/// Inputs of one diagnostic prompt
#[derive(Debug, Clone)]
pub struct RepairPrompt<'a> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub report: &'a TestReport,
    pub checklist: Option<&'a str>,
    pub current_code: &'a str,
    /// Rendered skill sections, possibly empty
    pub skills: &'a str,
}

impl RepairPrompt<'_> {
    /// `None` when the report has no failure to repair
    pub fn render(&self) -> Option<String> {
        let primary = self.report.primary_blocker()?;
        let id = &primary.descriptor.id;

        let mut prompt = format!(
            "# Role\nYou are an expert debugger. This is an ITERATIVE fixing attempt (repair attempt #{} of {}).\n",
            self.attempt, self.max_attempts
        );
        if !self.skills.is_empty() {
            prompt.push_str(self.skills);
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "\n# Priority Goal\nPass the PRIMARY failure: [{}] {}.\nSecondary goal: Pass other identified failures.\n",
            id, primary.descriptor.name
        ));
        prompt.push_str(&format!(
            "\n# Test Failure Report (Current State)\n{}\n",
            failure_table(self.report)
        ));
        prompt.push_str(&format!(
            "\n# Instructions\n\
             1. **Focus on the Blocker**: Solve [{}] first. If it is a context/undefined error, apply the skill rules strictly.\n\
             2. **Code Integrity**: Use the correct HTML IDs from the current file. Do NOT invent IDs.\n\
             3. **Compliance Check**: CROSS-REFERENCE your fix with the `CHECKLIST` below. Ensure no functional requirements are broken or missing.\n\
             4. **Self-registered Suite**: If the embedded `application/x-test-suite` checks need adjustment to match the HTML, update that block. Those checks run without executing scripts.\n",
            id
        ));
        prompt.push_str(&format!(
            "\n# CHECKLIST\n{}\n",
            self.checklist.unwrap_or(NOT_PROVIDED)
        ));
        prompt.push_str(&format!("\n# Current Code\n{}\n", self.current_code));
        prompt.push_str("\n# Fixed Code (FULL FILE):");
        Some(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::probe::{DescriptorSummary, ProbeResult, TestCategory};

    fn summary(id: &str, name: &str) -> DescriptorSummary {
        DescriptorSummary {
            id: id.into(),
            category: TestCategory::Element,
            name: name.into(),
            description: String::new(),
        }
    }

    fn failing_report() -> TestReport {
        let mut report = TestReport::new();
        report.record(summary("STRUCT-001", "Document root"), ProbeResult::pass("ok"));
        report.record(
            summary("FR-001-BTN-1", "Button 新增"),
            ProbeResult::fail("Button \"新增\" not found"),
        );
        report.record(
            summary("T-1", "adds a todo"),
            ProbeResult::fail("execution error: step 2: app is undefined"),
        );
        report
    }

    #[test]
    fn test_continuation_prompt_flattens_tail() {
        let prompt = continuation_prompt("<div>\n  <span>");
        assert!(prompt.contains("\"...<div>   <span>\""));
        assert!(prompt.contains("Do NOT repeat"));
    }

    #[test]
    fn test_failure_table_marks_primary() {
        let table = failure_table(&failing_report());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("🔺 [PRIMARY] [FR-001-BTN-1]"));
        assert!(lines[0].ends_with("(check that the ID/text matches)"));
        assert!(lines[1].starts_with("- [T-1]"));
        assert!(lines[1].ends_with("(context may be lost or not injected)"));
    }

    #[test]
    fn test_repair_prompt_sections_in_order() {
        let report = failing_report();
        let prompt = RepairPrompt {
            attempt: 2,
            max_attempts: 3,
            report: &report,
            checklist: None,
            current_code: "<!DOCTYPE html><html></html>",
            skills: "",
        }
        .render()
        .unwrap();

        let order = [
            "# Role",
            "repair attempt #2 of 3",
            "# Priority Goal",
            "Pass the PRIMARY failure: [FR-001-BTN-1] Button 新增.",
            "# Test Failure Report (Current State)",
            "# Instructions",
            "# CHECKLIST\n(not provided)",
            "# Current Code\n<!DOCTYPE html><html></html>",
            "# Fixed Code (FULL FILE):",
        ];
        let mut cursor = 0;
        for needle in order {
            let found = prompt[cursor..].find(needle).unwrap_or_else(|| panic!("missing {}", needle));
            cursor += found + needle.len();
        }
    }

    #[test]
    fn test_no_prompt_without_failures() {
        let report = TestReport::new();
        let prompt = RepairPrompt {
            attempt: 1,
            max_attempts: 3,
            report: &report,
            checklist: None,
            current_code: "",
            skills: "",
        };
        assert!(prompt.render().is_none());
    }

    #[test]
    fn test_skill_query_names_failures() {
        let query = skill_query(&failing_report());
        assert!(query.starts_with("Failures: Button 新增, adds a todo."));
        assert!(query.contains("Button \"新增\" not found"));
    }

    #[test]
    fn test_generation_prompt_includes_checklist() {
        let spec = SpecDocument::from_text("A todo list").with_items(
            vec![kiln_core::SpecItem::new("FR-001", "Add todos")],
            vec![],
        );
        let prompt = generation_prompt(&spec, "");
        assert!(prompt.contains("# Specification\nA todo list"));
        assert!(prompt.contains("- [ ] FR-001: Add todos"));
        assert!(prompt.contains("end with </html>"));
    }

    #[test]
    fn test_generation_prompt_asks_for_static_checks() {
        let prompt = generation_prompt(&SpecDocument::from_text("A todo list"), "");
        assert!(prompt.contains("Scripts are not executed while checks run"));
        assert!(prompt.contains("declare inputs, buttons, lists and boards in the markup"));
        assert!(!prompt.contains("\"assert_text\""));
    }
}
