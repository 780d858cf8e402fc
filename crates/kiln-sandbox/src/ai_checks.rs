//! Advisory checks for artifacts that call a generative model themselves.
//!
//! These never block acceptance: a miss is reported as a warning.

use kiln_core::probe::{ProbeResult, TestCaseDescriptor, TestCategory};
use kiln_core::sandbox::Sandbox;
use kiln_core::ProbeError;
use lazy_static::lazy_static;
use regex::Regex;

use crate::interceptor::AI_HOSTS;

lazy_static! {
    static ref CJK: Regex = Regex::new(r"[\u{4e00}-\u{9fff}]").unwrap();
}

type Check = fn(&dyn Sandbox) -> Result<ProbeResult, ProbeError>;

fn descriptors(prefix: &str, checks: &[(&'static str, Check)]) -> Vec<TestCaseDescriptor> {
    checks
        .iter()
        .enumerate()
        .map(|(idx, (name, check))| {
            TestCaseDescriptor::new(
                format!("{}-{}", prefix, idx + 1),
                TestCategory::AiIntegration,
                *name,
                "Advisory AI integration check",
                *check,
            )
        })
        .collect()
}

fn any_exists(sandbox: &dyn Sandbox, selectors: &[&str]) -> Result<bool, ProbeError> {
    for selector in selectors {
        if sandbox.exists(selector)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether the artifact references a known model host
pub fn talks_to_model(sandbox: &dyn Sandbox) -> bool {
    let source = sandbox.source();
    AI_HOSTS.iter().any(|host| source.contains(host))
}

fn verdict(found: bool, yes: &str, no: &str) -> ProbeResult {
    ProbeResult::check(found, if found { yes } else { no })
}

fn model_configured(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = s.source().contains("gemini-2.5-flash");
    Ok(verdict(found, "gemini-2.5-flash model found", "no gemini-2.5-flash model configuration"))
}

fn endpoint_configured(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = s.source().contains("generativelanguage.googleapis.com");
    Ok(verdict(found, "Google AI endpoint found", "no Google AI endpoint"))
}

fn key_handling(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let source = s.source();
    let found = ["gemini_api_key", "api_key", "apiKey"]
        .iter()
        .any(|k| source.contains(k));
    Ok(verdict(found, "API key handling code found", "no API key handling code"))
}

fn settings_entry(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = any_exists(
        s,
        &[
            "[id*=\"setting\"]",
            "[class*=\"setting\"]",
            "[id*=\"config\"]",
            "[class*=\"config\"]",
            "button[title*=\"設定\"]",
            "button[title*=\"Setting\"]",
        ],
    )?;
    Ok(verdict(found, "settings entry found", "no settings button"))
}

fn input_area(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = any_exists(
        s,
        &["textarea", "input[type=\"text\"]", "[contenteditable=\"true\"]"],
    )?;
    Ok(verdict(found, "input area found", "no usable input area"))
}

fn result_area(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = any_exists(
        s,
        &[
            "[id*=\"result\"]",
            "[id*=\"output\"]",
            "[id*=\"response\"]",
            "[class*=\"result\"]",
            "[class*=\"output\"]",
            "[class*=\"response\"]",
        ],
    )?;
    Ok(verdict(found, "result area found", "no result area"))
}

fn loading_indicator(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = any_exists(
        s,
        &[
            "[class*=\"loading\"]",
            "[class*=\"spinner\"]",
            "[class*=\"progress\"]",
            ".animate-spin",
            "[class*=\"loader\"]",
        ],
    )?;
    Ok(verdict(found, "loading indicator found", "no loading indicator (may be hidden)"))
}

fn translation_mechanism(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let source = s.source();
    let found = ["translations", "i18n", "locale", "lang"]
        .iter()
        .any(|k| source.contains(k));
    Ok(verdict(found, "i18n code found", "no i18n mechanism"))
}

fn language_toggle(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = any_exists(
        s,
        &["[class*=\"lang\"]", "[id*=\"lang\"]", "[data-i18n]", "[class*=\"locale\"]"],
    )? || s.query("button")?.iter().any(|b| b.text.contains('🌐'));
    Ok(verdict(found, "language toggle found", "no language toggle"))
}

fn chinese_content(s: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = CJK.is_match(&s.body_text());
    Ok(verdict(found, "page contains Chinese", "no Chinese content"))
}

/// TC-AI-CFG: model string, endpoint, key handling
pub fn verify_ai_config() -> Vec<TestCaseDescriptor> {
    descriptors(
        "TC-AI-CFG",
        &[
            ("Gemini model configured", model_configured),
            ("API endpoint configured", endpoint_configured),
            ("API key handling", key_handling),
        ],
    )
}

/// TC-AI-UI: settings entry, input area, result area, loading indicator
pub fn verify_ai_ui() -> Vec<TestCaseDescriptor> {
    descriptors(
        "TC-AI-UI",
        &[
            ("Settings entry exists", settings_entry),
            ("AI input area exists", input_area),
            ("AI result area exists", result_area),
            ("Loading indicator exists", loading_indicator),
        ],
    )
}

/// TC-I18N: translation mechanism, language toggle, CJK content
pub fn verify_i18n() -> Vec<TestCaseDescriptor> {
    descriptors(
        "TC-I18N",
        &[
            ("Translation mechanism exists", translation_mechanism),
            ("Language toggle exists", language_toggle),
            ("Contains Chinese content", chinese_content),
        ],
    )
}

/// Every advisory check, in report order
pub fn all_checks() -> Vec<TestCaseDescriptor> {
    let mut checks = verify_ai_config();
    checks.extend(verify_ai_ui());
    checks.extend(verify_i18n());
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::StaticDomSandbox;

    #[test]
    fn test_ids_and_results() {
        let mut sandbox = StaticDomSandbox::new();
        sandbox
            .load(
                r#"<html lang="zh"><body>
                <button id="settings-btn">⚙</button>
                <textarea id="prompt"></textarea>
                <div id="result"></div>
                <p>你好</p>
                <script>const URL = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=" + apiKey;</script>
                </body></html>"#,
            )
            .unwrap();
        assert!(talks_to_model(&sandbox));

        let checks = all_checks();
        let ids: Vec<&str> = checks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids[0], "TC-AI-CFG-1");
        assert_eq!(ids[3], "TC-AI-UI-1");
        assert_eq!(ids[9], "TC-I18N-3");

        let passed: Vec<bool> = checks
            .iter()
            .map(|c| c.verify(&sandbox).unwrap().passed)
            .collect();
        assert_eq!(
            passed,
            vec![true, true, true, true, true, true, false, true, false, true]
        );
    }
}
