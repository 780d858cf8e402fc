//! Self-registered test suites
//!
//! An artifact may ship its own checks as
//! `<script type="application/x-test-suite">[{"id", "name", "steps": [...]}]</script>`.
//! Each suite test becomes one `injected` report entry.
//!
//! In a sandbox that does not run scripts, a step that fails after an interaction on
//! a scripted page, or on a page whose scripts build markup, cannot be told apart from
//! a handler effect the sandbox never saw. Those tests are skipped, not failed.

use kiln_core::probe::{DescriptorSummary, Outcome, ProbeResult, TestCategory, TestReport};
use kiln_core::{ProbeError, SessionLog};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ProbeApi;
use crate::interceptor::OutboundRequest;
use crate::script_scan;

pub const SUITE_SCRIPT_TYPE: &str = "application/x-test-suite";

const MODULE: &str = "suite";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteTest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<SuiteStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SuiteStep {
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Select {
        selector: String,
        value: String,
    },
    Wait {
        ms: u64,
    },
    WaitFor {
        selector: String,
        #[serde(default)]
        timeout: Option<u64>,
    },
    AssertExists {
        selector: String,
    },
    AssertCount {
        selector: String,
        count: usize,
    },
    AssertText {
        selector: String,
        text: String,
    },
    AssertValue {
        selector: String,
        value: Value,
    },
    AssertNotValue {
        selector: String,
        value: Value,
    },
    AssertAttribute {
        selector: String,
        name: String,
        value: String,
    },
    AssertProperty {
        selector: String,
        name: String,
        value: Value,
    },
    AssertVisible {
        selector: String,
    },
    AssertHidden {
        selector: String,
    },
    AssertClass {
        selector: String,
        class: String,
    },
    SetStorage {
        key: String,
        value: Value,
    },
    AssertStorage {
        key: String,
        value: Value,
    },
    MockAi {
        response: Value,
    },
    Fetch {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        body: Option<Value>,
    },
    /// Last recorded model call, optionally containing `contains` in its URL or body
    AssertAiRequest {
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        count: Option<usize>,
    },
    ClearAiRequests,
    Log {
        message: String,
    },
}

impl SuiteStep {
    /// Steps that would fire the artifact's event handlers
    pub fn is_interaction(&self) -> bool {
        matches!(
            self,
            SuiteStep::Click { .. } | SuiteStep::Type { .. } | SuiteStep::Select { .. }
        )
    }
}

/// What a static sandbox can and cannot observe about the loaded page
#[derive(Debug, Clone, Copy, Default)]
struct ScriptReach {
    /// Scripts exist but never run
    inert_scripts: bool,
    /// Those scripts build markup at run time
    renders: bool,
}

impl ScriptReach {
    fn of(api: &ProbeApi<'_>) -> Self {
        let sandbox = api.sandbox();
        if sandbox.runs_scripts() {
            return Self::default();
        }
        let scripts = sandbox.script_text();
        Self {
            inert_scripts: !scripts.trim().is_empty(),
            renders: script_scan::renders_elements(&scripts),
        }
    }

    /// Whether a failed step may only reflect script effects the sandbox never ran
    fn masks(&self, err: &ProbeError, after_interaction: bool) -> bool {
        let observational = matches!(
            err,
            ProbeError::AssertionFailed(_) | ProbeError::ElementNotFound(_) | ProbeError::Timeout { .. }
        );
        observational && (self.renders || (self.inert_scripts && after_interaction))
    }
}

/// Suite text found in the document, if any
pub fn discover(api: &ProbeApi<'_>) -> Result<Option<String>, ProbeError> {
    let selector = format!("script[type=\"{}\"]", SUITE_SCRIPT_TYPE);
    let scripts = api.sandbox().query(&selector)?;
    if scripts.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        scripts
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join("\n"),
    ))
}

pub fn parse(text: &str) -> serde_json::Result<Vec<SuiteTest>> {
    serde_json::from_str(text)
}

fn summary(id: &str, name: &str) -> DescriptorSummary {
    DescriptorSummary {
        id: id.to_string(),
        category: TestCategory::Injected,
        name: name.to_string(),
        description: "Self-registered suite test".to_string(),
    }
}

async fn run_step(api: &mut ProbeApi<'_>, step: &SuiteStep, log: &SessionLog) -> Result<(), ProbeError> {
    match step {
        SuiteStep::Click { selector } => api.click(selector).await,
        SuiteStep::Type { selector, text } => api.type_text(selector, text).await,
        SuiteStep::Select { selector, value } => api.select(selector, value).await,
        SuiteStep::Wait { ms } => {
            api.wait(*ms).await;
            Ok(())
        }
        SuiteStep::WaitFor { selector, timeout } => api.wait_for(selector, *timeout).await,
        SuiteStep::AssertExists { selector } => {
            let exists = api.exists(selector)?;
            api.assert_ok(exists, &format!("{} does not exist", selector))
        }
        SuiteStep::AssertCount { selector, count } => {
            let actual = api.count(selector)?;
            api.assert_ok(
                actual == *count,
                &format!("{} matched {} elements, expected {}", selector, actual, count),
            )
        }
        SuiteStep::AssertText { selector, text } => api.assert_text(selector, text),
        SuiteStep::AssertValue { selector, value } => {
            let actual = Value::String(api.get_value(selector)?);
            api.assert_equal(&actual, value, &format!("{} value", selector))
        }
        SuiteStep::AssertNotValue { selector, value } => {
            let actual = Value::String(api.get_value(selector)?);
            api.assert_not_equal(&actual, value, &format!("{} value", selector))
        }
        SuiteStep::AssertAttribute {
            selector,
            name,
            value,
        } => api.assert_attribute(selector, name, value),
        SuiteStep::AssertProperty {
            selector,
            name,
            value,
        } => api.assert_property(selector, name, value),
        SuiteStep::AssertVisible { selector } => api.assert_visible(selector),
        SuiteStep::AssertHidden { selector } => {
            let visible = api.is_visible(selector)?;
            api.assert_ok(!visible, &format!("{} is visible", selector))
        }
        SuiteStep::AssertClass { selector, class } => api.assert_class_contains(selector, class),
        SuiteStep::SetStorage { key, value } => {
            api.set_storage(key, value);
            Ok(())
        }
        SuiteStep::AssertStorage { key, value } => {
            let actual = api.check_storage(key).unwrap_or(Value::Null);
            api.assert_equal(&actual, value, &format!("storage `{}`", key))
        }
        SuiteStep::MockAi { response } => {
            api.mock_ai_response(response.clone());
            Ok(())
        }
        SuiteStep::Fetch { url, method, body } => {
            let mut request = match body {
                Some(Value::String(raw)) => OutboundRequest::post(url, raw.clone()),
                Some(other) => OutboundRequest::post(url, other.to_string()),
                None => OutboundRequest::get(url),
            };
            if let Some(method) = method {
                request.method = method.to_uppercase();
            }
            api.fetch(request).map(|_| ())
        }
        SuiteStep::AssertAiRequest { contains, count } => {
            let requests = api.interceptor().get_all_ai_requests();
            if let Some(expected) = count {
                api.assert_ok(
                    requests.len() == *expected,
                    &format!("{} AI requests recorded, expected {}", requests.len(), expected),
                )?;
            }
            let last = requests
                .last()
                .ok_or_else(|| ProbeError::AssertionFailed("no AI request was made".to_string()))?;
            match contains {
                Some(needle) => {
                    let body = last.body.as_ref().map(Value::to_string).unwrap_or_default();
                    api.assert_ok(
                        last.url.contains(needle.as_str()) || body.contains(needle.as_str()),
                        &format!("last AI request does not mention `{}`", needle),
                    )
                }
                None => Ok(()),
            }
        }
        SuiteStep::ClearAiRequests => {
            api.interceptor().clear_ai_requests();
            Ok(())
        }
        SuiteStep::Log { message } => {
            log.info(MODULE, message.as_str());
            Ok(())
        }
    }
}

/// Run the document's self-registered suite into `report`.
///
/// Returns the number of entries added.
pub async fn run_injected(api: &mut ProbeApi<'_>, report: &mut TestReport, log: &SessionLog) -> usize {
    let text = match discover(api) {
        Ok(Some(text)) => text,
        Ok(None) => return 0,
        Err(err) => {
            log.warn(MODULE, format!("Suite discovery failed: {}", err));
            return 0;
        }
    };

    let tests = match parse(&text) {
        Ok(tests) => tests,
        Err(err) => {
            log.error(MODULE, format!("Malformed test suite: {}", err));
            report.record(
                summary("INJECTED-PARSE", "Self-registered suite is readable"),
                ProbeResult::fail(format!("malformed suite JSON: {}", err)),
            );
            return 1;
        }
    };

    log.info(MODULE, format!("Running {} self-registered tests", tests.len()));
    let reach = ScriptReach::of(api);
    for test in &tests {
        let mut interacted = false;
        let mut outcome = Ok(());
        for (idx, step) in test.steps.iter().enumerate() {
            if let Err(err) = run_step(api, step, log).await {
                let masked = reach.masks(&err, interacted);
                outcome = Err((masked, format!("step {}: {}", idx + 1, err)));
                break;
            }
            interacted |= step.is_interaction();
        }
        match outcome {
            Ok(()) => report.record(
                summary(&test.id, &test.name),
                ProbeResult::pass(format!("{} steps passed", test.steps.len())),
            ),
            Err((true, details)) => {
                log.warn(MODULE, format!("SKIP {}: needs script execution ({})", test.id, details));
                report.push(
                    summary(&test.id, &test.name),
                    Outcome::Skipped,
                    ProbeResult::fail(format!("needs script execution: {}", details)),
                );
            }
            Err((false, details)) => report.record(
                summary(&test.id, &test.name),
                ProbeResult::fail(format!("execution error: {}", details)),
            ),
        }
    }
    tests.len()
}
