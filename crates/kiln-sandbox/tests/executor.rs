use kiln_core::compiler::compile;
use kiln_core::probe::{Outcome, ProbeResult, TestCaseDescriptor, TestCategory};
use kiln_core::sandbox::{ElementSnapshot, LoadReport, Sandbox, SandboxAction};
use kiln_core::{AiCheckMode, ExecutorSettings, ProbeError, SpecDocument};
use kiln_sandbox::{script_scan, ProbeExecutor};
use proptest::prelude::*;
use serde_json::json;

fn instant() -> ExecutorSettings {
    ExecutorSettings {
        load_settle_ms: 0,
        click_settle_ms: 0,
        input_settle_ms: 0,
        between_probes_ms: 0,
        wait_for_timeout_ms: 0,
        wait_poll_ms: 0,
        ai_checks: AiCheckMode::Auto,
    }
}

const TODO_PAGE: &str = r#"<!DOCTYPE html>
<html lang="zh-TW">
<head><title>待辦清單</title></head>
<body>
  <input id="new-todo" placeholder="新增待辦事項">
  <button id="add-btn">新增</button>
  <ul id="todo-list"></ul>
  <script>
    const list = document.getElementById('todo-list');
    document.getElementById('add-btn').addEventListener('click', () => {
      const li = document.createElement('li');
      li.innerHTML = `<input type="checkbox"> ${text} <button class="delete">x</button>`;
      list.appendChild(li);
    });
    list.addEventListener('click', (e) => { if (e.target.checked) e.target.remove(); });
  </script>
</body>
</html>"#;

fn outcome_of(report: &kiln_core::TestReport, id: &str) -> Outcome {
    report
        .entries
        .iter()
        .find(|e| e.descriptor.id == id)
        .map(|e| e.outcome)
        .unwrap_or_else(|| panic!("no entry {}", id))
}

#[tokio::test]
async fn test_todo_page_passes_todo_probe() {
    let spec = SpecDocument::from_text("新增待辦事項，含輸入框與新增按鈕");
    let report = ProbeExecutor::new(instant())
        .execute(TODO_PAGE, &compile(&spec))
        .await;

    assert_eq!(outcome_of(&report, "STRUCT-001"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "STRUCT-002"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "STRUCT-003"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "TODO-001"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "TODO-002"), Outcome::Passed);
    assert!(report.is_passing());
}

#[tokio::test]
async fn test_script_fault_is_primary_blocker() {
    let broken = TODO_PAGE.replace("list.appendChild(li);\n    });", "list.appendChild(li);\n    ");
    let spec = SpecDocument::from_text("todo");
    let report = ProbeExecutor::new(instant())
        .execute(&broken, &compile(&spec))
        .await;

    let blocker = report.primary_blocker().expect("a failure");
    assert_eq!(blocker.descriptor.id, "STRUCT-003");
    assert!(blocker.result.details.contains("SyntaxError"));
}

#[tokio::test]
async fn test_faulting_probes_are_skipped_not_fatal() {
    let descriptors = vec![
        TestCaseDescriptor::new("P-1", TestCategory::Element, "panics", "", |_: &dyn Sandbox| -> Result<ProbeResult, ProbeError> {
            panic!("probe blew up")
        }),
        TestCaseDescriptor::new("P-2", TestCategory::Element, "errors", "", |s: &dyn Sandbox| {
            s.query("div[[[").map(|_| ProbeResult::pass("unreachable"))
        }),
        TestCaseDescriptor::new("P-3", TestCategory::Element, "passes", "", |s: &dyn Sandbox| {
            Ok(ProbeResult::check(s.exists("#add-btn")?, "add button"))
        }),
    ];
    let report = ProbeExecutor::new(instant())
        .execute(TODO_PAGE, &descriptors)
        .await;

    assert_eq!(report.skipped_count, 2);
    assert_eq!(report.passed_count, 1);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.entries[0].result.details, "probe blew up");
    assert!(report.entries[1].result.details.starts_with("Invalid selector"));
}

#[derive(Default)]
struct UnavailableSandbox;

impl Sandbox for UnavailableSandbox {
    fn load(&mut self, _artifact: &str) -> Result<LoadReport, ProbeError> {
        Err(ProbeError::Sandbox("engine unavailable".into()))
    }
    fn is_loaded(&self) -> bool {
        false
    }
    fn query(&self, _selector: &str) -> Result<Vec<ElementSnapshot>, ProbeError> {
        Err(ProbeError::NotLoaded)
    }
    fn dispatch(&mut self, _action: &SandboxAction) -> Result<(), ProbeError> {
        Err(ProbeError::NotLoaded)
    }
    fn read_storage(&self, _key: &str) -> Option<String> {
        None
    }
    fn write_storage(&mut self, _key: &str, _value: String) {}
    fn load_report(&self) -> Option<&LoadReport> {
        None
    }
    fn source(&self) -> &str {
        ""
    }
    fn script_text(&self) -> String {
        String::new()
    }
    fn style_text(&self) -> String {
        String::new()
    }
    fn body_text(&self) -> String {
        String::new()
    }
}

#[tokio::test]
async fn test_unavailable_sandbox_skips_everything() {
    let descriptors = compile(&SpecDocument::from_text("todo"));
    let mut sandbox = UnavailableSandbox;
    let report = ProbeExecutor::new(instant())
        .execute_in(&mut sandbox, TODO_PAGE, &descriptors)
        .await;
    assert_eq!(report.skipped_count, descriptors.len());
    assert!(report.is_passing());
}

/// The todo page without its script
const STATIC_TODO_PAGE: &str = r#"<!DOCTYPE html>
<html lang="zh-TW">
<head><title>待辦清單</title></head>
<body>
  <input id="new-todo" placeholder="新增待辦事項">
  <button id="add-btn">新增</button>
  <ul id="todo-list"></ul>
</body>
</html>"#;

fn with_suite(page: &str, suite: &str) -> String {
    page.replace(
        "</body>",
        &format!(
            "<script type=\"application/x-test-suite\">{}</script></body>",
            suite
        ),
    )
}

#[tokio::test]
async fn test_self_registered_suite_is_merged() {
    let page = with_suite(
        STATIC_TODO_PAGE,
        r##"
[
  {"id": "T-1", "name": "typing fills the field", "steps": [
    {"action": "type", "selector": "#new-todo", "text": "買牛奶"},
    {"action": "assert_value", "selector": "#new-todo", "value": "買牛奶"},
    {"action": "click", "selector": "#add-btn"},
    {"action": "set_storage", "key": "todos", "value": ["買牛奶"]},
    {"action": "assert_storage", "key": "todos", "value": ["買牛奶"]}
  ]},
  {"id": "T-2", "name": "counter exists", "steps": [
    {"action": "assert_exists", "selector": "#counter"}
  ]},
  {"id": "T-3", "name": "adding shows an item", "steps": [
    {"action": "click", "selector": "#add-btn"},
    {"action": "assert_count", "selector": "#todo-list li", "count": 1}
  ]}
]
"##,
    );
    let report = ProbeExecutor::new(instant()).execute(&page, &[]).await;

    assert_eq!(report.entries.len(), 3);
    assert!(report
        .entries
        .iter()
        .all(|e| e.descriptor.category == TestCategory::Injected));
    assert_eq!(outcome_of(&report, "T-1"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "T-2"), Outcome::Failed);
    assert!(report.entries[1]
        .result
        .details
        .starts_with("execution error"));
    // no script on the page, so nothing could have added the item
    assert_eq!(outcome_of(&report, "T-3"), Outcome::Failed);
}

#[tokio::test]
async fn test_handler_effects_are_skipped_not_failed() {
    let page = with_suite(
        TODO_PAGE,
        r##"[{"id": "T-1", "name": "adds a todo", "steps": [
            {"action": "type", "selector": "#new-todo", "text": "milk"},
            {"action": "click", "selector": "#add-btn"},
            {"action": "assert_count", "selector": "#todo-list li", "count": 1}
        ]}]"##,
    );
    let report = ProbeExecutor::new(instant()).execute(&page, &[]).await;

    assert_eq!(outcome_of(&report, "T-1"), Outcome::Skipped);
    assert!(report.entries[0]
        .result
        .details
        .starts_with("needs script execution: step 3"));
    assert_eq!(report.failed_count, 0);
    assert!(report.is_passing());
}

#[tokio::test]
async fn test_class_toggle_after_click_is_skipped() {
    let page = r##"<!DOCTYPE html>
<html><head><title>Toggle</title></head>
<body>
  <button id="theme">Dark mode</button>
  <script>
    document.getElementById('theme').addEventListener('click', () => document.body.classList.toggle('dark'));
  </script>
  <script type="application/x-test-suite">
  [{"id": "T-1", "name": "toggles the theme", "steps": [
    {"action": "click", "selector": "#theme"},
    {"action": "assert_class", "selector": "body", "class": "dark"}
  ]},
  {"id": "T-2", "name": "bad selector is still a failure", "steps": [
    {"action": "click", "selector": "#theme"},
    {"action": "assert_exists", "selector": "div[[["}
  ]}]
  </script>
</body></html>"##;
    let report = ProbeExecutor::new(instant()).execute(page, &[]).await;

    assert_eq!(outcome_of(&report, "T-1"), Outcome::Skipped);
    assert_eq!(outcome_of(&report, "T-2"), Outcome::Failed);
}

const TIC_TAC_TOE_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>井字遊戲</title></head>
<body>
  <div id="status" class="status">X 的回合</div>
  <div id="board" class="board"></div>
  <script>
    const board = document.getElementById('board');
    const status = document.getElementById('status');
    let turn = 'X';
    for (let i = 0; i < 9; i++) {
      const cell = document.createElement('button');
      cell.className = 'cell';
      cell.addEventListener('click', () => {
        if (cell.textContent) return;
        cell.textContent = turn;
        turn = turn === 'X' ? 'O' : 'X';
        status.textContent = `${turn} 的回合`;
      });
      board.appendChild(cell);
    }
  </script>
</body></html>"#;

#[tokio::test]
async fn test_script_built_board_is_not_a_failure() {
    let spec = SpecDocument::from_markdown("---\nfeatureName: 井字遊戲 tic tac toe\n---\n");
    let report = ProbeExecutor::new(instant())
        .execute(TIC_TAC_TOE_PAGE, &compile(&spec))
        .await;

    assert_eq!(outcome_of(&report, "STRUCT-003"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "GAME-001"), Outcome::Skipped);
    assert_eq!(outcome_of(&report, "GAME-GEN-001"), Outcome::Skipped);
    assert_eq!(outcome_of(&report, "GAME-GEN-002"), Outcome::Passed);
    assert!(report
        .entries
        .iter()
        .filter(|e| e.outcome == Outcome::Skipped)
        .all(|e| e.result.details.starts_with("needs script execution")));
    assert_eq!(report.failed_count, 0);
}

#[tokio::test]
async fn test_baseline_still_fails_on_scripted_page() {
    let untitled = TIC_TAC_TOE_PAGE.replace("<title>井字遊戲</title>", "");
    let spec = SpecDocument::from_markdown("---\nfeatureName: 井字遊戲\n---\n");
    let report = ProbeExecutor::new(instant())
        .execute(&untitled, &compile(&spec))
        .await;

    assert_eq!(outcome_of(&report, "STRUCT-002"), Outcome::Failed);
    assert_eq!(report.primary_blocker().unwrap().descriptor.id, "STRUCT-002");
}

#[tokio::test]
async fn test_static_board_still_fails() {
    let spec = SpecDocument::from_markdown("---\nfeatureName: tic tac toe\n---\n");
    let page = "<!DOCTYPE html><html><head><title>T</title></head><body><div class=\"board\"></div></body></html>";
    let report = ProbeExecutor::new(instant())
        .execute(page, &compile(&spec))
        .await;
    assert_eq!(outcome_of(&report, "GAME-001"), Outcome::Failed);
}

#[tokio::test]
async fn test_malformed_suite_is_one_failed_entry() {
    let page = TODO_PAGE.replace(
        "</body>",
        "<script type=\"application/x-test-suite\">[{\"id\": </script></body>",
    );
    let report = ProbeExecutor::new(instant()).execute(&page, &[]).await;
    assert_eq!(report.failed_count, 1);
    assert_eq!(outcome_of(&report, "INJECTED-PARSE"), Outcome::Failed);
}

const AI_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>AI 助手</title></head>
<body>
  <textarea id="prompt"></textarea>
  <button id="ask">Ask</button>
  <div id="output"></div>
  <script>
    const API = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";
    async function ask(apiKey, text) {
      const res = await fetch(API + "?key=" + apiKey, { method: "POST", body: JSON.stringify({ contents: [{ parts: [{ text }] }] }) });
      return res.json();
    }
  </script>
  <script type="application/x-test-suite">
  [{"id": "AI-1", "name": "model call is mocked", "steps": [
    {"action": "fetch", "url": "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent", "body": {"contents": [{"parts": [{"text": "hi"}]}]}},
    {"action": "assert_ai_request", "contains": "hi", "count": 1}
  ]}]
  </script>
</body></html>"#;

#[tokio::test]
async fn test_ai_checks_warn_without_failing() {
    let report = ProbeExecutor::new(instant())
        .with_ai_mock(json!({"candidates": [{"content": {"parts": [{"text": "hello"}]}}]}))
        .execute(AI_PAGE, &[])
        .await;

    assert_eq!(outcome_of(&report, "AI-1"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "TC-AI-CFG-1"), Outcome::Passed);
    assert_eq!(outcome_of(&report, "TC-AI-UI-4"), Outcome::Warned);
    assert!(report.warned_count > 0);
    assert_eq!(report.failed_count, 0);
    assert!(report.is_passing());
}

#[tokio::test]
async fn test_ai_checks_respect_mode() {
    let mut settings = instant();
    settings.ai_checks = AiCheckMode::Off;
    let report = ProbeExecutor::new(settings).execute(AI_PAGE, &[]).await;
    assert!(report
        .entries
        .iter()
        .all(|e| e.descriptor.category != TestCategory::AiIntegration));

    // without a mock the suite's model call is blocked
    assert_eq!(outcome_of(&report, "AI-1"), Outcome::Failed);

    let mut settings = instant();
    settings.ai_checks = AiCheckMode::Always;
    let report = ProbeExecutor::new(settings).execute(TODO_PAGE, &[]).await;
    assert_eq!(outcome_of(&report, "TC-I18N-3"), Outcome::Passed);
}

#[test]
fn test_session_log_records_run() {
    let executor = ProbeExecutor::new(instant());
    let spec = SpecDocument::from_text("todo");
    tokio_test::block_on(executor.execute(TODO_PAGE, &compile(&spec)));
    let lines = executor.log().by_module("sandbox-test");
    assert!(!lines.is_empty());
    assert!(executor.log().export_text().contains("[SANDBOX-TEST]"));
}

proptest! {
    #[test]
    fn prop_scanner_never_panics(source in "[ -~\n]{0,200}") {
        let _ = script_scan::scan(&source);
    }

    #[test]
    fn prop_balanced_brackets_scan_clean(depth in 0usize..20, word in "[a-z]{1,8}") {
        let script = format!("{}{}{}", "(".repeat(depth), word, ")".repeat(depth));
        prop_assert!(script_scan::scan(&script).is_ok());
    }
}
