//! Feature catalog
//!
//! Domain-specific probes keyed on the feature name: a todo app needs an input and a
//! list, a timer needs a time display and a control, and so on.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use super::{contains_any, mark, ProbeFn};
use crate::error::ProbeError;
use crate::probe::{ProbeResult, TestCaseDescriptor, TestCategory};
use crate::sandbox::Sandbox;

lazy_static! {
    static ref TIME_TEXT: Regex = Regex::new(r"\d{1,2}[:\s]\d{2}").unwrap();
    static ref CONTROL_LABEL: Regex =
        Regex::new(r"(?i)start|stop|pause|reset|開始|暫停|停止|重置").unwrap();
    static ref SINGLE_DIGIT: Regex = Regex::new(r"^[0-9]$").unwrap();
    static ref ANY_DIGIT: Regex = Regex::new(r"\d+").unwrap();
}

/// One probe of a catalog entry
#[derive(Clone, Copy)]
pub struct FeatureProbe {
    pub id: &'static str,
    pub category: TestCategory,
    pub name: &'static str,
    pub description: &'static str,
    pub check: ProbeFn,
}

impl FeatureProbe {
    pub fn descriptor(&self) -> TestCaseDescriptor {
        TestCaseDescriptor::new(self.id, self.category, self.name, self.description, self.check)
    }
}

impl fmt::Debug for FeatureProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureProbe")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Catalog entry: feature keywords and the probes they pull in
#[derive(Clone)]
pub struct FeatureRule {
    pub keywords: &'static [&'static str],
    pub probes: Vec<FeatureProbe>,
}

impl FeatureRule {
    /// `feature` must already be lowercase
    pub fn matches(&self, feature: &str) -> bool {
        contains_any(feature, self.keywords)
    }

    pub fn descriptors(&self) -> Vec<TestCaseDescriptor> {
        self.probes.iter().map(FeatureProbe::descriptor).collect()
    }
}

impl fmt::Debug for FeatureRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.probes.iter().map(|p| p.id).collect();
        f.debug_struct("FeatureRule")
            .field("keywords", &self.keywords)
            .field("probes", &ids)
            .finish()
    }
}

fn probe(
    id: &'static str,
    category: TestCategory,
    name: &'static str,
    description: &'static str,
    check: ProbeFn,
) -> FeatureProbe {
    FeatureProbe {
        id,
        category,
        name,
        description,
        check,
    }
}

/// The catalog, in evaluation order
pub fn standard_catalog() -> Vec<FeatureRule> {
    use TestCategory::{Interaction, Structure};

    vec![
        FeatureRule {
            keywords: &["井字", "tic", "tac"],
            probes: vec![probe("GAME-001", Interaction, "Game board exists", "Clickable board cells exist", check_board)],
        },
        FeatureRule {
            keywords: &["計算", "calculator"],
            probes: vec![probe("CALC-001", Interaction, "Digit buttons exist", "Buttons 0-9 exist", check_digit_buttons)],
        },
        FeatureRule {
            keywords: &["表單", "form", "登入", "login"],
            probes: vec![probe("FORM-001", Structure, "Form fields exist", "Input fields and a submit button exist", check_form)],
        },
        FeatureRule {
            keywords: &["待辦", "todo", "任務", "task"],
            probes: vec![
                probe("TODO-001", Interaction, "Todo input and list exist", "An add field and a todo list area exist", check_todo_input),
                probe("TODO-002", Interaction, "Complete/delete controls exist", "Checkboxes or delete buttons exist", check_todo_controls),
            ],
        },
        FeatureRule {
            keywords: &["圖片", "相簿", "畫廊", "gallery", "image", "photo"],
            probes: vec![
                probe("IMG-001", Structure, "Images exist", "The page contains images", check_gallery_images),
                probe("IMG-002", Structure, "Image grid exists", "A grid or flex layout exists", check_gallery_layout),
            ],
        },
        FeatureRule {
            keywords: &["導航", "菜單", "nav", "menu", "sidebar"],
            probes: vec![probe("NAV-001", Structure, "Navigation exists", "A nav element or navigation links exist", check_nav)],
        },
        FeatureRule {
            keywords: &["卡片", "card", "商品", "product"],
            probes: vec![probe("CARD-001", Structure, "Cards exist", "A card layout exists", check_cards)],
        },
        FeatureRule {
            keywords: &["模態", "彈窗", "對話", "modal", "dialog", "popup"],
            probes: vec![probe("MODAL-001", Structure, "Modal exists", "A modal/dialog structure exists", check_modal)],
        },
        FeatureRule {
            keywords: &["計時", "倒數", "時鐘", "timer", "countdown", "clock", "碼表", "stopwatch"],
            probes: vec![
                probe("TIME-001", Structure, "Time display exists", "A time display element exists", check_time_display),
                probe("TIME-002", Interaction, "Control buttons exist", "Start/pause/reset buttons exist", check_time_controls),
            ],
        },
        FeatureRule {
            keywords: &["表格", "table", "數據", "data", "報表"],
            probes: vec![probe("TABLE-001", Structure, "Table exists", "A table or data rows exist", check_data_table)],
        },
        FeatureRule {
            keywords: &["搜索", "搜尋", "search", "查詢", "filter", "篩選"],
            probes: vec![probe("SEARCH-001", Interaction, "Search input exists", "A search input exists", check_search)],
        },
        FeatureRule {
            keywords: &["標籤", "選項卡", "tab", "分頁"],
            probes: vec![probe("TAB-001", Interaction, "Tabs exist", "Tab buttons and panels exist", check_tabs)],
        },
        FeatureRule {
            keywords: &["輪播", "滑動", "carousel", "slider", "swiper"],
            probes: vec![probe("CAROUSEL-001", Structure, "Carousel exists", "A carousel with several items exists", check_carousel)],
        },
        FeatureRule {
            keywords: &["進度", "progress", "loading", "加載"],
            probes: vec![probe("PROGRESS-001", Structure, "Progress indicator exists", "A progress bar or loading indicator exists", check_progress)],
        },
        FeatureRule {
            keywords: &["天氣", "weather", "api", "數據展示"],
            probes: vec![probe("API-001", Structure, "Data display exists", "A container for fetched data exists", check_data_display)],
        },
        FeatureRule {
            keywords: &["聊天", "chat", "消息", "message", "對話"],
            probes: vec![probe("CHAT-001", Structure, "Chat layout exists", "A message area and an input exist", check_chat)],
        },
        FeatureRule {
            keywords: &["遊戲", "game", "記憶", "memory", "拼圖", "puzzle", "配對", "match"],
            probes: vec![
                probe("GAME-GEN-001", Interaction, "Game play area exists", "Clickable game elements exist", check_game_clickables),
                probe("GAME-GEN-002", Structure, "Score/status display exists", "A score or game status display exists", check_game_status),
            ],
        },
        FeatureRule {
            keywords: &["問卷", "調查", "測驗", "quiz", "survey", "考試"],
            probes: vec![probe("QUIZ-001", Interaction, "Questions and options exist", "Question text and answer options exist", check_quiz)],
        },
        FeatureRule {
            keywords: &["儀表", "dashboard", "控制台", "面板", "panel"],
            probes: vec![probe("DASH-001", Structure, "Multi-section layout exists", "Several data cards or sections exist", check_dashboard)],
        },
    ]
}

fn check_board(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(
        r#"[class*="cell"], [class*="square"], [class*="grid"] > *, [data-cell], button"#,
    )?;
    Ok(if n >= 9 {
        ProbeResult::pass(format!("Found {} interactive elements", n))
    } else {
        ProbeResult::fail("Not enough board cells found")
    })
}

fn check_digit_buttons(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox
        .query("button")?
        .iter()
        .filter(|b| SINGLE_DIGIT.is_match(b.text_trimmed()))
        .count();
    Ok(ProbeResult::check(n >= 10, format!("Found {} digit buttons", n)))
}

fn check_form(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let inputs = sandbox.count("input, textarea")?;
    let submit = sandbox.exists(r#"button[type="submit"], input[type="submit"], button"#)?;
    Ok(ProbeResult::check(
        inputs > 0 && submit,
        format!(
            "Inputs: {}, submit button: {}",
            inputs,
            if submit { "present" } else { "missing" }
        ),
    ))
}

fn check_todo_input(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let input = sandbox
        .exists(r#"input[type="text"], input:not([type]), textarea, [contenteditable="true"]"#)?;
    let list = sandbox.exists(
        r#"ul, ol, [class*="list"], [class*="todo"], [class*="task"], [id*="list"], [id*="container"]"#,
    )?;
    let add = sandbox.exists(r#"button, [class*="add"], [class*="create"]"#)?;
    Ok(ProbeResult::check(
        input && (list || add),
        format!("Input: {}, list/button: {}", mark(input), mark(list || add)),
    ))
}

fn check_todo_controls(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let checkboxes = sandbox.count(r#"input[type="checkbox"]"#)?;
    let deletes = sandbox.count(
        r#"button[class*="delete"], button[class*="remove"], [class*="delete"], [class*="remove"]"#,
    )?;

    // An empty list renders no controls; look for the logic instead
    let mut logic = false;
    if checkboxes == 0 && deletes == 0 {
        let scripts = sandbox.script_text().to_lowercase();
        logic = ["checkbox", "checked", "toggle"].iter().any(|k| scripts.contains(k))
            && ["delete", "remove", "splice"].iter().any(|k| scripts.contains(k));
    }

    Ok(ProbeResult::check(
        checkboxes > 0 || deletes > 0 || logic,
        format!(
            "Checkboxes: {}, delete buttons: {}, logic: {}",
            checkboxes,
            deletes,
            if logic { "✓" } else { "..." }
        ),
    ))
}

fn check_gallery_images(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(r#"img, [style*="background-image"], svg"#)?;
    Ok(ProbeResult::check(n > 0, format!("Found {} image/graphic elements", n)))
}

fn check_gallery_layout(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let grid = sandbox
        .exists(r#"[class*="grid"], [class*="gallery"], [style*="grid"], [style*="flex"]"#)?;
    Ok(ProbeResult::check(
        grid,
        if grid {
            "Grid/flex layout present"
        } else {
            "No grid layout found"
        },
    ))
}

fn check_nav(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let nav = sandbox.exists(
        r#"nav, [role="navigation"], header, [class*="nav"], [class*="menu"]"#,
    )?;
    let links = sandbox.count(r#"a, [role="link"], [class*="link"]"#)?;
    Ok(ProbeResult::check(
        nav || links >= 3,
        format!("Nav container: {}, links: {}", mark(nav), links),
    ))
}

fn check_cards(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(r#"[class*="card"], article, [class*="item"], [class*="product"]"#)?;
    Ok(ProbeResult::check(n > 0, format!("Found {} card elements", n)))
}

fn check_modal(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let modal = sandbox.exists(
        r#"[class*="modal"], [class*="dialog"], [class*="popup"], [role="dialog"], [class*="overlay"]"#,
    )?;
    let trigger = sandbox.exists(r#"button, [class*="trigger"], [class*="open"]"#)?;
    Ok(ProbeResult::check(
        modal || trigger,
        format!("Modal: {}, trigger: {}", mark(modal), mark(trigger)),
    ))
}

fn check_time_display(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let display = sandbox.exists(
        r#"[class*="time"], [class*="clock"], [class*="display"], [class*="counter"]"#,
    )?;
    if display {
        return Ok(ProbeResult::pass("Found time display"));
    }
    let digits = TIME_TEXT.is_match(&sandbox.body_text());
    Ok(ProbeResult::check(
        digits,
        if digits {
            "Page contains time-formatted text"
        } else {
            "No time-related elements found"
        },
    ))
}

fn check_time_controls(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let buttons = sandbox.query("button")?;
    let controls = buttons.iter().any(|b| CONTROL_LABEL.is_match(&b.text));
    Ok(ProbeResult::check(
        !buttons.is_empty(),
        format!(
            "Buttons: {}, control labels: {}",
            buttons.len(),
            if controls { "✓" } else { "not recognized" }
        ),
    ))
}

fn check_data_table(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let table = sandbox.exists(r#"table, [role="table"], [class*="table"]"#)?;
    let headers = sandbox.count(r#"th, [role="columnheader"]"#)?;
    let rows = sandbox.count(r#"tr, [role="row"]"#)?;
    Ok(ProbeResult::check(
        table || rows > 0,
        format!("Table: {}, headers: {}, rows: {}", mark(table), headers, rows),
    ))
}

fn check_search(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let search = sandbox.exists(
        r#"input[type="search"], input[placeholder*="搜"], input[placeholder*="search"], [class*="search"] input"#,
    )?;
    if search {
        return Ok(ProbeResult::pass("Found search input"));
    }
    let any = sandbox.exists(r#"input[type="text"], input:not([type])"#)?;
    Ok(ProbeResult::check(
        any,
        if any {
            "Found text input"
        } else {
            "No input found"
        },
    ))
}

fn check_tabs(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let tabs = sandbox.count(r#"[role="tab"], [class*="tab"], button"#)?;
    let panels = sandbox.count(r#"[role="tabpanel"], [class*="panel"], [class*="content"]"#)?;
    Ok(ProbeResult::check(
        tabs >= 2,
        format!("Tabs: {}, panels: {}", tabs, panels),
    ))
}

fn check_carousel(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let carousel = sandbox.exists(r#"[class*="carousel"], [class*="slider"], [class*="swiper"]"#)?;
    let slides = sandbox.count(r#"[class*="slide"], [class*="item"]"#)?;
    let arrows = sandbox.count(r#"[class*="prev"], [class*="next"], [class*="arrow"]"#)?;
    Ok(ProbeResult::check(
        carousel || slides > 1,
        format!(
            "Carousel: {}, items: {}, arrows: {}",
            mark(carousel),
            slides,
            arrows
        ),
    ))
}

fn check_progress(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = sandbox.exists(
        r#"progress, [role="progressbar"], [class*="progress"], [class*="loading"], [class*="spinner"]"#,
    )?;
    Ok(ProbeResult::check(
        found,
        if found {
            "Found progress/loading element"
        } else {
            "No progress element found"
        },
    ))
}

fn check_data_display(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = sandbox.exists(
        r#"[class*="weather"], [class*="data"], [class*="result"], [class*="info"], main, section"#,
    )?;
    Ok(ProbeResult::check(
        found,
        if found {
            "Found data display area"
        } else {
            "No data display area found"
        },
    ))
}

fn check_chat(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let messages =
        sandbox.exists(r#"[class*="message"], [class*="chat"], [class*="conversation"]"#)?;
    let input = sandbox.exists("input, textarea")?;
    let send = sandbox.exists("button")?;
    Ok(ProbeResult::check(
        input && send,
        format!(
            "Messages: {}, input: {}, send button: {}",
            mark(messages),
            mark(input),
            mark(send)
        ),
    ))
}

fn check_game_clickables(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(
        r#"button, [class*="cell"], [class*="card"], [class*="tile"], [onclick], [class*="square"]"#,
    )?;
    Ok(ProbeResult::check(n >= 4, format!("Found {} interactive game elements", n)))
}

fn check_game_status(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let status = sandbox.exists(
        r#"[class*="score"], [class*="status"], [class*="result"], [class*="turn"], [class*="player"]"#,
    )?;
    if status {
        return Ok(ProbeResult::pass("Found score/status display"));
    }
    let numbers = ANY_DIGIT.is_match(&sandbox.body_text());
    Ok(ProbeResult::check(
        numbers,
        if numbers {
            "Page contains numbers"
        } else {
            "No game status display found"
        },
    ))
}

fn check_quiz(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let questions = sandbox.count(r#"[class*="question"], h2, h3, p"#)?;
    let options = sandbox.count(
        r#"input[type="radio"], input[type="checkbox"], [class*="option"], [class*="answer"], button"#,
    )?;
    Ok(ProbeResult::check(
        questions > 0 && options > 0,
        format!("Questions: {}, options: {}", questions, options),
    ))
}

fn check_dashboard(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(
        r#"section, [class*="card"], [class*="widget"], [class*="panel"], article"#,
    )?;
    Ok(ProbeResult::check(n >= 2, format!("Found {} sections/cards", n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_unique() {
        let mut ids: Vec<&str> = standard_catalog()
            .iter()
            .flat_map(|r| r.probes.iter().map(|p| p.id))
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_todo_matches_cjk_text() {
        let catalog = standard_catalog();
        let hits: Vec<&str> = catalog
            .iter()
            .filter(|r| r.matches("新增待辦事項，含輸入框與新增按鈕"))
            .flat_map(|r| r.probes.iter().map(|p| p.id))
            .collect();
        assert_eq!(hits, vec!["TODO-001", "TODO-002"]);
    }

    #[test]
    fn test_feature_probe_debug() {
        let catalog = standard_catalog();
        let probe = catalog
            .iter()
            .flat_map(|r| r.probes.iter())
            .find(|p| p.id == "TODO-001")
            .unwrap();
        let shown = format!("{:?}", probe);
        assert!(shown.starts_with("FeatureProbe {"));
        assert!(shown.contains("id: \"TODO-001\""));
        assert!(shown.ends_with(".. }"));
    }

    #[test]
    fn test_timer_pulls_both_probes() {
        let rule = standard_catalog()
            .into_iter()
            .find(|r| r.matches("pomodoro timer"))
            .unwrap();
        let ids: Vec<String> = rule.descriptors().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["TIME-001", "TIME-002"]);
    }
}
