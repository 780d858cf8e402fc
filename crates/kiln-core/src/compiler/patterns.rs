//! Requirement keyword battery
//!
//! Each rule pairs a keyword list with what it emits for a matching requirement.
//! Ids are `{prefix}-{suffix}` where the prefix is `FR-001`, `SC-002`, ...

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use super::{contains_any, ProbeFn};
use crate::error::ProbeError;
use crate::probe::{ProbeResult, TestCaseDescriptor, TestCategory};
use crate::sandbox::{ElementSnapshot, Sandbox};

lazy_static! {
    static ref BUTTON_LABEL: Regex =
        Regex::new(r#"(?i)「([^」]+)」按鈕|'([^']+)'.*button|"([^"]+)".*button"#).unwrap();
    static ref BUTTON_NOISE: Regex = Regex::new(r#"(?i)按鈕|button|[「」'"]"#).unwrap();
}

/// What a matching rule contributes
#[derive(Clone, Copy)]
pub enum Emit {
    /// One descriptor with a fixed suffix
    Single {
        suffix: &'static str,
        category: TestCategory,
        name: &'static str,
        description: &'static str,
        check: ProbeFn,
    },
    /// Any number of descriptors derived from the requirement text
    Derived(fn(&str, &str) -> Vec<TestCaseDescriptor>),
}

/// `{matcher, factory}` entry of the battery
#[derive(Clone)]
pub struct PatternRule {
    pub keywords: &'static [&'static str],
    pub emit: Emit,
}

impl PatternRule {
    /// `text` must already be lowercase
    pub fn matches(&self, text: &str) -> bool {
        contains_any(text, self.keywords)
    }

    pub fn emit(&self, prefix: &str, text: &str) -> Vec<TestCaseDescriptor> {
        match self.emit {
            Emit::Single {
                suffix,
                category,
                name,
                description,
                check,
            } => vec![TestCaseDescriptor::new(
                format!("{}-{}", prefix, suffix),
                category,
                name,
                description,
                check,
            )],
            Emit::Derived(factory) => factory(prefix, text),
        }
    }

    fn label(&self) -> &'static str {
        match self.emit {
            Emit::Single { suffix, .. } => suffix,
            Emit::Derived(_) => "derived",
        }
    }
}

impl fmt::Debug for Emit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emit::Single {
                suffix, category, name, ..
            } => f
                .debug_struct("Single")
                .field("suffix", suffix)
                .field("category", category)
                .field("name", name)
                .finish_non_exhaustive(),
            Emit::Derived(_) => f.write_str("Derived"),
        }
    }
}

impl fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRule")
            .field("emit", &self.label())
            .field("keywords", &self.keywords)
            .finish()
    }
}

fn single(
    keywords: &'static [&'static str],
    suffix: &'static str,
    category: TestCategory,
    name: &'static str,
    description: &'static str,
    check: ProbeFn,
) -> PatternRule {
    PatternRule {
        keywords,
        emit: Emit::Single {
            suffix,
            category,
            name,
            description,
            check,
        },
    }
}

/// The battery, in evaluation order
pub fn standard_battery() -> Vec<PatternRule> {
    vec![
        PatternRule {
            keywords: &["按鈕", "button"],
            emit: Emit::Derived(button_probes),
        },
        single(
            &["顯示", "show", "display"],
            "DISP",
            TestCategory::Visibility,
            "Content area is displayed",
            "The page has a visible content region",
            check_display,
        ),
        single(
            &["輸入", "input", "填寫"],
            "INPUT",
            TestCategory::Interaction,
            "Input field is available",
            "A field the user can type into exists",
            check_input,
        ),
        single(
            &["列表", "list", "清單"],
            "LIST",
            TestCategory::Structure,
            "List structure exists",
            "A ul/ol list structure exists",
            check_list,
        ),
        single(
            &["響應式", "responsive", "自適應"],
            "RESP",
            TestCategory::Style,
            "Responsive styles exist",
            "Media queries or responsive utility classes are present",
            check_responsive,
        ),
        single(
            &["圖片", "圖像", "image", "photo", "icon"],
            "IMG",
            TestCategory::Structure,
            "Image elements exist",
            "The page contains images or icons",
            check_images,
        ),
        single(
            &["表格", "table", "欄位", "column"],
            "TABLE",
            TestCategory::Structure,
            "Table structure exists",
            "The page contains a table or grid structure",
            check_table,
        ),
        single(
            &["刪除", "移除", "delete", "remove"],
            "DEL",
            TestCategory::Interaction,
            "Delete control exists",
            "A delete button or icon exists",
            check_delete,
        ),
        single(
            &["編輯", "修改", "edit", "update"],
            "EDIT",
            TestCategory::Interaction,
            "Edit control exists",
            "An edit button or editable field exists",
            check_edit,
        ),
        single(
            &["排序", "過濾", "sort", "filter"],
            "SORT",
            TestCategory::Interaction,
            "Sort or filter control exists",
            "A sort or filter control exists",
            check_sort,
        ),
        single(
            &["動畫", "過渡", "animation", "transition"],
            "ANIM",
            TestCategory::Style,
            "Animation styles exist",
            "CSS animations or transitions are present",
            check_animation,
        ),
        single(
            &["深色", "暗色", "dark", "theme"],
            "DARK",
            TestCategory::Style,
            "Theme or dark mode support",
            "A theme switch or dark styles are present",
            check_dark,
        ),
        single(
            &["通知", "提示", "alert", "notification", "toast"],
            "NOTIF",
            TestCategory::Structure,
            "Notification element exists",
            "A notification component or the logic creating one exists",
            check_notification,
        ),
        single(
            &["下載", "導出", "download", "export"],
            "DL",
            TestCategory::Interaction,
            "Download or export exists",
            "A download or export control exists",
            check_download,
        ),
        single(
            &["分享", "share", "社交", "social"],
            "SHARE",
            TestCategory::Interaction,
            "Share control exists",
            "A share button or social link exists",
            check_share,
        ),
        single(
            &["驗證", "確認", "validate", "confirm"],
            "VALID",
            TestCategory::Interaction,
            "Validation exists",
            "Form validation or a confirmation mechanism exists",
            check_validation,
        ),
    ]
}

/// Labels quoted next to "button" in a requirement: 「X」按鈕, 'X' ... button, "X" ... button
pub fn button_labels(text: &str) -> Vec<String> {
    BUTTON_LABEL
        .find_iter(text)
        .map(|m| BUTTON_NOISE.replace_all(m.as_str(), "").trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn button_probes(prefix: &str, text: &str) -> Vec<TestCaseDescriptor> {
    button_labels(text)
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let label = name.clone();
            TestCaseDescriptor::new(
                format!("{}-BTN-{}", prefix, i + 1),
                TestCategory::Element,
                format!("Button \"{}\" exists", name),
                format!("A button labelled {} exists", name),
                move |sandbox: &dyn Sandbox| check_button(sandbox, &label),
            )
        })
        .collect()
}

const BUTTON_SELECTOR: &str =
    r#"button, [role="button"], input[type="button"], input[type="submit"]"#;

fn check_button(sandbox: &dyn Sandbox, name: &str) -> Result<ProbeResult, ProbeError> {
    let target = sandbox.query(BUTTON_SELECTOR)?.into_iter().find(|b| {
        b.text.contains(name) || b.value.as_deref().map(|v| v.contains(name)).unwrap_or(false)
    });

    let target = match target {
        Some(t) => t,
        None => return Ok(ProbeResult::fail(format!("Button \"{}\" not found", name))),
    };

    // Present is enough to pass; missing wiring is only flagged
    let note = if is_wired(sandbox, &target) {
        "(interaction logic detected)"
    } else {
        "⚠️ (no interaction logic detected)"
    };
    Ok(ProbeResult::pass(format!("Found button \"{}\" {}", name, note)))
}

/// Best-effort guess whether a script or inline handler drives the element
pub fn is_wired(sandbox: &dyn Sandbox, element: &ElementSnapshot) -> bool {
    if ["onclick", "ng-click", "@click"]
        .iter()
        .any(|attr| element.has_attr(attr))
    {
        return true;
    }

    let scripts = sandbox.script_text().to_lowercase();
    if let Some(id) = element.id() {
        if scripts.contains(&id.to_lowercase()) {
            return true;
        }
    }
    if element
        .classes()
        .any(|c| c.len() > 3 && scripts.contains(&c.to_lowercase()))
    {
        return true;
    }
    scripts.contains("document.queryselector") && scripts.contains("button")
}

fn check_display(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let has_content = sandbox
        .query("div, main, section, article")?
        .iter()
        .any(|el| !el.text_trimmed().is_empty());
    Ok(ProbeResult::check(
        has_content,
        if has_content {
            "Page has visible content"
        } else {
            "Page has no visible content"
        },
    ))
}

fn check_input(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(
        r#"input:not([type="hidden"]):not([type="submit"]):not([type="button"]), textarea"#,
    )?;
    Ok(ProbeResult::check(n > 0, format!("Found {} input fields", n)))
}

fn check_list(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(r#"ul, ol, [role="list"]"#)?;
    Ok(ProbeResult::check(n > 0, format!("Found {} list structures", n)))
}

fn check_responsive(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let media = sandbox.style_text().contains("@media");
    let utility = sandbox.exists(r#"[class*="md:"], [class*="lg:"], [class*="sm:"]"#)?;
    let passed = media || utility;
    Ok(ProbeResult::check(
        passed,
        if passed {
            "Responsive styles present"
        } else {
            "No responsive design detected"
        },
    ))
}

fn check_images(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(r#"img, svg, [class*="icon"], i[class*="fa"]"#)?;
    Ok(ProbeResult::check(n > 0, format!("Found {} image/icon elements", n)))
}

fn check_table(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let found = sandbox.exists(r#"table, [class*="table"], [class*="grid"]"#)?;
    Ok(ProbeResult::check(
        found,
        if found {
            "Found table/grid structure"
        } else {
            "No table structure found"
        },
    ))
}

fn check_delete(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(
        r#"[class*="delete"], [class*="remove"], button, [onclick*="delete"], [onclick*="remove"]"#,
    )?;
    Ok(ProbeResult::check(n > 0, format!("Found {} possible delete elements", n)))
}

fn check_edit(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(r#"[class*="edit"], input, textarea, [contenteditable="true"]"#)?;
    Ok(ProbeResult::check(n > 0, format!("Found {} editable elements", n)))
}

fn check_sort(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(r#"select, [class*="sort"], [class*="filter"], [class*="dropdown"]"#)?;
    Ok(ProbeResult::check(n > 0, format!("Found {} sort/filter controls", n)))
}

fn check_animation(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let styles = sandbox.style_text();
    let in_css = ["animation", "transition", "@keyframes"]
        .iter()
        .any(|k| styles.contains(k));
    let utility = sandbox.exists(r#"[class*="animate-"], [class*="transition"]"#)?;
    let passed = in_css || utility;
    Ok(ProbeResult::check(
        passed,
        if passed {
            "Animations/transitions present"
        } else {
            "No animation detected"
        },
    ))
}

fn check_dark(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let themed = sandbox.exists(r#"[class*="dark"], [data-theme], [class*="theme"]"#)?;
    let media = sandbox.style_text().contains("prefers-color-scheme");
    let passed = themed || media;
    Ok(ProbeResult::check(
        passed,
        if passed {
            "Theme/dark mode support present"
        } else {
            "No theme switching detected"
        },
    ))
}

fn check_notification(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let element = sandbox.exists(
        r#"[class*="alert"], [class*="notification"], [class*="toast"], [class*="message"], [role="alert"], #toast-container, .toast-container, [id*="notification"]"#,
    )?;
    if element {
        return Ok(ProbeResult::pass("Found notification element"));
    }
    let scripts = sandbox.script_text().to_lowercase();
    let logic = ["toast", "notification", "alert(", "shownotif", "showmessage"]
        .iter()
        .any(|k| scripts.contains(k));
    Ok(ProbeResult::check(
        logic,
        if logic {
            "Notification logic detected (created dynamically)"
        } else {
            "No notification element or logic found"
        },
    ))
}

fn check_download(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(r#"a[download], [class*="download"], [class*="export"], button"#)?;
    let blob_link = sandbox.query("a")?.iter().any(|a| {
        a.has_attr("download") || a.attr("href").map(|h| h.contains("blob:")).unwrap_or(false)
    });
    Ok(ProbeResult::check(
        n > 0 || blob_link,
        format!("Found {} download-related elements", n),
    ))
}

fn check_share(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(
        r#"[class*="share"], [class*="social"], a[href*="facebook"], a[href*="twitter"], a[href*="linkedin"]"#,
    )?;
    Ok(ProbeResult::check(n > 0, format!("Found {} share elements", n)))
}

fn check_validation(sandbox: &dyn Sandbox) -> Result<ProbeResult, ProbeError> {
    let n = sandbox.count(
        r#"input[required], input[pattern], input[minlength], select[required], textarea[required], [class*="error"], [class*="valid"], [class*="invalid"]"#,
    )?;
    Ok(ProbeResult::check(n > 0, format!("Found {} elements with validation", n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_labels() {
        assert_eq!(
            button_labels("使用者可以按下「新增」按鈕與「清除」按鈕"),
            vec!["新增".to_string(), "清除".to_string()]
        );
        assert_eq!(button_labels("Click the \"Save\" button"), vec!["Save".to_string()]);
        assert!(button_labels("a button with no label").is_empty());
    }

    #[test]
    fn test_button_rule_numbers_labels() {
        let battery = standard_battery();
        let rule = &battery[0];
        assert!(rule.matches("按下「新增」按鈕"));
        let cases = rule.emit("FR-004", "按下「新增」按鈕或「刪除」按鈕");
        let ids: Vec<_> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["FR-004-BTN-1", "FR-004-BTN-2"]);
    }

    #[test]
    fn test_single_rule_suffix() {
        let battery = standard_battery();
        let rule = battery
            .iter()
            .find(|r| r.matches("export to csv"))
            .unwrap();
        let cases = rule.emit("SC-002", "Export to CSV");
        assert_eq!(cases[0].id, "SC-002-DL");
        assert_eq!(cases[0].category, TestCategory::Interaction);
    }

    #[test]
    fn test_emit_debug_names_the_suffix() {
        let battery = standard_battery();
        let single = battery
            .iter()
            .find(|r| r.matches("export to csv"))
            .unwrap();
        let shown = format!("{:?}", single.emit);
        assert!(shown.starts_with("Single {"));
        assert!(shown.contains("suffix: \"DL\""));
        assert_eq!(format!("{:?}", battery[0].emit), "Derived");
    }
}
