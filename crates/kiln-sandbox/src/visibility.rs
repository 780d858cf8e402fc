//! Visibility rules for the static DOM.
//!
//! There is no layout engine, so visibility is decided from what hides an element
//! declaratively: the `hidden` attribute, inline styles, top-level stylesheet rules
//! and a closed `<details>`.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::Selector;

lazy_static! {
    static ref CSS_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

/// Tags that never render
pub const NON_RENDERED: &[&str] = &[
    "head", "script", "style", "template", "meta", "link", "title", "noscript",
];

/// Whether a declaration block hides its element
pub fn declarations_hide(block: &str) -> bool {
    block.split(';').any(|decl| {
        let (prop, value) = match decl.split_once(':') {
            Some(pair) => pair,
            None => return false,
        };
        let prop = prop.trim().to_ascii_lowercase();
        let value = value
            .to_ascii_lowercase()
            .replace("!important", "")
            .trim()
            .to_string();
        match prop.as_str() {
            "display" => value == "none",
            "visibility" => value == "hidden" || value == "collapse",
            "opacity" => value.parse::<f64>().map(|v| v == 0.0).unwrap_or(false),
            _ => false,
        }
    })
}

/// Selectors of top-level rules that hide what they match.
///
/// At-rule blocks (`@media`, `@keyframes`, ...) are skipped, as are selectors with
/// pseudo-classes since their state is unknown here.
pub fn hidden_selectors(css: &str) -> Vec<Selector> {
    let css = CSS_COMMENT.replace_all(css, "");
    let mut selectors = Vec::new();
    let mut depth = 0usize;
    let mut prelude_start = 0usize;
    let mut prelude = "";
    let mut body_start = 0usize;

    for (idx, c) in css.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    prelude = css[prelude_start..idx].trim();
                    body_start = idx + 1;
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    prelude_start = idx + 1;
                    continue;
                }
                depth -= 1;
                if depth == 0 {
                    if !prelude.starts_with('@') && declarations_hide(&css[body_start..idx]) {
                        selectors.extend(
                            prelude
                                .split(',')
                                .map(str::trim)
                                .filter(|s| !s.is_empty() && !s.contains(':'))
                                .filter_map(|s| Selector::parse(s).ok()),
                        );
                    }
                    prelude_start = idx + 1;
                }
            }
            _ => {}
        }
    }
    selectors
}
