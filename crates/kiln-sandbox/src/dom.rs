//! Static DOM sandbox backed by `scraper`
//!
//! Parses the artifact once per load and keeps live form state (values, checked
//! flags, open `<details>`) as overlays keyed by element handle. Scripts are scanned,
//! never run.

use std::collections::{BTreeMap, HashMap};

use kiln_core::sandbox::{ElementHandle, ElementSnapshot, LoadReport, Sandbox, SandboxAction};
use kiln_core::ProbeError;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::script_scan;
use crate::visibility::{declarations_hide, hidden_selectors, NON_RENDERED};

lazy_static! {
    static ref SCRIPT: Selector = Selector::parse("script").unwrap();
    static ref STYLE: Selector = Selector::parse("style").unwrap();
    static ref BODY: Selector = Selector::parse("body").unwrap();
}

const EXECUTABLE_TYPES: &[&str] = &[
    "",
    "text/javascript",
    "application/javascript",
    "module",
];

enum Effect {
    Value(usize, String),
    Checked(usize, bool),
    Open(usize, bool),
}

#[derive(Debug, Default)]
pub struct StaticDomSandbox {
    document: Option<Html>,
    source: String,
    report: Option<LoadReport>,
    hidden_rules: Vec<Selector>,
    values: HashMap<usize, String>,
    checked: HashMap<usize, bool>,
    open: HashMap<usize, bool>,
    /// Survives reloads, like `localStorage` across navigations
    storage: BTreeMap<String, String>,
}

fn is_executable(script: &ElementRef<'_>) -> bool {
    let el = script.value();
    if el.attr("src").is_some() {
        return false;
    }
    let kind = el.attr("type").unwrap_or("").trim().to_ascii_lowercase();
    EXECUTABLE_TYPES.contains(&kind.as_str())
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect()
}

fn option_value(option: &ElementRef<'_>) -> String {
    option
        .value()
        .attr("value")
        .map(str::to_string)
        .unwrap_or_else(|| text_of(option).trim().to_string())
}

fn input_type(el: &ElementRef<'_>) -> String {
    el.value()
        .attr("type")
        .unwrap_or("text")
        .to_ascii_lowercase()
}

impl StaticDomSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed storage before the first load
    pub fn with_storage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.storage.insert(key.into(), value.into());
        self
    }

    fn document(&self) -> Result<&Html, ProbeError> {
        self.document.as_ref().ok_or(ProbeError::NotLoaded)
    }

    fn elements(document: &Html) -> Vec<ElementRef<'_>> {
        document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect()
    }

    fn handle_of(elements: &[ElementRef<'_>], el: &ElementRef<'_>) -> Option<usize> {
        elements.iter().position(|e| e == el)
    }

    fn is_checked(&self, idx: usize, el: &ElementRef<'_>) -> bool {
        self.checked
            .get(&idx)
            .copied()
            .unwrap_or_else(|| el.value().attr("checked").is_some())
    }

    fn is_open(&self, idx: usize, el: &ElementRef<'_>) -> bool {
        self.open
            .get(&idx)
            .copied()
            .unwrap_or_else(|| el.value().attr("open").is_some())
    }

    fn form_value(&self, idx: usize, el: &ElementRef<'_>) -> Option<String> {
        if let Some(value) = self.values.get(&idx) {
            return Some(value.clone());
        }
        let attr = el.value().attr("value");
        match el.value().name() {
            "input" => {
                let default = match input_type(el).as_str() {
                    "checkbox" | "radio" => "on",
                    _ => "",
                };
                Some(attr.unwrap_or(default).to_string())
            }
            "textarea" => Some(text_of(el)),
            "select" => {
                let options: Vec<ElementRef<'_>> = el
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .filter(|o| o.value().name() == "option")
                    .collect();
                let chosen = options
                    .iter()
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| options.first());
                Some(chosen.map(option_value).unwrap_or_default())
            }
            "option" => Some(option_value(el)),
            "button" => attr.map(str::to_string),
            _ => None,
        }
    }

    fn hides_itself(&self, el: &ElementRef<'_>) -> bool {
        let value = el.value();
        NON_RENDERED.contains(&value.name())
            || value.attr("hidden").is_some()
            || value.attr("style").map(declarations_hide).unwrap_or(false)
            || value.classes().any(|c| c == "hidden")
            || self.hidden_rules.iter().any(|rule| rule.matches(el))
    }

    fn is_visible(&self, elements: &[ElementRef<'_>], el: &ElementRef<'_>) -> bool {
        if el.value().name() == "input" && input_type(el) == "hidden" {
            return false;
        }
        if self.hides_itself(el) {
            return false;
        }
        let mut came_from = *el;
        for ancestor in el.ancestors().filter_map(ElementRef::wrap) {
            if self.hides_itself(&ancestor) {
                return false;
            }
            if ancestor.value().name() == "details" && came_from.value().name() != "summary" {
                let open = Self::handle_of(elements, &ancestor)
                    .map(|idx| self.is_open(idx, &ancestor))
                    .unwrap_or(false);
                if !open {
                    return false;
                }
            }
            came_from = ancestor;
        }
        true
    }

    fn snapshot(&self, elements: &[ElementRef<'_>], idx: usize) -> ElementSnapshot {
        let el = &elements[idx];
        let attributes = el
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ElementSnapshot {
            handle: ElementHandle(idx),
            tag: el.value().name().to_string(),
            attributes,
            text: text_of(el),
            value: self.form_value(idx, el),
            checked: self.is_checked(idx, el),
            visible: self.is_visible(elements, el),
        }
    }

    fn click_effects(&self, elements: &[ElementRef<'_>], idx: usize, depth: u8) -> Vec<Effect> {
        let el = &elements[idx];
        let value = el.value();
        if value.attr("disabled").is_some() {
            return Vec::new();
        }
        match value.name() {
            "input" => match input_type(el).as_str() {
                "checkbox" => vec![Effect::Checked(idx, !self.is_checked(idx, el))],
                "radio" => {
                    let mut effects = vec![Effect::Checked(idx, true)];
                    if let Some(name) = value.attr("name") {
                        effects.extend(
                            elements
                                .iter()
                                .enumerate()
                                .filter(|(i, other)| {
                                    *i != idx
                                        && other.value().name() == "input"
                                        && input_type(other) == "radio"
                                        && other.value().attr("name") == Some(name)
                                })
                                .map(|(i, _)| Effect::Checked(i, false)),
                        );
                    }
                    effects
                }
                _ => Vec::new(),
            },
            "summary" => el
                .parent()
                .and_then(ElementRef::wrap)
                .filter(|parent| parent.value().name() == "details")
                .and_then(|details| {
                    Self::handle_of(elements, &details)
                        .map(|d| vec![Effect::Open(d, !self.is_open(d, &details))])
                })
                .unwrap_or_default(),
            "label" if depth == 0 => {
                let target = match value.attr("for") {
                    Some(id) => elements.iter().position(|e| e.value().id() == Some(id)),
                    None => el
                        .descendants()
                        .skip(1)
                        .filter_map(ElementRef::wrap)
                        .find(|c| {
                            c.value().name() == "input"
                                && matches!(input_type(c).as_str(), "checkbox" | "radio")
                        })
                        .and_then(|c| Self::handle_of(elements, &c)),
                };
                target
                    .map(|t| self.click_effects(elements, t, depth + 1))
                    .unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    fn action_effects(&self, action: &SandboxAction) -> Result<Vec<Effect>, ProbeError> {
        let document = self.document()?;
        let elements = Self::elements(document);
        let target = match action {
            SandboxAction::Click { target }
            | SandboxAction::SetValue { target, .. }
            | SandboxAction::SelectOption { target, .. } => *target,
        };
        let el = elements
            .get(target.0)
            .ok_or_else(|| ProbeError::ElementNotFound(format!("element handle {}", target.0)))?;
        let tag = el.value().name();

        match action {
            SandboxAction::Click { .. } => Ok(self.click_effects(&elements, target.0, 0)),
            SandboxAction::SetValue { value, .. } => match tag {
                "input" | "textarea" | "select" => Ok(vec![Effect::Value(target.0, value.clone())]),
                other => Err(ProbeError::Sandbox(format!(
                    "<{}> does not accept a value",
                    other
                ))),
            },
            SandboxAction::SelectOption { value, .. } => {
                if tag != "select" {
                    return Err(ProbeError::Sandbox(format!("<{}> is not a select", tag)));
                }
                el.descendants()
                    .filter_map(ElementRef::wrap)
                    .filter(|o| o.value().name() == "option")
                    .map(|o| (option_value(&o), text_of(&o)))
                    .find(|(v, text)| v == value || text.trim() == value)
                    .map(|(v, _)| vec![Effect::Value(target.0, v)])
                    .ok_or_else(|| ProbeError::ElementNotFound(format!("option `{}`", value)))
            }
        }
    }
}

impl Sandbox for StaticDomSandbox {
    fn load(&mut self, artifact: &str) -> Result<LoadReport, ProbeError> {
        let document = Html::parse_document(artifact);
        let has_doctype = document
            .tree
            .root()
            .children()
            .any(|node| node.value().is_doctype());
        let parse_warnings = document.errors.iter().map(|e| e.to_string()).collect();

        let mut script_count = 0;
        let mut script_errors = Vec::new();
        for script in document.select(&SCRIPT).filter(is_executable) {
            script_count += 1;
            if let Err(fault) = script_scan::scan(&text_of(&script)) {
                script_errors.push(format!("{} (script {})", fault, script_count));
            }
        }

        let css: String = document
            .select(&STYLE)
            .map(|s| text_of(&s))
            .collect::<Vec<_>>()
            .join("\n");

        let report = LoadReport {
            has_doctype,
            script_count,
            script_errors,
            parse_warnings,
        };
        debug!(
            "Loaded artifact: {} bytes, {} scripts, {} script errors",
            artifact.len(),
            report.script_count,
            report.script_errors.len()
        );

        self.hidden_rules = hidden_selectors(&css);
        self.values.clear();
        self.checked.clear();
        self.open.clear();
        self.source = artifact.to_string();
        self.document = Some(document);
        self.report = Some(report.clone());
        Ok(report)
    }

    fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    fn runs_scripts(&self) -> bool {
        false
    }

    fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, ProbeError> {
        let document = self.document()?;
        let parsed = Selector::parse(selector).map_err(|e| ProbeError::InvalidSelector {
            selector: selector.to_string(),
            reason: format!("{:?}", e),
        })?;
        let elements = Self::elements(document);
        Ok((0..elements.len())
            .filter(|&idx| parsed.matches(&elements[idx]))
            .map(|idx| self.snapshot(&elements, idx))
            .collect())
    }

    fn dispatch(&mut self, action: &SandboxAction) -> Result<(), ProbeError> {
        let effects = self.action_effects(action)?;
        for effect in effects {
            match effect {
                Effect::Value(idx, value) => {
                    self.values.insert(idx, value);
                }
                Effect::Checked(idx, on) => {
                    self.checked.insert(idx, on);
                }
                Effect::Open(idx, on) => {
                    self.open.insert(idx, on);
                }
            }
        }
        Ok(())
    }

    fn read_storage(&self, key: &str) -> Option<String> {
        self.storage.get(key).cloned()
    }

    fn write_storage(&mut self, key: &str, value: String) {
        self.storage.insert(key.to_string(), value);
    }

    fn load_report(&self) -> Option<&LoadReport> {
        self.report.as_ref()
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn script_text(&self) -> String {
        self.document
            .as_ref()
            .map(|doc| {
                doc.select(&SCRIPT)
                    .filter(is_executable)
                    .map(|s| text_of(&s))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    fn style_text(&self) -> String {
        self.document
            .as_ref()
            .map(|doc| {
                doc.select(&STYLE)
                    .map(|s| text_of(&s))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    fn body_text(&self) -> String {
        self.document
            .as_ref()
            .and_then(|doc| doc.select(&BODY).next().map(|b| text_of(&b)))
            .unwrap_or_default()
    }
}
