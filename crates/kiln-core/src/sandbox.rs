//! Sandbox contract
//!
//! An isolated document environment that loads one artifact and exposes its structural
//! tree. Probes only see owned [`ElementSnapshot`]s, so an embedded DOM engine and a
//! headless-browser driver can satisfy the same interface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProbeError;

/// Document-order position of an element inside a loaded sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub usize);

/// Owned view of one element at query time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub handle: ElementHandle,
    /// Lowercase tag name
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Concatenated descendant text (`textContent`)
    pub text: String,
    /// Live form value, if the element has one
    pub value: Option<String>,
    pub checked: bool,
    pub visible: bool,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    pub fn class_attr(&self) -> &str {
        self.attr("class").unwrap_or("")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.class_attr().split_whitespace()
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.classes().any(|c| c == class_name)
    }

    pub fn text_trimmed(&self) -> &str {
        self.text.trim()
    }

    /// DOM-property view used by `assert.property`
    pub fn property(&self, name: &str) -> Option<serde_json::Value> {
        use serde_json::Value;
        match name {
            "value" => self.value.clone().map(Value::String),
            "checked" => Some(Value::Bool(self.checked)),
            "disabled" | "hidden" | "required" | "open" => Some(Value::Bool(self.has_attr(name))),
            "id" => Some(Value::String(self.id().unwrap_or("").to_string())),
            "className" => Some(Value::String(self.class_attr().to_string())),
            "textContent" | "innerText" => Some(Value::String(self.text.clone())),
            "tagName" => Some(Value::String(self.tag.to_uppercase())),
            _ => self.attr(name).map(|v| Value::String(v.to_string())),
        }
    }
}

/// DOM-mutating actions a probe can dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxAction {
    Click { target: ElementHandle },
    SetValue { target: ElementHandle, value: String },
    SelectOption { target: ElementHandle, value: String },
}

/// What the loader observed while loading an artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub has_doctype: bool,
    pub script_count: usize,
    /// Faults that would stop a script from evaluating
    pub script_errors: Vec<String>,
    /// Tolerated markup problems
    pub parse_warnings: Vec<String>,
}

impl LoadReport {
    /// First script fault, as the loader would record it
    pub fn load_error(&self) -> Option<String> {
        self.script_errors.first().cloned()
    }
}

/// An isolated document environment, one per test run
pub trait Sandbox {
    /// Load an artifact, replacing anything previously loaded
    fn load(&mut self, artifact: &str) -> Result<LoadReport, ProbeError>;

    fn is_loaded(&self) -> bool;

    /// Whether loaded scripts run, so handler effects and script-built elements show
    /// up in queries. Static engines return `false`.
    fn runs_scripts(&self) -> bool {
        false
    }

    /// All elements matching a CSS selector, in document order
    fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>, ProbeError>;

    fn dispatch(&mut self, action: &SandboxAction) -> Result<(), ProbeError>;

    fn read_storage(&self, key: &str) -> Option<String>;

    fn write_storage(&mut self, key: &str, value: String);

    /// The load report of the current document
    fn load_report(&self) -> Option<&LoadReport>;

    /// Raw markup as loaded
    fn source(&self) -> &str;

    /// Concatenated text of executable inline scripts
    fn script_text(&self) -> String;

    /// Concatenated text of `<style>` elements
    fn style_text(&self) -> String;

    /// `document.body.textContent`
    fn body_text(&self) -> String;

    fn query_first(&self, selector: &str) -> Result<Option<ElementSnapshot>, ProbeError> {
        Ok(self.query(selector)?.into_iter().next())
    }

    fn count(&self, selector: &str) -> Result<usize, ProbeError> {
        Ok(self.query(selector)?.len())
    }

    fn exists(&self, selector: &str) -> Result<bool, ProbeError> {
        Ok(self.count(selector)? > 0)
    }

    fn load_error(&self) -> Option<String> {
        self.load_report().and_then(LoadReport::load_error)
    }

    /// Whether the markup itself declares `<tag ...>` (parsers synthesise missing ones)
    fn declares_tag(&self, tag: &str) -> bool {
        let source = self.source().to_lowercase();
        let open = format!("<{}", tag.to_lowercase());
        source.match_indices(&open).any(|(idx, _)| {
            source[idx + open.len()..]
                .chars()
                .next()
                .map(|c| c == '>' || c.is_whitespace())
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ElementSnapshot {
        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), "add-btn".to_string());
        attributes.insert("class".to_string(), "btn primary".to_string());
        attributes.insert("data-role".to_string(), "add".to_string());
        ElementSnapshot {
            handle: ElementHandle(3),
            tag: "button".to_string(),
            attributes,
            text: "  新增  ".to_string(),
            value: None,
            checked: false,
            visible: true,
        }
    }

    #[test]
    fn test_snapshot_accessors() {
        let el = snapshot();
        assert_eq!(el.id(), Some("add-btn"));
        assert!(el.has_class("primary"));
        assert!(!el.has_class("prim"));
        assert_eq!(el.text_trimmed(), "新增");
    }

    #[test]
    fn test_property_view() {
        let el = snapshot();
        assert_eq!(el.property("tagName"), Some(serde_json::json!("BUTTON")));
        assert_eq!(el.property("checked"), Some(serde_json::json!(false)));
        assert_eq!(el.property("className"), Some(serde_json::json!("btn primary")));
        assert_eq!(el.property("data-role"), Some(serde_json::json!("add")));
        assert_eq!(el.property("value"), None);
    }
}
