//! Specification documents
//!
//! A [`SpecDocument`] is created once per session and only read afterwards. It can be
//! built from raw text (no structure) or extracted from the markdown the planning
//! stage produces (`**FR-001**: ...`, `**SC-001**: ...`, frontmatter).

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::strip_think_blocks;

lazy_static! {
    static ref MD_FENCE_OPEN: Regex = Regex::new(r"(?i)```markdown\s*").unwrap();
    static ref MD_FENCE_CLOSE: Regex = Regex::new(r"```\s*$").unwrap();
    static ref FRONTMATTER: Regex = Regex::new(r"^---\s*([\s\S]*?)---").unwrap();
    static ref FM_FEATURE: Regex = Regex::new(r"(?i)featureName:\s*(.+)").unwrap();
    static ref FM_SHORT: Regex = Regex::new(r"(?i)shortName:\s*(.+)").unwrap();
    static ref TITLE_SPEC: Regex = Regex::new(r"(?i)# 功能規格說明[:：]\s*(.+)").unwrap();
    static ref TITLE_ANY: Regex = Regex::new(r"(?m)^# (.+?)\s*$").unwrap();
    static ref USER_STORY: Regex =
        Regex::new(r"(?i)### (?:US-\d+[:：]?)?\s*(.+?)\s*\(Priority:\s*(P[12])\)").unwrap();
    static ref REQUIREMENT: Regex = Regex::new(r"\*\*FR-(\d+)\*\*[:：]?\s*(.+)").unwrap();
    static ref CRITERION: Regex = Regex::new(r"\*\*SC-(\d+)\*\*[:：]?\s*(.+)").unwrap();
    static ref CLARIFY_SECTION: Regex =
        Regex::new(r"(?is)## Needs Clarification(.*?)(?:\n##|\z)").unwrap();
    static ref BULLET: Regex = Regex::new(r"(?m)^\s*- (.+)$").unwrap();
    static ref CJK_RUN: Regex = Regex::new(r"[一-龥]+").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref SHORT_NAME_JUNK: Regex = Regex::new(r"[^a-z0-9-]").unwrap();
}

/// A numbered requirement or success criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecItem {
    pub id: String,
    pub text: String,
}

impl SpecItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// `### Title (Priority: P1)` headings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStory {
    pub title: String,
    pub priority: String,
}

/// Immutable specification for one generation session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecDocument {
    text: String,
    feature_name: String,
    short_name: String,
    requirements: Vec<SpecItem>,
    success_criteria: Vec<SpecItem>,
    user_stories: Vec<UserStory>,
    needs_clarification: Vec<String>,
}

impl SpecDocument {
    /// Unstructured specification text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Attach explicit requirement / criteria lists
    pub fn with_items(mut self, requirements: Vec<SpecItem>, success_criteria: Vec<SpecItem>) -> Self {
        self.requirements = requirements;
        self.success_criteria = success_criteria;
        self
    }

    /// Attach a feature name
    pub fn with_feature_name(mut self, name: impl Into<String>) -> Self {
        self.feature_name = name.into();
        if self.short_name.is_empty() {
            self.short_name = derive_short_name(&self.feature_name);
        }
        self
    }

    /// Extract structure from planning markdown
    pub fn from_markdown(markdown: &str) -> Self {
        let cleaned = strip_think_blocks(markdown);
        let cleaned = MD_FENCE_OPEN.replace_all(&cleaned, "");
        let cleaned = MD_FENCE_CLOSE.replace_all(&cleaned, "").trim().to_string();

        let mut feature_name = String::new();
        let mut short_name = String::new();

        if let Some(fm) = FRONTMATTER.captures(&cleaned).and_then(|c| c.get(1)) {
            if let Some(m) = FM_FEATURE.captures(fm.as_str()) {
                feature_name = m[1].trim().to_string();
            }
            if let Some(m) = FM_SHORT.captures(fm.as_str()) {
                short_name = m[1].trim().to_string();
            }
        }

        if feature_name.is_empty() {
            if let Some(m) = TITLE_SPEC
                .captures(&cleaned)
                .or_else(|| TITLE_ANY.captures(&cleaned))
            {
                feature_name = m[1].trim().to_string();
            }
        }

        if short_name.is_empty() && !feature_name.is_empty() {
            short_name = derive_short_name(&feature_name);
        }

        let user_stories = USER_STORY
            .captures_iter(&cleaned)
            .map(|c| UserStory {
                title: c[1].to_string(),
                priority: c[2].to_string(),
            })
            .collect();

        let requirements = REQUIREMENT
            .captures_iter(&cleaned)
            .map(|c| SpecItem::new(format!("FR-{}", &c[1]), c[2].trim()))
            .collect();

        let success_criteria = CRITERION
            .captures_iter(&cleaned)
            .map(|c| SpecItem::new(format!("SC-{}", &c[1]), c[2].trim()))
            .collect();

        let needs_clarification = CLARIFY_SECTION
            .captures(&cleaned)
            .and_then(|c| c.get(1))
            .map(|section| {
                BULLET
                    .captures_iter(section.as_str())
                    .map(|b| b[1].trim().to_string())
                    .filter(|item| !item.is_empty() && !item.contains("列在此處"))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            text: cleaned,
            feature_name,
            short_name,
            requirements,
            success_criteria,
            user_stories,
            needs_clarification,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn feature_name(&self) -> &str {
        &self.feature_name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn requirements(&self) -> &[SpecItem] {
        &self.requirements
    }

    pub fn success_criteria(&self) -> &[SpecItem] {
        &self.success_criteria
    }

    pub fn user_stories(&self) -> &[UserStory] {
        &self.user_stories
    }

    pub fn needs_clarification(&self) -> &[String] {
        &self.needs_clarification
    }

    /// Requirement checklist handed to the repair prompt
    pub fn checklist_markdown(&self) -> Option<String> {
        if self.requirements.is_empty() && self.success_criteria.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .requirements
            .iter()
            .chain(self.success_criteria.iter())
            .map(|item| format!("- [ ] {}: {}", item.id, item.text))
            .collect();
        Some(lines.join("\n"))
    }
}

/// `featureName` → lowercase slug, CJK runs cut to two characters, max 20 chars
fn derive_short_name(feature_name: &str) -> String {
    let lowered = feature_name.to_lowercase();
    let shortened = CJK_RUN.replace_all(&lowered, |caps: &regex::Captures<'_>| {
        caps[0].chars().take(2).collect::<String>()
    });
    let dashed = WHITESPACE.replace_all(&shortened, "-");
    let cleaned = SHORT_NAME_JUNK.replace_all(&dashed, "");
    let slug: String = cleaned.chars().take(20).collect();
    if slug.is_empty() {
        "feature".to_string()
    } else {
        slug
    }
}
