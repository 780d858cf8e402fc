//! Skill retrieval collaborator
//!
//! Skills are markdown instruction files (`<dir>/<name>/SKILL.md`) attached to
//! prompts. Project skills (priority 1) shadow library skills (priority 2) with the
//! same name. Retrieval is best-effort: a failing source never fails a prompt.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_core::text::head_chars;
use kiln_core::{SessionLog, SkillSettings};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MODULE: &str = "skill-system";

/// Characters of SKILL.md returned in a listing
pub const SNIPPET_CHARS: usize = 500;

pub const SKILL_FILE: &str = "SKILL.md";

#[derive(Error, Debug)]
pub enum SkillError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bridge error: {0}")]
    Bridge(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    pub name: String,
    /// Path accepted by [`SkillSource::read_file`]
    pub path: String,
    /// 1 = project, 2 = library
    pub priority: u8,
    #[serde(default)]
    pub content_snippet: String,
}

#[async_trait]
pub trait SkillSource: Send + Sync + std::fmt::Debug {
    async fn list_skills(&self) -> Result<Vec<SkillSummary>, SkillError>;

    async fn read_file(&self, relative_path: &str) -> Result<String, SkillError>;
}

/// Reject empty paths and any path that climbs out with `..`
pub fn validate_path(path: &str) -> Result<(), SkillError> {
    if path.trim().is_empty() || path.contains("..") {
        return Err(SkillError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Two-tier discovery on the local filesystem
#[derive(Debug, Clone)]
pub struct FsSkillSource {
    root: PathBuf,
    project_dir: String,
    library_dir: Option<String>,
}

impl FsSkillSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            project_dir: SkillSettings::default().project_dir,
            library_dir: None,
        }
    }

    pub fn from_settings(root: impl Into<PathBuf>, settings: &SkillSettings) -> Self {
        Self {
            root: root.into(),
            project_dir: settings.project_dir.clone(),
            library_dir: settings.library_dir.clone(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl Into<String>) -> Self {
        self.project_dir = dir.into();
        self
    }

    pub fn with_library_dir(mut self, dir: impl Into<String>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    fn scan_tier(
        &self,
        dir: &str,
        priority: u8,
        taken: &mut BTreeSet<String>,
    ) -> Result<Vec<SkillSummary>, SkillError> {
        let base = self.root.join(dir);
        if !base.is_dir() {
            debug!(dir = %base.display(), "Skill directory not found");
            return Ok(Vec::new());
        }

        let mut skills = Vec::new();
        let entries = WalkDir::new(&base)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in entries {
            let entry = entry.map_err(|e| SkillError::Io(e.into()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if taken.contains(&name) {
                debug!(skill = %name, "Library skill shadowed by project skill");
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path().join(SKILL_FILE)) else {
                continue;
            };
            skills.push(SkillSummary {
                path: format!("{}/{}/{}", dir.trim_end_matches('/'), name, SKILL_FILE),
                name: name.clone(),
                priority,
                content_snippet: head_chars(&content, SNIPPET_CHARS).to_string(),
            });
            taken.insert(name);
        }
        Ok(skills)
    }
}

#[async_trait]
impl SkillSource for FsSkillSource {
    async fn list_skills(&self) -> Result<Vec<SkillSummary>, SkillError> {
        let mut taken = BTreeSet::new();
        let mut skills = self.scan_tier(&self.project_dir, 1, &mut taken)?;
        if let Some(library) = &self.library_dir {
            skills.extend(self.scan_tier(library, 2, &mut taken)?);
        }
        Ok(skills)
    }

    async fn read_file(&self, relative_path: &str) -> Result<String, SkillError> {
        validate_path(relative_path)?;
        Ok(std::fs::read_to_string(self.root.join(Path::new(relative_path)))?)
    }
}

#[derive(Debug, Deserialize)]
struct ListSkillsResponse {
    #[serde(default)]
    skills: Vec<SkillSummary>,
}

#[derive(Debug, Deserialize)]
struct ReadFileResponse {
    content: Option<String>,
    error: Option<String>,
}

/// Client of a local bridge exposing `/fs/list-skills` and `/fs/read-file`
#[derive(Debug, Clone)]
pub struct BridgeSkillSource {
    base_url: String,
    http_client: reqwest::Client,
}

impl BridgeSkillSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    async fn post(&self, route: &str, body: serde_json::Value) -> Result<reqwest::Response, SkillError> {
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, route))
            .json(&body)
            .send()
            .await
            .map_err(|e| SkillError::Bridge(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SkillError::Bridge(format!("{} returned {}: {}", route, status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl SkillSource for BridgeSkillSource {
    async fn list_skills(&self) -> Result<Vec<SkillSummary>, SkillError> {
        let response: ListSkillsResponse = self
            .post("/fs/list-skills", json!({}))
            .await?
            .json()
            .await
            .map_err(|e| SkillError::Bridge(e.to_string()))?;
        Ok(response.skills)
    }

    async fn read_file(&self, relative_path: &str) -> Result<String, SkillError> {
        validate_path(relative_path)?;
        let response: ReadFileResponse = self
            .post("/fs/read-file", json!({ "path": relative_path }))
            .await?
            .json()
            .await
            .map_err(|e| SkillError::Bridge(e.to_string()))?;
        match (response.content, response.error) {
            (Some(content), _) => Ok(content),
            (None, Some(error)) => Err(SkillError::Bridge(error)),
            (None, None) => Err(SkillError::Bridge("empty read-file response".to_string())),
        }
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

fn relevance(query_lower: &str, query_tokens: &BTreeSet<String>, skill: &SkillSummary) -> u32 {
    let name = skill.name.to_lowercase();
    let snippet = skill.content_snippet.to_lowercase();

    let mut score = 0;
    if query_lower.contains(&name) || query_lower.contains(&name.replace('-', " ")) {
        score += 10;
    }
    for token in query_tokens {
        if name.contains(token.as_str()) {
            score += 3;
        }
        if snippet.contains(token.as_str()) {
            score += 1;
        }
    }
    score
}

/// Skills sharing keywords with `query`, best first.
///
/// Ties go to the higher tier (lower priority number), then to the name.
pub fn rank_skills(query: &str, skills: &[SkillSummary], max: usize) -> Vec<SkillSummary> {
    let query_lower = query.to_lowercase();
    let query_tokens = tokens(query);

    let mut scored: Vec<(u32, &SkillSummary)> = skills
        .iter()
        .map(|skill| (relevance(&query_lower, &query_tokens, skill), skill))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|(a_score, a), (b_score, b)| {
        b_score
            .cmp(a_score)
            .then(a.priority.cmp(&b.priority))
            .then_with(|| a.name.cmp(&b.name))
    });
    scored
        .into_iter()
        .take(max)
        .map(|(_, skill)| skill.clone())
        .collect()
}

/// Whether a skill ships integration code that must be wired in as written
pub fn has_glue_code(content: &str) -> bool {
    content.contains("@GLUE") || content.contains("### Glue Code")
}

/// Prompt section for one loaded skill
pub fn render_skill(skill: &SkillSummary, content: &str) -> String {
    let mut section = format!(
        "\n\n# 🌟 ACTIVE SKILL: {name}\n[SYSTEM: You have been equipped with the '{name}' capability (Priority {priority}). Follow its instructions below.]",
        name = skill.name,
        priority = skill.priority
    );
    if has_glue_code(content) {
        section.push_str(
            "\n[GLUE CODE REQUIRED: this skill ships integration code. Wire it into the page exactly as written.]",
        );
    }
    section.push_str("\n\n");
    section.push_str(content.trim());
    section
}

/// Rank, load and render the skills relevant to `query`.
///
/// Returns an empty string when there is no source, no match, or the source fails.
pub async fn skill_context(
    source: Option<&dyn SkillSource>,
    query: &str,
    max: usize,
    log: &Arc<SessionLog>,
) -> String {
    let Some(source) = source else {
        return String::new();
    };
    if max == 0 {
        return String::new();
    }

    let listed = match source.list_skills().await {
        Ok(listed) => listed,
        Err(err) => {
            warn!("Skill listing failed: {}", err);
            log.warn(MODULE, format!("Skill listing failed: {}", err));
            return String::new();
        }
    };

    let mut context = String::new();
    for skill in rank_skills(query, &listed, max) {
        match source.read_file(&skill.path).await {
            Ok(content) => {
                log.success(
                    MODULE,
                    format!("Loaded skill {} (priority {})", skill.name, skill.priority),
                );
                context.push_str(&render_skill(&skill, &content));
            }
            Err(err) => {
                log.warn(MODULE, format!("Could not read skill {}: {}", skill.name, err));
            }
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir: &str, name: &str, body: &str) {
        let path = root.join(dir).join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(SKILL_FILE), body).unwrap();
    }

    fn summary(name: &str, priority: u8, snippet: &str) -> SkillSummary {
        SkillSummary {
            name: name.into(),
            path: format!("x/{}/SKILL.md", name),
            priority,
            content_snippet: snippet.into(),
        }
    }

    #[tokio::test]
    async fn test_project_skills_shadow_library() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), ".agent/skills", "dom-events", "# DOM events\nBind click handlers.");
        write_skill(dir.path(), "library/skills", "dom-events", "library copy");
        write_skill(dir.path(), "library/skills", "local-storage", "# Storage\nPersist todos.");
        std::fs::create_dir_all(dir.path().join("library/skills/empty")).unwrap();

        let source = FsSkillSource::new(dir.path()).with_library_dir("library/skills");
        let skills = source.list_skills().await.unwrap();

        let names: Vec<(&str, u8)> = skills.iter().map(|s| (s.name.as_str(), s.priority)).collect();
        assert_eq!(names, vec![("dom-events", 1), ("local-storage", 2)]);
        assert_eq!(skills[0].path, ".agent/skills/dom-events/SKILL.md");

        let content = source.read_file(&skills[0].path).await.unwrap();
        assert!(content.contains("Bind click handlers"));
    }

    #[tokio::test]
    async fn test_read_file_rejects_parent_paths() {
        let source = FsSkillSource::new("/tmp");
        assert!(matches!(
            source.read_file("../etc/passwd").await,
            Err(SkillError::InvalidPath(_))
        ));
        assert!(matches!(source.read_file("").await, Err(SkillError::InvalidPath(_))));
    }

    #[test]
    fn test_snippet_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), ".agent/skills", "long", &"技".repeat(800));
        let source = FsSkillSource::new(dir.path());
        let skills = tokio_test::block_on(source.list_skills()).unwrap();
        assert_eq!(skills[0].content_snippet.chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn test_ranking_prefers_overlap_then_priority() {
        let skills = vec![
            summary("local-storage", 2, "persist state in localStorage"),
            summary("button-events", 1, "bind click handlers to every button"),
            summary("button-styles", 2, "button colors"),
            summary("charts", 1, "svg charts"),
        ];
        let ranked = rank_skills("Failures: Button 新增 not found, click does nothing", &skills, 4);
        let names: Vec<&str> = ranked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["button-events", "button-styles"]);

        assert_eq!(rank_skills("button", &skills, 1).len(), 1);
        assert!(rank_skills("nothing relevant", &skills, 4).is_empty());
    }

    #[test]
    fn test_render_flags_glue_code() {
        let skill = summary("gemini-api-wrapper", 1, "");
        let section = render_skill(&skill, "### Glue Code\n```javascript\nconst ai = new GeminiAPI();\n```");
        assert!(section.contains("# 🌟 ACTIVE SKILL: gemini-api-wrapper"));
        assert!(section.contains("(Priority 1)"));
        assert!(section.contains("GLUE CODE REQUIRED"));
        assert!(!render_skill(&skill, "plain").contains("GLUE CODE REQUIRED"));
    }

    #[test]
    fn test_bridge_listing_shape() {
        let body = r#"{"skills": [{"name": "a", "path": ".agent/skills/a/SKILL.md", "priority": 1, "contentSnippet": "x"}]}"#;
        let parsed: ListSkillsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.skills[0].content_snippet, "x");
        assert_eq!(parsed.skills[0].priority, 1);
    }
}
