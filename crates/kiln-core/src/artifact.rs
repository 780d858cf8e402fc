//! Candidate artifacts
//!
//! The accumulated output of one or more chained model responses. While generating it
//! only grows by appended continuation chunks; once committed it is replaced wholesale
//! by an accepted repair, never patched.

use serde::{Deserialize, Serialize};

use crate::text::contains_marker;

/// The runnable output under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateArtifact {
    /// Immutable artifact ID
    #[serde(rename = "artifact_id")]
    pub id: String,
    content: String,
    terminal_marker: String,
    is_complete: bool,
    /// Number of chunks appended so far
    chunks: u32,
}

impl CandidateArtifact {
    /// Start an empty artifact that completes once `terminal_marker` shows up
    pub fn empty(terminal_marker: impl Into<String>) -> Self {
        Self {
            id: format!("art_{}", uuid::Uuid::new_v4()),
            content: String::new(),
            terminal_marker: terminal_marker.into(),
            is_complete: false,
            chunks: 0,
        }
    }

    /// Wrap finished text (an accepted repair or a loaded file)
    pub fn from_content(content: impl Into<String>, terminal_marker: impl Into<String>) -> Self {
        let mut artifact = Self::empty(terminal_marker);
        artifact.append(&content.into());
        artifact
    }

    /// Append a continuation chunk and re-check for the terminal marker
    pub fn append(&mut self, chunk: &str) {
        self.content.push_str(chunk);
        self.chunks += 1;
        self.is_complete = contains_marker(&self.content, &self.terminal_marker);
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }

    pub fn chunks(&self) -> u32 {
        self.chunks
    }

    pub fn terminal_marker(&self) -> &str {
        &self.terminal_marker
    }

    /// Content hash, used to tell repairs apart in the session log
    pub fn hash(&self) -> String {
        blake3::hash(self.content.as_bytes()).to_hex().to_string()
    }
}
