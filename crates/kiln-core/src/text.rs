//! Text helpers shared by generation, repair and spec extraction.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref THINK_BLOCK: Regex = Regex::new(r"(?is)<think>.*?</think>").unwrap();
    static ref HTML_FENCE: Regex = Regex::new(r"(?i)```html").unwrap();
    static ref LEADING_FENCE: Regex = Regex::new(r"(?i)^\s*```[a-z]*\s*").unwrap();
    static ref DOCTYPE_DOC: Regex = Regex::new(r"(?is)<!DOCTYPE html>.*?</html>").unwrap();
    static ref HTML_DOC: Regex = Regex::new(r"(?is)<html.*?</html>").unwrap();
}

/// Remove `<think>...</think>` reasoning blocks
pub fn strip_think_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").into_owned()
}

/// Remove every markdown fence marker, keeping the fenced content
pub fn strip_code_fences(text: &str) -> String {
    HTML_FENCE.replace_all(text, "").replace("```", "")
}

/// Remove a single opening fence at the start of a continuation chunk
pub fn strip_leading_fence(text: &str) -> String {
    LEADING_FENCE.replace(text, "").into_owned()
}

/// Case-insensitive marker search
pub fn contains_marker(text: &str, marker: &str) -> bool {
    text.to_lowercase().contains(&marker.to_lowercase())
}

/// Outcome of pulling a document out of a model response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub html: String,
    /// False when neither document pattern matched and the cleaned text was kept
    pub extracted: bool,
}

/// Clean a model response and cut out the `<!DOCTYPE html>...</html>`
/// (or `<html...</html>`) document.
pub fn extract_document(response: &str) -> ExtractedDocument {
    let cleaned = strip_think_blocks(response);

    let found = DOCTYPE_DOC
        .find(&cleaned)
        .or_else(|| HTML_DOC.find(&cleaned))
        .map(|m| m.as_str().to_string());

    match found {
        Some(html) => ExtractedDocument {
            html: strip_code_fences(&html).trim().to_string(),
            extracted: true,
        },
        None => ExtractedDocument {
            html: strip_code_fences(&cleaned).trim().to_string(),
            extracted: false,
        },
    }
}

/// Last `n` characters of `text`, on a char boundary
pub fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    let skip = count - n;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// First `n` characters of `text`, on a char boundary
pub fn head_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Length in bytes of the longest suffix of `existing` (bounded by `window`
/// bytes) that the chunk starts with.
pub fn overlap_len(existing: &str, chunk: &str, window: usize) -> usize {
    let max = existing.len().min(chunk.len()).min(window);
    (1..=max)
        .rev()
        .find(|&len| {
            let start = existing.len() - len;
            existing.is_char_boundary(start)
                && chunk.is_char_boundary(len)
                && existing[start..] == chunk[..len]
        })
        .unwrap_or(0)
}

/// Mask a credential for logs: first 5 and last 4 characters
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 9 {
        return "*".repeat(count.max(3));
    }
    format!("{}...{}", head_chars(secret, 5), tail_chars(secret, 4))
}

/// Stable short fingerprint used to name a credential without revealing it
pub fn fingerprint(secret: &str) -> String {
    let hash = blake3::hash(secret.as_bytes());
    format!("{}#{}", mask_secret(secret), &hash.to_hex()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_prefers_doctype_document() {
        let response = "<think>plan</think>Here you go:\n```html\n<!DOCTYPE html><html><body>x</body></html>\n```";
        let doc = extract_document(response);
        assert!(doc.extracted);
        assert_eq!(doc.html, "<!DOCTYPE html><html><body>x</body></html>");
    }

    #[test]
    fn test_extract_falls_back_to_html_tag() {
        let doc = extract_document("junk <html lang=\"en\"><p>a</p></html> trailing");
        assert!(doc.extracted);
        assert!(doc.html.starts_with("<html"));
        assert!(doc.html.ends_with("</html>"));
    }

    #[test]
    fn test_extract_keeps_cleaned_text_when_no_document() {
        let doc = extract_document("```html\n<div>partial</div>\n```");
        assert!(!doc.extracted);
        assert_eq!(doc.html, "<div>partial</div>");
    }

    #[test]
    fn test_overlap_detects_repeated_tail() {
        assert_eq!(overlap_len("<div><span>ab", "c</span></div>", 500), 0);
        assert_eq!(overlap_len("<div><span>ab", "<span>ab</span>", 500), 8);
        assert_eq!(overlap_len("hello", "world", 500), 0);
    }

    #[test]
    fn test_mask_secret_hides_middle() {
        assert_eq!(mask_secret("AIzaSyABCDEFGHIJKLMNOP"), "AIzaS...MNOP");
        assert_eq!(mask_secret("short"), "*****");
        assert!(fingerprint("AIzaSyABCDEFGHIJKLMNOP").starts_with("AIzaS...MNOP#"));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail_chars("待辦事項", 2), "事項");
        assert_eq!(head_chars("待辦事項", 3), "待辦事");
    }

    proptest! {
        #[test]
        fn prop_overlap_strip_reconstructs(prefix in "[a-z<>/ ]{0,40}", shared in "[a-z<>/ ]{1,20}", rest in "[a-z<>/ ]{0,40}") {
            let existing = format!("{}{}", prefix, shared);
            let chunk = format!("{}{}", shared, rest);
            let cut = overlap_len(&existing, &chunk, 500);
            // Whatever is cut, the join never loses the shared span or duplicates it
            prop_assert!(cut >= shared.len());
            let joined = format!("{}{}", existing, &chunk[cut..]);
            prop_assert!(joined.starts_with(&existing));
            prop_assert!(joined.ends_with(&rest));
        }
    }
}
