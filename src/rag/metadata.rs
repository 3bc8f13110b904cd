//! Display metadata synthesis.
//!
//! Raw chunks often arrive with junk metadata ("Untitled Document") left
//! over from scraping. This module derives a display-quality title and URL
//! for each candidate before ranking and prompt assembly.
//!
//! The title cascade, first non-empty wins:
//! 1. `metadata.title`, unless it is in the junk set
//! 2. the first Markdown `# H1` line of the content
//! 3. the first HTML `<title>` extract
//! 4. the first sentence of the content, if it is at most 80 chars
//! 5. the literal fallback title
//!
//! Synthesis is idempotent: feeding a synthesized title back through the
//! cascade returns it unchanged.

use crate::types::Candidate;

/// Fallback title when nothing usable can be derived from the chunk.
pub const FALLBACK_TITLE: &str = "Northeastern University Resource";

/// Titles that carry no information and are ignored.
const JUNK_TITLES: &[&str] = &["", "untitled document", "untitled"];

/// Longest first sentence accepted as a title.
const MAX_SENTENCE_TITLE_CHARS: usize = 80;

/// Derive a display title from raw metadata and content.
pub fn synthesize_title(metadata_title: Option<&str>, content: &str) -> String {
    if let Some(title) = metadata_title {
        let trimmed = title.trim();
        if !JUNK_TITLES.contains(&trimmed.to_lowercase().as_str()) {
            return trimmed.to_string();
        }
    }

    if let Some(heading) = first_markdown_heading(content) {
        return heading;
    }

    if let Some(html_title) = html_title(content) {
        return html_title;
    }

    if let Some(sentence) = first_short_sentence(content) {
        return sentence;
    }

    FALLBACK_TITLE.to_string()
}

/// Derive a source URL from metadata or, failing that, the first absolute
/// URL appearing in the content.
pub fn extract_url(metadata: &std::collections::HashMap<String, String>, content: &str) -> Option<String> {
    for key in ["url", "source"] {
        if let Some(value) = metadata.get(key) {
            let value = value.trim();
            if value.starts_with("http://") || value.starts_with("https://") {
                return Some(value.to_string());
            }
        }
    }
    first_absolute_url(content)
}

/// Set the display title and URL on a candidate in place.
pub fn enhance(candidate: &mut Candidate) {
    candidate.title = synthesize_title(
        candidate.metadata.get("title").map(String::as_str),
        &candidate.content,
    );
    candidate.url = extract_url(&candidate.metadata, &candidate.content);
}

fn first_markdown_heading(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = line.trim();
        line.strip_prefix("# ")
            .map(str::trim)
            .filter(|heading| !heading.is_empty())
            .map(str::to_string)
    })
}

fn html_title(content: &str) -> Option<String> {
    let lower = content.to_lowercase();
    let open = lower.find("<title")?;
    let start = content[open..].find('>').map(|i| open + i + 1)?;
    let end = lower[start..].find("</title>").map(|i| start + i)?;
    let title = content[start..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

fn first_short_sentence(content: &str) -> Option<String> {
    let sentence = content
        .split_inclusive(['.', '!', '?', '\n'])
        .map(|s| s.trim_end_matches(['.', '!', '?', '\n']).trim())
        .find(|s| !s.is_empty())?;
    if sentence.chars().count() <= MAX_SENTENCE_TITLE_CHARS {
        Some(sentence.to_string())
    } else {
        None
    }
}

fn first_absolute_url(content: &str) -> Option<String> {
    content
        .split_whitespace()
        .find(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(|token| token.trim_end_matches([')', ']', '.', ',', ';', '"', '\'']).to_string())
}

// ============================================================================
// Tests
// ============================================================================
