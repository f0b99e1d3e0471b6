//! Small text helpers shared by the parser and the workflow

use once_cell::sync::Lazy;
use regex::Regex;

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-]+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const SLUG_MAX_CHARS: usize = 48;

/// Collapse runs of whitespace into single spaces and trim
pub fn squash_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Truncate to at most `budget` characters, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, budget: usize) -> String {
    let count = text.chars().count();
    if count <= budget {
        return text.to_string();
    }
    if budget == 0 {
        return String::new();
    }
    let kept: String = text.chars().take(budget - 1).collect();
    format!("{}…", kept.trim_end())
}

/// Filename-safe slug; Unicode word characters survive
pub fn slugify(text: &str) -> String {
    let replaced = NON_SLUG.replace_all(text.trim(), "_");
    let capped: String = replaced.chars().take(SLUG_MAX_CHARS).collect();
    let slug = capped.trim_matches('_');
    if slug.is_empty() {
        "presentation".to_string()
    } else {
        slug.to_string()
    }
}
