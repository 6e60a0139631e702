//! Cleanup of text extracted from PDF reports.

use once_cell::sync::Lazy;
use regex::Regex;

static PAGE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"Page\s+\d+").unwrap());
static HYPHEN_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\n").unwrap());
static BROKEN_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n([a-z])").unwrap());
static PARAGRAPH_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());
static INLINE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

/// Normalize raw report text before sentence splitting.
///
/// Order matters: hyphenated breaks are joined before broken lines are
/// merged, and paragraph gaps are normalized before inline whitespace.
pub fn clean_report_text(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let text = PAGE_MARKER.replace_all(&text, "");
    let text = HYPHEN_BREAK.replace_all(&text, "");
    let text = BROKEN_LINE.replace_all(&text, " $1");
    let text = PARAGRAPH_GAP.replace_all(&text, "\n\n");
    let text = INLINE_SPACE.replace_all(&text, " ");
    text.replace('\u{00AD}', "")
        .replace('\u{2009}', "")
        .trim()
        .to_string()
}
