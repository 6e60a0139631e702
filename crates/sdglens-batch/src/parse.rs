//! Model-output parser.
//!
//! The model is asked for a single literal list such as
//! `[7, 13, False, Positive]`: SDG labels, then the AI flag, then the
//! sentiment. Answers often arrive wrapped in code fences, with quoted
//! strings, or with stray text around the list.

use once_cell::sync::Lazy;
use regex::Regex;
use sdglens_core::{Error, ParsedLabels, Result, Sentiment};

pub const MAX_SDG: u8 = 17;

static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z]*").unwrap());
static SDG_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^sdg\s*").unwrap());

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Parse a model answer into labels.
///
/// Fails when no list is present, the sentiment is unrecognisable, or the
/// AI flag is not a boolean. Bad SDG values only set `sdg_malformed`.
pub fn parse_labels(raw: &str) -> Result<ParsedLabels> {
    let fail = |why: &str| Error::InvalidInput(format!("{}: {:?}", why, raw));

    let text = FENCE.replace_all(raw, "");
    let start = text.find('[').ok_or_else(|| fail("no list"))?;
    let end = text.rfind(']').filter(|e| *e > start).ok_or_else(|| fail("no list"))?;
    let tokens: Vec<Token> = split_outside_quotes(&text[start + 1..end])
        .into_iter()
        .map(|t| coerce(&t))
        .collect();

    if tokens.len() < 2 {
        return Err(fail("list too short"));
    }
    let (core, tail) = tokens.split_at(tokens.len() - 2);

    let sentiment = match &tail[1] {
        Token::Str(s) => Sentiment::normalize(s),
        _ => None,
    }
    .ok_or_else(|| fail("no sentiment"))?;

    let ai_related = match &tail[0] {
        Token::Bool(b) => *b,
        Token::Str(s) if s.eq_ignore_ascii_case("true") => true,
        Token::Str(s) if s.eq_ignore_ascii_case("false") => false,
        _ => return Err(fail("AI flag is not a boolean")),
    };

    let mut sdg_labels = Vec::new();
    let mut sdg_malformed = core.is_empty();
    for token in core {
        match sdg_value(token) {
            Some(n) => {
                if !sdg_labels.contains(&n) {
                    sdg_labels.push(n);
                }
            }
            None => sdg_malformed = true,
        }
    }

    Ok(ParsedLabels {
        sdg_labels,
        sdg_malformed,
        ai_related,
        sentiment,
    })
}

/// Split on commas that are not inside single or double quotes. Empty
/// pieces are dropped.
fn split_outside_quotes(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in s.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, ',') => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn coerce(token: &str) -> Token {
    let t = token.trim();
    for q in ['"', '\''] {
        if t.len() >= 2 && t.starts_with(q) && t.ends_with(q) {
            return Token::Str(t[1..t.len() - 1].trim().to_string());
        }
    }
    if t.eq_ignore_ascii_case("true") {
        return Token::Bool(true);
    }
    if t.eq_ignore_ascii_case("false") {
        return Token::Bool(false);
    }
    if let Ok(n) = t.parse::<i64>() {
        return Token::Int(n);
    }
    if let Ok(f) = t.parse::<f64>() {
        return Token::Float(f);
    }
    Token::Str(t.to_string())
}

/// An SDG label in `0..=17`, also accepting `7.0`, `"7"` and `"SDG 7"`.
fn sdg_value(token: &Token) -> Option<u8> {
    let n = match token {
        Token::Int(n) => *n,
        Token::Float(f) if f.fract() == 0.0 => *f as i64,
        Token::Str(s) => SDG_PREFIX.replace(s.trim(), "").parse::<i64>().ok()?,
        _ => return None,
    };
    u8::try_from(n).ok().filter(|n| *n <= MAX_SDG)
}
