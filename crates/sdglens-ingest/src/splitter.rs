//! Sentence splitting for cleaned report text.
//!
//! Produces the ordered chunk_id → sentence mapping every later stage keys on.
//! Paragraph breaks always end a sentence; inside a paragraph a boundary is
//! terminal punctuation followed by whitespace, unless the period belongs to a
//! known abbreviation or an initial, or the next word starts lowercase.

use std::collections::BTreeMap;

use sdglens_core::{ChunkId, DocumentId};
use tracing::debug;

use crate::clean::clean_report_text;
use crate::document::Document;

/// Abbreviations (lowercase, without the trailing period) that never end a
/// sentence. English and German reports are both common in the corpus.
const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "etc", "vs", "approx", "mr", "mrs", "ms", "dr", "prof", "inc", "ltd", "co",
    "corp", "no", "nos", "fig", "ref", "dept", "est", "st", "jan", "feb", "mar", "apr", "jun",
    "jul", "aug", "sep", "sept", "oct", "nov", "dec", "z.b", "bzw", "ca", "nr", "ggf", "inkl",
    "usw", "vgl", "d.h", "u.a", "mio", "mrd", "bn", "m", "p", "pp",
];

const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

/// Splits cleaned text into sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for paragraph in text.split("\n\n") {
        let flattened = paragraph.replace('\n', " ");
        split_paragraph(&flattened, &mut sentences);
    }
    sentences
}

fn split_paragraph(text: &str, out: &mut Vec<String>) {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (_, c) = chars[i];
        if matches!(c, '.' | '!' | '?') {
            // Swallow closing quotes/brackets that belong to this sentence.
            let mut end = i + 1;
            while end < chars.len() && CLOSERS.contains(&chars[end].1) {
                end += 1;
            }
            let at_gap = end == chars.len() || chars[end].1.is_whitespace();
            if at_gap && is_boundary(text, &chars, i, end) {
                let byte_end = chars.get(end).map(|(b, _)| *b).unwrap_or(text.len());
                push_sentence(&text[start..byte_end], out);
                start = byte_end;
            }
            i = end;
            continue;
        }
        i += 1;
    }

    if start < text.len() {
        push_sentence(&text[start..], out);
    }
}

fn is_boundary(text: &str, chars: &[(usize, char)], punct: usize, after: usize) -> bool {
    if chars[punct].1 != '.' {
        return true;
    }

    // The word the period is attached to.
    let punct_byte = chars[punct].0;
    let word_start = text[..punct_byte]
        .rfind(char::is_whitespace)
        .map(|p| p + 1)
        .unwrap_or(0);
    let word = text[word_start..punct_byte]
        .trim_start_matches(|c: char| matches!(c, '(' | '[' | '"' | '\''))
        .to_lowercase();

    if ABBREVIATIONS.contains(&word.as_str()) {
        return false;
    }
    // Initials such as "J. Smith".
    let mut letters = word.chars();
    if let (Some(first), None) = (letters.next(), letters.next()) {
        if first.is_alphabetic() {
            return false;
        }
    }

    // A following lowercase word means the period was not terminal.
    let next = chars[after..].iter().map(|(_, c)| *c).find(|c| !c.is_whitespace());
    !matches!(next, Some(c) if c.is_lowercase())
}

fn push_sentence(raw: &str, out: &mut Vec<String>) {
    let s = raw.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

/// Turns raw report text into a [`Document`] with chunk ids `0..n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Splitter;

impl Splitter {
    pub fn new() -> Self {
        Self
    }

    /// Clean and split raw text for one document.
    pub fn split(&self, id: DocumentId, raw_text: &str) -> Document {
        let cleaned = clean_report_text(raw_text);
        let sentences: BTreeMap<ChunkId, String> = split_sentences(&cleaned)
            .into_iter()
            .enumerate()
            .map(|(i, s)| (ChunkId(i as u64), s))
            .collect();
        debug!("Split {} into {} sentences", id, sentences.len());
        Document::new(id, sentences)
    }
}
