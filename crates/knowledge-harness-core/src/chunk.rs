//! Sentence-boundary text chunker that protects abbreviations.
//!
//! Splits ingested text into retrieval-sized chunks on sentence-terminating
//! periods, accumulating sentences until a character budget is reached.
//! Uppercase abbreviations (`API`, `HTTP`, `VPN`) are swapped for opaque
//! placeholders before splitting so no boundary can cut through them, then
//! restored.
//!
//! # Algorithm
//!
//! 1. Replace every word-bounded run of two or more uppercase ASCII letters
//!    with a unique placeholder.
//! 2. Split on periods followed by whitespace or end of text; trim; drop
//!    empty segments.
//! 3. Restore the abbreviations inside each segment.
//! 4. Accumulate segments (joined by `". "`) until adding the next one
//!    would exceed `chunk_size` characters, then flush.
//! 5. With `overlap > 0`, prefix chunk `i` with the last `overlap`
//!    characters of chunk `i - 1` (taken before its own prefix was added).
//!
//! A single sentence longer than `chunk_size` is kept whole. Empty input
//! yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use knowledge_harness_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("The API failed. Restart it.", 256, 0);
//! assert_eq!(chunks, vec!["The API failed. Restart it".to_string()]);
//! ```

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

fn abbreviation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z]{2,}\b").expect("abbreviation pattern is valid"))
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("\u{E000}([0-9]+)\u{E001}").expect("placeholder pattern is valid"))
}

/// Collect the distinct abbreviation tokens (`\b[A-Z]{2,}\b`) in `text`.
pub fn extract_abbreviations(text: &str) -> BTreeSet<String> {
    abbreviation_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Split `text` into chunks of roughly `chunk_size` characters.
///
/// `chunk_size` and `overlap` are measured in Unicode scalar values, not
/// bytes. See the module docs for the full algorithm.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut tokens: Vec<String> = Vec::new();
    let protected = abbreviation_regex().replace_all(text, |caps: &regex::Captures<'_>| {
        tokens.push(caps[0].to_string());
        format!("{}{}{}", PLACEHOLDER_OPEN, tokens.len() - 1, PLACEHOLDER_CLOSE)
    });

    let segments: Vec<String> = split_sentences(&protected)
        .into_iter()
        .map(|segment| restore(segment, &tokens))
        .collect();

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for segment in segments {
        let seg_chars = segment.chars().count();
        let would_be = if buf.is_empty() {
            seg_chars
        } else {
            buf_chars + 2 + seg_chars
        };

        if would_be > chunk_size && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }

        if !buf.is_empty() {
            buf.push_str(". ");
            buf_chars += 2;
        }
        buf.push_str(&segment);
        buf_chars += seg_chars;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    if overlap > 0 && chunks.len() > 1 {
        let originals = chunks.clone();
        for (i, chunk) in chunks.iter_mut().enumerate().skip(1) {
            let tail = tail_chars(&originals[i - 1], overlap);
            *chunk = format!("{} {}", tail, chunk);
        }
    }

    chunks
}

/// Split on periods that end a sentence: followed by whitespace or the end
/// of the text. Decimal points and dotted names stay intact.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if c != '.' {
            continue;
        }
        let terminal = iter.peek().map_or(true, |(_, next)| next.is_whitespace());
        if terminal {
            segments.push(&text[start..i]);
            start = i + 1;
        }
    }
    segments.push(&text[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn restore(segment: &str, tokens: &[String]) -> String {
    placeholder_regex()
        .replace_all(segment, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| tokens.get(i))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// The last `n` characters of `s` (all of `s` if it is shorter).
fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let start = s
        .char_indices()
        .nth(count - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}
