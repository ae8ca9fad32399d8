//! Semantic boundary splitting for prose.
//!
//! Boundary anchors are matched including the content that follows the
//! line break; the cut point is the start of the match, i.e. the `\n`.

use std::sync::LazyLock;

use regex::Regex;

use crate::splitter::char_len;

/// Boundary anchor groups in priority order: spell end, feat end, section
/// end, class-feature end. The first pattern with a match in the search
/// window decides the cut, regardless of where other patterns would cut.
static BOUNDARY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // spell end
        r"\n\w+\n\d+(?:st|nd|rd|th)-level",
        r"\n\w+\nCantrip",
        // feat end
        r"\n\w+\nPrerequisite:",
        r"\n[A-Z][^.]*\nYou gain",
        // section end
        r"\nChapter \d+",
        r"\n[A-Z][^.]*\n={3,}",
        r"\n\d+\.\d+ [A-Z]",
        // class feature end
        r"\n\w+\nStarting at \d+(?:st|nd|rd|th) level",
        r"\n\w+\nAt \d+(?:st|nd|rd|th) level",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\. [A-Z]").expect("valid regex"));

/// Byte offset of the `chars`-th character, or the end of `text`.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(i, _)| i)
}

/// Byte offset at which to cut `text`, or `None` if it already fits in
/// `chunk_size` characters.
pub fn find_split(text: &str, chunk_size: usize) -> Option<usize> {
    if char_len(text) <= chunk_size {
        return None;
    }

    let window = &text[..byte_offset(text, chunk_size.saturating_mul(2))];
    let boundary = BOUNDARY_PATTERNS
        .iter()
        .find_map(|re| re.find(window))
        .map(|m| m.start())
        .filter(|&at| at > 0);
    if boundary.is_some() {
        return boundary;
    }

    let from = byte_offset(text, chunk_size);
    if let Some(at) = text[from..].find("\n\n") {
        return Some(from + at);
    }

    if let Some(m) = SENTENCE_END_RE.find(&text[from..]) {
        // Cut after ". ", leaving the capital to start the next chunk.
        return Some(from + m.start() + 2);
    }

    Some(from).filter(|&at| at > 0)
}

/// Split `text` repeatedly at semantic boundaries.
pub fn split_semantic(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        let split = match find_split(remaining, chunk_size) {
            Some(at) if at + 1 < remaining.len() => at,
            _ => {
                chunks.push(remaining.to_string());
                break;
            }
        };

        let head = remaining[..split].trim();
        if !head.is_empty() {
            chunks.push(head.to_string());
        }
        remaining = remaining[split..].trim();
    }

    chunks
}
