//! Text cleanup passes applied to extracted fragments.
//!
//! Each pass is a function `&str -> String`. Block-level passes run during
//! the text pass; [`clean_fragments`] runs once over the classified output.

use std::sync::LazyLock;

use regex::Regex;
use rulevault_shared::{ContentType, ExtractedFragment};

// ---------------------------------------------------------------------------
// Block-level passes
// ---------------------------------------------------------------------------

/// Remove the page number and running "Chapter N" header/footer lines.
pub fn clean_header_footer(text: &str, page_number: u32) -> String {
    static CHAPTER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?im)Chapter \d+.*?$").expect("valid regex"));

    let without_page = match Regex::new(&format!(r"\b{page_number}\b")) {
        Ok(page_re) => page_re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    };

    CHAPTER_RE.replace_all(&without_page, "").trim().to_string()
}

/// Re-join words that were hyphenated across a line wrap.
pub fn merge_hyphenated(text: &str) -> String {
    static HYPHEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\w+)-[ \t]*\n\s*(\w+)").expect("valid regex"));

    HYPHEN_RE.replace_all(text, "$1$2").into_owned()
}

// ---------------------------------------------------------------------------
// Fragment-level cleanup
// ---------------------------------------------------------------------------

/// Collapse whitespace runs inside each line and drop blank lines.
///
/// Line structure is kept: spell and feat names are read from the first
/// line, and table markdown is one row per line.
pub fn normalize_whitespace(text: &str) -> String {
    static SPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));

    text.lines()
        .map(|line| SPACE_RE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_page_number(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

/// Normalize every fragment, dropping stray page numbers and anything
/// shorter than `min_text_length` that is not a heading.
pub(crate) fn clean_fragments(
    fragments: Vec<ExtractedFragment>,
    min_text_length: usize,
) -> Vec<ExtractedFragment> {
    fragments
        .into_iter()
        .filter_map(|mut fragment| {
            fragment.text = normalize_whitespace(&fragment.text);

            if is_page_number(&fragment.text) {
                return None;
            }
            if fragment.text.chars().count() < min_text_length
                && fragment.content_type != ContentType::Heading
            {
                return None;
            }
            Some(fragment)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_footer_removed() {
        let text = "Chapter 5: Combat\nSome content here\n42";
        let result = clean_header_footer(text, 42);
        assert!(!result.contains("42"));
        assert!(!result.contains("Chapter 5"));
        assert!(result.contains("Some content here"));
    }

    #[test]
    fn page_number_inside_words_survives() {
        let result = clean_header_footer("Deals 1d8 damage, 1 round", 1);
        assert_eq!(result, "Deals 1d8 damage,  round");
    }

    #[test]
    fn hyphenated_words_merge() {
        let text = "This is a hyphen-\nated word and another split-\nword";
        assert_eq!(
            merge_hyphenated(text),
            "This is a hyphenated word and another splitword"
        );
    }

    #[test]
    fn whitespace_collapses_within_lines() {
        assert_eq!(
            normalize_whitespace("  This   has   extra   spaces  "),
            "This has extra spaces"
        );
        assert_eq!(normalize_whitespace("Fireball \n\n  3rd-level\tevocation"), "Fireball\n3rd-level evocation");
    }

    #[test]
    fn cleanup_drops_page_numbers_and_short_text() {
        let mut heading = ExtractedFragment::new(ContentType::Heading, "SPELLS", 3);
        heading.metadata.insert("is_bold".into(), true.into());
        let fragments = vec![
            ExtractedFragment::new(ContentType::Text, "  This   has   extra   spaces  ", 1),
            ExtractedFragment::new(ContentType::Text, "42", 42),
            ExtractedFragment::new(ContentType::Text, "Too short", 1),
            heading,
        ];

        let cleaned = clean_fragments(fragments, 10);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].text, "This has extra spaces");
        assert_eq!(cleaned[1].content_type, ContentType::Heading);
    }
}
