//! Rule-table classification of text fragments.
//!
//! Pattern groups are tested in declaration order and the first group with a
//! matching pattern decides the type. A bold-looking short fragment is a
//! heading no matter what matched before.

use std::sync::LazyLock;

use regex::Regex;
use rulevault_shared::{ContentType, ExtractedFragment};

/// Fragments at or above this many characters are never headings.
const MAX_HEADING_LEN: usize = 100;

/// Text under this length ending in `:` reads as a label heading.
const MAX_LABEL_LEN: usize = 50;

static PATTERN_GROUPS: LazyLock<Vec<(ContentType, Vec<Regex>)>> = LazyLock::new(|| {
    let group = |ct: ContentType, patterns: &[&str]| {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(&format!("(?im){p}")).expect("valid regex"))
            .collect();
        (ct, compiled)
    };

    vec![
        group(
            ContentType::Spell,
            &[
                r"^(.+?)\n\d+(?:st|nd|rd|th)-level",
                r"^(.+?)\nCantrip",
                r"Casting Time:",
                r"Range:",
                r"Components:",
            ],
        ),
        group(
            ContentType::Feat,
            &[
                r"Prerequisite:",
                r"You gain the following benefits:",
                r"^(.+?)\n.*?feat",
            ],
        ),
        group(
            ContentType::ClassFeature,
            &[
                r"Starting at \d+(?:st|nd|rd|th) level",
                r"At \d+(?:st|nd|rd|th) level",
                r"Beginning at \d+(?:st|nd|rd|th) level",
            ],
        ),
        group(
            ContentType::Equipment,
            &[
                r"(?:Cost|Price):\s*\d+\s*(?:cp|sp|gp|pp)",
                r"(?:Weight|Wt)\.?:\s*\d+\s*(?:lb\.|lbs?)",
                r"(?:AC|Armor Class):\s*\d+",
                r"Damage:\s*\d+d\d+",
            ],
        ),
    ]
});

static CAPS_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z\s]+$").expect("valid regex"));

/// First pattern group matching `text`, if any.
pub fn match_pattern_group(text: &str) -> Option<ContentType> {
    PATTERN_GROUPS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(text)))
        .map(|(ct, _)| *ct)
}

/// Whether the text has the look of bold display type.
pub fn looks_bold(text: &str) -> bool {
    is_upper(text)
        || CAPS_LINE_RE.is_match(text)
        || (text.chars().count() < MAX_LABEL_LEN && text.ends_with(':'))
}

/// At least one cased character, and every cased character uppercase.
fn is_upper(text: &str) -> bool {
    let mut cased = text.chars().filter(|c| c.is_lowercase() || c.is_uppercase());
    let mut any = false;
    let all_upper = cased.all(|c| {
        any = true;
        c.is_uppercase()
    });
    any && all_upper
}

pub fn is_heading(text: &str, is_bold: bool) -> bool {
    is_bold && text.chars().count() < MAX_HEADING_LEN
}

/// Classify every TEXT fragment in place. Other types are left untouched.
pub(crate) fn classify_fragments(fragments: &mut [ExtractedFragment]) {
    for fragment in fragments.iter_mut() {
        if fragment.content_type != ContentType::Text {
            continue;
        }

        if let Some(ct) = match_pattern_group(&fragment.text) {
            fragment.content_type = ct;
        }

        let is_bold = fragment
            .metadata
            .get("is_bold")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if is_heading(&fragment.text, is_bold) {
            fragment.content_type = ContentType::Heading;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_fragment(text: &str, bold: bool) -> ExtractedFragment {
        let mut f = ExtractedFragment::new(ContentType::Text, text, 1);
        f.metadata.insert("is_bold".into(), serde_json::Value::Bool(bold));
        f
    }

    #[test]
    fn spell_block_is_spell() {
        let text = "Fireball\n3rd-level evocation\nCasting Time: 1 action";
        assert_eq!(match_pattern_group(text), Some(ContentType::Spell));
        assert_eq!(
            match_pattern_group("Fire Bolt\nEvocation cantrip"),
            None,
            "cantrip must start its own line"
        );
        assert_eq!(
            match_pattern_group("Light\nCantrip evocation"),
            Some(ContentType::Spell)
        );
    }

    #[test]
    fn feat_block_is_feat() {
        let text = "Alert\nPrerequisite: None\nYou gain a +5 bonus";
        assert_eq!(match_pattern_group(text), Some(ContentType::Feat));
    }

    #[test]
    fn class_feature_block_is_class_feature() {
        let text = "Starting at 3rd level, you can use your action";
        assert_eq!(match_pattern_group(text), Some(ContentType::ClassFeature));
    }

    #[test]
    fn equipment_block_is_equipment() {
        assert_eq!(
            match_pattern_group("Longsword\nCost: 15 gp\nWeight: 3 lb."),
            Some(ContentType::Equipment)
        );
    }

    #[test]
    fn spell_group_wins_over_class_feature() {
        let text = "Starting at 5th level you may cast this.\nRange: 60 feet";
        assert_eq!(match_pattern_group(text), Some(ContentType::Spell));
    }

    #[test]
    fn bold_short_text_becomes_heading() {
        let mut fragments = vec![
            text_fragment("Casting Time:", true),
            text_fragment("A long paragraph of ordinary rules prose.", false),
        ];
        classify_fragments(&mut fragments);
        assert_eq!(fragments[0].content_type, ContentType::Heading);
        assert_eq!(fragments[1].content_type, ContentType::Text);
    }

    #[test]
    fn tables_are_not_reclassified() {
        let mut fragments = vec![ExtractedFragment::new(
            ContentType::Table,
            "| Range: | Cost: 5 gp |",
            1,
        )];
        classify_fragments(&mut fragments);
        assert_eq!(fragments[0].content_type, ContentType::Table);
    }

    #[test]
    fn bold_heuristics() {
        assert!(looks_bold("CHAPTER TITLE"));
        assert!(looks_bold("SPELLS 101"));
        assert!(looks_bold("Equipment:"));
        assert!(!looks_bold("Ordinary sentence."));
        assert!(!looks_bold("1234"));
    }
}
