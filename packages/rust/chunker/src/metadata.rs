//! Metadata lifted from spell and feat text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use rulevault_shared::Metadata;

static SPELL_LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:st|nd|rd|th)-level").expect("valid regex"));

static PREREQUISITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Prerequisites?:\s*(.+?)(?:\n|$)").expect("valid regex"));

const SCHOOLS: [&str; 8] = [
    "abjuration",
    "conjuration",
    "divination",
    "enchantment",
    "evocation",
    "illusion",
    "necromancy",
    "transmutation",
];

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn spell_level(text: &str) -> String {
    if let Some(caps) = SPELL_LEVEL_RE.captures(text) {
        return caps[1].to_string();
    }
    if text.to_lowercase().contains("cantrip") {
        return "0".to_string();
    }
    "Unknown".to_string()
}

pub fn spell_school(text: &str) -> String {
    let lower = text.to_lowercase();
    SCHOOLS
        .iter()
        .find(|school| lower.contains(*school))
        .map_or_else(|| "Unknown".to_string(), |school| capitalize(school))
}

pub fn prerequisites(text: &str) -> String {
    PREREQUISITE_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "None".to_string())
}

/// `spell_name`, `spell_level`, and `spell_school` for a spell block.
pub fn spell_metadata(text: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("spell_name".into(), Value::from(first_line(text)));
    meta.insert("spell_level".into(), Value::from(spell_level(text)));
    meta.insert("spell_school".into(), Value::from(spell_school(text)));
    meta
}

/// `feat_name` and `prerequisites` for a feat block.
pub fn feat_metadata(text: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("feat_name".into(), Value::from(first_line(text)));
    meta.insert("prerequisites".into(), Value::from(prerequisites(text)));
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spell_fields() {
        let meta = spell_metadata("Fireball\n3rd-level evocation\nCasting Time: 1 action");
        assert_eq!(meta["spell_name"], "Fireball");
        assert_eq!(meta["spell_level"], "3");
        assert_eq!(meta["spell_school"], "Evocation");
    }

    #[test]
    fn cantrips_are_level_zero() {
        assert_eq!(spell_level("Fire Bolt\nEvocation cantrip"), "0");
        assert_eq!(spell_level("No level here"), "Unknown");
        assert_eq!(spell_school("Something odd"), "Unknown");
    }

    #[test]
    fn feat_fields() {
        let meta = feat_metadata("Grappler\nPrerequisite: Strength 13 or higher\nYou gain...");
        assert_eq!(meta["feat_name"], "Grappler");
        assert_eq!(meta["prerequisites"], "Strength 13 or higher");
    }

    #[test]
    fn missing_prerequisite_is_none() {
        assert_eq!(prerequisites("Alert\nAlways on the lookout"), "None");
        assert_eq!(prerequisites("Prerequisites: Dex 13"), "Dex 13");
    }
}
