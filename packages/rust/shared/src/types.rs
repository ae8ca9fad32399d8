//! Core domain types for rulebook ingestion.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RuleVaultError;

/// Open-schema metadata mapping attached to fragments, chunks, and results.
pub type Metadata = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// ContentType
// ---------------------------------------------------------------------------

/// Kind of rulebook content a fragment or chunk holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Table,
    Heading,
    Spell,
    Feat,
    Rule,
    ClassFeature,
    Equipment,
    Monster,
}

impl ContentType {
    /// Every variant, in declaration order.
    pub const ALL: [ContentType; 9] = [
        Self::Text,
        Self::Table,
        Self::Heading,
        Self::Spell,
        Self::Feat,
        Self::Rule,
        Self::ClassFeature,
        Self::Equipment,
        Self::Monster,
    ];

    /// Stable lowercase value stored in payloads and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Heading => "heading",
            Self::Spell => "spell",
            Self::Feat => "feat",
            Self::Rule => "rule",
            Self::ClassFeature => "class_feature",
            Self::Equipment => "equipment",
            Self::Monster => "monster",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = RuleVaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|ct| ct.as_str() == needle)
            .ok_or_else(|| RuleVaultError::validation(format!("unknown content type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// ExtractedFragment
// ---------------------------------------------------------------------------

/// Page-space rectangle `(x0, y0, x1, y1)` in PDF user units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// One classified unit of raw extracted PDF content, pre-chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFragment {
    pub content_type: ContentType,
    pub text: String,
    /// 1-based page number.
    pub page_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_book: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
}

impl ExtractedFragment {
    /// A fragment with empty metadata and no source tags.
    pub fn new(content_type: ContentType, text: impl Into<String>, page_number: u32) -> Self {
        Self {
            content_type,
            text: text.into(),
            page_number,
            bounding_box: None,
            metadata: Metadata::new(),
            source_book: None,
            source_version: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A retrieval-sized, embeddable unit of text derived from one or more fragments.
///
/// Construction through [`Chunk::new`] stamps `chunk_type` and `text_length`
/// into the metadata, so both always agree with the chunk's own fields.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
    pub chunk_type: ContentType,
    pub source_fragment: Option<Arc<ExtractedFragment>>,
}

impl Chunk {
    pub fn new(
        text: impl Into<String>,
        mut metadata: Metadata,
        chunk_type: ContentType,
        source_fragment: Option<Arc<ExtractedFragment>>,
    ) -> Self {
        let text = text.into();
        metadata.insert("chunk_type".into(), Value::from(chunk_type.as_str()));
        metadata.insert("text_length".into(), Value::from(text.chars().count()));
        Self {
            text,
            metadata,
            chunk_type,
            source_fragment,
        }
    }

    /// Page of the originating fragment.
    pub fn page_number(&self) -> Option<u32> {
        self.source_fragment.as_ref().map(|f| f.page_number)
    }

    /// Book of the originating fragment.
    pub fn source_book(&self) -> Option<&str> {
        self.source_fragment
            .as_ref()
            .and_then(|f| f.source_book.as_deref())
    }

    /// Book version of the originating fragment.
    pub fn source_version(&self) -> Option<&str> {
        self.source_fragment
            .as_ref()
            .and_then(|f| f.source_version.as_deref())
    }
}

// ---------------------------------------------------------------------------
// EmbeddingRecord
// ---------------------------------------------------------------------------

/// A chunk paired with its vector and stable content id.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Deterministic id derived from chunk type, text, page, and book.
    pub id: String,
    pub model_name: String,
}

impl EmbeddingRecord {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// One retrieved chunk. `score` starts as the index similarity and may be
/// rewritten by reranking, so it can exceed 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
    pub source_reference: String,
}

impl SearchResult {
    /// `"{book} p.{page}"`, plus ` ({section})` and ` "{quote}"` when present.
    ///
    /// Reads `book` or `source_book`, and `page` or `page_number`. Without
    /// a book or page the citation is `"Unknown Source"`.
    pub fn citation(&self) -> String {
        let text_of = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| self.metadata.get(*k))
                .find_map(|v| match v {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };

        let book = text_of(&["book", "source_book"]);
        let page = text_of(&["page", "page_number"]);
        let mut citation = match (book, page) {
            (Some(book), Some(page)) => format!("{book} p.{page}"),
            (Some(book), None) => book,
            (None, Some(page)) => format!("p.{page}"),
            (None, None) => return "Unknown Source".to_string(),
        };

        if let Some(section) = text_of(&["section"]) {
            citation.push_str(&format!(" ({section})"));
        }
        if let Some(quote) = text_of(&["quote"]) {
            citation.push_str(&format!(" \"{quote}\""));
        }
        citation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_roundtrip() {
        for ct in ContentType::ALL {
            let parsed: ContentType = ct.as_str().parse().expect("parse content type");
            assert_eq!(parsed, ct);
        }
        assert_eq!(
            serde_json::to_string(&ContentType::ClassFeature).unwrap(),
            "\"class_feature\""
        );
    }

    #[test]
    fn content_type_rejects_unknown() {
        let err = "potion".parse::<ContentType>().unwrap_err();
        assert!(err.to_string().contains("potion"));
    }

    #[test]
    fn chunk_stamps_metadata() {
        let mut meta = Metadata::new();
        meta.insert("chunk_type".into(), Value::from("stale"));
        let chunk = Chunk::new("Fireball ✦", meta, ContentType::Spell, None);

        assert_eq!(chunk.metadata["chunk_type"], Value::from("spell"));
        assert_eq!(chunk.metadata["text_length"], Value::from(10));
    }

    #[test]
    fn chunk_exposes_source_fields() {
        let mut fragment = ExtractedFragment::new(ContentType::Text, "Some rule text", 12);
        fragment.source_book = Some("PHB".into());
        let chunk = Chunk::new(
            "Some rule text",
            Metadata::new(),
            ContentType::Text,
            Some(Arc::new(fragment)),
        );

        assert_eq!(chunk.page_number(), Some(12));
        assert_eq!(chunk.source_book(), Some("PHB"));
        assert_eq!(chunk.source_version(), None);
    }

    #[test]
    fn bounding_box_union() {
        let a = BoundingBox { x0: 10.0, y0: 10.0, x1: 50.0, y1: 20.0 };
        let b = BoundingBox { x0: 5.0, y0: 15.0, x1: 40.0, y1: 30.0 };
        let u = a.union(&b);
        assert_eq!(u, BoundingBox { x0: 5.0, y0: 10.0, x1: 50.0, y1: 30.0 });
    }

    fn result_with(meta: serde_json::Value) -> SearchResult {
        SearchResult {
            text: "text".into(),
            score: 0.9,
            metadata: meta.as_object().cloned().unwrap_or_default(),
            source_reference: String::new(),
        }
    }

    #[test]
    fn citation_formats() {
        let r = result_with(serde_json::json!({"book": "PHB", "page": 241}));
        assert_eq!(r.citation(), "PHB p.241");

        let r = result_with(serde_json::json!({}));
        assert_eq!(r.citation(), "Unknown Source");

        let r = result_with(serde_json::json!({
            "source_book": "DMG",
            "page_number": 12,
            "section": "Traps",
            "quote": "Roll a d20"
        }));
        assert_eq!(r.citation(), "DMG p.12 (Traps) \"Roll a d20\"");
    }
}
