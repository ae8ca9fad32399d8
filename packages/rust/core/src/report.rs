//! Serializable results returned by the pipeline.

use std::collections::BTreeMap;

use serde::Serialize;

use rulevault_retriever::CollectionStats;
use rulevault_shared::{Chunk, ContentType, ExtractedFragment, Metadata, Result, SearchResult};

/// Outcome of one `process_pdf` run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub pdf_path: String,
    pub game_system: String,
    pub book_name: String,
    pub version: Option<String>,
    pub stages: StageReports,
    pub collection_stats: CollectionStats,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReports {
    pub extraction: ExtractionReport,
    pub chunking: ChunkingReport,
    pub embedding: EmbeddingReport,
    pub indexing: IndexingReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub content_items: usize,
    /// Fragment count per content type.
    pub content_types: BTreeMap<String, usize>,
}

impl ExtractionReport {
    pub fn from_fragments(fragments: &[ExtractedFragment]) -> Self {
        let mut content_types = BTreeMap::new();
        for fragment in fragments {
            *content_types
                .entry(fragment.content_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Self {
            content_items: fragments.len(),
            content_types,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkingReport {
    pub chunks_created: usize,
    /// Mean chunk length in characters, 0 when nothing was chunked.
    pub avg_chunk_size: f64,
    /// Chunk count per chunk type.
    pub chunk_types: BTreeMap<String, usize>,
}

impl ChunkingReport {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut chunk_types = BTreeMap::new();
        let mut total_chars = 0usize;
        for chunk in chunks {
            total_chars += chunk.text.chars().count();
            *chunk_types
                .entry(chunk.chunk_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Self {
            chunks_created: chunks.len(),
            avg_chunk_size: if chunks.is_empty() {
                0.0
            } else {
                total_chars as f64 / chunks.len() as f64
            },
            chunk_types,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingReport {
    pub embeddings_generated: usize,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexingReport {
    pub indexed_count: usize,
    pub collection: String,
}

/// A search hit shaped for callers: similarity, citation, and provenance.
#[derive(Debug, Clone, Serialize)]
pub struct FormattedResult {
    pub text: String,
    pub score: f32,
    pub citation: String,
    pub source_reference: String,
    pub metadata: Metadata,
}

impl From<SearchResult> for FormattedResult {
    fn from(result: SearchResult) -> Self {
        let citation = result.citation();
        Self {
            text: result.text,
            score: result.score,
            citation,
            source_reference: result.source_reference,
            metadata: result.metadata,
        }
    }
}

/// Parse content type names; an unknown name is a validation error.
pub fn parse_content_types<S: AsRef<str>>(names: &[S]) -> Result<Vec<ContentType>> {
    names.iter().map(|name| name.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulevault_shared::RuleVaultError;
    use serde_json::json;

    #[test]
    fn counts_fragments_by_type() {
        let fragments = vec![
            ExtractedFragment::new(ContentType::Spell, "Fireball", 1),
            ExtractedFragment::new(ContentType::Text, "Some rules text", 1),
            ExtractedFragment::new(ContentType::Text, "More rules text", 2),
        ];
        let report = ExtractionReport::from_fragments(&fragments);
        assert_eq!(report.content_items, 3);
        assert_eq!(report.content_types["text"], 2);
        assert_eq!(report.content_types["spell"], 1);
    }

    #[test]
    fn chunking_report_averages_and_counts() {
        let chunks = vec![
            Chunk::new("abcd", Metadata::new(), ContentType::Table, None),
            Chunk::new("ab", Metadata::new(), ContentType::Table, None),
            Chunk::new("abcdef", Metadata::new(), ContentType::Spell, None),
        ];
        let report = ChunkingReport::from_chunks(&chunks);
        assert_eq!(report.chunks_created, 3);
        assert!((report.avg_chunk_size - 4.0).abs() < f64::EPSILON);
        assert_eq!(report.chunk_types["table"], 2);
        assert_eq!(report.chunk_types["spell"], 1);

        let empty = ChunkingReport::from_chunks(&[]);
        assert_eq!(empty.avg_chunk_size, 0.0);
        assert!(empty.chunk_types.is_empty());
    }

    #[test]
    fn parses_known_types_and_rejects_unknown() {
        let types = parse_content_types(&["spell", "Class_Feature"]).unwrap();
        assert_eq!(types, vec![ContentType::Spell, ContentType::ClassFeature]);

        let err = parse_content_types(&["potion"]).unwrap_err();
        assert!(matches!(err, RuleVaultError::Validation { .. }));
    }

    #[test]
    fn formatted_result_carries_citation() {
        let result = SearchResult {
            text: "Fireball".into(),
            score: 0.91,
            metadata: json!({ "source_book": "PHB", "page_number": 241 })
                .as_object()
                .cloned()
                .unwrap(),
            source_reference: "PHB - p. 241 - (spell)".into(),
        };
        let formatted = FormattedResult::from(result);
        assert_eq!(formatted.citation, "PHB p.241");
        assert_eq!(formatted.source_reference, "PHB - p. 241 - (spell)");
    }
}
