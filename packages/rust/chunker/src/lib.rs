//! Content-aware chunking of extracted rulebook fragments.
//!
//! Fragments are grouped by content type and each group is chunked its own
//! way: tables split by row with the header repeated, spells and feats kept
//! whole with derived metadata, prose merged across block splits and cut at
//! semantic boundaries, everything else split by size.

pub mod metadata;
pub mod semantic;
pub mod splitter;

use std::sync::Arc;

use tracing::{debug, info, instrument};

use rulevault_shared::{Chunk, ChunkConfig, ContentType, ExtractedFragment};

pub use splitter::RecursiveSplitter;

use crate::splitter::char_len;

/// Rows of a markdown table that repeat at the top of every split chunk.
const TABLE_HEADER_ROWS: usize = 2;

pub struct RulebookChunker {
    config: ChunkConfig,
    splitter: RecursiveSplitter,
}

impl RulebookChunker {
    pub fn new(config: ChunkConfig) -> Self {
        let splitter = RecursiveSplitter::new(config.chunk_size, config.chunk_overlap);
        Self { config, splitter }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Chunk fragments, processing content-type groups in first-seen order.
    #[instrument(skip_all, fields(fragments = fragments.len()))]
    pub fn chunk(&self, fragments: Vec<ExtractedFragment>) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for (group, items) in group_by_type(fragments) {
            let before = chunks.len();
            match group {
                ContentType::Table if self.config.preserve_tables => {
                    chunks.extend(items.into_iter().flat_map(|t| self.chunk_table(t)));
                }
                ContentType::Spell if self.config.preserve_spells => {
                    chunks.extend(items.into_iter().map(chunk_spell));
                }
                ContentType::Feat if self.config.preserve_feats => {
                    chunks.extend(items.into_iter().map(chunk_feat));
                }
                ContentType::Text => chunks.extend(self.chunk_prose(items)),
                _ => chunks.extend(items.into_iter().flat_map(|f| self.chunk_generic(f))),
            }
            debug!(group = %group, chunks = chunks.len() - before, "chunked group");
        }

        info!(chunks = chunks.len(), "created chunks");
        chunks
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    fn chunk_table(&self, table: ExtractedFragment) -> Vec<Chunk> {
        let table = Arc::new(table);
        if char_len(&table.text) <= self.config.max_chunk_size {
            return vec![chunk_from(&table, table.text.clone(), ContentType::Table)];
        }

        let lines: Vec<&str> = table.text.split('\n').collect();
        let header_len = TABLE_HEADER_ROWS.min(lines.len());
        let (header, rows) = lines.split_at(header_len);
        let header_size: usize = header.iter().map(|l| char_len(l)).sum();

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = header.to_vec();
        let mut size = header_size;

        for row in rows {
            let row_size = char_len(row);
            if size + row_size > self.config.chunk_size && current.len() > header_len {
                chunks.push(chunk_from(&table, current.join("\n"), ContentType::Table));
                current = header.to_vec();
                size = header_size;
            }
            current.push(row);
            size += row_size;
        }
        if current.len() > header_len {
            chunks.push(chunk_from(&table, current.join("\n"), ContentType::Table));
        }
        chunks
    }

    // -----------------------------------------------------------------------
    // Prose (text and headings)
    // -----------------------------------------------------------------------

    fn chunk_prose(&self, items: Vec<ExtractedFragment>) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for unit in combine_related(items) {
            let unit = Arc::new(unit);
            let pieces = if self.config.semantic_chunking {
                semantic::split_semantic(&unit.text, self.config.chunk_size)
            } else {
                self.splitter.split(&unit.text)
            };

            chunks.extend(
                pieces
                    .into_iter()
                    .filter(|p| char_len(p) >= self.config.min_chunk_size)
                    .map(|p| chunk_from(&unit, p, unit.content_type)),
            );
        }
        chunks
    }

    // -----------------------------------------------------------------------
    // Everything else
    // -----------------------------------------------------------------------

    fn chunk_generic(&self, item: ExtractedFragment) -> Vec<Chunk> {
        let item = Arc::new(item);
        if char_len(&item.text) <= self.config.chunk_size {
            return vec![chunk_from(&item, item.text.clone(), item.content_type)];
        }
        self.splitter
            .split(&item.text)
            .into_iter()
            .map(|piece| chunk_from(&item, piece, item.content_type))
            .collect()
    }
}

/// Group fragments by type in first-seen order. Headings share the text
/// group so a heading can merge with the prose that follows it.
fn group_by_type(fragments: Vec<ExtractedFragment>) -> Vec<(ContentType, Vec<ExtractedFragment>)> {
    let mut groups: Vec<(ContentType, Vec<ExtractedFragment>)> = Vec::new();
    for fragment in fragments {
        let key = match fragment.content_type {
            ContentType::Heading => ContentType::Text,
            other => other,
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, items)) => items.push(fragment),
            None => groups.push((key, vec![fragment])),
        }
    }
    groups
}

fn should_combine(current: &ExtractedFragment, next: &ExtractedFragment) -> bool {
    if current.page_number != next.page_number {
        return false;
    }
    current.text.ends_with(':')
        || current.text.ends_with('-')
        || (current.content_type == ContentType::Text && next.content_type == ContentType::Text)
}

/// Merge same-page continuations into single units. A `:` or `-` lead-in
/// joins the next fragment on a new line; separate prose blocks join as
/// paragraphs.
fn combine_related(items: Vec<ExtractedFragment>) -> Vec<ExtractedFragment> {
    let mut combined = Vec::new();
    let mut iter = items.into_iter();
    let Some(mut current) = iter.next() else {
        return combined;
    };

    for next in iter {
        if should_combine(&current, &next) {
            let continues = current.text.ends_with(':') || current.text.ends_with('-');
            current.text.push_str(if continues { "\n" } else { "\n\n" });
            current.text.push_str(&next.text);
            current.metadata.extend(next.metadata);
            if let (Some(a), Some(b)) = (current.bounding_box, next.bounding_box) {
                current.bounding_box = Some(a.union(&b));
            }
        } else {
            combined.push(std::mem::replace(&mut current, next));
        }
    }
    combined.push(current);
    combined
}

fn chunk_spell(spell: ExtractedFragment) -> Chunk {
    let mut meta = spell.metadata.clone();
    meta.extend(metadata::spell_metadata(&spell.text));
    Chunk::new(spell.text.clone(), meta, ContentType::Spell, Some(Arc::new(spell)))
}

fn chunk_feat(feat: ExtractedFragment) -> Chunk {
    let mut meta = feat.metadata.clone();
    meta.extend(metadata::feat_metadata(&feat.text));
    Chunk::new(feat.text.clone(), meta, ContentType::Feat, Some(Arc::new(feat)))
}

fn chunk_from(source: &Arc<ExtractedFragment>, text: String, chunk_type: ContentType) -> Chunk {
    Chunk::new(
        text,
        source.metadata.clone(),
        chunk_type,
        Some(Arc::clone(source)),
    )
}
