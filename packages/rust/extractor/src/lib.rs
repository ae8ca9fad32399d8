//! PDF rulebook extraction.
//!
//! This crate provides:
//! - [`layout`]: page layout reading behind the [`LayoutSource`] trait
//! - [`PdfExtractor`]: the two-pass extractor producing [`ExtractedFragment`]s
//! - [`classify`], [`cleanup`], [`tables`]: the heuristics each pass applies

pub mod classify;
pub mod cleanup;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod layout;
pub mod tables;

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use rulevault_shared::{ContentType, ExtractedFragment, ExtractionConfig, Result, RuleVaultError};

pub use layout::{BlockKind, LayoutBlock, LayoutSource, LopdfSource, PageLayout, TextLine, TextRun};
pub use tables::{TableGrid, identify_table_type};

/// Converts rulebook PDFs into classified, paginated fragments.
pub struct PdfExtractor {
    config: ExtractionConfig,
    source: Arc<dyn LayoutSource>,
}

impl PdfExtractor {
    /// Extractor reading PDFs with `lopdf`.
    pub fn new(config: ExtractionConfig) -> Self {
        Self::with_source(config, Arc::new(LopdfSource))
    }

    pub fn with_source(config: ExtractionConfig, source: Arc<dyn LayoutSource>) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract every fragment from the PDF at `path`.
    ///
    /// Fails only if the document cannot be opened or parsed. A table that
    /// fails validation is logged and omitted.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn extract(
        &self,
        path: &Path,
        book_name: Option<&str>,
        version: Option<&str>,
    ) -> Result<Vec<ExtractedFragment>> {
        let source = Arc::clone(&self.source);
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || source.read_pages(&owned))
            .await
            .map_err(|e| RuleVaultError::extraction(path, format!("layout task failed: {e}")))??;

        let fragments = self.extract_pages(&pages, book_name, version);
        info!(
            pages = pages.len(),
            fragments = fragments.len(),
            "extracted content"
        );
        Ok(fragments)
    }

    /// Run both passes, classification, and cleanup over read page layouts.
    pub fn extract_pages(
        &self,
        pages: &[PageLayout],
        book_name: Option<&str>,
        version: Option<&str>,
    ) -> Vec<ExtractedFragment> {
        let mut fragments = self.text_pass(pages);
        if self.config.extract_tables {
            fragments.extend(self.table_pass(pages));
        }

        classify::classify_fragments(&mut fragments);
        let mut fragments = cleanup::clean_fragments(fragments, self.config.min_text_length);

        for fragment in &mut fragments {
            fragment.source_book = book_name.map(str::to_string);
            fragment.source_version = version.map(str::to_string);
        }
        fragments
    }

    // -----------------------------------------------------------------------
    // Pass 1: text blocks
    // -----------------------------------------------------------------------

    fn text_pass(&self, pages: &[PageLayout]) -> Vec<ExtractedFragment> {
        let mut fragments = Vec::new();

        for page in pages {
            for block in page.blocks() {
                if block.kind == BlockKind::Image {
                    continue;
                }

                let mut text = block.text.trim().to_string();
                if self.config.clean_headers_footers {
                    text = cleanup::clean_header_footer(&text, page.number);
                }
                if self.config.merge_hyphenated {
                    text = cleanup::merge_hyphenated(&text);
                }
                if text.is_empty() {
                    continue;
                }

                let is_bold = block.bold || classify::looks_bold(&text);
                let mut fragment = ExtractedFragment::new(ContentType::Text, text, page.number);
                fragment.bounding_box = Some(block.bbox);
                fragment
                    .metadata
                    .insert("font_size".into(), Value::from(round2(block.font_size)));
                fragment.metadata.insert("is_bold".into(), Value::Bool(is_bold));
                fragments.push(fragment);
            }
        }

        debug!(fragments = fragments.len(), "text pass complete");
        fragments
    }

    // -----------------------------------------------------------------------
    // Pass 2: tables
    // -----------------------------------------------------------------------

    fn table_pass(&self, pages: &[PageLayout]) -> Vec<ExtractedFragment> {
        let mut fragments = Vec::new();

        for page in pages {
            for (table_index, grid) in tables::detect_tables(page).into_iter().enumerate() {
                if let Err(warning) = grid.validate(page.number) {
                    warn!(%warning, table_index, "skipping table");
                    continue;
                }

                let mut fragment =
                    ExtractedFragment::new(ContentType::Table, grid.to_markdown(), page.number);
                let meta = &mut fragment.metadata;
                meta.insert("table_index".into(), Value::from(table_index));
                meta.insert("rows".into(), Value::from(grid.rows.len()));
                meta.insert("columns".into(), Value::from(grid.column_count()));
                meta.insert("table_type".into(), Value::from(grid.table_type()));
                fragments.push(fragment);
            }
        }

        debug!(tables = fragments.len(), "table pass complete");
        fragments
    }
}

fn round2(value: f32) -> f64 {
    (f64::from(value) * 100.0).round() / 100.0
}
