//! Core pipeline orchestration for rulevault.
//!
//! [`RagPipeline`] ties extraction, chunking, embedding, and indexing into
//! one `process_pdf` workflow and serves cited search over the result.

pub mod pipeline;
pub mod report;

pub use pipeline::{ProgressReporter, RagPipeline, SilentProgress};
pub use report::{
    ChunkingReport, EmbeddingReport, ExtractionReport, FormattedResult, IndexingReport,
    IngestReport, StageReports, parse_content_types,
};
