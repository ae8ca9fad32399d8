//! Shared types, error model, and configuration for rulevault.
//!
//! This crate is the foundation depended on by all other rulevault crates.
//! It provides:
//! - [`RuleVaultError`]: the unified error type
//! - Domain types ([`ContentType`], [`ExtractedFragment`], [`Chunk`], [`EmbeddingRecord`],
//!   [`SearchResult`])
//! - Configuration ([`AppConfig`], per-stage runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheMode, ChunkConfig, EmbeddingConfig, EmbeddingProvider, EmbeddingSection,
    ExtractionConfig, IndexBackend, RetrieverConfig, RetrieverSection, StorageSection, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{RuleVaultError, Result, Stage};
pub use types::{
    BoundingBox, Chunk, ContentType, EmbeddingRecord, ExtractedFragment, Metadata, SearchResult,
};
