//! Application configuration for rulevault.
//!
//! User config lives at `~/.rulevault/rulevault.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleVaultError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "rulevault.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".rulevault";

// ---------------------------------------------------------------------------
// Config structs (matching rulevault.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub chunking: ChunkConfig,

    #[serde(default)]
    pub embedding: EmbeddingSection,

    #[serde(default)]
    pub retriever: RetrieverSection,

    #[serde(default)]
    pub storage: StorageSection,
}

/// `[extraction]` section. Used as-is by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Run the second, tabular pass.
    #[serde(default = "default_true")]
    pub extract_tables: bool,

    /// Strip page numbers and "Chapter N" boilerplate.
    #[serde(default = "default_true")]
    pub clean_headers_footers: bool,

    /// Re-join words broken by a hyphen at a line wrap.
    #[serde(default = "default_true")]
    pub merge_hyphenated: bool,

    /// Fragments shorter than this are dropped unless they are headings.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extract_tables: true,
            clean_headers_footers: true,
            merge_hyphenated: true,
            min_text_length: default_min_text_length(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_text_length() -> usize {
    10
}

/// `[chunking]` section. Used as-is by the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// A table whose markdown fits within this stays a single chunk.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    #[serde(default = "default_true")]
    pub preserve_tables: bool,

    #[serde(default = "default_true")]
    pub preserve_spells: bool,

    #[serde(default = "default_true")]
    pub preserve_feats: bool,

    #[serde(default = "default_true")]
    pub semantic_chunking: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            preserve_tables: true,
            preserve_spells: true,
            preserve_feats: true,
            semantic_chunking: true,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_max_chunk_size() -> usize {
    2000
}

/// Which embedding model backs the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Any server exposing an OpenAI-compatible `/embeddings` endpoint.
    #[default]
    Openai,
    /// Offline deterministic feature hashing.
    Hashing,
}

/// Where computed embeddings are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Memory,
    Disk,
    None,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_embedding_model")]
    pub model_name: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_true")]
    pub normalize: bool,

    #[serde(default)]
    pub cache: CacheMode,

    /// Database for the disk cache. Defaults to the storage database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<String>,

    /// HuggingFace `tokenizer.json` used for token-level truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<String>,

    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model_name: default_embedding_model(),
            dimension: default_dimension(),
            max_sequence_length: default_max_sequence_length(),
            batch_size: default_batch_size(),
            normalize: true,
            cache: CacheMode::default(),
            cache_path: None,
            tokenizer_path: None,
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_api_key_env(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".into()
}
fn default_dimension() -> usize {
    384
}
fn default_max_sequence_length() -> usize {
    512
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_base_url() -> String {
    "http://localhost:8080/v1".into()
}
fn default_embedding_api_key_env() -> String {
    "RULEVAULT_EMBEDDING_API_KEY".into()
}
fn default_embedding_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

/// Which vector index stores the points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Qdrant,
    /// Process-local, lost on exit.
    Memory,
}

/// `[retriever]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverSection {
    #[serde(default)]
    pub backend: IndexBackend,

    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    #[serde(default = "default_qdrant_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    #[serde(default = "default_true")]
    pub use_reranking: bool,

    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,

    #[serde(default = "default_retriever_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrieverSection {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            qdrant_url: default_qdrant_url(),
            api_key_env: default_qdrant_api_key_env(),
            collection_prefix: default_collection_prefix(),
            search_limit: default_search_limit(),
            score_threshold: default_score_threshold(),
            use_reranking: true,
            upsert_batch_size: default_upsert_batch_size(),
            timeout_secs: default_retriever_timeout(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".into()
}
fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".into()
}
fn default_collection_prefix() -> String {
    "rulevault_rules".into()
}
fn default_search_limit() -> usize {
    10
}
fn default_score_threshold() -> f32 {
    0.5
}
fn default_upsert_batch_size() -> usize {
    100
}
fn default_retriever_timeout() -> u64 {
    30
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// libSQL database holding the disk cache and run history.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Record each ingestion in the run history table.
    #[serde(default = "default_true")]
    pub record_runs: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            record_runs: true,
        }
    }
}

fn default_db_path() -> String {
    "~/.rulevault/rulevault.db".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (resolved from the config file + environment)
// ---------------------------------------------------------------------------

/// Runtime embedder configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model_name: String,
    pub dimension: usize,
    pub max_sequence_length: usize,
    pub batch_size: usize,
    pub normalize: bool,
    pub cache: CacheMode,
    pub cache_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,
    pub base_url: String,
    /// Resolved from `api_key_env` at build time.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for EmbeddingConfig {
    fn from(config: &AppConfig) -> Self {
        let section = &config.embedding;
        let cache_path = section
            .cache_path
            .as_deref()
            .unwrap_or(&config.storage.db_path);
        Self {
            provider: section.provider,
            model_name: section.model_name.clone(),
            dimension: section.dimension,
            max_sequence_length: section.max_sequence_length,
            batch_size: section.batch_size.max(1),
            normalize: section.normalize,
            cache: section.cache,
            cache_path: Some(expand_home(cache_path)),
            tokenizer_path: section.tokenizer_path.as_deref().map(expand_home),
            base_url: section.base_url.trim_end_matches('/').to_string(),
            api_key: env_value(&section.api_key_env),
            timeout_secs: section.timeout_secs,
            max_retries: section.max_retries,
        }
    }
}

/// Runtime retriever configuration.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub backend: IndexBackend,
    pub qdrant_url: String,
    pub api_key: Option<String>,
    pub collection_prefix: String,
    pub search_limit: usize,
    pub score_threshold: f32,
    pub use_reranking: bool,
    pub upsert_batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RetrieverConfig {
    fn from(config: &AppConfig) -> Self {
        let section = &config.retriever;
        Self {
            backend: section.backend,
            qdrant_url: section.qdrant_url.trim_end_matches('/').to_string(),
            api_key: env_value(&section.api_key_env),
            collection_prefix: section.collection_prefix.clone(),
            search_limit: section.search_limit,
            score_threshold: section.score_threshold,
            use_reranking: section.use_reranking,
            upsert_batch_size: section.upsert_batch_size.max(1),
            timeout_secs: section.timeout_secs,
        }
    }
}

fn env_value(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.rulevault/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RuleVaultError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.rulevault/rulevault.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RuleVaultError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RuleVaultError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RuleVaultError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RuleVaultError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RuleVaultError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
