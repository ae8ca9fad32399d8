//! Chunk and query embedding.
//!
//! [`Embedder`] prepares model input from a chunk (type tag, name, source),
//! truncates it to the model's token budget, batches uncached inputs through
//! an [`EmbeddingModel`], and normalizes the resulting vectors.

pub mod cache;
pub mod model;
pub mod tokenize;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use rulevault_shared::{
    CacheMode, Chunk, ContentType, EmbeddingConfig, EmbeddingProvider, EmbeddingRecord, Result,
    RuleVaultError,
};

pub use cache::{DiskCache, EmbeddingCache, MemoryCache, NoCache};
pub use model::{EmbeddingModel, HashingModel, OpenAiCompatibleModel};
pub use tokenize::{EstimatedTokenizer, HfTokenizer, TokenBudget};

/// Tokens held back from the model's maximum sequence length.
const TRUNCATION_MARGIN: usize = 10;

/// Context tags prepended to a query before embedding.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub content_type: Option<ContentType>,
    pub game_system: Option<String>,
}

impl QueryContext {
    pub fn for_system(game_system: impl Into<String>) -> Self {
        Self {
            content_type: None,
            game_system: Some(game_system.into()),
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// `"[TYPE] System: {game_system} {query}"`, omitting absent parts.
    pub fn apply(&self, query: &str) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(ct) = self.content_type {
            parts.push(format!("[{}]", ct.as_str().to_uppercase()));
        }
        if let Some(system) = &self.game_system {
            parts.push(format!("System: {system}"));
        }
        parts.push(query.to_string());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub dimension: usize,
    pub max_sequence_length: usize,
    pub provider: String,
}

pub struct Embedder {
    config: EmbeddingConfig,
    model: Arc<dyn EmbeddingModel>,
    tokenizer: Arc<dyn TokenBudget>,
    cache: Arc<dyn EmbeddingCache>,
}

impl Embedder {
    /// Build the model, tokenizer, and cache the config names.
    ///
    /// Fails with [`RuleVaultError::EmbeddingModel`] if the model or the
    /// tokenizer cannot be loaded.
    pub async fn from_config(config: EmbeddingConfig) -> Result<Self> {
        let model: Arc<dyn EmbeddingModel> = match config.provider {
            EmbeddingProvider::Openai => Arc::new(OpenAiCompatibleModel::connect(&config).await?),
            EmbeddingProvider::Hashing => Arc::new(HashingModel::new(config.dimension)),
        };

        let tokenizer: Arc<dyn TokenBudget> = match &config.tokenizer_path {
            Some(path) => Arc::new(HfTokenizer::from_file(path)?),
            None => {
                info!("no tokenizer_path configured, estimating token counts");
                Arc::new(EstimatedTokenizer)
            }
        };

        let cache: Arc<dyn EmbeddingCache> = match (config.cache, &config.cache_path) {
            (CacheMode::Memory, _) => Arc::new(MemoryCache::new()),
            (CacheMode::Disk, Some(path)) => Arc::new(DiskCache::open(path).await?),
            (CacheMode::Disk, None) => {
                return Err(RuleVaultError::config("disk cache requires cache_path"));
            }
            (CacheMode::None, _) => Arc::new(NoCache),
        };

        Ok(Self::new(config, model, tokenizer, cache))
    }

    pub fn new(
        config: EmbeddingConfig,
        model: Arc<dyn EmbeddingModel>,
        tokenizer: Arc<dyn TokenBudget>,
        cache: Arc<dyn EmbeddingCache>,
    ) -> Self {
        Self {
            config,
            model,
            tokenizer,
            cache,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    pub fn cache(&self) -> &Arc<dyn EmbeddingCache> {
        &self.cache
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.name().to_string(),
            dimension: self.model.dimension(),
            max_sequence_length: self.config.max_sequence_length,
            provider: self.model.provider().to_string(),
        }
    }

    /// Embed chunks in batches, reusing cached vectors by chunk id.
    ///
    /// A chunk id seen twice in one call is encoded once.
    pub async fn embed(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddingRecord>> {
        self.embed_batches(chunks, |_, _| {}).await
    }

    /// [`Embedder::embed`], calling `on_batch(embedded, total)` after every
    /// batch. Deduplication spans the whole call, not a single batch.
    #[instrument(skip_all, fields(chunks = chunks.len(), model = %self.model.name()))]
    pub async fn embed_batches<F>(
        &self,
        chunks: Vec<Chunk>,
        mut on_batch: F,
    ) -> Result<Vec<EmbeddingRecord>>
    where
        F: FnMut(usize, usize) + Send,
    {
        let model_name = self.model.name().to_string();
        let use_cache = self.cache.is_enabled();
        let total = chunks.len();
        let mut computed: HashMap<String, Vec<f32>> = HashMap::new();
        let mut records = Vec::with_capacity(total);
        let mut cache_hits = 0usize;

        let batch_size = self.config.batch_size.max(1);
        let mut chunks = chunks.into_iter().peekable();
        let mut batch_no = 0usize;

        while chunks.peek().is_some() {
            let batch: Vec<Chunk> = chunks.by_ref().take(batch_size).collect();
            batch_no += 1;

            let mut slots: Vec<(Chunk, String, Option<Vec<f32>>)> = Vec::with_capacity(batch.len());
            let mut pending_ids: Vec<String> = Vec::new();
            let mut pending_inputs: Vec<String> = Vec::new();

            for chunk in batch {
                let id = chunk_id(&chunk);
                let known = match computed.get(&id) {
                    Some(v) => Some(v.clone()),
                    None if use_cache => self.cache.get(&id, &model_name).await?,
                    None => None,
                };
                if known.is_some() {
                    cache_hits += 1;
                } else if !pending_ids.contains(&id) {
                    pending_inputs.push(self.truncate(&prepare_input(&chunk))?);
                    pending_ids.push(id.clone());
                }
                slots.push((chunk, id, known));
            }

            if !pending_inputs.is_empty() {
                let vectors = self.model.encode(&pending_inputs).await?;
                if vectors.len() != pending_inputs.len() {
                    return Err(RuleVaultError::Embedding(format!(
                        "model returned {} vectors for {} inputs",
                        vectors.len(),
                        pending_inputs.len()
                    )));
                }
                for (id, mut vector) in pending_ids.into_iter().zip(vectors) {
                    if self.config.normalize {
                        normalize(&mut vector);
                    }
                    if use_cache {
                        self.cache.put(&id, &model_name, &vector).await?;
                    }
                    computed.insert(id, vector);
                }
            }

            for (chunk, id, known) in slots {
                let vector = match known {
                    Some(v) => v,
                    None => computed.get(&id).cloned().ok_or_else(|| {
                        RuleVaultError::Embedding(format!("no vector produced for chunk {id}"))
                    })?,
                };
                records.push(EmbeddingRecord {
                    chunk,
                    vector,
                    id,
                    model_name: model_name.clone(),
                });
            }
            debug!(batch = batch_no, embedded = records.len(), "embedded batch");
            on_batch(records.len(), total);
        }

        info!(
            records = records.len(),
            computed = computed.len(),
            cache_hits,
            "generated embeddings"
        );
        Ok(records)
    }

    /// Embed a query, optionally biased by content type and game system.
    pub async fn embed_query(&self, query: &str, context: Option<&QueryContext>) -> Result<Vec<f32>> {
        let input = match context {
            Some(ctx) => ctx.apply(query),
            None => query.to_string(),
        };
        let input = self.truncate(&input)?;
        let mut vector = self
            .model
            .encode(std::slice::from_ref(&input))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RuleVaultError::Embedding("model returned no vector".into()))?;
        if self.config.normalize {
            normalize(&mut vector);
        }
        Ok(vector)
    }

    fn truncate(&self, text: &str) -> Result<String> {
        let budget = self
            .config
            .max_sequence_length
            .saturating_sub(TRUNCATION_MARGIN)
            .max(1);
        let tokens = self.tokenizer.count(text)?;
        if tokens <= budget {
            return Ok(text.to_string());
        }
        debug!(tokens, budget, "truncating embedding input");
        self.tokenizer.truncate(text, budget)
    }
}

/// Stable content id: the first 16 hex chars of SHA-256 over
/// `"{type}:{text}[:{page}[:{book}]]"`.
pub fn chunk_id(chunk: &Chunk) -> String {
    let mut key = format!("{}:{}", chunk.chunk_type.as_str(), chunk.text);
    if let Some(page) = chunk.page_number() {
        key.push_str(&format!(":{page}"));
        if let Some(book) = chunk.source_book() {
            key.push(':');
            key.push_str(book);
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

/// Model input for a chunk: type tag, specific name, source book, text.
pub fn prepare_input(chunk: &Chunk) -> String {
    let meta_str = |key: &str| chunk.metadata.get(key).and_then(Value::as_str);

    let mut parts = vec![format!("[{}]", chunk.chunk_type.as_str().to_uppercase())];
    let specific = match chunk.chunk_type {
        ContentType::Spell => meta_str("spell_name").map(|n| format!("Spell: {n}")),
        ContentType::Feat => meta_str("feat_name").map(|n| format!("Feat: {n}")),
        ContentType::Table => meta_str("table_type").map(|t| format!("Table: {t}")),
        _ => None,
    };
    parts.extend(specific);
    if let Some(book) = chunk.source_book().or_else(|| meta_str("source_book")) {
        parts.push(format!("Source: {book}"));
    }
    parts.push(chunk.text.clone());
    parts.join(" ")
}

/// Scale to unit length. Zero vectors are left as they are.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}
