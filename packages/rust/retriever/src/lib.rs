//! Vector storage and retrieval for embedded rulebook chunks.
//!
//! One collection per game system, named `{prefix}_{system}`. The
//! [`Retriever`] indexes [`EmbeddingRecord`]s through a [`VectorIndex`]
//! backend and answers filtered, reranked similarity queries.

pub mod filter;
pub mod index;
pub mod qdrant;
pub mod rerank;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use rulevault_embedder::{Embedder, QueryContext};
use rulevault_shared::{
    ContentType, EmbeddingRecord, IndexBackend, Metadata, Result, RetrieverConfig, SearchResult,
};

pub use filter::{Condition, SearchFilter};
pub use index::{
    CollectionInfo, IndexedPoint, MemoryIndex, PointPayload, ScoredPoint, SearchRequest,
    VectorIndex,
};
pub use qdrant::QdrantIndex;
pub use rerank::rerank;

/// Upsert batches between progress log lines.
const LOG_EVERY_BATCHES: usize = 5;

/// Vector parameters of a collection.
#[derive(Debug, Clone, Serialize)]
pub struct VectorParams {
    pub dimension: usize,
    pub distance: String,
}

/// Diagnostic snapshot of a collection. Failures are reported as a value.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CollectionStats {
    Available {
        collection_name: String,
        vector_count: u64,
        indexed_count: u64,
        status: String,
        config: VectorParams,
    },
    Unavailable {
        collection_name: String,
        error: String,
    },
}

impl CollectionStats {
    pub fn collection_name(&self) -> &str {
        match self {
            Self::Available { collection_name, .. } | Self::Unavailable { collection_name, .. } => {
                collection_name
            }
        }
    }
}

pub struct Retriever {
    config: RetrieverConfig,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<Embedder>,
}

impl Retriever {
    /// Connect the configured backend.
    pub fn from_config(config: RetrieverConfig, embedder: Arc<Embedder>) -> Result<Self> {
        let index: Arc<dyn VectorIndex> = match config.backend {
            IndexBackend::Qdrant => Arc::new(QdrantIndex::new(&config)?),
            IndexBackend::Memory => Arc::new(MemoryIndex::new()),
        };
        Ok(Self::new(config, index, embedder))
    }

    pub fn new(config: RetrieverConfig, index: Arc<dyn VectorIndex>, embedder: Arc<Embedder>) -> Self {
        Self {
            config,
            index,
            embedder,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn collection_name(&self, game_system: &str) -> String {
        format!("{}_{}", self.config.collection_prefix, game_system.to_lowercase())
    }

    /// Ensure the system's collection exists, dropping it first when
    /// `recreate` is set. Dimension comes from the embedder.
    pub async fn create_collection(&self, game_system: &str, recreate: bool) -> Result<String> {
        let name = self.collection_name(game_system);
        let exists = self.index.collection_exists(&name).await?;

        if exists && !recreate {
            debug!(collection = %name, "collection already exists");
            return Ok(name);
        }
        if exists {
            info!(collection = %name, "recreating collection");
            self.index.delete_collection(&name).await?;
        }

        let dimension = self.embedder.dimension();
        self.index.create_collection(&name, dimension).await?;
        info!(collection = %name, dimension, "created collection");
        Ok(name)
    }

    /// Upsert records in batches. Any failed batch aborts the call.
    #[instrument(skip_all, fields(records = records.len(), system = %game_system))]
    pub async fn index(&self, records: &[EmbeddingRecord], game_system: &str) -> Result<usize> {
        let name = self.create_collection(game_system, false).await?;
        let batch_size = self.config.upsert_batch_size.max(1);

        let mut indexed = 0usize;
        for (batch_no, batch) in records.chunks(batch_size).enumerate() {
            let points: Vec<IndexedPoint> = batch.iter().map(IndexedPoint::from_record).collect();
            self.index.upsert(&name, points).await?;
            indexed += batch.len();

            if (batch_no + 1) % LOG_EVERY_BATCHES == 0 {
                debug!(collection = %name, indexed, total = records.len(), "indexing progress");
            }
        }

        info!(collection = %name, indexed, "indexed embeddings");
        Ok(indexed)
    }

    /// Filtered similarity search, empty when the system was never indexed.
    #[instrument(skip_all, fields(system = %game_system))]
    pub async fn search(
        &self,
        query: &str,
        game_system: &str,
        limit: Option<usize>,
        filters: Option<&Metadata>,
        content_types: &[ContentType],
    ) -> Result<Vec<SearchResult>> {
        let name = self.collection_name(game_system);
        if !self.index.collection_exists(&name).await? {
            warn!(collection = %name, "collection does not exist");
            return Ok(Vec::new());
        }

        let context = QueryContext::for_system(game_system);
        let vector = self.embedder.embed_query(query, Some(&context)).await?;

        let request = SearchRequest {
            vector,
            limit: limit.unwrap_or(self.config.search_limit),
            filter: SearchFilter::from_parts(filters, content_types),
            score_threshold: Some(self.config.score_threshold),
        };
        let hits = self.index.search(&name, request).await?;
        let mut results: Vec<SearchResult> = hits.into_iter().map(to_search_result).collect();

        if self.config.use_reranking && results.len() > 1 {
            results = rerank(query, results);
        }

        info!(collection = %name, results = results.len(), "search complete");
        Ok(results)
    }

    /// Nearest neighbours of an arbitrary text. With `exclude_self`, hits
    /// whose text equals the reference are skipped.
    pub async fn search_similar(
        &self,
        reference_text: &str,
        game_system: &str,
        limit: Option<usize>,
        exclude_self: bool,
    ) -> Result<Vec<SearchResult>> {
        let name = self.collection_name(game_system);
        if !self.index.collection_exists(&name).await? {
            warn!(collection = %name, "collection does not exist");
            return Ok(Vec::new());
        }

        let limit = limit.unwrap_or(self.config.search_limit);
        let vector = self.embedder.embed_query(reference_text, None).await?;
        let request = SearchRequest {
            vector,
            limit: limit + usize::from(exclude_self),
            filter: None,
            score_threshold: Some(self.config.score_threshold),
        };

        let results = self
            .index
            .search(&name, request)
            .await?
            .into_iter()
            .filter(|hit| !(exclude_self && hit.payload.text == reference_text))
            .take(limit)
            .map(to_search_result)
            .collect();
        Ok(results)
    }

    /// Stats for the system's collection; errors come back as
    /// [`CollectionStats::Unavailable`].
    pub async fn collection_stats(&self, game_system: &str) -> CollectionStats {
        let collection_name = self.collection_name(game_system);
        match self.index.collection_info(&collection_name).await {
            Ok(info) => CollectionStats::Available {
                collection_name,
                vector_count: info.points_count,
                indexed_count: info.indexed_vectors_count,
                status: info.status,
                config: VectorParams {
                    dimension: info.dimension,
                    distance: info.distance,
                },
            },
            Err(e) => CollectionStats::Unavailable {
                collection_name,
                error: e.to_string(),
            },
        }
    }
}

fn to_search_result(hit: ScoredPoint) -> SearchResult {
    let source_reference = source_reference(&hit.payload);
    let PointPayload {
        text,
        mut metadata,
        source_book,
        source_version,
        page_number,
        ..
    } = hit.payload;

    // Citations read book and page from the result metadata.
    if let Some(book) = source_book {
        metadata.entry("source_book").or_insert(Value::from(book));
    }
    if let Some(version) = source_version {
        metadata.entry("source_version").or_insert(Value::from(version));
    }
    if let Some(page) = page_number {
        metadata.entry("page_number").or_insert(Value::from(page));
    }

    SearchResult {
        text,
        score: hit.score,
        metadata,
        source_reference,
    }
}

/// `"{book} - p. {page} - ({table_type} table)"`, or `({chunk_type})` for
/// non-table chunks. Absent parts are skipped.
pub fn source_reference(payload: &PointPayload) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(book) = payload.source_book.as_deref().filter(|b| !b.is_empty()) {
        parts.push(book.to_string());
    }
    if let Some(page) = payload.page_number {
        parts.push(format!("p. {page}"));
    }
    match payload.metadata.get("table_type").and_then(Value::as_str) {
        Some(table_type) => parts.push(format!("({table_type} table)")),
        None if !payload.chunk_type.is_empty() => parts.push(format!("({})", payload.chunk_type)),
        None => {}
    }

    if parts.is_empty() {
        "Unknown Source".to_string()
    } else {
        parts.join(" - ")
    }
}
