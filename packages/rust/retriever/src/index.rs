//! Vector index abstraction and the in-process implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use rulevault_shared::{EmbeddingRecord, Metadata, Result, RuleVaultError};

use crate::filter::SearchFilter;

/// Stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub text: String,
    pub chunk_type: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub source_book: Option<String>,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub page_number: Option<u32>,
}

impl PointPayload {
    pub fn from_record(record: &EmbeddingRecord) -> Self {
        let chunk = &record.chunk;
        Self {
            text: chunk.text.clone(),
            chunk_type: chunk.chunk_type.as_str().to_string(),
            metadata: chunk.metadata.clone(),
            source_book: chunk.source_book().map(str::to_string),
            source_version: chunk.source_version().map(str::to_string),
            page_number: chunk.page_number(),
        }
    }
}

/// A vector with a fresh random identity, distinct from the cache id.
#[derive(Debug, Clone)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl IndexedPoint {
    pub fn from_record(record: &EmbeddingRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector: record.vector.clone(),
            payload: PointPayload::from_record(record),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub filter: Option<SearchFilter>,
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub status: String,
    pub points_count: u64,
    pub indexed_vectors_count: u64,
    pub dimension: usize,
    pub distance: String,
}

/// Collection-partitioned nearest-neighbor store using cosine similarity.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn upsert(&self, name: &str, points: Vec<IndexedPoint>) -> Result<()>;

    /// Hits ordered by descending score.
    async fn search(&self, name: &str, request: SearchRequest) -> Result<Vec<ScoredPoint>>;

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo>;
}

// ---------------------------------------------------------------------------
// In-memory index
// ---------------------------------------------------------------------------

struct MemoryCollection {
    dimension: usize,
    points: Vec<IndexedPoint>,
    /// Position of each point id in `points`.
    positions: HashMap<Uuid, usize>,
}

/// Brute-force cosine index held in process memory.
#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(name: &str) -> RuleVaultError {
    RuleVaultError::IndexUnavailable(format!("collection '{name}' not found"))
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        self.collections.write().await.insert(
            name.to_string(),
            MemoryCollection {
                dimension,
                points: Vec::new(),
                positions: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<IndexedPoint>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != collection.dimension) {
            return Err(RuleVaultError::validation(format!(
                "vector dimension {} does not match collection dimension {}",
                bad.vector.len(),
                collection.dimension
            )));
        }

        for point in points {
            match collection.positions.get(&point.id) {
                Some(&at) => collection.points[at] = point,
                None => {
                    collection.positions.insert(point.id, collection.points.len());
                    collection.points.push(point);
                }
            }
        }
        Ok(())
    }

    async fn search(&self, name: &str, request: SearchRequest) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;

        let mut hits: Vec<ScoredPoint> = Vec::new();
        for point in &collection.points {
            if let Some(filter) = &request.filter {
                let doc = serde_json::to_value(&point.payload)
                    .map_err(|e| RuleVaultError::parse(format!("payload: {e}")))?;
                if !filter.matches(&doc) {
                    continue;
                }
            }
            let score = cosine(&request.vector, &point.vector);
            if request.score_threshold.is_some_and(|t| score < t) {
                continue;
            }
            hits.push(ScoredPoint {
                id: point.id.to_string(),
                score,
                payload: point.payload.clone(),
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        let count = collection.points.len() as u64;
        Ok(CollectionInfo {
            status: "green".into(),
            points_count: count,
            indexed_vectors_count: count,
            dimension: collection.dimension,
            distance: "Cosine".into(),
        })
    }
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SearchFilter;
    use rulevault_shared::ContentType;

    fn point(text: &str, chunk_type: &str, vector: Vec<f32>) -> IndexedPoint {
        IndexedPoint {
            id: Uuid::new_v4(),
            vector,
            payload: PointPayload {
                text: text.into(),
                chunk_type: chunk_type.into(),
                metadata: Metadata::new(),
                source_book: Some("PHB".into()),
                source_version: None,
                page_number: Some(1),
            },
        }
    }

    #[tokio::test]
    async fn search_ranks_by_cosine() {
        let index = MemoryIndex::new();
        index.create_collection("c", 2).await.unwrap();
        index
            .upsert(
                "c",
                vec![
                    point("east", "text", vec![1.0, 0.0]),
                    point("north", "text", vec![0.0, 1.0]),
                    point("northeast", "spell", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search(
                "c",
                SearchRequest {
                    vector: vec![1.0, 0.1],
                    limit: 2,
                    filter: None,
                    score_threshold: None,
                },
            )
            .await
            .unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.payload.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "northeast"]);
    }

    #[tokio::test]
    async fn search_applies_filter_and_threshold() {
        let index = MemoryIndex::new();
        index.create_collection("c", 2).await.unwrap();
        index
            .upsert(
                "c",
                vec![
                    point("east", "text", vec![1.0, 0.0]),
                    point("northeast", "spell", vec![1.0, 1.0]),
                    point("west", "spell", vec![-1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search(
                "c",
                SearchRequest {
                    vector: vec![1.0, 0.0],
                    limit: 10,
                    filter: SearchFilter::from_parts(None, &[ContentType::Spell]),
                    score_threshold: Some(0.5),
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.text, "northeast");
    }

    #[tokio::test]
    async fn rejects_wrong_dimension_and_missing_collection() {
        let index = MemoryIndex::new();
        assert!(index.upsert("nope", vec![]).await.is_err());

        index.create_collection("c", 3).await.unwrap();
        let err = index
            .upsert("c", vec![point("x", "text", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RuleVaultError::Validation { .. }));
    }

    #[tokio::test]
    async fn upsert_replaces_points_with_the_same_id() {
        let index = MemoryIndex::new();
        index.create_collection("c", 2).await.unwrap();

        let original = point("old text", "text", vec![1.0, 0.0]);
        let mut replacement = point("new text", "text", vec![0.0, 1.0]);
        replacement.id = original.id;
        index
            .upsert("c", vec![original, point("other", "text", vec![1.0, 1.0])])
            .await
            .unwrap();
        index.upsert("c", vec![replacement]).await.unwrap();

        assert_eq!(index.collection_info("c").await.unwrap().points_count, 2);
        let hits = index
            .search(
                "c",
                SearchRequest {
                    vector: vec![0.0, 1.0],
                    limit: 1,
                    filter: None,
                    score_threshold: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0].payload.text, "new text");
    }

    #[tokio::test]
    async fn info_counts_points() {
        let index = MemoryIndex::new();
        index.create_collection("c", 2).await.unwrap();
        index.upsert("c", vec![point("a", "text", vec![1.0, 0.0])]).await.unwrap();
        let info = index.collection_info("c").await.unwrap();
        assert_eq!(info.points_count, 1);
        assert_eq!(info.dimension, 2);

        index.delete_collection("c").await.unwrap();
        assert!(!index.collection_exists("c").await.unwrap());
    }
}
