//! Injectable embedding caches.
//!
//! Entries are keyed by `(chunk_id, model)`. A cache store shared by
//! concurrent pipeline runs gives no cross-run consistency; callers that
//! share one are responsible for coordinating writes.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use rulevault_shared::Result;
use rulevault_storage::Storage;

#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get(&self, chunk_id: &str, model: &str) -> Result<Option<Vec<f32>>>;

    async fn put(&self, chunk_id: &str, model: &str, vector: &[f32]) -> Result<()>;

    async fn len(&self) -> Result<usize>;

    /// `false` for caches that never store anything.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Process-lifetime map.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<(String, String), Vec<f32>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingCache for MemoryCache {
    async fn get(&self, chunk_id: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(chunk_id.to_string(), model.to_string()))
            .cloned())
    }

    async fn put(&self, chunk_id: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert((chunk_id.to_string(), model.to_string()), vector.to_vec());
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}

/// Caching disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl EmbeddingCache for NoCache {
    async fn get(&self, _chunk_id: &str, _model: &str) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }

    async fn put(&self, _chunk_id: &str, _model: &str, _vector: &[f32]) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(0)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Vectors persisted in the rulevault libSQL database.
pub struct DiskCache {
    storage: Storage,
}

impl DiskCache {
    pub async fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            storage: Storage::open(path).await?,
        })
    }
}

#[async_trait]
impl EmbeddingCache for DiskCache {
    async fn get(&self, chunk_id: &str, model: &str) -> Result<Option<Vec<f32>>> {
        self.storage.get_embedding(chunk_id, model).await
    }

    async fn put(&self, chunk_id: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.storage.put_embedding(chunk_id, model, vector).await
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.storage.count_embeddings(None).await? as usize)
    }
}
