//! Qdrant REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use rulevault_shared::{Result, RetrieverConfig, RuleVaultError};

use crate::index::{CollectionInfo, IndexedPoint, PointPayload, ScoredPoint, SearchRequest, VectorIndex};

/// Talks to a Qdrant server over its HTTP API.
pub struct QdrantIndex {
    client: Client,
    base_url: String,
}

impl QdrantIndex {
    pub fn new(config: &RetrieverConfig) -> Result<Self> {
        let base = Url::parse(&config.qdrant_url).map_err(|e| {
            RuleVaultError::config(format!("invalid qdrant_url '{}': {e}", config.qdrant_url))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RuleVaultError::config(format!(
                "qdrant_url must be an http(s) URL, got '{}'",
                config.qdrant_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(key.trim())
                .map_err(|_| RuleVaultError::config("invalid Qdrant API key"))?;
            headers.insert("api-key", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RuleVaultError::IndexUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.qdrant_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{name}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| RuleVaultError::IndexUnavailable(format!("request failed: {e}")))
    }
}

/// Fail on non-2xx, then decode `{"result": ...}`.
async fn read_result<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(RuleVaultError::IndexUnavailable(format!("HTTP {status}: {body}")));
    }
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| RuleVaultError::IndexUnavailable(format!("invalid response: {e}")))?;
    Ok(envelope.result)
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let response = self.send(self.client.get(self.collection_url(name))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => read_result::<Value>(response).await.map(|_| false),
        }
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let body = json!({ "vectors": { "size": dimension, "distance": "Cosine" } });
        let response = self
            .send(self.client.put(self.collection_url(name)).json(&body))
            .await?;
        read_result::<Value>(response).await?;
        debug!(collection = name, dimension, "created collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self.send(self.client.delete(self.collection_url(name))).await?;
        read_result::<Value>(response).await?;
        debug!(collection = name, "deleted collection");
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<IndexedPoint>) -> Result<()> {
        let points: Vec<Value> = points
            .into_iter()
            .map(|p| json!({ "id": p.id.to_string(), "vector": p.vector, "payload": p.payload }))
            .collect();
        let url = format!("{}/points?wait=true", self.collection_url(name));
        let response = self
            .send(self.client.put(url).json(&json!({ "points": points })))
            .await?;
        read_result::<Value>(response).await?;
        Ok(())
    }

    async fn search(&self, name: &str, request: SearchRequest) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": request.vector,
            "limit": request.limit,
            "with_payload": true,
        });
        if let Some(filter) = &request.filter {
            body["filter"] = filter.to_qdrant();
        }
        if let Some(threshold) = request.score_threshold {
            body["score_threshold"] = json!(threshold);
        }

        let url = format!("{}/points/search", self.collection_url(name));
        let response = self.send(self.client.post(url).json(&body)).await?;
        let hits: Vec<RawHit> = read_result(response).await?;

        hits.into_iter()
            .map(|hit| {
                let payload: PointPayload = serde_json::from_value(hit.payload)
                    .map_err(|e| RuleVaultError::parse(format!("point payload: {e}")))?;
                let id = match hit.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(ScoredPoint {
                    id,
                    score: hit.score,
                    payload,
                })
            })
            .collect()
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let response = self.send(self.client.get(self.collection_url(name))).await?;
        let raw: RawCollection = read_result(response).await?;
        let vectors = raw.config.params.vectors;
        Ok(CollectionInfo {
            status: raw.status,
            points_count: raw.points_count.or(raw.vectors_count).unwrap_or(0),
            indexed_vectors_count: raw.indexed_vectors_count.unwrap_or(0),
            dimension: vectors.size,
            distance: vectors.distance,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    vectors_count: Option<u64>,
    #[serde(default)]
    indexed_vectors_count: Option<u64>,
    config: RawCollectionConfig,
}

#[derive(Debug, Deserialize)]
struct RawCollectionConfig {
    params: RawParams,
}

#[derive(Debug, Deserialize)]
struct RawParams {
    vectors: RawVectors,
}

#[derive(Debug, Deserialize)]
struct RawVectors {
    size: usize,
    distance: String,
}
