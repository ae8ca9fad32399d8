//! Embedding model backends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use rulevault_shared::{EmbeddingConfig, Result, RuleVaultError};

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier, also used to key cached vectors.
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Short provider label for diagnostics.
    fn provider(&self) -> &str;

    /// Encode every input, returning one vector per input in order.
    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP model
// ---------------------------------------------------------------------------

const RETRY_BASE_MS: u64 = 250;

/// Client for any server exposing an OpenAI-style `POST /embeddings`.
pub struct OpenAiCompatibleModel {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: u32,
}

impl OpenAiCompatibleModel {
    /// Build the client and probe the endpoint once.
    ///
    /// Any failure here, including a dimension mismatch on the probe
    /// response, is an [`RuleVaultError::EmbeddingModel`].
    pub async fn connect(config: &EmbeddingConfig) -> Result<Self> {
        let model = Self::new(config)?;
        model
            .encode(&["connection probe".to_string()])
            .await
            .map_err(|e| {
                RuleVaultError::EmbeddingModel(format!(
                    "{} at {}: {e}",
                    model.model, model.endpoint
                ))
            })?;
        info!(model = %model.model, endpoint = %model.endpoint, "embedding model ready");
        Ok(model)
    }

    /// Build the client without contacting the server.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.model_name.trim().is_empty() {
            return Err(RuleVaultError::EmbeddingModel("missing model name".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref() {
            let auth = HeaderValue::from_str(&format!("Bearer {}", key.trim()))
                .map_err(|_| RuleVaultError::EmbeddingModel("invalid API key".into()))?;
            headers.insert(AUTHORIZATION, auth);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                RuleVaultError::EmbeddingModel(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model_name.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
        })
    }

    async fn request_once(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, Attempt> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect() || e.is_request();
                Attempt::failed(retryable, format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Attempt::failed(
                should_retry(status),
                format!("HTTP {status}: {body}"),
            ));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Attempt::failed(false, format!("invalid response: {e}")))?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != inputs.len() {
            return Err(Attempt::failed(
                false,
                format!(
                    "server returned {} embeddings for {} inputs",
                    parsed.data.len(),
                    inputs.len()
                ),
            ));
        }
        if let Some(bad) = parsed.data.iter().find(|d| d.embedding.len() != self.dimension) {
            return Err(Attempt::failed(
                false,
                format!(
                    "expected dimension {}, got {}",
                    self.dimension,
                    bad.embedding.len()
                ),
            ));
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider(&self) -> &str {
        "openai"
    }

    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0u32;
        loop {
            match self.request_once(inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_backoff(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %failure.message, "retrying embedding request");
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(RuleVaultError::Embedding(failure.message)),
            }
        }
    }
}

struct Attempt {
    retryable: bool,
    message: String,
}

impl Attempt {
    fn failed(retryable: bool, message: String) -> Self {
        Self { retryable, message }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: u32) -> Duration {
    let capped = attempt.min(5);
    Duration::from_millis(RETRY_BASE_MS * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

// ---------------------------------------------------------------------------
// Offline hashing model
// ---------------------------------------------------------------------------

/// Deterministic feature-hashing model over word unigrams and bigrams.
///
/// Needs no network or model files; texts sharing vocabulary land near
/// each other, which is enough for tests and air-gapped ingestion.
pub struct HashingModel {
    name: String,
    dimension: usize,
}

impl HashingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            name: format!("hashing-{dimension}"),
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        for word in &words {
            self.add_feature(&mut vector, word);
        }
        for pair in words.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]));
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

#[async_trait]
impl EmbeddingModel for HashingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider(&self) -> &str {
        "hashing"
    }

    async fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(inputs = inputs.len(), "hashing embeddings");
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: format!("{}/v1", server.uri()),
            model_name: "test-embed".into(),
            dimension,
            api_key: Some("sk-test".into()),
            max_retries: 2,
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn embeddings_body(vectors: &[Vec<f32>]) -> serde_json::Value {
        let data: Vec<_> = vectors
            .iter()
            .enumerate()
            .rev()
            .map(|(i, v)| serde_json::json!({ "index": i, "embedding": v }))
            .collect();
        serde_json::json!({ "data": data })
    }

    #[tokio::test]
    async fn encodes_batch_in_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({ "model": "test-embed" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(embeddings_body(&[vec![1.0, 0.0], vec![0.0, 1.0]])),
            )
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new(&config_for(&server, 2)).unwrap();
        let vectors = model
            .encode(&["first".to_string(), "second".to_string()])
            .await
            .expect("encode");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_body(&[vec![0.5; 3]])))
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new(&config_for(&server, 3)).unwrap();
        let vectors = model.encode(&["retry me".to_string()]).await.expect("encode");
        assert_eq!(vectors, vec![vec![0.5; 3]]);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new(&config_for(&server, 3)).unwrap();
        let err = model.encode(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, RuleVaultError::Embedding(_)));
        assert!(err.to_string().contains("bad input"));
    }

    #[tokio::test]
    async fn connect_rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_body(&[vec![0.1; 8]])))
            .mount(&server)
            .await;

        let err = OpenAiCompatibleModel::connect(&config_for(&server, 384))
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, RuleVaultError::EmbeddingModel(_)));
        assert!(err.to_string().contains("dimension"));
    }

    #[tokio::test]
    async fn hashing_is_deterministic() {
        let model = HashingModel::new(64);
        let inputs = vec!["Fireball deals fire damage".to_string(), String::new()];
        let a = model.encode(&inputs).await.unwrap();
        let b = model.encode(&inputs).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        assert!(a[0].iter().any(|v| *v != 0.0));
        assert!(a[1].iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn hashing_separates_different_text() {
        let model = HashingModel::new(64);
        let out = model
            .encode(&["[SPELL] fireball".to_string(), "[FEAT] grappler".to_string()])
            .await
            .unwrap();
        assert_ne!(out[0], out[1]);
    }
}
