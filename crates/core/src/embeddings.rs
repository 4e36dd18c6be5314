use crate::error::{status_is_transient, SchemeError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// A provider that maps text into a fixed-dimension vector space. The same
/// provider must embed both stored chunks and incoming queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SchemeError>;
}

/// Local hashing embedder over character trigrams. Deterministic and
/// offline, useful as a default and in tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SchemeError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Connection settings for an OpenAI-compatible `/embeddings` endpoint.
/// Built once at startup and never changed afterwards.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub timeout: Duration,
}

pub struct HttpEmbedder {
    client: Client,
    url: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, SchemeError> {
        if config.dimensions == 0 {
            return Err(SchemeError::validation("embedding dimensions must be positive"));
        }
        if config.model.trim().is_empty() {
            return Err(SchemeError::validation("embedding model must be set"));
        }

        let base = config.endpoint.trim_end_matches('/');
        let url = Url::parse(&format!("{base}/embeddings")).map_err(|error| {
            SchemeError::validation(format!("invalid embedding endpoint '{}': {error}", config.endpoint))
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| SchemeError::embedding(error.to_string(), false))?;

        Ok(Self {
            client,
            url,
            model: config.model,
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SchemeError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .json(&json!({ "model": self.model, "input": texts }));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| SchemeError::embedding(error.to_string(), true))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchemeError::embedding(
                format!("{} returned {status}: {body}", self.url),
                status_is_transient(status),
            ));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| SchemeError::embedding(format!("malformed response: {error}"), false))?;

        Ok(order_by_index(parsed.data))
    }
}

fn order_by_index(mut items: Vec<EmbeddingItem>) -> Vec<Vec<f32>> {
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    items.into_iter().map(|item| item.embedding).collect()
}

/// Validating, retrying front for an [`Embedder`]; used for both chunk
/// vectors at ingestion and query vectors at retrieval.
#[derive(Clone)]
pub struct EmbeddingClient {
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    batch_size: usize,
    concurrency: usize,
}

impl EmbeddingClient {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            retry: RetryPolicy::default(),
            batch_size: 16,
            concurrency: 5,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, SchemeError> {
        if text.trim().is_empty() {
            return Err(SchemeError::validation("cannot embed empty text"));
        }

        let batch = [text.to_string()];
        self.embed_checked(&batch)
            .await?
            .pop()
            .ok_or_else(|| SchemeError::embedding("provider returned no vector", false))
    }

    /// Embeds every text with up to `concurrency` batches in flight. The
    /// output order always matches the input order.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SchemeError> {
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(SchemeError::validation("cannot embed empty text"));
        }

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(self.batch_size))
            .map(|batch| self.embed_checked(batch))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    async fn embed_checked(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, SchemeError> {
        let embedder = &self.embedder;
        let vectors = self
            .retry
            .run("embed", move || embedder.embed_batch(batch))
            .await?;

        if vectors.len() != batch.len() {
            return Err(SchemeError::embedding(
                format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                ),
                false,
            ));
        }

        let expected = self.dimensions();
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(SchemeError::embedding(
                format!("vector dimension {} != {expected}", bad.len()),
                false,
            ));
        }

        debug!(inputs = batch.len(), dimensions = expected, "embedded batch");
        Ok(vectors)
    }
}
