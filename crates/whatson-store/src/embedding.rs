use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Turns one search utterance into the vector the store's nearest-neighbor
/// index was built against. The pipeline embeds a single query per turn;
/// bulk ingestion embedding happens upstream of this crate.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

/// Query embedder backed by an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    base_url: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, "text-embedding-3-small", 1536)
    }

    pub fn with_model(
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct QueryEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct QueryEmbeddingResponse {
    data: Vec<QueryEmbeddingRow>,
}

#[derive(Deserialize)]
struct QueryEmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            bail!("refusing to embed a blank query");
        }

        let endpoint = format!("{}/embeddings", self.base_url);
        let payload = QueryEmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let parsed: QueryEmbeddingResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| anyhow!("embeddings response carried no vector"))?;

        if vector.len() != self.dimensions {
            bail!(
                "query embedding has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            );
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic query embedder for tests and offline runs: the vector is a
/// pure function of the query text, so equal queries always land on the same
/// point in the index.
#[derive(Clone)]
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let seed = Sha256::digest(text.as_bytes());
        Ok((0..self.dims)
            .map(|index| {
                let mut hasher = Sha256::new();
                hasher.update(seed);
                hasher.update((index as u64).to_be_bytes());
                let digest = hasher.finalize();
                let bits = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
                bits as f32 / u32::MAX as f32 * 2.0 - 1.0
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
