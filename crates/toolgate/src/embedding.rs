//! Embedding model catalogue and network providers.
//!
//! Every model the gateway can embed with is listed under
//! `[[embedding.models]]` and addressed by its catalogue id. The id is
//! what corpora record and what collection keys embed, so swapping the
//! provider behind an id must keep the vector space unchanged.
//!
//! | Provider | Endpoint | Notes |
//! |----------|----------|-------|
//! | `stub` | none | Deterministic SHA-256 vectors ([`StubEmbedder`]) |
//! | `openai` | `POST {url}/v1/embeddings` | Needs `OPENAI_API_KEY` at call time |
//! | `ollama` | `POST {url}/api/embed` | Default url `http://localhost:11434` |
//!
//! # Retry Strategy
//!
//! Network providers retry HTTP 429, 5xx, and transport errors with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s). Other 4xx responses
//! fail immediately.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use toolgate_core::embedding::{Embedder, StubEmbedder};
use toolgate_core::error::{GatewayError, GatewayResult};

use crate::config::{EmbeddingConfig, EmbeddingModelConfig, EmbeddingProviderKind};

/// Models addressable by catalogue id.
#[derive(Clone, Default)]
pub struct EmbeddingCatalog {
    models: BTreeMap<String, Arc<dyn Embedder>>,
}

impl EmbeddingCatalog {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut catalog = Self::default();
        for model in &config.models {
            catalog.insert(create_embedder(model)?);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, embedder: Arc<dyn Embedder>) {
        self.models.insert(embedder.model_id().to_string(), embedder);
    }

    pub fn get(&self, model_id: &str) -> GatewayResult<Arc<dyn Embedder>> {
        self.models
            .get(model_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownModel(model_id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

pub fn create_embedder(config: &EmbeddingModelConfig) -> Result<Arc<dyn Embedder>> {
    Ok(match config.provider {
        EmbeddingProviderKind::Stub => Arc::new(StubEmbedder::new(&config.id, config.dims)),
        EmbeddingProviderKind::Openai => Arc::new(OpenAiEmbedder::new(config)?),
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(config)?),
    })
}

// ============ Shared HTTP plumbing ============

struct HttpModel {
    id: String,
    provider_model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    url: String,
    client: reqwest::Client,
}

impl HttpModel {
    fn new(config: &EmbeddingModelConfig, default_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            id: config.id.clone(),
            provider_model: config.provider_model().to_string(),
            dims: config.dims,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    /// POST `body` with retry/backoff, returning the parsed JSON on success.
    async fn post_json(
        &self,
        endpoint: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(format!("{}{}", self.url, endpoint))
                .json(body);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(model = %self.id, %status, attempt, "embedding request retryable");
                        last_err = Some(anyhow!("{} error {}: {}", self.url, status, body_text));
                        continue;
                    }
                    bail!("{} error {}: {}", self.url, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!("connection error ({}): {}", self.url, e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("embedding failed after retries")))
    }

    fn check_dims(&self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dims) {
            bail!(
                "model '{}' declared {} dims but returned {}",
                self.id,
                self.dims,
                v.len()
            );
        }
        Ok(())
    }
}

/// `None` unless `value` is an array of numbers.
fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    http: HttpModel,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingModelConfig) -> Result<Self> {
        Ok(Self {
            http: HttpModel::new(config, "https://api.openai.com")?,
        })
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let vector = item
            .get("embedding")
            .and_then(json_vector)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing or non-numeric embedding"))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.http.id
    }

    fn dims(&self) -> usize {
        self.http.dims
    }

    fn batch_size(&self) -> usize {
        self.http.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.http.provider_model,
            "input": texts,
        });
        let json = self
            .http
            .post_json("/v1/embeddings", Some(&api_key), &body)
            .await?;
        let vectors = parse_openai_response(&json)?;
        if vectors.len() != texts.len() {
            bail!("OpenAI returned {} embeddings for {} inputs", vectors.len(), texts.len());
        }
        self.http.check_dims(&vectors)?;
        Ok(vectors)
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    http: HttpModel,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingModelConfig) -> Result<Self> {
        Ok(Self {
            http: HttpModel::new(config, "http://localhost:11434")?,
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| json_vector(e).ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array of numbers")))
        .collect()
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.http.id
    }

    fn dims(&self) -> usize {
        self.http.dims
    }

    fn batch_size(&self) -> usize {
        self.http.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.http.provider_model,
            "input": texts,
        });
        let json = self.http.post_json("/api/embed", None, &body).await?;
        let vectors = parse_ollama_response(&json)?;
        if vectors.len() != texts.len() {
            bail!("Ollama returned {} embeddings for {} inputs", vectors.len(), texts.len());
        }
        self.http.check_dims(&vectors)?;
        Ok(vectors)
    }
}
