//! Embedding provider backed by an OpenAI-compatible `/embeddings` endpoint.
//!
//! Request body: `{"model": "...", "input": ["text", ...]}`.
//! Response body: `{"data": [{"index": 0, "embedding": [..]}, ...]}`.
//! Entries are reordered by `index` so output order always matches input order.

use crate::config::HttpBackendConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, l2_normalize, model_id};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct HttpEmbedProvider {
    config: HttpBackendConfig,
    client: reqwest::Client,
    api_key: Option<String>,
    batch_size: usize,
    normalize: bool,
}

impl HttpEmbedProvider {
    /// Build the client without contacting the endpoint.
    pub fn new(config: HttpBackendConfig, batch_size: usize, normalize: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                EmbedError::invalid_config(format!("environment variable {var} is not set"))
            })?),
            None => None,
        };

        Ok(Self {
            config,
            client,
            api_key,
            batch_size: batch_size.max(1),
            normalize,
        })
    }

    /// Build the client and verify the endpoint answers with vectors of the configured dimension.
    pub async fn create(config: HttpBackendConfig, batch_size: usize, normalize: bool) -> Result<Self> {
        let provider = Self::new(config, batch_size, normalize)?;
        tracing::info!(
            "Probing embedding endpoint {} (model {})",
            provider.config.endpoint,
            provider.config.model
        );
        provider.embed_text("connection check").await?;
        Ok(provider)
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.config.endpoint).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Http {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let body = response.bytes().await?;
        let parsed: EmbeddingResponse =
            serde_json::from_slice(&body).map_err(EmbedError::embedding_gen)?;
        order_response(parsed, texts.len(), self.config.dimension)
    }
}

/// Validate a decoded response and return its vectors in input order
fn order_response(
    response: EmbeddingResponse,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected_count {
        return Err(EmbedError::http(format!(
            "expected {expected_count} embeddings, endpoint returned {}",
            response.data.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected_count];
    for (position, datum) in response.data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        if datum.embedding.len() != dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: dimension,
                actual: datum.embedding.len(),
            });
        }
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(datum.embedding),
            _ => {
                return Err(EmbedError::http(format!(
                    "endpoint returned invalid or duplicate index {index}"
                )));
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| EmbedError::http("endpoint response is missing an index")))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            tracing::debug!("Requesting {} embeddings from {}", batch.len(), self.config.endpoint);
            for mut embedding in self.request_batch(batch).await? {
                if self.normalize {
                    l2_normalize(&mut embedding);
                }
                all_embeddings.push(embedding);
            }
        }
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "http"
    }

    fn model_id(&self) -> String {
        model_id(
            self.provider_name(),
            &self.config.model,
            self.config.dimension,
            self.normalize,
        )
    }
}
