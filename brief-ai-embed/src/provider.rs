//! Embedding provider trait and the fastembed implementation

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector and
    /// defaults to 0 when there are no embeddings.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// A provider is a long-lived resource: it is created once at process start
/// (see [`crate::resolve_provider`]) and shared behind an `Arc`. Output must be
/// deterministic for a given model version, and every vector must have
/// exactly [`embedding_dimension`](Self::embedding_dimension) elements.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    /// Generate embeddings for multiple texts, preserving input order
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Identifier of the model configuration; vectors with different ids are not comparable
    fn model_id(&self) -> String;
}

/// Build a model identifier in the form `provider:model:dimension:norm|raw`
pub fn model_id(provider: &str, model: &str, dimension: usize, normalized: bool) -> String {
    let normalized_part = if normalized { "norm" } else { "raw" };
    format!("{provider}:{model}:{dimension}:{normalized_part}")
}

/// Scale a vector to unit length in place; zero vectors are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

// A panic while holding a model lock does not leave the model itself in a bad state
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map a configured model name onto a built-in fastembed model
fn builtin_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok(EmbeddingModel::AllMiniLML6V2)
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            Ok(EmbeddingModel::AllMiniLML12V2)
        }
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" | "BAAI/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
            Ok(EmbeddingModel::NomicEmbedTextV15)
        }
        other => Err(EmbedError::invalid_config(format!(
            "unsupported fastembed model: {other}"
        ))),
    }
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`initialize`](Self::initialize) before use.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 384, // all-MiniLM-L6-v2
        }
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Loads the embedding model, reusing an already loaded one when the configuration matches.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );

        let cache_key = self.create_cache_key()?;

        let cached_data = {
            let cache = lock_ignoring_poison(get_model_cache());
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((cached_model, cached_dimension)) = cached_data {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return self.validate_model().await;
        }

        let builtin = builtin_model(self.config.model_name())?;
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let init_options = InitOptions::new(builtin)
                    .with_cache_dir(config.cache_dir.clone())
                    .with_show_download_progress(config.show_download_progress);

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::ModelInitialization { source: e.into() })?;

                // Get dimension by generating a test embedding
                let test_embeddings = model
                    .embed(vec!["test".to_string()], None)
                    .map_err(|e| EmbedError::ModelInitialization { source: e.into() })?;
                let dimension = test_embeddings
                    .first()
                    .map(|emb| emb.len())
                    .ok_or_else(|| {
                        EmbedError::invalid_config("model produced no embedding for probe text")
                    })?;

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        {
            let mut cache = lock_ignoring_poison(get_model_cache());
            cache.insert(cache_key, (Arc::clone(&model_arc), dimension));
        }

        self.model = Some(model_arc);
        self.dimension = dimension;

        self.validate_model().await
    }

    /// Create a cache key based on the model configuration
    fn create_cache_key(&self) -> Result<String> {
        let config_json = serde_json::to_string(&self.config)
            .map_err(|e| EmbedError::invalid_config(format!("unserializable config: {e}")))?;

        // Hash with FNV for deterministic, fast hashing
        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EmbedError::invalid_config("Model not initialized"))?;

        let model_clone = Arc::clone(model);
        let validation_result = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut model_guard = lock_ignoring_poison(&model_clone);
            model_guard
                .embed(vec!["validation test".to_string()], None)
                .map_err(|e| EmbedError::EmbeddingGeneration { source: e.into() })
        })
        .await??;

        let embedding = validation_result
            .first()
            .ok_or_else(|| EmbedError::invalid_config("Model validation failed: no embeddings"))?;

        if embedding.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name());
        Ok(())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        lock_ignoring_poison(get_model_cache()).clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        lock_ignoring_poison(get_model_cache()).len()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let batch = batch.to_vec();
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", batch.len());
                let mut model_guard = lock_ignoring_poison(&model_clone);
                model_guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::EmbeddingGeneration { source: e.into() })
            })
            .await??;

            for mut embedding in batch_embeddings {
                if self.config.normalize {
                    l2_normalize(&mut embedding);
                }
                all_embeddings.push(embedding);
            }
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> String {
        model_id(
            self.provider_name(),
            self.config.model_name(),
            self.dimension,
            self.config.normalize,
        )
    }
}
