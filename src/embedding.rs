//! Embedding service: text to vector with a process-local cache.
//!
//! The [`Embedder`] trait is the seam to the provider; the production
//! implementation speaks the OpenAI-style `POST /embeddings` wire format.
//! [`CachedEmbedder`] wraps any embedder with a TTL + LRU cache keyed by
//! `hash(text) ⊕ model_id` and surfaces the cache-hit bit so search metrics
//! can record it.
//!
//! Provider failures surface as `embedding_failed`; there is no zero-vector
//! fallback.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{GriyaError, Result};

/// Text-to-vector provider seam.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model; persisted in vector-store stats.
    fn model_id(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. The default implementation loops; providers with a
    /// batch endpoint should override.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

// ---------------------------------------------------------------------------
// HTTP embedder (OpenAI-style wire format)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model_id: String,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model_id: model_id.into(),
        }
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model_id,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GriyaError::timeout(format!("embedding provider: {err}"))
                } else {
                    GriyaError::embedding(format!("embedding request failed: {err}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GriyaError::rate_limited("embedding provider"));
        }
        if !status.is_success() {
            return Err(GriyaError::embedding(format!(
                "embedding provider returned {status}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::embedding(format!("embedding response invalid: {err}")))?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        if data.len() != inputs.len() {
            return Err(GriyaError::embedding(format!(
                "embedding provider returned {} vectors for {} inputs",
                data.len(),
                inputs.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = [text.to_string()];
        let mut vectors = self.request(&inputs).await?;
        vectors
            .pop()
            .ok_or_else(|| GriyaError::embedding("embedding provider returned no vector"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

struct CacheSlot {
    vector: Vec<f32>,
    inserted: Instant,
    last_used: u64,
}

struct CacheState {
    slots: HashMap<u64, CacheSlot>,
    tick: u64,
}

/// TTL + LRU cache around an embedder.
///
/// Within the TTL, identical `(text, model_id)` pairs return the
/// bit-identical stored vector.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            inner,
            ttl: Duration::from_secs(config.cache_ttl_s),
            max_entries: config.cache_max.max(1),
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn cache_key(&self, text: &str) -> u64 {
        let mut hasher = ahash::AHasher::default();
        self.inner.model_id().hash(&mut hasher);
        text.hash(&mut hasher);
        hasher.finish()
    }

    fn lookup(&self, key: u64) -> Option<Vec<f32>> {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        let expired = match state.slots.get_mut(&key) {
            Some(slot) if slot.inserted.elapsed() <= self.ttl => {
                slot.last_used = tick;
                return Some(slot.vector.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.slots.remove(&key);
        }
        None
    }

    fn store(&self, key: u64, vector: Vec<f32>) {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        if state.slots.len() >= self.max_entries && !state.slots.contains_key(&key) {
            // Evict the least-recently-used slot.
            if let Some(lru_key) = state
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| *k)
            {
                state.slots.remove(&lru_key);
            }
        }
        state.slots.insert(
            key,
            CacheSlot {
                vector,
                inserted: Instant::now(),
                last_used: tick,
            },
        );
    }

    /// Embed with caching. The boolean is true on a cache hit.
    ///
    /// Rate-limited providers are retried a bounded number of times with
    /// jittered backoff before the error surfaces.
    pub async fn embed(&self, text: &str) -> Result<(Vec<f32>, bool)> {
        let key = self.cache_key(text);
        if let Some(vector) = self.lookup(key) {
            return Ok((vector, true));
        }

        const MAX_ATTEMPTS: usize = 3;
        let mut attempt = 0;
        let vector = loop {
            attempt += 1;
            match self.inner.embed(text).await {
                Ok(vector) => break vector,
                Err(err @ GriyaError::RateLimited(_)) if attempt < MAX_ATTEMPTS => {
                    let jitter_ms = {
                        use rand::Rng;
                        rand::rng().random_range(100..400) * attempt as u64
                    };
                    log::warn!("embedding rate limited (attempt {attempt}), retrying: {err}");
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                }
                Err(err) => return Err(err),
            }
        };

        self.store(key, vector.clone());
        Ok((vector, false))
    }

    pub fn cache_len(&self) -> usize {
        self.state.lock().slots.len()
    }
}
