
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheStats, ContentHash, DEFAULT_CACHE_CAPACITY, EmbeddingCache};
use super::ollama::{OllamaClient, RetryPolicy};
use super::EmbeddingProvider;
use crate::config::Config;
use crate::{CinebrainError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Maximum number of cached vectors.
    pub cache_capacity: usize,
    /// Batches in flight at once while building.
    pub workers: usize,
    /// Upper bound on the query embedding call.
    pub request_timeout_secs: u64,
    /// Upper bound on each batch call while building.
    pub batch_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            workers: 4,
            request_timeout_secs: 5,
            batch_timeout_secs: 60,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// Batching, caching front for an [`EmbeddingProvider`].
///
/// Every vector handed out has been checked against the provider's declared
/// dimension. Results always come back in input order, even though batches
/// run concurrently.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<EmbeddingCache>,
    batch_size: usize,
    workers: usize,
    request_timeout: Duration,
    batch_timeout: Duration,
}

impl EmbeddingService {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let batch_size = provider.max_batch_size().max(1);
        Self {
            provider,
            cache: Mutex::new(EmbeddingCache::new(config.cache_capacity)),
            batch_size,
            workers: config.workers.max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
        }
    }

    /// Service backed by the Ollama instance described in `config`.
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = OllamaClient::new(&config.ollama)?
            .with_retry_policy(RetryPolicy::from_config(&config.embedding))
            .with_timeout(Duration::from_secs(config.embedding.batch_timeout_secs));
        info!(
            "Using Ollama model {} ({} dimensions)",
            client.model(),
            client.dimension()
        );
        Ok(Self::new(Arc::new(client), &config.embedding))
    }

    /// Cap batches below the provider's own limit.
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, self.provider.max_batch_size().max(1));
        self
    }

    #[inline]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    #[inline]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    #[inline]
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    #[inline]
    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    /// Embed many texts, consulting the cache first.
    ///
    /// Repeated texts within one call are sent to the provider once.
    #[inline]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Arc<[f32]>>> {
        self.embed_with_timeout(texts, self.batch_timeout).await
    }

    /// Embed a single query, bounded by the request timeout and `cancel`.
    #[inline]
    pub async fn embed_query(&self, text: &str, cancel: &CancellationToken) -> Result<Arc<[f32]>> {
        if cancel.is_cancelled() {
            return Err(CinebrainError::Cancelled);
        }

        let texts = [text.to_string()];
        let vectors = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CinebrainError::Cancelled),
            result = self.embed_with_timeout(&texts, self.request_timeout) => result?,
        };

        vectors.into_iter().next().ok_or_else(|| {
            CinebrainError::InvalidResponse("Provider returned no vector for the query".to_string())
        })
    }

    async fn embed_with_timeout(
        &self,
        texts: &[String],
        timeout: Duration,
    ) -> Result<Vec<Arc<[f32]>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<ContentHash> = texts.iter().map(|text| ContentHash::of(text)).collect();
        let mut resolved: HashMap<ContentHash, Arc<[f32]>> = HashMap::with_capacity(keys.len());
        let mut pending: Vec<(ContentHash, String)> = Vec::new();

        {
            let mut cache = self.lock_cache();
            let mut queued: HashSet<ContentHash> = HashSet::new();
            for (key, text) in keys.iter().zip(texts) {
                if resolved.contains_key(key) || queued.contains(key) {
                    continue;
                }
                match cache.get(key) {
                    Some(vector) => {
                        resolved.insert(*key, vector);
                    }
                    None => {
                        queued.insert(*key);
                        pending.push((*key, text.clone()));
                    }
                }
            }
        }

        debug!(
            "Embedding {} texts: {} cached, {} to fetch",
            texts.len(),
            resolved.len(),
            pending.len()
        );

        if !pending.is_empty() {
            let batches: Vec<Vec<(ContentHash, String)>> = pending
                .chunks(self.batch_size)
                .map(<[_]>::to_vec)
                .collect();

            let fetched: Vec<Vec<(ContentHash, Arc<[f32]>)>> = stream::iter(batches)
                .map(|batch| self.embed_batch(batch, timeout))
                .buffered(self.workers)
                .try_collect()
                .await?;

            let mut cache = self.lock_cache();
            for (key, vector) in fetched.into_iter().flatten() {
                cache.insert(key, Arc::clone(&vector));
                resolved.insert(key, vector);
            }
        }

        keys.iter()
            .map(|key| {
                resolved.get(key).cloned().ok_or_else(|| {
                    CinebrainError::InvalidResponse(format!("No vector produced for text {}", key))
                })
            })
            .collect()
    }

    async fn embed_batch(
        &self,
        batch: Vec<(ContentHash, String)>,
        timeout: Duration,
    ) -> Result<Vec<(ContentHash, Arc<[f32]>)>> {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();

        let vectors = tokio::time::timeout(timeout, self.provider.embed(&texts))
            .await
            .map_err(|_| {
                warn!(
                    "Embedding provider {} timed out after {:?}",
                    self.provider.name(),
                    timeout
                );
                CinebrainError::ProviderUnavailable(format!(
                    "{} did not answer within {:?}",
                    self.provider.name(),
                    timeout
                ))
            })??;

        if vectors.len() != texts.len() {
            return Err(CinebrainError::InvalidResponse(format!(
                "Requested {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }

        let expected = self.provider.dimension();
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(CinebrainError::InvalidResponse(format!(
                "{} returned a {}-dimensional vector, expected {}",
                self.provider.name(),
                bad.len(),
                expected
            )));
        }
        if vectors
            .iter()
            .any(|vector| vector.iter().any(|value| !value.is_finite()))
        {
            return Err(CinebrainError::InvalidResponse(format!(
                "{} returned a vector with non-finite values",
                self.provider.name()
            )));
        }

        Ok(batch
            .into_iter()
            .zip(vectors)
            .map(|((key, _), vector)| (key, Arc::from(vector)))
            .collect())
    }

    fn lock_cache(&self) -> MutexGuard<'_, EmbeddingCache> {
        // Cache contents stay valid even if a holder panicked mid-update.
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EmbeddingService {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.provider.name())
            .field("dimension", &self.provider.dimension())
            .field("batch_size", &self.batch_size)
            .field("workers", &self.workers)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
