// Embeddings module
// Provider abstraction over the external model, plus batching and caching

pub mod cache;
pub mod mock;
pub mod ollama;
pub mod service;

use async_trait::async_trait;

use crate::Result;

pub use cache::{CacheStats, ContentHash, EmbeddingCache};
pub use mock::MockEmbeddingProvider;
pub use ollama::{OllamaClient, RetryPolicy};
pub use service::{EmbeddingConfig, EmbeddingService};

/// An embedding vector as returned by a provider.
pub type EmbeddingVector = Vec<f32>;

/// Converts text into fixed-dimension vectors.
///
/// Implementations return exactly one vector per input, in input order.
/// Outages surface as `ProviderUnavailable`, malformed answers as
/// `InvalidResponse`. Batching, caching and dimension checks live in
/// [`EmbeddingService`], so providers can stay thin.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>>;

    /// Dimension every returned vector must have.
    fn dimension(&self) -> usize;

    /// Provider name for diagnostics and index metadata.
    fn name(&self) -> &str;

    /// Model identifier recorded alongside a saved index.
    fn model(&self) -> &str {
        self.name()
    }

    /// Largest batch the backend accepts in a single call.
    fn max_batch_size(&self) -> usize {
        crate::config::MAX_BATCH_SIZE as usize
    }
}
