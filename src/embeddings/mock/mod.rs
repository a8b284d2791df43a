//! Deterministic, offline embedding provider.
//!
//! Vectors are derived from a BLAKE3 digest of the text, so the same text
//! always produces the same unit vector. Fixed vectors can be registered for
//! specific texts; those are returned verbatim (whatever their dimension),
//! which makes it easy to script exact similarity scenarios or provoke
//! invalid responses.


use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{EmbeddingProvider, EmbeddingVector};
use crate::Result;

#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    fixtures: HashMap<String, EmbeddingVector>,
    calls: AtomicUsize,
    texts_embedded: AtomicUsize,
}

impl MockEmbeddingProvider {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixtures: HashMap::new(),
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
        }
    }

    /// Return `vector` whenever exactly `text` is embedded.
    #[inline]
    pub fn with_vector(mut self, text: impl Into<String>, vector: EmbeddingVector) -> Self {
        self.fixtures.insert(text.into(), vector);
        self
    }

    /// Number of `embed` calls served.
    #[inline]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total number of texts embedded across all calls.
    #[inline]
    pub fn embedded_count(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    fn deterministic_embedding(&self, text: &str) -> EmbeddingVector {
        let mut bytes = vec![0u8; self.dimension * 4];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);

        let mut embedding: EmbeddingVector = bytes
            .chunks_exact(4)
            .map(|chunk| {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);

        Ok(texts
            .iter()
            .map(|text| {
                self.fixtures
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.deterministic_embedding(text))
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock"
    }
}
