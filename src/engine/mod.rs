// Recommendation engine
// Owns the published (index, metadata) snapshot, answers queries against it
// and serializes every mutation through a single writer.

#[cfg(test)]
mod tests;

pub mod consistency;
pub mod filter;
mod ingest;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{ItemId, ItemRecord};
use crate::config::Config;
use crate::database::index::persist::Staging;
use crate::database::{IndexManifest, MetadataStore, VectorIndex};
use crate::embeddings::{CacheStats, EmbeddingService};
use crate::features::FeatureBuilder;
use crate::{CinebrainError, Phase, Result};

pub use consistency::ConsistencyReport;
pub use filter::ItemFilter;
pub use ingest::IngestStats;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecommendConfig {
    /// Results returned when the caller does not ask for a count.
    pub default_k: usize,
    /// Candidates fetched per requested result before filtering.
    pub oversample_factor: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            oversample_factor: 3,
        }
    }
}

/// Decides whether a candidate may appear in the results.
pub trait ItemPredicate: Send + Sync {
    fn matches(&self, record: &ItemRecord) -> bool;
}

impl<F> ItemPredicate for F
where
    F: Fn(&ItemRecord) -> bool + Send + Sync,
{
    #[inline]
    fn matches(&self, record: &ItemRecord) -> bool {
        self(record)
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub id: ItemId,
    /// Cosine similarity to the query, in [-1, 1].
    pub score: f64,
    /// 1-based position in the result list.
    pub rank: usize,
    pub record: Arc<ItemRecord>,
}

/// Results of one query, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub recommendations: Vec<Recommendation>,
    /// Over-fetch rounds the query needed.
    pub rounds: usize,
    /// Snapshot version the query ran against.
    pub snapshot_version: u64,
}

impl QueryResult {
    #[inline]
    pub fn len(&self) -> usize {
        self.recommendations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Recommendation> {
        self.recommendations.iter()
    }

    #[inline]
    pub fn ids(&self) -> Vec<&ItemId> {
        self.recommendations.iter().map(|rec| &rec.id).collect()
    }
}

impl IntoIterator for QueryResult {
    type Item = Recommendation;
    type IntoIter = std::vec::IntoIter<Recommendation>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.recommendations.into_iter()
    }
}

/// Immutable pair of index and metadata that queries run against.
#[derive(Debug, Default)]
pub struct Snapshot {
    index: VectorIndex,
    store: MetadataStore,
    version: u64,
}

impl Snapshot {
    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Incremented on every published mutation.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub items: usize,
    pub dimension: Option<usize>,
    pub version: u64,
    pub provider: String,
    pub model: String,
    pub cache: CacheStats,
}

#[derive(Debug)]
pub struct RecommendationEngine {
    embedder: EmbeddingService,
    features: FeatureBuilder,
    config: RecommendConfig,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl RecommendationEngine {
    /// Engine with an empty snapshot.
    #[inline]
    pub fn new(embedder: EmbeddingService, features: FeatureBuilder, config: RecommendConfig) -> Self {
        Self::with_snapshot(embedder, features, config, Snapshot::default())
    }

    /// Engine backed by Ollama, configured from `config`.
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            EmbeddingService::from_config(config)?,
            FeatureBuilder::new(config.features.clone()),
            config.recommend.clone(),
        ))
    }

    fn with_snapshot(
        embedder: EmbeddingService,
        features: FeatureBuilder,
        config: RecommendConfig,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            embedder,
            features,
            config,
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// Load a snapshot saved with [`RecommendationEngine::save`].
    ///
    /// The index and the records must describe exactly the same ids.
    #[inline]
    pub fn open(
        dir: &Path,
        embedder: EmbeddingService,
        features: FeatureBuilder,
        config: RecommendConfig,
    ) -> Result<Self> {
        let (index, manifest) = VectorIndex::load(dir)?;
        let store = MetadataStore::load(dir)?;

        let indexed: BTreeSet<ItemId> = index.ids().iter().cloned().collect();
        let stored = store.ids();
        if indexed != stored {
            return Err(CinebrainError::CorruptIndex(format!(
                "index holds {} ids and metadata {} records, {} differ",
                indexed.len(),
                stored.len(),
                indexed.symmetric_difference(&stored).count()
            )));
        }

        if manifest.model != embedder.model() {
            warn!(
                "Index was built with model {} but the provider uses {}",
                manifest.model,
                embedder.model()
            );
        }
        if let Some(dimension) = index.dimension() {
            if dimension != embedder.dimension() {
                warn!(
                    "Index dimension {} differs from provider dimension {}; rebuild before querying",
                    dimension,
                    embedder.dimension()
                );
            }
        }

        info!(
            "Opened index with {} items built {}",
            manifest.count, manifest.built_at
        );
        Ok(Self::with_snapshot(
            embedder,
            features,
            config,
            Snapshot {
                index,
                store,
                version: 0,
            },
        ))
    }

    /// Persist the current snapshot into `dir`.
    #[inline]
    pub async fn save(&self, dir: &Path) -> Result<IndexManifest> {
        let _writer = self.writer.lock().await;
        let snapshot = self.snapshot();

        // Records go last so their rename marks the pair as complete.
        let mut staging = Staging::new(dir)?;
        let manifest = snapshot.index.stage(&mut staging, self.embedder.model())?;
        snapshot.store.stage(&mut staging)?;
        staging.commit()?;

        info!(
            "Saved snapshot version {} ({} items) to {}",
            snapshot.version,
            manifest.count,
            dir.display()
        );
        Ok(manifest)
    }

    /// The currently published snapshot.
    #[inline]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, snapshot: Snapshot) {
        debug!("Publishing snapshot version {}", snapshot.version);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    #[inline]
    pub fn config(&self) -> &RecommendConfig {
        &self.config
    }

    #[inline]
    pub fn embedder(&self) -> &EmbeddingService {
        &self.embedder
    }

    #[inline]
    pub fn resolve(&self, id: &ItemId) -> Result<Arc<ItemRecord>> {
        self.snapshot().store.resolve(id)
    }

    #[inline]
    pub fn stats(&self) -> EngineStats {
        let snapshot = self.snapshot();
        EngineStats {
            items: snapshot.index.len(),
            dimension: snapshot.index.dimension(),
            version: snapshot.version,
            provider: self.embedder.provider_name().to_string(),
            model: self.embedder.model().to_string(),
            cache: self.embedder.cache_stats(),
        }
    }

    #[inline]
    pub fn consistency_report(&self) -> ConsistencyReport {
        let snapshot = self.snapshot();
        ConsistencyReport::check(&snapshot.index, &snapshot.store)
    }

    /// The `k` items most similar to `query`, optionally filtered.
    #[inline]
    pub async fn recommend(
        &self,
        query: &str,
        k: usize,
        filter: Option<&dyn ItemPredicate>,
    ) -> Result<QueryResult> {
        self.recommend_with_cancel(query, k, filter, &CancellationToken::new())
            .await
    }

    /// Like [`Self::recommend`], aborting with `Cancelled` once `cancel` fires.
    ///
    /// Candidates are over-fetched by the oversample factor so that a filter
    /// can discard some without shortening the result. When too few survive,
    /// the fetch grows until the whole index has been considered.
    #[inline]
    pub async fn recommend_with_cancel(
        &self,
        query: &str,
        k: usize,
        filter: Option<&dyn ItemPredicate>,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        if k == 0 {
            return Err(CinebrainError::InvalidQuery(
                "at least one result must be requested".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(CinebrainError::InvalidQuery(
                "query text is empty".to_string(),
            ));
        }

        let snapshot = self.snapshot();
        if snapshot.index.is_empty() {
            return Err(CinebrainError::EmptyIndex);
        }

        let vector = self
            .embedder
            .embed_query(query, cancel)
            .await
            .map_err(|e| match e {
                CinebrainError::Cancelled => e,
                other => CinebrainError::during(Phase::Embedding, other),
            })?;

        let total = snapshot.index.len();
        let growth = self.config.oversample_factor.max(2);
        let mut fetch = k
            .saturating_mul(self.config.oversample_factor.max(1))
            .min(total);
        let mut rounds = 0;

        let selected = loop {
            rounds += 1;
            let hits = snapshot
                .index
                .search_cancellable(&vector, fetch, cancel)
                .map_err(|e| match e {
                    CinebrainError::DimensionMismatch { .. } => {
                        CinebrainError::during(Phase::Search, e)
                    }
                    other => other,
                })?;

            let mut survivors = Vec::with_capacity(k);
            for hit in hits {
                let record = snapshot.store.resolve(&hit.id).map_err(|_| {
                    CinebrainError::InternalInconsistency(format!(
                        "{} is indexed but has no metadata",
                        hit.id
                    ))
                })?;
                if filter.is_none_or(|predicate| predicate.matches(&record)) {
                    survivors.push((hit, record));
                }
            }

            if survivors.len() >= k || fetch >= total {
                survivors.truncate(k);
                break survivors;
            }

            debug!(
                "Only {} of {} wanted results survived filtering {} candidates, widening",
                survivors.len(),
                k,
                fetch
            );
            fetch = fetch.saturating_mul(growth).min(total);
        };

        debug!(
            "Query returned {} results after {} round(s)",
            selected.len(),
            rounds
        );

        Ok(QueryResult {
            recommendations: selected
                .into_iter()
                .enumerate()
                .map(|(position, (hit, record))| Recommendation {
                    id: hit.id,
                    score: hit.score,
                    rank: position + 1,
                    record,
                })
                .collect(),
            rounds,
            snapshot_version: snapshot.version,
        })
    }

    /// Engine over an index and store that were never reconciled.
    #[cfg(test)]
    pub(crate) fn from_parts_unchecked(
        embedder: EmbeddingService,
        index: VectorIndex,
        store: MetadataStore,
    ) -> Self {
        Self::with_snapshot(
            embedder,
            FeatureBuilder::default(),
            RecommendConfig::default(),
            Snapshot {
                index,
                store,
                version: 0,
            },
        )
    }
}
