
use tracing::{debug, info};

use super::{RecommendationEngine, Snapshot};
use crate::catalog::{ItemRecord, RecordHash, dedup_last_wins};
use crate::database::{MetadataStore, VectorIndex};
use crate::Result;

/// Texts embedded per round; progress is reported between rounds.
const EMBED_ROUND_SIZE: usize = 256;

/// Outcome of an ingest or rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Distinct records considered.
    pub total: usize,
    pub added: usize,
    pub updated: usize,
    /// Already indexed with the same content hash.
    pub unchanged: usize,
    /// Too little text to embed.
    pub skipped: usize,
}

impl IngestStats {
    /// Records whose vectors were (re)computed.
    #[inline]
    pub fn embedded(&self) -> usize {
        self.added + self.updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Incremental,
    Rebuild,
}

struct Pending {
    record: ItemRecord,
    hash: RecordHash,
    text: String,
}

impl RecommendationEngine {
    /// Add new records and refresh changed ones.
    ///
    /// Records whose content hash matches the indexed copy are not embedded
    /// again. The new snapshot is only published once every vector has been
    /// computed, so a failure leaves the current one in place.
    #[inline]
    pub async fn ingest(&self, records: Vec<ItemRecord>) -> Result<IngestStats> {
        self.apply(records, Mode::Incremental, &|_| {}).await
    }

    /// [`Self::ingest`], calling `progress` with the number of records handled
    /// since the previous call. The reports add up to `records.len()`.
    #[inline]
    pub async fn ingest_with_progress(
        &self,
        records: Vec<ItemRecord>,
        progress: &(dyn Fn(usize) + Sync),
    ) -> Result<IngestStats> {
        self.apply(records, Mode::Incremental, progress).await
    }

    /// Replace the whole snapshot with one built from `records`.
    #[inline]
    pub async fn rebuild(&self, records: Vec<ItemRecord>) -> Result<IngestStats> {
        self.apply(records, Mode::Rebuild, &|_| {}).await
    }

    #[inline]
    pub async fn rebuild_with_progress(
        &self,
        records: Vec<ItemRecord>,
        progress: &(dyn Fn(usize) + Sync),
    ) -> Result<IngestStats> {
        self.apply(records, Mode::Rebuild, progress).await
    }

    async fn apply(
        &self,
        records: Vec<ItemRecord>,
        mode: Mode,
        progress: &(dyn Fn(usize) + Sync),
    ) -> Result<IngestStats> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot();

        let (mut index, mut store) = match mode {
            Mode::Incremental => (current.index.clone(), current.store.clone()),
            Mode::Rebuild => (
                VectorIndex::with_dimension(self.embedder.dimension()),
                MetadataStore::new(),
            ),
        };

        let received = records.len();
        let records = dedup_last_wins(records);
        let mut stats = IngestStats {
            total: records.len(),
            ..IngestStats::default()
        };

        let mut pending = Vec::new();
        for record in records {
            let hash = record.content_hash();
            if store.content_hash(&record.id) == Some(&hash) && index.contains(&record.id) {
                stats.unchanged += 1;
                continue;
            }

            let text = self.features.build(&record);
            if !self.features.is_sufficient(&text) {
                debug!(
                    "Skipping {}: only {} characters of feature text",
                    record.id,
                    text.char_len()
                );
                stats.skipped += 1;
                continue;
            }

            pending.push(Pending {
                record,
                hash,
                text: text.into_string(),
            });
        }
        // Superseded duplicates count as handled so reports add up to the input.
        progress(received - stats.total + stats.unchanged + stats.skipped);

        info!(
            "Embedding {} records ({} unchanged, {} skipped)",
            pending.len(),
            stats.unchanged,
            stats.skipped
        );

        for round in pending.chunks(EMBED_ROUND_SIZE) {
            let texts: Vec<String> = round.iter().map(|item| item.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;

            for (item, vector) in round.iter().zip(vectors) {
                index.upsert(item.record.id.clone(), &vector)?;
                if current.store.contains(&item.record.id) {
                    stats.updated += 1;
                } else {
                    stats.added += 1;
                }
                store.insert(item.record.clone(), item.hash.clone());
            }
            progress(round.len());
        }

        if mode == Mode::Incremental && stats.embedded() == 0 {
            debug!("Nothing changed, keeping snapshot {}", current.version);
            return Ok(stats);
        }

        self.publish(Snapshot {
            index,
            store,
            version: current.version + 1,
        });

        info!(
            "Indexed {} records: {} added, {} updated, {} unchanged, {} skipped",
            stats.total, stats.added, stats.updated, stats.unchanged, stats.skipped
        );
        Ok(stats)
    }
}
