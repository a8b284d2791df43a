
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ItemId, ItemRecord, RecordHash};
use crate::database::index::persist::{Staging, from_json, to_json};
use crate::{CinebrainError, Result};

pub const RECORDS_FILE: &str = "records.json";

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Arc<ItemRecord>,
    hash: RecordHash,
}

#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    hash: RecordHash,
    record: ItemRecord,
}

/// Item records keyed by id, each with the content hash it was ingested at.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    records: BTreeMap<ItemId, StoredRecord>,
}

impl MetadataStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn resolve(&self, id: &ItemId) -> Result<Arc<ItemRecord>> {
        self.records
            .get(id)
            .map(|stored| Arc::clone(&stored.record))
            .ok_or_else(|| CinebrainError::NotFound(id.clone()))
    }

    #[inline]
    pub fn ids(&self) -> BTreeSet<ItemId> {
        self.records.keys().cloned().collect()
    }

    /// Insert or replace the record stored under its id.
    #[inline]
    pub fn insert(&mut self, record: ItemRecord, hash: RecordHash) {
        self.records.insert(
            record.id.clone(),
            StoredRecord {
                record: Arc::new(record),
                hash,
            },
        );
    }

    #[inline]
    pub fn content_hash(&self, id: &ItemId) -> Option<&RecordHash> {
        self.records.get(id).map(|stored| &stored.hash)
    }

    #[inline]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.records.contains_key(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in id order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &Arc<ItemRecord>)> {
        self.records.iter().map(|(id, stored)| (id, &stored.record))
    }

    #[inline]
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut staging = Staging::new(dir)?;
        self.stage(&mut staging)?;
        staging.commit()?;
        debug!("Saved {} records to {}", self.len(), dir.display());
        Ok(())
    }

    pub(crate) fn stage(&self, staging: &mut Staging) -> Result<()> {
        let persisted: Vec<PersistedRecord> = self
            .records
            .values()
            .map(|stored| PersistedRecord {
                hash: stored.hash.clone(),
                record: ItemRecord::clone(&stored.record),
            })
            .collect();
        staging.stage(RECORDS_FILE, &to_json(&persisted)?)
    }

    #[inline]
    pub fn load(dir: &Path) -> Result<Self> {
        let persisted: Vec<PersistedRecord> =
            from_json(&fs::read(dir.join(RECORDS_FILE))?, RECORDS_FILE)?;

        let mut store = Self::new();
        for entry in persisted {
            if store.contains(&entry.record.id) {
                return Err(CinebrainError::CorruptIndex(format!(
                    "duplicate record {} in {}",
                    entry.record.id, RECORDS_FILE
                )));
            }
            store.insert(entry.record, entry.hash);
        }
        debug!("Loaded {} records from {}", store.len(), dir.display());
        Ok(store)
    }
}
