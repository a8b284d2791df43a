//! On-disk layout of a [`VectorIndex`].
//!
//! - `vectors.bin`: N×D little-endian `f32`, row-major by slot
//! - `ids.json`: ids in slot order
//! - `index.json`: [`IndexManifest`]
//!
//! Every file is written to a temporary sibling first, and renames only start
//! once all of them are written.


use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::VectorIndex;
use crate::catalog::ItemId;
use crate::{CinebrainError, Result};

pub const FORMAT_VERSION: u32 = 1;
pub const VECTORS_FILE: &str = "vectors.bin";
pub const IDS_FILE: &str = "ids.json";
pub const MANIFEST_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub dimension: usize,
    pub count: usize,
    /// Embedding model the vectors came from.
    pub model: String,
    pub built_at: DateTime<Utc>,
}

/// Whether `dir` holds a saved index.
#[inline]
pub fn index_exists(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file()
}

impl VectorIndex {
    /// Write the index into `dir`, creating it if needed.
    #[inline]
    pub fn save(&self, dir: &Path, model: &str) -> Result<IndexManifest> {
        let mut staging = Staging::new(dir)?;
        let manifest = self.stage(&mut staging, model)?;
        staging.commit()?;

        info!(
            "Saved vector index ({} entries, {} dimensions) to {}",
            manifest.count,
            manifest.dimension,
            dir.display()
        );
        Ok(manifest)
    }

    /// Write the index files as temporaries; they land on [`Staging::commit`].
    pub(crate) fn stage(&self, staging: &mut Staging, model: &str) -> Result<IndexManifest> {
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            dimension: self.dimension.unwrap_or(0),
            count: self.len(),
            model: model.to_string(),
            built_at: Utc::now(),
        };

        let mut blob = Vec::with_capacity(self.raw_vectors().len() * 4);
        for value in self.raw_vectors() {
            blob.extend_from_slice(&value.to_le_bytes());
        }

        staging.stage(VECTORS_FILE, &blob)?;
        staging.stage(IDS_FILE, &to_json(&self.ids)?)?;
        staging.stage(MANIFEST_FILE, &to_json(&manifest)?)?;
        Ok(manifest)
    }

    /// Read an index saved by [`VectorIndex::save`].
    ///
    /// Any structural problem is reported as `CorruptIndex`; nothing is
    /// returned unless every file agrees with the manifest.
    #[inline]
    pub fn load(dir: &Path) -> Result<(Self, IndexManifest)> {
        let manifest: IndexManifest = from_json(&fs::read(dir.join(MANIFEST_FILE))?, MANIFEST_FILE)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            )));
        }
        if manifest.count > 0 && manifest.dimension == 0 {
            return Err(corrupt("zero dimension for a non-empty index"));
        }

        let ids: Vec<ItemId> = from_json(&fs::read(dir.join(IDS_FILE))?, IDS_FILE)?;
        if ids.len() != manifest.count {
            return Err(corrupt(format!(
                "{} lists {} ids, manifest says {}",
                IDS_FILE,
                ids.len(),
                manifest.count
            )));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(duplicate) = ids.iter().find(|id| !seen.insert(*id)) {
            return Err(corrupt(format!("duplicate id {} in {}", duplicate, IDS_FILE)));
        }

        let blob = fs::read(dir.join(VECTORS_FILE))?;
        let expected_len = manifest
            .count
            .checked_mul(manifest.dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("manifest size overflows"))?;
        if blob.len() != expected_len {
            return Err(corrupt(format!(
                "{} is {} bytes, expected {} ({} × {} × 4)",
                VECTORS_FILE,
                blob.len(),
                expected_len,
                manifest.count,
                manifest.dimension
            )));
        }

        let vectors: Vec<f32> = blob
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        if vectors.iter().any(|value| !value.is_finite()) {
            return Err(corrupt(format!("{} contains non-finite values", VECTORS_FILE)));
        }

        debug!(
            "Loaded {} vectors of dimension {} from {}",
            manifest.count,
            manifest.dimension,
            dir.display()
        );

        let index = if manifest.dimension == 0 {
            Self::new()
        } else {
            Self::from_raw_parts(manifest.dimension, vectors, ids)
        };
        Ok((index, manifest))
    }
}

/// A set of files written as `.tmp` siblings and renamed into place together.
///
/// Nothing is renamed until every file has been written. Files are renamed in
/// staging order, and temporaries left by a failed or dropped staging are
/// removed.
pub(crate) struct Staging {
    dir: PathBuf,
    staged: Vec<(PathBuf, PathBuf)>,
}

impl Staging {
    pub(crate) fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            staged: Vec::new(),
        })
    }

    pub(crate) fn stage(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let temporary = self.dir.join(format!("{}.tmp", name));
        fs::write(&temporary, bytes)?;
        self.staged.push((temporary, self.dir.join(name)));
        Ok(())
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        while !self.staged.is_empty() {
            let (temporary, target) = self.staged.remove(0);
            fs::rename(&temporary, &target)?;
        }
        Ok(())
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        for (temporary, _) in &self.staged {
            if let Err(e) = fs::remove_file(temporary) {
                warn!("Could not remove {}: {}", temporary.display(), e);
            }
        }
    }
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| CinebrainError::Other(anyhow::Error::new(e).context("serializing index file")))
}

pub(crate) fn from_json<T: for<'de> Deserialize<'de>>(bytes: &[u8], name: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| corrupt(format!("{} is unreadable: {}", name, e)))
}

fn corrupt(message: impl Into<String>) -> CinebrainError {
    CinebrainError::CorruptIndex(message.into())
}
