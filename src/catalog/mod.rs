// Catalog records
// Explicit item schema handed to the core by the ingestion collaborator


use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::Result;

/// Version of the `ItemRecord` layout; bumped whenever a field changes meaning.
pub const SCHEMA_VERSION: u32 = 1;

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

/// Stable item identifier.
///
/// Ordering is by bytes of the string form, which is also the tie-break order
/// for equal similarity scores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for ItemId {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for ItemId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Source catalogs use numeric ids; accept both forms.
impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Number(number) => Self(number.to_string()),
        })
    }
}

/// One catalog item. Only `id` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub genres: Vec<String>,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub cast: Vec<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default, alias = "vote_average")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

/// Content hash of a record, used to skip re-embedding unchanged items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHash(String);

impl RecordHash {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordHash {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.get(..16).unwrap_or(&self.0))
    }
}

impl ItemRecord {
    /// Record with only an identifier set.
    #[inline]
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            overview: None,
            genres: Vec::new(),
            cast: Vec::new(),
            director: None,
            release_date: None,
            year: None,
            rating: None,
            popularity: None,
            runtime: None,
            poster_path: None,
        }
    }

    /// Explicit year, or the first four characters of `release_date`.
    #[inline]
    pub fn year(&self) -> Option<i32> {
        self.year.or_else(|| {
            self.release_date
                .as_deref()
                .and_then(|date| date.get(..4))
                .and_then(|year| year.parse().ok())
        })
    }

    /// BLAKE3 over the canonical JSON form plus the schema version.
    #[inline]
    pub fn content_hash(&self) -> RecordHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&SCHEMA_VERSION.to_le_bytes());
        // Struct serialization is field-ordered, so the bytes are stable.
        match serde_json::to_vec(self) {
            Ok(bytes) => {
                hasher.update(&bytes);
            }
            Err(e) => {
                warn!("Falling back to debug form for hashing {}: {}", self.id, e);
                hasher.update(format!("{:?}", self).as_bytes());
            }
        }
        RecordHash(hasher.finalize().to_hex().to_string())
    }

    /// Runtime formatted like `2h 14m`, or `-` when unknown.
    #[inline]
    pub fn runtime_display(&self) -> String {
        match self.runtime {
            None | Some(0) => "-".to_string(),
            Some(minutes) => {
                let (hours, mins) = (minutes / 60, minutes % 60);
                match (hours, mins) {
                    (0, m) => format!("{}m", m),
                    (h, 0) => format!("{}h", h),
                    (h, m) => format!("{}h {}m", h, m),
                }
            }
        }
    }

    /// Absolute poster URL when the record carries a usable poster path.
    #[inline]
    pub fn poster_url(&self) -> Option<String> {
        let path = self.poster_path.as_deref()?.trim();
        if path.starts_with("http") {
            Some(path.to_string())
        } else if path.starts_with('/') {
            Some(format!("{}{}", POSTER_BASE_URL, path))
        } else {
            None
        }
    }

    /// Title for display, never empty.
    #[inline]
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or("Untitled")
    }
}

/// Load catalog records from a JSON array file or a JSON Lines file.
///
/// Records sharing an identifier are collapsed, keeping the last occurrence
/// in its original position.
#[inline]
pub fn load_catalog(path: &Path) -> Result<Vec<ItemRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    let records = parse_catalog(&content)
        .with_context(|| format!("Failed to parse catalog file: {}", path.display()))?;
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse catalog text in either supported layout.
#[inline]
pub fn parse_catalog(content: &str) -> anyhow::Result<Vec<ItemRecord>> {
    let records: Vec<ItemRecord> = if content.trim_start().starts_with('[') {
        debug!("Parsing catalog as a JSON array");
        serde_json::from_str(content).context("Invalid JSON array of records")?
    } else {
        debug!("Parsing catalog as JSON Lines");
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line)
                    .map_err(|e| anyhow!("Invalid record on line {}: {}", index + 1, e))
            })
            .collect::<anyhow::Result<_>>()?
    };

    Ok(dedup_last_wins(records))
}

pub(crate) fn dedup_last_wins(records: Vec<ItemRecord>) -> Vec<ItemRecord> {
    let mut last_position: HashMap<ItemId, usize> = HashMap::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        if last_position.insert(record.id.clone(), position).is_some() {
            warn!("Duplicate record id {} in catalog, keeping the last one", record.id);
        }
    }

    records
        .into_iter()
        .enumerate()
        .filter(|(position, record)| last_position.get(&record.id) == Some(position))
        .map(|(_, record)| record)
        .collect()
}

// The upstream export stores lists as comma-separated strings.
fn list_or_csv<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawList {
        List(Vec<String>),
        Csv(String),
        Missing(()),
    }

    Ok(match RawList::deserialize(deserializer)? {
        RawList::List(items) => items,
        RawList::Csv(text) => text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect(),
        RawList::Missing(()) => Vec::new(),
    })
}
