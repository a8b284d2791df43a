// Feature text construction
// Turns a catalog record into the text blob that gets embedded


use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::ItemRecord;

/// Blobs at or below this many characters carry too little signal to embed.
pub const DEFAULT_MIN_FEATURE_LENGTH: usize = 30;

/// Normalized text derived from an item record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureText(String);

impl FeatureText {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Length in characters, not bytes.
    #[inline]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for FeatureText {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Records whose feature text is not longer than this are not indexed.
    pub min_length: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_FEATURE_LENGTH,
        }
    }
}

/// Deterministic record → text conversion.
///
/// Segments are emitted in a fixed order, each cleaned of surrounding and
/// repeated whitespace, and joined with single spaces. A missing field
/// contributes nothing.
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    #[inline]
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn build(&self, record: &ItemRecord) -> FeatureText {
        let mut parts: Vec<String> = Vec::with_capacity(7);

        if let Some(title) = cleaned(record.title.as_deref()) {
            parts.push(format!("Title: {}.", title));
        }
        if let Some(overview) = cleaned(record.overview.as_deref()) {
            parts.push(overview);
        }
        if let Some(genres) = cleaned_list(&record.genres) {
            parts.push(format!("Genres: {}.", genres));
        }
        if let Some(cast) = cleaned_list(&record.cast) {
            parts.push(format!("Top Cast: {}.", cast));
        }
        if let Some(director) = cleaned(record.director.as_deref()) {
            parts.push(format!("Directed by {}.", director));
        }
        if let Some(year) = record.year() {
            parts.push(format!("Released {}.", year));
        }
        if let Some(rating) = record.rating.filter(|r| r.is_finite()) {
            parts.push(format!("Rated {:.1}/10.", rating));
        }

        FeatureText(parts.join(" "))
    }

    /// Whether the text carries enough information to be worth embedding.
    #[inline]
    pub fn is_sufficient(&self, text: &FeatureText) -> bool {
        text.char_len() > self.config.min_length
    }
}

/// Trim and collapse runs of whitespace to a single space.
#[inline]
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cleaned(value: Option<&str>) -> Option<String> {
    value.map(clean_text).filter(|text| !text.is_empty())
}

fn cleaned_list(values: &[String]) -> Option<String> {
    let items: Vec<String> = values
        .iter()
        .map(|value| clean_text(value))
        .filter(|value| !value.is_empty())
        .collect();
    (!items.is_empty()).then(|| items.join(", "))
}
