// Consistency validation between the vector index and the metadata store


use tracing::{info, warn};

use crate::catalog::ItemId;
use crate::database::{MetadataStore, VectorIndex};

/// Result of cross-checking a [`VectorIndex`] against a [`MetadataStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of vectors in the index
    pub indexed_vectors: usize,
    /// Number of records in the metadata store
    pub stored_records: usize,
    /// Records that have no vector
    pub missing_vectors: Vec<ItemId>,
    /// Vectors that have no record
    pub orphaned_vectors: Vec<ItemId>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    /// Compare the id sets of `index` and `store`.
    #[inline]
    pub fn check(index: &VectorIndex, store: &MetadataStore) -> Self {
        let missing_vectors: Vec<ItemId> = store
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !index.contains(id))
            .cloned()
            .collect();

        let mut orphaned_vectors: Vec<ItemId> = index
            .ids()
            .iter()
            .filter(|id| !store.contains(id))
            .cloned()
            .collect();
        orphaned_vectors.sort();

        let report = Self {
            indexed_vectors: index.len(),
            stored_records: store.len(),
            is_consistent: missing_vectors.is_empty() && orphaned_vectors.is_empty(),
            missing_vectors,
            orphaned_vectors,
        };

        if report.is_consistent {
            info!("Index and metadata are consistent");
        } else {
            warn!(
                "Found {} records without vectors and {} vectors without records",
                report.missing_vectors.len(),
                report.orphaned_vectors.len()
            );
        }
        report
    }

    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} vectors, {} records",
                self.indexed_vectors, self.stored_records
            )
        } else {
            format!(
                "Index inconsistencies found: {} records without vectors, {} orphaned vectors",
                self.missing_vectors.len(),
                self.orphaned_vectors.len()
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_vectors.len() + self.orphaned_vectors.len()
    }
}
