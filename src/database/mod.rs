//! Storage for the recommendation snapshot: vectors in a [`VectorIndex`],
//! item records in a [`MetadataStore`]. Both are saved side by side in one
//! directory.

pub mod index;
pub mod metadata;

pub use index::persist::{IndexManifest, index_exists};
pub use index::{SearchHit, VectorIndex, compare_scores, cosine_similarity};
pub use metadata::MetadataStore;
