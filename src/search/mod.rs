//! Prefix search over the catalog.
//!
//! Built wholesale from a catalog snapshot, held in memory and mirrored to the remote
//! store so cold processes can answer before their first build.

mod config;
mod document;
mod index;
mod mirror;

pub use config::SearchConfig;
pub use document::{SearchDocument, build_documents, normalize_query, rank_matches};
pub use index::{
    BuildOutcome, IndexError, IndexSnapshot, IndexStats, SearchIndex, SearchResults,
    SearchSource,
};
pub use mirror::{IndexMeta, META_KEY, MIRROR_PATTERN, MirrorReport, read_meta};
