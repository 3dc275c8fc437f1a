use thiserror::Error;

use crate::{codec::CodecError, store::StoreError};

#[derive(Debug, Error)]
pub enum CacheError {
    /// The stored payload could not be decoded. Readers treat this as a miss.
    #[error("cached payload for `{key}` is corrupt: {source}")]
    Corruption {
        key: String,
        #[source]
        source: CodecError,
    },
    #[error("failed to encode payload for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}
