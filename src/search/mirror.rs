//! Remote mirror of the search index.
//!
//! Key families, all with expiry:
//! - `search:idx:<term>`: sorted set of document ids posted under `term`;
//! - `search:data:<id>`: gzip-compressed document JSON;
//! - `search:meta`: gzip-compressed [`IndexMeta`].

use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    codec,
    store::{KvConnection, StoreError, WriteOp, escape_glob, scan_delete},
};

use super::{IndexSnapshot, SearchDocument};

pub const MIRROR_PATTERN: &str = "search:*";
pub const META_KEY: &str = "search:meta";
const IDX_PREFIX: &str = "search:idx:";
const DATA_PREFIX: &str = "search:data:";
const INDEX_VERSION: &str = "v1";

/// Terms consulted when the exact term has no posting list.
const PREFIX_SCAN_TERMS: usize = 5;
const PREFIX_TERM_IDS: usize = 10;
const EXACT_TERM_IDS: usize = 200;
const SCAN_COUNT: usize = 100;
const WRITE_CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    /// Unix milliseconds.
    pub last_build: i64,
    pub document_count: usize,
    pub brand_count: usize,
    pub version: String,
}

impl IndexMeta {
    pub fn for_snapshot(snapshot: &IndexSnapshot) -> Self {
        let last_build = snapshot
            .built_at_wall()
            .map(|at| (at.unix_timestamp_nanos() / 1_000_000) as i64)
            .unwrap_or_default();
        Self {
            last_build,
            document_count: snapshot.document_count(),
            brand_count: snapshot.brand_count(),
            version: INDEX_VERSION.to_string(),
        }
    }
}

pub fn idx_key(term: &str) -> String {
    format!("{IDX_PREFIX}{term}")
}

pub fn data_key(id: i64) -> String {
    format!("{DATA_PREFIX}{id}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub removed: u64,
    pub written: usize,
}

/// Replace the mirror with `snapshot`. Old keys are deleted first.
pub async fn write_mirror(
    conn: &dyn KvConnection,
    snapshot: &IndexSnapshot,
    ttl: Duration,
    delete_batch: usize,
) -> Result<MirrorReport, StoreError> {
    let removed = scan_delete(conn, MIRROR_PATTERN, delete_batch).await?;

    let mut ops = Vec::new();
    for doc in snapshot.documents() {
        ops.push(WriteOp::Set {
            key: data_key(doc.id),
            value: encode(doc)?,
            ttl,
        });
    }
    for (term, ids) in snapshot.postings() {
        for id in ids {
            ops.push(WriteOp::SortedAdd {
                key: idx_key(term),
                member: id.to_string(),
                ttl,
            });
        }
    }
    ops.push(WriteOp::Set {
        key: META_KEY.to_string(),
        value: encode(&IndexMeta::for_snapshot(snapshot))?,
        ttl,
    });

    let written = ops.len();
    let mut ops = ops.into_iter().peekable();
    while ops.peek().is_some() {
        conn.write_batch(ops.by_ref().take(WRITE_CHUNK).collect())
            .await?;
    }

    Ok(MirrorReport { removed, written })
}

pub async fn clear_mirror(conn: &dyn KvConnection, delete_batch: usize) -> Result<u64, StoreError> {
    scan_delete(conn, MIRROR_PATTERN, delete_batch).await
}

pub async fn read_meta(conn: &dyn KvConnection) -> Result<Option<IndexMeta>, StoreError> {
    let (payload, _) = conn.get_with_ttl(META_KEY).await?;
    Ok(payload.and_then(|bytes| codec::decode_json(&bytes).ok()))
}

/// Candidate documents for a normalized query: the exact term's posting list, or the
/// union of the first few terms that start with the query.
pub async fn search_mirror(
    conn: &dyn KvConnection,
    query: &str,
) -> Result<Vec<SearchDocument>, StoreError> {
    let mut ids = conn.sorted_range(&idx_key(query), EXACT_TERM_IDS).await?;

    if ids.is_empty() {
        let pattern = format!("{IDX_PREFIX}{}*", escape_glob(query));
        let mut terms = conn.scan_match(&pattern, SCAN_COUNT).await?;
        terms.sort();
        terms.truncate(PREFIX_SCAN_TERMS);

        let mut seen = HashSet::new();
        for term in &terms {
            for id in conn.sorted_range(term, PREFIX_TERM_IDS).await? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
    }

    let keys: Vec<String> = ids
        .iter()
        .filter_map(|id| id.parse::<i64>().ok())
        .map(data_key)
        .collect();
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let payloads = conn.get_many(&keys).await?;
    let documents = keys
        .iter()
        .zip(payloads)
        .filter_map(|(key, payload)| {
            let bytes = payload?;
            match codec::decode_json::<SearchDocument>(&bytes) {
                Ok(doc) => Some(doc),
                Err(err) => {
                    debug!(key = %key, error = %err, "skipping undecodable mirrored document");
                    None
                }
            }
        })
        .collect();
    Ok(documents)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    codec::encode_json(value).map_err(|err| StoreError::command("encode", err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{BrandRecord, ModelRecord, ModelStatus},
        store::MemoryConnection,
    };

    fn snapshot() -> IndexSnapshot {
        let brand = BrandRecord {
            id: 1,
            name: "Tata".into(),
            slug: None,
        };
        let models: Vec<_> = [(1, "Nexon"), (2, "Nexon EV"), (3, "Punch")]
            .into_iter()
            .map(|(id, name)| ModelRecord {
                id,
                name: name.into(),
                brand_id: 1,
                slug: None,
                hero_image: None,
                status: ModelStatus::Active,
                is_popular: false,
            })
            .collect();
        IndexSnapshot::build(&[brand], &models)
    }

    #[tokio::test]
    async fn mirror_replaces_previous_keys() {
        let conn = MemoryConnection::new("memory");
        conn.set_ex("search:idx:stale", b"x", Duration::from_secs(60))
            .await
            .unwrap();
        conn.set_ex("cache:v1:brands:x", b"x", Duration::from_secs(60))
            .await
            .unwrap();

        let report = write_mirror(&conn, &snapshot(), Duration::from_secs(3600), 100)
            .await
            .unwrap();
        assert_eq!(report.removed, 1);

        let keys = conn.keys();
        assert!(!keys.contains(&"search:idx:stale".to_string()));
        assert!(keys.contains(&"cache:v1:brands:x".to_string()));
        assert!(keys.contains(&"search:data:2".to_string()));
        assert!(keys.contains(&"search:idx:nexon ev".to_string()));

        let meta = read_meta(&conn).await.unwrap().unwrap();
        assert_eq!(meta.document_count, 3);
        assert_eq!(meta.brand_count, 1);
        assert_eq!(meta.version, "v1");
    }

    #[tokio::test]
    async fn exact_term_lookup() {
        let conn = MemoryConnection::new("memory");
        write_mirror(&conn, &snapshot(), Duration::from_secs(3600), 100)
            .await
            .unwrap();

        let mut ids: Vec<_> = search_mirror(&conn, "nexon")
            .await
            .unwrap()
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        ids.sort();
        assert_eq!(ids, [1, 2]);
        assert!(search_mirror(&conn, "exon").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prefix_scan_when_exact_term_is_missing() {
        let conn = MemoryConnection::new("memory");
        let ttl = Duration::from_secs(60);
        let doc = SearchDocument {
            id: 9,
            name: "Safari".into(),
            brand_name: "Tata".into(),
            brand_slug: "tata".into(),
            model_slug: "safari".into(),
            slug: "tata-safari".into(),
            hero_image: None,
        };
        conn.write_batch(vec![
            WriteOp::Set {
                key: data_key(9),
                value: codec::encode_json(&doc).unwrap(),
                ttl,
            },
            WriteOp::SortedAdd {
                key: idx_key("safari"),
                member: "9".into(),
                ttl,
            },
        ])
        .await
        .unwrap();

        let found = search_mirror(&conn, "saf").await.unwrap();
        assert_eq!(found, vec![doc]);
    }

    #[tokio::test]
    async fn clear_removes_every_mirror_key() {
        let conn = MemoryConnection::new("memory");
        write_mirror(&conn, &snapshot(), Duration::from_secs(3600), 7)
            .await
            .unwrap();
        assert!(clear_mirror(&conn, 7).await.unwrap() > 0);
        assert!(conn.keys().is_empty());
        assert!(read_meta(&conn).await.unwrap().is_none());
    }
}
