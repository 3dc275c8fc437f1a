//! In-process store used by tests and by local runs without Redis.
//!
//! Expiry follows the tokio clock, so paused-time tests see keys age exactly as
//! `tokio::time::advance` dictates. Availability can be toggled to simulate an outage.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::util::sync::mutex_lock;

use super::{Connector, KeyTtl, KvConnection, StoreError, WriteOp};

const SOURCE: &str = "store::memory";

#[derive(Debug, Clone)]
enum Stored {
    Bytes(Vec<u8>),
    Sorted(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    label: String,
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    delete_calls: AtomicUsize,
}

impl MemoryConnection {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the server going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of `delete` round trips served so far.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Live keys, sorted. Handy for assertions.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "keys");
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::connection(format!(
                "{} is unreachable",
                self.label
            )))
        }
    }

    fn with_entries<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> R,
    ) -> Result<R, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, op);
        entries.retain(|_, entry| entry.is_live(now));
        Ok(f(&mut entries, now))
    }
}

fn expiry_from(now: Instant, ttl: Duration) -> Instant {
    now + Duration::from_secs(ttl.as_secs().max(1))
}

/// Redis rounds the remaining lifetime to the nearest second.
fn remaining_ttl(entry: &Entry, now: Instant) -> KeyTtl {
    match entry.expires_at {
        None => KeyTtl::Persistent,
        Some(at) => {
            let millis = at.saturating_duration_since(now).as_millis() as u64;
            KeyTtl::Expires(Duration::from_secs((millis + 500) / 1000))
        }
    }
}

#[async_trait]
impl KvConnection for MemoryConnection {
    fn label(&self) -> &str {
        &self.label
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }

    async fn get_with_ttl(&self, key: &str) -> Result<(Option<Vec<u8>>, KeyTtl), StoreError> {
        self.with_entries("get_with_ttl", |entries, now| match entries.get(key) {
            None => Ok((None, KeyTtl::Missing)),
            Some(entry) => match &entry.value {
                Stored::Bytes(bytes) => Ok((Some(bytes.clone()), remaining_ttl(entry, now))),
                Stored::Sorted(_) => Err(StoreError::command(
                    "get",
                    "WRONGTYPE Operation against a key holding the wrong kind of value",
                )),
            },
        })?
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.with_entries("get_many", |entries, _| {
            keys.iter()
                .map(|key| match entries.get(key).map(|entry| &entry.value) {
                    Some(Stored::Bytes(bytes)) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.with_entries("set_ex", |entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Stored::Bytes(value.to_vec()),
                    expires_at: Some(expiry_from(now, ttl)),
                },
            );
        })
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.with_entries("set_nx_ex", |entries, now| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Stored::Bytes(value.to_vec()),
                    expires_at: Some(expiry_from(now, ttl)),
                },
            );
            true
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        self.with_entries("compare_and_delete", |entries, _| {
            let matches = matches!(
                entries.get(key).map(|entry| &entry.value),
                Some(Stored::Bytes(current)) if current.as_slice() == expected
            );
            if matches {
                entries.remove(key);
            }
            matches
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.with_entries("delete", |entries, _| {
            keys.iter()
                .filter(|key| entries.remove(key.as_str()).is_some())
                .count() as u64
        })
    }

    async fn scan_match(&self, pattern: &str, _count: usize) -> Result<Vec<String>, StoreError> {
        let pattern = GlobPattern::parse(pattern);
        self.with_entries("scan_match", |entries, _| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| pattern.matches(key))
                .cloned()
                .collect();
            keys.sort();
            keys
        })
    }

    async fn sorted_range(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        self.with_entries("sorted_range", |entries, _| {
            match entries.get(key).map(|entry| &entry.value) {
                Some(Stored::Sorted(members)) => members.iter().take(limit).cloned().collect(),
                _ => Vec::new(),
            }
        })
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.with_entries("write_batch", |entries, now| {
            for op in ops {
                match op {
                    WriteOp::Set { key, value, ttl } => {
                        entries.insert(
                            key,
                            Entry {
                                value: Stored::Bytes(value),
                                expires_at: Some(expiry_from(now, ttl)),
                            },
                        );
                    }
                    WriteOp::SortedAdd { key, member, ttl } => {
                        let entry = entries.entry(key).or_insert_with(|| Entry {
                            value: Stored::Sorted(BTreeSet::new()),
                            expires_at: None,
                        });
                        if let Stored::Bytes(_) = entry.value {
                            entry.value = Stored::Sorted(BTreeSet::new());
                        }
                        if let Stored::Sorted(members) = &mut entry.value {
                            members.insert(member);
                        }
                        entry.expires_at = Some(expiry_from(now, ttl));
                    }
                }
            }
        })
    }
}

/// Hands out one shared [`MemoryConnection`]; refuses while it is marked unavailable.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    connection: Arc<MemoryConnection>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(connection: Arc<MemoryConnection>) -> Self {
        Self {
            connection,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn describe(&self) -> String {
        format!("memory://{}", self.connection.label)
    }

    async fn connect(&self) -> Result<Arc<dyn KvConnection>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.connection.ensure_available()?;
        Ok(self.connection.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GlobToken {
    Any,
    One,
    Literal(char),
}

/// The subset of Redis glob syntax the crate emits: `*`, `?` and backslash escapes.
#[derive(Debug, Clone)]
struct GlobPattern {
    tokens: Vec<GlobToken>,
}

impl GlobPattern {
    fn parse(pattern: &str) -> Self {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars();
        while let Some(ch) = chars.next() {
            let token = match ch {
                '*' => GlobToken::Any,
                '?' => GlobToken::One,
                '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
                other => GlobToken::Literal(other),
            };
            tokens.push(token);
        }
        Self { tokens }
    }

    fn matches(&self, input: &str) -> bool {
        let text: Vec<char> = input.chars().collect();
        let (mut t, mut p) = (0, 0);
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(GlobToken::Any) => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                Some(GlobToken::One) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(GlobToken::Literal(ch)) if *ch == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
            match backtrack {
                Some((star_p, star_t)) => {
                    backtrack = Some((star_p, star_t + 1));
                    p = star_p + 1;
                    t = star_t + 1;
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|token| *token == GlobToken::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        let pattern = GlobPattern::parse("cache:v1:brands:*");
        assert!(pattern.matches("cache:v1:brands:/api/brands:{}"));
        assert!(!pattern.matches("cache:v1:models:/api/models:{}"));

        let escaped = GlobPattern::parse("search:idx:a\\*b*");
        assert!(escaped.matches("search:idx:a*bc"));
        assert!(!escaped.matches("search:idx:axbc"));

        let single = GlobPattern::parse("lock:?");
        assert!(single.matches("lock:a"));
        assert!(!single.matches("lock:ab"));

        assert!(GlobPattern::parse("*").matches(""));
        assert!(GlobPattern::parse("a*c*e").matches("abcde"));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_is_non_increasing_without_writes() {
        let conn = MemoryConnection::new("memory");
        conn.set_ex("k", b"v", Duration::from_secs(300)).await.unwrap();

        let mut last = u64::MAX;
        for _ in 0..10 {
            let (value, ttl) = conn.get_with_ttl("k").await.unwrap();
            assert_eq!(value.as_deref(), Some(&b"v"[..]));
            let remaining = ttl.remaining_secs().expect("key has an expiry");
            assert!(remaining <= last, "{remaining} > {last}");
            last = remaining;
            tokio::time::advance(Duration::from_millis(7_300)).await;
        }
        assert!(last < 300);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_on_the_tokio_clock() {
        let conn = MemoryConnection::new("memory");
        conn.set_ex("k", b"v", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(conn.get_with_ttl("k").await.unwrap().0.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            conn.get_with_ttl("k").await.unwrap(),
            (None, KeyTtl::Missing)
        );
    }

    #[tokio::test]
    async fn set_nx_only_writes_once() {
        let conn = MemoryConnection::new("memory");
        let ttl = Duration::from_secs(10);
        assert!(conn.set_nx_ex("lock:k", b"a", ttl).await.unwrap());
        assert!(!conn.set_nx_ex("lock:k", b"b", ttl).await.unwrap());

        assert!(!conn.compare_and_delete("lock:k", b"b").await.unwrap());
        assert!(conn.compare_and_delete("lock:k", b"a").await.unwrap());
        assert!(conn.set_nx_ex("lock:k", b"b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn sorted_sets_return_members_in_order() {
        let conn = MemoryConnection::new("memory");
        let ttl = Duration::from_secs(60);
        conn.write_batch(
            ["m3", "m1", "m2"]
                .into_iter()
                .map(|member| WriteOp::SortedAdd {
                    key: "search:idx:ne".into(),
                    member: member.into(),
                    ttl,
                })
                .collect(),
        )
        .await
        .unwrap();

        assert_eq!(
            conn.sorted_range("search:idx:ne", 2).await.unwrap(),
            vec!["m1".to_string(), "m2".to_string()]
        );
        assert!(conn.get_with_ttl("search:idx:ne").await.is_err());
    }

    #[tokio::test]
    async fn unavailable_connection_fails_every_call() {
        let conn = Arc::new(MemoryConnection::new("primary"));
        let connector = MemoryConnector::new(Arc::clone(&conn));
        conn.set_available(false);

        assert!(matches!(conn.ping().await, Err(StoreError::Connection(_))));
        assert!(conn.get_with_ttl("k").await.is_err());
        assert!(connector.connect().await.is_err());

        conn.set_available(true);
        assert!(connector.connect().await.is_ok());
        assert_eq!(connector.attempts(), 2);
    }
}
