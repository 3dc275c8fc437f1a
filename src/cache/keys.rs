//! Cache key construction.
//!
//! Layout: `cache:<version>:<namespace>:<path>:<query-json>`. The namespace is the
//! second path segment (`/api/brands/..` → `brands`), falling back to `api`. Query
//! parameters are rendered as a JSON object with sorted keys so `?a=1&b=2` and
//! `?b=2&a=1` share an entry.

use std::{collections::BTreeMap, fmt};

use serde_json::Value;

use crate::store::escape_glob;

pub const KEY_PREFIX: &str = "cache";
pub const LOCK_PREFIX: &str = "lock";
const DEFAULT_NAMESPACE: &str = "api";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    value: String,
}

impl CacheKey {
    /// Key for a request path and raw (still percent-encoded) query string.
    pub fn for_request(version: &str, path: &str, query: Option<&str>) -> Self {
        let namespace = namespace_for_path(path);
        let value = format!(
            "{KEY_PREFIX}:{version}:{namespace}:{path}:{}",
            canonical_query(query)
        );
        Self {
            namespace: namespace.to_string(),
            value,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the fill lock guarding this entry.
    pub fn lock_key(&self) -> String {
        format!("{LOCK_PREFIX}:{}", self.value)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

pub fn namespace_for_path(path: &str) -> &str {
    path.split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
}

/// Sorted JSON rendering of a query string. Repeated parameters become arrays.
pub fn canonical_query(query: Option<&str>) -> String {
    let mut params: BTreeMap<String, Value> = BTreeMap::new();
    for (name, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        let value = Value::String(value.into_owned());
        match params.get_mut(name.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                params.insert(name.into_owned(), value);
            }
        }
    }
    serde_json::to_string(&params).unwrap_or_else(|_| "{}".to_string())
}

/// SCAN pattern covering every entry of `namespace`.
pub fn namespace_pattern(version: &str, namespace: &str) -> String {
    format!(
        "{KEY_PREFIX}:{}:{}:*",
        escape_glob(version),
        escape_glob(namespace)
    )
}

/// SCAN pattern covering every entry of the current version.
pub fn version_pattern(version: &str) -> String {
    format!("{KEY_PREFIX}:{}:*", escape_glob(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_second_path_segment() {
        assert_eq!(namespace_for_path("/api/brands"), "brands");
        assert_eq!(namespace_for_path("/api/models/42"), "models");
        assert_eq!(namespace_for_path("/api"), "api");
        assert_eq!(namespace_for_path("/api/"), "api");
        assert_eq!(namespace_for_path("/"), "api");
    }

    #[test]
    fn key_layout() {
        let key = CacheKey::for_request("v1", "/api/models", Some("popular=true"));
        assert_eq!(
            key.as_str(),
            r#"cache:v1:models:/api/models:{"popular":"true"}"#
        );
        assert_eq!(key.namespace(), "models");
        assert_eq!(
            key.lock_key(),
            r#"lock:cache:v1:models:/api/models:{"popular":"true"}"#
        );
    }

    #[test]
    fn equivalent_queries_share_a_key() {
        let a = CacheKey::for_request("v1", "/api/models", Some("brand=tata&popular=true"));
        let b = CacheKey::for_request("v1", "/api/models", Some("popular=true&brand=tata"));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_and_empty_query_are_equal() {
        assert_eq!(canonical_query(None), "{}");
        assert_eq!(canonical_query(Some("")), "{}");
    }

    #[test]
    fn repeated_parameters_collect_into_arrays() {
        assert_eq!(
            canonical_query(Some("tag=suv&tag=ev&tag=diesel")),
            r#"{"tag":["suv","ev","diesel"]}"#
        );
    }

    #[test]
    fn percent_encoding_is_decoded() {
        assert_eq!(
            canonical_query(Some("q=nexon%20ev")),
            r#"{"q":"nexon ev"}"#
        );
    }

    #[test]
    fn version_changes_the_key() {
        let v1 = CacheKey::for_request("v1", "/api/brands", None);
        let v2 = CacheKey::for_request("v2", "/api/brands", None);
        assert_ne!(v1, v2);
    }

    #[test]
    fn patterns_escape_user_input() {
        assert_eq!(namespace_pattern("v1", "brands"), "cache:v1:brands:*");
        assert_eq!(namespace_pattern("v1", "br*"), "cache:v1:br\\*:*");
        assert_eq!(version_pattern("v1"), "cache:v1:*");
    }
}
