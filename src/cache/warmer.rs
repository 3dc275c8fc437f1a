//! Startup cache warmup.
//!
//! Writes the brand list and the popular-model list under exactly the keys the
//! middleware derives for `/api/brands` and `/api/models?popular=true`, in the same
//! snapshot format the middleware stores.

use std::{sync::Arc, time::Instant};

use axum::http::StatusCode;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::catalog::{Catalog, CatalogError};

use super::{CacheError, CachePolicy, CachedResponse, ResponseCache};

pub const BRANDS_PATH: &str = "/api/brands";
pub const MODELS_PATH: &str = "/api/models";
pub const POPULAR_QUERY: &str = "popular=true";

#[derive(Debug, Error)]
pub enum WarmError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to serialize warm payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub entries: usize,
    pub brands: usize,
    pub popular_models: usize,
}

pub struct CacheWarmer {
    cache: ResponseCache,
    catalog: Arc<dyn Catalog>,
}

impl CacheWarmer {
    pub fn new(cache: ResponseCache, catalog: Arc<dyn Catalog>) -> Self {
        Self { cache, catalog }
    }

    #[instrument(skip(self))]
    pub async fn warm(&self) -> Result<WarmReport, WarmError> {
        let started = Instant::now();
        let result = self.warm_inner().await;
        histogram!("motorcache_cache_warm_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        match &result {
            Ok(report) => {
                counter!("motorcache_cache_warm_total", "result" => "ok").increment(1);
                info!(
                    entries = report.entries,
                    brands = report.brands,
                    popular_models = report.popular_models,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "cache warmed"
                );
            }
            Err(err) => {
                counter!("motorcache_cache_warm_total", "result" => "error").increment(1);
                warn!(error = %err, "cache warmup failed");
            }
        }
        result
    }

    async fn warm_inner(&self) -> Result<WarmReport, WarmError> {
        let brands = self.catalog.brands().await?;
        let popular: Vec<_> = self
            .catalog
            .models()
            .await?
            .into_iter()
            .filter(|model| model.is_popular && model.is_active())
            .collect();

        let key = self.cache.key_for(BRANDS_PATH, None);
        let snapshot = CachedResponse::json(StatusCode::OK, &brands)?;
        self.cache
            .put(&key, &snapshot, CachePolicy::BRANDS.ttl)
            .await?;

        let key = self.cache.key_for(MODELS_PATH, Some(POPULAR_QUERY));
        let snapshot = CachedResponse::json(StatusCode::OK, &popular)?;
        self.cache
            .put(&key, &snapshot, CachePolicy::MODELS.ttl)
            .await?;

        Ok(WarmReport {
            entries: 2,
            brands: brands.len(),
            popular_models: popular.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{CacheConfig, CacheStatus},
        catalog::{BrandRecord, ModelRecord, ModelStatus, StaticCatalog},
        store::{FixedProvider, MemoryConnection},
    };

    fn catalog() -> Arc<StaticCatalog> {
        let model = |id, popular, status| ModelRecord {
            id,
            name: format!("Model {id}"),
            brand_id: 1,
            slug: None,
            hero_image: None,
            status,
            is_popular: popular,
        };
        StaticCatalog::shared(
            vec![BrandRecord {
                id: 1,
                name: "Tata".into(),
                slug: None,
            }],
            vec![
                model(1, true, ModelStatus::Active),
                model(2, false, ModelStatus::Active),
                model(3, true, ModelStatus::Discontinued),
            ],
        )
    }

    #[tokio::test]
    async fn warm_entries_are_served_as_hits() {
        let conn = Arc::new(MemoryConnection::new("memory"));
        let cache = ResponseCache::new(CacheConfig::default(), Arc::new(FixedProvider::new(conn)));
        let warmer = CacheWarmer::new(cache.clone(), catalog());

        let report = warmer.warm().await.unwrap();
        assert_eq!(
            report,
            WarmReport {
                entries: 2,
                brands: 1,
                popular_models: 1
            }
        );

        let key = cache.key_for(MODELS_PATH, Some(POPULAR_QUERY));
        let cached = cache
            .get_cached_or_compute(&key, CachePolicy::MODELS, || async {
                Err::<CachedResponse, ()>(())
            })
            .await
            .unwrap();
        assert_eq!(cached.status, CacheStatus::Hit);
        let models: Vec<ModelRecord> = serde_json::from_str(&cached.value.body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_warmup() {
        let cache = ResponseCache::new(
            CacheConfig::default(),
            Arc::new(FixedProvider::unavailable()),
        );
        let warmer = CacheWarmer::new(cache, catalog());
        assert!(matches!(warmer.warm().await, Err(WarmError::Cache(_))));
    }
}
