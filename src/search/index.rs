//! Dual-tier search index.
//!
//! The in-memory snapshot answers queries without a network round trip. A cold process
//! (empty snapshot) falls back to the remote mirror written by whichever process built
//! last. When both tiers come up empty, `search` returns `None` and the caller scans the
//! catalog directly.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use arc_swap::ArcSwap;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    catalog::{BrandRecord, Catalog, CatalogError, ModelRecord},
    scheduler::{TaskHandle, spawn_ticker},
    store::ConnectionProvider,
    util::sync::mutex_lock,
};

use super::{
    SearchConfig,
    document::{SearchDocument, build_documents, normalize_query, rank_matches},
    mirror,
};

#[derive(Debug, Error)]
pub enum IndexError {
    /// The dataset could not be read. The previous snapshot stays in place.
    #[error("index build failed: {0}")]
    BuildFailure(#[from] CatalogError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Memory,
    Remote,
    Catalog,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<SearchDocument>,
    pub total: usize,
    pub source: SearchSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_age_seconds: Option<u64>,
}

impl SearchResults {
    fn new(query: String, results: Vec<SearchDocument>, source: SearchSource) -> Self {
        Self {
            query,
            total: results.len(),
            results,
            source,
            index_age_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built {
        documents: usize,
        terms: usize,
        mirrored: bool,
    },
    /// Another build was already running.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub document_count: usize,
    pub term_count: usize,
    pub brand_count: usize,
    pub building: bool,
    pub last_build: Option<String>,
    pub index_age_seconds: Option<u64>,
    pub refresh_interval_seconds: u64,
}

/// Immutable, fully built index. Replaced wholesale on every rebuild.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    documents: BTreeMap<i64, SearchDocument>,
    postings: BTreeMap<String, BTreeSet<i64>>,
    brand_count: usize,
    built_at: Option<Instant>,
    built_at_wall: Option<OffsetDateTime>,
}

impl IndexSnapshot {
    pub fn build(brands: &[BrandRecord], models: &[ModelRecord]) -> Self {
        let mut documents = BTreeMap::new();
        let mut postings: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
        for doc in build_documents(brands, models) {
            for term in doc.terms() {
                postings.entry(term).or_default().insert(doc.id);
            }
            documents.insert(doc.id, doc);
        }
        Self {
            documents,
            postings,
            brand_count: brands.len(),
            built_at: Some(Instant::now()),
            built_at_wall: Some(OffsetDateTime::now_utc()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn brand_count(&self) -> usize {
        self.brand_count
    }

    pub fn documents(&self) -> impl Iterator<Item = &SearchDocument> {
        self.documents.values()
    }

    pub fn postings(&self) -> impl Iterator<Item = (&String, &BTreeSet<i64>)> {
        self.postings.iter()
    }

    pub fn built_at_wall(&self) -> Option<OffsetDateTime> {
        self.built_at_wall
    }

    pub fn age(&self) -> Option<Duration> {
        self.built_at.map(|at| at.elapsed())
    }

    /// Candidates come from the first token's posting list; every token must match.
    fn search(&self, query: &str, limit: usize) -> Vec<SearchDocument> {
        let Some(first) = query.split(' ').next() else {
            return Vec::new();
        };
        let Some(ids) = self.postings.get(first) else {
            return Vec::new();
        };
        rank_matches(
            ids.iter().filter_map(|id| self.documents.get(id)),
            query,
            limit,
        )
    }
}

pub struct SearchIndex {
    config: SearchConfig,
    provider: Arc<dyn ConnectionProvider>,
    catalog: Arc<dyn Catalog>,
    snapshot: ArcSwap<IndexSnapshot>,
    /// Held for the duration of a build; `try_lock` failing means one is running.
    build_lock: tokio::sync::Mutex<()>,
    refresh_task: Mutex<Option<TaskHandle>>,
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("config", &self.config)
            .field("documents", &self.snapshot.load().document_count())
            .finish()
    }
}

impl SearchIndex {
    pub fn new(
        config: SearchConfig,
        provider: Arc<dyn ConnectionProvider>,
        catalog: Arc<dyn Catalog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            provider,
            catalog,
            snapshot: ArcSwap::from_pointee(IndexSnapshot::default()),
            build_lock: tokio::sync::Mutex::new(()),
            refresh_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn is_building(&self) -> bool {
        self.build_lock.try_lock().is_err()
    }

    /// Rebuild both tiers from the catalog. A no-op while another build is running.
    #[instrument(skip(self))]
    pub async fn build_index(&self) -> Result<BuildOutcome, IndexError> {
        let Ok(_guard) = self.build_lock.try_lock() else {
            debug!("index build already in progress");
            return Ok(BuildOutcome::Skipped);
        };
        self.rebuild().await
    }

    /// Drop both tiers, then rebuild. Waits for an in-flight build instead of skipping,
    /// so the snapshot visible afterwards is never older than the call.
    #[instrument(skip(self))]
    pub async fn invalidate(&self) -> Result<BuildOutcome, IndexError> {
        let _guard = self.build_lock.lock().await;
        self.snapshot.store(Arc::new(IndexSnapshot::default()));
        if let Some(conn) = self.provider.active_connection() {
            match mirror::clear_mirror(conn.as_ref(), self.config.delete_batch_size).await {
                Ok(removed) => debug!(removed, "search mirror cleared"),
                Err(err) => warn!(error = %err, "failed to clear search mirror"),
            }
        }
        counter!("motorcache_search_invalidations_total").increment(1);
        info!("search index invalidated");
        self.rebuild().await
    }

    /// `None` means neither tier could answer and the caller should scan the catalog.
    #[instrument(skip(self))]
    pub async fn search(&self, raw_query: &str, limit: usize) -> Option<SearchResults> {
        let query = normalize_query(raw_query);
        let snapshot = self.snapshot.load_full();

        if query.chars().count() < self.config.min_query_len.max(1) {
            return Some(SearchResults::new(query, Vec::new(), SearchSource::Memory));
        }

        if !snapshot.is_empty() {
            let results = snapshot.search(&query, limit);
            record_search(SearchSource::Memory);
            let mut results = SearchResults::new(query, results, SearchSource::Memory);
            results.index_age_seconds = snapshot.age().map(|age| age.as_secs());
            return Some(results);
        }

        let conn = self.provider.active_connection()?;
        match mirror::search_mirror(conn.as_ref(), &query).await {
            Ok(candidates) if !candidates.is_empty() => {
                let results = rank_matches(&candidates, &query, limit);
                record_search(SearchSource::Remote);
                Some(SearchResults::new(query, results, SearchSource::Remote))
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "remote search failed");
                None
            }
        }
    }

    /// Same matching and ranking as `search`, over a fresh catalog read.
    pub async fn full_scan(
        catalog: &dyn Catalog,
        raw_query: &str,
        limit: usize,
    ) -> Result<SearchResults, CatalogError> {
        let query = normalize_query(raw_query);
        let brands = catalog.brands().await?;
        let models = catalog.models().await?;
        let documents = build_documents(&brands, &models);
        let results = if query.is_empty() {
            Vec::new()
        } else {
            rank_matches(&documents, &query, limit)
        };
        record_search(SearchSource::Catalog);
        Ok(SearchResults::new(query, results, SearchSource::Catalog))
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot.load();
        IndexStats {
            document_count: snapshot.document_count(),
            term_count: snapshot.term_count(),
            brand_count: snapshot.brand_count(),
            building: self.is_building(),
            last_build: snapshot
                .built_at_wall()
                .and_then(|at| at.format(&Rfc3339).ok()),
            index_age_seconds: snapshot.age().map(|age| age.as_secs()),
            refresh_interval_seconds: self.config.refresh_interval.as_secs(),
        }
    }

    /// Rebuild on a fixed interval until shutdown. The first run is one interval out.
    pub fn start_refresh(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = spawn_ticker("search-refresh", self.config.refresh_interval, move || {
            let weak = weak.clone();
            async move {
                let Some(index) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = index.build_index().await {
                    warn!(error = %err, "scheduled index rebuild failed");
                }
            }
        });
        let previous = mutex_lock(&self.refresh_task, "search", "start_refresh").replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub async fn shutdown(&self) {
        let task = mutex_lock(&self.refresh_task, "search", "shutdown").take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }

    async fn rebuild(&self) -> Result<BuildOutcome, IndexError> {
        let started = Instant::now();
        let (brands, models) = match self.fetch().await {
            Ok(data) => data,
            Err(err) => {
                counter!("motorcache_search_build_total", "result" => "error").increment(1);
                warn!(error = %err, "index build failed, keeping previous snapshot");
                return Err(err.into());
            }
        };

        let snapshot = Arc::new(IndexSnapshot::build(&brands, &models));
        let documents = snapshot.document_count();
        let terms = snapshot.term_count();
        self.snapshot.store(Arc::clone(&snapshot));

        let mirrored = match self.provider.active_connection() {
            Some(conn) => match mirror::write_mirror(
                conn.as_ref(),
                &snapshot,
                self.config.entry_ttl,
                self.config.delete_batch_size,
            )
            .await
            {
                Ok(report) => {
                    debug!(removed = report.removed, written = report.written, "search mirror written");
                    true
                }
                Err(err) => {
                    warn!(error = %err, "failed to mirror search index");
                    false
                }
            },
            None => false,
        };

        let elapsed = started.elapsed();
        counter!("motorcache_search_build_total", "result" => "ok").increment(1);
        histogram!("motorcache_search_build_ms").record(elapsed.as_secs_f64() * 1000.0);
        gauge!("motorcache_search_documents").set(documents as f64);
        info!(
            documents,
            terms,
            mirrored,
            elapsed_ms = elapsed.as_millis() as u64,
            "search index built"
        );

        Ok(BuildOutcome::Built {
            documents,
            terms,
            mirrored,
        })
    }

    async fn fetch(&self) -> Result<(Vec<BrandRecord>, Vec<ModelRecord>), CatalogError> {
        let brands = self.catalog.brands().await?;
        let models = self.catalog.models().await?;
        Ok((brands, models))
    }
}

fn record_search(source: SearchSource) {
    let label = match source {
        SearchSource::Memory => "memory",
        SearchSource::Remote => "remote",
        SearchSource::Catalog => "catalog",
    };
    counter!("motorcache_search_queries_total", "source" => label).increment(1);
}
