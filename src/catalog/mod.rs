//! Catalog collaborator: bulk reads of brands and models.
//!
//! The cache and search layers only ever ask for whole collections; filtering happens
//! in the caller.

mod file;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::sync::{rw_read, rw_write};

pub use file::FileCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandRecord {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl BrandRecord {
    /// Explicit slug, or one derived from the name.
    pub fn slug(&self) -> String {
        self.slug
            .clone()
            .unwrap_or_else(|| slug::slugify(&self.name))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Active,
    Discontinued,
    Upcoming,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub id: i64,
    pub name: String,
    pub brand_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<String>,
    #[serde(default)]
    pub status: ModelStatus,
    #[serde(default)]
    pub is_popular: bool,
}

impl ModelRecord {
    pub fn slug(&self) -> String {
        self.slug
            .clone()
            .unwrap_or_else(|| slug::slugify(&self.name))
    }

    pub fn is_active(&self) -> bool {
        self.status == ModelStatus::Active
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn brands(&self) -> Result<Vec<BrandRecord>, CatalogError>;

    async fn models(&self) -> Result<Vec<ModelRecord>, CatalogError>;
}

/// In-memory catalog. Contents can be swapped to simulate writes.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    data: RwLock<(Vec<BrandRecord>, Vec<ModelRecord>)>,
}

impl StaticCatalog {
    pub fn new(brands: Vec<BrandRecord>, models: Vec<ModelRecord>) -> Self {
        Self {
            data: RwLock::new((brands, models)),
        }
    }

    pub fn shared(brands: Vec<BrandRecord>, models: Vec<ModelRecord>) -> Arc<Self> {
        Arc::new(Self::new(brands, models))
    }

    pub fn replace(&self, brands: Vec<BrandRecord>, models: Vec<ModelRecord>) {
        *rw_write(&self.data, "catalog", "replace") = (brands, models);
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn brands(&self) -> Result<Vec<BrandRecord>, CatalogError> {
        Ok(rw_read(&self.data, "catalog", "brands").0.clone())
    }

    async fn models(&self) -> Result<Vec<ModelRecord>, CatalogError> {
        Ok(rw_read(&self.data, "catalog", "models").1.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_use_camel_case_and_defaults() {
        let model: ModelRecord = serde_json::from_str(
            r#"{"id": 7, "name": "Nexon EV", "brandId": 1, "heroImage": "/img/nexon.jpg"}"#,
        )
        .unwrap();
        assert_eq!(model.brand_id, 1);
        assert_eq!(model.status, ModelStatus::Active);
        assert!(!model.is_popular);
        assert_eq!(model.slug(), "nexon-ev");
    }

    #[test]
    fn unknown_status_is_not_active() {
        let model: ModelRecord =
            serde_json::from_str(r#"{"id": 1, "name": "X", "brandId": 1, "status": "draft"}"#)
                .unwrap();
        assert_eq!(model.status, ModelStatus::Other);
        assert!(!model.is_active());
    }

    #[tokio::test]
    async fn static_catalog_replace_is_visible() {
        let catalog = StaticCatalog::default();
        assert!(catalog.brands().await.unwrap().is_empty());

        catalog.replace(
            vec![BrandRecord {
                id: 1,
                name: "Tata Motors".into(),
                slug: None,
            }],
            Vec::new(),
        );
        let brands = catalog.brands().await.unwrap();
        assert_eq!(brands[0].slug(), "tata-motors");
    }
}
