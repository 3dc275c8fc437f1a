use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{BrandRecord, Catalog, CatalogError, ModelRecord};

/// JSON document of the form `{"brands": [...], "models": [...]}`.
///
/// Re-read on every call so edits are picked up by the next index rebuild.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    brands: Vec<BrandRecord>,
    #[serde(default)]
    models: Vec<ModelRecord>,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CatalogDocument, CatalogError> {
        let path_label = self.path.display().to_string();
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CatalogError::Io {
                path: path_label.clone(),
                source,
            })?;
        let document: CatalogDocument =
            serde_json::from_slice(&bytes).map_err(|source| CatalogError::Parse {
                path: path_label.clone(),
                source,
            })?;
        debug!(
            path = %path_label,
            brands = document.brands.len(),
            models = document.models.len(),
            "catalog loaded"
        );
        Ok(document)
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn brands(&self) -> Result<Vec<BrandRecord>, CatalogError> {
        Ok(self.load().await?.brands)
    }

    async fn models(&self) -> Result<Vec<ModelRecord>, CatalogError> {
        Ok(self.load().await?.models)
    }
}
