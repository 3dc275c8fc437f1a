use serde::{Deserialize, Serialize};

use crate::store::StoreStatus;

#[derive(Debug, Default, Deserialize)]
pub struct ModelListQuery {
    /// Brand id or brand slug.
    pub brand: Option<String>,
    pub popular: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateResponse {
    pub pattern: String,
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealthResponse {
    pub enabled: bool,
    pub healthy: bool,
    pub store: StoreStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInvalidateResponse {
    pub rebuilt: bool,
    pub documents: usize,
}
