//! Catalog read handlers. All of them sit behind the response cache layer.

use axum::Json;
use axum::extract::{Path, Query, State};

use crate::catalog::{BrandRecord, ModelRecord};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::ModelListQuery;
use crate::infra::http::api::state::ApiState;

pub async fn list_brands(
    State(state): State<ApiState>,
) -> Result<Json<Vec<BrandRecord>>, ApiError> {
    let brands = state.catalog.brands().await?;
    Ok(Json(brands))
}

pub async fn list_models(
    State(state): State<ApiState>,
    Query(query): Query<ModelListQuery>,
) -> Result<Json<Vec<ModelRecord>>, ApiError> {
    let models = state.catalog.models().await?;

    let brand_id = match query.brand.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                let brands = state.catalog.brands().await?;
                let brand = brands
                    .iter()
                    .find(|brand| brand.slug() == raw)
                    .ok_or_else(|| ApiError::not_found("brand not found"))?;
                Some(brand.id)
            }
        },
    };
    let popular_only = query.popular.unwrap_or(false);

    let models = models
        .into_iter()
        .filter(|model| brand_id.is_none_or(|id| model.brand_id == id))
        .filter(|model| !popular_only || (model.is_popular && model.is_active()))
        .collect();
    Ok(Json(models))
}

pub async fn get_model(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<ModelRecord>, ApiError> {
    state
        .catalog
        .models()
        .await?
        .into_iter()
        .find(|model| model.id == id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("model not found"))
}
