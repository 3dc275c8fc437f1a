use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use motorcache::{
    cache::{CacheConfig, ResponseCache, X_CACHE},
    catalog::{BrandRecord, Catalog, ModelRecord, ModelStatus, StaticCatalog},
    infra::http::{ApiState, build_router},
    search::{SearchConfig, SearchIndex},
    store::{ConnectionManager, ManagerConfig, MemoryConnection, MemoryConnector},
};
use serde_json::Value;
use tower::ServiceExt;

fn brand(id: i64, name: &str) -> BrandRecord {
    BrandRecord {
        id,
        name: name.to_string(),
        slug: None,
    }
}

fn model(id: i64, brand_id: i64, name: &str, popular: bool, status: ModelStatus) -> ModelRecord {
    ModelRecord {
        id,
        name: name.to_string(),
        brand_id,
        slug: None,
        hero_image: None,
        status,
        is_popular: popular,
    }
}

fn sample_catalog() -> Arc<StaticCatalog> {
    StaticCatalog::shared(
        vec![brand(1, "Tata"), brand(2, "Hyundai")],
        vec![
            model(10, 1, "Nexon", true, ModelStatus::Active),
            model(11, 1, "Nexon EV", true, ModelStatus::Active),
            model(12, 1, "Harrier", true, ModelStatus::Discontinued),
            model(20, 2, "Creta", false, ModelStatus::Active),
        ],
    )
}

struct Harness {
    router: Router,
    store: Arc<MemoryConnection>,
    search: Arc<SearchIndex>,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryConnection::new("primary"));
    let manager = ConnectionManager::new(
        ManagerConfig::default(),
        Some(Arc::new(MemoryConnector::new(Arc::clone(&store)))),
        None,
    );
    manager
        .connect()
        .await
        .expect("memory store should connect");

    let catalog: Arc<dyn Catalog> = sample_catalog();
    let cache = ResponseCache::new(CacheConfig::default(), manager.clone());
    let search = SearchIndex::new(SearchConfig::default(), manager.clone(), catalog.clone());
    let state = ApiState {
        catalog,
        cache,
        search: search.clone(),
        store: manager,
    };

    Harness {
        router: build_router(state),
        store,
        search,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<&str>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

fn cache_header(response: &Response) -> &str {
    response
        .headers()
        .get(X_CACHE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn brands_are_cached_after_the_first_request() {
    let h = harness().await;

    let first = send(&h.router, Method::GET, "/api/brands", None).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_header(&first), "MISS");
    let first_body = json_body(first).await;

    let second = send(&h.router, Method::GET, "/api/brands", None).await;
    assert_eq!(cache_header(&second), "HIT");
    assert!(second.headers().contains_key("x-cache-ttl"));
    assert_eq!(json_body(second).await, first_body);

    assert!(
        h.store
            .keys()
            .iter()
            .any(|key| key.starts_with("cache:v1:brands:"))
    );
}

#[tokio::test]
async fn popular_models_exclude_inactive_entries() {
    let h = harness().await;

    let response = send(&h.router, Method::GET, "/api/models?popular=true", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let ids: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![10, 11]);
}

#[tokio::test]
async fn models_filter_by_brand_slug() {
    let h = harness().await;

    let body = json_body(send(&h.router, Method::GET, "/api/models?brand=hyundai", None).await).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Creta");
}

#[tokio::test]
async fn missing_model_is_not_cached() {
    let h = harness().await;

    let response = send(&h.router, Method::GET, "/api/models/999", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "not_found");
    assert!(h.store.keys().iter().all(|key| !key.contains(":models:")));
}

#[tokio::test]
async fn search_falls_back_to_the_catalog_before_the_first_build() {
    let h = harness().await;

    let body = json_body(send(&h.router, Method::GET, "/api/search?q=nex", None).await).await;
    assert_eq!(body["source"], "catalog");
    assert_eq!(body["total"], 2);

    h.search.build_index().await.unwrap();

    let body = json_body(send(&h.router, Method::GET, "/api/search?q=nexon", None).await).await;
    assert_eq!(body["source"], "memory");
    assert_eq!(body["results"][0]["name"], "Nexon");
    assert_eq!(body["results"][1]["name"], "Nexon EV");
}

#[tokio::test]
async fn search_requires_a_query() {
    let h = harness().await;

    let response = send(&h.router, Method::GET, "/api/search", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalidate_requires_a_pattern() {
    let h = harness().await;

    let response = send(&h.router, Method::POST, "/api/cache/invalidate", Some("{}")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn invalidating_a_namespace_forces_a_fresh_fill() {
    let h = harness().await;

    send(&h.router, Method::GET, "/api/brands", None).await;
    send(&h.router, Method::GET, "/api/models", None).await;

    let response = send(
        &h.router,
        Method::POST,
        "/api/cache/invalidate",
        Some(r#"{"pattern":"brands"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["deleted"], 1);

    let brands = send(&h.router, Method::GET, "/api/brands", None).await;
    assert_eq!(cache_header(&brands), "MISS");
    let models = send(&h.router, Method::GET, "/api/models", None).await;
    assert_eq!(cache_header(&models), "HIT");
}

#[tokio::test]
async fn admin_routes_are_never_cached() {
    let h = harness().await;

    let response = send(&h.router, Method::GET, "/api/cache/stats", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(X_CACHE));
    let body = json_body(response).await;
    assert_eq!(body["version"], "v1");
    assert_eq!(body["store_ready"], true);
}

#[tokio::test]
async fn search_invalidate_rebuilds_the_index() {
    let h = harness().await;

    let body = json_body(send(&h.router, Method::POST, "/api/search/invalidate", None).await).await;
    assert_eq!(body["rebuilt"], true);
    assert_eq!(body["documents"], 3);

    let stats = json_body(send(&h.router, Method::GET, "/api/search/stats", None).await).await;
    assert_eq!(stats["documentCount"], 3);
    assert!(h.store.keys().iter().any(|key| key == "search:meta"));
}

#[tokio::test]
async fn search_invalidate_purges_cached_search_responses() {
    let h = harness().await;

    let first = send(&h.router, Method::GET, "/api/search?q=nexon", None).await;
    assert_eq!(cache_header(&first), "MISS");
    let repeat = send(&h.router, Method::GET, "/api/search?q=nexon", None).await;
    assert_eq!(cache_header(&repeat), "HIT");

    let rebuilt = send(&h.router, Method::POST, "/api/search/invalidate", None).await;
    assert_eq!(rebuilt.status(), StatusCode::OK);
    assert!(
        h.store
            .keys()
            .iter()
            .all(|key| !key.starts_with("cache:v1:search:"))
    );

    let after = send(&h.router, Method::GET, "/api/search?q=nexon", None).await;
    assert_eq!(cache_header(&after), "MISS");
    let body = json_body(after).await;
    assert_eq!(body["source"], "memory");
}

#[tokio::test]
async fn health_reports_ready_store() {
    let h = harness().await;

    let response = send(&h.router, Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["active"], "primary");
}

#[tokio::test]
async fn requests_succeed_without_a_store() {
    let manager = ConnectionManager::new(ManagerConfig::default(), None, None);
    let catalog: Arc<dyn Catalog> = sample_catalog();
    let state = ApiState {
        catalog: catalog.clone(),
        cache: ResponseCache::new(CacheConfig::default(), manager.clone()),
        search: SearchIndex::new(SearchConfig::default(), manager.clone(), catalog),
        store: manager,
    };
    let router = build_router(state);

    let health = send(&router, Method::GET, "/health", None).await;
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);

    let brands = send(&router, Method::GET, "/api/brands", None).await;
    assert_eq!(brands.status(), StatusCode::OK);
    assert_eq!(cache_header(&brands), "BYPASS");

    let cache_health = send(&router, Method::GET, "/api/cache/health", None).await;
    assert_eq!(cache_health.status(), StatusCode::SERVICE_UNAVAILABLE);
}
