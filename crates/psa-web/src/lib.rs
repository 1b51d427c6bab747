//! HTTP boundary for the product search engine.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use psa_core::{ErrorResponse, SourceFamily};
use psa_search::{SearchConfig, SearchEngine, SearchError};
use serde::Serialize;
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "psa-web";

const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const ALLOWED_METHODS: &str = "POST, GET, OPTIONS";

#[derive(Clone)]
pub struct AppState {
    pub engine: SearchEngine,
}

impl AppState {
    pub fn new(engine: SearchEngine) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRow {
    pub table: String,
    pub family: SourceFamily,
    pub display_name: String,
    pub enabled: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/search-products", post(search_handler).options(preflight_handler))
        .route("/sources", get(sources_handler))
        .route("/healthz", get(healthz_handler))
        .layer(middleware::map_response(cors_headers))
        .with_state(Arc::new(state))
}

pub async fn serve(engine: SearchEngine, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    tracing::info!(port, "search boundary listening");
    axum::serve(listener, app(AppState::new(engine))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SearchConfig::from_env()?;
    let engine = SearchEngine::from_config(&config).await?;
    serve(engine, config.web_port).await
}

async fn search_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.engine.handle_json(&body).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => search_error(err),
    }
}

async fn preflight_handler() -> Response {
    (
        StatusCode::OK,
        [(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS)],
    )
        .into_response()
}

async fn sources_handler(State(state): State<Arc<AppState>>) -> Json<Vec<SourceRow>> {
    let rows = state
        .engine
        .registry()
        .sources
        .iter()
        .map(|s| SourceRow {
            table: s.table.clone(),
            family: s.family,
            display_name: s.display_name.clone(),
            enabled: s.enabled,
        })
        .collect();
    Json(rows)
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    response
}

fn search_error(err: SearchError) -> Response {
    let status = if err.is_client_error() {
        tracing::debug!(error = %err, "rejected search request");
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %err, "search request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorResponse { error: err.to_string() })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use psa_core::SearchResponse;
    use psa_search::{SourceConfig, SourceRegistry};
    use psa_storage::{MemoryTableStore, Row};
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new(vec![
            SourceConfig::new("amazon_products_1", SourceFamily::Marketplace, "Amazon"),
            SourceConfig::new("fashion_1", SourceFamily::Fashion, "Fashion"),
        ])
    }

    fn test_app() -> Router {
        let store = MemoryTableStore::new()
            .with_table(
                "amazon_products_1",
                vec![
                    row(json!({"Unique ID": "a1", "Product Title": "Desk Lamp", "Category": "Home", "Price": 500, "Mrp": 1000})),
                    row(json!({"Unique ID": "a2", "Product Title": "Phone Case", "Category": "Mobiles", "Price": 199})),
                ],
            )
            .with_table(
                "fashion_1",
                vec![row(json!({"p_id": 7, "name": "Linen Shirt", "brand": "Fabindia", "price": 1499}))],
            );
        app(AppState::new(SearchEngine::new(Arc::new(store), registry())))
    }

    fn post_search(body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/search-products")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> JsonValue {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn search_returns_products_with_cors() {
        let resp = test_app()
            .oneshot(post_search(r#"{"searchTerm":"lamp","limit":5}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let json = body_json(resp).await;
        let parsed: SearchResponse = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(parsed.products.len(), 1);
        assert_eq!(parsed.products[0].offer.as_deref(), Some("50%"));
        assert!(json.get("suggestedProducts").is_none());
    }

    #[tokio::test]
    async fn empty_search_carries_suggestions() {
        let resp = test_app()
            .oneshot(post_search(r#"{"searchTerm":"zzzz-no-such-product-zzzz","limit":12,"offset":0}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["products"], json!([]));
        let suggested = json["suggestedProducts"].as_array().unwrap();
        assert!(!suggested.is_empty() && suggested.len() <= 8);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        for body in ["{not json", r#"{"limit":-3}"#, r#"{"sortBy":"cheapest"}"#] {
            let resp = test_app().oneshot(post_search(body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
            let json = body_json(resp).await;
            assert!(json["error"].as_str().is_some_and(|e| !e.is_empty()));
        }
    }

    #[tokio::test]
    async fn source_failure_is_a_server_error() {
        let mut sources = registry();
        sources
            .sources
            .push(SourceConfig::new("flipkart_1", SourceFamily::LargeRetailer, "Flipkart"));
        let app = app(AppState::new(SearchEngine::new(
            Arc::new(MemoryTableStore::new().with_table("amazon_products_1", vec![]).with_table("fashion_1", vec![])),
            sources,
        )));
        let resp = app.oneshot(post_search(r#"{"searchTerm":"lamp"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("flipkart_1"));
    }

    #[tokio::test]
    async fn preflight_answers_with_cors_headers() {
        let resp = test_app()
            .oneshot(
                axum::http::Request::builder()
                    .method("OPTIONS")
                    .uri("/search-products")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOWED_HEADERS);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn sources_and_health_endpoints() {
        let resp = test_app()
            .oneshot(axum::http::Request::builder().uri("/sources").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json[0]["table"], "amazon_products_1");
        assert_eq!(json[1]["family"], "fashion");
        assert_eq!(json[1]["displayName"], "Fashion");

        let health = test_app()
            .oneshot(axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
