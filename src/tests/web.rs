//! HTTP surface tests, driven through the router without a listener.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::config::OwnerToken;
use crate::items::{BackendCsv, CatalogStore};
use crate::tests::{create_app_with_config, test_config, MockProvider};
use crate::web;

fn test_router(
    provider: Arc<MockProvider>,
) -> (axum::Router, Arc<BackendCsv>, tempfile::TempDir) {
    let mut config = test_config();
    config.tokens.push(OwnerToken {
        token: "token-a".into(),
        owner: "owner-a".into(),
    });

    let (app, store, tmp) = create_app_with_config(provider, config);
    let shared = Arc::new(web::SharedState {
        app: Arc::new(tokio::sync::RwLock::new(app)),
    });

    (web::api_router(shared), store, tmp)
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, token: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn sofa_body() -> Value {
    json!({
        "img_url": "https://example.com/sofa.jpg",
        "title": "Green Velvet Sofa",
        "vendor": "Maker & Son",
        "category": "Furniture",
        "price": 1850.0,
        "currency": "USD",
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_without_a_valid_token_are_rejected() {
    let (router, _store, _tmp) = test_router(Arc::new(MockProvider::failing()));

    let (status, body) = send(&router, get("/api/items", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&router, get("/api/items", Some("wrong-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_then_keyword_search() {
    let (router, _store, _tmp) = test_router(Arc::new(MockProvider::failing()));

    let (status, created) =
        send(&router, send_json("POST", "/api/items", "token-a", &sofa_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["id"].is_string());
    // the response is the bare entry, never an embedding
    assert!(created.get("embedding").is_none());

    let (status, body) = send(
        &router,
        get("/api/items?query=sofa&semantic=false", Some("token-a")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["searchType"], "keyword");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["title"], "Green Velvet Sofa");
    assert!(body["items"][0].get("score").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn semantic_search_over_http() {
    let provider = Arc::new(MockProvider::fixed(vec![1.0, 0.0, 0.0]));
    let (router, store, _tmp) = test_router(provider);

    let (_, created) =
        send(&router, send_json("POST", "/api/items", "token-a", &sofa_body())).await;
    let id = created["id"].as_str().unwrap().into();
    store
        .update_embedding(&id, 1, vec![1.0, 0.0, 0.0])
        .unwrap();

    let (status, body) = send(
        &router,
        get("/api/items?query=plush%20green%20couch", Some("token-a")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["searchType"], "semantic");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["score"].as_f64(), Some(1.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn patch_marks_the_embedding_stale() {
    let (router, store, _tmp) = test_router(Arc::new(MockProvider::failing()));

    let (_, created) =
        send(&router, send_json("POST", "/api/items", "token-a", &sofa_body())).await;
    let id = created["id"].as_str().unwrap().into();
    store
        .update_embedding(&id, 1, vec![1.0, 0.0, 0.0])
        .unwrap();

    let (status, updated) = send(
        &router,
        send_json(
            "PATCH",
            &format!("/api/items/{id}"),
            "token-a",
            &json!({ "title": "Emerald Chaise" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "Emerald Chaise");
    // textual edit dropped the stored embedding
    assert_eq!(store.embedding_hash(&id).unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_removes_the_item() {
    let (router, _store, _tmp) = test_router(Arc::new(MockProvider::failing()));

    let (_, created) =
        send(&router, send_json("POST", "/api/items", "token-a", &sofa_body())).await;
    let id = created["id"].as_str().unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/items/{id}"))
        .header("authorization", "Bearer token-a")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&router, get("/api/items", Some("token-a"))).await;
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_items_are_404() {
    let (router, _store, _tmp) = test_router(Arc::new(MockProvider::failing()));

    let (status, _) = send(
        &router,
        send_json(
            "PATCH",
            "/api/items/01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "token-a",
            &json!({ "title": "ghost" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_filters_are_400() {
    let (router, _store, _tmp) = test_router(Arc::new(MockProvider::failing()));

    let (status, body) = send(
        &router,
        get("/api/items?price_max=-3", Some("token-a")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid filter"));
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_ok() {
    let (router, _store, _tmp) = test_router(Arc::new(MockProvider::failing()));

    let (status, body) = send(&router, get("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
