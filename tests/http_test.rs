//! Router behavior: auth, health, error mapping

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use partwatch_extractor::http::{API_KEY_HEADER, AppState, AuthState, create_router};
use partwatch_extractor::ExtractionService;
use std::sync::Arc;
use tower::ServiceExt;

mod common;
use common::{FakeLauncher, FakeProbe, build_service, test_config};

const SECRET: &str = "s3cret";

fn router(probe_mb: u64) -> (axum::Router, Arc<ExtractionService>, Arc<FakeProbe>) {
    let probe = FakeProbe::at(probe_mb);
    let service = build_service(
        test_config("https://app.example.com"),
        &FakeLauncher::new(),
        probe.clone(),
    );
    let router = create_router(
        AppState {
            service: Arc::clone(&service),
        },
        AuthState::new(Some(SECRET.to_string())),
    );
    (router, service, probe)
}

fn post_json(uri: &str, body: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

const SCRAPE_BODY: &str = r#"{
    "url": "https://example.com/product",
    "callbackUrl": "https://app.example.com/hook",
    "jobId": "job-1",
    "urlIndex": 0
}"#;

#[tokio::test]
async fn test_scrape_requires_api_key() {
    let (router, _, _) = router(100);

    let response = router
        .clone()
        .oneshot(post_json("/scrape", SCRAPE_BODY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(post_json("/scrape", SCRAPE_BODY, Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_scrape_accepted_with_key() {
    let (router, _, _) = router(100);
    let response = router
        .oneshot(post_json("/scrape", SCRAPE_BODY, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["jobId"], "job-1");
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let (router, _, _) = router(100);
    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["acceptingRequests"], true);
}

#[tokio::test]
async fn test_restarting_returns_503_with_retry_after() {
    let (router, service, probe) = router(100);
    probe.set(480);
    service.governor().sample("periodic");

    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "restarting");

    let response = router
        .oneshot(post_json("/scrape", SCRAPE_BODY, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(body_json(response).await["code"], "memory_exhaustion");
}

#[tokio::test]
async fn test_site_routes_follow_registry() {
    let (router, _, _) = router(100);
    let body = r#"{
        "primaryUrl": "https://www.example.com/omron",
        "callbackUrl": "https://app.example.com/hook",
        "jobId": "job-2",
        "urlIndex": 3
    }"#;

    let response = router
        .clone()
        .oneshot(post_json("/scrape-omron", body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = router
        .oneshot(post_json("/scrape-siemens", body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let (router, _, _) = router(100);
    let response = router
        .oneshot(post_json("/scrape", "{\"url\": 5", Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "validation_error");
}
