//! End-to-end job flow: validation, fast path, browser fallback, callback

use partwatch_extractor::{ExtractionMethod, ScrapeError, ScrapeRequest, SiteScrapeRequest};
use std::time::Duration;

mod common;
use common::{CallbackReceiver, FakeLauncher, FakeProbe, build_service, long_text, test_config};

fn request(url: String, callback: String) -> ScrapeRequest {
    ScrapeRequest {
        url,
        callback_url: callback,
        job_id: "job-7".into(),
        url_index: 1,
        title: Some("Search hit".into()),
        snippet: Some("E3Z-D61 photoelectric".into()),
    }
}

#[tokio::test]
async fn test_not_found_page_ends_as_error_placeholder() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/404")
        .with_status(404)
        .with_body("<html><body>Not here</body></html>")
        .create_async()
        .await;
    let url = format!("{}/404", server.url());

    let receiver = CallbackReceiver::start(0).await;
    let launcher = FakeLauncher::new().with_page(
        &url,
        "Example",
        "Page Not Found. The page you are looking for does not exist.",
    );
    let service = build_service(test_config(&receiver.origin), &launcher, FakeProbe::at(100));

    let accepted = service.accept(request(url.clone(), receiver.url())).await.unwrap();
    assert_eq!(accepted.status, "queued");
    assert_eq!(accepted.job_id, "job-7");

    assert!(receiver.wait_for(1, Duration::from_secs(5)).await);
    let payload = &receiver.payloads()[0];
    let content = payload["content"].as_str().unwrap();
    assert!(content.starts_with("[could not be scraped"), "{content}");
    assert!(!content.contains("<html>"));
    assert_eq!(payload["url"], url.as_str());
    assert_eq!(payload["snippet"], "E3Z-D61 photoelectric");
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_large_pdf_never_reaches_browser() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/catalog.pdf")
        .with_status(200)
        .with_header("content-type", "application/pdf")
        .with_body(vec![b'%'; 25 * 1024 * 1024])
        .create_async()
        .await;
    let url = format!("{}/catalog.pdf", server.url());

    let receiver = CallbackReceiver::start(0).await;
    let launcher = FakeLauncher::new();
    let service = build_service(test_config(&receiver.origin), &launcher, FakeProbe::at(100));

    service.accept(request(url, receiver.url())).await.unwrap();
    assert!(receiver.wait_for(1, Duration::from_secs(5)).await);

    assert_eq!(receiver.payloads()[0]["content"], "[PDF too large (25.0 MB)]");
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_launch_failure_still_delivers_callback() {
    let receiver = CallbackReceiver::start(0).await;
    let launcher = FakeLauncher::new().failing();
    let service = build_service(test_config(&receiver.origin), &launcher, FakeProbe::at(100));

    let site_request: SiteScrapeRequest = serde_json::from_value(serde_json::json!({
        "url": "http://127.0.0.1:9/product",
        "callbackUrl": receiver.url(),
        "jobId": "job-9",
        "urlIndex": 0
    }))
    .unwrap();
    service.accept_site("generic", site_request).await.unwrap();

    assert!(receiver.wait_for(1, Duration::from_secs(5)).await);
    let content = receiver.payloads()[0]["content"].as_str().unwrap().to_string();
    assert!(content.starts_with("[could not be scraped: browser failed to start"), "{content}");

    // the counter moves once the 200 reaches the dispatcher
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while service.status().requests.callbacks_delivered == 0
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.status().requests.callbacks_delivered, 1);
}

#[tokio::test]
async fn test_unsafe_urls_rejected_at_boundary() {
    let receiver = CallbackReceiver::start(0).await;
    let launcher = FakeLauncher::new();
    let service = build_service(test_config(&receiver.origin), &launcher, FakeProbe::at(100));

    let err = service
        .accept(request("http://169.254.169.254/latest".into(), receiver.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::Validation(_)));

    let err = service
        .accept(request(
            "https://example.com/".into(),
            "https://attacker.example.net/cb".into(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::Validation(_)));
    assert_eq!(service.status().requests.received, 0);
}

#[tokio::test]
async fn test_fallback_strategy_uses_second_url_after_marker() {
    let receiver = CallbackReceiver::start(0).await;
    let launcher = FakeLauncher::new()
        .with_page(
            "http://127.0.0.1:9/primary",
            "Search",
            &format!("No products match your search. {}", long_text("Other items")),
        )
        .with_page(
            "http://127.0.0.1:9/fallback",
            "E3Z-D61",
            &long_text("E3Z-D61"),
        );
    let service = build_service(test_config(&receiver.origin), &launcher, FakeProbe::at(100));

    let site_request: SiteScrapeRequest = serde_json::from_value(serde_json::json!({
        "primaryUrl": "http://127.0.0.1:9/primary",
        "fallbackUrl": "http://127.0.0.1:9/fallback",
        "callbackUrl": receiver.url(),
        "jobId": "job-omron",
        "urlIndex": 4
    }))
    .unwrap();
    service.accept_site("omron", site_request).await.unwrap();

    assert!(receiver.wait_for(1, Duration::from_secs(5)).await);
    let payload = &receiver.payloads()[0];
    assert!(payload["content"].as_str().unwrap().contains("E3Z-D61"));
    assert_eq!(payload["urlIndex"], 4);
    assert_eq!(
        launcher.visited(),
        vec!["http://127.0.0.1:9/primary", "http://127.0.0.1:9/fallback"]
    );
    assert_eq!(launcher.max_concurrent(), 1);
}

#[tokio::test]
async fn test_search_strategy_types_model() {
    let launcher = FakeLauncher::new().with_page(
        "http://127.0.0.1:9/search",
        "FX3U-32MR",
        &long_text("FX3U-32MR"),
    );
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        FakeProbe::at(100),
    );

    let request = partwatch_extractor::SiteRequest {
        url: Some("http://127.0.0.1:9/search".into()),
        model: Some("FX3U-32MR".into()),
        ..Default::default()
    };
    let result = service.extract_with_site("mitsubishi", request).await.unwrap();
    assert!(result.success);
    assert_eq!(result.method, ExtractionMethod::Site("mitsubishi".into()));
    assert_eq!(launcher.searches(), vec!["FX3U-32MR"]);
}

#[tokio::test]
async fn test_batch_mixes_fast_path_and_rejections() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/notice.txt")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body(long_text("Notice"))
        .create_async()
        .await;

    let launcher = FakeLauncher::new();
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        FakeProbe::at(100),
    );

    let results = service
        .extract_batch(vec![
            format!("{}/notice.txt", server.url()),
            "http://10.0.0.5/".into(),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert_eq!(results[0].method, ExtractionMethod::FastFetch);
    assert!(!results[1].success);
    assert!(results[1].content.starts_with("[could not be scraped"));
    assert_eq!(launcher.launches(), 0);

    let too_many = service.extract_batch(vec!["https://example.com".into(); 11]).await;
    assert!(matches!(too_many, Err(ScrapeError::Validation(_))));
}
