//! Single-flight behaviour of browser work

use futures::future::join_all;
use partwatch_extractor::SiteRequest;
use std::time::Duration;

mod common;
use common::{FakeLauncher, FakeProbe, build_service, long_text, test_config};

#[tokio::test]
async fn test_concurrent_renders_never_overlap() {
    let mut launcher = FakeLauncher::new().holding(Duration::from_millis(40));
    for i in 0..4 {
        launcher = launcher.with_page(
            &format!("http://127.0.0.1:9/part/{i}"),
            "Part",
            &long_text(&format!("Part {i}")),
        );
    }
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        FakeProbe::at(100),
    );

    let jobs = (0..4).map(|i| {
        let service = service.clone();
        async move {
            service
                .extract_with_site(
                    "generic",
                    SiteRequest::for_url(format!("http://127.0.0.1:9/part/{i}")),
                )
                .await
        }
    });
    let results = join_all(jobs).await;

    for result in &results {
        let result = result.as_ref().unwrap();
        assert!(result.success, "unexpected placeholder: {}", result.content);
    }
    assert_eq!(launcher.launches(), 4);
    assert_eq!(launcher.max_concurrent(), 1);
    assert_eq!(launcher.open_sessions(), 0);
}

#[tokio::test]
async fn test_failed_render_does_not_block_next() {
    let launcher = FakeLauncher::new().with_page(
        "http://127.0.0.1:9/ok",
        "Spec",
        &long_text("Spec sheet"),
    );
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        FakeProbe::at(100),
    );

    // no page registered: the session extracts nothing
    let empty = service
        .extract_with_site("generic", SiteRequest::for_url("http://127.0.0.1:9/empty"))
        .await
        .unwrap();
    assert!(!empty.success);
    assert!(empty.content.starts_with("[insufficient content: only 0 characters"));

    let ok = service
        .extract_with_site("generic", SiteRequest::for_url("http://127.0.0.1:9/ok"))
        .await
        .unwrap();
    assert!(ok.success);
    assert_eq!(service.queue().snapshot().queued, 0);
}
