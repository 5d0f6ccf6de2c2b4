//! Memory governor wired into the service

use partwatch_extractor::memory::MemoryState;
use partwatch_extractor::service::wait_for_restart;
use partwatch_extractor::{ScrapeError, SiteRequest, SiteScrapeRequest};
use std::time::Duration;

mod common;
use common::{CallbackReceiver, FakeLauncher, FakeProbe, build_service, long_text, test_config};

#[tokio::test]
async fn test_task_skipped_when_over_hard_limit() {
    let launcher =
        FakeLauncher::new().with_page("http://127.0.0.1:9/p", "Part", &long_text("Part"));
    let probe = FakeProbe::at(100);
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        probe.clone(),
    );
    assert_eq!(service.governor().state(), MemoryState::Normal);

    probe.set(480);
    let err = service
        .extract_with_site("generic", SiteRequest::for_url("http://127.0.0.1:9/p"))
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::MemoryExhaustion { .. }));
    assert_eq!(launcher.launches(), 0);
    assert_eq!(service.governor().state(), MemoryState::Restarting);
    assert!(!service.health().accepting_requests);
    assert_eq!(service.status().requests.skipped_under_pressure, 1);
}

#[tokio::test]
async fn test_warning_state_keeps_accepting() {
    let launcher = FakeLauncher::new();
    let probe = FakeProbe::at(100);
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        probe.clone(),
    );

    probe.set(420);
    service.governor().sample("test");
    assert_eq!(service.governor().state(), MemoryState::Warning);
    assert!(service.governor().is_accepting());
    assert_eq!(service.health().status, "ok");
}

#[tokio::test]
async fn test_restart_supervisor_terminates_after_drain() {
    let launcher = FakeLauncher::new();
    let probe = FakeProbe::at(100);
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        probe.clone(),
    );

    let supervisor = tokio::spawn(wait_for_restart(service.clone()));
    probe.set(500);
    service.governor().sample("periodic");

    tokio::time::timeout(Duration::from_secs(2), supervisor)
        .await
        .expect("supervisor should finish")
        .unwrap();
    assert_eq!(service.governor().state(), MemoryState::Terminated);
}

#[tokio::test]
async fn test_restart_drains_accepted_job_callbacks() {
    let receiver = CallbackReceiver::start(1).await;
    let launcher = FakeLauncher::new()
        .holding(Duration::from_millis(200))
        .with_page("http://127.0.0.1:9/p", "Part", &long_text("Part"));
    let probe = FakeProbe::at(100);
    let mut config = test_config(&receiver.origin);
    config.callback.base_delay = Duration::from_millis(300);
    let service = build_service(config, &launcher, probe.clone());

    let request: SiteScrapeRequest = serde_json::from_value(serde_json::json!({
        "url": "http://127.0.0.1:9/p",
        "callbackUrl": receiver.url(),
        "jobId": "job-drain",
        "urlIndex": 0
    }))
    .unwrap();
    service.accept_site("generic", request).await.unwrap();
    assert_eq!(service.jobs_in_flight(), 1);

    // restart lands while the render is still holding the browser
    tokio::time::sleep(Duration::from_millis(50)).await;
    let supervisor = tokio::spawn(wait_for_restart(service.clone()));
    probe.set(500);
    service.governor().sample("periodic");

    tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .expect("supervisor should finish")
        .unwrap();

    assert_eq!(service.governor().state(), MemoryState::Terminated);
    assert_eq!(service.status().requests.callbacks_delivered, 1);
    assert_eq!(receiver.payloads().len(), 2);
    assert_eq!(service.jobs_in_flight(), 0);
}

#[tokio::test]
async fn test_repeated_launch_failures_force_restart() {
    let launcher = FakeLauncher::new().failing();
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        FakeProbe::at(100),
    );

    for attempt in 1..=3 {
        let result = service
            .extract_with_site("generic", SiteRequest::for_url("http://127.0.0.1:9/p"))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(service.governor().launch_failures(), attempt);
    }

    assert_eq!(service.governor().state(), MemoryState::Restarting);
    assert!(!service.governor().is_accepting());
    let err = service
        .extract_with_site("generic", SiteRequest::for_url("http://127.0.0.1:9/p"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::MemoryExhaustion { .. }));
}

#[tokio::test]
async fn test_successful_launch_clears_failure_count() {
    let launcher =
        FakeLauncher::new().with_page("http://127.0.0.1:9/p", "Part", &long_text("Part"));
    let service = build_service(
        test_config("https://app.example.com"),
        &launcher,
        FakeProbe::at(100),
    );
    service.governor().record_launch_failure();
    service.governor().record_launch_failure();

    let result = service
        .extract_with_site("generic", SiteRequest::for_url("http://127.0.0.1:9/p"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(service.governor().launch_failures(), 0);
    assert!(service.governor().is_accepting());
}
