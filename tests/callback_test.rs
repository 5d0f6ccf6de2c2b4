//! Callback retry and backoff against a local receiver

use partwatch_extractor::config::{CallbackConfig, GuardConfig};
use partwatch_extractor::{CallbackDispatcher, CallbackPayload, ScrapeError, UrlGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

mod common;
use common::CallbackReceiver;

fn dispatcher(origin: &str) -> (CallbackDispatcher, watch::Sender<bool>) {
    let guard = UrlGuard::new(&GuardConfig {
        allowed_callback_origins: vec![origin.to_string()],
        ..GuardConfig::default()
    });
    let (restart_tx, restart_rx) = watch::channel(false);
    let dispatcher = CallbackDispatcher::new(
        CallbackConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            restart_extra_delay: Duration::from_millis(50),
            request_timeout: Duration::from_secs(2),
        },
        Arc::new(guard),
        restart_rx,
    )
    .unwrap();
    (dispatcher, restart_tx)
}

fn payload() -> CallbackPayload {
    CallbackPayload {
        job_id: "job-42".into(),
        url_index: 3,
        content: "Discontinued in 2021".into(),
        title: Some("E3Z".into()),
        snippet: None,
        url: "https://example.com/e3z".into(),
    }
}

#[tokio::test]
async fn test_fails_twice_then_succeeds() {
    let receiver = CallbackReceiver::start(2).await;
    let (dispatcher, _restart) = dispatcher(&receiver.origin);

    let report = dispatcher.deliver(&receiver.url(), &payload()).await.unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(
        report.delays,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );

    let times = receiver.hit_times();
    assert_eq!(times.len(), 3);
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_millis(100));
    assert!(second_gap >= Duration::from_millis(200));
    assert!(second_gap > first_gap);

    let body = &receiver.payloads()[2];
    assert_eq!(body["jobId"], "job-42");
    assert_eq!(body["urlIndex"], 3);
    assert_eq!(body["content"], "Discontinued in 2021");
    assert!(body["snippet"].is_null());
}

#[tokio::test]
async fn test_exhausted_retries_surface_error() {
    let receiver = CallbackReceiver::start(10).await;
    let (dispatcher, _restart) = dispatcher(&receiver.origin);

    let err = dispatcher
        .deliver(&receiver.url(), &payload())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScrapeError::CallbackDelivery { attempts: 3, ref message } if message == "HTTP 500"
    ));
    assert_eq!(receiver.payloads().len(), 3);
}

#[tokio::test]
async fn test_restart_adds_extra_delay() {
    let receiver = CallbackReceiver::start(1).await;
    let (dispatcher, restart) = dispatcher(&receiver.origin);
    restart.send_replace(true);

    let report = dispatcher.deliver(&receiver.url(), &payload()).await.unwrap();
    assert_eq!(report.delays, vec![Duration::from_millis(150)]);
}
