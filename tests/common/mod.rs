//! Test utilities shared by the integration suites
//!
//! Scripted browser sessions, a scripted memory probe and a throw-away
//! callback receiver, so the service runs end to end without Chrome.

use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use partwatch_extractor::config::ServiceConfig;
use partwatch_extractor::memory::{MemoryProbe, MemoryReading};
use partwatch_extractor::render_engine::{
    BrowserSession, NavigationOutcome, PageText, PendingRequest, SessionLauncher, SessionOptions,
};
use partwatch_extractor::{ExtractionService, UrlGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// Creates a test HTML document with specified content
#[allow(dead_code)]
pub fn create_test_html(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{}</title>
</head>
<body>
    {}
</body>
</html>"#,
        html_escape::encode_text(title),
        body
    )
}

/// Enough prose to pass every minimum-length check
#[allow(dead_code)]
pub fn long_text(topic: &str) -> String {
    format!(
        "{topic}. This product has been discontinued and is no longer available for order. \
         The recommended replacement offers the same mounting dimensions, electrical ratings \
         and communication interface. Contact your local sales office for migration support \
         and remaining stock information."
    )
}

#[derive(Default)]
struct LaunchLog {
    options: Vec<SessionOptions>,
    urls: Vec<String>,
    searches: Vec<String>,
}

/// How a fake page misbehaves
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum PageScript {
    /// Navigation reports a timeout with one request still open
    SlowNavigation,
    /// Extraction sleeps this long before answering
    HangingExtract(Duration),
    /// Extraction fails outright
    BrokenExtract,
}

/// Scripted browser: pages are looked up by URL
#[derive(Clone)]
pub struct FakeLauncher {
    pages: Arc<Mutex<HashMap<String, PageText>>>,
    scripts: Arc<Mutex<HashMap<String, PageScript>>>,
    log: Arc<Mutex<LaunchLog>>,
    open: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    launches: Arc<AtomicUsize>,
    hold: Duration,
    fail_launch: bool,
}

#[allow(dead_code)]
impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            pages: Arc::default(),
            scripts: Arc::default(),
            log: Arc::default(),
            open: Arc::default(),
            max_open: Arc::default(),
            launches: Arc::default(),
            hold: Duration::from_millis(0),
            fail_launch: false,
        }
    }

    /// Keep each navigation busy for `hold`
    pub fn holding(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn with_page(self, url: &str, title: &str, text: &str) -> Self {
        self.pages.lock().insert(
            url.to_string(),
            PageText {
                title: Some(title.to_string()),
                text: text.to_string(),
            },
        );
        self
    }

    pub fn scripted(self, url: &str, script: PageScript) -> Self {
        self.scripts.lock().insert(url.to_string(), script);
        self
    }

    fn script_for(&self, url: &str) -> Option<PageScript> {
        self.scripts.lock().get(url).cloned()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.log.lock().urls.clone()
    }

    pub fn searches(&self) -> Vec<String> {
        self.log.lock().searches.clone()
    }

    pub fn launch_options(&self) -> Vec<SessionOptions> {
        self.log.lock().options.clone()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self, options: SessionOptions) -> Result<Box<dyn BrowserSession>> {
        if self.fail_launch {
            bail!("chrome exited with status 127");
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        self.log.lock().options.push(options);

        Ok(Box::new(FakeSession {
            launcher: self.clone(),
            current: None,
        }))
    }
}

struct FakeSession {
    launcher: FakeLauncher,
    current: Option<String>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<NavigationOutcome> {
        self.launcher.log.lock().urls.push(url.to_string());
        if !self.launcher.hold.is_zero() {
            tokio::time::sleep(self.launcher.hold).await;
        }
        self.current = Some(url.to_string());
        match self.launcher.script_for(url) {
            Some(PageScript::SlowNavigation) => Ok(NavigationOutcome::TimedOut {
                pending: vec![PendingRequest {
                    url: format!("{url}/tracker.js"),
                    resource_type: "script".to_string(),
                    elapsed: Duration::from_secs(2),
                }],
            }),
            _ => Ok(NavigationOutcome::Loaded),
        }
    }

    async fn fill_and_submit(
        &mut self,
        _input_selector: &str,
        value: &str,
        _submit_selector: Option<&str>,
        _timeout: Duration,
    ) -> Result<()> {
        self.launcher.log.lock().searches.push(value.to_string());
        Ok(())
    }

    async fn extract(&mut self) -> Result<PageText> {
        let url = self.current.clone().unwrap_or_default();
        match self.launcher.script_for(&url) {
            Some(PageScript::HangingExtract(delay)) => tokio::time::sleep(delay).await,
            Some(PageScript::BrokenExtract) => bail!("Execution context was destroyed"),
            _ => {}
        }
        Ok(self
            .launcher
            .pages
            .lock()
            .get(&url)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_url(&mut self) -> Option<String> {
        self.current.clone()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.launcher.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory probe reporting a settable RSS
#[derive(Default)]
pub struct FakeProbe {
    rss_mb: AtomicU64,
}

#[allow(dead_code)]
impl FakeProbe {
    pub fn at(rss_mb: u64) -> Arc<Self> {
        Arc::new(Self {
            rss_mb: AtomicU64::new(rss_mb),
        })
    }

    pub fn set(&self, rss_mb: u64) {
        self.rss_mb.store(rss_mb, Ordering::SeqCst);
    }
}

impl MemoryProbe for FakeProbe {
    fn read(&self) -> MemoryReading {
        MemoryReading::from_mb(self.rss_mb.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Default)]
struct ReceiverState {
    hits: Arc<Mutex<Vec<(Instant, serde_json::Value)>>>,
    fail_first: usize,
}

/// Local HTTP endpoint that records callbacks
pub struct CallbackReceiver {
    pub origin: String,
    state: ReceiverState,
}

#[allow(dead_code)]
impl CallbackReceiver {
    /// Start a receiver that answers 500 to the first `fail_first` hits
    pub async fn start(fail_first: usize) -> Self {
        let state = ReceiverState {
            hits: Arc::default(),
            fail_first,
        };
        let app = Router::new()
            .route("/callback", post(receive))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await });

        Self {
            origin: format!("http://127.0.0.1:{port}"),
            state,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/callback", self.origin)
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.state.hits.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn hit_times(&self) -> Vec<Instant> {
        self.state.hits.lock().iter().map(|(t, _)| *t).collect()
    }

    /// Poll until `count` hits arrived or `timeout` passed
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.state.hits.lock().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.state.hits.lock().len() >= count
    }
}

async fn receive(
    State(state): State<ReceiverState>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let count = {
        let mut hits = state.hits.lock();
        hits.push((Instant::now(), payload));
        hits.len()
    };
    if count <= state.fail_first {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

/// Fast settings for local fixtures on 127.0.0.1
#[allow(dead_code)]
pub fn test_config(callback_origin: &str) -> ServiceConfig {
    ServiceConfig::builder()
        .allowed_callback_origins([callback_origin])
        .allow_host("127.0.0.1")
        .resolve_dns(false)
        .html_timeout(Duration::from_secs(2))
        .pdf_timeout(Duration::from_secs(5))
        .settle_delay(Duration::from_millis(10))
        .challenge_settle_delay(Duration::from_millis(10))
        .navigation_timeout(Duration::from_secs(2))
        .extraction_timeout(Duration::from_secs(1))
        .startup_timeout(Duration::from_secs(2))
        .callback_base_delay(Duration::from_millis(50))
        .callback_restart_extra_delay(Duration::from_millis(10))
        .exit_grace(Duration::from_millis(10))
        .build()
        .unwrap()
}

#[allow(dead_code)]
pub fn build_service(
    config: ServiceConfig,
    launcher: &FakeLauncher,
    probe: Arc<FakeProbe>,
) -> Arc<ExtractionService> {
    let guard = Arc::new(UrlGuard::new(&config.guard));
    ExtractionService::with_parts(config, guard, Arc::new(launcher.clone()), probe).unwrap()
}
