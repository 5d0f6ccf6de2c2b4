//! Service context
//!
//! One `ExtractionService` owns every collaborator and counter. Handlers
//! receive it through axum state; tests build isolated instances with fake
//! launchers and probes.

pub mod lifecycle;
pub mod types;

pub use lifecycle::{ShutdownReason, wait_for_restart, wait_for_shutdown};
pub use types::{
    AcceptedResponse, BatchRequest, BatchResponse, ExtractionMethod, ExtractionResult,
    HealthReport, MemoryFigures, RequestCounts, ScrapeRequest, SiteScrapeRequest, StatusReport,
};

use anyhow::Context;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::callback::{CallbackDispatcher, CallbackPayload};
use crate::config::ServiceConfig;
use crate::error::{ScrapeError, ScrapeResult};
use crate::fast_fetch::{FastFetcher, FetchOutcome};
use crate::memory::{MemoryGovernor, MemoryProbe, ProcessProbe};
use crate::proxy::ProxySource;
use crate::render_engine::content_check::memory_pressure_placeholder;
use crate::render_engine::{
    ChromiumLauncher, LaunchTally, RenderEngine, RenderOutput, SessionLauncher,
};
use crate::scheduler::BrowserQueue;
use crate::site_strategy::{SiteRegistry, SiteRequest, SiteStrategy};
use crate::url_guard::UrlGuard;

#[derive(Debug, Default)]
struct ServiceStats {
    received: AtomicU64,
    completed: AtomicU64,
    callbacks_delivered: AtomicU64,
    callbacks_failed: AtomicU64,
    fast_path: AtomicU64,
    browser_renders: AtomicU64,
    skipped: AtomicU64,
}

impl ServiceStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RequestCounts {
        RequestCounts {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            callbacks_delivered: self.callbacks_delivered.load(Ordering::Relaxed),
            callbacks_failed: self.callbacks_failed.load(Ordering::Relaxed),
            fast_path: self.fast_path.load(Ordering::Relaxed),
            browser_renders: self.browser_renders.load(Ordering::Relaxed),
            skipped_under_pressure: self.skipped.load(Ordering::Relaxed),
            in_flight: 0,
        }
    }
}

/// Placeholder for a request that failed before producing any text
fn error_placeholder(err: &ScrapeError) -> String {
    match err {
        ScrapeError::MemoryExhaustion { .. } => memory_pressure_placeholder(),
        other => format!("[could not be scraped: {other}]"),
    }
}

pub struct ExtractionService {
    config: Arc<ServiceConfig>,
    guard: Arc<UrlGuard>,
    fetcher: FastFetcher,
    engine: RenderEngine,
    registry: SiteRegistry,
    queue: BrowserQueue,
    governor: Arc<MemoryGovernor>,
    dispatcher: CallbackDispatcher,
    stats: ServiceStats,
    /// Accepted jobs, from intake until their callback settles
    jobs: TaskTracker,
    started_at: Instant,
    _queue_worker: JoinHandle<()>,
}

impl std::fmt::Debug for ExtractionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionService")
            .field("registry", &self.registry)
            .field("queue", &self.queue)
            .field("governor", &self.governor)
            .finish_non_exhaustive()
    }
}

impl ExtractionService {
    /// Production wiring: Chromium sessions and `/proc` memory readings
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when an HTTP client cannot be built or site overrides cannot be loaded.
    pub fn from_config(config: ServiceConfig) -> anyhow::Result<Arc<Self>> {
        let guard = Arc::new(UrlGuard::new(&config.guard));
        let launcher = Arc::new(ChromiumLauncher::new(config.browser.clone(), guard.clone()));
        Self::with_parts(config, guard, launcher, Arc::new(ProcessProbe))
    }

    /// Wiring with explicit collaborators
    ///
    /// # Errors
    ///
    /// Fails when an HTTP client cannot be built or site overrides cannot be loaded.
    pub fn with_parts(
        config: ServiceConfig,
        guard: Arc<UrlGuard>,
        launcher: Arc<dyn SessionLauncher>,
        probe: Arc<dyn MemoryProbe>,
    ) -> anyhow::Result<Arc<Self>> {
        let fetcher = FastFetcher::new(&config.fetch, guard.clone())?;
        let engine = RenderEngine::new(launcher, config.browser.clone(), guard.clone());

        let mut registry = SiteRegistry::with_builtins(
            config.browser.block_policy,
            ProxySource::new(config.proxy.clone()),
        );
        if let Some(path) = &config.site_strategies_path {
            let loaded = registry
                .load_overrides(path)
                .with_context(|| format!("Invalid site strategies file {}", path.display()))?;
            info!(loaded, path = %path.display(), "Loaded site strategy overrides");
        }

        let governor = Arc::new(MemoryGovernor::new(config.memory.clone(), probe));
        let dispatcher =
            CallbackDispatcher::new(config.callback.clone(), guard.clone(), governor.subscribe())?;
        let (queue, queue_worker) = BrowserQueue::start();

        governor.sample("startup");

        Ok(Arc::new(Self {
            config: Arc::new(config),
            guard,
            fetcher,
            engine,
            registry,
            queue,
            governor,
            dispatcher,
            stats: ServiceStats::default(),
            jobs: TaskTracker::new(),
            started_at: Instant::now(),
            _queue_worker: queue_worker,
        }))
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<UrlGuard> {
        &self.guard
    }

    #[must_use]
    pub fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.governor
    }

    #[must_use]
    pub fn queue(&self) -> &BrowserQueue {
        &self.queue
    }

    #[must_use]
    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    /// Accepted jobs whose callback has not settled yet
    #[must_use]
    pub fn jobs_in_flight(&self) -> usize {
        self.jobs.len()
    }

    /// Wait for accepted jobs (callbacks and their retries included) and
    /// any synchronous browser work, up to `timeout`
    ///
    /// Closes the tracker, so call it only once intake has stopped.
    /// Returns `false` if work was still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        self.jobs.close();
        let jobs_done = tokio::time::timeout_at(deadline, self.jobs.wait())
            .await
            .is_ok();
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        jobs_done && self.queue.wait_idle(remaining).await
    }

    /// Validate a `/scrape` request and run it in the background
    ///
    /// # Errors
    ///
    /// `MemoryExhaustion` while restarting, `Validation` for unsafe URLs or a missing job id.
    pub async fn accept(self: &Arc<Self>, request: ScrapeRequest) -> ScrapeResult<AcceptedResponse> {
        self.governor.ensure_accepting()?;
        validate_job_id(&request.job_id)?;
        self.guard.ensure_target(&request.url).await?;
        self.guard.ensure_callback(&request.callback_url)?;

        ServiceStats::bump(&self.stats.received);
        info!(job_id = %request.job_id, url_index = request.url_index, url = %request.url, "Accepted scrape job");

        let accepted = AcceptedResponse::queued(&request.job_id, request.url_index);
        let service = Arc::clone(self);
        self.jobs.spawn(async move { service.run_job(request).await });
        Ok(accepted)
    }

    /// Validate a `/scrape-<site>` request and run it in the background
    ///
    /// # Errors
    ///
    /// `UnknownSite`, `MemoryExhaustion`, or `Validation` when the strategy
    /// cannot plan the request or a planned URL is unsafe.
    pub async fn accept_site(
        self: &Arc<Self>,
        site: &str,
        request: SiteScrapeRequest,
    ) -> ScrapeResult<AcceptedResponse> {
        let strategy = self.registry.get(site)?;
        self.governor.ensure_accepting()?;
        validate_job_id(&request.job_id)?;
        for attempt in strategy.prepare(&request.site)? {
            self.guard.ensure_target(&attempt.url).await?;
        }
        self.guard.ensure_callback(&request.callback_url)?;

        ServiceStats::bump(&self.stats.received);
        info!(job_id = %request.job_id, url_index = request.url_index, site = strategy.name(), "Accepted site scrape job");

        let accepted = AcceptedResponse::queued(&request.job_id, request.url_index);
        let service = Arc::clone(self);
        self.jobs.spawn(async move { service.run_site_job(strategy, request).await });
        Ok(accepted)
    }

    async fn run_job(self: Arc<Self>, request: ScrapeRequest) {
        let result = match self.extract(&request.url).await {
            Ok(result) => result,
            Err(e) => {
                warn!(job_id = %request.job_id, url_index = request.url_index, "Extraction failed: {e}");
                ExtractionResult::placeholder(&request.url, error_placeholder(&e), ExtractionMethod::None)
            }
        };

        let payload = CallbackPayload {
            job_id: request.job_id,
            url_index: request.url_index,
            content: result.content,
            title: result.title.or(request.title),
            snippet: request.snippet,
            url: request.url,
        };
        self.finish_job(&request.callback_url, payload).await;
    }

    async fn run_site_job(self: Arc<Self>, strategy: Arc<dyn SiteStrategy>, request: SiteScrapeRequest) {
        let label = format!("{}:{}", strategy.name(), request.job_id);
        let result = match self.render_queued(strategy, request.site.clone(), label).await {
            Ok(output) => {
                let url = request
                    .site
                    .display_url()
                    .map_or_else(|| output.final_url.clone(), str::to_string);
                Self::render_result(&url, output, true)
            }
            Err(e) => {
                warn!(job_id = %request.job_id, url_index = request.url_index, "Site extraction failed: {e}");
                ExtractionResult::placeholder(
                    request.site.display_url().unwrap_or_default(),
                    error_placeholder(&e),
                    ExtractionMethod::None,
                )
            }
        };

        let url = result
            .final_url
            .clone()
            .unwrap_or_else(|| result.url.clone());
        let payload = CallbackPayload {
            job_id: request.job_id,
            url_index: request.url_index,
            content: result.content,
            title: result.title.or(request.title),
            snippet: request.snippet,
            url,
        };
        self.finish_job(&request.callback_url, payload).await;
    }

    async fn finish_job(&self, callback_url: &str, payload: CallbackPayload) {
        ServiceStats::bump(&self.stats.completed);
        match self.dispatcher.deliver(callback_url, &payload).await {
            Ok(report) => {
                ServiceStats::bump(&self.stats.callbacks_delivered);
                debug!(job_id = %payload.job_id, attempts = report.attempts, "Job finished");
            }
            Err(e) => {
                ServiceStats::bump(&self.stats.callbacks_failed);
                error!(
                    job_id = %payload.job_id,
                    url_index = payload.url_index,
                    code = e.code(),
                    "Result could not be delivered: {e}"
                );
            }
        }
    }

    /// Fast path first, generic browser render when it yields nothing
    ///
    /// # Errors
    ///
    /// `MemoryExhaustion` when the browser task was skipped, `SchedulerClosed`
    /// or `TaskPanicked` from the queue, `Validation` for unsafe URLs.
    pub async fn extract(self: &Arc<Self>, url: &str) -> ScrapeResult<ExtractionResult> {
        match self.fetcher.fetch(url).await {
            FetchOutcome::Content(content) => {
                ServiceStats::bump(&self.stats.fast_path);
                let result = if content.placeholder {
                    ExtractionResult::placeholder(url, content.text, ExtractionMethod::FastFetch)
                } else {
                    ExtractionResult::extracted(
                        url,
                        content.text,
                        content.title,
                        ExtractionMethod::FastFetch,
                    )
                };
                return Ok(result.with_final_url(Some(content.final_url)));
            }
            FetchOutcome::Fallback(reason) => {
                info!(%url, %reason, "Fast path gave nothing, queueing browser render");
            }
        }

        let strategy = self.registry.generic()?;
        let output = self
            .render_queued(strategy, SiteRequest::for_url(url), format!("browser:{url}"))
            .await?;
        Ok(Self::render_result(url, output, false))
    }

    /// Extract a site strategy synchronously through the queue
    ///
    /// # Errors
    ///
    /// `UnknownSite`, `Validation`, `MemoryExhaustion` or queue errors.
    pub async fn extract_with_site(
        self: &Arc<Self>,
        site: &str,
        request: SiteRequest,
    ) -> ScrapeResult<ExtractionResult> {
        let strategy = self.registry.get(site)?;
        let label = format!("{}:sync", strategy.name());
        let url = request.display_url().map(str::to_string);
        let output = self.render_queued(strategy, request, label).await?;
        let url = url.unwrap_or_else(|| output.final_url.clone());
        Ok(Self::render_result(&url, output, true))
    }

    /// Extract a small batch; fast paths run concurrently, renders queue
    ///
    /// Per-URL failures become placeholder results.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty or oversized batch, `MemoryExhaustion` while restarting.
    pub async fn extract_batch(self: &Arc<Self>, urls: Vec<String>) -> ScrapeResult<Vec<ExtractionResult>> {
        self.governor.ensure_accepting()?;
        if urls.is_empty() {
            return Err(ScrapeError::Validation("urls must not be empty".into()));
        }
        let max = self.config.server.max_batch_urls;
        if urls.len() > max {
            return Err(ScrapeError::Validation(format!(
                "at most {max} URLs per batch, got {}",
                urls.len()
            )));
        }

        let tasks = urls.into_iter().map(|url| {
            let service = Arc::clone(self);
            async move {
                ServiceStats::bump(&service.stats.received);
                let outcome = match service.guard.ensure_target(&url).await {
                    Ok(_) => service.extract(&url).await,
                    Err(e) => Err(e),
                };
                ServiceStats::bump(&service.stats.completed);
                outcome.unwrap_or_else(|e| {
                    ExtractionResult::placeholder(&url, error_placeholder(&e), ExtractionMethod::None)
                })
            }
        });
        Ok(join_all(tasks).await)
    }

    /// Queue a render behind any in-flight browser work
    async fn render_queued(
        self: &Arc<Self>,
        strategy: Arc<dyn SiteStrategy>,
        request: SiteRequest,
        label: String,
    ) -> ScrapeResult<RenderOutput> {
        let service = Arc::clone(self);
        self.queue
            .submit(label, async move {
                if let Err(e) = service.governor.check_before_task("before-render") {
                    ServiceStats::bump(&service.stats.skipped);
                    return Err(e);
                }
                ServiceStats::bump(&service.stats.browser_renders);
                let output = service.engine.render(strategy.as_ref(), &request).await;
                if let Ok(output) = &output {
                    service.record_launches(output.launches);
                }
                service.governor.check_after_task("after-render").await;
                output
            })
            .await?
    }

    fn record_launches(&self, tally: LaunchTally) {
        if tally.started > 0 {
            self.governor.record_launch_success();
        }
        for _ in 0..tally.trailing_failures {
            self.governor.record_launch_failure();
        }
    }

    fn render_result(url: &str, output: RenderOutput, named: bool) -> ExtractionResult {
        let method = if named {
            ExtractionMethod::Site(output.method.clone())
        } else {
            ExtractionMethod::Browser
        };
        let result = if output.is_placeholder() {
            ExtractionResult::placeholder(url, output.content, method)
        } else {
            ExtractionResult::extracted(url, output.content, output.title, method)
        };
        result.with_final_url(Some(output.final_url))
    }

    #[must_use]
    pub fn health(&self) -> HealthReport {
        let sample = self
            .governor
            .latest()
            .unwrap_or_else(|| self.governor.sample("health"));
        let state = self.governor.state();
        let accepting = self.governor.is_accepting();
        HealthReport {
            status: if accepting { "ok" } else { "restarting" },
            memory: MemoryFigures::from(&sample),
            state,
            accepting_requests: accepting,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusReport {
        let mut requests = self.stats.snapshot();
        requests.in_flight = self.jobs.len() as u64;
        StatusReport {
            health: self.health(),
            requests,
            queue: self.queue.snapshot(),
            sites: self.registry.names().map(str::to_string).collect(),
            recent_memory: self.governor.samples(),
        }
    }
}

fn validate_job_id(job_id: &str) -> ScrapeResult<()> {
    if job_id.trim().is_empty() {
        return Err(ScrapeError::Validation("jobId must not be empty".into()));
    }
    Ok(())
}
