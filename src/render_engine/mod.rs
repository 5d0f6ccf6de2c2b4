//! Browser Automation Engine
//!
//! Runs a site strategy's attempts one browser session at a time. Every
//! session is closed before its result is judged, so a failed attempt
//! never holds Chrome while the next one starts.

pub mod chromium;
pub mod content_check;
pub mod interception;
pub mod page_timeout;
pub mod scripts;
pub mod session;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BrowserConfig;
use crate::error::{ScrapeError, ScrapeResult};
use crate::fast_fetch::html_text::collapse_whitespace;
use crate::site_strategy::{Attempt, SiteRequest, SiteStrategy};
use crate::url_guard::UrlGuard;

pub use chromium::{ChromiumLauncher, ChromiumSession};
pub use content_check::{ContentValidationResult, validate_page_content};
pub use page_timeout::{PageTimeout, with_page_timeout};
pub use session::{
    BrowserSession, NavigationOutcome, PageText, PendingRequest, SessionLauncher, SessionOptions,
};

/// Why an attempt produced no usable content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderFailure {
    /// The attempt URL failed validation
    Rejected(String),
    Launch(String),
    Navigation(String),
    ExtractionTimeout(Duration),
    Extraction(String),
    /// The strategy recognised a "nothing here" page
    Marker(String),
    /// Content validation replaced the text with this placeholder
    Content(String),
}

impl RenderFailure {
    /// Placeholder text reported in place of content
    #[must_use]
    pub fn placeholder(&self, url: &str) -> String {
        match self {
            Self::Rejected(reason) => {
                content_check::navigation_failure_placeholder(url, &format!("rejected: {reason}"))
            }
            Self::Launch(detail) => content_check::launch_failure_placeholder(detail),
            Self::Navigation(detail) | Self::Extraction(detail) => {
                content_check::navigation_failure_placeholder(url, detail)
            }
            Self::ExtractionTimeout(after) => content_check::extraction_timeout_placeholder(*after),
            Self::Marker(marker) => content_check::error_page_placeholder(url, marker),
            Self::Content(placeholder) => placeholder.clone(),
        }
    }

    /// Matching error for callers that fail instead of reporting placeholders
    #[must_use]
    pub fn to_error(&self) -> ScrapeError {
        match self {
            Self::Rejected(reason) => ScrapeError::Validation(reason.clone()),
            Self::Launch(detail) => ScrapeError::AutomationLaunch(detail.clone()),
            Self::Navigation(detail) | Self::Extraction(detail) => {
                ScrapeError::UpstreamFetch(detail.clone())
            }
            Self::ExtractionTimeout(after) => ScrapeError::ExtractionTimeout(*after),
            Self::Marker(marker) => ScrapeError::UpstreamFetch(format!("page shows '{marker}'")),
            Self::Content(placeholder) => ScrapeError::UpstreamFetch(placeholder.clone()),
        }
    }

    /// Whether later attempts should be skipped
    fn is_final(&self) -> bool {
        !self.to_error().is_retryable()
    }
}

/// Result of one engine run
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// Extracted text, or a placeholder when `failure` is set
    pub content: String,
    pub title: Option<String>,
    pub final_url: String,
    /// Strategy name
    pub method: String,
    /// Label of the attempt that produced `content`
    pub attempt: String,
    pub attempts_made: usize,
    pub failure: Option<RenderFailure>,
    pub launches: LaunchTally,
}

/// Browser starts seen during one engine run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchTally {
    pub started: usize,
    /// Launch failures since the last successful start
    pub trailing_failures: usize,
}

impl LaunchTally {
    fn observe(&mut self, outcome: &Result<Rendered, RenderFailure>) {
        match outcome {
            Err(RenderFailure::Launch(_)) => self.trailing_failures += 1,
            Err(RenderFailure::Rejected(_)) => {}
            _ => {
                self.started += 1;
                self.trailing_failures = 0;
            }
        }
    }
}

impl RenderOutput {
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.failure.is_some()
    }
}

struct Rendered {
    page: PageText,
    final_url: String,
}

/// Drives strategies through a [`SessionLauncher`]
#[derive(Clone)]
pub struct RenderEngine {
    launcher: Arc<dyn SessionLauncher>,
    config: BrowserConfig,
    guard: Arc<UrlGuard>,
}

impl RenderEngine {
    #[must_use]
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        config: BrowserConfig,
        guard: Arc<UrlGuard>,
    ) -> Self {
        Self {
            launcher,
            config,
            guard,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Run `strategy` for `request`
    ///
    /// Attempt-level failures become placeholder content; only a request
    /// the strategy cannot plan at all is an error.
    ///
    /// # Errors
    ///
    /// Returns `ScrapeError::Validation` when the strategy rejects the request.
    pub async fn render(
        &self,
        strategy: &dyn SiteStrategy,
        request: &SiteRequest,
    ) -> ScrapeResult<RenderOutput> {
        let attempts = strategy.prepare(request)?;
        let Some(first) = attempts.first() else {
            return Err(ScrapeError::Validation(format!(
                "site '{}' produced no attempts",
                strategy.name()
            )));
        };
        let total = attempts.len();
        let mut last_failure = None;
        let mut last_label = first.label.clone();
        let mut launches = LaunchTally::default();

        for (index, attempt) in attempts.iter().enumerate() {
            let is_last = index + 1 == total;
            last_label = attempt.label.clone();
            info!(
                site = strategy.name(),
                attempt = %attempt.label,
                url = %attempt.url,
                "Starting browser attempt {}/{}",
                index + 1,
                total
            );

            let outcome = self.run_attempt(strategy, attempt).await;
            launches.observe(&outcome);
            let failure = match outcome {
                Ok(rendered) => {
                    if let Some(marker) = strategy.detect_failure(&rendered.page) {
                        info!(site = strategy.name(), attempt = %attempt.label, %marker, "Failure marker found");
                        RenderFailure::Marker(marker)
                    } else {
                        let page = strategy.extract(rendered.page);
                        let text = collapse_whitespace(&page.text);
                        let check = validate_page_content(
                            &attempt.url,
                            page.title.as_deref(),
                            &text,
                            self.config.min_content_chars,
                        );
                        if check.is_valid {
                            return Ok(RenderOutput {
                                content: check.content,
                                title: page.title,
                                final_url: rendered.final_url,
                                method: strategy.name().to_string(),
                                attempt: attempt.label.clone(),
                                attempts_made: index + 1,
                                failure: None,
                                launches,
                            });
                        }
                        RenderFailure::Content(check.content)
                    }
                }
                Err(failure) => {
                    warn!(site = strategy.name(), attempt = %attempt.label, ?failure, "Browser attempt failed");
                    failure
                }
            };

            let stop = failure.is_final();
            last_failure = Some((failure, attempt.url.clone()));
            if stop || is_last {
                return Ok(self.failed_output(
                    strategy,
                    last_failure,
                    &last_label,
                    index + 1,
                    launches,
                ));
            }
        }

        Ok(self.failed_output(strategy, last_failure, &last_label, total, launches))
    }

    fn failed_output(
        &self,
        strategy: &dyn SiteStrategy,
        failure: Option<(RenderFailure, String)>,
        label: &str,
        attempts_made: usize,
        launches: LaunchTally,
    ) -> RenderOutput {
        let (failure, url) = failure.unwrap_or_else(|| {
            (
                RenderFailure::Extraction("no attempt was made".to_string()),
                String::new(),
            )
        });
        RenderOutput {
            content: failure.placeholder(&url),
            title: None,
            final_url: url,
            method: strategy.name().to_string(),
            attempt: label.to_string(),
            attempts_made,
            failure: Some(failure),
            launches,
        }
    }

    async fn run_attempt(
        &self,
        strategy: &dyn SiteStrategy,
        attempt: &Attempt,
    ) -> Result<Rendered, RenderFailure> {
        let verdict = self.guard.check_target_resolved(&attempt.url).await;
        if !verdict.valid {
            return Err(RenderFailure::Rejected(
                verdict.reason.unwrap_or_else(|| "unsafe URL".to_string()),
            ));
        }

        let options = SessionOptions {
            block_policy: attempt.block_policy,
            tracking_domains: self.config.tracking_domains.clone(),
            proxy: attempt.proxy.clone(),
            headless: self.config.headless,
        };

        let started = tokio::time::timeout(self.config.startup_timeout, self.launcher.launch(options))
            .await;
        let mut session = match started {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(RenderFailure::Launch(format!("{e:#}"))),
            Err(_) => {
                return Err(RenderFailure::Launch(format!(
                    "startup timed out after {}s",
                    self.config.startup_timeout.as_secs()
                )));
            }
        };

        let outcome = self.drive(strategy, session.as_mut(), attempt).await;

        if let Err(e) = session.close().await {
            warn!(url = %attempt.url, "Browser teardown failed: {e:#}");
        }
        outcome
    }

    async fn drive(
        &self,
        strategy: &dyn SiteStrategy,
        session: &mut dyn BrowserSession,
        attempt: &Attempt,
    ) -> Result<Rendered, RenderFailure> {
        match strategy
            .navigate(session, attempt, self.config.navigation_timeout)
            .await
        {
            Ok(NavigationOutcome::Loaded) => debug!(url = %attempt.url, "Navigation finished"),
            Ok(NavigationOutcome::TimedOut { pending }) => {
                interception::log_pending(&attempt.url, &pending);
            }
            Err(e) => return Err(RenderFailure::Navigation(format!("{e:#}"))),
        }

        let settle = attempt.settle.unwrap_or_else(|| {
            let host = Url::parse(&attempt.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default();
            self.config.settle_for_host(&host)
        });
        tokio::time::sleep(settle).await;

        let extraction = with_page_timeout(
            session.extract(),
            self.config.extraction_timeout,
            "content extraction",
        )
        .await;
        let page = match extraction {
            Ok(page) => page,
            Err(e) if e.is::<PageTimeout>() => {
                return Err(RenderFailure::ExtractionTimeout(
                    self.config.extraction_timeout,
                ));
            }
            Err(e) => return Err(RenderFailure::Extraction(format!("{e:#}"))),
        };

        let final_url = session
            .current_url()
            .await
            .unwrap_or_else(|| attempt.url.clone());
        Ok(Rendered { page, final_url })
    }
}
