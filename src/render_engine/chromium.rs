//! Chromium-backed browser sessions
//!
//! Teardown order matters: page, browser process, handler task, profile
//! directory. `ChromiumSession::close` does it explicitly; `Drop` is the
//! fallback when a session is dropped mid-flight.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::error::CdpError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::interception::{self, InterceptionContext, RequestTracker};
use super::page_timeout::with_page_timeout;
use super::scripts::EXTRACT_SCRIPT;
use super::session::{
    BrowserSession, NavigationOutcome, PageText, SessionLauncher, SessionOptions,
};
use crate::browser_profile::{BrowserProfile, create_unique_profile};
use crate::browser_setup::{
    LaunchSpec, apply_stealth_measures, launch_browser, resolve_executable,
};
use crate::config::BrowserConfig;
use crate::url_guard::UrlGuard;

/// Launches a fresh Chrome per session
pub struct ChromiumLauncher {
    config: BrowserConfig,
    guard: Arc<UrlGuard>,
    executable: OnceCell<PathBuf>,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(config: BrowserConfig, guard: Arc<UrlGuard>) -> Self {
        Self {
            config,
            guard,
            executable: OnceCell::new(),
        }
    }

    async fn executable(&self) -> Result<PathBuf> {
        self.executable
            .get_or_try_init(|| resolve_executable(self.config.chrome_executable.as_deref()))
            .await
            .cloned()
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self, options: SessionOptions) -> Result<Box<dyn BrowserSession>> {
        let executable = self.executable().await?;
        let profile = create_unique_profile()?;

        let spec = LaunchSpec {
            executable,
            user_data_dir: profile.path().to_path_buf(),
            headless: options.headless,
            proxy_server: options.proxy.as_ref().map(|p| p.server.clone()),
            // goto must not give up before our own navigation timeout does
            request_timeout: self.config.navigation_timeout + Duration::from_secs(5),
        };

        let (mut browser, handler) = launch_browser(&spec).await?;

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                let _ = browser.close().await;
                return Err(e).context("Failed to open page");
            }
        };

        let tracker = Arc::new(RequestTracker::default());
        let mut session = ChromiumSession {
            browser: Some(browser),
            handler,
            page,
            tracker: tracker.clone(),
            tasks: Vec::new(),
            profile: Some(profile),
        };

        if let Err(e) = apply_stealth_measures(&session.page).await {
            warn!(error = %format!("{e:#}"), "Stealth setup failed, continuing without it");
        }

        let ctx = InterceptionContext {
            policy: options.block_policy,
            tracking_domains: options.tracking_domains.clone(),
            guard: self.guard.clone(),
            proxy: options.proxy.clone(),
            tracker,
        };
        match interception::install(&session.page, ctx).await {
            Ok(tasks) => session.tasks = tasks,
            Err(e) => {
                Box::new(session).close().await.ok();
                return Err(e).context("Failed to enable request interception");
            }
        }

        let region = options.proxy.as_ref().and_then(|p| p.region.clone());
        info!(proxy_region = ?region, "Browser session started");
        Ok(Box::new(session))
    }
}

/// One Chrome process with one page
pub struct ChromiumSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    page: Page,
    tracker: Arc<RequestTracker>,
    tasks: Vec<JoinHandle<()>>,
    profile: Option<BrowserProfile>,
}

impl ChromiumSession {
    async fn wait_for_navigation(page: &Page, timeout: Duration) {
        let waited = tokio::time::timeout(timeout, page.wait_for_navigation()).await;
        if waited.is_err() {
            debug!(
                timeout_secs = timeout.as_secs(),
                "No navigation after submit within timeout"
            );
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<NavigationOutcome> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(NavigationOutcome::Loaded),
            Ok(Err(CdpError::Timeout)) | Err(_) => Ok(NavigationOutcome::TimedOut {
                pending: self.tracker.pending_report(),
            }),
            Ok(Err(e)) => Err(e).with_context(|| format!("Navigation to {url} failed")),
        }
    }

    async fn fill_and_submit(
        &mut self,
        input_selector: &str,
        value: &str,
        submit_selector: Option<&str>,
        timeout: Duration,
    ) -> Result<()> {
        let page = &self.page;
        with_page_timeout(
            async {
                let input = page
                    .find_element(input_selector)
                    .await
                    .with_context(|| format!("Search input '{input_selector}' not found"))?;
                input.click().await?;
                input.type_str(value).await?;

                match submit_selector {
                    Some(selector) => {
                        page.find_element(selector)
                            .await
                            .with_context(|| format!("Submit control '{selector}' not found"))?
                            .click()
                            .await?;
                    }
                    None => {
                        input.press_key("Enter").await?;
                    }
                }
                Ok::<(), anyhow::Error>(())
            },
            timeout,
            "search form",
        )
        .await?;

        Self::wait_for_navigation(page, timeout).await;
        Ok(())
    }

    async fn extract(&mut self) -> Result<PageText> {
        let result = self
            .page
            .evaluate(EXTRACT_SCRIPT)
            .await
            .context("Text extraction script failed")?;
        result
            .into_value::<PageText>()
            .context("Unexpected extraction result shape")
    }

    async fn current_url(&mut self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "Page close failed");
        }

        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!(error = %e, "Browser close command failed");
            }
            match tokio::time::timeout(Duration::from_secs(5), browser.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(error = %e, "Waiting for browser exit failed"),
                Err(_) => {
                    warn!("Browser did not exit in time, killing");
                    let _ = browser.kill().await;
                }
            }
        }

        self.handler.abort();
        // profile is removed only after Chrome released its files
        drop(self.profile.take());
        debug!("Browser session closed");
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.handler.abort();
        if self.browser.is_some() {
            warn!("Browser session dropped without close, process will be killed");
        }
    }
}
