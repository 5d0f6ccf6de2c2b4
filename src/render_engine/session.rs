//! Browser session seam
//!
//! The engine only talks to these traits. The Chromium implementation
//! lives in `chromium`; tests plug in scripted fakes.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::BlockPolicy;
use crate::proxy::ProxySettings;

/// Per-launch settings derived from the site strategy
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub block_policy: BlockPolicy,
    pub tracking_domains: Vec<String>,
    pub proxy: Option<ProxySettings>,
    pub headless: bool,
}

/// A request still open when navigation gave up waiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub url: String,
    pub resource_type: String,
    pub elapsed: Duration,
}

/// How navigation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Loaded,
    /// The load event never fired; the page may still be usable
    TimedOut { pending: Vec<PendingRequest> },
}

/// Visible text of a rendered page
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageText {
    pub title: Option<String>,
    pub text: String,
}

/// Starts isolated browser sessions
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, options: SessionOptions) -> Result<Box<dyn BrowserSession>>;
}

/// One live browser with a single page
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate, treating a timeout as a soft outcome rather than an error
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<NavigationOutcome>;

    /// Type `value` into `input_selector` and submit
    ///
    /// Submits with `submit_selector` when given, Enter otherwise, then
    /// waits (softly) up to `timeout` for the resulting navigation.
    async fn fill_and_submit(
        &mut self,
        input_selector: &str,
        value: &str,
        submit_selector: Option<&str>,
        timeout: Duration,
    ) -> Result<()>;

    async fn extract(&mut self) -> Result<PageText>;

    async fn current_url(&mut self) -> Option<String>;

    /// Tear down the browser process and its profile
    async fn close(self: Box<Self>) -> Result<()>;
}
