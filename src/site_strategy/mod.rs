//! Site strategies
//!
//! Every manufacturer-specific flow is the same engine loop
//! (prepare → navigate → detect failure → extract) with different data.
//! A strategy turns a request into an ordered list of [`Attempt`]s; the
//! engine tries them in order until one yields usable content.

pub mod registry;
pub mod variants;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::BlockPolicy;
use crate::error::ScrapeResult;
use crate::proxy::ProxySettings;
use crate::render_engine::session::{BrowserSession, NavigationOutcome, PageText};

pub use registry::{SiteDefinition, SiteRegistry, StrategyKind};
pub use variants::{
    GenericStrategy, PrimaryFallbackStrategy, RegionalProxyStrategy, RegionalSite,
    SearchFormStrategy,
};

/// Site-specific parameters of an extraction request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub primary_url: Option<String>,
    #[serde(default)]
    pub fallback_url: Option<String>,
}

impl SiteRequest {
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// URL used for callbacks and logs when the request has several
    #[must_use]
    pub fn display_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.primary_url.as_deref())
            .or(self.fallback_url.as_deref())
    }
}

/// Type a value into a search box and submit it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStep {
    pub input_selector: String,
    pub submit_selector: Option<String>,
    pub value: String,
}

/// One browser launch planned by a strategy
#[derive(Debug, Clone)]
pub struct Attempt {
    pub label: String,
    pub url: String,
    pub proxy: Option<ProxySettings>,
    pub block_policy: BlockPolicy,
    pub search: Option<SearchStep>,
    /// Overrides the host-based settle delay
    pub settle: Option<Duration>,
}

impl Attempt {
    #[must_use]
    pub fn plain(label: impl Into<String>, url: impl Into<String>, policy: BlockPolicy) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            proxy: None,
            block_policy: policy,
            search: None,
            settle: None,
        }
    }
}

#[async_trait]
pub trait SiteStrategy: Send + Sync {
    /// Registry key and extraction method label
    fn name(&self) -> &str;

    /// Plan the attempts for `request`
    ///
    /// Fails with `ScrapeError::Validation` when required parameters are missing.
    fn prepare(&self, request: &SiteRequest) -> ScrapeResult<Vec<Attempt>>;

    /// Drive the page to the content that should be extracted
    async fn navigate(
        &self,
        session: &mut dyn BrowserSession,
        attempt: &Attempt,
        timeout: Duration,
    ) -> Result<NavigationOutcome> {
        let outcome = session.goto(&attempt.url, timeout).await?;
        if let Some(step) = &attempt.search {
            session
                .fill_and_submit(
                    &step.input_selector,
                    &step.value,
                    step.submit_selector.as_deref(),
                    timeout,
                )
                .await?;
        }
        Ok(outcome)
    }

    /// A site-specific "nothing here" marker found in the page, if any
    fn detect_failure(&self, _page: &PageText) -> Option<String> {
        None
    }

    /// Post-process extracted text
    fn extract(&self, page: PageText) -> PageText {
        page
    }
}

/// Case-insensitive search for the first marker present in `page`
#[must_use]
pub fn find_marker(markers: &[String], page: &PageText) -> Option<String> {
    let text = page.text.to_lowercase();
    let title = page.title.as_deref().unwrap_or_default().to_lowercase();
    markers
        .iter()
        .find(|m| {
            let m = m.to_lowercase();
            text.contains(&m) || title.contains(&m)
        })
        .cloned()
}
