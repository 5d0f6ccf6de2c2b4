//! The four strategy shapes every built-in or configured site maps onto

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::form_urlencoded;

use super::{Attempt, SearchStep, SiteRequest, SiteStrategy, find_marker};
use crate::config::BlockPolicy;
use crate::error::{ScrapeError, ScrapeResult};
use crate::proxy::ProxySource;
use crate::render_engine::session::PageText;

fn required<'a>(value: Option<&'a str>, field: &str, site: &str) -> ScrapeResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ScrapeError::Validation(format!("site '{site}' requires '{field}'")))
}

/// Substitute `{model}` with the URL-encoded model number
fn fill_template(template: &str, model: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(model.as_bytes()).collect();
    template.replace("{model}", &encoded)
}

/// Single page, single attempt
#[derive(Debug, Clone)]
pub struct GenericStrategy {
    name: String,
    block_policy: BlockPolicy,
    markers: Vec<String>,
    settle: Option<Duration>,
}

impl GenericStrategy {
    #[must_use]
    pub fn new(name: impl Into<String>, block_policy: BlockPolicy) -> Self {
        Self {
            name: name.into(),
            block_policy,
            markers: Vec::new(),
            settle: None,
        }
    }

    #[must_use]
    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: Option<Duration>) -> Self {
        self.settle = settle;
        self
    }
}

impl SiteStrategy for GenericStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, request: &SiteRequest) -> ScrapeResult<Vec<Attempt>> {
        let url = required(request.url.as_deref(), "url", &self.name)?;
        let mut attempt = Attempt::plain("page", url, self.block_policy);
        attempt.settle = self.settle;
        Ok(vec![attempt])
    }

    fn detect_failure(&self, page: &PageText) -> Option<String> {
        find_marker(&self.markers, page)
    }
}

/// Open a search page, type the model number, submit
#[derive(Debug, Clone)]
pub struct SearchFormStrategy {
    name: String,
    search_url: String,
    input_selector: String,
    submit_selector: Option<String>,
    block_policy: BlockPolicy,
    markers: Vec<String>,
    settle: Option<Duration>,
}

impl SearchFormStrategy {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        search_url: impl Into<String>,
        input_selector: impl Into<String>,
        submit_selector: Option<String>,
        block_policy: BlockPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            search_url: search_url.into(),
            input_selector: input_selector.into(),
            submit_selector,
            block_policy,
            markers: Vec::new(),
            settle: None,
        }
    }

    #[must_use]
    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: Option<Duration>) -> Self {
        self.settle = settle;
        self
    }
}

impl SiteStrategy for SearchFormStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, request: &SiteRequest) -> ScrapeResult<Vec<Attempt>> {
        let model = required(request.model.as_deref(), "model", &self.name)?;
        // an explicit url overrides the configured search page
        let url = match request.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => fill_template(&self.search_url, model),
        };

        let mut attempt = Attempt::plain("search", url, self.block_policy);
        attempt.settle = self.settle;
        attempt.search = Some(SearchStep {
            input_selector: self.input_selector.clone(),
            submit_selector: self.submit_selector.clone(),
            value: model.to_string(),
        });
        Ok(vec![attempt])
    }

    fn detect_failure(&self, page: &PageText) -> Option<String> {
        find_marker(&self.markers, page)
    }
}

/// Try the primary URL, then the fallback when the primary shows a
/// "not found" marker or thin content
#[derive(Debug, Clone)]
pub struct PrimaryFallbackStrategy {
    name: String,
    block_policy: BlockPolicy,
    markers: Vec<String>,
    settle: Option<Duration>,
}

impl PrimaryFallbackStrategy {
    #[must_use]
    pub fn new(name: impl Into<String>, block_policy: BlockPolicy) -> Self {
        Self {
            name: name.into(),
            block_policy,
            markers: Vec::new(),
            settle: None,
        }
    }

    #[must_use]
    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: Option<Duration>) -> Self {
        self.settle = settle;
        self
    }
}

impl SiteStrategy for PrimaryFallbackStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, request: &SiteRequest) -> ScrapeResult<Vec<Attempt>> {
        let primary = request
            .primary_url
            .as_deref()
            .or(request.url.as_deref());
        let primary = required(primary, "primaryUrl", &self.name)?;

        let mut attempts = vec![Attempt::plain("primary", primary, self.block_policy)];
        if let Some(fallback) = request
            .fallback_url
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty() && *f != primary)
        {
            attempts.push(Attempt::plain("fallback", fallback, self.block_policy));
        }
        for attempt in &mut attempts {
            attempt.settle = self.settle;
        }
        Ok(attempts)
    }

    fn detect_failure(&self, page: &PageText) -> Option<String> {
        find_marker(&self.markers, page)
    }
}

/// One regional site of a manufacturer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalSite {
    pub region: String,
    /// URL with a `{model}` placeholder
    pub url_template: String,
}

/// Try each regional site in order, each through a proxy in that region
#[derive(Debug, Clone)]
pub struct RegionalProxyStrategy {
    name: String,
    sites: Vec<RegionalSite>,
    proxies: ProxySource,
    block_policy: BlockPolicy,
    markers: Vec<String>,
    settle: Option<Duration>,
}

impl RegionalProxyStrategy {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        sites: Vec<RegionalSite>,
        proxies: ProxySource,
        block_policy: BlockPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            sites,
            proxies,
            block_policy,
            markers: Vec::new(),
            settle: None,
        }
    }

    #[must_use]
    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: Option<Duration>) -> Self {
        self.settle = settle;
        self
    }
}

impl SiteStrategy for RegionalProxyStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, request: &SiteRequest) -> ScrapeResult<Vec<Attempt>> {
        if !self.proxies.is_configured() {
            tracing::warn!(site = %self.name, "No proxy configured; regional attempts go direct");
        }

        // a direct url skips the region list but still uses the first region's proxy
        if let Some(url) = request.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            let region = self.sites.first().map(|s| s.region.as_str()).unwrap_or("us");
            let mut attempt = Attempt::plain(region, url, self.block_policy);
            attempt.proxy = self.proxies.for_region(region);
            attempt.settle = self.settle;
            return Ok(vec![attempt]);
        }

        let model = required(request.model.as_deref(), "model", &self.name)?;
        if self.sites.is_empty() {
            return Err(ScrapeError::Validation(format!(
                "site '{}' has no regional sites configured",
                self.name
            )));
        }

        Ok(self
            .sites
            .iter()
            .map(|site| {
                let mut attempt = Attempt::plain(
                    site.region.clone(),
                    fill_template(&site.url_template, model),
                    self.block_policy,
                );
                attempt.proxy = self.proxies.for_region(&site.region);
                attempt.settle = self.settle;
                attempt
            })
            .collect())
    }

    fn detect_failure(&self, page: &PageText) -> Option<String> {
        find_marker(&self.markers, page)
    }
}
