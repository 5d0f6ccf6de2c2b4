//! Request interception
//!
//! Decides which sub-resources are refused, re-validates every document
//! navigation against the URL guard, answers proxy auth challenges, and
//! keeps a table of in-flight requests for timeout diagnostics.

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
    FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventLoadingFailed, EventLoadingFinished, ResourceType,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use super::session::PendingRequest;
use crate::config::BlockPolicy;
use crate::proxy::ProxySettings;
use crate::url_guard::UrlGuard;
use crate::utils::string_utils::safe_truncate_chars;

/// Number of pending requests reported on a navigation timeout
pub const PENDING_REPORT_LIMIT: usize = 10;

/// Coarse resource classes the policy reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
    Document,
    Stylesheet,
    Image,
    Font,
    Media,
    Script,
    Xhr,
    Other,
}

impl ResourceClass {
    #[must_use]
    pub fn from_cdp(rt: &ResourceType) -> Self {
        match rt {
            ResourceType::Document => Self::Document,
            ResourceType::Stylesheet => Self::Stylesheet,
            ResourceType::Image => Self::Image,
            ResourceType::Font => Self::Font,
            ResourceType::Media => Self::Media,
            ResourceType::Script => Self::Script,
            ResourceType::Xhr | ResourceType::Fetch | ResourceType::EventSource => Self::Xhr,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Stylesheet => "stylesheet",
            Self::Image => "image",
            Self::Font => "font",
            Self::Media => "media",
            Self::Script => "script",
            Self::Xhr => "xhr",
            Self::Other => "other",
        }
    }
}

/// Why a request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    AssetClass(ResourceClass),
    TrackingDomain(String),
    UnsafeNavigation(String),
}

/// Apply the asset policy to one request
#[must_use]
pub fn should_block(
    policy: &BlockPolicy,
    class: ResourceClass,
    url: &str,
    tracking_domains: &[String],
) -> Option<BlockReason> {
    let blocked_class = match class {
        ResourceClass::Image => policy.images,
        ResourceClass::Font => policy.fonts,
        ResourceClass::Media => policy.media,
        ResourceClass::Stylesheet => policy.stylesheets,
        _ => false,
    };
    if blocked_class {
        return Some(BlockReason::AssetClass(class));
    }

    // never refuse the page itself because of the tracking list
    if policy.tracking && class != ResourceClass::Document {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))?;
        let hit = tracking_domains.iter().find(|d| host_matches(&host, d));
        if let Some(domain) = hit {
            return Some(BlockReason::TrackingDomain(domain.clone()));
        }
    }

    None
}

/// `host` is `domain` or one of its subdomains
fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
}

#[derive(Debug, Clone)]
struct InFlight {
    url: String,
    class: ResourceClass,
    started: Instant,
}

/// Requests continued by the interceptor and not yet finished
#[derive(Debug, Default)]
pub struct RequestTracker {
    inflight: Mutex<HashMap<String, InFlight>>,
}

impl RequestTracker {
    pub fn start(&self, id: impl Into<String>, url: impl Into<String>, class: ResourceClass) {
        self.start_at(id, url, class, Instant::now());
    }

    pub fn start_at(
        &self,
        id: impl Into<String>,
        url: impl Into<String>,
        class: ResourceClass,
        started: Instant,
    ) {
        self.inflight.lock().insert(
            id.into(),
            InFlight {
                url: url.into(),
                class,
                started,
            },
        );
    }

    pub fn finish(&self, id: &str) {
        self.inflight.lock().remove(id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slowest pending requests first, at most `PENDING_REPORT_LIMIT`
    #[must_use]
    pub fn pending_report(&self) -> Vec<PendingRequest> {
        let now = Instant::now();
        let mut pending: Vec<PendingRequest> = self
            .inflight
            .lock()
            .values()
            .map(|r| PendingRequest {
                url: r.url.clone(),
                resource_type: r.class.label().to_string(),
                elapsed: now.saturating_duration_since(r.started),
            })
            .collect();
        pending.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
        pending.truncate(PENDING_REPORT_LIMIT);
        pending
    }
}

/// Group a pending report by resource type, e.g. `script=3, image=1`
#[must_use]
pub fn summarize_by_type(pending: &[PendingRequest]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for req in pending {
        *counts.entry(req.resource_type.as_str()).or_default() += 1;
    }
    counts
        .iter()
        .map(|(ty, n)| format!("{ty}={n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Log a navigation timeout with the requests that were still open
pub fn log_pending(url: &str, pending: &[PendingRequest]) {
    warn!(
        %url,
        pending = pending.len(),
        by_type = %summarize_by_type(pending),
        "Navigation timed out, extracting partial content"
    );
    for req in pending {
        warn!(
            resource_type = %req.resource_type,
            elapsed_ms = req.elapsed.as_millis() as u64,
            url = %safe_truncate_chars(&req.url, 200),
            "Still pending"
        );
    }
}

/// Everything the interception loop needs
#[derive(Clone)]
pub struct InterceptionContext {
    pub policy: BlockPolicy,
    pub tracking_domains: Vec<String>,
    pub guard: Arc<UrlGuard>,
    pub proxy: Option<ProxySettings>,
    pub tracker: Arc<RequestTracker>,
}

impl InterceptionContext {
    /// Verdict for one paused request; documents always pass through the guard
    #[must_use]
    pub fn decide(&self, class: ResourceClass, url: &str) -> Option<BlockReason> {
        if let Some(reason) = should_block(&self.policy, class, url, &self.tracking_domains) {
            return Some(reason);
        }
        if class != ResourceClass::Document {
            return None;
        }
        let verdict = self.guard.check_target(url);
        (!verdict.valid).then(|| BlockReason::UnsafeNavigation(verdict.reason.unwrap_or_default()))
    }
}

/// Enable the Fetch domain and spawn the loops that answer paused requests
///
/// Returns the spawned tasks; abort them when the session closes.
pub async fn install(
    page: &Page,
    ctx: InterceptionContext,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    let mut auth = page.event_listener::<EventAuthRequired>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;

    page.execute(
        EnableParams::builder()
            .pattern(
                RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Request)
                    .build(),
            )
            .handle_auth_requests(ctx.proxy.as_ref().is_some_and(|p| p.has_credentials()))
            .build(),
    )
    .await?;

    let mut tasks = Vec::with_capacity(3);

    let page_paused = page.clone();
    let paused_ctx = ctx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let class = ResourceClass::from_cdp(&event.resource_type);
            let url = event.request.url.clone();

            let result = match paused_ctx.decide(class, &url) {
                Some(reason) => {
                    if matches!(reason, BlockReason::UnsafeNavigation(_)) {
                        warn!(%url, ?reason, "Blocked unsafe navigation");
                    } else {
                        trace!(%url, ?reason, "Blocked request");
                    }
                    page_paused
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                }
                None => {
                    if let Some(network_id) = &event.network_id {
                        paused_ctx
                            .tracker
                            .start(network_id.inner().clone(), url.clone(), class);
                    }
                    page_paused
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                }
            };
            if let Err(e) = result {
                // the page may already be gone
                debug!(error = %e, "Failed to answer paused request");
            }
        }
    }));

    let page_auth = page.clone();
    let proxy = ctx.proxy.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = auth.next().await {
            let response = match proxy.as_ref().and_then(ProxySettings::credentials) {
                Some((user, pass)) => AuthChallengeResponse::builder()
                    .response(AuthChallengeResponseResponse::ProvideCredentials)
                    .username(user)
                    .password(pass)
                    .build(),
                None => AuthChallengeResponse::builder()
                    .response(AuthChallengeResponseResponse::CancelAuth)
                    .build(),
            };
            let Ok(response) = response else {
                continue;
            };
            if let Err(e) = page_auth
                .execute(ContinueWithAuthParams::new(event.request_id.clone(), response))
                .await
            {
                debug!(error = %e, "Failed to answer auth challenge");
            }
        }
    }));

    let tracker = ctx.tracker.clone();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = finished.next() => tracker.finish(event.request_id.inner()),
                Some(event) = failed.next() => tracker.finish(event.request_id.inner()),
                else => break,
            }
        }
    }));

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use std::time::Duration;

    fn tracking() -> Vec<String> {
        vec!["google-analytics.com".into(), "doubleclick.net".into()]
    }

    #[test]
    fn test_default_policy_blocks_assets() {
        let policy = BlockPolicy::default();
        assert_eq!(
            should_block(&policy, ResourceClass::Image, "https://x.com/a.png", &[]),
            Some(BlockReason::AssetClass(ResourceClass::Image))
        );
        assert_eq!(
            should_block(&policy, ResourceClass::Script, "https://x.com/app.js", &[]),
            None
        );
    }

    #[test]
    fn test_challenge_policy_lets_styles_through() {
        let policy = BlockPolicy::challenge_friendly();
        assert_eq!(
            should_block(&policy, ResourceClass::Stylesheet, "https://x.com/a.css", &[]),
            None
        );
    }

    #[test]
    fn test_tracking_domains_matched_with_subdomains() {
        let policy = BlockPolicy::default();
        let reason = should_block(
            &policy,
            ResourceClass::Script,
            "https://www.google-analytics.com/analytics.js",
            &tracking(),
        );
        assert_eq!(
            reason,
            Some(BlockReason::TrackingDomain("google-analytics.com".into()))
        );
        assert_eq!(
            should_block(
                &policy,
                ResourceClass::Document,
                "https://doubleclick.net/",
                &tracking()
            ),
            None
        );
    }

    #[test]
    fn test_tracking_match_uses_host_not_query() {
        let policy = BlockPolicy::default();
        assert_eq!(
            should_block(
                &policy,
                ResourceClass::Xhr,
                "https://shop.example.com/api?ref=www.doubleclick.net",
                &tracking()
            ),
            None
        );
        assert_eq!(
            should_block(
                &policy,
                ResourceClass::Script,
                "https://notdoubleclick.net/x.js",
                &tracking()
            ),
            None
        );
        assert_eq!(
            should_block(
                &policy,
                ResourceClass::Script,
                "https://ad.DoubleClick.net/x.js",
                &tracking()
            ),
            Some(BlockReason::TrackingDomain("doubleclick.net".into()))
        );
    }

    fn permissive_context() -> InterceptionContext {
        let guard = UrlGuard::new(&GuardConfig {
            resolve_dns: false,
            ..GuardConfig::default()
        });
        InterceptionContext {
            policy: BlockPolicy {
                images: false,
                fonts: false,
                media: false,
                stylesheets: false,
                tracking: false,
            },
            tracking_domains: tracking(),
            guard: Arc::new(guard),
            proxy: None,
            tracker: Arc::new(RequestTracker::default()),
        }
    }

    #[test]
    fn test_permissive_policy_still_guards_documents() {
        let ctx = permissive_context();
        assert!(matches!(
            ctx.decide(ResourceClass::Document, "http://127.0.0.1:8080/admin"),
            Some(BlockReason::UnsafeNavigation(_))
        ));
        assert!(matches!(
            ctx.decide(ResourceClass::Document, "http://169.254.169.254/latest/meta-data"),
            Some(BlockReason::UnsafeNavigation(_))
        ));
        assert_eq!(ctx.decide(ResourceClass::Document, "https://93.184.216.34/"), None);
        assert_eq!(ctx.decide(ResourceClass::Image, "https://93.184.216.34/a.png"), None);
    }

    #[test]
    fn test_pending_report_slowest_first_and_capped() {
        let tracker = RequestTracker::default();
        let now = Instant::now();
        for i in 0..15u64 {
            tracker.start_at(
                format!("r{i}"),
                format!("https://x.com/{i}"),
                ResourceClass::Script,
                now - Duration::from_millis(i * 100),
            );
        }
        tracker.finish("r14");

        let report = tracker.pending_report();
        assert_eq!(report.len(), PENDING_REPORT_LIMIT);
        assert_eq!(report[0].url, "https://x.com/13");
        assert!(report.windows(2).all(|w| w[0].elapsed >= w[1].elapsed));
    }

    #[test]
    fn test_summarize_by_type() {
        let pending = vec![
            PendingRequest {
                url: "a".into(),
                resource_type: "script".into(),
                elapsed: Duration::from_secs(3),
            },
            PendingRequest {
                url: "b".into(),
                resource_type: "xhr".into(),
                elapsed: Duration::from_secs(2),
            },
            PendingRequest {
                url: "c".into(),
                resource_type: "script".into(),
                elapsed: Duration::from_secs(1),
            },
        ];
        assert_eq!(summarize_by_type(&pending), "script=2, xhr=1");
    }
}
