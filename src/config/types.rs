//! Core configuration types for the extraction service
//!
//! Settings are grouped per subsystem so each component only borrows the
//! section it needs.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::constants::{
    CHALLENGE_SETTLE_DELAY, DEFAULT_CALLBACK_ATTEMPTS, DEFAULT_CALLBACK_BASE_DELAY,
    DEFAULT_EXTRACTION_TIMEOUT, DEFAULT_HTML_TIMEOUT, DEFAULT_MAX_BATCH_URLS,
    DEFAULT_MAX_LAUNCH_FAILURES, DEFAULT_MEMORY_RESTART_MB, DEFAULT_MEMORY_WARNING_MB, DEFAULT_NAVIGATION_TIMEOUT,
    DEFAULT_PDF_TIMEOUT, DEFAULT_SETTLE_DELAY, DEFAULT_STARTUP_TIMEOUT, DEFAULT_TRACKING_DOMAINS,
    ENCODING_CONFIDENCE_THRESHOLD, MAX_PDF_BYTES, MIN_CONTENT_CHARS, MIN_HTML_TEXT_CHARS,
    RESTART_CALLBACK_EXTRA_DELAY,
};

/// Main configuration struct for the extraction service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub guard: GuardConfig,
    pub fetch: FetchConfig,
    pub browser: BrowserConfig,
    pub memory: MemoryConfig,
    pub callback: CallbackConfig,
    pub proxy: ProxyConfig,

    /// Optional JSON file with additional or overriding site strategies
    pub site_strategies_path: Option<PathBuf>,
}

/// HTTP listener and request-boundary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    /// Shared secret expected in `x-api-key`.
    ///
    /// `None` disables authentication (a warning is logged at startup).
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,

    pub max_batch_urls: usize,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            api_secret: None,
            max_batch_urls: DEFAULT_MAX_BATCH_URLS,
            cors_enabled: true,
        }
    }
}

/// URL / origin validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Trusted callback origins, e.g. `https://app.example.com` or `http://localhost:5173`
    pub allowed_callback_origins: Vec<String>,

    /// Resolve target hosts and reject private resolved addresses
    pub resolve_dns: bool,

    /// Hosts exempt from the private-address check (local fixtures, sidecars)
    pub allowed_hosts: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            allowed_callback_origins: Vec::new(),
            resolve_dns: true,
            allowed_hosts: Vec::new(),
        }
    }
}

/// Lightweight fetcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub html_timeout: Duration,
    pub pdf_timeout: Duration,
    pub max_pdf_bytes: u64,
    pub min_html_chars: usize,
    pub encoding_confidence: f32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            html_timeout: DEFAULT_HTML_TIMEOUT,
            pdf_timeout: DEFAULT_PDF_TIMEOUT,
            max_pdf_bytes: MAX_PDF_BYTES,
            min_html_chars: MIN_HTML_TEXT_CHARS,
            encoding_confidence: ENCODING_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Which asset classes the browser refuses to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockPolicy {
    pub images: bool,
    pub fonts: bool,
    pub media: bool,
    pub stylesheets: bool,
    pub tracking: bool,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            images: true,
            fonts: true,
            media: true,
            stylesheets: true,
            tracking: true,
        }
    }
}

impl BlockPolicy {
    /// Policy for sites whose bot challenge needs styles to complete
    #[must_use]
    pub fn challenge_friendly() -> Self {
        Self {
            stylesheets: false,
            ..Self::default()
        }
    }
}

/// Browser automation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub startup_timeout: Duration,
    pub navigation_timeout: Duration,
    pub extraction_timeout: Duration,
    pub settle_delay: Duration,
    pub challenge_settle_delay: Duration,

    /// Hosts known to serve a bot challenge before the real page
    pub challenge_domains: Vec<String>,

    pub min_content_chars: usize,
    pub block_policy: BlockPolicy,
    pub tracking_domains: Vec<String>,

    /// Explicit Chrome binary; discovered or downloaded when unset
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            challenge_settle_delay: CHALLENGE_SETTLE_DELAY,
            challenge_domains: vec!["keyence.com".into(), "keyence.co.jp".into()],
            min_content_chars: MIN_CONTENT_CHARS,
            block_policy: BlockPolicy::default(),
            tracking_domains: DEFAULT_TRACKING_DOMAINS
                .iter()
                .map(|d| (*d).to_string())
                .collect(),
            chrome_executable: None,
        }
    }
}

impl BrowserConfig {
    /// Settle delay appropriate for `host`
    #[must_use]
    pub fn settle_for_host(&self, host: &str) -> Duration {
        let host = host.to_ascii_lowercase();
        let is_challenge = self
            .challenge_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")));
        if is_challenge {
            self.challenge_settle_delay
        } else {
            self.settle_delay
        }
    }
}

/// What happens to in-flight browser work when a restart is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Exit after the grace delay even if a task is mid-render
    Immediate,
    /// Wait for the browser queue to go idle (bounded by `drain_timeout`)
    Drain,
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "drain" => Ok(Self::Drain),
            other => Err(format!("unknown restart policy '{other}'")),
        }
    }
}

/// Memory governor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub warning_mb: u64,
    pub restart_mb: u64,
    pub exit_grace: Duration,
    pub restart_policy: RestartPolicy,
    pub drain_timeout: Duration,
    pub sample_interval: Duration,

    /// Browser launches that may fail in a row before a restart; 0 disables
    pub max_launch_failures: u32,

    /// Retry hint sent with 503 responses while restarting
    pub retry_after: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_mb: DEFAULT_MEMORY_WARNING_MB,
            restart_mb: DEFAULT_MEMORY_RESTART_MB,
            exit_grace: Duration::from_secs(2),
            restart_policy: RestartPolicy::Drain,
            drain_timeout: Duration::from_secs(60),
            sample_interval: Duration::from_secs(15),
            max_launch_failures: DEFAULT_MAX_LAUNCH_FAILURES,
            retry_after: Duration::from_secs(30),
        }
    }
}

/// Callback dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub restart_extra_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CALLBACK_ATTEMPTS,
            base_delay: DEFAULT_CALLBACK_BASE_DELAY,
            restart_extra_delay: RESTART_CALLBACK_EXTRA_DELAY,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Upstream proxy used by region-locked site strategies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// `host:port` or `scheme://host:port`
    pub server: Option<String>,

    /// May contain a `{region}` placeholder
    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,
}
