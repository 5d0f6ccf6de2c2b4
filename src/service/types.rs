//! Request, result and telemetry types for the service boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::memory::{MemorySample, MemoryState};
use crate::scheduler::QueueSnapshot;
use crate::site_strategy::SiteRequest;
use crate::utils::string_utils::char_len;

/// `POST /scrape`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    pub callback_url: String,
    pub job_id: String,
    #[serde(default)]
    pub url_index: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// `POST /scrape-<site>`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteScrapeRequest {
    #[serde(flatten)]
    pub site: SiteRequest,
    pub callback_url: String,
    pub job_id: String,
    #[serde(default)]
    pub url_index: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// `POST /scrape-batch`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchRequest {
    pub urls: Vec<String>,
}

/// How the content was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionMethod {
    FastFetch,
    Browser,
    /// A named site strategy
    Site(String),
    /// Nothing ran (rejected or skipped)
    None,
}

impl ExtractionMethod {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::FastFetch => "fast_fetch",
            Self::Browser => "browser",
            Self::Site(name) => name,
            Self::None => "none",
        }
    }
}

impl Serialize for ExtractionMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outcome of one extraction; `content` is never empty
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    pub url: String,
    pub content: String,
    pub title: Option<String>,
    pub content_length: usize,
    pub method: ExtractionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionResult {
    #[must_use]
    pub fn extracted(
        url: impl Into<String>,
        content: String,
        title: Option<String>,
        method: ExtractionMethod,
    ) -> Self {
        Self {
            success: true,
            url: url.into(),
            content_length: char_len(&content),
            content,
            title,
            method,
            final_url: None,
            extracted_at: Utc::now(),
        }
    }

    /// Failed extraction carrying a placeholder instead of text
    #[must_use]
    pub fn placeholder(url: impl Into<String>, placeholder: String, method: ExtractionMethod) -> Self {
        Self {
            success: false,
            ..Self::extracted(url, placeholder, None, method)
        }
    }

    #[must_use]
    pub fn with_final_url(mut self, final_url: Option<String>) -> Self {
        self.final_url = final_url.filter(|f| *f != self.url);
        self
    }
}

/// `202` body for accepted jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub success: bool,
    pub status: String,
    pub job_id: String,
    pub url_index: u32,
}

impl AcceptedResponse {
    #[must_use]
    pub fn queued(job_id: impl Into<String>, url_index: u32) -> Self {
        Self {
            success: true,
            status: "queued".to_string(),
            job_id: job_id.into(),
            url_index,
        }
    }
}

/// `POST /scrape-batch` response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<ExtractionResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFigures {
    pub rss_mb: f64,
    pub heap_used_mb: f64,
    pub heap_total_mb: f64,
}

impl From<&MemorySample> for MemoryFigures {
    fn from(sample: &MemorySample) -> Self {
        // one decimal is plenty for telemetry
        let round = |v: f64| (v * 10.0).round() / 10.0;
        Self {
            rss_mb: round(sample.rss_mb),
            heap_used_mb: round(sample.heap_used_mb),
            heap_total_mb: round(sample.heap_total_mb),
        }
    }
}

/// `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// `ok` while accepting, `restarting` otherwise
    pub status: &'static str,
    pub memory: MemoryFigures,
    pub state: MemoryState,
    pub accepting_requests: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCounts {
    pub received: u64,
    pub completed: u64,
    pub callbacks_delivered: u64,
    pub callbacks_failed: u64,
    pub fast_path: u64,
    pub browser_renders: u64,
    pub skipped_under_pressure: u64,
    /// Accepted jobs still running or delivering
    pub in_flight: u64,
}

/// `GET /status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub health: HealthReport,
    pub requests: RequestCounts,
    pub queue: QueueSnapshot,
    pub sites: Vec<String>,
    pub recent_memory: Vec<MemorySample>,
}
