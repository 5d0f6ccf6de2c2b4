//! Error taxonomy for the extraction service
//!
//! Failures below the HTTP boundary are usually turned into placeholder
//! content; the variants here are what reaches the boundary (or the job
//! runner) when that is not possible.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used across the crate
pub type ScrapeResult<T> = Result<T, ScrapeError>;

/// Error types for extraction, scheduling and delivery
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Unsafe or malformed target/callback URL (never retried)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Transient failure talking to the target site
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// Content extraction did not finish in time
    #[error("Extraction timed out after {}s", .0.as_secs())]
    ExtractionTimeout(Duration),

    /// The browser could not be started or crashed mid-render
    #[error("Browser automation failed: {0}")]
    AutomationLaunch(String),

    /// Memory is over the restart threshold; the request was not attempted
    #[error("Service is restarting under memory pressure, retry in {}s", .retry_after.as_secs())]
    MemoryExhaustion { retry_after: Duration },

    /// Callback could not be delivered after all attempts
    #[error("Callback delivery failed after {attempts} attempts: {message}")]
    CallbackDelivery { attempts: u32, message: String },

    /// Missing or wrong shared secret
    #[error("Unauthorized")]
    Unauthorized,

    /// No site strategy registered under this name
    #[error("Unknown site strategy: {0}")]
    UnknownSite(String),

    /// The browser queue worker is gone
    #[error("Browser queue is shut down")]
    SchedulerClosed,

    /// A queued task panicked; the queue itself keeps running
    #[error("Queued task '{0}' panicked")]
    TaskPanicked(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ScrapeError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} keeps the context chain
        Self::Internal(format!("{err:#}"))
    }
}

impl ScrapeError {
    /// Whether another attempt at the same work could plausibly succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamFetch(_)
                | Self::ExtractionTimeout(_)
                | Self::AutomationLaunch(_)
                | Self::MemoryExhaustion { .. }
                | Self::CallbackDelivery { .. }
        )
    }

    /// Stable machine-readable code for JSON error bodies
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::UpstreamFetch(_) => "upstream_fetch_error",
            Self::ExtractionTimeout(_) => "extraction_timeout",
            Self::AutomationLaunch(_) => "automation_launch_error",
            Self::MemoryExhaustion { .. } => "memory_exhaustion",
            Self::CallbackDelivery { .. } => "callback_delivery_failure",
            Self::Unauthorized => "unauthorized",
            Self::UnknownSite(_) => "unknown_site",
            Self::SchedulerClosed => "scheduler_closed",
            Self::TaskPanicked(_) => "task_panicked",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status used when this error reaches the boundary
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamFetch(_) | Self::CallbackDelivery { .. } => StatusCode::BAD_GATEWAY,
            Self::ExtractionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::MemoryExhaustion { .. } | Self::SchedulerClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownSite(_) => StatusCode::NOT_FOUND,
            Self::AutomationLaunch(_) | Self::TaskPanicked(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// JSON body for error responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            Self::MemoryExhaustion { retry_after } => Some(retry_after.as_secs().max(1)),
            Self::SchedulerClosed => Some(5),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            code: self.code(),
            retry_after_secs: retry_after,
        };

        let mut response = (self.status_code(), Json(body)).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
