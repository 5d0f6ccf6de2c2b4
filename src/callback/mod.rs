//! Callback Dispatcher
//!
//! Delivers one result to the caller's callback URL. The URL is checked
//! against the trusted origins before every attempt; failures back off
//! exponentially, with extra slack while the service is restarting.

use anyhow::Context;
use reqwest::{Client, redirect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::CallbackConfig;
use crate::error::{ScrapeError, ScrapeResult};
use crate::url_guard::UrlGuard;

/// Body POSTed to the callback URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub job_id: String,
    pub url_index: u32,
    pub content: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub url: String,
}

/// What a successful delivery took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempts: u32,
    /// Backoff slept before each retry
    pub delays: Vec<Duration>,
}

#[derive(Clone)]
pub struct CallbackDispatcher {
    client: Client,
    guard: Arc<UrlGuard>,
    config: CallbackConfig,
    restarting: watch::Receiver<bool>,
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CallbackDispatcher {
    /// `restarting` is the governor's restart signal
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        config: CallbackConfig,
        guard: Arc<UrlGuard>,
        restarting: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        // a redirect could lead outside the trusted origins
        let client = Client::builder()
            .user_agent(concat!("partwatch-extractor/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect::Policy::none())
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build callback HTTP client")?;

        Ok(Self {
            client,
            guard,
            config,
            restarting,
        })
    }

    /// Delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.config.base_delay.saturating_mul(1 << exponent);
        if *self.restarting.borrow() {
            delay += self.config.restart_extra_delay;
        }
        delay
    }

    /// POST `payload` to `callback_url`, retrying on failure
    ///
    /// # Errors
    ///
    /// `ScrapeError::Validation` if the URL is not trusted (not retried),
    /// `ScrapeError::CallbackDelivery` once every attempt has failed.
    pub async fn deliver(
        &self,
        callback_url: &str,
        payload: &CallbackPayload,
    ) -> ScrapeResult<DeliveryReport> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delays = Vec::new();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.guard.ensure_callback(callback_url)?;

            match self.client.post(callback_url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(
                        job_id = %payload.job_id,
                        url_index = payload.url_index,
                        attempt,
                        "Callback delivered"
                    );
                    return Ok(DeliveryReport {
                        attempts: attempt,
                        delays,
                    });
                }
                Ok(response) => {
                    last_error = format!("HTTP {}", response.status().as_u16());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            warn!(
                job_id = %payload.job_id,
                url_index = payload.url_index,
                attempt,
                max_attempts,
                error = %last_error,
                "Callback attempt failed"
            );

            if attempt < max_attempts {
                let delay = self.backoff(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Backing off before callback retry");
                delays.push(delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(ScrapeError::CallbackDelivery {
            attempts: max_attempts,
            message: last_error,
        })
    }
}
