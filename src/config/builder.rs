//! Fluent builder for `ServiceConfig`
//!
//! Every field has a default, so unlike a typestate builder nothing is
//! required; `build()` only rejects combinations that cannot work.

use anyhow::{Result, anyhow, bail};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::types::{BlockPolicy, RestartPolicy, ServiceConfig};

#[derive(Debug, Clone, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfig {
    /// Create a builder for configuring a `ServiceConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server.listen_addr = addr;
        self
    }

    /// Set the listening port, keeping the bind address
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.listen_addr.set_port(port);
        self
    }

    /// Set the shared secret; an empty string disables authentication
    #[must_use]
    pub fn api_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.config.server.api_secret = (!secret.trim().is_empty()).then_some(secret);
        self
    }

    #[must_use]
    pub fn max_batch_urls(mut self, max: usize) -> Self {
        self.config.server.max_batch_urls = max;
        self
    }

    #[must_use]
    pub fn cors_enabled(mut self, enabled: bool) -> Self {
        self.config.server.cors_enabled = enabled;
        self
    }

    #[must_use]
    pub fn allowed_callback_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.guard.allowed_callback_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Exempt a host from the private-address check
    #[must_use]
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.config.guard.allowed_hosts.push(host.into());
        self
    }

    #[must_use]
    pub fn resolve_dns(mut self, enabled: bool) -> Self {
        self.config.guard.resolve_dns = enabled;
        self
    }

    #[must_use]
    pub fn html_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch.html_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pdf_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch.pdf_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_pdf_bytes(mut self, bytes: u64) -> Self {
        self.config.fetch.max_pdf_bytes = bytes;
        self
    }

    #[must_use]
    pub fn min_html_chars(mut self, chars: usize) -> Self {
        self.config.fetch.min_html_chars = chars;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.browser.headless = headless;
        self
    }

    #[must_use]
    pub fn chrome_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.browser.chrome_executable = Some(path.into());
        self
    }

    #[must_use]
    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.config.browser.navigation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn extraction_timeout(mut self, timeout: Duration) -> Self {
        self.config.browser.extraction_timeout = timeout;
        self
    }

    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.browser.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.browser.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn challenge_settle_delay(mut self, delay: Duration) -> Self {
        self.config.browser.challenge_settle_delay = delay;
        self
    }

    #[must_use]
    pub fn min_content_chars(mut self, chars: usize) -> Self {
        self.config.browser.min_content_chars = chars;
        self
    }

    #[must_use]
    pub fn block_policy(mut self, policy: BlockPolicy) -> Self {
        self.config.browser.block_policy = policy;
        self
    }

    #[must_use]
    pub fn memory_thresholds_mb(mut self, warning: u64, restart: u64) -> Self {
        self.config.memory.warning_mb = warning;
        self.config.memory.restart_mb = restart;
        self
    }

    #[must_use]
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.config.memory.restart_policy = policy;
        self
    }

    #[must_use]
    pub fn exit_grace(mut self, grace: Duration) -> Self {
        self.config.memory.exit_grace = grace;
        self
    }

    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.memory.drain_timeout = timeout;
        self
    }

    #[must_use]
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.memory.sample_interval = interval;
        self
    }

    #[must_use]
    pub fn max_launch_failures(mut self, failures: u32) -> Self {
        self.config.memory.max_launch_failures = failures;
        self
    }

    #[must_use]
    pub fn callback_attempts(mut self, attempts: u32) -> Self {
        self.config.callback.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn callback_base_delay(mut self, delay: Duration) -> Self {
        self.config.callback.base_delay = delay;
        self
    }

    #[must_use]
    pub fn callback_restart_extra_delay(mut self, delay: Duration) -> Self {
        self.config.callback.restart_extra_delay = delay;
        self
    }

    #[must_use]
    pub fn callback_timeout(mut self, timeout: Duration) -> Self {
        self.config.callback.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn proxy(
        mut self,
        server: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.config.proxy.server = Some(server.into());
        self.config.proxy.username = username;
        self.config.proxy.password = password;
        self
    }

    #[must_use]
    pub fn site_strategies_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.site_strategies_path = Some(path.into());
        self
    }

    /// Validate and produce the final configuration
    ///
    /// # Errors
    ///
    /// Returns an error if thresholds are inverted, a timeout is zero,
    /// or a callback origin does not parse as a URL.
    pub fn build(self) -> Result<ServiceConfig> {
        let config = self.config;

        if config.memory.warning_mb >= config.memory.restart_mb {
            bail!(
                "memory warning threshold ({} MB) must be below the restart threshold ({} MB)",
                config.memory.warning_mb,
                config.memory.restart_mb
            );
        }

        if config.callback.max_attempts == 0 {
            bail!("callback max_attempts must be at least 1");
        }

        if config.server.max_batch_urls == 0 {
            bail!("max_batch_urls must be at least 1");
        }

        if config.browser.extraction_timeout.is_zero()
            || config.browser.navigation_timeout.is_zero()
            || config.browser.startup_timeout.is_zero()
        {
            bail!("browser timeouts must be non-zero");
        }

        if config.browser.extraction_timeout > config.browser.navigation_timeout {
            tracing::warn!(
                extraction_secs = config.browser.extraction_timeout.as_secs(),
                navigation_secs = config.browser.navigation_timeout.as_secs(),
                "Extraction timeout is longer than navigation timeout"
            );
        }

        for origin in &config.guard.allowed_callback_origins {
            url::Url::parse(origin)
                .map_err(|e| anyhow!("Invalid callback origin '{origin}': {e}"))?;
        }

        Ok(config)
    }
}
