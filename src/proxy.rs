//! Proxy credential source for region-locked manufacturer sites
//!
//! One upstream proxy serves every region; the region is selected through
//! the username (`customer-acme-country-{region}` style), which is how most
//! residential proxy providers route.

use crate::config::ProxyConfig;

/// Resolved proxy for one browser launch
#[derive(Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub region: Option<String>,
}

impl std::fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySettings")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("region", &self.region)
            .finish()
    }
}

impl ProxySettings {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }

    /// `(username, password)` for an auth challenge
    #[must_use]
    pub fn credentials(&self) -> Option<(String, String)> {
        self.username
            .clone()
            .map(|user| (user, self.password.clone().unwrap_or_default()))
    }
}

/// Hands out per-region proxy settings
#[derive(Debug, Clone, Default)]
pub struct ProxySource {
    config: ProxyConfig,
}

impl ProxySource {
    #[must_use]
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.server.is_some()
    }

    /// Proxy for `region`, or `None` when no proxy is configured
    #[must_use]
    pub fn for_region(&self, region: &str) -> Option<ProxySettings> {
        let server = self.config.server.clone()?;
        let region = region.trim().to_ascii_lowercase();
        let username = self
            .config
            .username
            .as_ref()
            .map(|u| u.replace("{region}", &region));

        Some(ProxySettings {
            server,
            username,
            password: self.config.password.clone(),
            region: Some(region),
        })
    }
}
