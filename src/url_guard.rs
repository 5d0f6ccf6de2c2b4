//! URL / origin validation
//!
//! Every target URL is checked before the first network call and again for
//! each redirect hop or browser navigation; every callback URL is checked
//! against the configured trusted origins before each delivery attempt.
//! Checks never panic and never error: they return a [`ValidationOutcome`].

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::LazyLock;
use url::{Host, Url};

use crate::config::GuardConfig;
use crate::error::{ScrapeError, ScrapeResult};

static BLOCKED_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16", // link-local, cloud metadata
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "224.0.0.0/4",
        "240.0.0.0/4",
        "::/128",
        "::1/128",
        "64:ff9b::/96",   // NAT64 well-known prefix
        "64:ff9b:1::/48", // NAT64 local-use
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .iter()
    .map(|cidr| cidr.parse().expect("BLOCKED_NETS: hardcoded CIDR is valid"))
    .collect()
});

const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "metadata.gke.internal",
    "instance-data",
];

/// Structured validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    /// Convert into a `Result`, prefixing the reason with `what`
    ///
    /// # Errors
    ///
    /// Returns `ScrapeError::Validation` when the outcome is not valid.
    pub fn into_result(self, what: &str) -> ScrapeResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(ScrapeError::Validation(format!(
                "{what}: {}",
                self.reason.unwrap_or_else(|| "rejected".into())
            )))
        }
    }
}

/// A trusted callback origin
#[derive(Debug, Clone)]
struct CallbackOrigin {
    host: String,
    port: Option<u16>,
    loopback: bool,
}

impl CallbackOrigin {
    fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        let host = normalize_host(url.host()?);
        let loopback = is_loopback_host(&host);
        Some(Self {
            port: url.port_or_known_default(),
            host,
            loopback,
        })
    }

    fn matches(&self, host: &str, port: Option<u16>) -> bool {
        if self.loopback {
            // loopback origins are only trusted on the exact port
            return host == self.host && port == self.port;
        }
        host == self.host || host.ends_with(&format!(".{}", self.host))
    }
}

/// Validator for target and callback URLs
#[derive(Debug, Clone)]
pub struct UrlGuard {
    allowed_hosts: HashSet<String>,
    callback_origins: Vec<CallbackOrigin>,
    resolve_dns: bool,
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}

impl UrlGuard {
    #[must_use]
    pub fn new(config: &GuardConfig) -> Self {
        let callback_origins: Vec<CallbackOrigin> = config
            .allowed_callback_origins
            .iter()
            .filter_map(|raw| {
                let parsed = CallbackOrigin::parse(raw);
                if parsed.is_none() {
                    tracing::warn!(origin = %raw, "Ignoring unparseable callback origin");
                }
                parsed
            })
            .collect();

        Self {
            allowed_hosts: config
                .allowed_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            callback_origins,
            resolve_dns: config.resolve_dns,
        }
    }

    /// Exempt a host from the private-address checks.
    #[must_use]
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into().to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn allowed_hosts(&self) -> &HashSet<String> {
        &self.allowed_hosts
    }

    #[must_use]
    pub fn resolve_dns(&self) -> bool {
        self.resolve_dns
    }

    /// Static check of a target URL (no DNS)
    #[must_use]
    pub fn check_target(&self, raw: &str) -> ValidationOutcome {
        let url = match parse_http_url(raw) {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };
        self.check_target_url(&url)
    }

    /// Static check of an already-parsed target URL
    #[must_use]
    pub fn check_target_url(&self, url: &Url) -> ValidationOutcome {
        if !matches!(url.scheme(), "http" | "https") {
            return ValidationOutcome::rejected(format!(
                "scheme '{}' is not allowed",
                url.scheme()
            ));
        }

        let Some(host) = url.host() else {
            return ValidationOutcome::rejected("URL has no host");
        };
        let host_name = normalize_host(host.clone());

        if self.allowed_hosts.contains(&host_name) {
            return ValidationOutcome::ok();
        }

        match host {
            Host::Ipv4(ip) => check_ip(IpAddr::V4(ip)),
            Host::Ipv6(ip) => check_ip(IpAddr::V6(ip)),
            Host::Domain(_) => {
                if is_blocked_hostname(&host_name) {
                    ValidationOutcome::rejected(format!("host '{host_name}' is not allowed"))
                } else {
                    ValidationOutcome::ok()
                }
            }
        }
    }

    /// Static check plus DNS resolution of the target host
    ///
    /// Every resolved address must pass; this catches public names that
    /// point at private addresses.
    pub async fn check_target_resolved(&self, raw: &str) -> ValidationOutcome {
        let url = match parse_http_url(raw) {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };

        let outcome = self.check_target_url(&url);
        if !outcome.valid || !self.resolve_dns {
            return outcome;
        }

        let Some(Host::Domain(domain)) = url.host() else {
            return outcome;
        };
        if self.allowed_hosts.contains(&domain.to_ascii_lowercase()) {
            return outcome;
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs = match tokio::net::lookup_host((domain, port)).await {
            Ok(addrs) => addrs,
            Err(e) => {
                return ValidationOutcome::rejected(format!(
                    "could not resolve host '{domain}': {e}"
                ));
            }
        };

        for addr in addrs {
            let verdict = check_ip(addr.ip());
            if !verdict.valid {
                return ValidationOutcome::rejected(format!(
                    "host '{domain}' resolves to blocked address {}",
                    addr.ip()
                ));
            }
        }

        outcome
    }

    /// Check a callback URL against the trusted origins
    #[must_use]
    pub fn check_callback(&self, raw: &str) -> ValidationOutcome {
        let url = match parse_http_url(raw) {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };

        if !url.username().is_empty() || url.password().is_some() {
            return ValidationOutcome::rejected("callback URL must not carry credentials");
        }

        let Some(host) = url.host() else {
            return ValidationOutcome::rejected("callback URL has no host");
        };
        let host = normalize_host(host);
        let port = url.port_or_known_default();

        if self.callback_origins.is_empty() {
            return ValidationOutcome::rejected("no callback origins are configured");
        }

        if self.callback_origins.iter().any(|o| o.matches(&host, port)) {
            ValidationOutcome::ok()
        } else {
            ValidationOutcome::rejected(format!("callback host '{host}' is not a trusted origin"))
        }
    }

    /// Boundary helper: validate a target and return the parsed URL
    ///
    /// # Errors
    ///
    /// Returns `ScrapeError::Validation` if the URL is unsafe or malformed.
    pub async fn ensure_target(&self, raw: &str) -> ScrapeResult<Url> {
        self.check_target_resolved(raw)
            .await
            .into_result("target URL rejected")?;
        Url::parse(raw).map_err(|e| ScrapeError::Validation(format!("target URL rejected: {e}")))
    }

    /// Boundary helper for callback URLs
    ///
    /// # Errors
    ///
    /// Returns `ScrapeError::Validation` if the callback is not trusted.
    pub fn ensure_callback(&self, raw: &str) -> ScrapeResult<()> {
        self.check_callback(raw).into_result("callback URL rejected")
    }
}

fn parse_http_url(raw: &str) -> Result<Url, ValidationOutcome> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ValidationOutcome::rejected(format!("malformed URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationOutcome::rejected(format!(
            "scheme '{}' is not allowed",
            url.scheme()
        )));
    }
    Ok(url)
}

fn normalize_host(host: Host<&str>) -> String {
    match host {
        Host::Domain(d) => d.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    }
}

fn is_blocked_hostname(host: &str) -> bool {
    BLOCKED_HOSTS.contains(&host) || host.ends_with(".localhost")
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Whether `ip` falls in a private, loopback, link-local or reserved range
#[must_use]
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    // ::ffff:a.b.c.d and the deprecated ::a.b.c.d are checked as IPv4
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4().map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    };
    BLOCKED_NETS.iter().any(|net| net.contains(&ip))
}

fn check_ip(ip: IpAddr) -> ValidationOutcome {
    if is_blocked_ip(ip) {
        ValidationOutcome::rejected(format!("address {ip} is in a blocked range"))
    } else {
        ValidationOutcome::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> UrlGuard {
        UrlGuard::new(&GuardConfig {
            allowed_callback_origins: vec![
                "https://app.example.com".into(),
                "http://localhost:5173".into(),
            ],
            resolve_dns: false,
            allowed_hosts: Vec::new(),
        })
    }

    #[test]
    fn test_ipv4_mapped_ipv6_is_checked_as_ipv4() {
        let mapped: IpAddr = "::ffff:10.1.2.3".parse().unwrap();
        assert!(is_blocked_ip(mapped));
        let public: IpAddr = "::ffff:93.184.216.34".parse().unwrap();
        assert!(!is_blocked_ip(public));
    }

    #[test]
    fn test_ipv4_compatible_and_nat64_blocked() {
        let compatible: IpAddr = "::10.0.0.5".parse().unwrap();
        assert!(is_blocked_ip(compatible));
        let compat_meta: IpAddr = "::169.254.169.254".parse().unwrap();
        assert!(is_blocked_ip(compat_meta));
        let nat64: IpAddr = "64:ff9b::a9fe:a9fe".parse().unwrap();
        assert!(is_blocked_ip(nat64));
        let public_v6: IpAddr = "2606:2800:220:1:248:1893:25c8:1946".parse().unwrap();
        assert!(!is_blocked_ip(public_v6));
    }

    #[test]
    fn test_localhost_subdomains_blocked() {
        assert!(!guard().check_target("http://api.localhost/x").valid);
        assert!(!guard().check_target("http://LOCALHOST./").valid);
    }

    #[test]
    fn test_callback_subdomain_matches_public_origin() {
        let g = guard();
        assert!(g.check_callback("https://jobs.app.example.com/cb").valid);
        assert!(g.check_callback("https://app.example.com:8443/cb").valid);
        assert!(!g.check_callback("https://evilapp.example.com/cb").valid);
    }

    #[test]
    fn test_loopback_callback_needs_exact_port() {
        let g = guard();
        assert!(g.check_callback("http://localhost:5173/api/cb").valid);
        assert!(!g.check_callback("http://localhost:8080/api/cb").valid);
    }

    #[test]
    fn test_callback_with_credentials_rejected() {
        let outcome = guard().check_callback("https://user:pw@app.example.com/cb");
        assert!(!outcome.valid);
        assert!(outcome.reason.unwrap().contains("credentials"));
    }

    #[test]
    fn test_allow_host_bypasses_private_check() {
        let g = guard().allow_host("127.0.0.1");
        assert!(g.check_target("http://127.0.0.1:8080/page").valid);
    }
}
