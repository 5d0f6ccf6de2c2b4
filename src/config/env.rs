//! Environment loader
//!
//! Reads the deployment variables on top of the builder defaults. The
//! lookup is injectable so tests do not have to mutate process env.

use anyhow::{Context, Result};
use std::time::Duration;

use super::builder::ServiceConfigBuilder;
use super::types::{RestartPolicy, ServiceConfig};

impl ServiceConfig {
    /// Load configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed, or if the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Same as [`ServiceConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder: ServiceConfigBuilder = Self::builder();

        if let Some(port) = get("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{port}'"))?;
            builder = builder.port(port);
        }

        if let Some(secret) = get("API_SECRET") {
            builder = builder.api_secret(secret);
        }

        if let Some(origins) = get("ALLOWED_CALLBACK_ORIGINS") {
            builder = builder.allowed_callback_origins(split_list(&origins));
        }

        if let Some(flag) = get("RESOLVE_DNS") {
            builder = builder.resolve_dns(parse_bool(&flag));
        }

        if let Some(flag) = get("HEADLESS") {
            builder = builder.headless(parse_bool(&flag));
        }

        if let Some(path) = get("CHROME_PATH") {
            builder = builder.chrome_executable(path);
        }

        let warning = parse_u64(&get, "MEMORY_WARNING_MB")?;
        let restart = parse_u64(&get, "MEMORY_RESTART_MB")?;
        if warning.is_some() || restart.is_some() {
            let defaults = ServiceConfig::default().memory;
            builder = builder.memory_thresholds_mb(
                warning.unwrap_or(defaults.warning_mb),
                restart.unwrap_or(defaults.restart_mb),
            );
        }

        if let Some(policy) = get("RESTART_POLICY") {
            let policy: RestartPolicy = policy
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("RESTART_POLICY")?;
            builder = builder.restart_policy(policy);
        }

        if let Some(secs) = parse_u64(&get, "DRAIN_TIMEOUT_SECS")? {
            builder = builder.drain_timeout(Duration::from_secs(secs));
        }

        if let Some(secs) = parse_u64(&get, "MEMORY_SAMPLE_INTERVAL_SECS")? {
            builder = builder.sample_interval(Duration::from_secs(secs));
        }

        if let Some(max) = parse_u64(&get, "MAX_LAUNCH_FAILURES")? {
            builder = builder.max_launch_failures(u32::try_from(max).unwrap_or(u32::MAX));
        }

        if let Some(max) = parse_u64(&get, "MAX_BATCH_URLS")? {
            builder = builder.max_batch_urls(usize::try_from(max).unwrap_or(usize::MAX));
        }

        if let Some(server) = get("PROXY_SERVER") {
            builder = builder.proxy(server, get("PROXY_USERNAME"), get("PROXY_PASSWORD"));
        }

        if let Some(path) = get("SITE_STRATEGIES_PATH") {
            builder = builder.site_strategies_path(path);
        }

        builder.build()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_u64<F>(get: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .with_context(|| format!("{key} must be a non-negative integer, got '{v}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_reads_deployment_variables() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("API_SECRET", "s3cret"),
            (
                "ALLOWED_CALLBACK_ORIGINS",
                "https://app.example.com/, http://localhost:5173",
            ),
            ("MEMORY_WARNING_MB", "300"),
            ("MEMORY_RESTART_MB", "350"),
            ("RESTART_POLICY", "immediate"),
            ("MAX_LAUNCH_FAILURES", "5"),
        ]))
        .unwrap();

        assert_eq!(config.server.listen_addr.port(), 8081);
        assert_eq!(config.server.api_secret.as_deref(), Some("s3cret"));
        assert_eq!(
            config.guard.allowed_callback_origins,
            vec!["https://app.example.com", "http://localhost:5173"]
        );
        assert_eq!(config.memory.warning_mb, 300);
        assert_eq!(config.memory.restart_mb, 350);
        assert_eq!(config.memory.restart_policy, RestartPolicy::Immediate);
        assert_eq!(config.memory.max_launch_failures, 5);
    }

    #[test]
    fn test_malformed_port_is_an_error() {
        let err = ServiceConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(format!("{err:#}").contains("PORT"));
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server.listen_addr.port(), 3000);
        assert!(config.proxy.server.is_none());
    }
}
