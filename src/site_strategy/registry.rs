//! Registry of site strategies keyed by name
//!
//! Built-in entries cover the manufacturers the service was written for;
//! a JSON file can override them or add more without a rebuild.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::SiteStrategy;
use super::variants::{
    GenericStrategy, PrimaryFallbackStrategy, RegionalProxyStrategy, RegionalSite,
    SearchFormStrategy,
};
use crate::config::BlockPolicy;
use crate::error::{ScrapeError, ScrapeResult};
use crate::proxy::ProxySource;

/// Shape of a site flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StrategyKind {
    Generic,
    Search {
        #[serde(rename = "searchUrl")]
        search_url: String,
        #[serde(rename = "inputSelector")]
        input_selector: String,
        #[serde(default, rename = "submitSelector")]
        submit_selector: Option<String>,
    },
    Fallback,
    Regional {
        sites: Vec<RegionalSite>,
    },
}

/// One registry entry as written in the overrides file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: StrategyKind,
    #[serde(default)]
    pub failure_markers: Vec<String>,
    #[serde(default)]
    pub block_policy: Option<BlockPolicy>,
    #[serde(default)]
    pub settle_secs: Option<u64>,
}

impl SiteDefinition {
    fn build(&self, default_policy: BlockPolicy, proxies: &ProxySource) -> Arc<dyn SiteStrategy> {
        let policy = self.block_policy.unwrap_or(default_policy);
        let settle = self.settle_secs.map(Duration::from_secs);
        let markers = self.failure_markers.clone();

        match &self.kind {
            StrategyKind::Generic => Arc::new(
                GenericStrategy::new(&self.name, policy)
                    .with_markers(markers)
                    .with_settle(settle),
            ),
            StrategyKind::Search {
                search_url,
                input_selector,
                submit_selector,
            } => Arc::new(
                SearchFormStrategy::new(
                    &self.name,
                    search_url,
                    input_selector,
                    submit_selector.clone(),
                    policy,
                )
                .with_markers(markers)
                .with_settle(settle),
            ),
            StrategyKind::Fallback => Arc::new(
                PrimaryFallbackStrategy::new(&self.name, policy)
                    .with_markers(markers)
                    .with_settle(settle),
            ),
            StrategyKind::Regional { sites } => Arc::new(
                RegionalProxyStrategy::new(&self.name, sites.clone(), proxies.clone(), policy)
                    .with_markers(markers)
                    .with_settle(settle),
            ),
        }
    }
}

/// Definitions shipped with the service
#[must_use]
pub fn builtin_definitions() -> Vec<SiteDefinition> {
    vec![
        SiteDefinition {
            name: "generic".into(),
            kind: StrategyKind::Generic,
            failure_markers: Vec::new(),
            block_policy: None,
            settle_secs: None,
        },
        SiteDefinition {
            name: "omron".into(),
            kind: StrategyKind::Fallback,
            failure_markers: vec![
                "no products match".into(),
                "the product you are looking for could not be found".into(),
                "該当する製品はありません".into(),
            ],
            block_policy: None,
            settle_secs: None,
        },
        SiteDefinition {
            name: "mitsubishi".into(),
            kind: StrategyKind::Search {
                search_url: "https://www.mitsubishielectric.com/fa/products/search/index.html"
                    .into(),
                input_selector: "input[type='search'], input[name='q'], input[name='keyword']"
                    .into(),
                submit_selector: None,
            },
            failure_markers: vec![
                "no results were found".into(),
                "0 results".into(),
                "該当する情報はありませんでした".into(),
            ],
            block_policy: None,
            settle_secs: Some(3),
        },
        SiteDefinition {
            name: "keyence".into(),
            kind: StrategyKind::Regional {
                sites: vec![
                    RegionalSite {
                        region: "us".into(),
                        url_template: "https://www.keyence.com/search/?q={model}".into(),
                    },
                    RegionalSite {
                        region: "jp".into(),
                        url_template: "https://www.keyence.co.jp/search/?q={model}".into(),
                    },
                ],
            },
            failure_markers: vec![
                "no matching products".into(),
                "該当する商品が見つかりませんでした".into(),
            ],
            block_policy: Some(BlockPolicy::challenge_friendly()),
            settle_secs: None,
        },
    ]
}

/// Strategies by name
#[derive(Clone)]
pub struct SiteRegistry {
    entries: BTreeMap<String, Arc<dyn SiteStrategy>>,
    default_policy: BlockPolicy,
    proxies: ProxySource,
}

impl std::fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteRegistry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SiteRegistry {
    /// Empty registry; `generic` must still be registered before use
    #[must_use]
    pub fn empty(default_policy: BlockPolicy, proxies: ProxySource) -> Self {
        Self {
            entries: BTreeMap::new(),
            default_policy,
            proxies,
        }
    }

    #[must_use]
    pub fn with_builtins(default_policy: BlockPolicy, proxies: ProxySource) -> Self {
        let mut registry = Self::empty(default_policy, proxies);
        for definition in builtin_definitions() {
            registry.define(&definition);
        }
        registry
    }

    /// Add or replace an entry from a definition
    pub fn define(&mut self, definition: &SiteDefinition) {
        let strategy = definition.build(self.default_policy, &self.proxies);
        self.register(strategy);
    }

    /// Add or replace an entry
    pub fn register(&mut self, strategy: Arc<dyn SiteStrategy>) {
        let name = strategy.name().to_ascii_lowercase();
        if self.entries.insert(name.clone(), strategy).is_some() {
            tracing::info!(site = %name, "Site strategy overridden");
        }
    }

    /// Apply overrides from a JSON array of definitions
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or names an invalid entry.
    pub fn load_overrides(&mut self, path: &Path) -> anyhow::Result<usize> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("failed to read site strategies from {}: {e}", path.display())
        })?;
        self.load_overrides_str(&raw)
    }

    /// Same as [`Self::load_overrides`], from a string
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an entry whose name is not a valid path segment.
    pub fn load_overrides_str(&mut self, raw: &str) -> anyhow::Result<usize> {
        let definitions: Vec<SiteDefinition> = serde_json::from_str(raw)?;
        for definition in &definitions {
            let valid_name = !definition.name.is_empty()
                && definition
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid_name {
                anyhow::bail!("invalid site strategy name '{}'", definition.name);
            }
        }
        for definition in &definitions {
            self.define(definition);
        }
        Ok(definitions.len())
    }

    /// # Errors
    ///
    /// Returns `ScrapeError::UnknownSite` for unregistered names.
    pub fn get(&self, name: &str) -> ScrapeResult<Arc<dyn SiteStrategy>> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ScrapeError::UnknownSite(name.to_string()))
    }

    /// Browser strategy used by plain `/scrape` requests
    ///
    /// # Errors
    ///
    /// Returns `ScrapeError::UnknownSite` if `generic` was removed.
    pub fn generic(&self) -> ScrapeResult<Arc<dyn SiteStrategy>> {
        self.get("generic")
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
