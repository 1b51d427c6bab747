//! Runtime configuration and the source registry (`sources.yaml`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use psa_adapters::{adapter_for_family, default_store_url, ImageResolver, NormalizeContext, SourceAdapter};
use psa_core::{RatingPlaceholder, SourceFamily};
use psa_storage::{MemoryTableStore, PgTableStore, RestStoreConfig, RestTableStore, TableStore};
use serde::{Deserialize, Serialize};

use crate::SearchError;

pub const DEFAULT_SUGGESTION_LIMIT: usize = 8;
const SUGGESTION_LIMIT_RANGE: (usize, usize) = (4, 8);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed source fails the whole search.
    #[default]
    FailFast,
    /// Failed sources are skipped and reported as warnings.
    Partial,
}

impl FromStr for FailurePolicy {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" => Ok(Self::FailFast),
            "partial" => Ok(Self::Partial),
            other => Err(SearchError::Config(format!("unknown source failure policy `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Rest,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rest" | "supabase" => Ok(Self::Rest),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(SearchError::Config(format!("unknown store backend `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub table: String,
    pub family: SourceFamily,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub image_origin: Option<String>,
    /// Push price bounds down into the source query.
    #[serde(default)]
    pub native_price_filter: bool,
    /// Push price/rating ordering into the source query on term-less browses.
    #[serde(default)]
    pub native_ordering: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn new(table: impl Into<String>, family: SourceFamily, display_name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            family,
            display_name: display_name.into(),
            enabled: true,
            store_url: None,
            image_origin: None,
            native_price_filter: false,
            native_ordering: false,
        }
    }

    pub fn adapter(&self) -> &'static dyn SourceAdapter {
        adapter_for_family(self.family)
    }

    pub fn store_url(&self) -> &str {
        self.store_url.as_deref().unwrap_or_else(|| default_store_url(self.family))
    }

    pub fn normalize_context(&self, rating: RatingPlaceholder) -> NormalizeContext {
        let origin = self.image_origin.as_deref().unwrap_or_else(|| self.store_url());
        NormalizeContext::for_family(self.table.clone(), self.family)
            .with_store_url(self.store_url())
            .with_images(ImageResolver::new(origin))
            .with_rating(rating)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig::new("amazon_products_1", SourceFamily::Marketplace, "Amazon (catalog 1)"),
                SourceConfig::new("amazon_products_2", SourceFamily::Marketplace, "Amazon (catalog 2)"),
                SourceConfig::new("flipkart_1", SourceFamily::LargeRetailer, "Flipkart (catalog 1)"),
                SourceConfig::new("flipkart_2", SourceFamily::LargeRetailer, "Flipkart (catalog 2)"),
                SourceConfig::new("fashion_1", SourceFamily::Fashion, "Fashion"),
            ],
        }
    }
}

impl SourceRegistry {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self { sources }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, SearchError> {
        let registry: Self =
            serde_yaml::from_str(text).map_err(|e| SearchError::Config(format!("invalid source registry: {e}")))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Reads the registry file, or falls back to the built-in registry when it does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "no source registry file, using built-in sources");
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, table: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.table == table)
    }

    fn validate(&self) -> Result<(), SearchError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.table.trim().is_empty() {
                return Err(SearchError::Config("source with empty table name".to_string()));
            }
            if !seen.insert(source.table.as_str()) {
                return Err(SearchError::Config(format!("duplicate source table `{}`", source.table)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub backend: StoreBackend,
    pub fixtures_dir: PathBuf,
    pub sources_path: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub database_url: Option<String>,
    pub http_timeout_secs: u64,
    pub failure_policy: FailurePolicy,
    pub rating_placeholder: RatingPlaceholder,
    pub suggestion_limit: usize,
    pub web_port: u16,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            fixtures_dir: PathBuf::from("./fixtures"),
            sources_path: PathBuf::from("./sources.yaml"),
            supabase_url: None,
            supabase_key: None,
            database_url: None,
            http_timeout_secs: 20,
            failure_policy: FailurePolicy::FailFast,
            rating_placeholder: RatingPlaceholder::Deterministic,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
            web_port: 8000,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Result<Self, SearchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SearchError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let suggestion_limit = var("PSA_SUGGESTION_LIMIT")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.suggestion_limit)
            .clamp(SUGGESTION_LIMIT_RANGE.0, SUGGESTION_LIMIT_RANGE.1);

        Ok(Self {
            backend: var("PSA_BACKEND").map(|v| v.parse::<StoreBackend>()).transpose()?.unwrap_or(defaults.backend),
            fixtures_dir: var("PSA_FIXTURES_DIR").map(PathBuf::from).unwrap_or(defaults.fixtures_dir),
            sources_path: var("PSA_SOURCES_PATH").map(PathBuf::from).unwrap_or(defaults.sources_path),
            supabase_url: var("SUPABASE_URL"),
            supabase_key: var("SUPABASE_SERVICE_ROLE_KEY"),
            database_url: var("DATABASE_URL"),
            http_timeout_secs: var("PSA_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            failure_policy: var("PSA_SOURCE_FAILURE_POLICY")
                .map(|v| v.parse::<FailurePolicy>())
                .transpose()?
                .unwrap_or(defaults.failure_policy),
            rating_placeholder: var("PSA_RATING_PLACEHOLDER")
                .map(|v| v.parse::<RatingPlaceholder>().map_err(SearchError::Config))
                .transpose()?
                .unwrap_or(defaults.rating_placeholder),
            suggestion_limit,
            web_port: var("PSA_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.web_port),
        })
    }

    pub async fn build_store(&self) -> anyhow::Result<Arc<dyn TableStore>> {
        match self.backend {
            StoreBackend::Memory => {
                let store = MemoryTableStore::from_fixtures_dir(&self.fixtures_dir)
                    .with_context(|| format!("loading fixtures from {}", self.fixtures_dir.display()))?;
                tracing::info!(tables = ?store.table_names(), "using in-memory table store");
                Ok(Arc::new(store))
            }
            StoreBackend::Rest => {
                let (Some(url), Some(key)) = (&self.supabase_url, &self.supabase_key) else {
                    bail!("rest backend needs SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY");
                };
                let mut config = RestStoreConfig::new(url.clone(), key.clone());
                config.timeout = Duration::from_secs(self.http_timeout_secs);
                tracing::info!(base_url = %url, "using REST table store");
                Ok(Arc::new(RestTableStore::new(config)?))
            }
            StoreBackend::Postgres => {
                let Some(url) = &self.database_url else {
                    bail!("postgres backend needs DATABASE_URL");
                };
                let store = PgTableStore::connect(url, 8)
                    .await
                    .context("connecting to postgres")?;
                tracing::info!("using postgres table store");
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_defaults_without_env() {
        let config = SearchConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, SearchConfig::default());
    }

    #[test]
    fn config_reads_and_clamps_variables() {
        let config = SearchConfig::from_lookup(lookup(&[
            ("PSA_BACKEND", "rest"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("PSA_SOURCE_FAILURE_POLICY", "partial"),
            ("PSA_RATING_PLACEHOLDER", "random"),
            ("PSA_SUGGESTION_LIMIT", "50"),
            ("PSA_HTTP_TIMEOUT_SECS", "nope"),
            ("PSA_WEB_PORT", "9090"),
        ]))
        .unwrap();
        assert_eq!(config.backend, StoreBackend::Rest);
        assert_eq!(config.supabase_url.as_deref(), Some("https://x.supabase.co"));
        assert_eq!(config.failure_policy, FailurePolicy::Partial);
        assert_eq!(config.rating_placeholder, RatingPlaceholder::Random);
        assert_eq!(config.suggestion_limit, 8);
        assert_eq!(config.http_timeout_secs, 20);
        assert_eq!(config.web_port, 9090);

        let low = SearchConfig::from_lookup(lookup(&[("PSA_SUGGESTION_LIMIT", "1")])).unwrap();
        assert_eq!(low.suggestion_limit, 4);
    }

    #[test]
    fn config_rejects_unknown_modes() {
        assert!(SearchConfig::from_lookup(lookup(&[("PSA_BACKEND", "mongo")])).is_err());
        assert!(SearchConfig::from_lookup(lookup(&[("PSA_SOURCE_FAILURE_POLICY", "maybe")])).is_err());
        assert!(SearchConfig::from_lookup(lookup(&[("PSA_RATING_PLACEHOLDER", "zero")])).is_err());
    }

    #[test]
    fn registry_yaml_applies_defaults() {
        let registry = SourceRegistry::from_yaml_str(
            r#"
sources:
  - table: fashion_1
    family: fashion
    display_name: Fashion
  - table: flipkart_1
    family: large_retailer
    display_name: Flipkart
    enabled: false
    image_origin: https://img.example.com
    native_price_filter: true
"#,
        )
        .unwrap();
        assert_eq!(registry.enabled().count(), 1);
        let flipkart = registry.get("flipkart_1").unwrap();
        assert!(flipkart.native_price_filter);
        assert!(!flipkart.native_ordering);
        assert_eq!(flipkart.store_url(), "https://www.flipkart.com");
        let ctx = flipkart.normalize_context(RatingPlaceholder::Deterministic);
        assert_eq!(ctx.images.base_origin(), "https://img.example.com");
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_families() {
        let dup = "sources:\n  - {table: a, family: fashion, display_name: A}\n  - {table: a, family: fashion, display_name: B}\n";
        assert!(SourceRegistry::from_yaml_str(dup).is_err());
        let bad = "sources:\n  - {table: a, family: grocery, display_name: A}\n";
        assert!(SourceRegistry::from_yaml_str(bad).is_err());
    }

    #[tokio::test]
    async fn missing_registry_file_uses_builtin_sources() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::load(&dir.path().join("sources.yaml")).await.unwrap();
        let tables = registry.sources.iter().map(|s| s.table.as_str()).collect::<Vec<_>>();
        assert_eq!(
            tables,
            vec!["amazon_products_1", "amazon_products_2", "flipkart_1", "flipkart_2", "fashion_1"]
        );
    }
}
