//! Configuration types for the orchestrator.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default number of records requested per page (`_count`).
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Default maximum number of next-page fetches per node.
pub const DEFAULT_MAX_PAGES: usize = 10;
/// Default pagination safety ceiling on the reported total.
pub const DEFAULT_MAX_TOTAL: usize = 10_000;

/// Configuration for the [`Orchestrator`](crate::Orchestrator).
///
/// # Example
///
/// ```rust
/// use fhir_plan_executor::{CacheConfig, OrchestratorConfig};
/// use std::time::Duration;
///
/// let config = OrchestratorConfig::builder()
///     .with_cache(CacheConfig::default())
///     .with_page_size(50)
///     .with_max_pages(5)
///     .with_default_sort("Encounter", "-date")
///     .with_request_timeout(Duration::from_secs(30))
///     .build();
///
/// assert_eq!(config.page_size, 50);
/// assert_eq!(config.default_sorts.get("Observation").map(String::as_str), Some("-date"));
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Cache configuration (None = caching disabled).
    pub cache: Option<CacheConfig>,
    /// Records requested per page, sent as `_count` unless the node sets it.
    pub page_size: usize,
    /// Maximum number of next-page fetches per node.
    pub max_pages: usize,
    /// Pagination only happens when the reported total is below this value.
    pub max_total: usize,
    /// Resource type → `_sort` value applied unless the node sets `_sort`.
    pub default_sorts: BTreeMap<String, String>,
    /// Timeout for each data service call (None = no timeout).
    pub request_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut default_sorts = BTreeMap::new();
        default_sorts.insert("Observation".to_string(), "-date".to_string());
        Self {
            cache: Some(CacheConfig::default()),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            max_total: DEFAULT_MAX_TOTAL,
            default_sorts,
            request_timeout: None,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new builder starting from the defaults.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: OrchestratorConfig::default(),
        }
    }
}

/// Builder for OrchestratorConfig.
#[derive(Debug, Clone)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Enables caching with the given configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = Some(cache);
        self
    }

    /// Disables caching.
    pub fn without_cache(mut self) -> Self {
        self.config.cache = None;
        self
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Sets the maximum number of next-page fetches.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    /// Sets the pagination safety ceiling.
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.config.max_total = max_total;
        self
    }

    /// Adds or replaces the default `_sort` for a resource type.
    pub fn with_default_sort(
        mut self,
        resource_type: impl Into<String>,
        sort: impl Into<String>,
    ) -> Self {
        self.config
            .default_sorts
            .insert(resource_type.into(), sort.into());
        self
    }

    /// Removes every default `_sort`.
    pub fn without_default_sorts(mut self) -> Self {
        self.config.default_sorts.clear();
        self
    }

    /// Sets the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Builds the OrchestratorConfig.
    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

/// Configuration for the query cache.
///
/// # Example
///
/// ```rust
/// use fhir_plan_executor::CacheConfig;
/// use std::time::Duration;
///
/// let cache = CacheConfig {
///     max_entries: 500,
///     ttl: Duration::from_secs(60),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached node results.
    pub max_entries: usize,
    /// Time-to-live for cached entries.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(300),
        }
    }
}
