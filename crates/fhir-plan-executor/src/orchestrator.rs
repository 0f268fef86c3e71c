//! Sequential plan execution.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use fhir_plan::{QueryNode, QueryPlan, SearchParams};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregate::apply_aggregations;
use crate::bundle::Bundle;
use crate::cache::{cache_key, CachedFetch, QueryCache};
use crate::config::OrchestratorConfig;
use crate::error::{ExecutorError, ExecutorResult, ServiceError};
use crate::resolver::resolve_filters;
use crate::result::{OrchestratorStats, QueryResult};
use crate::traits::DataService;

/// Page size parameter.
pub const COUNT_PARAM: &str = "_count";
/// Sort order parameter.
pub const SORT_PARAM: &str = "_sort";

/// Executes query plans against a [`DataService`].
///
/// Nodes run one at a time in the plan's execution order, because any node
/// may consume the output of an earlier one. A failing node never aborts the
/// plan: its [`QueryResult`] carries the error and execution continues.
///
/// The cache and statistics belong to this instance. Use one orchestrator per
/// pipeline run when unrelated requests must not share cached results.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use fhir_plan::{PlanBuilder, QuerySpec};
/// use fhir_plan_executor::{HttpDataService, Orchestrator};
///
/// let service = Arc::new(HttpDataService::new("https://fhir.example.org/r4")?);
/// let orchestrator = Orchestrator::new(service);
///
/// let spec = QuerySpec::from_json(r#"{"resourceType": "Condition", "filters": {"code": "44054006"}}"#)?;
/// let plan = PlanBuilder::with_default_table().build(&spec)?;
///
/// let results = orchestrator.execute_plan(&plan).await;
/// println!("{} conditions", results["main"].count());
/// println!("{}", orchestrator.stats());
/// ```
pub struct Orchestrator {
    service: Arc<dyn DataService>,
    config: OrchestratorConfig,
    cache: Option<QueryCache>,
    stats: RwLock<OrchestratorStats>,
}

impl Orchestrator {
    /// Creates an orchestrator with default configuration.
    pub fn new(service: Arc<dyn DataService>) -> Self {
        Self::with_config(service, OrchestratorConfig::default())
    }

    /// Creates an orchestrator with custom configuration.
    pub fn with_config(service: Arc<dyn DataService>, config: OrchestratorConfig) -> Self {
        let cache = config.cache.clone().map(QueryCache::new);
        Self {
            service,
            config,
            cache,
            stats: RwLock::new(OrchestratorStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the cache if enabled.
    pub fn cache(&self) -> Option<&QueryCache> {
        self.cache.as_ref()
    }

    /// Executes every node of a plan in execution order.
    ///
    /// The returned map holds one result per scheduled node, in execution
    /// order.
    pub async fn execute_plan(&self, plan: &QueryPlan) -> IndexMap<String, QueryResult> {
        let mut results = IndexMap::with_capacity(plan.nodes.len());
        for node in plan.scheduled_nodes() {
            let result = self.execute_node(node, &results).await;
            results.insert(node.id.clone(), result);
        }
        results
    }

    /// Executes a single node against the results produced so far.
    pub async fn execute_node(
        &self,
        node: &QueryNode,
        results: &IndexMap<String, QueryResult>,
    ) -> QueryResult {
        let start = Instant::now();
        debug!(node = %node.id, resource_type = %node.resource_type, "executor.node.start");

        let mut result = QueryResult::new(node.id.clone(), node.resource_type.clone());
        match self.fetch(node, results, &mut result).await {
            Ok(()) => {
                if !node.aggregations.is_empty() {
                    result.aggregated = apply_aggregations(&node.aggregations, &result.records);
                }
            }
            Err(err) => {
                warn!(node = %node.id, error = %err, records = result.records.len(), "executor.node.failed");
                result.error = Some(err.to_string());
            }
        }

        result.elapsed = start.elapsed();
        self.record(&result);
        debug!(
            node = %node.id,
            records = result.records.len(),
            pages = result.pages,
            cache_hit = result.cache_hit,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "executor.node.done"
        );
        result
    }

    /// Resolves, looks up the cache, dispatches and paginates.
    ///
    /// Records fetched before a failure stay on `result`.
    async fn fetch(
        &self,
        node: &QueryNode,
        results: &IndexMap<String, QueryResult>,
        result: &mut QueryResult,
    ) -> ExecutorResult<()> {
        let resolved = resolve_filters(node, results)?;
        let params = self.with_defaults(&node.resource_type, node.resolved_params(&resolved));
        result.params = params.clone();

        let key = cache_key(&node.resource_type, &params);
        if let Some(fetch) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!(node = %node.id, %key, "executor.cache.hit");
            result.raw = fetch.raw;
            result.records = fetch.records;
            result.search_modes = fetch.search_modes;
            result.total = fetch.total;
            result.pages = fetch.pages;
            result.cache_hit = true;
            return Ok(());
        }

        let raw = self
            .call(self.service.search(&node.resource_type, &params))
            .await?;
        let bundle = Bundle::from_value(&raw);
        result.raw = Some(raw);
        result.pages = 1;
        result.total = bundle.total;
        let next = bundle.next.clone();
        result.push_entries(bundle.entries);

        self.paginate(node, next, result).await?;

        if let Some(cache) = &self.cache {
            cache.set(
                key,
                CachedFetch {
                    raw: result.raw.clone(),
                    records: result.records.clone(),
                    search_modes: result.search_modes.clone(),
                    total: result.total,
                    pages: result.pages,
                },
            );
        }
        Ok(())
    }

    /// Follows `next` links while the reported total says more records exist.
    ///
    /// Stops silently at `max_pages` next-page fetches, or when the total is
    /// at or above `max_total`, since reported totals are not trusted.
    async fn paginate(
        &self,
        node: &QueryNode,
        mut next: Option<String>,
        result: &mut QueryResult,
    ) -> ExecutorResult<()> {
        let Some(total) = result.total else {
            return Ok(());
        };
        if total <= result.records.len() {
            return Ok(());
        }
        if total >= self.config.max_total {
            debug!(node = %node.id, total, ceiling = self.config.max_total, "executor.page.ceiling");
            return Ok(());
        }

        let mut fetched = 0;
        while let Some(url) = next.take() {
            if fetched >= self.config.max_pages {
                debug!(node = %node.id, pages = fetched, "executor.page.ceiling");
                break;
            }
            if result.records.len() >= total || result.records.len() >= self.config.max_total {
                break;
            }

            let raw = self.call(self.service.next_page(&url)).await?;
            fetched += 1;
            result.pages += 1;

            let page = Bundle::from_value(&raw);
            if page.is_empty() {
                break;
            }
            next = page.next.clone();
            result.push_entries(page.entries);
        }
        Ok(())
    }

    /// Awaits a service call, applying the configured timeout.
    async fn call<F>(&self, request: F) -> ExecutorResult<Value>
    where
        F: Future<Output = Result<Value, ServiceError>>,
    {
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| ExecutorError::Timeout(limit))?
                .map_err(ExecutorError::from),
            None => request.await.map_err(ExecutorError::from),
        }
    }

    /// Adds `_count` and the per-type default `_sort` unless already set.
    fn with_defaults(&self, resource_type: &str, mut params: SearchParams) -> SearchParams {
        if self.config.page_size > 0 {
            params
                .entry(COUNT_PARAM.to_string())
                .or_insert_with(|| self.config.page_size.to_string());
        }
        if let Some(sort) = self.config.default_sorts.get(resource_type) {
            params
                .entry(SORT_PARAM.to_string())
                .or_insert_with(|| sort.clone());
        }
        params
    }

    fn record(&self, result: &QueryResult) {
        let mut stats = self.stats.write();
        stats.queries_executed += 1;
        if result.cache_hit {
            stats.cache_hits += 1;
        } else {
            stats.cache_misses += 1;
            stats.pages_fetched += result.pages;
        }
        if result.error.is_some() {
            stats.failed_nodes += 1;
        }
        stats.total_records += result.records.len();
        stats.total_elapsed += result.elapsed;
    }

    /// Renders the plan as it would be executed, without any I/O.
    pub fn explain(&self, plan: &QueryPlan) -> String {
        plan.to_string()
    }

    /// Returns a snapshot of the execution statistics.
    pub fn stats(&self) -> OrchestratorStats {
        self.stats.read().clone()
    }

    /// Resets statistics.
    pub fn reset_stats(&self) {
        *self.stats.write() = OrchestratorStats::default();
    }

    /// Clears the cache.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
