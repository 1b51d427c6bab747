use std::sync::Arc;

use psa_core::{RatingPlaceholder, RequestError, SearchRequest, SearchResponse, SearchResult};
use psa_storage::{StoreError, TableStore};
use thiserror::Error;
use tracing::Instrument;

use crate::aggregator::aggregate;
use crate::cancel::CancelSignal;
use crate::config::{FailurePolicy, SearchConfig, SourceConfig, SourceRegistry, DEFAULT_SUGGESTION_LIMIT};
use crate::dispatcher::dispatch;
use crate::fallback::suggest;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    MalformedRequest(#[from] RequestError),
    #[error("source `{table}` failed: {source}")]
    SourceQuery {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

impl SearchError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, SearchError::MalformedRequest(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub failure_policy: FailurePolicy,
    pub rating: RatingPlaceholder,
    pub suggestion_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::FailFast,
            rating: RatingPlaceholder::Deterministic,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
        }
    }
}

impl From<&SearchConfig> for EngineOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            failure_policy: config.failure_policy,
            rating: config.rating_placeholder,
            suggestion_limit: config.suggestion_limit,
        }
    }
}

/// Search Service entry point: dispatch, aggregate and, when nothing matched, suggest.
#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn TableStore>,
    registry: Arc<SourceRegistry>,
    options: EngineOptions,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn TableStore>, registry: SourceRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn from_config(config: &SearchConfig) -> anyhow::Result<Self> {
        let registry = SourceRegistry::load(&config.sources_path).await?;
        let store = config.build_store().await?;
        Ok(Self::new(store, registry).with_options(EngineOptions::from(config)))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Enabled sources for `request`, narrowed to its dataset when that names a known source.
    pub fn active_sources(&self, request: &SearchRequest) -> Vec<&SourceConfig> {
        if let Some(dataset) = request.dataset.as_deref() {
            match self.registry.enabled().find(|s| s.table == dataset) {
                Some(source) => return vec![source],
                None => tracing::info!(dataset, "unknown dataset ignored"),
            }
        }
        self.registry.enabled().collect()
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        validate(request)?;
        let sources = self.active_sources(request);
        if sources.is_empty() {
            return Err(SearchError::Config("no enabled sources".to_string()));
        }

        let span = tracing::info_span!(
            "search",
            term = %request.search_term,
            sort = %request.sort_by,
            limit = request.limit,
            offset = request.offset,
            sources = sources.len(),
        );
        async {
            let mut results = dispatch(self.store.as_ref(), &sources, request).await;

            let mut warnings = Vec::new();
            for result in &mut results {
                let Some(err) = result.error.take() else {
                    continue;
                };
                match self.options.failure_policy {
                    FailurePolicy::FailFast => {
                        tracing::error!(table = %result.source.table, error = %err, "search failed");
                        return Err(SearchError::SourceQuery {
                            table: result.source.table.clone(),
                            source: err,
                        });
                    }
                    FailurePolicy::Partial => {
                        tracing::warn!(table = %result.source.table, error = %err, "source skipped");
                        warnings.push(result.source.table.clone());
                    }
                }
            }

            let mut result = aggregate(&results, request, self.options.rating);
            result.warnings = warnings;

            if result.products.is_empty() {
                if let Some(term) = request.term() {
                    result.suggested_products = suggest(
                        self.store.as_ref(),
                        &sources,
                        term,
                        self.options.suggestion_limit,
                        self.options.rating,
                    )
                    .await;
                }
            }

            tracing::info!(
                products = result.products.len(),
                total = result.total_count,
                suggestions = result.suggested_products.len(),
                "search complete"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Like [`SearchEngine::search`], but yields `Ok(None)` once `cancel` fires. Outstanding
    /// sub-queries are dropped with the search future.
    pub async fn search_cancellable(
        &self,
        request: &SearchRequest,
        cancel: &CancelSignal,
    ) -> Result<Option<SearchResult>, SearchError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("search cancelled");
                Ok(None)
            }
            result = self.search(request) => result.map(Some),
        }
    }

    /// Parses a JSON request body and answers it in response shape.
    pub async fn handle_json(&self, body: &[u8]) -> Result<SearchResponse, SearchError> {
        let request = SearchRequest::from_json_slice(body)?;
        Ok(self.search(&request).await?.into())
    }
}

fn validate(request: &SearchRequest) -> Result<(), RequestError> {
    if request.limit == 0 {
        return Err(RequestError::InvalidField {
            field: "limit",
            reason: "must be a positive integer".to_string(),
        });
    }
    for (field, value) in [("minPrice", request.min_price), ("maxPrice", request.max_price)] {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(RequestError::InvalidField {
                field,
                reason: "must be a finite number".to_string(),
            });
        }
    }
    Ok(())
}
