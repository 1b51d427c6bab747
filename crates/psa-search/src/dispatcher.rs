//! Query Dispatcher: one sub-query per source, issued together and awaited jointly.

use futures::future::join_all;
use psa_adapters::search_words;
use psa_core::{SearchRequest, SortBy};
use psa_storage::{Filter, Predicate, Row, StoreError, TableQuery, TableStore};
use tracing::Instrument;

use crate::config::SourceConfig;

/// Minimum per-source candidate pool for term searches.
pub const MIN_CANDIDATE_POOL: usize = 50;
const CANDIDATE_POOL_FACTOR: usize = 3;

/// Outcome of one source's sub-query.
#[derive(Debug)]
pub struct SourceResult<'a> {
    pub source: &'a SourceConfig,
    pub rows: Vec<Row>,
    pub count: u64,
    pub error: Option<StoreError>,
}

impl<'a> SourceResult<'a> {
    fn empty(source: &'a SourceConfig) -> Self {
        Self {
            source,
            rows: Vec::new(),
            count: 0,
            error: None,
        }
    }
}

/// Rows requested from each source for a term search; offset is applied after the merge.
pub fn candidate_pool(request: &SearchRequest) -> usize {
    MIN_CANDIDATE_POOL
        .max(request.limit.saturating_mul(CANDIDATE_POOL_FACTOR))
        .max(request.offset.saturating_add(request.limit))
}

/// Builds the sub-query for one source, or `None` when the request's category cannot apply to
/// this source and it must contribute nothing.
pub fn build_query(source: &SourceConfig, request: &SearchRequest, source_count: usize) -> Option<TableQuery> {
    let adapter = source.adapter();
    let mut filter = match request.term() {
        Some(term) => adapter.search_filter(&search_words(term)),
        None => Filter::all(),
    };

    if let Some(category) = request.category.as_deref() {
        filter = filter.and(adapter.category_predicate(category)?);
    }

    if source.native_price_filter {
        if let Some(min) = request.min_price {
            filter = filter.and(Predicate::gte(adapter.price_column(), min));
        }
        if let Some(max) = request.max_price {
            filter = filter.and(Predicate::lte(adapter.price_column(), max));
        }
    }

    let query = TableQuery::new(source.table.clone()).filter(filter);
    let query = if request.term().is_some() {
        query.limit(candidate_pool(request))
    } else {
        let share = source_count.max(1);
        let query = query
            .limit(request.limit.div_ceil(share))
            .offset(request.offset.div_ceil(share));
        match native_order(source, request.sort_by) {
            Some((column, ascending)) => query.order_by(column, ascending),
            None => query,
        }
    };
    Some(query)
}

/// Whether `source` can take part under the request's category constraint, if any.
fn accepts_category(source: &SourceConfig, request: &SearchRequest) -> bool {
    request
        .category
        .as_deref()
        .map_or(true, |category| source.adapter().category_predicate(category).is_some())
}

fn native_order(source: &SourceConfig, sort_by: SortBy) -> Option<(&'static str, bool)> {
    if !source.native_ordering {
        return None;
    }
    let adapter = source.adapter();
    match sort_by {
        SortBy::PriceLow => Some((adapter.price_column(), true)),
        SortBy::PriceHigh => Some((adapter.price_column(), false)),
        SortBy::Rating => adapter.rating_column().map(|column| (column, false)),
        SortBy::Relevance => None,
    }
}

/// Runs every source's sub-query concurrently; the result keeps source order and carries
/// per-source errors rather than short-circuiting.
pub async fn dispatch<'a>(
    store: &dyn TableStore,
    sources: &[&'a SourceConfig],
    request: &SearchRequest,
) -> Vec<SourceResult<'a>> {
    let source_count = sources.iter().filter(|source| accepts_category(source, request)).count();
    let futures = sources.iter().map(|&source| {
        let query = build_query(source, request, source_count);
        let span = tracing::info_span!("source_query", table = %source.table, family = %source.family);
        async move {
            let Some(query) = query else {
                tracing::debug!("category not applicable, source skipped");
                return SourceResult::empty(source);
            };
            match store.query(&query).await {
                Ok(page) => {
                    tracing::debug!(rows = page.rows.len(), count = page.count, "source answered");
                    SourceResult {
                        source,
                        rows: page.rows,
                        count: page.count,
                        error: None,
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "source query failed");
                    SourceResult {
                        error: Some(err),
                        ..SourceResult::empty(source)
                    }
                }
            }
        }
        .instrument(span)
    });
    join_all(futures).await
}
