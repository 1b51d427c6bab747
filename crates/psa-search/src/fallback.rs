//! Fallback Suggester: a small "similar items" sample for searches that matched nothing.

use futures::future::join_all;
use psa_adapters::search_words;
use psa_core::{Product, RatingPlaceholder};
use psa_storage::{Filter, TableQuery, TableStore};

use crate::aggregator::products_of;
use crate::config::SourceConfig;
use crate::dispatcher::SourceResult;

/// Finds the category of the closest record for `term`, from the first source (in registry
/// order) that yields one.
pub async fn probe_category(store: &dyn TableStore, sources: &[&SourceConfig], term: &str) -> Option<String> {
    let words = search_words(term);
    if words.is_empty() {
        return None;
    }
    let probes = sources
        .iter()
        .filter(|source| source.adapter().category_column().is_some())
        .map(|&source| {
            let query = TableQuery::new(source.table.clone())
                .filter(source.adapter().search_filter(&words))
                .limit(1);
            async move {
                match store.query(&query).await {
                    Ok(page) => page
                        .rows
                        .first()
                        .and_then(|row| source.adapter().category_of(row)),
                    Err(err) => {
                        tracing::warn!(table = %source.table, error = %err, "category probe failed");
                        None
                    }
                }
            }
        });
    join_all(probes).await.into_iter().flatten().next()
}

/// Up to `limit` suggestions: same-category items when a category can be found, otherwise a
/// generic sample across sources. Failures degrade to fewer suggestions.
pub async fn suggest(
    store: &dyn TableStore,
    sources: &[&SourceConfig],
    term: &str,
    limit: usize,
    rating: RatingPlaceholder,
) -> Vec<Product> {
    if limit == 0 || sources.is_empty() {
        return Vec::new();
    }

    if let Some(category) = probe_category(store, sources, term).await {
        let with_category = sources
            .iter()
            .copied()
            .filter_map(|source| {
                let predicate = source.adapter().category_predicate(&category)?;
                Some((source, Filter::all().and(predicate)))
            })
            .collect::<Vec<_>>();
        let share = limit.div_ceil(with_category.len().max(1));
        let mut products = sample(store, with_category, share, rating).await;
        if !products.is_empty() {
            tracing::debug!(%category, count = products.len(), "category suggestions");
            products.truncate(limit);
            return products;
        }
    }

    let share = limit.div_ceil(sources.len());
    let generic = sources.iter().map(|&source| (source, Filter::all())).collect();
    let mut products = sample(store, generic, share, rating).await;
    products.truncate(limit);
    tracing::debug!(count = products.len(), "generic suggestions");
    products
}

async fn sample(
    store: &dyn TableStore,
    targets: Vec<(&SourceConfig, Filter)>,
    per_source: usize,
    rating: RatingPlaceholder,
) -> Vec<Product> {
    let queries = targets.into_iter().map(|(source, filter)| {
        let query = TableQuery::new(source.table.clone()).filter(filter).limit(per_source);
        async move {
            match store.query(&query).await {
                Ok(page) => Some(SourceResult {
                    source,
                    rows: page.rows,
                    count: page.count,
                    error: None,
                }),
                Err(err) => {
                    tracing::warn!(table = %source.table, error = %err, "suggestion sample failed");
                    None
                }
            }
        }
    });
    let results = join_all(queries).await.into_iter().flatten().collect::<Vec<_>>();
    products_of(&results, rating)
}
