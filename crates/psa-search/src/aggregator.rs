//! Result Aggregator: normalize, filter by price, order, paginate and total.

use psa_adapters::NormalizedRecord;
use psa_core::{Product, RatingPlaceholder, SearchRequest, SearchResult, SortBy};

use crate::dispatcher::SourceResult;
use crate::scorer::QueryMatcher;

/// Normalizes every row of every source, in source order then row order.
pub fn normalize_all(results: &[SourceResult<'_>], rating: RatingPlaceholder) -> Vec<NormalizedRecord> {
    results
        .iter()
        .flat_map(|result| {
            let adapter = result.source.adapter();
            let ctx = result.source.normalize_context(rating);
            result
                .rows
                .iter()
                .map(move |row| adapter.normalize(row, &ctx))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Merges per-source results into one page. Suggestions and warnings are left empty.
pub fn aggregate(results: &[SourceResult<'_>], request: &SearchRequest, rating: RatingPlaceholder) -> SearchResult {
    let total_count = results.iter().map(|r| r.count).sum();

    let candidates = normalize_all(results, rating)
        .into_iter()
        .filter(|record| request.price_in_range(record.product.price))
        .collect::<Vec<_>>();

    let ordered = order(candidates, request);

    let skip = if request.term().is_some() { request.offset } else { 0 };
    let products = ordered
        .into_iter()
        .skip(skip)
        .take(request.limit)
        .map(|record| record.product)
        .collect();

    SearchResult {
        products,
        total_count,
        ..SearchResult::default()
    }
}

fn order(mut candidates: Vec<NormalizedRecord>, request: &SearchRequest) -> Vec<NormalizedRecord> {
    match (request.sort_by, request.term()) {
        (SortBy::PriceLow, _) => candidates.sort_by(|a, b| a.product.price.total_cmp(&b.product.price)),
        (SortBy::PriceHigh, _) => candidates.sort_by(|a, b| b.product.price.total_cmp(&a.product.price)),
        (SortBy::Rating, _) => candidates.sort_by(|a, b| b.product.rating.total_cmp(&a.product.rating)),
        (SortBy::Relevance, Some(term)) => {
            let matcher = QueryMatcher::new(term);
            let mut scored = candidates
                .into_iter()
                .map(|record| (matcher.score(&record), record))
                .collect::<Vec<_>>();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            return scored.into_iter().map(|(_, record)| record).collect();
        }
        (SortBy::Relevance, None) => {}
    }
    candidates
}

/// Products of `results`, normalized and in source order, without filtering or ordering.
pub fn products_of(results: &[SourceResult<'_>], rating: RatingPlaceholder) -> Vec<Product> {
    normalize_all(results, rating).into_iter().map(|r| r.product).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use psa_core::SourceFamily;
    use psa_storage::Row;
    use serde_json::{json, Value as JsonValue};

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().expect("object row")
    }

    fn fashion() -> SourceConfig {
        SourceConfig::new("fashion_1", SourceFamily::Fashion, "Fashion")
    }

    fn result<'a>(source: &'a SourceConfig, rows: Vec<Row>, count: u64) -> SourceResult<'a> {
        SourceResult {
            source,
            rows,
            count,
            error: None,
        }
    }

    fn items() -> Vec<Row> {
        vec![
            row(json!({"p_id": 1, "name": "Blue Kurta", "price": 500, "avg_rating": 4.0})),
            row(json!({"p_id": 2, "name": "Red Kurta", "price": 300, "avg_rating": 4.8})),
            row(json!({"p_id": 3, "name": "Red Saree", "price": 500, "avg_rating": 3.9})),
            row(json!({"p_id": 4, "name": "Green Dupatta", "price": "₹120", "avg_rating": 4.8})),
        ]
    }

    fn ids(result: &SearchResult) -> Vec<&str> {
        result.products.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn browse_keeps_input_order_and_truncates() {
        let source = fashion();
        let results = [result(&source, items(), 40)];
        let mut request = SearchRequest::new("");
        request.limit = 3;
        request.offset = 9;
        let out = aggregate(&results, &request, RatingPlaceholder::Deterministic);
        assert_eq!(ids(&out), vec!["1", "2", "3"]);
        assert_eq!(out.total_count, 40);
        assert!(out.suggested_products.is_empty());
    }

    #[test]
    fn price_sorts_are_stable() {
        let source = fashion();
        let results = [result(&source, items(), 4)];
        let mut request = SearchRequest::new("");
        request.sort_by = SortBy::PriceLow;
        assert_eq!(ids(&aggregate(&results, &request, RatingPlaceholder::Deterministic)), vec!["4", "2", "1", "3"]);
        request.sort_by = SortBy::PriceHigh;
        assert_eq!(ids(&aggregate(&results, &request, RatingPlaceholder::Deterministic)), vec!["1", "3", "2", "4"]);
        request.sort_by = SortBy::Rating;
        assert_eq!(ids(&aggregate(&results, &request, RatingPlaceholder::Deterministic)), vec!["2", "4", "1", "3"]);
    }

    #[test]
    fn price_bounds_are_inclusive_and_reapplied() {
        let source = fashion();
        let results = [result(&source, items(), 4)];
        let mut request = SearchRequest::new("");
        request.min_price = Some(500.0);
        request.max_price = Some(500.0);
        let out = aggregate(&results, &request, RatingPlaceholder::Deterministic);
        assert_eq!(ids(&out), vec!["1", "3"]);
        assert!(out.products.iter().all(|p| p.price == 500.0));

        request.min_price = Some(600.0);
        assert!(aggregate(&results, &request, RatingPlaceholder::Deterministic).products.is_empty());
    }

    #[test]
    fn relevance_ranks_by_score_and_pages_after_merge() {
        let source = fashion();
        let results = [result(&source, items(), 4)];
        let mut request = SearchRequest::new("red kurta");
        let out = aggregate(&results, &request, RatingPlaceholder::Deterministic);
        assert_eq!(ids(&out)[0], "2");

        request.limit = 1;
        request.offset = 1;
        let page = aggregate(&results, &request, RatingPlaceholder::Deterministic);
        assert_eq!(page.products.len(), 1);
        assert_eq!(page.products[0].id, out.products[1].id);
    }

    #[test]
    fn total_sums_every_source_count() {
        let a = fashion();
        let b = SourceConfig::new("amazon_products_1", SourceFamily::Marketplace, "Amazon");
        let results = [result(&a, items(), 4), result(&b, vec![], 17)];
        let out = aggregate(&results, &SearchRequest::new(""), RatingPlaceholder::Deterministic);
        assert_eq!(out.total_count, 21);
        assert_eq!(products_of(&results, RatingPlaceholder::Deterministic).len(), 4);
    }
}
