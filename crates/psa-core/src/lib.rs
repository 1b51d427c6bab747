//! Canonical product model and search request/response types for PSA.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "psa-core";

/// Placeholder image used whenever a record has no resolvable image.
pub const FALLBACK_IMAGE_URL: &str = "https://images.unsplash.com/photo-1505740420928-5e560c06d30e";

pub const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";

pub const DEFAULT_LIMIT: usize = 20;

/// Schema family of a configured data source. Decides which raw fields are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    Marketplace,
    LargeRetailer,
    Fashion,
}

impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFamily::Marketplace => write!(f, "marketplace"),
            SourceFamily::LargeRetailer => write!(f, "large_retailer"),
            SourceFamily::Fashion => write!(f, "fashion"),
        }
    }
}

/// How a rating is filled in when the source record carries none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingPlaceholder {
    /// Derived from the product id; identical across calls.
    #[default]
    Deterministic,
    /// Fresh pseudo-random draw on every call.
    Random,
}

impl FromStr for RatingPlaceholder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown rating placeholder mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    #[serde(rename = "relevance")]
    Relevance,
    #[serde(rename = "price-low")]
    PriceLow,
    #[serde(rename = "price-high")]
    PriceHigh,
    #[serde(rename = "rating")]
    Rating,
}

impl FromStr for SortBy {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "relevance" => Ok(Self::Relevance),
            "price-low" => Ok(Self::PriceLow),
            "price-high" => Ok(Self::PriceHigh),
            "rating" => Ok(Self::Rating),
            other => Err(RequestError::InvalidField {
                field: "sortBy",
                reason: format!("unsupported sort option `{other}`"),
            }),
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SortBy::Relevance => "relevance",
            SortBy::PriceLow => "price-low",
            SortBy::PriceHigh => "price-high",
            SortBy::Rating => "rating",
        };
        f.write_str(label)
    }
}

/// Canonical product returned to callers, whatever source it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub original_price: f64,
    pub image: String,
    pub rating: f64,
    pub store: String,
    pub store_url: String,
    pub offer: Option<String>,
}

/// Stable token for a record that arrives without an identifier, derived from its source table
/// and raw contents so repeated searches see the same id.
pub fn generated_product_id(source_table: &str, record: &str) -> String {
    let key = format!("{source_table}:{record}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid request body: {0}")]
    Body(String),
    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Validated search request. Built once per call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub search_term: String,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sort_by: SortBy,
    pub limit: usize,
    pub offset: usize,
    pub category: Option<String>,
    /// Restricts the search to a single configured source table.
    pub dataset: Option<String>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            min_price: None,
            max_price: None,
            sort_by: SortBy::Relevance,
            limit: DEFAULT_LIMIT,
            offset: 0,
            category: None,
            dataset: None,
        }
    }
}

impl SearchRequest {
    pub fn new(search_term: impl Into<String>) -> Self {
        Self {
            search_term: search_term.into(),
            ..Default::default()
        }
    }

    /// The trimmed search term, or `None` when the request is a plain browse.
    pub fn term(&self) -> Option<&str> {
        let trimmed = self.search_term.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    pub fn price_in_range(&self, price: f64) -> bool {
        self.min_price.map_or(true, |min| price >= min) && self.max_price.map_or(true, |max| price <= max)
    }

    pub fn from_json_slice(body: &[u8]) -> Result<Self, RequestError> {
        let raw: SearchRequestBody =
            serde_json::from_slice(body).map_err(|e| RequestError::Body(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// Wire shape of a search request as sent by clients. Legacy and reserved fields are accepted
/// and ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequestBody {
    #[serde(default)]
    pub search_term: Option<String>,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, alias = "categoryFilter")]
    pub dataset: Option<String>,
    #[serde(default)]
    pub featured: Option<bool>,
    #[serde(default)]
    pub discounted: Option<bool>,
    #[serde(default)]
    pub top_rated: Option<bool>,
}

impl TryFrom<SearchRequestBody> for SearchRequest {
    type Error = RequestError;

    fn try_from(body: SearchRequestBody) -> Result<Self, Self::Error> {
        let limit = match body.limit {
            None => DEFAULT_LIMIT,
            Some(v) if v > 0 => v as usize,
            Some(v) => {
                return Err(RequestError::InvalidField {
                    field: "limit",
                    reason: format!("must be a positive integer, got {v}"),
                })
            }
        };
        let offset = match body.offset {
            None => 0,
            Some(v) if v >= 0 => v as usize,
            Some(v) => {
                return Err(RequestError::InvalidField {
                    field: "offset",
                    reason: format!("must be non-negative, got {v}"),
                })
            }
        };
        for (field, value) in [("minPrice", body.min_price), ("maxPrice", body.max_price)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(RequestError::InvalidField {
                        field,
                        reason: "must be a finite number".to_string(),
                    });
                }
            }
        }
        let sort_by = match body.sort_by.as_deref() {
            Some(s) => s.parse()?,
            None => SortBy::Relevance,
        };

        Ok(Self {
            search_term: body.search_term.unwrap_or_default(),
            min_price: body.min_price,
            max_price: body.max_price,
            sort_by,
            limit,
            offset,
            category: non_blank(body.category),
            dataset: non_blank(body.dataset),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Engine output for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub products: Vec<Product>,
    /// Sum of per-source match counts; an upper-bound estimate of the merged result size.
    pub total_count: u64,
    pub suggested_products: Vec<Product>,
    /// Tables skipped under the partial source-failure policy.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub products: Vec<Product>,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_products: Option<Vec<Product>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<SearchResult> for SearchResponse {
    fn from(result: SearchResult) -> Self {
        let suggested_products = if result.products.is_empty() && !result.suggested_products.is_empty() {
            Some(result.suggested_products)
        } else {
            None
        };
        Self {
            products: result.products,
            total: result.total_count,
            suggested_products,
            warnings: result.warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
