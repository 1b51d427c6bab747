//! Source adapter contracts: per-family record normalization and filter building.

mod families;
mod image;

use psa_core::{generated_product_id, Product, RatingPlaceholder, SourceFamily};
use psa_storage::{value_text, Filter, Predicate, Row};
use rand::Rng;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

pub use families::{FashionAdapter, LargeRetailerAdapter, MarketplaceAdapter};
pub use image::ImageResolver;

pub const CRATE_NAME: &str = "psa-adapters";

pub const MARKETPLACE_STORE_URL: &str = "https://www.amazon.in";
pub const LARGE_RETAILER_STORE_URL: &str = "https://www.flipkart.com";
pub const FASHION_STORE_URL: &str = "https://www.myntra.com";

const PLACEHOLDER_RATING_MIN: f64 = 3.5;
const PLACEHOLDER_RATING_SPAN: f64 = 1.5;

/// Per-source settings the normalizer needs besides the raw row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeContext {
    pub source_table: String,
    pub store_url: String,
    pub images: ImageResolver,
    pub rating: RatingPlaceholder,
}

impl NormalizeContext {
    /// Context using the family's storefront as both link target and image origin.
    pub fn for_family(source_table: impl Into<String>, family: SourceFamily) -> Self {
        let store_url = default_store_url(family).to_string();
        Self {
            source_table: source_table.into(),
            images: ImageResolver::new(store_url.clone()),
            store_url,
            rating: RatingPlaceholder::default(),
        }
    }

    pub fn with_store_url(mut self, store_url: impl Into<String>) -> Self {
        self.store_url = store_url.into();
        self
    }

    pub fn with_images(mut self, images: ImageResolver) -> Self {
        self.images = images;
        self
    }

    pub fn with_rating(mut self, rating: RatingPlaceholder) -> Self {
        self.rating = rating;
        self
    }
}

/// A normalized product plus the searchable text fields that never leave the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub product: Product,
    pub brand: String,
    pub description: String,
    pub category: String,
}

/// Schema strategy for one source family: which raw columns mean what.
pub trait SourceAdapter: Send + Sync {
    fn family(&self) -> SourceFamily;

    /// Columns matched against search words.
    fn search_columns(&self) -> &'static [&'static str];

    fn category_column(&self) -> Option<&'static str>;

    /// Column holding the selling price, used for pushed-down range filters and ordering.
    fn price_column(&self) -> &'static str;

    fn rating_column(&self) -> Option<&'static str>;

    /// Maps one raw row to the canonical product. Never fails; bad fields fall back individually.
    fn normalize(&self, row: &Row, ctx: &NormalizeContext) -> NormalizedRecord;

    /// Category value of a raw row, as usable in [`SourceAdapter::category_predicate`].
    fn category_of(&self, row: &Row) -> Option<String>;

    fn category_predicate(&self, category: &str) -> Option<Predicate>;

    /// "Any search column contains any word".
    fn search_filter(&self, words: &[String]) -> Filter {
        Filter::any_of(words.iter().flat_map(|word| {
            self.search_columns()
                .iter()
                .map(move |column| Predicate::contains(*column, word))
        }))
    }
}

static MARKETPLACE: MarketplaceAdapter = MarketplaceAdapter;
static LARGE_RETAILER: LargeRetailerAdapter = LargeRetailerAdapter;
static FASHION: FashionAdapter = FashionAdapter;

pub fn adapter_for_family(family: SourceFamily) -> &'static dyn SourceAdapter {
    match family {
        SourceFamily::Marketplace => &MARKETPLACE,
        SourceFamily::LargeRetailer => &LARGE_RETAILER,
        SourceFamily::Fashion => &FASHION,
    }
}

pub fn default_store_url(family: SourceFamily) -> &'static str {
    match family {
        SourceFamily::Marketplace => MARKETPLACE_STORE_URL,
        SourceFamily::LargeRetailer => LARGE_RETAILER_STORE_URL,
        SourceFamily::Fashion => FASHION_STORE_URL,
    }
}

/// Splits a search term into lowercase words of at least two characters. Falls back to the
/// whole trimmed term when every word is too short.
pub fn search_words(term: &str) -> Vec<String> {
    let words = term
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect::<Vec<_>>();
    if words.is_empty() && !term.trim().is_empty() {
        vec![term.trim().to_lowercase()]
    } else {
        words
    }
}

/// Trimmed, non-empty text of a column.
pub fn text_field(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .and_then(value_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Source identifier, or a token derived from the row itself when it has none.
pub fn record_id(row: &Row, source_table: &str, columns: &[&str]) -> String {
    columns
        .iter()
        .find_map(|column| text_field(row, column))
        .unwrap_or_else(|| generated_product_id(source_table, &JsonValue::Object(row.clone()).to_string()))
}

/// Parses a numeric or currency-formatted price. Missing or unparsable values yield 0.
pub fn parse_price(value: Option<&JsonValue>, table: &str, column: &str) -> f64 {
    let parsed = match value {
        None | Some(JsonValue::Null) => return 0.0,
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => {
            // Currency prefixes like "Rs." carry dots of their own; start at the first digit.
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if digits.is_empty() && s.trim().is_empty() {
                return 0.0;
            }
            digits.trim_end_matches('.').parse::<f64>().ok()
        }
        Some(_) => None,
    };
    match parsed {
        Some(price) if price.is_finite() && price >= 0.0 => price,
        _ => {
            tracing::debug!(table, column, raw = ?value, "unparsable price, using 0");
            0.0
        }
    }
}

/// A source rating, if it is a finite number within [0, 5].
pub fn parse_rating(value: Option<&JsonValue>) -> Option<f64> {
    let rating = match value? {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (rating.is_finite() && (0.0..=5.0).contains(&rating)).then_some(rating)
}

/// Stand-in rating in [3.5, 5.0), floored to one decimal.
pub fn placeholder_rating(product_id: &str, mode: RatingPlaceholder) -> f64 {
    let unit = match mode {
        RatingPlaceholder::Deterministic => {
            let digest = Sha256::digest(product_id.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            (u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
        }
        RatingPlaceholder::Random => rand::thread_rng().gen_range(0.0..1.0),
    };
    let raw = PLACEHOLDER_RATING_MIN + unit * PLACEHOLDER_RATING_SPAN;
    ((raw * 10.0).floor() / 10.0).min(4.9)
}

pub fn rating_or_placeholder(value: Option<&JsonValue>, product_id: &str, ctx: &NormalizeContext) -> f64 {
    match parse_rating(value) {
        Some(rating) => rating,
        None => {
            if value.is_some_and(|v| !v.is_null()) {
                tracing::debug!(table = %ctx.source_table, raw = ?value, "unusable rating, using placeholder");
            }
            placeholder_rating(product_id, ctx.rating)
        }
    }
}

/// Whole-percent discount, only when `original_price > price > 0`.
pub fn discount_percent(original_price: f64, price: f64) -> Option<u32> {
    if price > 0.0 && original_price > price {
        Some(((original_price - price) / original_price * 100.0).round() as u32)
    } else {
        None
    }
}

pub fn discount_offer(original_price: f64, price: f64) -> Option<String> {
    discount_percent(original_price, price).map(|pct| format!("{pct}%"))
}
