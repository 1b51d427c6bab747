use psa_core::{Product, SourceFamily, UNKNOWN_PRODUCT_NAME};
use psa_storage::{Predicate, Row};
use serde_json::Value as JsonValue;

use crate::{
    discount_offer, parse_price, rating_or_placeholder, record_id, text_field, NormalizeContext,
    NormalizedRecord, SourceAdapter,
};

const CATEGORY_TREE_SEPARATOR: &str = ">>";

/// Marketplace listings: title/brand/category columns, `Price`/`Mrp` as numbers or currency
/// strings, pipe- or JSON-encoded `Image Urls`, no rating column.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketplaceAdapter;

impl SourceAdapter for MarketplaceAdapter {
    fn family(&self) -> SourceFamily {
        SourceFamily::Marketplace
    }

    fn search_columns(&self) -> &'static [&'static str] {
        &["Product Title", "Brand", "Category", "Product Description"]
    }

    fn category_column(&self) -> Option<&'static str> {
        Some("Category")
    }

    fn price_column(&self) -> &'static str {
        "Price"
    }

    fn rating_column(&self) -> Option<&'static str> {
        None
    }

    fn normalize(&self, row: &Row, ctx: &NormalizeContext) -> NormalizedRecord {
        let id = record_id(row, &ctx.source_table, &["Unique ID"]);
        let price = parse_price(row.get("Price"), &ctx.source_table, "Price");
        let original_price = list_price(row.get("Mrp"), price, ctx, "Mrp");
        let offer = text_field(row, "Offers").or_else(|| discount_offer(original_price, price));
        let product = Product {
            name: text_field(row, "Product Title").unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string()),
            price,
            original_price,
            image: ctx.images.resolve(row.get("Image Urls")),
            rating: rating_or_placeholder(None, &id, ctx),
            store: text_field(row, "Site Name").unwrap_or_else(|| "Amazon In".to_string()),
            store_url: ctx.store_url.clone(),
            offer,
            id,
        };
        NormalizedRecord {
            product,
            brand: text_field(row, "Brand").unwrap_or_default(),
            description: text_field(row, "Product Description").unwrap_or_default(),
            category: text_field(row, "Category").unwrap_or_default(),
        }
    }

    fn category_of(&self, row: &Row) -> Option<String> {
        text_field(row, "Category")
    }

    fn category_predicate(&self, category: &str) -> Option<Predicate> {
        Some(Predicate::eq("Category", category))
    }
}

/// Large-retailer listings: currency-string prices, JSON image lists and a `>>`-delimited
/// category tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargeRetailerAdapter;

impl SourceAdapter for LargeRetailerAdapter {
    fn family(&self) -> SourceFamily {
        SourceFamily::LargeRetailer
    }

    fn search_columns(&self) -> &'static [&'static str] {
        &["product_name", "brand", "description"]
    }

    fn category_column(&self) -> Option<&'static str> {
        Some("product_category_tree")
    }

    fn price_column(&self) -> &'static str {
        "discounted_price"
    }

    fn rating_column(&self) -> Option<&'static str> {
        Some("product_rating")
    }

    fn normalize(&self, row: &Row, ctx: &NormalizeContext) -> NormalizedRecord {
        let id = record_id(row, &ctx.source_table, &["uniq_id", "pid"]);
        let price = parse_price(row.get("discounted_price"), &ctx.source_table, "discounted_price");
        let original_price = list_price(row.get("retail_price"), price, ctx, "retail_price");
        let rating_raw = row
            .get("product_rating")
            .filter(|v| crate::parse_rating(Some(*v)).is_some())
            .or_else(|| row.get("overall_rating"));
        let product = Product {
            name: text_field(row, "product_name").unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string()),
            price,
            original_price,
            image: ctx.images.resolve(row.get("image")),
            rating: rating_or_placeholder(rating_raw, &id, ctx),
            store: "Flipkart".to_string(),
            store_url: text_field(row, "product_url").unwrap_or_else(|| ctx.store_url.clone()),
            offer: discount_offer(original_price, price),
            id,
        };
        NormalizedRecord {
            product,
            brand: text_field(row, "brand").unwrap_or_default(),
            description: text_field(row, "description").unwrap_or_default(),
            category: self.category_of(row).unwrap_or_default(),
        }
    }

    fn category_of(&self, row: &Row) -> Option<String> {
        top_level_category(row.get("product_category_tree")?)
    }

    fn category_predicate(&self, category: &str) -> Option<Predicate> {
        Some(Predicate::contains("product_category_tree", category))
    }
}

/// Fashion items: one image string, a single price, the brand doubling as store name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FashionAdapter;

impl SourceAdapter for FashionAdapter {
    fn family(&self) -> SourceFamily {
        SourceFamily::Fashion
    }

    fn search_columns(&self) -> &'static [&'static str] {
        &["name", "brand", "description", "colour"]
    }

    fn category_column(&self) -> Option<&'static str> {
        None
    }

    fn price_column(&self) -> &'static str {
        "price"
    }

    fn rating_column(&self) -> Option<&'static str> {
        Some("avg_rating")
    }

    fn normalize(&self, row: &Row, ctx: &NormalizeContext) -> NormalizedRecord {
        let id = record_id(row, &ctx.source_table, &["p_id"]);
        let price = parse_price(row.get("price"), &ctx.source_table, "price");
        let brand = text_field(row, "brand");
        let product = Product {
            name: text_field(row, "name").unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string()),
            price,
            original_price: price,
            image: ctx.images.resolve(row.get("img")),
            rating: rating_or_placeholder(row.get("avg_rating"), &id, ctx),
            store: brand.clone().unwrap_or_else(|| "Fashion Store".to_string()),
            store_url: ctx.store_url.clone(),
            offer: None,
            id,
        };
        NormalizedRecord {
            product,
            brand: brand.unwrap_or_default(),
            description: text_field(row, "description").unwrap_or_default(),
            category: String::new(),
        }
    }

    fn category_of(&self, _row: &Row) -> Option<String> {
        None
    }

    fn category_predicate(&self, _category: &str) -> Option<Predicate> {
        None
    }
}

/// List price, or the selling price when the source has no usable list price.
fn list_price(value: Option<&JsonValue>, price: f64, ctx: &NormalizeContext, column: &str) -> f64 {
    let list = parse_price(value, &ctx.source_table, column);
    if list > 0.0 {
        list
    } else {
        price
    }
}

/// First segment of a category tree stored as a JSON array, a JSON-encoded array string or a
/// plain `A >> B >> C` path.
fn top_level_category(value: &JsonValue) -> Option<String> {
    let path = match value {
        JsonValue::Array(items) => items.first()?.as_str()?.to_string(),
        JsonValue::String(s) if s.trim_start().starts_with('[') => {
            match serde_json::from_str::<Vec<JsonValue>>(s.trim()) {
                Ok(items) => items.first()?.as_str()?.to_string(),
                Err(_) => s.trim().trim_matches(|c| c == '[' || c == ']' || c == '"').to_string(),
            }
        }
        JsonValue::String(s) => s.clone(),
        _ => return None,
    };
    path.split(CATEGORY_TREE_SEPARATOR)
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use psa_core::{RatingPlaceholder, FALLBACK_IMAGE_URL};
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().expect("object row")
    }

    #[test]
    fn marketplace_row_maps_every_field() {
        let ctx = NormalizeContext::for_family("amazon_products_1", SourceFamily::Marketplace);
        let record = MarketplaceAdapter.normalize(
            &row(json!({
                "Unique ID": "amz-1",
                "Product Title": "Wireless Headphones",
                "Brand": "Boat",
                "Category": "Electronics",
                "Product Description": "Bluetooth over-ear",
                "Price": "₹1,499",
                "Mrp": 2999,
                "Image Urls": "/images/hp.jpg|/images/hp2.jpg",
                "Site Name": "Amazon In",
                "Offers": null
            })),
            &ctx,
        );
        let p = &record.product;
        assert_eq!(p.id, "amz-1");
        assert_eq!(p.price, 1499.0);
        assert_eq!(p.original_price, 2999.0);
        assert_eq!(p.image, "https://www.amazon.in/images/hp.jpg");
        assert_eq!(p.offer.as_deref(), Some("50%"));
        assert_eq!(p.store, "Amazon In");
        assert_eq!(record.category, "Electronics");
    }

    #[test]
    fn marketplace_offer_label_wins_over_computed_discount() {
        let ctx = NormalizeContext::for_family("amazon_products_2", SourceFamily::Marketplace);
        let record = MarketplaceAdapter.normalize(
            &row(json!({"Price": 75, "Mrp": 100, "Offers": "Bank offer 10%"})),
            &ctx,
        );
        assert_eq!(record.product.offer.as_deref(), Some("Bank offer 10%"));
    }

    #[test]
    fn computed_discount_follows_price_gap() {
        let ctx = NormalizeContext::for_family("amazon_products_1", SourceFamily::Marketplace);
        let discounted = MarketplaceAdapter.normalize(&row(json!({"Price": 75, "Mrp": 100})), &ctx);
        let full = MarketplaceAdapter.normalize(&row(json!({"Price": 100, "Mrp": 100})), &ctx);
        assert_eq!(discounted.product.offer.as_deref(), Some("25%"));
        assert_eq!(full.product.offer, None);
    }

    #[test]
    fn large_retailer_row_uses_item_url_and_tree_category() {
        let ctx = NormalizeContext::for_family("flipkart_1", SourceFamily::LargeRetailer);
        let record = LargeRetailerAdapter.normalize(
            &row(json!({
                "uniq_id": "fk-1",
                "product_name": "Cotton Kurta",
                "discounted_price": "Rs. 799",
                "retail_price": "Rs. 999",
                "image": "[\"http://img.fkcdn.com/a.jpeg\", \"http://img.fkcdn.com/b.jpeg\"]",
                "product_rating": "No rating available",
                "overall_rating": "4.1",
                "product_url": "http://www.flipkart.com/cotton-kurta/p/itm1",
                "product_category_tree": "[\"Clothing >> Women's Clothing >> Kurtas\"]"
            })),
            &ctx,
        );
        let p = &record.product;
        assert_eq!(p.price, 799.0);
        assert_eq!(p.original_price, 999.0);
        assert_eq!(p.image, "http://img.fkcdn.com/a.jpeg");
        assert_eq!(p.rating, 4.1);
        assert_eq!(p.store, "Flipkart");
        assert_eq!(p.store_url, "http://www.flipkart.com/cotton-kurta/p/itm1");
        assert_eq!(p.offer.as_deref(), Some("20%"));
        assert_eq!(record.category, "Clothing");
    }

    #[test]
    fn large_retailer_structured_image_and_missing_url() {
        let ctx = NormalizeContext::for_family("flipkart_2", SourceFamily::LargeRetailer);
        let record = LargeRetailerAdapter.normalize(
            &row(json!({"image": [], "product_category_tree": ["Home >> Lamps"]})),
            &ctx,
        );
        assert_eq!(record.product.image, FALLBACK_IMAGE_URL);
        assert_eq!(record.product.store_url, "https://www.flipkart.com");
        assert_eq!(record.category, "Home");
    }

    #[test]
    fn fashion_row_has_no_list_price_or_offer() {
        let ctx = NormalizeContext::for_family("fashion_1", SourceFamily::Fashion)
            .with_rating(RatingPlaceholder::Random);
        let record = FashionAdapter.normalize(
            &row(json!({
                "p_id": 17048614,
                "name": "Printed Kurta",
                "brand": "Khushal K",
                "price": 5099,
                "colour": "Black",
                "img": "[]",
                "avg_rating": 4.4
            })),
            &ctx,
        );
        let p = &record.product;
        assert_eq!(p.id, "17048614");
        assert_eq!(p.original_price, p.price);
        assert_eq!(p.offer, None);
        assert_eq!(p.store, "Khushal K");
        assert_eq!(p.rating, 4.4);
        assert_eq!(p.image, FALLBACK_IMAGE_URL);
    }

    #[test]
    fn category_tree_shapes() {
        assert_eq!(top_level_category(&json!("A >> B")).as_deref(), Some("A"));
        assert_eq!(top_level_category(&json!(["X >> Y"])).as_deref(), Some("X"));
        assert_eq!(top_level_category(&json!("[\"Baby Care >> Toys\"]")).as_deref(), Some("Baby Care"));
        assert_eq!(top_level_category(&json!("[\"broken")).as_deref(), Some("broken"));
        assert_eq!(top_level_category(&json!([])), None);
        assert_eq!(top_level_category(&json!(3)), None);
    }
}
