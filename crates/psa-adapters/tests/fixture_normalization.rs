// Normalizes every row of the bundled fixture tables and checks the product invariants.

use std::path::PathBuf;

use psa_adapters::{adapter_for_family, NormalizeContext, NormalizedRecord};
use psa_core::{SourceFamily, FALLBACK_IMAGE_URL, UNKNOWN_PRODUCT_NAME};
use psa_storage::{MemoryTableStore, TableQuery, TableStore};

const TABLES: [(&str, SourceFamily); 5] = [
    ("amazon_products_1", SourceFamily::Marketplace),
    ("amazon_products_2", SourceFamily::Marketplace),
    ("flipkart_1", SourceFamily::LargeRetailer),
    ("flipkart_2", SourceFamily::LargeRetailer),
    ("fashion_1", SourceFamily::Fashion),
];

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

async fn normalized(store: &MemoryTableStore, table: &str, family: SourceFamily) -> anyhow::Result<Vec<NormalizedRecord>> {
    let page = store.query(&TableQuery::new(table)).await?;
    let ctx = NormalizeContext::for_family(table, family);
    let adapter = adapter_for_family(family);
    Ok(page.rows.iter().map(|row| adapter.normalize(row, &ctx)).collect())
}

#[tokio::test]
async fn every_fixture_row_normalizes_to_a_valid_product() -> anyhow::Result<()> {
    let store = MemoryTableStore::from_fixtures_dir(fixtures_dir())?;
    assert_eq!(
        store.table_names(),
        vec!["amazon_products_1", "amazon_products_2", "fashion_1", "flipkart_1", "flipkart_2"]
    );

    for (table, family) in TABLES {
        let records = normalized(&store, table, family).await?;
        assert!(records.len() >= 3, "{table} has too few rows");
        for record in records {
            let p = &record.product;
            assert!(!p.id.is_empty(), "{table}: empty id");
            assert!(!p.name.is_empty(), "{table}: empty name");
            assert!(!p.image.trim().is_empty(), "{table}: empty image for {}", p.id);
            assert!(p.price >= 0.0 && p.price.is_finite(), "{table}: bad price {}", p.price);
            assert!(p.original_price >= 0.0, "{table}: bad original price");
            assert!((0.0..=5.0).contains(&p.rating), "{table}: rating {}", p.rating);
            assert!(!p.store.is_empty() && !p.store_url.is_empty());
        }
    }
    Ok(())
}

#[tokio::test]
async fn fixture_edge_cases_fall_back_per_field() -> anyhow::Result<()> {
    let store = MemoryTableStore::from_fixtures_dir(fixtures_dir())?;

    let amazon = normalized(&store, "amazon_products_1", SourceFamily::Marketplace).await?;
    assert_eq!(amazon[0].product.price, 1499.0);
    assert_eq!(amazon[0].product.offer.as_deref(), Some("62%"));
    assert!(amazon[0].product.image.ends_with("41VGvbtkxLL.jpg"));
    assert_eq!(amazon[1].product.image, FALLBACK_IMAGE_URL);
    assert_eq!(amazon[2].product.offer, None);
    assert_eq!(amazon[3].product.offer.as_deref(), Some("Extra 10% off with bank offer"));
    assert!(amazon[4].product.image.starts_with("https://"));
    assert!(amazon[4].product.image.ends_with("/images/I/61flask.jpg"));

    let amazon2 = normalized(&store, "amazon_products_2", SourceFamily::Marketplace).await?;
    assert_eq!(amazon2[2].product.image, FALLBACK_IMAGE_URL);
    assert_eq!(amazon2[3].product.price, 0.0);
    assert_eq!(amazon2[3].product.name, "Wildcraft Laptop Backpack 35L");
    assert_eq!(amazon2[3].product.image, "https://m.media-amazon.com/images/I/81backpack.jpg");

    let flipkart = normalized(&store, "flipkart_1", SourceFamily::LargeRetailer).await?;
    assert_eq!(flipkart[0].category, "Clothing");
    assert!(flipkart[0].product.image.starts_with("http://img5a.flixcart.com/"));
    assert_eq!(flipkart[1].product.rating, 4.2);
    assert_eq!(flipkart[1].product.offer.as_deref(), Some("50%"));
    assert_eq!(flipkart[2].product.image, FALLBACK_IMAGE_URL);

    let flipkart2 = normalized(&store, "flipkart_2", SourceFamily::LargeRetailer).await?;
    assert_eq!(flipkart2[1].product.rating, 4.3);
    assert_eq!(flipkart2[1].product.image, "http://img6a.flixcart.com/image/kurta/biba-red.jpeg");
    assert_eq!(flipkart2[3].product.id, "WATEHYZ9F6BJGM2Z");
    assert!(flipkart2[3].product.image.starts_with("data:image/png;base64,"));
    assert!(flipkart2[3].product.rating >= 3.5 && flipkart2[3].product.rating <= 4.9);

    let fashion = normalized(&store, "fashion_1", SourceFamily::Fashion).await?;
    assert_eq!(fashion[0].product.store, "Khushal K");
    assert_eq!(fashion[0].product.original_price, fashion[0].product.price);
    assert_eq!(fashion[1].product.image, "https://assets.myntassets.com/assets/images/16524740/top.jpg");
    assert_eq!(fashion[4].product.name, UNKNOWN_PRODUCT_NAME);
    Ok(())
}
