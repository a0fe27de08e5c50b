//! Product catalog: pricing, stock and listing rules.

use crate::error::{Error, Result};
use external_services::{fetch_as, fetch_one_as, Backend, Filter, Order, Product, ProductVariation, Query};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub const PRODUCTS_TABLE: &str = "products";

/// Product columns with variations embedded.
pub const PRODUCT_COLUMNS: &str = "*, variations:product_variations(*)";

/// Reduced projection used for products linked from articles.
pub const RELATED_PRODUCT_COLUMNS: &str =
    "id, name, base_price, discount_price, discount_active, image_url, variations:product_variations(id, name, price)";

/// Stock level under which a product shows a low-stock notice.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

// =============================================================================
// Pricing and stock
// =============================================================================

/// Discount in force, if any. A zero or negative discount counts as unset.
fn active_discount(discount_price: Option<Decimal>, discount_active: bool) -> Option<Decimal> {
    discount_price.filter(|d| discount_active && *d > Decimal::ZERO)
}

/// Unit price of a selection.
///
/// A selected variation is priced on its own discount and price only; without
/// one the product discount applies, then the base price.
pub fn effective_price(product: &Product, variation: Option<&ProductVariation>) -> Decimal {
    match variation {
        Some(v) => active_discount(v.discount_price, v.discount_active).unwrap_or(v.price),
        None => active_discount(product.discount_price, product.discount_active)
            .unwrap_or(product.base_price),
    }
}

pub fn has_discount(product: &Product, variation: Option<&ProductVariation>) -> bool {
    match variation {
        Some(v) => active_discount(v.discount_price, v.discount_active).is_some(),
        None => active_discount(product.discount_price, product.discount_active).is_some(),
    }
}

/// Undiscounted price, shown struck through next to a discount.
pub fn original_price(product: &Product, variation: Option<&ProductVariation>) -> Decimal {
    variation.map(|v| v.price).unwrap_or(product.base_price)
}

/// Units available for a selection.
pub fn available_stock(product: &Product, variation: Option<&ProductVariation>) -> i64 {
    variation
        .map(|v| v.stock_quantity)
        .unwrap_or(product.stock_quantity)
}

/// Whether anything of the product can be bought.
pub fn has_any_stock(product: &Product) -> bool {
    if product.variations.is_empty() {
        product.stock_quantity > 0
    } else {
        product.variations.iter().any(|v| v.stock_quantity > 0)
    }
}

/// Units across all variations, or the product stock when it has none.
pub fn total_stock(product: &Product) -> i64 {
    if product.variations.is_empty() {
        product.stock_quantity
    } else {
        product.variations.iter().map(|v| v.stock_quantity.max(0)).sum()
    }
}

/// In stock but below the low-stock threshold.
pub fn is_low_stock(product: &Product) -> bool {
    let total = total_stock(product);
    total > 0 && total < LOW_STOCK_THRESHOLD
}

/// Variation preselected for a product: the first one in stock, else the first.
pub fn default_variation(product: &Product) -> Option<&ProductVariation> {
    product
        .variations
        .iter()
        .find(|v| v.stock_quantity > 0)
        .or_else(|| product.variations.first())
}

/// Price shown for a product linked from an article.
pub fn related_price(product: &Product) -> Decimal {
    if let Some(discount) = active_discount(product.discount_price, product.discount_active) {
        return discount;
    }
    product
        .variations
        .iter()
        .map(|v| v.price)
        .min()
        .unwrap_or(product.base_price)
}

/// Check a requested quantity against stock. Valid quantities are `1..=available`.
pub fn validate_quantity(requested: i64, available: i64) -> Result<u32> {
    if requested < 1 {
        return Err(Error::Validation("Quantity must be at least 1".to_string()));
    }
    if requested > available {
        return Err(Error::InsufficientStock { available });
    }
    u32::try_from(requested).map_err(|_| Error::Validation("Quantity is too large".to_string()))
}

// =============================================================================
// Listing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Name,
    Price,
    Purity,
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(SortOrder::Name),
            "price" => Ok(SortOrder::Price),
            "purity" => Ok(SortOrder::Purity),
            other => Err(Error::Validation(format!("Unknown sort order: {}", other))),
        }
    }
}

/// Case-insensitive match on name or description. A blank term matches all.
pub fn matches_search(product: &Product, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    term.is_empty()
        || product.name.to_lowercase().contains(&term)
        || product.description.to_lowercase().contains(&term)
}

/// Name (case-insensitive) and price ascending, purity descending.
pub fn sort_products(products: &mut [Product], order: SortOrder) {
    match order {
        SortOrder::Name => products.sort_by_cached_key(|p| p.name.to_lowercase()),
        SortOrder::Price => products.sort_by(|a, b| a.base_price.cmp(&b.base_price)),
        SortOrder::Purity => products.sort_by(|a, b| {
            b.purity_percentage
                .partial_cmp(&a.purity_percentage)
                .unwrap_or(Ordering::Equal)
        }),
    }
}

/// Product shown under an article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedProduct {
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub price: Decimal,
}

impl From<&Product> for RelatedProduct {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            image_url: product.image_url.clone(),
            price: related_price(product),
        }
    }
}

/// Read access to products.
#[derive(Clone)]
pub struct Catalog {
    backend: Arc<dyn Backend>,
}

impl Catalog {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Available products matching `search`, in `order`.
    pub async fn list_products(&self, search: Option<&str>, order: SortOrder) -> Result<Vec<Product>> {
        let query = Query::table(PRODUCTS_TABLE)
            .select(PRODUCT_COLUMNS)
            .filter(Filter::eq("available", true))
            .order(Order::asc("name"));
        let mut products: Vec<Product> = fetch_as(self.backend.as_ref(), &query).await?;

        if let Some(term) = search {
            products.retain(|p| matches_search(p, term));
        }
        sort_products(&mut products, order);
        debug!("Listing {} products", products.len());
        Ok(products)
    }

    pub async fn get_product(&self, id: &str) -> Result<Product> {
        let query = Query::table(PRODUCTS_TABLE)
            .select(PRODUCT_COLUMNS)
            .filter(Filter::eq("id", id));
        fetch_one_as(self.backend.as_ref(), &query)
            .await?
            .ok_or_else(|| Error::NotFound(format!("product {}", id)))
    }

    pub async fn related_products(&self, ids: &[String]) -> Result<Vec<RelatedProduct>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::table(PRODUCTS_TABLE)
            .select(RELATED_PRODUCT_COLUMNS)
            .filter(Filter::one_of("id", ids));
        let products: Vec<Product> = fetch_as(self.backend.as_ref(), &query).await?;
        Ok(products.iter().map(RelatedProduct::from).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use external_services::testing::FakeBackend;
    use serde_json::{json, Value};

    pub(crate) fn product_json(id: &str, name: &str, base: i64, stock: i64) -> Value {
        json!({
            "id": id,
            "name": name,
            "description": format!("{} research peptide", name),
            "base_price": base,
            "purity_percentage": 99.0,
            "stock_quantity": stock,
            "available": true,
            "variations": []
        })
    }

    pub(crate) fn variation(id: &str, price: i64, stock: i64) -> ProductVariation {
        ProductVariation {
            id: id.to_string(),
            product_id: "p1".to_string(),
            name: format!("{}mg", price / 100),
            quantity_mg: 5.0,
            price: Decimal::from(price),
            discount_price: None,
            discount_active: false,
            stock_quantity: stock,
            created_at: None,
        }
    }

    pub(crate) fn product(id: &str, base: i64, stock: i64) -> Product {
        serde_json::from_value(product_json(id, "BPC-157", base, stock)).unwrap()
    }

    #[test]
    fn test_effective_price_precedence() {
        let mut p = product("p1", 1000, 5);
        assert_eq!(effective_price(&p, None), Decimal::from(1000));

        p.discount_price = Some(Decimal::from(800));
        assert_eq!(effective_price(&p, None), Decimal::from(1000));
        p.discount_active = true;
        assert_eq!(effective_price(&p, None), Decimal::from(800));
        assert!(has_discount(&p, None));
        assert_eq!(original_price(&p, None), Decimal::from(1000));

        // A variation ignores the product discount.
        let mut v = variation("v1", 1500, 3);
        assert_eq!(effective_price(&p, Some(&v)), Decimal::from(1500));
        v.discount_price = Some(Decimal::from(1200));
        v.discount_active = true;
        assert_eq!(effective_price(&p, Some(&v)), Decimal::from(1200));
        assert_eq!(original_price(&p, Some(&v)), Decimal::from(1500));
    }

    #[test]
    fn test_zero_discount_counts_as_unset() {
        let mut p = product("p1", 1000, 5);
        p.discount_price = Some(Decimal::ZERO);
        p.discount_active = true;
        assert_eq!(effective_price(&p, None), Decimal::from(1000));
        assert!(!has_discount(&p, None));
        assert_eq!(related_price(&p), Decimal::from(1000));

        let mut v = variation("v1", 1500, 3);
        v.discount_price = Some(Decimal::ZERO);
        v.discount_active = true;
        assert_eq!(effective_price(&p, Some(&v)), Decimal::from(1500));
        assert!(!has_discount(&p, Some(&v)));
    }

    #[test]
    fn test_low_stock() {
        let mut p = product("p1", 1000, 25);
        assert_eq!(total_stock(&p), 25);
        assert!(!is_low_stock(&p));

        p.variations = vec![variation("v1", 500, 4), variation("v2", 900, 3)];
        assert_eq!(total_stock(&p), 7);
        assert!(is_low_stock(&p));

        p.variations = vec![variation("v1", 500, 0)];
        assert!(!is_low_stock(&p));
    }

    #[test]
    fn test_stock_rules() {
        let mut p = product("p1", 1000, 0);
        assert!(!has_any_stock(&p));
        p.variations = vec![variation("v1", 500, 0), variation("v2", 900, 4)];
        assert!(has_any_stock(&p));
        assert_eq!(default_variation(&p).map(|v| v.id.as_str()), Some("v2"));
        assert_eq!(available_stock(&p, p.variations.first()), 0);

        p.variations[1].stock_quantity = 0;
        assert_eq!(default_variation(&p).map(|v| v.id.as_str()), Some("v1"));
        assert!(!has_any_stock(&p));
    }

    #[test]
    fn test_validate_quantity() {
        assert_eq!(validate_quantity(2, 5).unwrap(), 2);
        assert!(matches!(validate_quantity(0, 5), Err(Error::Validation(_))));
        let err = validate_quantity(6, 5).unwrap_err();
        assert_eq!(err.to_string(), "Only 5 item(s) available in stock.");
    }

    #[test]
    fn test_related_price() {
        let mut p = product("p1", 1000, 5);
        assert_eq!(related_price(&p), Decimal::from(1000));
        p.variations = vec![variation("v1", 1500, 1), variation("v2", 700, 1)];
        assert_eq!(related_price(&p), Decimal::from(700));
        p.discount_price = Some(Decimal::from(600));
        p.discount_active = true;
        assert_eq!(related_price(&p), Decimal::from(600));
    }

    #[test]
    fn test_search_and_sort() {
        let mut products: Vec<Product> = vec![
            serde_json::from_value(product_json("a", "Tirzepatide", 3000, 1)).unwrap(),
            serde_json::from_value(product_json("b", "BPC-157", 1500, 1)).unwrap(),
            serde_json::from_value(product_json("c", "GHK-Cu", 900, 1)).unwrap(),
            serde_json::from_value(product_json("d", "epitalon", 1200, 1)).unwrap(),
        ];
        products[2].purity_percentage = 99.8;
        products[0].purity_percentage = 98.5;

        assert!(matches_search(&products[0], "tirz"));
        assert!(matches_search(&products[1], "RESEARCH"));
        assert!(!matches_search(&products[1], "semaglutide"));
        assert!(matches_search(&products[1], "  "));

        sort_products(&mut products, SortOrder::Name);
        let names: Vec<&str> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["BPC-157", "epitalon", "GHK-Cu", "Tirzepatide"]);

        sort_products(&mut products, SortOrder::Price);
        assert_eq!(products[0].id, "c");

        sort_products(&mut products, SortOrder::Purity);
        assert_eq!(products[0].id, "c");
        assert_eq!(products[3].id, "a");
    }

    #[tokio::test]
    async fn test_catalog_queries() {
        let backend = Arc::new(FakeBackend::new().with_rows(
            PRODUCTS_TABLE,
            vec![
                product_json("p1", "Semaglutide", 2500, 3),
                product_json("p2", "BPC-157", 1500, 0),
            ],
        ));
        let catalog = Catalog::new(backend);

        let listed = catalog.list_products(Some("bpc"), SortOrder::Name).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "p2");

        assert_eq!(catalog.get_product("p1").await.unwrap().name, "Semaglutide");
        assert!(matches!(catalog.get_product("nope").await, Err(Error::NotFound(_))));

        let related = catalog
            .related_products(&["p1".to_string(), "p2".to_string()])
            .await
            .unwrap();
        assert_eq!(related.len(), 2);
        assert!(catalog.related_products(&[]).await.unwrap().is_empty());
    }
}
