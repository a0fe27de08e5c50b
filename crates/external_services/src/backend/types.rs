//! Record types returned by the hosted backend.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Deserialization helpers
// =============================================================================

/// Treat an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Identifiers arrive as UUID strings from tables and as integers from some
/// views; both are kept as strings.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
    })
}

/// Timestamps from REST carry an offset; rows delivered over the realtime
/// channel may not. Offset-less values are taken as UTC.
fn flexible_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn flexible_timestamp_opt<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Parse an RFC 3339 timestamp, falling back to a naive UTC timestamp.
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("invalid timestamp: {}", raw))
}

// =============================================================================
// Sales
// =============================================================================

/// Aggregation period for server-computed sales figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }

    /// Human label used in headings ("Today", "This Week", "This Month").
    pub fn label(&self) -> &'static str {
        match self {
            Period::Daily => "Today",
            Period::Weekly => "This Week",
            Period::Monthly => "This Month",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            other => Err(format!("unknown period: {}", other)),
        }
    }
}

/// A line item inside an order. Prices are copied at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LineItem {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub variation_id: Option<String>,
    #[serde(default)]
    pub variation_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: Decimal,
}

/// An order as read from the `orders` table or a realtime insert.
///
/// `id`, `customer_name`, `total_price` and `created_at` are required; a
/// payload missing any of them fails to deserialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub customer_name: String,
    pub total_price: Decimal,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_items: Vec<LineItem>,
}

/// Server-computed totals for one period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SalesMetrics {
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_orders: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_revenue: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_units: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub average_order_value: Decimal,
}

/// One row of the top-products ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRanking {
    pub product_name: String,
    #[serde(alias = "total_sold", default, deserialize_with = "null_as_default")]
    pub units_sold: u64,
    #[serde(alias = "total_revenue", default, deserialize_with = "null_as_default")]
    pub revenue: Decimal,
}

// =============================================================================
// Catalog
// =============================================================================

/// A purchasable size/strength of a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductVariation {
    pub id: String,
    #[serde(default)]
    pub product_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity_mg: f64,
    pub price: Decimal,
    #[serde(default)]
    pub discount_price: Option<Decimal>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub discount_active: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stock_quantity: i64,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// A catalog product with its variations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    pub base_price: Decimal,
    #[serde(default)]
    pub discount_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub discount_start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub discount_end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub discount_active: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub purity_percentage: f64,
    #[serde(default)]
    pub molecular_weight: Option<String>,
    #[serde(default)]
    pub cas_number: Option<String>,
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub storage_conditions: String,
    #[serde(default)]
    pub inclusions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stock_quantity: i64,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub featured: bool,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub safety_sheet_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub variations: Vec<ProductVariation>,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Content
// =============================================================================

/// A guide article from the `guide_topics` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub preview: Option<String>,
    pub content: String,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author: String,
    pub published_date: NaiveDate,
    #[serde(default, deserialize_with = "null_as_default")]
    pub display_order: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_enabled: bool,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub related_product_ids: Vec<String>,
}

/// Certificate of analysis for a tested batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoaReport {
    pub id: String,
    pub product_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub batch: String,
    pub test_date: NaiveDate,
    #[serde(default, deserialize_with = "null_as_default")]
    pub purity_percentage: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub task_number: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verification_key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub featured: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub laboratory: String,
}

/// Raw row of the `site_settings` key/value table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteSetting {
    pub id: String,
    #[serde(default)]
    pub value: serde_json::Value,
}
