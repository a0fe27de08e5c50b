//! HTTP API handlers for the storefront.

use crate::articles::{ArticleDetail, ArticleDraft, ArticleService};
use crate::cart::{Cart, CartItem, CartStore};
use crate::catalog::{self, Catalog, SortOrder};
use crate::coa::CoaService;
use crate::error::{Error, Result};
use crate::settings::{SettingsService, SiteSettings};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post, put},
    Router,
};
use external_services::{Article, CoaReport, Product};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub carts: CartStore,
    pub articles: ArticleService,
    pub coa: CoaService,
    pub settings: Arc<SettingsService>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Catalog
        .route("/products", get(list_products_handler))
        .route("/products/{id}", get(get_product_handler))
        // Cart
        .route("/cart/{cart_id}", get(get_cart_handler).delete(clear_cart_handler))
        .route("/cart/{cart_id}/items", post(add_item_handler))
        .route(
            "/cart/{cart_id}/items/{index}",
            patch(update_item_handler).delete(remove_item_handler),
        )
        // Articles
        .route("/articles", get(list_articles_handler).post(create_article_handler))
        .route("/articles/all", get(list_all_articles_handler))
        .route(
            "/articles/{id}",
            get(get_article_handler)
                .put(update_article_handler)
                .delete(delete_article_handler),
        )
        .route("/articles/{id}/toggle", post(toggle_article_handler))
        // Lab reports
        .route("/coa", get(list_coa_handler))
        .route("/coa/featured", get(featured_coa_handler))
        // Settings
        .route("/settings", get(get_settings_handler))
        .route("/settings/invalidate", post(invalidate_settings_handler))
        .route("/settings/{key}", put(set_setting_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProductListParams {
    search: Option<String>,
    sort: Option<String>,
}

/// Product with its derived pricing and stock figures.
#[derive(Serialize)]
struct ProductResponse {
    #[serde(flatten)]
    product: Product,
    price: Decimal,
    has_discount: bool,
    total_stock: i64,
    low_stock: bool,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        let variation = catalog::default_variation(&product).cloned();
        Self {
            price: catalog::effective_price(&product, variation.as_ref()),
            has_discount: catalog::has_discount(&product, variation.as_ref()),
            total_stock: catalog::total_stock(&product),
            low_stock: catalog::is_low_stock(&product),
            product,
        }
    }
}

#[derive(Serialize)]
struct ProductListResponse {
    products: Vec<Product>,
    count: usize,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct AddItemRequest {
    product_id: String,
    variation_id: Option<String>,
    #[serde(default = "default_quantity")]
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct UpdateItemRequest {
    quantity: i64,
}

#[derive(Debug, Serialize)]
struct CartResponse {
    items: Vec<CartItem>,
    total_price: Decimal,
    item_count: u32,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            total_price: cart.total_price(),
            item_count: cart.item_count(),
            items: cart.items,
        }
    }
}

#[derive(Serialize)]
struct ArticleListResponse {
    articles: Vec<Article>,
    count: usize,
}

#[derive(Serialize)]
struct ToggleResponse {
    id: String,
    is_enabled: bool,
}

#[derive(Serialize)]
struct CoaListResponse {
    reports: Vec<CoaReport>,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct SetSettingRequest {
    enabled: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn list_products_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProductListParams>,
) -> Result<Json<ProductListResponse>> {
    let sort = match params.sort.as_deref() {
        Some(raw) => raw.parse::<SortOrder>()?,
        None => SortOrder::default(),
    };
    let products = state
        .catalog
        .list_products(params.search.as_deref(), sort)
        .await?;
    let count = products.len();
    Ok(Json(ProductListResponse { products, count }))
}

async fn get_product_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>> {
    Ok(Json(state.catalog.get_product(&id).await?.into()))
}

// =============================================================================
// Cart Handlers
// =============================================================================

async fn get_cart_handler(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<String>,
) -> Result<Json<CartResponse>> {
    Ok(Json(state.carts.load(&cart_id).await?.into()))
}

/// Add a product (optionally a specific variation) to a cart.
async fn add_item_handler(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>> {
    let product = state.catalog.get_product(&req.product_id).await?;
    let variation = match &req.variation_id {
        Some(variation_id) => Some(
            product
                .variations
                .iter()
                .find(|v| &v.id == variation_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("variation {}", variation_id)))?,
        ),
        None => None,
    };

    let (cart, _) = state
        .carts
        .mutate(&cart_id, |cart| cart.add(&product, variation.as_ref(), req.quantity))
        .await?;

    metrics::counter!("storefront_cart_additions_total").increment(1);
    info!(
        "Added {} x {} to cart '{}'",
        req.quantity, product.name, cart_id
    );
    Ok(Json(cart.into()))
}

async fn update_item_handler(
    State(state): State<Arc<AppState>>,
    Path((cart_id, index)): Path<(String, usize)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<CartResponse>> {
    let (cart, _) = state
        .carts
        .mutate(&cart_id, |cart| cart.update_quantity(index, req.quantity))
        .await?;
    Ok(Json(cart.into()))
}

async fn remove_item_handler(
    State(state): State<Arc<AppState>>,
    Path((cart_id, index)): Path<(String, usize)>,
) -> Result<Json<CartResponse>> {
    let (cart, _) = state
        .carts
        .mutate(&cart_id, |cart| cart.remove(index))
        .await?;
    Ok(Json(cart.into()))
}

async fn clear_cart_handler(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<String>,
) -> Result<StatusCode> {
    state.carts.clear(&cart_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Article Handlers
// =============================================================================

/// Published articles for the guide index.
async fn list_articles_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ArticleListResponse>> {
    let articles = state.articles.list_published().await?;
    let count = articles.len();
    Ok(Json(ArticleListResponse { articles, count }))
}

/// Every article, for the admin editor.
async fn list_all_articles_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ArticleListResponse>> {
    let articles = state.articles.list_all().await?;
    let count = articles.len();
    Ok(Json(ArticleListResponse { articles, count }))
}

async fn get_article_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ArticleDetail>> {
    Ok(Json(state.articles.get_with_related(&id).await?))
}

async fn create_article_handler(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<ArticleDraft>,
) -> Result<(StatusCode, Json<Article>)> {
    let article = state.articles.create(draft).await?;
    metrics::counter!("storefront_articles_created_total").increment(1);
    Ok((StatusCode::CREATED, Json(article)))
}

async fn update_article_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(draft): Json<ArticleDraft>,
) -> Result<StatusCode> {
    state.articles.update(&id, draft).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_article_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.articles.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_article_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ToggleResponse>> {
    let is_enabled = state.articles.toggle(&id).await?;
    Ok(Json(ToggleResponse { id, is_enabled }))
}

// =============================================================================
// Lab Report and Settings Handlers
// =============================================================================

async fn list_coa_handler(State(state): State<Arc<AppState>>) -> Result<Json<CoaListResponse>> {
    let reports = state.coa.list_reports().await?;
    let count = reports.len();
    Ok(Json(CoaListResponse { reports, count }))
}

async fn featured_coa_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CoaListResponse>> {
    let reports = state.coa.featured().await?;
    let count = reports.len();
    Ok(Json(CoaListResponse { reports, count }))
}

async fn get_settings_handler(State(state): State<Arc<AppState>>) -> Json<SiteSettings> {
    Json(state.settings.current().await)
}

async fn set_setting_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<SetSettingRequest>,
) -> Result<Json<SiteSettings>> {
    state.settings.set(&key, req.enabled).await?;
    Ok(Json(state.settings.current().await))
}

async fn invalidate_settings_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.settings.invalidate().await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::product_json;
    use crate::catalog::PRODUCTS_TABLE;
    use crate::coa::COA_TABLE;
    use crate::settings::{COA_PAGE_ENABLED, SETTINGS_TABLE};
    use external_services::testing::FakeBackend;
    use axum::response::IntoResponse;
    use external_services::MemoryKvStore;
    use serde_json::json;
    use std::time::Duration;

    fn app_state(backend: Arc<FakeBackend>) -> Arc<AppState> {
        let settings = Arc::new(SettingsService::new(backend.clone(), Duration::ZERO));
        Arc::new(AppState {
            catalog: Catalog::new(backend.clone()),
            carts: CartStore::new(Arc::new(MemoryKvStore::new())),
            articles: ArticleService::new(backend.clone(), settings.clone(), "SlimDose Team"),
            coa: CoaService::new(backend, settings.clone()),
            settings,
        })
    }

    fn catalog_backend() -> Arc<FakeBackend> {
        let mut with_variation = product_json("p2", "Tirzepatide", 3000, 0);
        with_variation["variations"] = json!([
            {"id": "v1", "product_id": "p2", "name": "10mg", "price": 3500, "stock_quantity": 2}
        ]);
        Arc::new(FakeBackend::new().with_rows(
            PRODUCTS_TABLE,
            vec![product_json("p1", "BPC-157", 1500, 3), with_variation],
        ))
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health_handler().await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_list_products_rejects_unknown_sort() {
        let state = app_state(catalog_backend());
        let params = ProductListParams {
            search: None,
            sort: Some("color".to_string()),
        };
        let err = list_products_handler(State(state.clone()), Query(params))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let Json(listed) = list_products_handler(State(state), Query(ProductListParams::default()))
            .await
            .unwrap();
        assert_eq!(listed.count, 2);
    }

    #[tokio::test]
    async fn test_product_detail_figures() {
        let state = app_state(catalog_backend());

        let Json(detail) = get_product_handler(State(state.clone()), Path("p2".to_string()))
            .await
            .unwrap();
        assert_eq!(detail.price, Decimal::from(3500));
        assert_eq!(detail.total_stock, 2);
        assert!(detail.low_stock);
        assert!(!detail.has_discount);

        let body = serde_json::to_value(&detail).unwrap();
        assert_eq!(body["id"], "p2");
        assert_eq!(body["low_stock"], true);

        let missing = get_product_handler(State(state), Path("nope".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cart_flow() {
        let state = app_state(catalog_backend());
        let cart_id = "visitor-1".to_string();

        let add = |product_id: &str, variation_id: Option<&str>, quantity: u32| AddItemRequest {
            product_id: product_id.to_string(),
            variation_id: variation_id.map(str::to_string),
            quantity,
        };

        add_item_handler(State(state.clone()), Path(cart_id.clone()), Json(add("p1", None, 2)))
            .await
            .unwrap();
        let Json(cart) = add_item_handler(
            State(state.clone()),
            Path(cart_id.clone()),
            Json(add("p2", Some("v1"), 1)),
        )
        .await
        .unwrap();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.item_count, 3);
        assert_eq!(cart.total_price, Decimal::from(1500 * 2 + 3500));

        let err = add_item_handler(
            State(state.clone()),
            Path(cart_id.clone()),
            Json(add("p1", None, 2)),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let missing = add_item_handler(
            State(state.clone()),
            Path(cart_id.clone()),
            Json(add("p2", Some("nope"), 1)),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let Json(cart) = update_item_handler(
            State(state.clone()),
            Path((cart_id.clone(), 0)),
            Json(UpdateItemRequest { quantity: 0 }),
        )
        .await
        .unwrap();
        assert_eq!(cart.items.len(), 1);

        let status = clear_cart_handler(State(state.clone()), Path(cart_id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let Json(cart) = get_cart_handler(State(state), Path(cart_id)).await.unwrap();
        assert!(cart.items.is_empty());
    }

    #[tokio::test]
    async fn test_coa_switched_off_is_not_found() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_rows(COA_TABLE, vec![])
                .with_rows(SETTINGS_TABLE, vec![json!({"id": COA_PAGE_ENABLED, "value": false})]),
        );
        let state = app_state(backend);
        let err = list_coa_handler(State(state.clone())).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let Json(settings) = set_setting_handler(
            State(state.clone()),
            Path(COA_PAGE_ENABLED.to_string()),
            Json(SetSettingRequest { enabled: true }),
        )
        .await
        .unwrap();
        assert!(settings.coa_page_enabled);
        let Json(reports) = list_coa_handler(State(state)).await.unwrap();
        assert_eq!(reports.count, 0);
    }

    #[tokio::test]
    async fn test_article_create_validation() {
        let state = app_state(Arc::new(FakeBackend::new()));
        let draft: ArticleDraft = serde_json::from_value(json!({"title": "", "content": "x"})).unwrap();
        let err = create_article_handler(State(state.clone()), Json(draft))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let draft: ArticleDraft =
            serde_json::from_value(json!({"title": "Storage", "content": "Keep cold."})).unwrap();
        let (status, Json(article)) = create_article_handler(State(state.clone()), Json(draft))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(toggled) = toggle_article_handler(State(state), Path(article.id.clone()))
            .await
            .unwrap();
        assert!(!toggled.is_enabled);
    }
}
