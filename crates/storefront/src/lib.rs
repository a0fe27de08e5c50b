//! Storefront service library.
//!
//! Serves the product catalog, per-visitor carts persisted in a key/value
//! store, guide articles, lab reports (COA) and global site settings. All
//! records live in the hosted backend; carts live in Redis.

pub mod api;
pub mod articles;
pub mod cart;
pub mod catalog;
pub mod coa;
pub mod config;
pub mod error;
pub mod settings;

pub use api::{create_router, AppState};
pub use articles::{ArticleDraft, ArticleService};
pub use cart::{Cart, CartItem, CartStore};
pub use catalog::{Catalog, SortOrder};
pub use coa::CoaService;
pub use config::Config;
pub use error::{Error, Result};
pub use settings::{SettingsService, SiteSettings};
