//! Clients for the hosted backend and the local key/value store.
//!
//! The hosted backend exposes three surfaces:
//! - REST queries and mutations over tables (`Backend::fetch`, `insert`, ...)
//! - Remote procedure calls for server-side aggregates (`Backend::call`)
//! - A realtime WebSocket delivering row-change notifications
//!
//! # Example
//!
//! ```ignore
//! use external_services::{Backend, BackendClient, Query, Order, fetch_as};
//!
//! let client = BackendClient::new("https://project.example.co", "anon-key");
//! let query = Query::table("orders").order(Order::desc("created_at")).limit(5);
//! let orders: Vec<external_services::OrderRecord> = fetch_as(&client, &query).await?;
//!
//! let store = external_services::RedisKvStore::new("redis://localhost:6379")?;
//! store.set("peptide_cart", "[]").await?;
//! ```

pub mod backend;
pub mod error;
pub mod kv_store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backend::{
    call_as, fetch_as, fetch_one_as, Article, Backend, BackendClient, CoaReport, Filter, LineItem,
    Order, OrderRecord, Period, Product, ProductRanking, ProductVariation, Query, SalesMetrics,
    SiteSetting,
};
pub use error::{Error, Result};
pub use kv_store::{KvStore, MemoryKvStore, RedisKvStore};
