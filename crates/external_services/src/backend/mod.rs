//! Hosted backend API client.
//!
//! Provides the REST/RPC client, query builder, realtime frame helpers and
//! the record types the storefront reads.

pub mod client;
pub mod query;
pub mod realtime;
pub mod types;

pub use client::{call_as, fetch_as, fetch_one_as, Backend, BackendClient};
pub use query::{Filter, FilterOp, Order, Query};
pub use types::{
    Article, CoaReport, LineItem, OrderRecord, Period, Product, ProductRanking, ProductVariation,
    SalesMetrics, SiteSetting,
};
