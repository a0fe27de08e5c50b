//! Live sales dashboard service.
//!
//! This service:
//! - Loads the most recent orders and keeps them current from the backend's
//!   realtime insert feed
//! - Fetches server-computed period metrics and product rankings over RPC
//! - Renders view models for the overview cards, the toplist and the feed
//! - Serves them over HTTP and pushes feed updates to WebSocket clients
//!
//! ## Architecture
//!
//! ```text
//! Backend realtime: INSERT on orders
//!         ↓
//! RecentSalesFeed (ChannelManager task, RecentWindow merge)
//!         ↓ watch
//! Broadcaster ──→ SalesDashboard::refresh (RPC)
//!         ↓
//! ClientRegistry → WebSocket clients
//! ```

pub mod client;
pub mod component;
pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod overview;
pub mod protocol;
pub mod recent_sales;
pub mod toplist;
pub mod ws_server;

pub use client::{ClientId, ClientRegistry, ClientState};
pub use component::ComponentState;
pub use config::Config;
pub use controller::{Procedures, SalesDashboard, SalesSnapshot};
pub use error::{DashboardError, Result};
pub use protocol::{ClientMessage, ServerMessage};
pub use recent_sales::{activate, FeedHandle, FeedState, RecentSalesFeed, RecentSalesView};
pub use ws_server::{create_router, spawn_broadcaster, AppState};
