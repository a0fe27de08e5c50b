//! WebSocket protocol message types.
//!
//! Defines the JSON message format for dashboard clients.

use crate::overview::OverviewView;
use crate::recent_sales::RecentSalesView;
use crate::toplist::ToplistView;
use external_services::Period;
use serde::{Deserialize, Serialize};

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Change the dashboard period. Every client receives the new figures.
    SelectPeriod { period: Period },
    /// Request the current views.
    Refresh,
    /// Ping message for keepalive.
    Ping,
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Recent orders (sent on connect and on every feed change).
    RecentSales(RecentSalesView),
    /// Metric cards for the selected period.
    Overview(OverviewView),
    /// Product ranking for the selected period.
    Toplist(ToplistView),
    /// Pong response to ping.
    Pong,
    /// Error message.
    Error {
        /// Error message.
        message: String,
        /// Error code.
        code: String,
    },
}
