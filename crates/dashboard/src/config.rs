//! Service configuration loaded from the environment.

use crate::error::{DashboardError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Number of orders kept in the recent-sales window.
pub const DEFAULT_FEED_WINDOW: usize = 5;

/// Number of products requested for the toplist.
pub const DEFAULT_TOPLIST_LIMIT: usize = 5;

/// Dashboard configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// REST base URL of the hosted backend.
    pub backend_url: String,
    /// Anonymous API key, sent as `apikey` and bearer token.
    pub api_key: String,
    /// Realtime WebSocket URL. Derived from `backend_url` when unset.
    pub realtime_url: Option<String>,
    pub http_port: u16,
    pub metrics_port: u16,
    pub feed_window: usize,
    pub toplist_limit: usize,
    pub heartbeat_interval: Duration,
    pub overview_procedure: String,
    pub top_products_procedure: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            realtime_url: None,
            http_port: 8082,
            metrics_port: 9093,
            feed_window: DEFAULT_FEED_WINDOW,
            toplist_limit: DEFAULT_TOPLIST_LIMIT,
            heartbeat_interval: Duration::from_secs(30),
            overview_procedure: "get_sales_overview".to_string(),
            top_products_procedure: "get_top_products".to_string(),
        }
    }
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_key = lookup("BACKEND_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DashboardError::Config("BACKEND_API_KEY must be set".to_string()))?;

        Ok(Self {
            backend_url: lookup("BACKEND_URL").unwrap_or(defaults.backend_url),
            api_key,
            realtime_url: lookup("REALTIME_URL").filter(|v| !v.is_empty()),
            http_port: parse_or(&lookup, "HTTP_PORT", defaults.http_port)?,
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port)?,
            feed_window: parse_or(&lookup, "FEED_WINDOW", defaults.feed_window)?,
            toplist_limit: parse_or(&lookup, "TOPLIST_LIMIT", defaults.toplist_limit)?,
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            overview_procedure: lookup("OVERVIEW_PROCEDURE").unwrap_or(defaults.overview_procedure),
            top_products_procedure: lookup("TOP_PRODUCTS_PROCEDURE")
                .unwrap_or(defaults.top_products_procedure),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DashboardError::Config(format!("{} must be a number, got '{}'", key, raw))),
        None => Ok(default),
    }
}
