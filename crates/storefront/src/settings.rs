//! Site-wide settings with a cached snapshot.
//!
//! Settings live as key/value rows in the `site_settings` table. Readers get
//! a typed [`SiteSettings`] snapshot that is refreshed after the TTL expires
//! or after [`SettingsService::invalidate`]. A failed refresh keeps serving
//! the last snapshot, or the defaults when none was ever loaded.

use crate::error::{Error, Result};
use external_services::{fetch_as, Backend, Filter, Query, SiteSetting};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const SETTINGS_TABLE: &str = "site_settings";

pub const COA_PAGE_ENABLED: &str = "coa_page_enabled";
pub const GUIDES_PAGE_ENABLED: &str = "guides_page_enabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSettings {
    pub coa_page_enabled: bool,
    pub guides_page_enabled: bool,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            coa_page_enabled: true,
            guides_page_enabled: true,
        }
    }
}

/// Read a flag stored as `true`, `"true"` or `{"enabled": true}`.
fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map.get("enabled").and_then(parse_flag),
        _ => None,
    }
}

impl SiteSettings {
    /// Build a snapshot from raw rows. Unknown keys are ignored and
    /// unreadable values keep the default.
    pub fn from_rows(rows: &[SiteSetting]) -> Self {
        let mut settings = Self::default();
        for row in rows {
            let Some(flag) = parse_flag(&row.value) else {
                warn!("Ignoring unreadable value for setting '{}'", row.id);
                continue;
            };
            match row.id.as_str() {
                COA_PAGE_ENABLED => settings.coa_page_enabled = flag,
                GUIDES_PAGE_ENABLED => settings.guides_page_enabled = flag,
                _ => {}
            }
        }
        settings
    }
}

struct Cached {
    settings: SiteSettings,
    fetched_at: Option<Instant>,
}

pub struct SettingsService {
    backend: Arc<dyn Backend>,
    ttl: Duration,
    cache: RwLock<Cached>,
}

impl SettingsService {
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cache: RwLock::new(Cached {
                settings: SiteSettings::default(),
                fetched_at: None,
            }),
        }
    }

    /// Current settings, refetched when the cached copy is stale.
    pub async fn current(&self) -> SiteSettings {
        {
            let cache = self.cache.read().await;
            if let Some(at) = cache.fetched_at {
                if at.elapsed() < self.ttl {
                    return cache.settings;
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited.
        if let Some(at) = cache.fetched_at {
            if at.elapsed() < self.ttl {
                return cache.settings;
            }
        }

        match self.fetch().await {
            Ok(settings) => {
                debug!("Loaded site settings: {:?}", settings);
                cache.settings = settings;
                cache.fetched_at = Some(Instant::now());
            }
            Err(e) => {
                warn!("Failed to load site settings, serving cached values: {}", e);
                metrics::counter!("storefront_settings_fetch_errors_total").increment(1);
            }
        }
        cache.settings
    }

    async fn fetch(&self) -> Result<SiteSettings> {
        let rows: Vec<SiteSetting> =
            fetch_as(self.backend.as_ref(), &Query::table(SETTINGS_TABLE)).await?;
        Ok(SiteSettings::from_rows(&rows))
    }

    /// Force the next read to refetch.
    pub async fn invalidate(&self) {
        self.cache.write().await.fetched_at = None;
    }

    /// Persist a flag and invalidate the cache.
    pub async fn set(&self, key: &str, enabled: bool) -> Result<()> {
        if key != COA_PAGE_ENABLED && key != GUIDES_PAGE_ENABLED {
            return Err(Error::Validation(format!("Unknown setting: {}", key)));
        }

        let filters = [Filter::eq("id", key)];
        let existing = self
            .backend
            .fetch(&Query::table(SETTINGS_TABLE).filter(filters[0].clone()).limit(1))
            .await?;
        if existing.is_empty() {
            self.backend
                .insert(SETTINGS_TABLE, json!({ "id": key, "value": enabled }))
                .await?;
        } else {
            self.backend
                .update(SETTINGS_TABLE, &filters, json!({ "value": enabled }))
                .await?;
        }

        info!("Setting '{}' set to {}", key, enabled);
        self.invalidate().await;
        Ok(())
    }
}
