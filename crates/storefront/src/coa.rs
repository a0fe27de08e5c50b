//! Lab reports (certificates of analysis).

use crate::error::{Error, Result};
use crate::settings::SettingsService;
use external_services::{fetch_as, Backend, CoaReport, Filter, Order, Query};
use std::sync::Arc;

pub const COA_TABLE: &str = "coa_reports";

pub const COA_UNAVAILABLE: &str = "Lab reports are currently unavailable";

#[derive(Clone)]
pub struct CoaService {
    backend: Arc<dyn Backend>,
    settings: Arc<SettingsService>,
}

impl CoaService {
    pub fn new(backend: Arc<dyn Backend>, settings: Arc<SettingsService>) -> Self {
        Self { backend, settings }
    }

    async fn ensure_enabled(&self) -> Result<()> {
        if self.settings.current().await.coa_page_enabled {
            Ok(())
        } else {
            Err(Error::Unavailable(COA_UNAVAILABLE.to_string()))
        }
    }

    /// All reports, newest test first.
    pub async fn list_reports(&self) -> Result<Vec<CoaReport>> {
        self.ensure_enabled().await?;
        let query = Query::table(COA_TABLE).order(Order::desc("test_date"));
        Ok(fetch_as(self.backend.as_ref(), &query).await?)
    }

    pub async fn featured(&self) -> Result<Vec<CoaReport>> {
        self.ensure_enabled().await?;
        let query = Query::table(COA_TABLE)
            .filter(Filter::eq("featured", true))
            .order(Order::desc("test_date"));
        Ok(fetch_as(self.backend.as_ref(), &query).await?)
    }
}
