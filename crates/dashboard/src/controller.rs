//! Period selection and the server-computed dashboard figures.

use crate::component::ComponentState;
use crate::overview::{render_overview, OverviewView};
use crate::toplist::{render_toplist, SortKey, ToplistView};
use external_services::{call_as, Backend, Period, ProductRanking, SalesMetrics};
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Remote procedures backing the dashboard.
#[derive(Debug, Clone)]
pub struct Procedures {
    pub overview: String,
    pub top_products: String,
    pub toplist_limit: usize,
}

impl Default for Procedures {
    fn default() -> Self {
        Self {
            overview: "get_sales_overview".to_string(),
            top_products: "get_top_products".to_string(),
            toplist_limit: crate::config::DEFAULT_TOPLIST_LIMIT,
        }
    }
}

/// Metrics for the selected period and, when the backend has them, the
/// period before it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SalesSnapshot {
    pub current: SalesMetrics,
    pub previous: Option<SalesMetrics>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DashboardState {
    pub period: Period,
    pub overview: ComponentState<SalesSnapshot>,
    pub toplist: ComponentState<Vec<ProductRanking>>,
}

/// Owns the selected period and the overview and toplist states.
///
/// Fetches are serialized: a period change or refresh waits for the one in
/// flight to finish.
pub struct SalesDashboard {
    backend: Arc<dyn Backend>,
    procedures: Procedures,
    state: watch::Sender<DashboardState>,
    fetch_lock: Mutex<()>,
}

impl SalesDashboard {
    pub fn new(backend: Arc<dyn Backend>, procedures: Procedures) -> Self {
        let (state, _) = watch::channel(DashboardState::default());
        Self {
            backend,
            procedures,
            state,
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    pub fn period(&self) -> Period {
        self.state.borrow().period
    }

    /// Switch to `period`: both components re-enter loading and refetch.
    ///
    /// A failed fetch keeps the snapshot that was on display before.
    pub async fn select_period(&self, period: Period) {
        let _guard = self.fetch_lock.lock().await;
        info!("Loading dashboard for period {}", period);

        let mut prior_overview = None;
        let mut prior_toplist = None;
        self.state.send_modify(|state| {
            state.period = period;
            prior_overview = state.overview.begin_loading();
            prior_toplist = state.toplist.begin_loading();
        });

        let (overview, toplist) =
            tokio::join!(self.fetch_overview(period), self.fetch_toplist(period));

        self.state.send_modify(move |state| {
            state
                .overview
                .finish(overview.or(prior_overview).unwrap_or_default());
            state
                .toplist
                .finish(toplist.or(prior_toplist).unwrap_or_default());
        });
    }

    /// Load `period` unless it is already selected and loaded.
    /// `None` means the current period.
    pub async fn ensure_period(&self, period: Option<Period>) {
        let (current, loaded) = {
            let state = self.state.borrow();
            (state.period, state.overview.is_ready() && state.toplist.is_ready())
        };
        let target = period.unwrap_or(current);
        if target != current || !loaded {
            self.select_period(target).await;
        }
    }

    /// Refetch the current period in place, without entering loading.
    pub async fn refresh(&self) {
        let _guard = self.fetch_lock.lock().await;
        let period = self.period();
        debug!("Refreshing dashboard for period {}", period);

        let (overview, toplist) =
            tokio::join!(self.fetch_overview(period), self.fetch_toplist(period));

        self.state.send_if_modified(move |state| {
            if state.period != period {
                return false;
            }
            let mut changed = false;
            if let Some(snapshot) = overview {
                state.overview.finish(snapshot);
                changed = true;
            }
            if let Some(rankings) = toplist {
                state.toplist.finish(rankings);
                changed = true;
            }
            changed
        });
    }

    async fn fetch_overview(&self, period: Period) -> Option<SalesSnapshot> {
        let backend = self.backend.as_ref();
        let current = match call_as::<SalesMetrics>(
            backend,
            &self.procedures.overview,
            json!({ "period": period }),
        )
        .await
        {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!("Failed to fetch sales overview for {}: {}", period, e);
                counter!("dashboard_fetch_errors_total", "source" => "overview").increment(1);
                return None;
            }
        };

        let previous = match call_as::<Option<SalesMetrics>>(
            backend,
            &self.procedures.overview,
            json!({ "period": period, "period_offset": 1 }),
        )
        .await
        {
            Ok(previous) => previous,
            Err(e) => {
                debug!("No previous-period metrics for {}: {}", period, e);
                None
            }
        };

        Some(SalesSnapshot { current, previous })
    }

    async fn fetch_toplist(&self, period: Period) -> Option<Vec<ProductRanking>> {
        let result = call_as::<Option<Vec<ProductRanking>>>(
            self.backend.as_ref(),
            &self.procedures.top_products,
            json!({ "period": period, "limit_count": self.procedures.toplist_limit }),
        )
        .await;

        match result {
            Ok(rankings) => Some(rankings.unwrap_or_default()),
            Err(e) => {
                warn!("Failed to fetch top products for {}: {}", period, e);
                counter!("dashboard_fetch_errors_total", "source" => "toplist").increment(1);
                None
            }
        }
    }

    pub fn overview_view(&self) -> OverviewView {
        let state = self.state.borrow();
        let loading = !state.overview.is_ready();
        match state.overview.data() {
            Some(snapshot) => render_overview(
                &snapshot.current,
                snapshot.previous.as_ref(),
                loading,
                state.period,
            ),
            None => render_overview(&SalesMetrics::default(), None, loading, state.period),
        }
    }

    pub fn toplist_view(&self, sort: SortKey) -> ToplistView {
        let state = self.state.borrow();
        let rankings = state.toplist.data().map(Vec::as_slice).unwrap_or(&[]);
        render_toplist(rankings, !state.toplist.is_ready(), state.period, sort)
    }
}
