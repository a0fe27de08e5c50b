//! Best-selling products for the selected period.

use crate::error::DashboardError;
use crate::format::format_currency;
use external_services::{Period, ProductRanking};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Number of placeholder rows shown while the ranking loads.
pub const LOADING_ROWS: usize = 5;

/// Field the ranking is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Units,
    Revenue,
}

impl SortKey {
    pub fn toggle(self) -> Self {
        match self {
            SortKey::Units => SortKey::Revenue,
            SortKey::Revenue => SortKey::Units,
        }
    }
}

impl FromStr for SortKey {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "units" | "quantity" => Ok(SortKey::Units),
            "revenue" => Ok(SortKey::Revenue),
            other => Err(DashboardError::InvalidSortKey(other.to_string())),
        }
    }
}

/// Sorted copy of `rankings`, descending on `key`. Ties keep their input order.
pub fn sort_rankings(rankings: &[ProductRanking], key: SortKey) -> Vec<ProductRanking> {
    let mut sorted = rankings.to_vec();
    match key {
        SortKey::Units => sorted.sort_by(|a, b| b.units_sold.cmp(&a.units_sold)),
        SortKey::Revenue => sorted.sort_by(|a, b| b.revenue.cmp(&a.revenue)),
    }
    sorted
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "rank", rename_all = "lowercase")]
pub enum RankBadge {
    Gold,
    Silver,
    Bronze,
    Ordinal(usize),
}

impl RankBadge {
    /// Badge for a 1-based rank.
    pub fn for_rank(rank: usize) -> Self {
        match rank {
            1 => RankBadge::Gold,
            2 => RankBadge::Silver,
            3 => RankBadge::Bronze,
            n => RankBadge::Ordinal(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
    pub rank: usize,
    pub badge: RankBadge,
    pub hot: bool,
    pub product_name: String,
    pub units_sold: u64,
    pub revenue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToplistView {
    Loading {
        placeholder_rows: usize,
    },
    Empty {
        message: String,
    },
    Ranked {
        period_label: &'static str,
        sort: SortKey,
        rows: Vec<RankedRow>,
    },
}

/// Build the ranking view for `period`, ordered by `sort`.
pub fn render_toplist(
    rankings: &[ProductRanking],
    loading: bool,
    period: Period,
    sort: SortKey,
) -> ToplistView {
    if loading {
        return ToplistView::Loading {
            placeholder_rows: LOADING_ROWS,
        };
    }
    if rankings.is_empty() {
        return ToplistView::Empty {
            message: format!("No sales yet {}", period.label().to_lowercase()),
        };
    }

    let rows = sort_rankings(rankings, sort)
        .into_iter()
        .enumerate()
        .map(|(i, ranking)| RankedRow {
            rank: i + 1,
            badge: RankBadge::for_rank(i + 1),
            hot: i == 0,
            product_name: ranking.product_name,
            units_sold: ranking.units_sold,
            revenue: format_currency(ranking.revenue),
        })
        .collect();

    ToplistView::Ranked {
        period_label: period.label(),
        sort,
        rows,
    }
}
