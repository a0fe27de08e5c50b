//! Period metric cards with trends against the previous period.

use crate::format::format_currency;
use external_services::{Period, SalesMetrics};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Percentage change from `previous` to `current`.
///
/// A zero baseline yields `100` for any positive current value and `0`
/// otherwise.
pub fn trend_percent(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current > 0.0 { 100.0 } else { 0.0 };
    }
    (current - previous) / previous * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub percent: f64,
    pub direction: TrendDirection,
    /// Absolute value with one decimal, e.g. `12.5%`.
    pub label: String,
}

impl Trend {
    pub fn between(current: f64, previous: f64) -> Self {
        let percent = trend_percent(current, previous);
        let direction = if percent >= 0.0 {
            TrendDirection::Up
        } else {
            TrendDirection::Down
        };
        Self {
            percent,
            direction,
            label: format!("{:.1}%", percent.abs()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Revenue,
    Orders,
    Units,
    AverageOrderValue,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Revenue,
        MetricKind::Orders,
        MetricKind::Units,
        MetricKind::AverageOrderValue,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            MetricKind::Revenue => "Total Revenue",
            MetricKind::Orders => "Total Orders",
            MetricKind::Units => "Units Sold",
            MetricKind::AverageOrderValue => "Avg. Order Value",
        }
    }

    fn value_of(&self, metrics: &SalesMetrics) -> MetricValue {
        match self {
            MetricKind::Revenue => MetricValue::Money(metrics.total_revenue),
            MetricKind::Orders => MetricValue::Count(metrics.total_orders),
            MetricKind::Units => MetricValue::Count(metrics.total_units),
            MetricKind::AverageOrderValue => MetricValue::Money(metrics.average_order_value),
        }
    }
}

enum MetricValue {
    Money(Decimal),
    Count(u64),
}

impl MetricValue {
    fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Money(amount) => amount.to_f64().unwrap_or(0.0),
            MetricValue::Count(n) => *n as f64,
        }
    }

    fn display(&self) -> String {
        match self {
            MetricValue::Money(amount) => format_currency(*amount),
            MetricValue::Count(n) => n.to_string(),
        }
    }
}

pub const NO_PREVIOUS_DATA: &str = "No previous data";

/// One overview card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MetricCard {
    /// Placeholder of fixed shape shown while loading. Carries no figures.
    Skeleton,
    Value {
        kind: MetricKind,
        title: &'static str,
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trend: Option<Trend>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<&'static str>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewView {
    pub period: Period,
    pub period_label: &'static str,
    pub cards: Vec<MetricCard>,
}

/// Build the overview cards.
pub fn render_overview(
    current: &SalesMetrics,
    previous: Option<&SalesMetrics>,
    loading: bool,
    period: Period,
) -> OverviewView {
    let cards = MetricKind::ALL
        .iter()
        .map(|kind| {
            if loading {
                return MetricCard::Skeleton;
            }
            let value = kind.value_of(current);
            let trend = previous.map(|prev| Trend::between(value.as_f64(), kind.value_of(prev).as_f64()));
            MetricCard::Value {
                kind: *kind,
                title: kind.title(),
                value: value.display(),
                note: if trend.is_none() { Some(NO_PREVIOUS_DATA) } else { None },
                trend,
            }
        })
        .collect();

    OverviewView {
        period,
        period_label: period.label(),
        cards,
    }
}
