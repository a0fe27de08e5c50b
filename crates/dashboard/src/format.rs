//! Display formatting shared by the dashboard views.

use chrono::{DateTime, Utc};
use external_services::LineItem;
use rust_decimal::{Decimal, RoundingStrategy};

pub const CURRENCY_SYMBOL: &str = "₱";

/// Format an amount as whole pesos with thousands separators (`₱12,345`).
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = rounded.abs().to_string();
    let whole = text.split('.').next().unwrap_or("0");

    let grouped = group_thousands(whole);
    if negative {
        format!("-{}{}", CURRENCY_SYMBOL, grouped)
    } else {
        format!("{}{}", CURRENCY_SYMBOL, grouped)
    }
}

/// Format an order amount keeping its fraction (up to three digits, trailing
/// zeros dropped), e.g. `₱1,234.5`.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount
        .round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = rounded.abs().to_string();
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text.as_str(), None),
    };

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(CURRENCY_SYMBOL);
    out.push_str(&group_thousands(whole));
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Relative label for a timestamp: `Just now`, `5m ago`, `3h ago`, `2d ago`.
///
/// Timestamps in the future (clock skew) read as `Just now`.
pub fn format_time_ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds();
    if seconds < 60 {
        return "Just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}

/// One-line summary of an order's items, e.g. `BPC-157 (5mg) +2 more`.
pub fn item_summary(items: &[LineItem]) -> String {
    let Some(first) = items.first() else {
        return "No items".to_string();
    };

    let mut summary = first
        .product_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or("Product")
        .to_string();

    if let Some(variation) = first.variation_name.as_deref().filter(|v| !v.is_empty()) {
        summary.push_str(&format!(" ({})", variation));
    }
    if items.len() > 1 {
        summary.push_str(&format!(" +{} more", items.len() - 1));
    }
    summary
}
