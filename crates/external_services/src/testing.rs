//! In-memory [`Backend`] for unit tests of dependent crates.
//!
//! Rows are held per table. `eq`, `neq` and `in` filters, ordering and limits
//! are applied the way the REST surface applies them. Procedure results are
//! keyed by name plus the `period_offset` parameter, so current and previous
//! period calls can return different figures.

use crate::backend::{Backend, Filter, FilterOp, Query};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{self, AtomicBool, AtomicUsize};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    rpc: Mutex<HashMap<(String, u64), Value>>,
    failing: AtomicBool,
    next_id: AtomicUsize,
    /// Number of table reads, failed ones included.
    pub fetches: AtomicUsize,
    /// Every procedure call with its parameters.
    pub calls: Mutex<Vec<(String, Value)>>,
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let actual = render(row.get(&filter.column).unwrap_or(&Value::Null));
    match filter.op {
        FilterOp::Eq | FilterOp::Is => actual == filter.value,
        FilterOp::Neq => actual != filter.value,
        FilterOp::In => filter
            .value
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .any(|v| v == actual),
        _ => true,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => render(a).cmp(&render(b)),
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        self.set_rows(table, rows);
        self
    }

    pub fn with_rpc(self, procedure: &str, offset: u64, value: Value) -> Self {
        self.set_rpc(procedure, offset, value);
        self
    }

    pub fn set_rows(&self, table: &str, rows: Vec<Value>) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(table.to_string(), rows);
        }
    }

    pub fn set_rpc(&self, procedure: &str, offset: u64, value: Value) {
        if let Ok(mut rpc) = self.rpc.lock() {
            rpc.insert((procedure.to_string(), offset), value);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(atomic::Ordering::SeqCst) {
            return Err(Error::Api("backend unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>> {
        self.fetches.fetch_add(1, atomic::Ordering::SeqCst);
        self.check()?;
        let mut rows: Vec<Value> = self
            .rows(&query.table)
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| matches(row, f)))
            .collect();
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        Ok(rows.into_iter().take(query.limit.unwrap_or(usize::MAX)).collect())
    }

    async fn call(&self, procedure: &str, params: Value) -> Result<Value> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((procedure.to_string(), params.clone()));
        }
        self.check()?;
        let offset = params.get("period_offset").and_then(Value::as_u64).unwrap_or(0);
        self.rpc
            .lock()
            .ok()
            .and_then(|rpc| rpc.get(&(procedure.to_string(), offset)).cloned())
            .ok_or_else(|| Error::Api(format!("unknown procedure {}", procedure)))
    }

    async fn insert(&self, table: &str, mut row: Value) -> Result<Vec<Value>> {
        self.check()?;
        if row.get("id").is_none() {
            let n = self.next_id.fetch_add(1, atomic::Ordering::SeqCst);
            row["id"] = Value::String(format!("gen-{}", n + 1));
        }
        if let Ok(mut tables) = self.tables.lock() {
            tables.entry(table.to_string()).or_default().push(row.clone());
        }
        Ok(vec![row])
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<()> {
        self.check()?;
        if let Ok(mut tables) = self.tables.lock() {
            for row in tables.entry(table.to_string()).or_default().iter_mut() {
                if filters.iter().all(|f| matches(row, f)) {
                    if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
                        for (k, v) in fields {
                            target.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        self.check()?;
        if let Ok(mut tables) = self.tables.lock() {
            tables
                .entry(table.to_string())
                .or_default()
                .retain(|row| !filters.iter().all(|f| matches(row, f)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Order;
    use serde_json::json;

    #[tokio::test]
    async fn test_filters_order_and_limit() {
        let backend = FakeBackend::new().with_rows(
            "products",
            vec![
                json!({"id": "a", "price": 30, "available": true}),
                json!({"id": "b", "price": 10, "available": true}),
                json!({"id": "c", "price": 20, "available": false}),
            ],
        );

        let query = Query::table("products")
            .filter(Filter::eq("available", true))
            .order(Order::asc("price"));
        let ids: Vec<Value> = backend
            .fetch(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("b"), json!("a")]);

        let picked = backend
            .fetch(&Query::table("products").filter(Filter::one_of("id", ["a", "c"])).limit(1))
            .await
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(backend.fetches.load(atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mutations_and_rpc() {
        let backend = FakeBackend::new().with_rpc("get_sales_overview", 1, json!({"total_orders": 3}));

        let stored = backend.insert("guide_topics", json!({"title": "x"})).await.unwrap();
        assert_eq!(stored[0]["id"], "gen-1");
        backend
            .update("guide_topics", &[Filter::eq("id", "gen-1")], json!({"title": "y"}))
            .await
            .unwrap();
        assert_eq!(backend.rows("guide_topics")[0]["title"], "y");
        backend.delete("guide_topics", &[Filter::eq("id", "gen-1")]).await.unwrap();
        assert!(backend.rows("guide_topics").is_empty());

        let previous = backend
            .call("get_sales_overview", json!({"period_offset": 1}))
            .await
            .unwrap();
        assert_eq!(previous["total_orders"], 3);
        assert!(backend.call("get_sales_overview", json!({})).await.is_err());
        assert_eq!(backend.calls.lock().unwrap().len(), 2);
    }
}
