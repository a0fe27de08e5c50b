//! Hosted backend REST and RPC client.

use crate::backend::query::{Filter, Query};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// REST path prefix for tables and procedures.
const REST_PATH: &str = "/rest/v1";

/// Query, RPC and mutation surface of the hosted backend.
///
/// Services depend on this trait rather than on `BackendClient` so tests can
/// substitute an in-memory backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a table query and return the raw rows.
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>>;

    /// Invoke a remote procedure. Returns a scalar/object or an array.
    async fn call(&self, procedure: &str, params: Value) -> Result<Value>;

    /// Insert one row, returning the stored representation.
    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>>;

    /// Patch every row matching `filters`.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<()>;

    /// Delete every row matching `filters`.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()>;
}

/// Run a query and deserialize every row.
pub async fn fetch_as<T: DeserializeOwned>(backend: &dyn Backend, query: &Query) -> Result<Vec<T>> {
    let rows = backend.fetch(query).await?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

/// Run a query expected to match at most one row.
pub async fn fetch_one_as<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> Result<Option<T>> {
    let query = query.clone().limit(1);
    let mut rows = fetch_as::<T>(backend, &query).await?;
    Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
}

/// Invoke a procedure and deserialize its result.
///
/// Procedures returning a single row sometimes come back wrapped in a one
/// element array; that wrapper is removed when `T` is not itself a sequence.
pub async fn call_as<T: DeserializeOwned>(
    backend: &dyn Backend,
    procedure: &str,
    params: Value,
) -> Result<T> {
    let value = backend.call(procedure, params).await?;
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => Ok(parsed),
        Err(err) => match value {
            Value::Array(mut items) if items.len() == 1 => {
                Ok(serde_json::from_value(items.remove(0))?)
            }
            _ => Err(Error::from(err)),
        },
    }
}

/// HTTP client for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    /// Create a client for a project base URL (e.g. `https://xyz.example.co`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}{}/{}", self.base_url, REST_PATH, table)
    }

    fn rpc_url(&self, procedure: &str) -> String {
        format!("{}{}/rpc/{}", self.base_url, REST_PATH, procedure)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "API returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Backend for BackendClient {
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>> {
        let url = self.table_url(&query.table);
        debug!("Fetching {} with {:?}", url, query.to_query_pairs());

        let response = self
            .authorized(self.http.get(&url))
            .query(&query.to_query_pairs())
            .send()
            .await?;
        let response = Self::check(response).await?;

        let rows: Vec<Value> = response.json().await?;
        Ok(rows)
    }

    async fn call(&self, procedure: &str, params: Value) -> Result<Value> {
        let url = self.rpc_url(procedure);
        debug!("Calling {} with {}", url, params);

        let response = self
            .authorized(self.http.post(&url))
            .json(&params)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let value: Value = response.json().await?;
        Ok(value)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>> {
        let url = self.table_url(table);
        let response = self
            .authorized(self.http.post(&url))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let rows: Vec<Value> = response.json().await?;
        Ok(rows)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<()> {
        if filters.is_empty() {
            return Err(Error::Api("refusing unfiltered update".to_string()));
        }
        let url = self.table_url(table);
        let pairs: Vec<(String, String)> = filters.iter().map(Filter::to_pair).collect();
        let response = self
            .authorized(self.http.patch(&url))
            .query(&pairs)
            .json(&patch)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        if filters.is_empty() {
            return Err(Error::Api("refusing unfiltered delete".to_string()));
        }
        let url = self.table_url(table);
        let pairs: Vec<(String, String)> = filters.iter().map(Filter::to_pair).collect();
        let response = self
            .authorized(self.http.delete(&url))
            .query(&pairs)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
