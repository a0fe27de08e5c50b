//! Storefront configuration from the environment.

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub api_key: String,
    /// Carts are kept in memory when unset.
    pub redis_url: Option<String>,
    pub http_port: u16,
    pub metrics_port: u16,
    pub settings_ttl: Duration,
    /// Author stamped on new articles that name none.
    pub default_author: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, raw))),
                None => Ok(default),
            }
        };

        let api_key = lookup("BACKEND_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config("BACKEND_API_KEY must be set".to_string()))?;

        let http_port = u16::try_from(number("HTTP_PORT", 8081)?)
            .map_err(|_| Error::Config("HTTP_PORT out of range".to_string()))?;
        let metrics_port = u16::try_from(number("METRICS_PORT", 9092)?)
            .map_err(|_| Error::Config("METRICS_PORT out of range".to_string()))?;

        Ok(Self {
            backend_url: lookup("BACKEND_URL").unwrap_or_else(|| "http://localhost:54321".into()),
            api_key,
            redis_url: lookup("REDIS_URL").filter(|v| !v.is_empty()),
            http_port,
            metrics_port,
            settings_ttl: Duration::from_secs(number("SETTINGS_TTL_SECS", 60)?),
            default_author: lookup("DEFAULT_AUTHOR").unwrap_or_else(|| "SlimDose Team".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(|key| match key {
            "BACKEND_API_KEY" => Some("anon".to_string()),
            "SETTINGS_TTL_SECS" => Some("5".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.http_port, 8081);
        assert_eq!(config.settings_ttl, Duration::from_secs(5));
        assert_eq!(config.default_author, "SlimDose Team");
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_lookup(|_| None).is_err());
        let result = Config::from_lookup(|key| match key {
            "BACKEND_API_KEY" => Some("anon".to_string()),
            "HTTP_PORT" => Some("70000".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }
}
