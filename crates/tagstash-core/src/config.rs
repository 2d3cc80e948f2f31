//! Configuration records for tagstash.
//!
//! Every record is built once and handed to the component that needs it.
//! Defaults live in `Default` impls and associated constants; nothing here is
//! shared or mutated after construction.

use crate::error::{Result, TagStashError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Directives supplied by the host caching framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CacheDirectives {
    /// Lifetime applied when a save does not name one.
    #[serde(with = "duration_secs")]
    pub default_lifetime: Duration,
    /// Emit per-entry save/remove events at INFO instead of DEBUG.
    pub logging: bool,
}

impl CacheDirectives {
    /// Default lifetime for cache entries (15 minutes).
    pub const DEFAULT_LIFETIME_SECS: u64 = 900;
}

impl Default for CacheDirectives {
    fn default() -> Self {
        Self {
            default_lifetime: Duration::from_secs(CacheDirectives::DEFAULT_LIFETIME_SECS),
            logging: false,
        }
    }
}

/// Parameters a [`crate::store::StoreFactory`] uses to open a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ConnectionOptions {
    /// Connection string, e.g. `sqlite:///var/cache/tagstash` or `memory://`.
    pub dsn: String,
    /// Name of the bucket to open; created on demand.
    pub bucket_name: String,
}

impl ConnectionOptions {
    pub const DEFAULT_DSN: &'static str = "sqlite://./tagstash";
    pub const DEFAULT_BUCKET: &'static str = "default";

    /// Split the dsn into its scheme and the remainder.
    pub fn scheme(&self) -> Result<(&str, &str)> {
        self.dsn
            .split_once("://")
            .ok_or_else(|| TagStashError::Config {
                message: format!("dsn has no scheme: {}", self.dsn),
            })
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            dsn: ConnectionOptions::DEFAULT_DSN.to_string(),
            bucket_name: ConnectionOptions::DEFAULT_BUCKET.to_string(),
        }
    }
}

/// Complete configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagStashConfig {
    pub connection: ConnectionOptions,
    pub directives: CacheDirectives,
}

impl TagStashConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TagStashError::io_with_path(e, path))?;
        Self::from_json(&raw)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TagStashConfig::default();
        assert_eq!(config.directives.default_lifetime, Duration::from_secs(900));
        assert!(!config.directives.logging);
        assert_eq!(config.connection.bucket_name, "default");
        assert_eq!(config.connection.scheme().unwrap(), ("sqlite", "./tagstash"));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = TagStashConfig::from_json(
            r#"{"connection": {"bucket_name": "pages"}, "directives": {"default_lifetime": 60}}"#,
        )
        .unwrap();
        assert_eq!(config.connection.bucket_name, "pages");
        assert_eq!(config.connection.dsn, ConnectionOptions::DEFAULT_DSN);
        assert_eq!(config.directives.default_lifetime, Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tagstash.json");
        std::fs::write(&path, r#"{"directives": {"logging": true}}"#).unwrap();

        let config = TagStashConfig::load(&path).unwrap();
        assert!(config.directives.logging);

        let missing = TagStashConfig::load(temp.path().join("nope.json"));
        assert!(matches!(missing, Err(TagStashError::Io { path: Some(_), .. })));
    }

    #[test]
    fn test_dsn_without_scheme() {
        let options = ConnectionOptions {
            dsn: "/tmp/cache".into(),
            ..Default::default()
        };
        assert!(matches!(options.scheme(), Err(TagStashError::Config { .. })));
    }
}
