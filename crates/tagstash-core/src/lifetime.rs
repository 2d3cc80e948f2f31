//! Conversion of cache lifetimes into store expiry fields.
//!
//! Stores read small expiry values as relative durations and large ones as
//! absolute timestamps (see [`crate::store::RELATIVE_EXPIRY_LIMIT_SECS`]).
//! The policy always emits an absolute Unix timestamp: any present-day
//! timestamp is far past the limit, so both readings agree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime requested for a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Use the configured default lifetime.
    #[default]
    Default,
    /// Never expire.
    Infinite,
    /// Expire this many seconds from now.
    Seconds(u64),
}

impl From<Duration> for Lifetime {
    fn from(value: Duration) -> Self {
        Lifetime::Seconds(value.as_secs())
    }
}

impl From<Option<u64>> for Lifetime {
    /// `None` is an infinite lifetime, mirroring a `null` lifetime from a host framework.
    fn from(value: Option<u64>) -> Self {
        value.map_or(Lifetime::Infinite, Lifetime::Seconds)
    }
}

/// Resolves [`Lifetime`]s against a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifetimePolicy {
    default_lifetime: Duration,
}

impl LifetimePolicy {
    pub fn new(default_lifetime: Duration) -> Self {
        Self { default_lifetime }
    }

    pub fn default_lifetime(&self) -> Duration {
        self.default_lifetime
    }

    /// Absolute expiry for `lifetime` as of now, or `None` for no expiry.
    pub fn resolve(&self, lifetime: Lifetime) -> Option<u64> {
        self.resolve_at(lifetime, Utc::now())
    }

    /// Absolute expiry for `lifetime` as of `now`, or `None` for no expiry.
    ///
    /// `Seconds(0)` resolves to `now` itself, so the entry is born expired.
    pub fn resolve_at(&self, lifetime: Lifetime, now: DateTime<Utc>) -> Option<u64> {
        let secs = match lifetime {
            Lifetime::Infinite => return None,
            Lifetime::Default => self.default_lifetime.as_secs(),
            Lifetime::Seconds(secs) => secs,
        };
        Some(Self::expiry_after(secs, now))
    }

    /// Absolute expiry `secs` seconds after `now`.
    pub fn expiry_after(secs: u64, now: DateTime<Utc>) -> u64 {
        let now = u64::try_from(now.timestamp()).unwrap_or(0);
        now.saturating_add(secs)
    }
}
