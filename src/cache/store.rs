//! Key-value store contract shared by every cache backend
//!
//! Values are opaque strings at this level. Entities are serialized with
//! [`set_json`] and read back with [`get_json`], where a payload that no longer
//! deserializes is reported as a miss rather than an error.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Airport records are stable, keep them for a day
pub const AIRPORT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-airport and bulk METARs
pub const METAR_TTL: Duration = Duration::from_secs(5 * 60);

/// The composite weather bundle
pub const WEATHER_BUNDLE_TTL: Duration = Duration::from_secs(5 * 60);

/// Radar frame index
pub const RADAR_TTL: Duration = Duration::from_secs(5 * 60);

/// Wind grid and frontal analysis
pub const WIND_TTL: Duration = Duration::from_secs(60 * 60);
pub const FRONTS_TTL: Duration = Duration::from_secs(60 * 60);

/// How long a code stays blacklisted after its last failure
pub const BLACKLIST_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Cache key namespace
pub mod keys {
    pub const AIRPORT_BLACKLIST: &str = "airport:blacklist";
    pub const WEATHER_ALL: &str = "weather:all";
    pub const WEATHER_METARS: &str = "weather:metars";
    pub const WEATHER_RADAR: &str = "weather:radar";
    pub const WEATHER_WIND: &str = "weather:wind";
    pub const WEATHER_FRONTS: &str = "weather:fronts";

    pub fn airport(icao: &str) -> String {
        format!("airport:data:{}", icao)
    }

    pub fn metar(icao: &str) -> String {
        format!("weather:metar:{}", icao)
    }
}

/// Errors raised by a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the backing storage failed
    #[error("cache I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A value could not be encoded for storage
    #[error("failed to encode cache entry '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An expiring key-value store with set collections
///
/// Every write must have completed when the returned future resolves; callers
/// rely on a successful `set` being visible to the next `get`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value for `key`, or `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key` for `ttl`, replacing any previous value
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Drops `key` if present
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Adds `member` to the set at `set_key`; re-adding resets that member's TTL
    async fn add_to_set(&self, set_key: &str, member: &str, ttl: Duration)
        -> Result<(), CacheError>;

    /// Returns the unexpired members of the set at `set_key`
    async fn set_members(&self, set_key: &str) -> Result<HashSet<String>, CacheError>;
}

/// Reads and deserializes a cached entity
///
/// Backend failures and undecodable payloads both count as a miss, so the
/// caller falls through to the upstream source.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Option<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!(key, "cache miss");
            return None;
        }
        Err(e) => {
            warn!(key, error = %e, "cache read failed, treating as miss");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => {
            debug!(key, "cache hit");
            Some(value)
        }
        Err(e) => {
            debug!(key, error = %e, "cached value no longer decodes, treating as miss");
            None
        }
    }
}

/// Serializes and stores an entity
pub async fn set_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let json = serde_json::to_string(value).map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &json, ttl).await
}
