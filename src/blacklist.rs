//! Negative-result registry for airport codes
//!
//! An airport whose upstream response was oversized or malformed is recorded
//! here and never requested again until its entry lapses.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::store::BLACKLIST_TTL;
use crate::cache::{keys, CacheError, KvStore};

/// Persistent set of ICAO codes known to be unavailable
#[derive(Clone)]
pub struct Blacklist {
    store: Arc<dyn KvStore>,
}

impl Blacklist {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Returns true if `code` must not be fetched
    ///
    /// A store failure is logged and reported as "not blacklisted"; the fetch
    /// that follows will simply hit the cache or upstream.
    pub async fn is_blacklisted(&self, code: &str) -> bool {
        self.codes().await.contains(code)
    }

    /// Returns all currently blacklisted codes
    pub async fn codes(&self) -> HashSet<String> {
        match self.store.set_members(keys::AIRPORT_BLACKLIST).await {
            Ok(codes) => codes,
            Err(e) => {
                warn!(error = %e, "blacklist unavailable, assuming empty");
                HashSet::new()
            }
        }
    }

    /// Blacklists `code`, restarting its TTL if it was already present
    pub async fn add(&self, code: &str) -> Result<(), CacheError> {
        self.store
            .add_to_set(keys::AIRPORT_BLACKLIST, code, BLACKLIST_TTL)
            .await?;
        info!(code, "airport blacklisted");
        Ok(())
    }
}
