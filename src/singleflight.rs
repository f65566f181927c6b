//! Request coalescing for keyed fetches.
//!
//! When several tasks ask for the same key while a fetch for it is still
//! running, only the first one (the leader) does the work. The others subscribe
//! to the leader's result and receive a clone of it, success or failure alike.
//!
//! ```text
//! active_airports(KJFK) ─┐
//!                        │
//! airport_traffic(KJFK) ─┼──► SingleFlight ──► one upstream request
//!                        │         │
//! detail panel (KJFK)   ─┘         ▼
//!                        [all three receive the same result]
//! ```
//!
//! The in-flight map is local to the process; two processes sharing a durable
//! cache may still fetch the same key once each.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// The leader for a key went away before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("in-flight request was abandoned before completing")]
pub struct FlightAbandoned;

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SingleFlightStats {
    /// Calls to `run`
    pub total_requests: u64,
    /// Calls that waited on an existing leader
    pub coalesced_requests: u64,
    /// Calls that did the work themselves
    pub leader_requests: u64,
}

/// Collapses concurrent calls for the same key into one execution.
pub struct SingleFlight<K, V> {
    in_flight: DashMap<K, broadcast::Sender<V>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    leader_requests: AtomicU64,
}

/// Removes the leader's entry if its future is dropped mid-flight, which closes
/// the channel and wakes every follower with an error.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    in_flight: &'a DashMap<K, broadcast::Sender<V>>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight.remove(&key);
        }
    }
}

enum Role<V> {
    Leader(broadcast::Sender<V>),
    Follower(broadcast::Receiver<V>),
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            leader_requests: AtomicU64::new(0),
        }
    }

    /// Runs `f` for `key` unless a run for `key` is already in flight, in which
    /// case waits for that run's result instead.
    ///
    /// `f` is only invoked by the leader.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> Result<V, FlightAbandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match self.register(&key) {
            Role::Follower(mut rx) => {
                debug!(key = ?key, "coalescing onto in-flight request");
                rx.recv().await.map_err(|_| FlightAbandoned)
            }
            Role::Leader(tx) => {
                let mut guard = LeaderGuard {
                    in_flight: &self.in_flight,
                    key: Some(key.clone()),
                };

                let value = f().await;

                // Unregister before broadcasting so late arrivals start a fresh run
                // instead of subscribing to a channel that has already fired.
                guard.key = None;
                self.in_flight.remove(&key);
                let waiters = tx.receiver_count();
                let _ = tx.send(value.clone());
                if waiters > 0 {
                    debug!(key = ?key, waiters, "broadcast result to coalesced waiters");
                }
                Ok(value)
            }
        }
    }

    fn register(&self, key: &K) -> Role<V> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                Role::Follower(entry.get().subscribe())
            }
            Entry::Vacant(entry) => {
                // One value is ever sent per channel
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                self.leader_requests.fetch_add(1, Ordering::Relaxed);
                Role::Leader(tx)
            }
        }
    }

    /// Returns a snapshot of the current statistics.
    pub fn stats(&self) -> SingleFlightStats {
        SingleFlightStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            leader_requests: self.leader_requests.load(Ordering::Relaxed),
        }
    }

    /// Returns the number of keys currently being fetched.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
