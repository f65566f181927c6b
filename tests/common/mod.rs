//! Shared test doubles for integration tests
//!
//! Only the public seams are used: `HttpTransport` for upstream calls and
//! `KvStore` for the cache.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use flightwatch::cache::{CacheError, KvStore, MemoryStore};
use flightwatch::data::{FetchError, HttpTransport, UpstreamRequest, UpstreamResponse};

enum Route {
    Reply(u16, String),
    Unreachable,
}

/// Upstream stand-in answering by URL prefix; unknown URLs get a 404
#[derive(Default)]
pub struct StubUpstream {
    routes: Mutex<Vec<(String, Route)>>,
    seen: Mutex<Vec<String>>,
}

impl StubUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, prefix: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), Route::Reply(status, body.to_string())));
    }

    pub fn unreachable(&self, prefix: &str) {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), Route::Unreachable));
    }

    /// Number of requests whose URL starts with `prefix`
    pub fn hits(&self, prefix: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.starts_with(prefix))
            .count()
    }

    pub fn total_hits(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for StubUpstream {
    async fn send(
        &self,
        resource: &str,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, FetchError> {
        self.seen.lock().unwrap().push(request.url.clone());
        // Let concurrent callers reach the gateway before this one answers
        tokio::task::yield_now().await;

        let routes = self.routes.lock().unwrap();
        let route = routes
            .iter()
            .rev()
            .find(|(prefix, _)| request.url.starts_with(prefix.as_str()));
        match route {
            Some((_, Route::Reply(status, body))) => Ok(UpstreamResponse {
                status: *status,
                body: body.clone(),
            }),
            Some((_, Route::Unreachable)) => Err(FetchError::Network {
                resource: resource.to_string(),
                message: "connection reset".to_string(),
            }),
            None => Ok(UpstreamResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

/// Memory store that counts value reads and writes
#[derive(Default)]
pub struct TallyStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl TallyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for TallyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove(key).await
    }

    async fn add_to_set(
        &self,
        set_key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.inner.add_to_set(set_key, member, ttl).await
    }

    async fn set_members(&self, set_key: &str) -> Result<HashSet<String>, CacheError> {
        self.inner.set_members(set_key).await
    }
}

pub fn airport_json(icao: &str, name: &str, latitude: f64, longitude: f64) -> String {
    serde_json::json!({
        "icao_code": icao,
        "name": name,
        "latitude_deg": latitude,
        "longitude_deg": longitude,
        "elevation_ft": "13",
        "iso_country": "US",
        "type": "large_airport"
    })
    .to_string()
}

pub fn pilot_json(callsign: &str, groundspeed: i32, altitude: i32, route: Option<(&str, &str)>) -> serde_json::Value {
    let flight_plan = route.map(|(departure, arrival)| {
        serde_json::json!({
            "flight_rules": "I",
            "aircraft_short": "A320",
            "departure": departure,
            "arrival": arrival,
            "route": "DCT"
        })
    });
    serde_json::json!({
        "cid": 1234567,
        "callsign": callsign,
        "latitude": 41.0,
        "longitude": -73.0,
        "altitude": altitude,
        "groundspeed": groundspeed,
        "heading": 60,
        "flight_plan": flight_plan
    })
}

pub fn feed_json(pilots: Vec<serde_json::Value>) -> String {
    serde_json::json!({
        "general": { "update_timestamp": "2026-10-17T12:00:00Z" },
        "pilots": pilots
    })
    .to_string()
}
