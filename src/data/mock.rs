//! Test doubles for the transport and cache seams

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{FetchError, HttpTransport, UpstreamRequest, UpstreamResponse};
use crate::cache::{CacheError, KvStore, MemoryStore};

enum Reply {
    Response(UpstreamResponse),
    NetworkError,
}

/// Transport answering from canned routes, matched by URL prefix
///
/// Every call yields once before answering so concurrent callers get a chance
/// to observe each other's in-flight requests.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<(String, Reply)>>,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers requests whose URL starts with `prefix`; later routes win
    pub fn respond(&self, prefix: &str, status: u16, body: &str) {
        self.routes.lock().unwrap().push((
            prefix.to_string(),
            Reply::Response(UpstreamResponse {
                status,
                body: body.to_string(),
            }),
        ));
    }

    pub fn fail(&self, prefix: &str) {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), Reply::NetworkError));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(
        &self,
        resource: &str,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;

        let routes = self.routes.lock().unwrap();
        match routes
            .iter()
            .rev()
            .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
        {
            Some((_, Reply::Response(response))) => Ok(response.clone()),
            Some((_, Reply::NetworkError)) => Err(FetchError::network(resource, "connection refused")),
            None => Ok(UpstreamResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

/// Memory store that counts every operation
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    sets: AtomicUsize,
    set_reads: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn set_reads(&self) -> usize {
        self.set_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
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
        self.set_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.set_members(set_key).await
    }
}
