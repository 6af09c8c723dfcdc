//! In-memory fetcher used by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::data::{EntityKey, FetchError, Fetcher, RequestSignature};

/// Answers requests from registered payloads
///
/// Requests carrying a `link` parameter are answered by link, everything
/// else by entity key. Unknown requests get an HTTP 404.
#[derive(Default)]
pub struct FakeFetcher {
    by_key: Mutex<HashMap<EntityKey, Value>>,
    by_link: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<RequestSignature>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: &EntityKey, value: Value) {
        self.by_key.lock().unwrap().insert(key.clone(), value);
    }

    pub fn respond_link(&self, link: &str, value: Value) {
        self.by_link.lock().unwrap().insert(link.to_string(), value);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RequestSignature> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &RequestSignature) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".to_string()));
        }

        let found = match request.param("link") {
            Some(link) => self.by_link.lock().unwrap().get(link).cloned(),
            None => self.by_key.lock().unwrap().get(&request.key).cloned(),
        };
        found.ok_or_else(|| FetchError::Upstream {
            status: 404,
            body: format!("no such resource: {}", request.key),
        })
    }
}
