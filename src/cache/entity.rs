//! Read-through, write-through cache of upstream entities
//!
//! [`EntityCache`] answers entity requests from the [`SnapshotStore`] while
//! the stored snapshot is fresh, otherwise fetches, persists and returns the
//! new payload. When the upstream source fails, a stale snapshot is served
//! instead of failing the caller.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::{CacheError, Result};
use super::freshness::{FreshnessConfig, FreshnessPolicy};
use super::store::{Snapshot, SnapshotStore};
use super::view::View;
use crate::clock::Clock;
use crate::data::{EntityKey, FetchError, Fetcher, RequestSignature};

/// Where the snapshot returned by a lookup came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fresh snapshot already in the store
    Stored,
    /// Fetched from upstream and written to the store
    Fetched,
    /// Upstream failed; an outdated snapshot was served instead
    Stale,
}

/// Result of an entity lookup
#[derive(Debug, Clone)]
pub struct Lookup {
    pub snapshot: Snapshot,
    pub origin: Origin,
}

/// Orchestrates snapshot reads, freshness checks and upstream fetches
pub struct EntityCache {
    store: Arc<SnapshotStore>,
    fetcher: Arc<dyn Fetcher>,
    policy: FreshnessPolicy,
    fetch_timeout: Option<Duration>,
}

impl EntityCache {
    pub fn new(store: Arc<SnapshotStore>, fetcher: Arc<dyn Fetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            fetcher,
            policy: FreshnessPolicy::new(clock),
            fetch_timeout: None,
        }
    }

    /// Bounds every upstream call; an elapsed timeout counts as a network error
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Returns the payload of the freshest usable snapshot for `key`
    pub async fn get(&self, key: &EntityKey, config: &FreshnessConfig) -> Result<View> {
        let lookup = self.lookup(&RequestSignature::from(key.clone()), config).await?;
        Ok(lookup.snapshot.payload)
    }

    /// Resolves a request to a snapshot, fetching when the stored one is stale
    ///
    /// Exactly one snapshot is written per successful fetch and none on a
    /// fresh hit or on fallback to a stale snapshot.
    pub async fn lookup(&self, request: &RequestSignature, config: &FreshnessConfig) -> Result<Lookup> {
        let key = &request.key;
        let stored = self.store.latest(key)?;

        if let Some(snapshot) = stored.as_ref() {
            if self.policy.is_fresh(Some(snapshot), config) {
                debug!(%key, created_at = %snapshot.created_at, "serving stored snapshot");
                return Ok(Lookup {
                    snapshot: snapshot.clone(),
                    origin: Origin::Stored,
                });
            }
        }

        match self.fetch(request).await {
            Ok(value) => {
                let payload = View::from(value);
                let snapshot = self.store.put(key, &payload)?;
                Ok(Lookup {
                    snapshot,
                    origin: Origin::Fetched,
                })
            }
            Err(source) => match stored {
                Some(snapshot) => {
                    warn!(
                        %key,
                        error = %source,
                        created_at = %snapshot.created_at,
                        "fetch failed, serving stale snapshot"
                    );
                    Ok(Lookup {
                        snapshot,
                        origin: Origin::Stale,
                    })
                }
                None => Err(CacheError::Fetch {
                    key: key.clone(),
                    source,
                }),
            },
        }
    }

    /// Calls the upstream fetcher, honoring the configured timeout
    pub async fn fetch(&self, request: &RequestSignature) -> std::result::Result<Value, FetchError> {
        info!(key = %request.key, "fetching from upstream");
        match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch(request))
                .await
                .unwrap_or_else(|_| {
                    Err(FetchError::Network(format!(
                        "request timed out after {}s",
                        limit.as_secs_f64()
                    )))
                }),
            None => self.fetcher.fetch(request).await,
        }
    }
}
