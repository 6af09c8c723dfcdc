//! Short-term caching in front of a [`Fetcher`]
//!
//! Each entity kind gets its own bounded cache so a burst of identical
//! requests in one process reaches upstream only once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{EntityKind, FetchError, Fetcher, RequestSignature};
use crate::cache::ShortTermCache;
use crate::clock::Clock;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(60 * 60 * 24);

/// Capacity and lifetime of one short-term cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortTermSettings {
    pub capacity: usize,
    pub ttl: Duration,
}

impl ShortTermSettings {
    pub const fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }

    /// Defaults per entity kind
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::League => Self::new(50, DAY),
            EntityKind::Team => Self::new(200, DAY),
            EntityKind::Player => Self::new(1024, HOUR),
            EntityKind::Match => Self::new(1024, HOUR),
            EntityKind::TotwRound => Self::new(100, HOUR),
        }
    }

    /// Defaults for the matches-by-date listing
    pub fn matches_by_date() -> Self {
        Self::new(100, DAY)
    }

    /// Defaults for free-text search
    pub fn search() -> Self {
        Self::new(1024, HOUR)
    }
}

/// Wraps a fetcher with one [`ShortTermCache`] per entity kind
pub struct CachedFetcher<F> {
    inner: F,
    caches: HashMap<EntityKind, (ShortTermCache<RequestSignature, Value>, Duration)>,
}

impl<F: Fetcher> CachedFetcher<F> {
    /// Uses [`ShortTermSettings::for_kind`] for every kind
    pub fn new(inner: F, clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(inner, clock, ShortTermSettings::for_kind)
    }

    pub fn with_settings(
        inner: F,
        clock: Arc<dyn Clock>,
        settings: impl Fn(EntityKind) -> ShortTermSettings,
    ) -> Self {
        let caches = EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let ShortTermSettings { capacity, ttl } = settings(kind);
                (kind, (ShortTermCache::new(capacity, clock.clone()), ttl))
            })
            .collect();
        Self { inner, caches }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for CachedFetcher<F> {
    async fn fetch(&self, request: &RequestSignature) -> Result<Value, FetchError> {
        let Some((cache, ttl)) = self.caches.get(&request.kind()) else {
            return self.inner.fetch(request).await;
        };
        cache
            .get_or_try_compute(request.clone(), *ttl, || self.inner.fetch(request))
            .await
    }
}
