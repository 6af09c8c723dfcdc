//! Staleness rules for stored snapshots

use std::sync::Arc;

use chrono::Duration;

use super::error::{CacheError, Result};
use super::store::Snapshot;
use crate::clock::Clock;

/// Default maximum snapshot age: one week
pub const DEFAULT_MAX_AGE_HOURS: f64 = 168.0;

/// Per-call freshness requirements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessConfig {
    max_age_hours: f64,
    force: bool,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            force: false,
        }
    }
}

impl FreshnessConfig {
    /// Fails with [`CacheError::Config`] unless `max_age_hours` is a
    /// finite, non-negative number
    pub fn new(max_age_hours: f64, force: bool) -> Result<Self> {
        if !max_age_hours.is_finite() || max_age_hours < 0.0 {
            return Err(CacheError::Config(format!(
                "max age must be a non-negative number of hours, got {max_age_hours}"
            )));
        }
        Ok(Self {
            max_age_hours,
            force,
        })
    }

    /// Same limits, but every snapshot is treated as stale
    pub fn forced(self) -> Self {
        Self {
            force: true,
            ..self
        }
    }

    pub fn max_age_hours(&self) -> f64 {
        self.max_age_hours
    }

    pub fn force(&self) -> bool {
        self.force
    }
}

/// Decides whether a stored snapshot may be served without refetching
#[derive(Clone)]
pub struct FreshnessPolicy {
    clock: Arc<dyn Clock>,
}

impl FreshnessPolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Returns `true` if `snapshot` can be used as is
    ///
    /// Completed rounds are always fresh, even when a refresh is forced:
    /// their upstream data is final.
    pub fn is_fresh(&self, snapshot: Option<&Snapshot>, config: &FreshnessConfig) -> bool {
        let Some(snapshot) = snapshot else {
            return false;
        };
        if snapshot.complete {
            return true;
        }
        if config.force {
            return false;
        }
        age_hours(snapshot.age(self.clock.now())) <= config.max_age_hours
    }
}

fn age_hours(age: Duration) -> f64 {
    age.num_milliseconds() as f64 / 3_600_000.0
}
