//! Snapshot cache for upstream football data
//!
//! Two tiers sit between callers and the upstream API:
//! - [`ShortTermCache`]: bounded in-memory TTL cache in front of the fetcher
//! - [`SnapshotStore`]: timestamped JSON snapshots on disk, judged by
//!   [`FreshnessPolicy`]
//!
//! [`EntityCache`] ties them together; [`RoundResolver`] adds the
//! complete/provisional lifecycle of team-of-the-week rounds.

mod entity;
mod error;
mod freshness;
mod rounds;
mod short_term;
mod store;
mod view;

pub use entity::{EntityCache, Lookup, Origin};
pub use error::{CacheError, Result};
pub use freshness::{FreshnessConfig, FreshnessPolicy, DEFAULT_MAX_AGE_HOURS};
pub use rounds::{RoundIndex, RoundResolver, RoundSnapshot, ROUNDS_LINK_POINTER};
pub use short_term::ShortTermCache;
pub use store::{KindUsage, Snapshot, SnapshotStore, StoreStats};
pub use view::{freeze, thaw, View};
