//! Team-of-the-week round resolution
//!
//! Rounds move through three states per (league, round):
//! - unknown: nothing stored, metadata comes from the league's round index
//! - provisional: stored, but the round is still being played; snapshots
//!   age like any other entity
//! - complete: terminal; the stored snapshot is returned for every later
//!   request of that round number, regardless of age or forced refreshes
//!
//! Asking for the current round always re-reads the round index, since
//! which round is current changes over time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::try_join_all;
use reqwest::Url;
use tracing::{debug, warn};

use super::entity::{EntityCache, Lookup, Origin};
use super::error::{CacheError, Result};
use super::freshness::FreshnessConfig;
use super::store::Snapshot;
use super::view::View;
use crate::data::{EntityKey, EntityKind, RequestSignature, RoundInfo};

/// Location of the round index link inside a league payload
pub const ROUNDS_LINK_POINTER: &str = "/stats/seasonStatLinks/0/TotwRoundsLink";

/// All rounds of a league season, ordered by round number
#[derive(Debug, Clone, PartialEq)]
pub struct RoundIndex {
    rounds: Vec<RoundInfo>,
    current: u32,
    league_name: Option<String>,
}

impl RoundIndex {
    /// Parses `{"rounds": [{"roundId", "link", ...}], "last": {"roundId", ...}}`
    ///
    /// A round is complete when upstream flags it so, or when it comes before
    /// the `last` (in-progress) round.
    pub fn from_view(league_key: &EntityKey, view: &View) -> Result<Self> {
        let missing = |field: &str| CacheError::MissingField {
            key: league_key.clone(),
            field: field.to_string(),
        };

        let listed = view.get("rounds").ok_or_else(|| missing("rounds"))?.items();
        let mut parsed = Vec::with_capacity(listed.len());
        for round in listed {
            let round_id = round
                .get("roundId")
                .and_then(View::as_lenient_u64)
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| missing("rounds[].roundId"))?;
            let link = round
                .get("link")
                .and_then(View::as_str)
                .ok_or_else(|| missing("rounds[].link"))?
                .to_string();
            let flagged = ["isCompleted", "isFinished"]
                .iter()
                .any(|flag| round.get(flag).and_then(View::as_bool) == Some(true));
            parsed.push((round_id, stage_of(round, &link), link, flagged));
        }
        if parsed.is_empty() {
            return Err(missing("rounds"));
        }

        let current = match view.pointer("/last/roundId") {
            Some(last) => last
                .as_lenient_u64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| missing("last.roundId"))?,
            None => parsed.iter().map(|(id, ..)| *id).max().unwrap_or_default(),
        };

        let mut rounds: Vec<RoundInfo> = parsed
            .into_iter()
            .map(|(round_id, stage_id, link, flagged)| RoundInfo {
                stage_id,
                round_id,
                is_complete: flagged || round_id < current,
                link,
            })
            .collect();
        rounds.sort_by_key(|r| r.round_id);
        rounds.dedup_by_key(|r| r.round_id);

        Ok(Self {
            rounds,
            current,
            league_name: None,
        })
    }

    /// League display name, when the league payload carried one
    pub fn league_name(&self) -> Option<&str> {
        self.league_name.as_deref()
    }

    pub fn rounds(&self) -> &[RoundInfo] {
        &self.rounds
    }

    pub fn first(&self) -> u32 {
        self.rounds.first().map(|r| r.round_id).unwrap_or_default()
    }

    pub fn last(&self) -> u32 {
        self.rounds.last().map(|r| r.round_id).unwrap_or_default()
    }

    /// The in-progress round, or the newest listed one if upstream's `last`
    /// points outside the list
    pub fn current(&self) -> &RoundInfo {
        self.find(self.current)
            .or_else(|| self.rounds.last())
            .unwrap_or(&self.rounds[0])
    }

    pub fn find(&self, round_id: u32) -> Option<&RoundInfo> {
        self.rounds.iter().find(|r| r.round_id == round_id)
    }
}

/// Stage id from the round object, its link's query, or `"0"`
fn stage_of(round: &View, link: &str) -> String {
    if let Some(stage) = round.get("stageId") {
        if let Some(s) = stage.as_str() {
            return s.to_string();
        }
        if let Some(n) = stage.as_u64() {
            return n.to_string();
        }
    }
    Url::parse(link)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(name, _)| name == "stageId")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_else(|| "0".to_string())
}

/// A resolved team-of-the-week round
#[derive(Debug, Clone)]
pub struct RoundSnapshot {
    pub round_id: u32,
    pub stage_id: String,
    pub snapshot: Snapshot,
    pub origin: Origin,
}

impl RoundSnapshot {
    pub fn is_complete(&self) -> bool {
        self.snapshot.complete
    }

    pub fn payload(&self) -> &View {
        &self.snapshot.payload
    }
}

/// Read-through cache for round-indexed league data
///
/// The last round index read per league is kept in memory. Completed rounds
/// never move between stages, so it is enough to locate them later without
/// another index request.
pub struct RoundResolver {
    cache: Arc<EntityCache>,
    indexes: Mutex<HashMap<String, RoundIndex>>,
}

impl RoundResolver {
    pub fn new(cache: Arc<EntityCache>) -> Self {
        Self {
            cache,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// The round index most recently read for `league_id`, if any
    pub fn known_index(&self, league_id: &str) -> Option<RoundIndex> {
        self.lock_indexes().get(league_id).cloned()
    }

    /// Resolves one round, or the current round when `round` is `None`
    ///
    /// Fails with [`CacheError::RoundNotFound`] when the round number is not
    /// in the league's round index.
    pub async fn resolve(
        &self,
        league_id: &str,
        round: Option<u32>,
        config: &FreshnessConfig,
    ) -> Result<RoundSnapshot> {
        check_league_id(league_id)?;

        if let Some(round_id) = round {
            if let Some(snapshot) = self.known_complete(league_id, round_id)? {
                debug!(league_id, round_id, "serving completed round");
                return Ok(terminal(snapshot));
            }
        }

        let index = self.round_index(league_id, config).await?;
        let info = match round {
            Some(round_id) => index.find(round_id).ok_or(CacheError::RoundNotFound {
                requested: round_id,
                first: index.first(),
                last: index.last(),
            })?,
            None => index.current(),
        };
        self.resolve_round(league_id, info, config).await
    }

    /// Resolves every round listed in the league's round index, concurrently
    pub async fn resolve_all(&self, league_id: &str, config: &FreshnessConfig) -> Result<Vec<RoundSnapshot>> {
        check_league_id(league_id)?;
        let index = self.round_index(league_id, config).await?;
        try_join_all(
            index
                .rounds()
                .iter()
                .map(|info| self.resolve_round(league_id, info, config)),
        )
        .await
    }

    /// Reads the league's round index from upstream
    ///
    /// The index link comes from the (cached) league snapshot; the index
    /// itself is never snapshotted.
    pub async fn round_index(&self, league_id: &str, config: &FreshnessConfig) -> Result<RoundIndex> {
        let league_key = EntityKey::league(league_id);
        let league = self.cache.get(&league_key, config).await?;
        let link = league
            .pointer(ROUNDS_LINK_POINTER)
            .and_then(View::as_str)
            .ok_or_else(|| CacheError::MissingField {
                key: league_key.clone(),
                field: ROUNDS_LINK_POINTER.to_string(),
            })?;

        let index_key = EntityKey::new(EntityKind::TotwRound, league_id);
        let request = RequestSignature::new(index_key.clone()).with_param("link", link);
        let value = self
            .cache
            .fetch(&request)
            .await
            .map_err(|source| CacheError::Fetch {
                key: index_key,
                source,
            })?;
        let mut index = RoundIndex::from_view(&league_key, &View::from(value))?;
        index.league_name = league
            .pointer("/details/name")
            .and_then(View::as_str)
            .map(str::to_string);

        self.lock_indexes()
            .insert(league_id.to_string(), index.clone());
        Ok(index)
    }

    async fn resolve_round(
        &self,
        league_id: &str,
        info: &RoundInfo,
        config: &FreshnessConfig,
    ) -> Result<RoundSnapshot> {
        let key = EntityKey::totw_round(league_id, &info.stage_id, info.round_id);
        let request = RequestSignature::new(key.clone()).with_param("link", info.link.as_str());

        if !info.is_complete {
            let Lookup { snapshot, origin } = self.cache.lookup(&request, config).await?;
            return Ok(RoundSnapshot {
                round_id: info.round_id,
                stage_id: info.stage_id.clone(),
                snapshot,
                origin,
            });
        }

        let store = self.cache.store();
        if let Some(snapshot) = store.latest_complete(&key)? {
            return Ok(terminal(snapshot));
        }

        // First time the round is seen as complete: persist its final state
        match self.cache.fetch(&request).await {
            Ok(value) => {
                let snapshot = store.put_complete_round(&key, &View::from(value))?;
                Ok(RoundSnapshot {
                    round_id: info.round_id,
                    stage_id: info.stage_id.clone(),
                    snapshot,
                    origin: Origin::Fetched,
                })
            }
            Err(source) => match store.latest(&key)? {
                Some(snapshot) => {
                    warn!(%key, error = %source, "fetch failed, serving provisional round");
                    Ok(RoundSnapshot {
                        round_id: info.round_id,
                        stage_id: info.stage_id.clone(),
                        snapshot,
                        origin: Origin::Stale,
                    })
                }
                None => Err(CacheError::Fetch { key, source }),
            },
        }
    }

    /// Stored terminal snapshot of a round a known index lists as complete
    ///
    /// The stage comes from that index, so a same-numbered round of another
    /// season is never served.
    fn known_complete(&self, league_id: &str, round_id: u32) -> Result<Option<Snapshot>> {
        let key = {
            let indexes = self.lock_indexes();
            let Some(info) = indexes
                .get(league_id)
                .and_then(|index| index.find(round_id))
                .filter(|info| info.is_complete)
            else {
                return Ok(None);
            };
            EntityKey::totw_round(league_id, &info.stage_id, round_id)
        };
        self.cache.store().latest_complete(&key)
    }

    fn lock_indexes(&self) -> MutexGuard<'_, HashMap<String, RoundIndex>> {
        self.indexes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn terminal(snapshot: Snapshot) -> RoundSnapshot {
    let (round_id, stage_id) = snapshot
        .key
        .round_parts()
        .map(|(_, stage, round)| (round, stage.to_string()))
        .unwrap_or_default();
    RoundSnapshot {
        round_id,
        stage_id,
        snapshot,
        origin: Origin::Stored,
    }
}

/// Round keys are `{league}-{stage}-{round}`, so the league id cannot hold a dash
fn check_league_id(league_id: &str) -> Result<()> {
    if league_id.is_empty() || league_id.contains('-') {
        return Err(CacheError::InvalidKey(format!(
            "league id '{league_id}' must be non-empty and contain no '-'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::SnapshotStore;
    use crate::clock::ManualClock;
    use crate::data::FetchError;
    use crate::test_support::FakeFetcher;
    use chrono::Duration as TimeDelta;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const INDEX_LINK: &str = "https://data.test/totw/rounds?leagueId=47&season=2024";

    fn round_link(round: u32) -> String {
        format!("https://data.test/totw?leagueId=47&stageId=21045&roundId={round}")
    }

    fn round_index(last: u32) -> Value {
        let rounds: Vec<Value> = (1..=last)
            .map(|round| json!({"roundId": round.to_string(), "link": round_link(round)}))
            .collect();
        json!({
            "rounds": rounds,
            "last": {"roundId": last.to_string(), "link": round_link(last)}
        })
    }

    fn round_payload(round: u32, version: &str) -> Value {
        json!({"players": [{"name": format!("Player {round}"), "rating": 8.1, "version": version}]})
    }

    struct Fixture {
        resolver: RoundResolver,
        cache: Arc<EntityCache>,
        fetcher: Arc<FakeFetcher>,
        clock: Arc<ManualClock>,
        temp_dir: TempDir,
    }

    fn fixture(last_round: u32) -> Fixture {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
        let store = Arc::new(SnapshotStore::open(temp_dir.path(), clock.clone()).unwrap());
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.respond(
            &EntityKey::league(47),
            json!({"details": {"name": "Premier League"},
                   "stats": {"seasonStatLinks": [{"TotwRoundsLink": INDEX_LINK}]}}),
        );
        fetcher.respond_link(INDEX_LINK, round_index(last_round));
        for round in 1..=last_round {
            fetcher.respond_link(&round_link(round), round_payload(round, "v1"));
        }
        let cache = Arc::new(EntityCache::new(store, fetcher.clone(), clock.clone()));
        Fixture {
            resolver: RoundResolver::new(cache.clone()),
            cache,
            fetcher,
            clock,
            temp_dir,
        }
    }

    fn round_fetches(fetcher: &FakeFetcher) -> usize {
        fetcher
            .calls()
            .iter()
            .filter(|c| c.key.round_parts().is_some())
            .count()
    }

    #[test]
    fn test_index_marks_rounds_before_last_complete() {
        let key = EntityKey::league(47);
        let index = RoundIndex::from_view(&key, &View::from(round_index(5))).unwrap();

        assert_eq!(index.first(), 1);
        assert_eq!(index.last(), 5);
        assert_eq!(index.current().round_id, 5);
        assert!(!index.current().is_complete);
        assert!(index.rounds()[..4].iter().all(|r| r.is_complete));
        assert_eq!(index.find(3).unwrap().stage_id, "21045");
    }

    #[test]
    fn test_index_honors_explicit_completion_flag() {
        let key = EntityKey::league(47);
        let view = View::from(json!({
            "rounds": [{"roundId": 38, "link": "https://data.test/r38", "stageId": 9, "isCompleted": true}],
            "last": {"roundId": 38}
        }));
        let index = RoundIndex::from_view(&key, &view).unwrap();
        let round = index.find(38).unwrap();
        assert!(round.is_complete);
        assert_eq!(round.stage_id, "9");
    }

    #[test]
    fn test_index_without_stage_defaults_to_zero() {
        let key = EntityKey::league(47);
        let view = View::from(json!({"rounds": [{"roundId": 1, "link": "not a url"}]}));
        let index = RoundIndex::from_view(&key, &view).unwrap();
        assert_eq!(index.find(1).unwrap().stage_id, "0");
        assert!(!index.find(1).unwrap().is_complete);
    }

    #[test]
    fn test_index_rejects_empty_or_malformed_lists() {
        let key = EntityKey::league(47);
        for payload in [json!({}), json!({"rounds": []}), json!({"rounds": [{"link": "x"}]})] {
            let err = RoundIndex::from_view(&key, &View::from(payload)).unwrap_err();
            assert!(matches!(err, CacheError::MissingField { .. }));
        }
    }

    #[tokio::test]
    async fn test_current_round_is_fetched_provisionally() {
        let f = fixture(5);
        let round = f
            .resolver
            .resolve("47", None, &FreshnessConfig::default())
            .await
            .unwrap();

        assert_eq!(round.round_id, 5);
        assert!(!round.is_complete());
        assert_eq!(round.origin, Origin::Fetched);
    }

    #[tokio::test]
    async fn test_completed_round_served_without_any_fetch() {
        let f = fixture(5);
        let config = FreshnessConfig::default();
        let first = f.resolver.resolve("47", Some(3), &config).await.unwrap();
        assert!(first.is_complete());
        let calls_after_first = f.fetcher.call_count();

        f.resolver.resolve("47", Some(5), &config).await.unwrap();
        let calls_after_current = f.fetcher.call_count();
        assert!(calls_after_current > calls_after_first);

        f.clock.advance(TimeDelta::days(400));
        f.fetcher.respond_link(&round_link(3), round_payload(3, "v2"));
        let again = f.resolver.resolve("47", Some(3), &config.forced()).await.unwrap();

        assert_eq!(f.fetcher.call_count(), calls_after_current, "no fetch for a completed round");
        assert_eq!(again.origin, Origin::Stored);
        assert_eq!(again.round_id, 3);
        assert_eq!(again.payload(), first.payload());
    }

    #[tokio::test]
    async fn test_provisional_round_refreshes_after_expiry() {
        let f = fixture(5);
        let config = FreshnessConfig::new(24.0, false).unwrap();
        f.resolver.resolve("47", Some(5), &config).await.unwrap();

        f.clock.advance(TimeDelta::hours(1));
        let cached = f.resolver.resolve("47", Some(5), &config).await.unwrap();
        assert_eq!(cached.origin, Origin::Stored);
        assert_eq!(round_fetches(&f.fetcher), 1);

        f.clock.advance(TimeDelta::hours(30));
        f.fetcher.respond_link(&round_link(5), round_payload(5, "v2"));
        let refreshed = f.resolver.resolve("47", Some(5), &config).await.unwrap();
        assert_eq!(refreshed.origin, Origin::Fetched);
        assert_eq!(round_fetches(&f.fetcher), 2);
        assert_eq!(
            refreshed.payload().pointer("/players/0/version").and_then(View::as_str),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_provisional_round_becomes_complete() {
        let f = fixture(5);
        let config = FreshnessConfig::default();
        let provisional = f.resolver.resolve("47", Some(5), &config).await.unwrap();
        assert!(!provisional.is_complete());

        // Round 6 starts, so round 5 is now final
        f.fetcher.respond_link(INDEX_LINK, round_index(6));
        f.fetcher.respond_link(&round_link(5), round_payload(5, "final"));
        f.fetcher.respond_link(&round_link(6), round_payload(6, "v1"));

        let complete = f.resolver.resolve("47", Some(5), &config).await.unwrap();
        assert!(complete.is_complete());
        assert_eq!(
            complete.payload().pointer("/players/0/version").and_then(View::as_str),
            Some("final")
        );

        let key = EntityKey::totw_round("47", "21045", 5);
        assert!(f.cache.store().latest(&key).unwrap().unwrap().complete);
    }

    #[tokio::test]
    async fn test_unknown_round_reports_valid_range() {
        let f = fixture(5);
        let err = f
            .resolver
            .resolve("47", Some(9), &FreshnessConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::RoundNotFound {
                requested: 9,
                first: 1,
                last: 5
            }
        ));
        assert!(err.to_string().contains("1-5"));
    }

    #[tokio::test]
    async fn test_league_without_rounds_link() {
        let f = fixture(5);
        f.fetcher.respond(&EntityKey::league(48), json!({"details": {"name": "No stats"}}));
        let err = f
            .resolver
            .resolve("48", None, &FreshnessConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::MissingField { .. }));
    }

    #[tokio::test]
    async fn test_index_fetch_failure_propagates() {
        let f = fixture(5);
        // Cache the league, then lose the network
        f.cache
            .get(&EntityKey::league(47), &FreshnessConfig::default())
            .await
            .unwrap();
        f.fetcher.set_offline(true);

        let err = f
            .resolver
            .resolve("47", None, &FreshnessConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Fetch {
                source: FetchError::Network(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resolve_all_rounds() {
        let f = fixture(4);
        let rounds = f
            .resolver
            .resolve_all("47", &FreshnessConfig::default())
            .await
            .unwrap();

        let ids: Vec<u32> = rounds.iter().map(|r| r.round_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(rounds.iter().filter(|r| r.is_complete()).count(), 3);
        assert_eq!(f.cache.store().list_by_prefix("totw", "47-").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_same_round_number_of_another_stage_is_not_served() {
        let f = fixture(5);
        let last_season = EntityKey::totw_round("47", "20000", 3);
        f.cache
            .store()
            .put_complete_round(&last_season, &View::from(json!({"season": "2023/24"})))
            .unwrap();

        let round = f
            .resolver
            .resolve("47", Some(3), &FreshnessConfig::default())
            .await
            .unwrap();

        assert_eq!(round.stage_id, "21045");
        assert_eq!(round.origin, Origin::Fetched);
        assert_eq!(
            round.payload().pointer("/players/0/version").and_then(View::as_str),
            Some("v1")
        );
        assert!(f.cache.store().latest_complete(&last_season).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_sibling_round_does_not_hide_completed_round() {
        let f = fixture(5);
        let config = FreshnessConfig::default();
        let first = f.resolver.resolve("47", Some(3), &config).await.unwrap();
        std::fs::write(
            f.temp_dir.path().join("totw_47-21045-5_1700000000.json"),
            "{not json",
        )
        .unwrap();

        let store = Arc::new(SnapshotStore::open(f.temp_dir.path(), f.clock.clone()).unwrap());
        let cache = Arc::new(EntityCache::new(store, f.fetcher.clone(), f.clock.clone()));
        let resolver = RoundResolver::new(cache);
        let again = resolver.resolve("47", Some(3), &config).await.unwrap();

        assert_eq!(again.origin, Origin::Stored);
        assert_eq!(again.payload(), first.payload());
    }

    #[tokio::test]
    async fn test_known_index_carries_league_name() {
        let f = fixture(2);
        assert!(f.resolver.known_index("47").is_none());
        f.resolver
            .resolve("47", None, &FreshnessConfig::default())
            .await
            .unwrap();

        let index = f.resolver.known_index("47").unwrap();
        assert_eq!(index.league_name(), Some("Premier League"));
        assert_eq!(index.last(), 2);
    }

    #[tokio::test]
    async fn test_dashed_league_id_is_rejected() {
        let f = fixture(1);
        let err = f
            .resolver
            .resolve("4-7", None, &FreshnessConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey(_)));
    }
}
