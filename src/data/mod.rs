//! Core data models for the football statistics client
//!
//! This module contains the identities used to address upstream resources
//! (leagues, teams, players, matches and team-of-the-week rounds), the
//! [`Fetcher`] seam the caches pull data through, the API clients, and the
//! extraction of team-of-the-week, transfer and leaderboard data.

pub mod cached;
pub mod fotmob;
pub mod league_stats;
pub mod totw;
pub mod transfers;

pub use cached::{CachedFetcher, ShortTermSettings};
pub use fotmob::FotmobClient;
pub use league_stats::{LeagueStat, StatLeader};
pub use totw::{TotwPlayer, TotwRound};
pub use transfers::{ClubTransfers, Transfer, TransferFilter};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kinds of upstream resources that can be snapshotted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    League,
    Team,
    Player,
    Match,
    TotwRound,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::League,
        EntityKind::Team,
        EntityKind::Player,
        EntityKind::Match,
        EntityKind::TotwRound,
    ];

    /// Short name used in snapshot file names and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::League => "league",
            EntityKind::Team => "team",
            EntityKind::Player => "player",
            EntityKind::Match => "match",
            EntityKind::TotwRound => "totw",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                format!("unknown entity kind '{s}' (expected league, team, player, match or totw)")
            })
    }
}

/// Identity of one logical upstream resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    kind: EntityKind,
    id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    pub fn league(id: impl ToString) -> Self {
        Self::new(EntityKind::League, id)
    }

    pub fn team(id: impl ToString) -> Self {
        Self::new(EntityKind::Team, id)
    }

    pub fn player(id: impl ToString) -> Self {
        Self::new(EntityKind::Player, id)
    }

    pub fn match_details(id: impl ToString) -> Self {
        Self::new(EntityKind::Match, id)
    }

    /// Key of one team-of-the-week round: `{league}-{stage}-{round}`
    pub fn totw_round(league_id: &str, stage_id: &str, round_id: u32) -> Self {
        Self::new(
            EntityKind::TotwRound,
            format!("{league_id}-{stage_id}-{round_id}"),
        )
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Splits a round key back into `(league, stage, round)`
    ///
    /// League ids never contain `-`, so the league is everything before the
    /// first dash and the round number everything after the last one.
    pub fn round_parts(&self) -> Option<(&str, &str, u32)> {
        if self.kind != EntityKind::TotwRound {
            return None;
        }
        let (league, rest) = self.id.split_once('-')?;
        let (stage, round) = rest.rsplit_once('-')?;
        Some((league, stage, round.parse().ok()?))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A request to the upstream API: entity identity plus query parameters
///
/// Parameters are kept in a sorted map so that two requests with the same
/// parameters hash identically regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature {
    pub key: EntityKey,
    pub params: BTreeMap<String, String>,
}

impl RequestSignature {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.key.kind()
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

impl From<EntityKey> for RequestSignature {
    fn from(key: EntityKey) -> Self {
        Self::new(key)
    }
}

/// Metadata of one team-of-the-week round as listed in a league's round index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub stage_id: String,
    pub round_id: u32,
    /// Historically final: the stored data never needs refreshing
    pub is_complete: bool,
    pub link: String,
}

/// Errors the upstream data source can produce
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connectivity problem or timeout
    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered with a non-success status
    #[error("upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Response body was not usable JSON
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built (missing link, unknown route)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Source of raw, decoded JSON for an entity request
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &RequestSignature) -> Result<Value, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, request: &RequestSignature) -> Result<Value, FetchError> {
        (**self).fetch(request).await
    }
}
