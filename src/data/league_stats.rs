//! League player leaderboards
//!
//! A league payload lists, per metric, the three best players under
//! `stats.players[].topThree`.

use std::fmt;

use serde::Serialize;

use crate::cache::View;

const BANNER: &str = "================================================";

/// One leaderboard entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatLeader {
    pub player: String,
    pub team: String,
    pub value: String,
}

/// Top players of a league for one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeagueStat {
    pub metric: String,
    pub leaders: Vec<StatLeader>,
}

fn value_text(value: &View) -> String {
    if let Some(s) = value.as_str() {
        return s.to_string();
    }
    if let Some(n) = value.as_i64() {
        return n.to_string();
    }
    match value.as_f64() {
        Some(n) => n.to_string(),
        None => String::new(),
    }
}

impl LeagueStat {
    fn from_view(stat: &View) -> Option<Self> {
        let metric = stat.get("header").and_then(View::as_str)?.to_string();
        let leaders = stat
            .get("topThree")
            .map(View::items)
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| {
                Some(StatLeader {
                    player: entry.get("name").and_then(View::as_str)?.to_string(),
                    team: entry
                        .get("teamName")
                        .and_then(View::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    value: entry.get("value").map(value_text).unwrap_or_default(),
                })
            })
            .collect();
        Some(Self { metric, leaders })
    }
}

impl fmt::Display for LeagueStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{BANNER}")?;
        writeln!(f, "{}", self.metric)?;
        writeln!(f)?;
        for leader in &self.leaders {
            writeln!(f, "{} ({}) - {}", leader.player, leader.team, leader.value)?;
        }
        write!(f, "{BANNER}")
    }
}

/// Leaderboards of a league payload, in upstream order
pub fn player_stats(league: &View) -> Vec<LeagueStat> {
    league
        .pointer("/stats/players")
        .map(View::items)
        .unwrap_or_default()
        .iter()
        .filter_map(LeagueStat::from_view)
        .collect()
}
