//! Team-of-the-week players
//!
//! Extracts the selected players from a round payload and aggregates
//! appearances across a season.

use std::collections::HashMap;

use serde::Serialize;

use crate::cache::{RoundSnapshot, View};

/// One player selected in a team of the week
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotwPlayer {
    pub name: String,
    pub participant_id: u64,
    pub rating: Option<f64>,
    /// Player of the match in the game that earned the selection
    pub motm: bool,
    pub goals: u32,
    pub assists: u32,
    pub round_number: u32,
}

impl TotwPlayer {
    /// Parses one entry of a round's `players` list
    ///
    /// Returns `None` when the entry has no name or participant id.
    pub fn from_view(round_number: u32, player: &View) -> Option<Self> {
        let count = |field: &str| {
            player
                .get(field)
                .and_then(View::as_lenient_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or_default()
        };
        let rating = player.get("rating").and_then(|rating| {
            rating
                .as_f64()
                .or_else(|| rating.as_str().and_then(|s| s.trim().parse().ok()))
        });
        let motm = player
            .get("motm")
            .map(|m| m.as_bool().unwrap_or(false) || m.as_u64() == Some(1))
            .unwrap_or(false);

        Some(Self {
            name: player.get("name").and_then(View::as_str)?.to_string(),
            participant_id: player.get("participantId").and_then(View::as_lenient_u64)?,
            rating,
            motm,
            goals: count("goals"),
            assists: count("assists"),
            round_number: player
                .get("roundNumber")
                .and_then(View::as_lenient_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(round_number),
        })
    }
}

/// The team of the week for one round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotwRound {
    pub round_id: u32,
    pub complete: bool,
    pub players: Vec<TotwPlayer>,
}

impl TotwRound {
    pub fn from_payload(round_id: u32, complete: bool, payload: &View) -> Self {
        let players = payload
            .get("players")
            .map(View::items)
            .unwrap_or_default()
            .iter()
            .filter_map(|player| TotwPlayer::from_view(round_id, player))
            .collect();
        Self {
            round_id,
            complete,
            players,
        }
    }

    pub fn from_snapshot(round: &RoundSnapshot) -> Self {
        Self::from_payload(round.round_id, round.is_complete(), round.payload())
    }

    /// Title line, e.g. `Premier League TOTW (Week 5)`
    pub fn header(&self, league_name: Option<&str>) -> String {
        let state = if self.complete { "" } else { ", in progress" };
        format!(
            "{} TOTW (Week {}{state})",
            league_name.unwrap_or("League"),
            self.round_id
        )
    }

    pub fn man_of_the_match(&self) -> impl Iterator<Item = &TotwPlayer> {
        self.players.iter().filter(|p| p.motm)
    }
}

/// All team-of-the-week selections of one player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appearances {
    pub participant_id: u64,
    pub name: String,
    pub selections: Vec<TotwPlayer>,
}

impl Appearances {
    pub fn count(&self) -> usize {
        self.selections.len()
    }

    pub fn motm_count(&self) -> usize {
        self.selections.iter().filter(|s| s.motm).count()
    }

    /// Mean rating over the selections that carry one
    pub fn average_rating(&self) -> Option<f64> {
        let ratings: Vec<f64> = self.selections.iter().filter_map(|s| s.rating).collect();
        if ratings.is_empty() {
            return None;
        }
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    }
}

/// Groups selections by player, keeping players picked at least `min_apps` times
///
/// Ordered by appearance count (descending), then by name.
pub fn appearances(rounds: &[TotwRound], min_apps: usize) -> Vec<Appearances> {
    let mut by_player: HashMap<u64, Appearances> = HashMap::new();
    for player in rounds.iter().flat_map(|round| &round.players) {
        by_player
            .entry(player.participant_id)
            .or_insert_with(|| Appearances {
                participant_id: player.participant_id,
                name: player.name.clone(),
                selections: Vec::new(),
            })
            .selections
            .push(player.clone());
    }

    let mut grouped: Vec<Appearances> = by_player
        .into_values()
        .filter(|a| a.count() >= min_apps)
        .collect();
    for entry in &mut grouped {
        entry.selections.sort_by_key(|s| s.round_number);
    }
    grouped.sort_by(|a, b| b.count().cmp(&a.count()).then_with(|| a.name.cmp(&b.name)));
    grouped
}
