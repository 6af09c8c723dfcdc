//! FotMob API client
//!
//! Routes entity requests to the public FotMob endpoints and decodes the JSON
//! responses. Search and matches-by-date lookups are not snapshotted; they are
//! only held in short-term caches.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::cached::ShortTermSettings;
use super::{EntityKind, FetchError, Fetcher, RequestSignature};
use crate::cache::ShortTermCache;
use crate::clock::{Clock, SystemClock};

/// Base URL for the FotMob data API
const FOTMOB_BASE_URL: &str = "https://www.fotmob.com/api";

/// Base URL for the FotMob search API
const SEARCH_BASE_URL: &str = "https://apigw.fotmob.com/searchapi";

/// Time zone used for league and team fixtures unless overridden
pub const DEFAULT_TIME_ZONE: &str = "America/Los_Angeles";

/// Longest upstream error body kept in [`FetchError::Upstream`]
const MAX_ERROR_BODY: usize = 512;

/// A match day in the `YYYYMMDD` form the matches endpoint expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchDate(NaiveDate);

impl MatchDate {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl FromStr for MatchDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed = s.len() == 8 && s.starts_with("20") && s.chars().all(|c| c.is_ascii_digit());
        let date = well_formed
            .then(|| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
            .flatten()
            .ok_or_else(|| format!("invalid date '{s}': expected YYYYMMDD, e.g. 20240817"))?;
        Ok(Self(date))
    }
}

impl fmt::Display for MatchDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

/// One entry of a player search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub id: String,
}

/// Extracts player suggestions from a search response
///
/// Suggestions come as `"Name|id"` strings under
/// `squadMemberSuggest[].options[].text`.
pub fn squad_member_hits(response: &Value) -> Vec<SearchHit> {
    response
        .get("squadMemberSuggest")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|suggest| suggest.get("options").and_then(Value::as_array))
        .flatten()
        .filter_map(|option| option.get("text").and_then(Value::as_str))
        .filter_map(|text| text.split_once('|'))
        .map(|(name, id)| SearchHit {
            name: name.trim().to_string(),
            id: id.trim().to_string(),
        })
        .collect()
}

/// Client for fetching data from the FotMob API
pub struct FotmobClient {
    client: Client,
    base_url: String,
    search_url: String,
    time_zone: String,
    matches: ShortTermCache<String, Value>,
    searches: ShortTermCache<String, Value>,
    matches_ttl: std::time::Duration,
    search_ttl: std::time::Duration,
}

impl Default for FotmobClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FotmobClient {
    /// Create a new FotmobClient with default settings
    pub fn new() -> Self {
        Self::with_client(Client::new(), Arc::new(SystemClock))
    }

    /// Create a new FotmobClient with a custom HTTP client and clock
    pub fn with_client(client: Client, clock: Arc<dyn Clock>) -> Self {
        let matches = ShortTermSettings::matches_by_date();
        let search = ShortTermSettings::search();
        Self {
            client,
            base_url: FOTMOB_BASE_URL.to_string(),
            search_url: SEARCH_BASE_URL.to_string(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            matches: ShortTermCache::new(matches.capacity, clock.clone()),
            searches: ShortTermCache::new(search.capacity, clock),
            matches_ttl: matches.ttl,
            search_ttl: search.ttl,
        }
    }

    /// Point the client at another server (both data and search routes)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.search_url = format!("{base_url}/searchapi");
        self.base_url = base_url;
        self
    }

    /// Use a custom time zone for league and team fixtures
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = time_zone.into();
        self
    }

    /// Lists all matches played on `date`
    pub async fn matches_on(&self, date: MatchDate) -> Result<Value, FetchError> {
        let date = date.to_string();
        let url = format!("{}/matches", self.base_url);
        self.matches
            .get_or_try_compute(date.clone(), self.matches_ttl, || {
                self.get_json(&url, vec![("date".to_string(), date)])
            })
            .await
    }

    /// Free-text search over players, teams and leagues
    pub async fn search(&self, term: &str) -> Result<Value, FetchError> {
        let term = term.trim().to_string();
        if term.is_empty() {
            return Err(FetchError::InvalidRequest("search term is empty".to_string()));
        }
        let url = format!("{}/suggest", self.search_url);
        self.searches
            .get_or_try_compute(term.to_lowercase(), self.search_ttl, || {
                self.get_json(&url, vec![("term".to_string(), term)])
            })
            .await
    }

    /// Maps an entity request to its endpoint and query parameters
    ///
    /// Parameters carried by the request override the route defaults.
    fn route(&self, request: &RequestSignature) -> Result<(String, Vec<(String, String)>), FetchError> {
        let id = request.id().to_string();
        let (url, defaults): (String, Vec<(&str, String)>) = match request.kind() {
            EntityKind::League => (
                format!("{}/leagues", self.base_url),
                vec![
                    ("id", id),
                    ("tab", "overview".to_string()),
                    ("type", "league".to_string()),
                    ("timeZone", self.time_zone.clone()),
                ],
            ),
            EntityKind::Team => (
                format!("{}/teams", self.base_url),
                vec![
                    ("id", id),
                    ("tab", "overview".to_string()),
                    ("type", "team".to_string()),
                    ("timeZone", self.time_zone.clone()),
                ],
            ),
            EntityKind::Player => (format!("{}/playerData", self.base_url), vec![("id", id)]),
            EntityKind::Match => (format!("{}/matchDetails", self.base_url), vec![("matchId", id)]),
            EntityKind::TotwRound => {
                let link = request.param("link").ok_or_else(|| {
                    FetchError::InvalidRequest(format!("{} has no link to follow", request.key))
                })?;
                return Ok((link.to_string(), Vec::new()));
            }
        };

        let mut query: Vec<(String, String)> = defaults
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        for (name, value) in &request.params {
            query.retain(|(existing, _)| existing != name);
            query.push((name.clone(), value.clone()));
        }
        Ok((url, query))
    }

    async fn get_json(&self, url: &str, query: Vec<(String, String)>) -> Result<Value, FetchError> {
        debug!(url, ?query, "GET");
        let response = self
            .client
            .get(url)
            .query(&query)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let mut body = text;
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
                body.truncate(cut);
            }
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = serde_json::from_str(&text)?;
        if value.is_null() {
            return Err(FetchError::Decode(format!("no JSON returned from {url}")));
        }
        Ok(value)
    }
}

#[async_trait]
impl Fetcher for FotmobClient {
    async fn fetch(&self, request: &RequestSignature) -> Result<Value, FetchError> {
        let (url, query) = self.route(request)?;
        self.get_json(&url, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EntityKey;
    use serde_json::json;

    fn query_value<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
        query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_league_route() {
        let client = FotmobClient::new();
        let (url, query) = client.route(&EntityKey::league(47).into()).unwrap();

        assert_eq!(url, "https://www.fotmob.com/api/leagues");
        assert_eq!(query_value(&query, "id"), Some("47"));
        assert_eq!(query_value(&query, "tab"), Some("overview"));
        assert_eq!(query_value(&query, "type"), Some("league"));
        assert_eq!(query_value(&query, "timeZone"), Some(DEFAULT_TIME_ZONE));
    }

    #[test]
    fn test_team_route_uses_configured_time_zone() {
        let client = FotmobClient::new().with_time_zone("Europe/London");
        let (url, query) = client.route(&EntityKey::team(8456).into()).unwrap();

        assert!(url.ends_with("/teams"));
        assert_eq!(query_value(&query, "type"), Some("team"));
        assert_eq!(query_value(&query, "timeZone"), Some("Europe/London"));
    }

    #[test]
    fn test_player_and_match_routes() {
        let client = FotmobClient::new().with_base_url("http://localhost:9000");
        let (url, query) = client.route(&EntityKey::player(961995).into()).unwrap();
        assert_eq!(url, "http://localhost:9000/playerData");
        assert_eq!(query, vec![("id".to_string(), "961995".to_string())]);

        let (url, query) = client.route(&EntityKey::match_details(4193490).into()).unwrap();
        assert_eq!(url, "http://localhost:9000/matchDetails");
        assert_eq!(query_value(&query, "matchId"), Some("4193490"));
    }

    #[test]
    fn test_request_params_override_defaults() {
        let client = FotmobClient::new();
        let request = RequestSignature::from(EntityKey::league(47)).with_param("tab", "matches");
        let (_, query) = client.route(&request).unwrap();

        assert_eq!(query_value(&query, "tab"), Some("matches"));
        assert_eq!(query.iter().filter(|(n, _)| n == "tab").count(), 1);
    }

    #[test]
    fn test_round_route_follows_link() {
        let client = FotmobClient::new();
        let request = RequestSignature::from(EntityKey::totw_round("47", "21045", 3))
            .with_param("link", "https://data.fotmob.com/totw/47/3.json");
        let (url, query) = client.route(&request).unwrap();

        assert_eq!(url, "https://data.fotmob.com/totw/47/3.json");
        assert!(query.is_empty());
    }

    #[test]
    fn test_round_route_without_link_is_invalid() {
        let client = FotmobClient::new();
        let err = client
            .route(&EntityKey::totw_round("47", "21045", 3).into())
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[test]
    fn test_match_date_parsing() {
        let date: MatchDate = "20240817".parse().unwrap();
        assert_eq!(date.to_string(), "20240817");

        for invalid in ["2024-08-17", "19990101", "20241301", "2024081", "abcdefgh"] {
            assert!(invalid.parse::<MatchDate>().is_err(), "{invalid} should be rejected");
        }
    }

    #[test]
    fn test_squad_member_hits() {
        let response = json!({
            "squadMemberSuggest": [{
                "options": [
                    {"text": "Cole Palmer|961995"},
                    {"text": "Palmer Jr|12"},
                    {"text": "malformed"}
                ]
            }]
        });

        let hits = squad_member_hits(&response);
        assert_eq!(
            hits,
            vec![
                SearchHit { name: "Cole Palmer".to_string(), id: "961995".to_string() },
                SearchHit { name: "Palmer Jr".to_string(), id: "12".to_string() },
            ]
        );
        assert!(squad_member_hits(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_empty_search_term_is_rejected_without_request() {
        let client = FotmobClient::new().with_base_url("http://127.0.0.1:9");
        let err = client.search("   ").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }
}
