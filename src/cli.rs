//! Command-line interface parsing for fotcache
//!
//! This module defines the clap command tree and derives the [`RunConfig`]
//! the binary wires the cache with. Invalid settings are rejected here,
//! before any snapshot is read or any request is sent.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::Level;

use crate::cache::{FreshnessConfig, DEFAULT_MAX_AGE_HOURS};
use crate::data::fotmob::{MatchDate, DEFAULT_TIME_ZONE};
use crate::data::{EntityKind, TransferFilter};

/// Default upper bound for one upstream request, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The staleness window is negative or not a number
    #[error("Invalid --max-age-hours '{0}': expected a non-negative number of hours")]
    InvalidMaxAge(f64),

    /// Requests would time out immediately
    #[error("Invalid --timeout-secs: must be at least 1")]
    InvalidTimeout,

    /// An empty time zone would be sent upstream
    #[error("Invalid --time-zone: must not be empty")]
    InvalidTimeZone,
}

/// fotcache - football statistics with a local snapshot cache
#[derive(Parser, Debug)]
#[command(name = "fotcache")]
#[command(about = "Football statistics client with a local snapshot cache")]
#[command(version)]
pub struct Cli {
    /// Directory holding snapshots (defaults to the user cache directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Oldest snapshot, in hours, that is served without refetching
    #[arg(long, global = true, value_name = "HOURS", default_value_t = DEFAULT_MAX_AGE_HOURS, allow_negative_numbers = true)]
    pub max_age_hours: f64,

    /// Refetch even when a fresh snapshot exists (completed rounds excepted)
    #[arg(long, global = true)]
    pub force: bool,

    /// Upper bound for one upstream request
    #[arg(long, global = true, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Time zone for league and team fixtures
    #[arg(long, global = true, value_name = "TZ", default_value = DEFAULT_TIME_ZONE)]
    pub time_zone: String,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show a league overview
    League { id: String },

    /// Show a team overview
    Team { id: String },

    /// Show a player profile
    Player { id: String },

    /// Show match details
    Match { id: String },

    /// Show the team of the week of a league (current round by default)
    Totw {
        league: String,
        /// Round number
        round: Option<u32>,
    },

    /// List players picked for the team of the week across a season
    TotwAll {
        league: String,
        /// Only list players picked at least this many times
        #[arg(long, value_name = "N", default_value_t = 1)]
        min_apps: usize,
    },

    /// List a team's transfers (permanent incoming moves by default)
    Transfers {
        team: String,
        /// Which moves to list
        #[arg(long, value_enum, default_value_t = Direction::In)]
        direction: Direction,
        /// Include loan moves
        #[arg(long)]
        on_loan: bool,
        /// Include contract extensions
        #[arg(long)]
        contract_extension: bool,
    },

    /// Show a league's top players per statistic
    LeagueStats { league: String },

    /// Search for players
    Search { term: String },

    /// List matches played on a day
    ///
    /// Example: fotcache matches 20240817
    Matches {
        /// Day in YYYYMMDD form
        date: MatchDate,
    },

    /// Delete every stored snapshot of an entity
    ///
    /// Round ids have the form LEAGUE-STAGE-ROUND, e.g. 47-21045-3
    Clear { kind: EntityKind, id: String },

    /// Show how much is stored per entity kind
    Stats,
}

/// Transfer direction relative to the requested club
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

/// Builds the transfer filter for the `transfers` command
pub fn transfer_filter(direction: Direction, on_loan: bool, contract_extension: bool) -> TransferFilter {
    TransferFilter {
        incoming: direction != Direction::Out,
        outgoing: direction != Direction::In,
        include_loans: on_loan,
        include_extensions: contract_extension,
    }
}

/// Renders an error followed by each of its sources, one per line
pub fn error_report(err: &(dyn std::error::Error + 'static)) -> String {
    let mut report = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        report.push_str("\n  caused by: ");
        report.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    report
}

/// Configuration derived from CLI arguments for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Snapshot directory; `None` means the default location
    pub cache_dir: Option<PathBuf>,
    pub freshness: FreshnessConfig,
    pub timeout: Duration,
    pub time_zone: String,
    pub log_level: Level,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            freshness: FreshnessConfig::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            log_level: Level::WARN,
        }
    }
}

/// Maps the `-v` count to a log level
///
/// # Arguments
/// * `verbose` - Number of times `-v` was given
pub fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

impl RunConfig {
    /// Creates a RunConfig from parsed CLI arguments.
    ///
    /// # Arguments
    /// * `cli` - The parsed CLI struct
    ///
    /// # Returns
    /// * `Ok(RunConfig)` with validated settings
    /// * `Err(CliError)` if a flag holds an unusable value
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let freshness = FreshnessConfig::new(cli.max_age_hours, cli.force)
            .map_err(|_| CliError::InvalidMaxAge(cli.max_age_hours))?;
        if cli.timeout_secs == 0 {
            return Err(CliError::InvalidTimeout);
        }
        let time_zone = cli.time_zone.trim();
        if time_zone.is_empty() {
            return Err(CliError::InvalidTimeZone);
        }

        Ok(RunConfig {
            cache_dir: cli.cache_dir.clone(),
            freshness,
            timeout: Duration::from_secs(cli.timeout_secs),
            time_zone: time_zone.to_string(),
            log_level: log_level(cli.verbose),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["fotcache", "league", "47"]);
        assert_eq!(cli.command, Command::League { id: "47".to_string() });
        assert_eq!(cli.max_age_hours, DEFAULT_MAX_AGE_HOURS);
        assert!(!cli.force);
        assert_eq!(cli.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(cli.time_zone, DEFAULT_TIME_ZONE);
        assert!(cli.cache_dir.is_none());
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "fotcache", "player", "961995", "--force", "--max-age-hours", "12", "-vv",
        ]);
        assert!(cli.force);
        assert_eq!(cli.max_age_hours, 12.0);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_parse_totw_with_and_without_round() {
        let cli = Cli::parse_from(["fotcache", "totw", "47"]);
        assert_eq!(cli.command, Command::Totw { league: "47".to_string(), round: None });

        let cli = Cli::parse_from(["fotcache", "totw", "47", "3"]);
        assert_eq!(cli.command, Command::Totw { league: "47".to_string(), round: Some(3) });
    }

    #[test]
    fn test_cli_parse_totw_all_min_apps() {
        let cli = Cli::parse_from(["fotcache", "totw-all", "47", "--min-apps", "3"]);
        assert_eq!(cli.command, Command::TotwAll { league: "47".to_string(), min_apps: 3 });
    }

    #[test]
    fn test_cli_rejects_non_numeric_round() {
        assert!(Cli::try_parse_from(["fotcache", "totw", "47", "third"]).is_err());
    }

    #[test]
    fn test_cli_rejects_malformed_date() {
        assert!(Cli::try_parse_from(["fotcache", "matches", "2024-08-17"]).is_err());
        assert!(Cli::try_parse_from(["fotcache", "matches", "20240231"]).is_err());
        assert!(Cli::try_parse_from(["fotcache", "matches", "20240817"]).is_ok());
    }

    #[test]
    fn test_cli_parse_clear_kind() {
        let cli = Cli::parse_from(["fotcache", "clear", "totw", "47-21045-3"]);
        assert_eq!(
            cli.command,
            Command::Clear { kind: EntityKind::TotwRound, id: "47-21045-3".to_string() }
        );
        assert!(Cli::try_parse_from(["fotcache", "clear", "stadium", "1"]).is_err());
    }

    #[test]
    fn test_run_config_from_cli() {
        let cli = Cli::parse_from([
            "fotcache", "stats", "--cache-dir", "/tmp/snapshots", "--timeout-secs", "5",
        ]);
        let config = RunConfig::from_cli(&cli).unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/snapshots")));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.freshness.max_age_hours(), DEFAULT_MAX_AGE_HOURS);
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn test_run_config_rejects_negative_max_age() {
        let cli = Cli::parse_from(["fotcache", "stats", "--max-age-hours", "-1"]);
        let err = RunConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, CliError::InvalidMaxAge(_)));
        assert!(err.to_string().contains("max-age-hours"));
    }

    #[test]
    fn test_run_config_rejects_zero_timeout() {
        let cli = Cli::parse_from(["fotcache", "stats", "--timeout-secs", "0"]);
        assert!(matches!(RunConfig::from_cli(&cli), Err(CliError::InvalidTimeout)));
    }

    #[test]
    fn test_cli_parse_transfers_flags() {
        let cli = Cli::parse_from(["fotcache", "transfers", "8456"]);
        assert_eq!(
            cli.command,
            Command::Transfers {
                team: "8456".to_string(),
                direction: Direction::In,
                on_loan: false,
                contract_extension: false,
            }
        );

        let cli = Cli::parse_from([
            "fotcache", "transfers", "8456", "--direction", "both", "--on-loan",
        ]);
        let Command::Transfers { direction, on_loan, contract_extension, .. } = cli.command else {
            panic!("expected transfers command");
        };
        assert_eq!(
            transfer_filter(direction, on_loan, contract_extension),
            TransferFilter {
                incoming: true,
                outgoing: true,
                include_loans: true,
                include_extensions: false,
            }
        );
        assert!(Cli::try_parse_from(["fotcache", "transfers", "8456", "--direction", "sideways"]).is_err());
    }

    #[test]
    fn test_transfer_filter_out_only() {
        let filter = transfer_filter(Direction::Out, false, true);
        assert!(!filter.incoming);
        assert!(filter.outgoing);
        assert!(filter.include_extensions);
    }

    #[test]
    fn test_cli_parse_league_stats() {
        let cli = Cli::parse_from(["fotcache", "league-stats", "47"]);
        assert_eq!(cli.command, Command::LeagueStats { league: "47".to_string() });
    }

    #[test]
    fn test_error_report_walks_sources() {
        use crate::cache::CacheError;
        use crate::data::{EntityKey, FetchError};

        let err = CacheError::Fetch {
            key: EntityKey::player(961995),
            source: FetchError::Network("connection refused".to_string()),
        };
        assert_eq!(
            error_report(&err),
            "failed to fetch player:961995\n  caused by: network error: connection refused"
        );
        assert_eq!(error_report(&CliError::InvalidTimeout), CliError::InvalidTimeout.to_string());
    }

    #[test]
    fn test_log_level_by_verbosity() {
        assert_eq!(log_level(0), Level::WARN);
        assert_eq!(log_level(1), Level::INFO);
        assert_eq!(log_level(2), Level::DEBUG);
        assert_eq!(log_level(9), Level::TRACE);
    }
}
