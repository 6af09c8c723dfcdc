//! fotcache - football statistics from the command line
//!
//! Fetches leagues, teams, players, matches and team-of-the-week rounds,
//! keeping every response as a local snapshot so repeated lookups are served
//! from disk until they go stale.

use std::error::Error;
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;

use fotcache::cache::{
    thaw, EntityCache, Origin, RoundResolver, SnapshotStore, StoreStats, View,
};
use fotcache::cli::{error_report, transfer_filter, Cli, Command, RunConfig};
use fotcache::clock::{Clock, SystemClock};
use fotcache::data::fotmob::squad_member_hits;
use fotcache::data::league_stats::player_stats;
use fotcache::data::totw::{appearances, TotwRound};
use fotcache::data::transfers::{club_transfers, transfer_records, Transfer};
use fotcache::data::{CachedFetcher, EntityKey, EntityKind, FotmobClient};

/// Everything a command needs, wired once per run
struct Services {
    cache: Arc<EntityCache>,
    rounds: RoundResolver,
    fetcher: Arc<CachedFetcher<FotmobClient>>,
}

fn build_services(config: &RunConfig) -> Result<Services, Box<dyn Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = match &config.cache_dir {
        Some(dir) => SnapshotStore::open(dir.clone(), clock.clone())?,
        None => SnapshotStore::open_default()?,
    };

    let http = reqwest::Client::builder().timeout(config.timeout).build()?;
    let client = FotmobClient::with_client(http, clock.clone()).with_time_zone(config.time_zone.clone());
    let fetcher = Arc::new(CachedFetcher::new(client, clock.clone()));

    let cache = Arc::new(
        EntityCache::new(Arc::new(store), fetcher.clone(), clock).with_timeout(config.timeout),
    );
    Ok(Services {
        rounds: RoundResolver::new(cache.clone()),
        cache,
        fetcher,
    })
}

fn print_json(value: &Value) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_name<'a>(payload: &'a View, fallback: &'a str) -> &'a str {
    payload
        .pointer("/details/name")
        .and_then(View::as_str)
        .unwrap_or(fallback)
}

fn print_transfers(title: &str, transfers: &[Transfer]) {
    println!("{title}\n");
    if transfers.is_empty() {
        println!("  None");
    }
    for transfer in transfers {
        println!("  {transfer}");
    }
    println!();
}

fn print_round(round: &TotwRound, league_name: Option<&str>) {
    println!("{}", round.header(league_name));
    if round.players.is_empty() {
        println!("  No players selected yet");
        return;
    }
    for player in &round.players {
        let rating = player
            .rating
            .map(|r| format!("{r:.1}"))
            .unwrap_or_else(|| "-".to_string());
        let motm = if player.motm { "  MOTM" } else { "" };
        println!("  {:<28} {rating:>4}{motm}", player.name);
    }
}

fn print_stats(stats: &StoreStats, store: &SnapshotStore) {
    println!("Snapshots in {}", store.dir().display());
    for kind in EntityKind::ALL {
        let usage = stats.by_kind.get(&kind).copied().unwrap_or_default();
        println!(
            "  {:<8} {:>6} files {:>10.2} MB",
            kind.as_str(),
            usage.files,
            usage.bytes as f64 / (1024.0 * 1024.0)
        );
    }
    println!(
        "  {:<8} {:>6} files {:>10.2} MB",
        "total",
        stats.total_files(),
        stats.total_megabytes()
    );
}

async fn entity(services: &Services, key: EntityKey, config: &RunConfig) -> Result<(), Box<dyn Error>> {
    let payload: View = services.cache.get(&key, &config.freshness).await?;
    print_json(&thaw(&payload))
}

async fn run(cli: Cli, config: RunConfig) -> Result<(), Box<dyn Error>> {
    let services = build_services(&config)?;
    let freshness = &config.freshness;

    match cli.command {
        Command::League { id } => entity(&services, EntityKey::league(id), &config).await?,
        Command::Team { id } => entity(&services, EntityKey::team(id), &config).await?,
        Command::Player { id } => entity(&services, EntityKey::player(id), &config).await?,
        Command::Match { id } => entity(&services, EntityKey::match_details(id), &config).await?,
        Command::Totw { league, round } => {
            let resolved = services.rounds.resolve(&league, round, freshness).await?;
            if resolved.origin == Origin::Stale {
                eprintln!("Warning: upstream unavailable, showing an older snapshot");
            }
            let index = services.rounds.known_index(&league);
            let league_name = index.as_ref().and_then(|index| index.league_name());
            print_round(&TotwRound::from_snapshot(&resolved), league_name);
        }
        Command::TotwAll { league, min_apps } => {
            let rounds: Vec<TotwRound> = services
                .rounds
                .resolve_all(&league, freshness)
                .await?
                .iter()
                .map(TotwRound::from_snapshot)
                .collect();
            let grouped = appearances(&rounds, min_apps);
            println!("{} rounds, {} players with {min_apps}+ selections", rounds.len(), grouped.len());
            for player in grouped {
                let average = player
                    .average_rating()
                    .map(|r| format!("{r:.2}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<28} {:>3} apps  avg {average:>5}  MOTM {}",
                    player.name,
                    player.count(),
                    player.motm_count()
                );
            }
        }
        Command::Transfers {
            team,
            direction,
            on_loan,
            contract_extension,
        } => {
            let payload = services.cache.get(&EntityKey::team(&team), freshness).await?;
            println!("{}\n", display_name(&payload, &team));

            let filter = transfer_filter(direction, on_loan, contract_extension);
            let club = club_transfers(&transfer_records(&payload), &team, filter);
            if filter.incoming {
                print_transfers("Transfers in", &club.incoming);
            }
            if filter.outgoing {
                print_transfers("Transfers out", &club.outgoing);
            }
        }
        Command::LeagueStats { league } => {
            let payload = services.cache.get(&EntityKey::league(&league), freshness).await?;
            let stats = player_stats(&payload);
            if stats.is_empty() {
                println!("No player statistics for {}", display_name(&payload, &league));
            }
            for stat in stats {
                println!("{stat}\n");
            }
        }
        Command::Search { term } => {
            let response = services.fetcher.inner().search(&term).await?;
            let hits = squad_member_hits(&response);
            if hits.is_empty() {
                println!("No players found for '{term}'");
            }
            for hit in hits {
                println!("{:>10}  {}", hit.id, hit.name);
            }
        }
        Command::Matches { date } => {
            let matches = services.fetcher.inner().matches_on(date).await?;
            print_json(&matches)?;
        }
        Command::Clear { kind, id } => {
            let removed = services.cache.store().clear(&EntityKey::new(kind, id))?;
            println!("Removed {removed} snapshot(s)");
        }
        Command::Stats => {
            let store = services.cache.store();
            print_stats(&store.stats()?, store);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match RunConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli, config).await {
        eprintln!("Error: {}", error_report(e.as_ref()));
        process::exit(1);
    }
    Ok(())
}
