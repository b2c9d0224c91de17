//! NFL odds-value ingestion CLI
//!
//! Pulls schedules, box scores and betting odds into a local SQLite store and
//! builds leak-free pre-game team features.

use clap::{Parser, Subcommand};
use oddsvalue::{Config, Result};

#[derive(Parser)]
#[command(name = "oddsvalue")]
#[command(about = "NFL schedule/odds ingestion and feature pipeline", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new project with default config and database
    Init,
    /// Seed league and provider mapping rows
    Seed,
    /// Show database status
    Status,
    /// Provider ingestion commands
    Ingest {
        #[command(subcommand)]
        action: IngestCommands,
    },
    /// Derived feature commands
    Features {
        #[command(subcommand)]
        action: FeatureCommands,
    },
}

#[derive(Subcommand)]
enum IngestCommands {
    /// Fetch and upsert a season's schedule and scores
    Season {
        /// League key
        #[arg(long, default_value = "NFL")]
        league_key: String,
        /// Season year, e.g. 2024
        #[arg(long)]
        year: i32,
    },
    /// Fetch and upsert per-team box scores for a season
    TeamStats {
        /// League key
        #[arg(long, default_value = "NFL")]
        league_key: String,
        /// Season year
        #[arg(long)]
        year: i32,
        /// Limit the number of games processed
        #[arg(long)]
        max_games: Option<usize>,
        /// Include games that are not FINAL
        #[arg(long)]
        include_unfinished: bool,
        /// Re-fetch games that already have complete stats
        #[arg(long)]
        no_skip_existing: bool,
        /// Extra pause between games, in seconds
        #[arg(long, default_value = "0.0")]
        sleep_seconds: f64,
        /// Commit after this many games
        #[arg(long, default_value = "25")]
        commit_every: usize,
        /// Cap on the failed-game id sample in the summary
        #[arg(long, default_value = "25")]
        failures_limit: usize,
        /// Abort the batch on the first failed game
        #[arg(long)]
        stop_on_failure: bool,
    },
    /// Fetch and store historical odds snapshots for a season
    Odds {
        /// League key
        #[arg(long, default_value = "NFL")]
        league_key: String,
        /// Season year
        #[arg(long)]
        year: i32,
        /// Capture odds this many hours before kickoff
        #[arg(long, default_value = "6")]
        as_of_hours: i64,
        /// Bookmaker regions, comma-separated
        #[arg(long, default_value = "us")]
        regions: String,
        /// Markets to request
        #[arg(long, value_delimiter = ',', default_values_t = [
            "spreads".to_string(), "totals".to_string(), "h2h".to_string(),
        ])]
        markets: Vec<String>,
        /// Restrict to specific bookmaker keys
        #[arg(long, value_delimiter = ',')]
        bookmakers: Option<Vec<String>>,
        /// Commit after this many games
        #[arg(long, default_value = "250")]
        commit_every: usize,
    },
}

#[derive(Subcommand)]
enum FeatureCommands {
    /// Build as-of-kickoff team game states for a season
    Build {
        /// League key
        #[arg(long, default_value = "NFL")]
        league_key: String,
        /// Season year
        #[arg(long)]
        year: i32,
        /// Delete the season's existing state rows first
        #[arg(long)]
        rebuild: bool,
        /// Also build states for games outside the regular season window
        #[arg(long)]
        include_non_regular_season: bool,
        /// Commit after this many games
        #[arg(long, default_value = "500")]
        commit_every: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Run command
    let result = match cli.command {
        Commands::Init => commands::init(&cli.config),
        Commands::Seed => commands::seed(&config),
        Commands::Status => commands::status(&config),
        Commands::Ingest { action } => match action {
            IngestCommands::Season { league_key, year } => {
                commands::ingest_season(&config, &league_key, year)
            }
            IngestCommands::TeamStats {
                league_key,
                year,
                max_games,
                include_unfinished,
                no_skip_existing,
                sleep_seconds,
                commit_every,
                failures_limit,
                stop_on_failure,
            } => commands::ingest_team_stats(
                &config,
                &league_key,
                year,
                StatsFlags {
                    max_games,
                    include_unfinished,
                    no_skip_existing,
                    sleep_seconds,
                    commit_every,
                    failures_limit,
                    stop_on_failure,
                },
            ),
            IngestCommands::Odds {
                league_key,
                year,
                as_of_hours,
                regions,
                markets,
                bookmakers,
                commit_every,
            } => commands::ingest_odds(
                &config,
                &league_key,
                year,
                as_of_hours,
                regions,
                markets,
                bookmakers,
                commit_every,
            ),
        },
        Commands::Features { action } => match action {
            FeatureCommands::Build {
                league_key,
                year,
                rebuild,
                include_non_regular_season,
                commit_every,
            } => commands::build_features(
                &config,
                &league_key,
                year,
                rebuild,
                include_non_regular_season,
                commit_every,
            ),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Flattened team-stats flags so the dispatch arm stays readable
struct StatsFlags {
    max_games: Option<usize>,
    include_unfinished: bool,
    no_skip_existing: bool,
    sleep_seconds: f64,
    commit_every: usize,
    failures_limit: usize,
    stop_on_failure: bool,
}

mod commands {
    use super::*;
    use oddsvalue::data::seed::seed_provider_data;
    use oddsvalue::data::Database;
    use oddsvalue::features::state_builder::{build_team_game_states, StateBuildOptions};
    use oddsvalue::ingest::odds::{ingest_season_odds, OddsIngestOptions};
    use oddsvalue::ingest::season::fetch_season_games;
    use oddsvalue::ingest::team_stats::{ingest_season_team_stats, SeasonStatsOptions};

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        let db = Database::open(&config.data.database_path)?;
        seed_provider_data(&db)?;
        println!("Created database at {}", config.data.database_path);

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Export API_SPORTS_KEY and ODDS_API_KEY");
        println!("  3. Run 'oddsvalue ingest season --year 2024'");
        println!("  4. Run 'oddsvalue ingest team-stats --year 2024'");
        println!("  5. Run 'oddsvalue ingest odds --year 2024'");
        println!("  6. Run 'oddsvalue features build --year 2024'");

        Ok(())
    }

    pub fn seed(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        seed_provider_data(&db)?;
        println!("Seeded league and provider mappings");
        Ok(())
    }

    pub fn status(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;

        println!("Database Status");
        println!("───────────────────────────────");
        println!("  Path:        {}", config.data.database_path);
        println!("  Leagues:     {}", stats.league_count);
        println!("  Teams:       {}", stats.team_count);
        println!("  Games:       {}", stats.game_count);
        println!("  Team stats:  {}", stats.team_game_stats_count);
        println!("  Team states: {}", stats.team_game_state_count);
        println!("  Odds snaps:  {}", stats.odds_snapshot_count);
        if let (Some(earliest), Some(latest)) = (stats.earliest_game, stats.latest_game) {
            println!("  Range:       {} to {}", earliest, latest);
        }

        Ok(())
    }

    pub fn ingest_season(config: &Config, league_key: &str, year: i32) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        seed_provider_data(&db)?;

        println!("Fetching {} {} schedule...", league_key, year);
        let items = fetch_season_games(&db, config, league_key, year)?;
        println!("Fetched {} game items", items.len());

        let result = oddsvalue::ingest::season::ingest_season(
            &db,
            league_key,
            year,
            &items,
            config.ingest.store_ingested_payloads,
        )?;

        println!(
            "Season {}: {} created, {} updated, {} skipped ({} outside window), {} new teams, {} new venues",
            result.season_year,
            result.games_created,
            result.games_updated,
            result.games_skipped,
            result.games_skipped_window,
            result.teams_created,
            result.venues_created,
        );

        Ok(())
    }

    pub fn ingest_team_stats(
        config: &Config,
        league_key: &str,
        year: i32,
        flags: StatsFlags,
    ) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;

        let options = SeasonStatsOptions {
            max_games: flags.max_games,
            only_final: !flags.include_unfinished,
            sleep_seconds: flags.sleep_seconds,
            commit_every: flags.commit_every,
            skip_existing: !flags.no_skip_existing,
            failures_limit: flags.failures_limit,
            stop_on_failure: flags.stop_on_failure,
            ..SeasonStatsOptions::default()
        };

        println!("Ingesting {} {} team stats...", league_key, year);
        let result = ingest_season_team_stats(&db, config, league_key, year, &options, None)?;

        println!(
            "Team stats {}: {} games seen, {} processed, {} skipped (complete), {} failed; {} stats created, {} updated",
            result.season_year,
            result.games_seen,
            result.games_processed,
            result.games_skipped_existing,
            result.games_failed,
            result.stats_created,
            result.stats_updated,
        );
        if !result.failure_reasons.is_empty() {
            println!("Failure reasons:");
            for (reason, count) in &result.failure_reasons {
                println!("  {}x {}", count, reason);
            }
            println!("Failed game ids (sample): {:?}", result.failed_game_ids_sample);
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ingest_odds(
        config: &Config,
        league_key: &str,
        year: i32,
        as_of_hours: i64,
        regions: String,
        markets: Vec<String>,
        bookmakers: Option<Vec<String>>,
        commit_every: usize,
    ) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;

        let options = OddsIngestOptions {
            as_of_hours,
            regions,
            markets,
            bookmakers,
            commit_every,
            ..OddsIngestOptions::default()
        };

        println!(
            "Ingesting {} {} odds ({}h before kickoff)...",
            league_key, year, options.as_of_hours
        );
        let result = ingest_season_odds(&db, config, league_key, year, &options, None)?;

        println!(
            "Odds {}: {} games seen, {} matched, {} missing in provider; {} snapshots, {} new books",
            result.season_year,
            result.games_seen,
            result.games_matched,
            result.games_missing_in_provider,
            result.snapshots_created,
            result.books_created,
        );

        Ok(())
    }

    pub fn build_features(
        config: &Config,
        league_key: &str,
        year: i32,
        rebuild: bool,
        include_non_regular_season: bool,
        commit_every: usize,
    ) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;

        let options = StateBuildOptions {
            rebuild,
            include_non_regular_season,
            commit_every,
        };

        println!("Building {} {} team game states...", league_key, year);
        let result = build_team_game_states(&db, league_key, year, &options)?;

        println!(
            "States {}: {} games seen, {} team-games; {} created, {} updated, {} games skipped",
            result.season_year,
            result.games_seen,
            result.team_games_seen,
            result.states_created,
            result.states_updated,
            result.games_skipped,
        );

        Ok(())
    }
}
