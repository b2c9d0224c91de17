//! As-of-kickoff odds ingestion for a season

use crate::data::Database;
use crate::ingest::odds_api::{parse_event_bookmaker_snapshots, parse_iso_z, OddsApiClient};
use crate::text::normalize_team_alias;
use crate::{Config, OddsSnapshot, OddsValueError, Provider, Result, TeamId};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use log::info;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

const MATCH_TOLERANCE_S: i64 = 30 * 60;

/// Outcome counters for one odds ingestion run
#[derive(Debug, Clone)]
pub struct OddsIngestResult {
    pub league_key: String,
    pub season_year: i32,
    pub games_seen: usize,
    pub games_matched: usize,
    pub games_missing_in_provider: usize,
    pub snapshots_created: usize,
    pub books_created: usize,
    pub payloads_created: usize,
}

/// Knobs for the odds batch
#[derive(Debug, Clone)]
pub struct OddsIngestOptions {
    /// Capture odds this many hours before kickoff
    pub as_of_hours: i64,
    /// Round capture times down to the hour; the provider serves discrete
    /// (commonly hourly) snapshots and minute-level queries can come back empty
    pub round_to_hour: bool,
    pub regions: String,
    pub markets: Vec<String>,
    pub bookmakers: Option<Vec<String>>,
    pub commit_every: usize,
}

impl Default for OddsIngestOptions {
    fn default() -> Self {
        OddsIngestOptions {
            as_of_hours: 6,
            round_to_hour: true,
            regions: "us".to_string(),
            markets: vec!["spreads".to_string(), "totals".to_string(), "h2h".to_string()],
            bookmakers: None,
            commit_every: 250,
        }
    }
}

fn sport_key_for_league(league_key: &str) -> Result<&'static str> {
    if league_key.eq_ignore_ascii_case("NFL") {
        Ok("americanfootball_nfl")
    } else {
        Err(OddsValueError::Config(format!(
            "Unsupported league_key={} for odds ingestion",
            league_key
        )))
    }
}

/// Ingest spreads/totals/moneyline snapshots for every game in a season.
///
/// Games are grouped by `captured_at = start_time - as_of_hours` and one
/// historical batch is fetched per distinct capture time. Events match games
/// on commence time (exact, then within 30 minutes) plus team alias norms.
pub fn ingest_season_odds(
    db: &Database,
    config: &Config,
    league_key: &str,
    season_year: i32,
    options: &OddsIngestOptions,
    items_by_captured_at: Option<&HashMap<DateTime<Utc>, Vec<Value>>>,
) -> Result<OddsIngestResult> {
    let sport_key = sport_key_for_league(league_key)?;
    let league = db.require_league(league_key)?;
    let season = db.require_season(league.id, season_year)?;

    let games = db.season_games(league.id, season.id)?;

    let mut games_by_captured_at: BTreeMap<DateTime<Utc>, Vec<usize>> = BTreeMap::new();
    for (idx, game) in games.iter().enumerate() {
        let Some(start_time) = game.start_time else {
            continue;
        };
        let captured_at = start_time - TimeDelta::hours(options.as_of_hours);
        let captured_at = if options.round_to_hour {
            captured_at
                .duration_trunc(TimeDelta::hours(1))
                .map_err(|e| OddsValueError::Parse(e.to_string()))?
        } else {
            captured_at
                .duration_trunc(TimeDelta::minutes(1))
                .map_err(|e| OddsValueError::Parse(e.to_string()))?
        };
        games_by_captured_at.entry(captured_at).or_default().push(idx);
    }

    let client = match items_by_captured_at {
        Some(_) => None,
        None => {
            let api_key = config.require_odds_api_key()?;
            Some(OddsApiClient::new(&config.odds_api.base_url, api_key)?)
        }
    };

    let mut result = OddsIngestResult {
        league_key: league_key.to_string(),
        season_year,
        games_seen: games.len(),
        games_matched: 0,
        games_missing_in_provider: 0,
        snapshots_created: 0,
        books_created: 0,
        payloads_created: 0,
    };

    let mut book_id_by_key: HashMap<String, i64> = db
        .all_books()?
        .into_iter()
        .map(|b| (b.key, b.id))
        .collect();
    let mut team_norms_cache: HashMap<TeamId, HashSet<String>> = HashMap::new();
    let mut processed_games = 0usize;

    db.begin()?;

    for (&captured_at, game_indexes) in &games_by_captured_at {
        let (provider_snapshot_at, items): (DateTime<Utc>, Vec<Value>) = match items_by_captured_at
        {
            Some(map) => (captured_at, map.get(&captured_at).cloned().unwrap_or_default()),
            None => {
                let client = client.as_ref().ok_or_else(|| {
                    OddsValueError::Config("No API client available for odds fetch".to_string())
                })?;
                let snapshot = client.get_historical_odds(
                    sport_key,
                    &options.regions,
                    &options.markets,
                    captured_at,
                    options.bookmakers.as_deref(),
                )?;
                (snapshot.timestamp, snapshot.items)
            }
        };

        if config.ingest.store_ingested_payloads {
            let payload = json!({
                "requested_date": captured_at.to_rfc3339(),
                "snapshot_timestamp": provider_snapshot_at.to_rfc3339(),
                "items": items,
            });
            db.insert_ingested_payload(
                Provider::OddsApi,
                "odds_api_batch",
                &format!("{}:{}", sport_key, captured_at.to_rfc3339()),
                Utc::now(),
                &payload.to_string(),
            )?;
            result.payloads_created += 1;
        }

        // Index provider events by (commence_time, home_norm, away_norm).
        let mut indexed: HashMap<(DateTime<Utc>, String, String), &Value> = HashMap::new();
        for item in &items {
            let (Some(commence), Some(home), Some(away)) = (
                item.get("commence_time").and_then(Value::as_str),
                item.get("home_team").and_then(Value::as_str),
                item.get("away_team").and_then(Value::as_str),
            ) else {
                continue;
            };
            let Ok(commence_dt) = parse_iso_z(commence) else {
                continue;
            };
            indexed.insert(
                (commence_dt, normalize_team_alias(home), normalize_team_alias(away)),
                item,
            );
        }

        for &idx in game_indexes {
            let game = &games[idx];
            let (Some(start_time), Some(home_team_id), Some(away_team_id)) =
                (game.start_time, game.home_team_id, game.away_team_id)
            else {
                continue;
            };

            if !team_norms_cache.contains_key(&home_team_id) {
                let norms = db.team_alias_norms(league.id, home_team_id)?;
                team_norms_cache.insert(home_team_id, norms);
            }
            if !team_norms_cache.contains_key(&away_team_id) {
                let norms = db.team_alias_norms(league.id, away_team_id)?;
                team_norms_cache.insert(away_team_id, norms);
            }
            let home_norms = &team_norms_cache[&home_team_id];
            let away_norms = &team_norms_cache[&away_team_id];

            let mut matched_item: Option<&Value> = None;
            'exact: for hn in home_norms {
                for an in away_norms {
                    if let Some(item) = indexed.get(&(start_time, hn.clone(), an.clone())) {
                        matched_item = Some(item);
                        break 'exact;
                    }
                }
            }

            if matched_item.is_none() {
                for ((it_commence, it_home, it_away), item) in &indexed {
                    if !home_norms.contains(it_home) || !away_norms.contains(it_away) {
                        continue;
                    }
                    if (*it_commence - start_time).num_seconds().abs() <= MATCH_TOLERANCE_S {
                        matched_item = Some(item);
                        break;
                    }
                }
            }

            let Some(matched_item) = matched_item else {
                result.games_missing_in_provider += 1;
                continue;
            };
            result.games_matched += 1;

            let parsed = parse_event_bookmaker_snapshots(matched_item, home_norms, away_norms);
            for ps in parsed {
                let book_id = match book_id_by_key.get(&ps.book_key) {
                    Some(&id) => id,
                    None => {
                        let book = match db.find_book_by_key(&ps.book_key)? {
                            Some(existing) => {
                                if existing.name != ps.book_name {
                                    db.update_book_name(existing.id, &ps.book_name)?;
                                }
                                existing
                            }
                            None => {
                                result.books_created += 1;
                                db.insert_book(&ps.book_key, &ps.book_name)?
                            }
                        };
                        book_id_by_key.insert(ps.book_key.clone(), book.id);
                        book.id
                    }
                };

                if !db.odds_snapshot_exists(
                    game.id,
                    book_id,
                    ps.market_type,
                    ps.side_type,
                    provider_snapshot_at,
                )? {
                    db.insert_odds_snapshot(&OddsSnapshot {
                        game_id: game.id,
                        book_id,
                        captured_at: provider_snapshot_at,
                        market_type: ps.market_type,
                        side_type: ps.side_type,
                        line: ps.line,
                        price: ps.price,
                        is_closing: false,
                        provider: Provider::OddsApi,
                    })?;
                    result.snapshots_created += 1;
                }
            }

            processed_games += 1;
            if options.commit_every > 0 && processed_games % options.commit_every == 0 {
                db.commit_and_begin()?;
            }
        }
    }

    db.commit()?;

    info!(
        "Odds {} {}: {} games seen, {} matched, {} missing, {} snapshots created",
        league_key,
        season_year,
        result.games_seen,
        result.games_matched,
        result.games_missing_in_provider,
        result.snapshots_created
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::seed::seed_provider_data;
    use crate::ingest::season::ingest_season;
    use crate::MarketType;
    use chrono::TimeZone;

    fn setup_with_game(commence_utc: &str) -> Database {
        let db = Database::in_memory().unwrap();
        seed_provider_data(&db).unwrap();
        let (date, time) = commence_utc.split_once('T').unwrap();
        let item = json!({
            "game": {
                "id": 100,
                "date": {"date": date, "time": &time[..5]},
                "status": {"short": "NS"},
            },
            "teams": {
                "home": {"id": 12, "name": "Philadelphia Eagles"},
                "away": {"id": 10, "name": "Cincinnati Bengals"},
            },
            "scores": {"home": {}, "away": {}},
        });
        ingest_season(&db, "NFL", 2025, &[item], false).unwrap();
        db
    }

    fn event(commence: &str) -> Value {
        json!({
            "id": "ev1",
            "commence_time": commence,
            "home_team": "Philadelphia Eagles",
            "away_team": "Cincinnati Bengals",
            "bookmakers": [{
                "key": "draftkings",
                "title": "DraftKings",
                "markets": [
                    {
                        "key": "spreads",
                        "outcomes": [
                            {"name": "Philadelphia Eagles", "price": -110, "point": -3.5},
                            {"name": "Cincinnati Bengals", "price": -110, "point": 3.5},
                        ],
                    },
                    {
                        "key": "totals",
                        "outcomes": [
                            {"name": "Over", "price": -105, "point": 47.5},
                            {"name": "Under", "price": -115, "point": 47.5},
                        ],
                    },
                    {
                        "key": "h2h",
                        "outcomes": [
                            {"name": "Philadelphia Eagles", "price": -150},
                            {"name": "Cincinnati Bengals", "price": 130},
                        ],
                    },
                ],
            }],
        })
    }

    #[test]
    fn test_ingests_snapshots_for_matched_game() {
        let db = setup_with_game("2025-09-07T17:00");
        let captured_at = Utc.with_ymd_and_hms(2025, 9, 7, 11, 0, 0).unwrap();
        let mut by_captured = HashMap::new();
        by_captured.insert(captured_at, vec![event("2025-09-07T17:00:00Z")]);

        let config = Config::default();
        let options = OddsIngestOptions::default();

        let result =
            ingest_season_odds(&db, &config, "NFL", 2025, &options, Some(&by_captured)).unwrap();
        assert_eq!(result.games_seen, 1);
        assert_eq!(result.games_matched, 1);
        assert_eq!(result.games_missing_in_provider, 0);
        assert_eq!(result.books_created, 1);
        assert_eq!(result.snapshots_created, 6);

        let game = db
            .require_game_by_provider_id(Provider::ApiSports, "100")
            .unwrap();
        let book = db.find_book_by_key("draftkings").unwrap().unwrap();
        assert!(db
            .odds_snapshot_exists(game.id, book.id, MarketType::Spread, crate::SideType::Home, captured_at)
            .unwrap());
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let db = setup_with_game("2025-09-07T17:00");
        let captured_at = Utc.with_ymd_and_hms(2025, 9, 7, 11, 0, 0).unwrap();
        let mut by_captured = HashMap::new();
        by_captured.insert(captured_at, vec![event("2025-09-07T17:00:00Z")]);

        let config = Config::default();
        let options = OddsIngestOptions::default();

        ingest_season_odds(&db, &config, "NFL", 2025, &options, Some(&by_captured)).unwrap();
        let rerun =
            ingest_season_odds(&db, &config, "NFL", 2025, &options, Some(&by_captured)).unwrap();
        assert_eq!(rerun.games_matched, 1);
        assert_eq!(rerun.snapshots_created, 0);
        assert_eq!(rerun.books_created, 0);
    }

    #[test]
    fn test_tolerant_commence_time_match() {
        let db = setup_with_game("2025-09-07T17:00");
        let captured_at = Utc.with_ymd_and_hms(2025, 9, 7, 11, 0, 0).unwrap();
        let mut by_captured = HashMap::new();
        // Provider lists kickoff 15 minutes later than our schedule.
        by_captured.insert(captured_at, vec![event("2025-09-07T17:15:00Z")]);

        let config = Config::default();
        let options = OddsIngestOptions::default();

        let result =
            ingest_season_odds(&db, &config, "NFL", 2025, &options, Some(&by_captured)).unwrap();
        assert_eq!(result.games_matched, 1);
        assert_eq!(result.snapshots_created, 6);
    }

    #[test]
    fn test_unmatched_game_counts_missing() {
        let db = setup_with_game("2025-09-07T17:00");
        let captured_at = Utc.with_ymd_and_hms(2025, 9, 7, 11, 0, 0).unwrap();
        let by_captured = HashMap::from([(captured_at, Vec::new())]);

        let config = Config::default();
        let options = OddsIngestOptions::default();

        let result =
            ingest_season_odds(&db, &config, "NFL", 2025, &options, Some(&by_captured)).unwrap();
        assert_eq!(result.games_matched, 0);
        assert_eq!(result.games_missing_in_provider, 1);
        assert_eq!(result.snapshots_created, 0);
    }

    #[test]
    fn test_non_nfl_league_rejected() {
        let db = Database::in_memory().unwrap();
        seed_provider_data(&db).unwrap();
        let config = Config::default();
        let options = OddsIngestOptions::default();

        let err = ingest_season_odds(&db, &config, "XFL", 2025, &options, None);
        assert!(matches!(err, Err(OddsValueError::Config(_))));
    }
}
