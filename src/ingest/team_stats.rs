//! Per-game team statistics ingestion from API-Sports

use crate::data::Database;
use crate::ingest::api_sports::ApiSportsClient;
use crate::{Config, Game, OddsValueError, Provider, Result};
use chrono::Utc;
use log::{info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

const FAILURE_REASON_MAX_LEN: usize = 300;

/// Outcome counters for one game's stats ingestion
#[derive(Debug, Clone)]
pub struct GameStatsResult {
    pub provider_game_id: String,
    pub items_seen: usize,
    pub stats_created: usize,
    pub stats_updated: usize,
}

/// Outcome counters for a season-wide stats batch
#[derive(Debug, Clone)]
pub struct SeasonStatsResult {
    pub league_key: String,
    pub season_year: i32,
    pub games_seen: usize,
    pub games_processed: usize,
    pub games_failed: usize,
    pub games_skipped_existing: usize,
    pub failed_game_ids_sample: Vec<String>,
    pub failure_reasons: HashMap<String, usize>,
    pub items_seen: usize,
    pub stats_created: usize,
    pub stats_updated: usize,
}

/// Knobs for the season batch; defaults match a cautious full-season run
#[derive(Debug, Clone)]
pub struct SeasonStatsOptions {
    pub max_games: Option<usize>,
    pub only_final: bool,
    pub sleep_seconds: f64,
    pub commit_every: usize,
    pub skip_existing: bool,
    pub failures_limit: usize,
    pub stop_on_failure: bool,
    /// Stats rows required before a game counts as complete (2 in the NFL)
    pub participants_per_game: i64,
}

impl Default for SeasonStatsOptions {
    fn default() -> Self {
        SeasonStatsOptions {
            max_games: None,
            only_final: true,
            sleep_seconds: 0.0,
            commit_every: 25,
            skip_existing: true,
            failures_limit: 25,
            stop_on_failure: false,
            participants_per_game: 2,
        }
    }
}

fn format_failure_reason(e: &OddsValueError) -> String {
    let reason = e.to_string();
    if reason.chars().count() > FAILURE_REASON_MAX_LEN {
        let truncated: String = reason.chars().take(FAILURE_REASON_MAX_LEN - 1).collect();
        format!("{}…", truncated)
    } else {
        reason
    }
}

/// Fetch team stats for one game.
///
/// The provider has accepted both `game` and `id` as the parameter name over
/// time; fall back to the second form when the first is rejected.
pub fn fetch_game_team_stats(
    client: &mut ApiSportsClient,
    provider_game_id: &str,
) -> Result<Vec<Value>> {
    let path = "/games/statistics/teams";
    match client.get_response_items(path, &[("game", provider_game_id.to_string())]) {
        Ok(items) => Ok(items),
        Err(OddsValueError::ProviderResponse(_)) => {
            client.get_response_items(path, &[("id", provider_game_id.to_string())])
        }
        Err(e) => Err(e),
    }
}

/// Upsert both teams' stats rows for a single game
pub fn ingest_game_team_stats(
    db: &Database,
    provider_game_id: &str,
    items: &[Value],
    store_payloads: bool,
) -> Result<GameStatsResult> {
    let game = db.require_game_by_provider_id(Provider::ApiSports, provider_game_id)?;
    let now = Utc::now();

    let mut created = 0;
    let mut updated = 0;

    for item in items {
        let Some(team_obj) = item.get("team").and_then(Value::as_object) else {
            continue;
        };
        let Some(stats_obj) = item.get("statistics").and_then(Value::as_object) else {
            continue;
        };

        let provider_team_id = match team_obj.get("id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => continue,
        };

        let team = match db.find_team_by_provider_id(game.league_id, &provider_team_id)? {
            Some(t) => t,
            None => {
                let name = team_obj
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(&provider_team_id);
                let logo = team_obj.get("logo").and_then(Value::as_str);
                db.insert_team(game.league_id, &provider_team_id, name, logo)?
            }
        };

        let is_home = if Some(team.id) == game.home_team_id {
            true
        } else if Some(team.id) == game.away_team_id {
            false
        } else {
            warn!(
                "Stats team {} does not match either side of game {}; skipping",
                provider_team_id, provider_game_id
            );
            continue;
        };

        let score = if is_home { game.home_score } else { game.away_score };

        let yards_total = stats_obj
            .get("yards")
            .and_then(Value::as_object)
            .and_then(|y| y.get("total"))
            .and_then(Value::as_i64);
        let turnovers = stats_obj
            .get("turnovers")
            .and_then(Value::as_object)
            .and_then(|t| t.get("total"))
            .and_then(Value::as_i64);
        let stats_json = Value::Object(stats_obj.clone()).to_string();

        match db.find_team_game_stats(game.id, team.id)? {
            None => {
                db.insert_team_game_stats(
                    game.id,
                    team.id,
                    is_home,
                    score,
                    yards_total,
                    turnovers,
                    Some(&stats_json),
                )?;
                created += 1;
            }
            Some(existing) => {
                db.update_team_game_stats(
                    existing.id,
                    is_home,
                    score,
                    yards_total,
                    turnovers,
                    Some(&stats_json),
                )?;
                updated += 1;
            }
        }

        if store_payloads {
            db.insert_ingested_payload(
                Provider::ApiSports,
                "team_game_statistics",
                &format!("{}:{}", provider_game_id, provider_team_id),
                now,
                &item.to_string(),
            )?;
        }
    }

    Ok(GameStatsResult {
        provider_game_id: provider_game_id.to_string(),
        items_seen: items.len(),
        stats_created: created,
        stats_updated: updated,
    })
}

/// Fetch and upsert team stats for every game in a season.
///
/// Each game runs inside a savepoint so one failure neither poisons the batch
/// nor rolls back earlier games. `items_by_game` injects provider payloads by
/// provider_game_id; when absent the provider is fetched live.
pub fn ingest_season_team_stats(
    db: &Database,
    config: &Config,
    league_key: &str,
    season_year: i32,
    options: &SeasonStatsOptions,
    items_by_game: Option<&HashMap<String, Vec<Value>>>,
) -> Result<SeasonStatsResult> {
    let league = db.require_league(league_key)?;
    let season = db.require_season(league.id, season_year)?;

    let games: Vec<Game> = db.season_games_for_provider(
        Provider::ApiSports,
        league.id,
        season.id,
        options.only_final,
        options.max_games,
    )?;

    let mut client = match items_by_game {
        Some(_) => None,
        None => {
            let api_key = config.require_api_sports_key()?;
            Some(ApiSportsClient::new(&config.api_sports.base_url, api_key)?)
        }
    };

    let complete: HashSet<_> = if options.skip_existing && !games.is_empty() {
        db.games_with_complete_stats(league.id, season.id, options.participants_per_game)?
    } else {
        HashSet::new()
    };

    let mut result = SeasonStatsResult {
        league_key: league_key.to_string(),
        season_year,
        games_seen: games.len(),
        games_processed: 0,
        games_failed: 0,
        games_skipped_existing: 0,
        failed_game_ids_sample: Vec::new(),
        failure_reasons: HashMap::new(),
        items_seen: 0,
        stats_created: 0,
        stats_updated: 0,
    };

    db.begin()?;

    for (idx, game) in games.iter().enumerate() {
        if options.skip_existing && complete.contains(&game.id) {
            result.games_skipped_existing += 1;
            continue;
        }

        let outcome = ingest_one_game(
            db,
            &mut client,
            game,
            items_by_game,
            config.ingest.store_ingested_payloads,
        );

        match outcome {
            Ok(game_result) => {
                result.items_seen += game_result.items_seen;
                result.stats_created += game_result.stats_created;
                result.stats_updated += game_result.stats_updated;
                result.games_processed += 1;
            }
            Err(e) => {
                result.games_failed += 1;
                let reason = format_failure_reason(&e);
                warn!("FAILED provider_game_id={} | {}", game.provider_game_id, reason);
                *result.failure_reasons.entry(reason).or_insert(0) += 1;
                if result.failed_game_ids_sample.len() < options.failures_limit {
                    result
                        .failed_game_ids_sample
                        .push(game.provider_game_id.clone());
                }
                if options.stop_on_failure {
                    db.rollback()?;
                    return Err(e);
                }
            }
        }

        if options.commit_every > 0 && (idx + 1) % options.commit_every == 0 {
            db.commit_and_begin()?;
        }

        if options.sleep_seconds > 0.0 {
            std::thread::sleep(std::time::Duration::from_secs_f64(options.sleep_seconds));
        }
    }

    db.commit()?;

    info!(
        "Season stats {} {}: {} games seen, {} processed, {} failed, {} skipped existing",
        league_key,
        season_year,
        result.games_seen,
        result.games_processed,
        result.games_failed,
        result.games_skipped_existing
    );
    Ok(result)
}

fn ingest_one_game(
    db: &Database,
    client: &mut Option<ApiSportsClient>,
    game: &Game,
    items_by_game: Option<&HashMap<String, Vec<Value>>>,
    store_payloads: bool,
) -> Result<GameStatsResult> {
    let items: Vec<Value> = match items_by_game {
        Some(map) => map
            .get(&game.provider_game_id)
            .cloned()
            .ok_or(OddsValueError::NotFound {
                entity: "team stats items",
                key: game.provider_game_id.clone(),
            })?,
        None => {
            let client = client.as_mut().ok_or_else(|| {
                OddsValueError::Config("No API client available for stats fetch".to_string())
            })?;
            fetch_game_team_stats(client, &game.provider_game_id)?
        }
    };

    db.savepoint("game_stats")?;
    match ingest_game_team_stats(db, &game.provider_game_id, &items, store_payloads) {
        Ok(result) => {
            db.release_savepoint("game_stats")?;
            Ok(result)
        }
        Err(e) => {
            db.rollback_savepoint("game_stats")?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::seed::seed_provider_data;
    use crate::ingest::season::ingest_season;
    use serde_json::json;

    fn game_item(game_id: i64, date: &str, home_id: i64, away_id: i64) -> Value {
        json!({
            "game": {
                "id": game_id,
                "date": {"date": date, "time": "17:00"},
                "status": {"short": "FT"},
            },
            "teams": {
                "home": {"id": home_id, "name": format!("Home {}", home_id)},
                "away": {"id": away_id, "name": format!("Away {}", away_id)},
            },
            "scores": {"home": {"total": 27}, "away": {"total": 20}},
        })
    }

    fn stats_items(home_id: i64, away_id: i64) -> Vec<Value> {
        vec![
            json!({
                "team": {"id": home_id, "name": format!("Home {}", home_id)},
                "statistics": {
                    "yards": {"total": 380},
                    "turnovers": {"total": 1},
                    "first_downs": {"total": 22},
                },
            }),
            json!({
                "team": {"id": away_id, "name": format!("Away {}", away_id)},
                "statistics": {
                    "yards": {"total": 295},
                    "turnovers": {"total": 2},
                },
            }),
        ]
    }

    fn setup_with_games(game_specs: &[(i64, &str)]) -> Database {
        let db = Database::in_memory().unwrap();
        seed_provider_data(&db).unwrap();
        let items: Vec<Value> = game_specs
            .iter()
            .map(|(id, date)| game_item(*id, date, 12, 10))
            .collect();
        ingest_season(&db, "NFL", 2025, &items, false).unwrap();
        db
    }

    #[test]
    fn test_single_game_stats_upsert() {
        let db = setup_with_games(&[(100, "2025-09-07")]);
        let items = stats_items(12, 10);

        let result = ingest_game_team_stats(&db, "100", &items, false).unwrap();
        assert_eq!(result.stats_created, 2);
        assert_eq!(result.stats_updated, 0);

        let game = db
            .require_game_by_provider_id(Provider::ApiSports, "100")
            .unwrap();
        let home = game.home_team_id.unwrap();
        let stats = db.find_team_game_stats(game.id, home).unwrap().unwrap();
        assert!(stats.is_home);
        assert_eq!(stats.score, Some(27));
        assert_eq!(stats.yards_total, Some(380));
        assert_eq!(stats.turnovers, Some(1));
        assert!(stats.stats_json.unwrap().contains("first_downs"));

        let rerun = ingest_game_team_stats(&db, "100", &items, false).unwrap();
        assert_eq!(rerun.stats_created, 0);
        assert_eq!(rerun.stats_updated, 2);
    }

    #[test]
    fn test_season_batch_processes_and_skips_complete() {
        let db = setup_with_games(&[(100, "2025-09-07"), (101, "2025-09-14")]);
        let mut by_game = HashMap::new();
        by_game.insert("100".to_string(), stats_items(12, 10));
        by_game.insert("101".to_string(), stats_items(12, 10));

        let config = Config::default();
        let options = SeasonStatsOptions::default();

        let result =
            ingest_season_team_stats(&db, &config, "NFL", 2025, &options, Some(&by_game)).unwrap();
        assert_eq!(result.games_seen, 2);
        assert_eq!(result.games_processed, 2);
        assert_eq!(result.stats_created, 4);
        assert_eq!(result.games_failed, 0);

        let rerun =
            ingest_season_team_stats(&db, &config, "NFL", 2025, &options, Some(&by_game)).unwrap();
        assert_eq!(rerun.games_skipped_existing, 2);
        assert_eq!(rerun.games_processed, 0);
        assert_eq!(rerun.stats_created, 0);
    }

    #[test]
    fn test_one_failure_does_not_roll_back_siblings() {
        let db = setup_with_games(&[(100, "2025-09-07"), (101, "2025-09-14")]);
        // No payloads for game 101; its fetch-by-injection fails.
        let mut by_game = HashMap::new();
        by_game.insert("100".to_string(), stats_items(12, 10));

        let config = Config::default();
        let options = SeasonStatsOptions::default();

        let result =
            ingest_season_team_stats(&db, &config, "NFL", 2025, &options, Some(&by_game)).unwrap();
        assert_eq!(result.games_processed, 1);
        assert_eq!(result.games_failed, 1);
        assert_eq!(result.stats_created, 2);
        assert_eq!(result.failed_game_ids_sample, vec!["101".to_string()]);
        assert_eq!(result.failure_reasons.values().sum::<usize>(), 1);

        // Game 100's rows survived the sibling failure.
        let game = db
            .require_game_by_provider_id(Provider::ApiSports, "100")
            .unwrap();
        assert!(db
            .find_team_game_stats(game.id, game.home_team_id.unwrap())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_stop_on_failure_propagates() {
        let db = setup_with_games(&[(100, "2025-09-07"), (101, "2025-09-14")]);
        let by_game = HashMap::new();

        let config = Config::default();
        let options = SeasonStatsOptions {
            stop_on_failure: true,
            ..Default::default()
        };

        let err = ingest_season_team_stats(&db, &config, "NFL", 2025, &options, Some(&by_game));
        assert!(matches!(err, Err(OddsValueError::NotFound { .. })));
    }

    #[test]
    fn test_failure_reason_truncation() {
        let long = "x".repeat(400);
        let reason = format_failure_reason(&OddsValueError::Parse(long));
        assert_eq!(reason.chars().count(), FAILURE_REASON_MAX_LEN);
        assert!(reason.ends_with('…'));
    }

    #[test]
    fn test_mismatched_team_is_skipped() {
        let db = setup_with_games(&[(100, "2025-09-07")]);
        // Stats for a team that plays in neither slot of the game.
        let items = vec![json!({
            "team": {"id": 55, "name": "Someone Else"},
            "statistics": {"yards": {"total": 100}},
        })];

        let result = ingest_game_team_stats(&db, "100", &items, false).unwrap();
        assert_eq!(result.stats_created, 0);
        assert_eq!(result.items_seen, 1);
    }
}
