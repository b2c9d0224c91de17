//! Season schedule/result ingestion from API-Sports

use crate::calendar::in_regular_season_window;
use crate::data::Database;
use crate::ingest::api_sports::ApiSportsClient;
use crate::ingest::dates::parse_game_datetime;
use crate::text::normalize_team_alias;
use crate::{Config, GameStatus, League, OddsValueError, Provider, Result, Season, TeamId};
use chrono::Utc;
use log::{info, warn};
use serde_json::Value;

const COMMIT_EVERY_GAMES: usize = 250;

/// Outcome counters for one season ingestion run
#[derive(Debug, Clone)]
pub struct SeasonIngestResult {
    pub league_key: String,
    pub season_year: i32,
    pub games_seen: usize,
    pub games_created: usize,
    pub games_updated: usize,
    pub games_skipped: usize,
    pub games_skipped_window: usize,
    pub teams_created: usize,
    pub venues_created: usize,
}

/// Fetch the full season schedule from the provider
pub fn fetch_season_games(
    db: &Database,
    config: &Config,
    league_key: &str,
    season_year: i32,
) -> Result<Vec<Value>> {
    let league = db.require_league(league_key)?;
    let provider_league_id = db
        .provider_league_id(Provider::ApiSports, league.id)?
        .ok_or(OddsValueError::NotFound {
            entity: "provider league mapping",
            key: league_key.to_string(),
        })?;

    let api_key = config.require_api_sports_key()?;
    let mut client = ApiSportsClient::new(&config.api_sports.base_url, api_key)?;
    client.get_response_items(
        "/games",
        &[
            ("league", provider_league_id),
            ("season", season_year.to_string()),
        ],
    )
}

/// Upsert a season's worth of provider game items.
///
/// Idempotent on (provider, provider_game_id). Games outside the regular
/// season window are filtered on their parsed start time, independent of any
/// stage labels in the payload. Runs inside an outer transaction committed
/// every `COMMIT_EVERY_GAMES` games; a fatal error rolls back the current
/// uncommitted chunk.
pub fn ingest_season(
    db: &Database,
    league_key: &str,
    season_year: i32,
    items: &[Value],
    store_payloads: bool,
) -> Result<SeasonIngestResult> {
    let league = db.require_league(league_key)?;
    let season = db.get_or_create_season(league.id, season_year)?;

    db.begin()?;
    match ingest_season_items(db, &league, &season, league_key, season_year, items, store_payloads)
    {
        Ok(result) => {
            db.commit()?;
            Ok(result)
        }
        Err(e) => {
            db.rollback()?;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn ingest_season_items(
    db: &Database,
    league: &League,
    season: &Season,
    league_key: &str,
    season_year: i32,
    items: &[Value],
    store_payloads: bool,
) -> Result<SeasonIngestResult> {
    let mut result = SeasonIngestResult {
        league_key: league_key.to_string(),
        season_year,
        games_seen: items.len(),
        games_created: 0,
        games_updated: 0,
        games_skipped: 0,
        games_skipped_window: 0,
        teams_created: 0,
        venues_created: 0,
    };

    let now = Utc::now();

    for (idx, item) in items.iter().enumerate() {
        let Some(game_obj) = item.get("game").and_then(Value::as_object) else {
            result.games_skipped += 1;
            continue;
        };
        let Some(teams_obj) = item.get("teams").and_then(Value::as_object) else {
            result.games_skipped += 1;
            continue;
        };

        let Some(provider_game_id) = id_as_string(game_obj.get("id")) else {
            result.games_skipped += 1;
            continue;
        };

        let (Some(home), Some(away)) = (
            teams_obj.get("home").filter(|v| v.is_object()),
            teams_obj.get("away").filter(|v| v.is_object()),
        ) else {
            result.games_skipped += 1;
            continue;
        };

        let home_team_id = upsert_team(db, league.id, home, &mut result.teams_created)?;
        let away_team_id = upsert_team(db, league.id, away, &mut result.teams_created)?;

        let mut venue_id: Option<i64> = None;
        if let Some(venue_obj) = game_obj.get("venue").and_then(Value::as_object) {
            let venue_name = venue_obj.get("name").and_then(Value::as_str);
            let venue_city = venue_obj.get("city").and_then(Value::as_str);
            if let Some(name) = venue_name.filter(|n| !n.trim().is_empty()) {
                let venue = match db.find_venue(league.id, name, venue_city)? {
                    Some(v) => v,
                    None => {
                        result.venues_created += 1;
                        db.insert_venue(league.id, name, venue_city)?
                    }
                };
                venue_id = Some(venue.id);
            }
        }

        let status_short = game_obj
            .get("status")
            .and_then(Value::as_object)
            .and_then(|s| s.get("short"))
            .and_then(Value::as_str);
        let status = GameStatus::from_provider_short(status_short);

        let start_time = match game_obj.get("date") {
            Some(date_obj) => match parse_game_datetime(date_obj, &provider_game_id) {
                Ok(dt) => dt,
                Err(e) => {
                    warn!("Skipping game {}: {}", provider_game_id, e);
                    result.games_skipped += 1;
                    continue;
                }
            },
            None => {
                result.games_skipped += 1;
                continue;
            }
        };

        // Payload-agnostic filter: only persist regular season games.
        if league_key == "NFL" && !in_regular_season_window(start_time, season_year) {
            result.games_skipped_window += 1;
            continue;
        }

        let scores_obj = item.get("scores").and_then(Value::as_object);
        let home_score = scores_obj
            .and_then(|s| s.get("home"))
            .and_then(Value::as_object)
            .and_then(|s| s.get("total"))
            .and_then(Value::as_i64);
        let away_score = scores_obj
            .and_then(|s| s.get("away"))
            .and_then(Value::as_object)
            .and_then(|s| s.get("total"))
            .and_then(Value::as_i64);

        match db.find_game_by_provider_id(Provider::ApiSports, &provider_game_id)? {
            Some(existing) => {
                db.update_game(
                    existing.id,
                    season.id,
                    start_time,
                    status,
                    home_team_id,
                    away_team_id,
                    home_score,
                    away_score,
                    venue_id,
                    now,
                )?;
                result.games_updated += 1;
            }
            None => {
                db.insert_game(
                    league.id,
                    season.id,
                    Provider::ApiSports,
                    &provider_game_id,
                    start_time,
                    status,
                    home_team_id,
                    away_team_id,
                    home_score,
                    away_score,
                    venue_id,
                    now,
                )?;
                result.games_created += 1;
            }
        }

        if store_payloads {
            db.insert_ingested_payload(
                Provider::ApiSports,
                "game",
                &provider_game_id,
                now,
                &item.to_string(),
            )?;
        }

        if (idx + 1) % COMMIT_EVERY_GAMES == 0 {
            db.commit_and_begin()?;
        }
    }

    info!(
        "Season {} {}: {} seen, {} created, {} updated, {} skipped ({} outside window)",
        league_key,
        season_year,
        result.games_seen,
        result.games_created,
        result.games_updated,
        result.games_skipped,
        result.games_skipped_window
    );
    Ok(result)
}

/// Canonical team upsert keyed on the provider's team id.
///
/// The provider_teams table is the audit mapping; a provider id pointing at
/// a different canonical team than the teams table is a fatal inconsistency.
fn upsert_team(
    db: &Database,
    league_id: i64,
    team_data: &Value,
    teams_created: &mut usize,
) -> Result<TeamId> {
    let provider_team_id = id_as_string(team_data.get("id"))
        .ok_or_else(|| OddsValueError::Parse("Team item missing id".to_string()))?;
    let provider_team_name = team_data
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .unwrap_or(&provider_team_id)
        .to_string();
    let logo_url = team_data.get("logo").and_then(Value::as_str);

    if let Some((team_id, mapped_name)) =
        db.find_provider_team_mapping(Provider::ApiSports, &provider_team_id)?
    {
        db.refresh_team(team_id, &provider_team_name, logo_url)?;
        if mapped_name != provider_team_name {
            db.update_provider_team_name(
                Provider::ApiSports,
                &provider_team_id,
                &provider_team_name,
            )?;
        }
        ensure_alias(db, league_id, team_id, &provider_team_name)?;
        return Ok(team_id);
    }

    let team_id = match db.find_team_by_provider_id(league_id, &provider_team_id)? {
        None => {
            *teams_created += 1;
            let team = db.insert_team(league_id, &provider_team_id, &provider_team_name, logo_url)?;
            db.insert_provider_team_mapping(
                Provider::ApiSports,
                team.id,
                &provider_team_id,
                &provider_team_name,
            )?;
            team.id
        }
        Some(existing) => {
            db.refresh_team(existing.id, &provider_team_name, logo_url)?;
            match db.find_provider_team_mapping(Provider::ApiSports, &provider_team_id)? {
                None => {
                    db.insert_provider_team_mapping(
                        Provider::ApiSports,
                        existing.id,
                        &provider_team_id,
                        &provider_team_name,
                    )?;
                }
                Some((mapped_team_id, _)) if mapped_team_id != existing.id => {
                    return Err(OddsValueError::MappingConflict {
                        provider_team_id,
                        mapped_team_id: mapped_team_id.0,
                        existing_team_id: existing.id.0,
                    });
                }
                Some(_) => {
                    db.update_provider_team_name(
                        Provider::ApiSports,
                        &provider_team_id,
                        &provider_team_name,
                    )?;
                }
            }
            existing.id
        }
    };

    ensure_alias(db, league_id, team_id, &provider_team_name)?;
    Ok(team_id)
}

fn ensure_alias(db: &Database, league_id: i64, team_id: TeamId, name: &str) -> Result<()> {
    let alias_norm = normalize_team_alias(name);
    if !alias_norm.is_empty() && !db.alias_exists(league_id, &alias_norm)? {
        db.insert_alias(league_id, team_id, name, &alias_norm, "name")?;
    }
    Ok(())
}

/// Provider ids arrive as either JSON numbers or strings
fn id_as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
