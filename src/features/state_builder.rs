//! As-of-kickoff team state builder

use crate::calendar::{in_regular_season_window, regular_season_week};
use crate::data::Database;
use crate::features::TeamGameState;
use crate::{GameStatus, OddsValueError, Result, TeamId};
use chrono::{DateTime, Utc};
use log::info;
use std::collections::HashMap;

/// Outcome counters for one state build run
#[derive(Debug, Clone)]
pub struct StateBuildResult {
    pub league_key: String,
    pub season_year: i32,
    pub games_seen: usize,
    pub team_games_seen: usize,
    pub states_created: usize,
    pub states_updated: usize,
    pub games_skipped: usize,
}

/// Knobs for the state build
#[derive(Debug, Clone)]
pub struct StateBuildOptions {
    /// Delete the season's existing state rows before building
    pub rebuild: bool,
    pub include_non_regular_season: bool,
    pub commit_every: usize,
}

impl Default for StateBuildOptions {
    fn default() -> Self {
        StateBuildOptions {
            rebuild: false,
            include_non_regular_season: false,
            commit_every: 500,
        }
    }
}

/// One team's observed final result in one game, as seen from that team's side
#[derive(Debug, Clone)]
struct ObservedTeamGame {
    start_time: DateTime<Utc>,
    points_for: i64,
    points_against: i64,
    yards_for: Option<i64>,
    yards_against: Option<i64>,
    turnovers_for: Option<i64>,
    takeaways: Option<i64>,
}

/// Mean over the present values; an all-missing window collapses to 0.0
fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = Option<i64>>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values.into_iter().flatten() {
        sum += v as f64;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Whole days between two instants, floored
fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later - earlier).num_seconds().div_euclid(86_400)
}

/// Build team_game_states rows for a season.
///
/// Computes pre-game features "as of kickoff": for a given game, only games
/// strictly before that game's start time contribute. History only considers
/// FINAL games with known scores. NFL only, because the week definition is
/// league-specific.
pub fn build_team_game_states(
    db: &Database,
    league_key: &str,
    season_year: i32,
    options: &StateBuildOptions,
) -> Result<StateBuildResult> {
    if league_key != "NFL" {
        return Err(OddsValueError::Config(
            "Only league_key=NFL is supported for state building".to_string(),
        ));
    }

    let league = db.require_league(league_key)?;
    let season = db.require_season(league.id, season_year)?;

    let games = db.season_games(league.id, season.id)?;

    if options.rebuild {
        let deleted = db.delete_states_for_season(season.id)?;
        info!("Rebuild: deleted {} existing state rows", deleted);
    }

    let existing_keys = db.existing_state_keys(season.id)?;

    // Preload observed per-team stats; games missing them still count for
    // points via the game row.
    let mut stats_by_game_team = HashMap::new();
    for row in db.season_team_game_stats(league.id, season.id)? {
        stats_by_game_team.insert((row.game_id, row.team_id), row);
    }

    let mut history_by_team: HashMap<TeamId, Vec<ObservedTeamGame>> = HashMap::new();

    let mut result = StateBuildResult {
        league_key: league_key.to_string(),
        season_year,
        games_seen: games.len(),
        team_games_seen: 0,
        states_created: 0,
        states_updated: 0,
        games_skipped: 0,
    };

    db.begin()?;

    for (idx, game) in games.iter().enumerate() {
        let (Some(start_time), Some(home_team_id), Some(away_team_id)) =
            (game.start_time, game.home_team_id, game.away_team_id)
        else {
            continue;
        };

        if !options.include_non_regular_season
            && !in_regular_season_window(start_time, season_year)
        {
            result.games_skipped += 1;
            continue;
        }

        // Compute pregame state for both teams before appending this game's
        // own results to history.
        for team_id in [home_team_id, away_team_id] {
            result.team_games_seen += 1;

            let empty: Vec<ObservedTeamGame> = Vec::new();
            let history = history_by_team.get(&team_id).unwrap_or(&empty);
            let games_played = history.len();

            let rest_days = history
                .last()
                .map(|last| days_between(last.start_time, start_time));

            let l3 = &history[games_played.saturating_sub(3)..];
            let l5 = &history[games_played.saturating_sub(5)..];

            let state = TeamGameState {
                team_id,
                game_id: game.id,
                season_id: season.id,
                start_time,
                week: regular_season_week(start_time, season_year).ok(),
                games_played: games_played as i64,
                rest_days,
                games_l3: games_played.min(3) as i64,
                games_l5: games_played.min(5) as i64,
                off_pts_l3: mean(l3.iter().map(|h| Some(h.points_for))),
                off_pts_l5: mean(l5.iter().map(|h| Some(h.points_for))),
                off_pts_season: mean(history.iter().map(|h| Some(h.points_for))),
                off_diff_l3: mean(l3.iter().map(|h| Some(h.points_for - h.points_against))),
                off_diff_l5: mean(l5.iter().map(|h| Some(h.points_for - h.points_against))),
                off_diff_season: mean(
                    history.iter().map(|h| Some(h.points_for - h.points_against)),
                ),
                off_yards_l3: mean(l3.iter().map(|h| h.yards_for)),
                off_yards_l5: mean(l5.iter().map(|h| h.yards_for)),
                off_yards_season: mean(history.iter().map(|h| h.yards_for)),
                off_turnovers_l3: mean(l3.iter().map(|h| h.turnovers_for)),
                off_turnovers_l5: mean(l5.iter().map(|h| h.turnovers_for)),
                off_turnovers_season: mean(history.iter().map(|h| h.turnovers_for)),
                def_pa_l3: mean(l3.iter().map(|h| Some(h.points_against))),
                def_pa_l5: mean(l5.iter().map(|h| Some(h.points_against))),
                def_pa_season: mean(history.iter().map(|h| Some(h.points_against))),
                def_diff_l3: mean(l3.iter().map(|h| Some(h.points_against - h.points_for))),
                def_diff_l5: mean(l5.iter().map(|h| Some(h.points_against - h.points_for))),
                def_diff_season: mean(
                    history.iter().map(|h| Some(h.points_against - h.points_for)),
                ),
                def_yards_allowed_l3: mean(l3.iter().map(|h| h.yards_against)),
                def_yards_allowed_l5: mean(l5.iter().map(|h| h.yards_against)),
                def_yards_allowed_season: mean(history.iter().map(|h| h.yards_against)),
                def_takeaways_l3: mean(l3.iter().map(|h| h.takeaways)),
                def_takeaways_l5: mean(l5.iter().map(|h| h.takeaways)),
                def_takeaways_season: mean(history.iter().map(|h| h.takeaways)),
            };

            db.upsert_team_game_state(&state)?;
            if existing_keys.contains(&(team_id, game.id)) {
                result.states_updated += 1;
            } else {
                result.states_created += 1;
            }
        }

        // Only finished games with known scores enter history.
        if game.status == GameStatus::Final {
            if let (Some(home_score), Some(away_score)) = (game.home_score, game.away_score) {
                let home_stats = stats_by_game_team.get(&(game.id, home_team_id));
                let away_stats = stats_by_game_team.get(&(game.id, away_team_id));

                let home_obs = ObservedTeamGame {
                    start_time,
                    points_for: home_score,
                    points_against: away_score,
                    yards_for: home_stats.and_then(|s| s.yards_total),
                    yards_against: away_stats.and_then(|s| s.yards_total),
                    turnovers_for: home_stats.and_then(|s| s.turnovers),
                    takeaways: away_stats.and_then(|s| s.turnovers),
                };
                let away_obs = ObservedTeamGame {
                    start_time,
                    points_for: away_score,
                    points_against: home_score,
                    yards_for: away_stats.and_then(|s| s.yards_total),
                    yards_against: home_stats.and_then(|s| s.yards_total),
                    turnovers_for: away_stats.and_then(|s| s.turnovers),
                    takeaways: home_stats.and_then(|s| s.turnovers),
                };

                history_by_team.entry(home_team_id).or_default().push(home_obs);
                history_by_team.entry(away_team_id).or_default().push(away_obs);
            }
        }

        if options.commit_every > 0 && (idx + 1) % options.commit_every == 0 {
            db.commit_and_begin()?;
        }
    }

    db.commit()?;

    info!(
        "States {} {}: {} games seen, {} created, {} updated, {} skipped",
        league_key,
        season_year,
        result.games_seen,
        result.states_created,
        result.states_updated,
        result.games_skipped
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::seed::seed_provider_data;
    use crate::ingest::season::ingest_season;
    use crate::ingest::team_stats::ingest_game_team_stats;
    use crate::Provider;
    use serde_json::{json, Value};

    fn game_item(
        game_id: i64,
        date: &str,
        status: &str,
        home_total: Option<i64>,
        away_total: Option<i64>,
    ) -> Value {
        json!({
            "game": {
                "id": game_id,
                "date": {"date": date, "time": "17:00"},
                "status": {"short": status},
            },
            "teams": {
                "home": {"id": 12, "name": "Philadelphia Eagles"},
                "away": {"id": 10, "name": "Cincinnati Bengals"},
            },
            "scores": {
                "home": {"total": home_total},
                "away": {"total": away_total},
            },
        })
    }

    fn stats_items(home_yards: i64, home_to: i64, away_yards: i64, away_to: i64) -> Vec<Value> {
        vec![
            json!({
                "team": {"id": 12},
                "statistics": {"yards": {"total": home_yards}, "turnovers": {"total": home_to}},
            }),
            json!({
                "team": {"id": 10},
                "statistics": {"yards": {"total": away_yards}, "turnovers": {"total": away_to}},
            }),
        ]
    }

    /// Two finished games a week apart, with full stats
    fn setup_two_games() -> Database {
        let db = Database::in_memory().unwrap();
        seed_provider_data(&db).unwrap();
        let items = vec![
            game_item(100, "2025-10-05", "FT", Some(27), Some(20)),
            game_item(101, "2025-10-12", "FT", Some(31), Some(17)),
        ];
        ingest_season(&db, "NFL", 2025, &items, false).unwrap();
        ingest_game_team_stats(&db, "100", &stats_items(380, 1, 295, 2), false).unwrap();
        ingest_game_team_stats(&db, "101", &stats_items(410, 0, 260, 3), false).unwrap();
        db
    }

    fn state_for(db: &Database, provider_game_id: &str, home: bool) -> TeamGameState {
        let game = db
            .require_game_by_provider_id(Provider::ApiSports, provider_game_id)
            .unwrap();
        let team_id = if home {
            game.home_team_id.unwrap()
        } else {
            game.away_team_id.unwrap()
        };
        db.find_team_game_state(team_id, game.id).unwrap().unwrap()
    }

    #[test]
    fn test_creates_states_then_updates_on_rerun() {
        let db = setup_two_games();
        let options = StateBuildOptions::default();

        let result = build_team_game_states(&db, "NFL", 2025, &options).unwrap();
        assert_eq!(result.games_seen, 2);
        assert_eq!(result.team_games_seen, 4);
        assert_eq!(result.states_created, 4);
        assert_eq!(result.states_updated, 0);

        let rerun = build_team_game_states(&db, "NFL", 2025, &options).unwrap();
        assert_eq!(rerun.states_created, 0);
        assert_eq!(rerun.states_updated, 4);
    }

    #[test]
    fn test_first_game_state_is_all_zero_history() {
        let db = setup_two_games();
        build_team_game_states(&db, "NFL", 2025, &StateBuildOptions::default()).unwrap();

        let state = state_for(&db, "100", true);
        assert_eq!(state.games_played, 0);
        assert_eq!(state.rest_days, None);
        assert_eq!(state.games_l3, 0);
        assert_eq!(state.off_pts_season, 0.0);
        assert_eq!(state.def_pa_l5, 0.0);
        // Week 5: Oct 5 2025 falls in the Tue Sep 30 bucket.
        assert_eq!(state.week, Some(5));
    }

    #[test]
    fn test_second_game_sees_only_first_game() {
        let db = setup_two_games();
        build_team_game_states(&db, "NFL", 2025, &StateBuildOptions::default()).unwrap();

        // Home team (Eagles) won 27-20 with 380 yards, 1 turnover; opponent
        // had 295 yards, 2 turnovers.
        let state = state_for(&db, "101", true);
        assert_eq!(state.games_played, 1);
        assert_eq!(state.rest_days, Some(7));
        assert_eq!(state.games_l3, 1);
        assert_eq!(state.games_l5, 1);
        assert_eq!(state.week, Some(6));
        assert_eq!(state.off_pts_l3, 27.0);
        assert_eq!(state.off_diff_season, 7.0);
        assert_eq!(state.off_yards_l5, 380.0);
        assert_eq!(state.off_turnovers_season, 1.0);
        assert_eq!(state.def_pa_l3, 20.0);
        assert_eq!(state.def_diff_season, -7.0);
        assert_eq!(state.def_yards_allowed_l3, 295.0);
        assert_eq!(state.def_takeaways_season, 2.0);

        // Away side mirrors the same game.
        let away = state_for(&db, "101", false);
        assert_eq!(away.off_pts_l3, 20.0);
        assert_eq!(away.def_pa_l3, 27.0);
        assert_eq!(away.off_diff_season, -7.0);
        assert_eq!(away.def_takeaways_season, 1.0);
    }

    #[test]
    fn test_missing_stats_average_to_zero() {
        let db = Database::in_memory().unwrap();
        seed_provider_data(&db).unwrap();
        let items = vec![
            game_item(100, "2025-10-05", "FT", Some(27), Some(20)),
            game_item(101, "2025-10-12", "NS", None, None),
        ];
        ingest_season(&db, "NFL", 2025, &items, false).unwrap();
        // No stats rows ingested at all.

        build_team_game_states(&db, "NFL", 2025, &StateBuildOptions::default()).unwrap();

        let state = state_for(&db, "101", true);
        assert_eq!(state.games_played, 1);
        // Points come from the game row even without stats rows.
        assert_eq!(state.off_pts_season, 27.0);
        // Yard/turnover windows have no observations and collapse to 0.0.
        assert_eq!(state.off_yards_season, 0.0);
        assert_eq!(state.def_takeaways_l3, 0.0);
    }

    #[test]
    fn test_unfinished_games_do_not_enter_history() {
        let db = Database::in_memory().unwrap();
        seed_provider_data(&db).unwrap();
        let items = vec![
            game_item(100, "2025-10-05", "PST", Some(10), Some(7)),
            game_item(101, "2025-10-12", "FT", Some(31), Some(17)),
        ];
        ingest_season(&db, "NFL", 2025, &items, false).unwrap();

        build_team_game_states(&db, "NFL", 2025, &StateBuildOptions::default()).unwrap();

        let state = state_for(&db, "101", true);
        assert_eq!(state.games_played, 0);
        assert_eq!(state.rest_days, None);
    }

    #[test]
    fn test_rebuild_deletes_then_recreates() {
        let db = setup_two_games();
        build_team_game_states(&db, "NFL", 2025, &StateBuildOptions::default()).unwrap();

        let options = StateBuildOptions {
            rebuild: true,
            ..Default::default()
        };
        let result = build_team_game_states(&db, "NFL", 2025, &options).unwrap();
        assert_eq!(result.states_created, 4);
        assert_eq!(result.states_updated, 0);
    }

    #[test]
    fn test_rolling_window_caps() {
        let db = Database::in_memory().unwrap();
        seed_provider_data(&db).unwrap();
        // Seven weekly finals; scores climb so the windows differ.
        let opener = chrono::NaiveDate::from_ymd_opt(2025, 9, 7).unwrap();
        let items: Vec<Value> = (0..7)
            .map(|i| {
                let date = opener + chrono::Duration::weeks(i);
                game_item(
                    200 + i,
                    &date.format("%Y-%m-%d").to_string(),
                    "FT",
                    Some(10 + i),
                    Some(7),
                )
            })
            .collect();
        ingest_season(&db, "NFL", 2025, &items, false).unwrap();

        build_team_game_states(&db, "NFL", 2025, &StateBuildOptions::default()).unwrap();

        // Entering game 7, six games of history exist: scores 10..=15.
        let state = state_for(&db, "206", true);
        assert_eq!(state.games_played, 6);
        assert_eq!(state.games_l3, 3);
        assert_eq!(state.games_l5, 5);
        assert_eq!(state.off_pts_l3, 14.0);
        assert_eq!(state.off_pts_l5, 13.0);
        assert_eq!(state.off_pts_season, 12.5);
    }

    #[test]
    fn test_only_league_nfl_supported() {
        let db = Database::in_memory().unwrap();
        let err = build_team_game_states(&db, "NBA", 2025, &StateBuildOptions::default());
        assert!(matches!(err, Err(OddsValueError::Config(_))));
    }

    #[test]
    fn test_mean_helper() {
        assert_eq!(mean([Some(1), None, Some(3)]), 2.0);
        assert_eq!(mean([None, None]), 0.0);
        assert_eq!(mean(std::iter::empty()), 0.0);
    }
}
