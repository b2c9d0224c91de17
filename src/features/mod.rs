//! Derived pre-game feature rows

pub mod state_builder;

use crate::{GameId, TeamId};
use chrono::{DateTime, Utc};

/// Pre-game state of one team entering one game, as of kickoff.
///
/// Every rolling aggregate is computed from strictly earlier games; the game
/// this row keys on never contributes to its own features.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamGameState {
    pub team_id: TeamId,
    pub game_id: GameId,
    pub season_id: i64,
    pub start_time: DateTime<Utc>,
    pub week: Option<u32>,
    pub games_played: i64,
    pub rest_days: Option<i64>,
    pub games_l3: i64,
    pub games_l5: i64,
    pub off_pts_l3: f64,
    pub off_pts_l5: f64,
    pub off_pts_season: f64,
    pub off_diff_l3: f64,
    pub off_diff_l5: f64,
    pub off_diff_season: f64,
    pub off_yards_l3: f64,
    pub off_yards_l5: f64,
    pub off_yards_season: f64,
    pub off_turnovers_l3: f64,
    pub off_turnovers_l5: f64,
    pub off_turnovers_season: f64,
    pub def_pa_l3: f64,
    pub def_pa_l5: f64,
    pub def_pa_season: f64,
    pub def_diff_l3: f64,
    pub def_diff_l5: f64,
    pub def_diff_season: f64,
    pub def_yards_allowed_l3: f64,
    pub def_yards_allowed_l5: f64,
    pub def_yards_allowed_season: f64,
    pub def_takeaways_l3: f64,
    pub def_takeaways_l5: f64,
    pub def_takeaways_season: f64,
}
