//! SQLite storage for schedule, statistics, odds, and derived feature rows

use crate::features::TeamGameState;
use crate::{
    Book, Game, GameId, GameStatus, League, MarketType, OddsSnapshot, OddsValueError, Provider,
    Result, Season, SideType, Team, TeamGameStats, TeamId, Venue,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

fn dt_to_sql(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn dt_from_sql(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leagues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_key TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS seasons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                year INTEGER NOT NULL,
                name TEXT NOT NULL,
                UNIQUE(league_id, year)
            );

            CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                provider_team_id TEXT NOT NULL,
                name TEXT NOT NULL,
                logo_url TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                UNIQUE(league_id, provider_team_id)
            );

            CREATE TABLE IF NOT EXISTS provider_teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                team_id INTEGER NOT NULL REFERENCES teams(id),
                provider_team_id TEXT NOT NULL,
                provider_team_name TEXT NOT NULL,
                UNIQUE(provider, provider_team_id)
            );

            CREATE TABLE IF NOT EXISTS team_aliases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                team_id INTEGER NOT NULL REFERENCES teams(id),
                alias TEXT NOT NULL,
                alias_norm TEXT NOT NULL,
                alias_type TEXT NOT NULL,
                UNIQUE(league_id, alias_norm)
            );

            CREATE TABLE IF NOT EXISTS venues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                name TEXT NOT NULL,
                city TEXT,
                UNIQUE(league_id, name, city)
            );

            CREATE TABLE IF NOT EXISTS provider_leagues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                provider_league_id TEXT NOT NULL,
                provider_league_name TEXT NOT NULL,
                UNIQUE(provider, league_id)
            );

            CREATE TABLE IF NOT EXISTS games (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                provider TEXT NOT NULL,
                provider_game_id TEXT NOT NULL,
                start_time TEXT,
                status TEXT NOT NULL,
                home_team_id INTEGER REFERENCES teams(id),
                away_team_id INTEGER REFERENCES teams(id),
                home_score INTEGER,
                away_score INTEGER,
                venue_id INTEGER REFERENCES venues(id),
                source_last_seen_at TEXT,
                UNIQUE(provider, provider_game_id)
            );

            CREATE TABLE IF NOT EXISTS team_game_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id INTEGER NOT NULL REFERENCES games(id),
                team_id INTEGER NOT NULL REFERENCES teams(id),
                is_home INTEGER NOT NULL,
                score INTEGER,
                yards_total INTEGER,
                turnovers INTEGER,
                stats_json TEXT,
                UNIQUE(game_id, team_id)
            );

            CREATE TABLE IF NOT EXISTS team_game_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL REFERENCES teams(id),
                game_id INTEGER NOT NULL REFERENCES games(id),
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                start_time TEXT NOT NULL,
                week INTEGER,
                games_played INTEGER NOT NULL,
                rest_days INTEGER,
                games_l3 INTEGER NOT NULL,
                games_l5 INTEGER NOT NULL,
                off_pts_l3 REAL NOT NULL,
                off_pts_l5 REAL NOT NULL,
                off_pts_season REAL NOT NULL,
                off_diff_l3 REAL NOT NULL,
                off_diff_l5 REAL NOT NULL,
                off_diff_season REAL NOT NULL,
                off_yards_l3 REAL NOT NULL,
                off_yards_l5 REAL NOT NULL,
                off_yards_season REAL NOT NULL,
                off_turnovers_l3 REAL NOT NULL,
                off_turnovers_l5 REAL NOT NULL,
                off_turnovers_season REAL NOT NULL,
                def_pa_l3 REAL NOT NULL,
                def_pa_l5 REAL NOT NULL,
                def_pa_season REAL NOT NULL,
                def_diff_l3 REAL NOT NULL,
                def_diff_l5 REAL NOT NULL,
                def_diff_season REAL NOT NULL,
                def_yards_allowed_l3 REAL NOT NULL,
                def_yards_allowed_l5 REAL NOT NULL,
                def_yards_allowed_season REAL NOT NULL,
                def_takeaways_l3 REAL NOT NULL,
                def_takeaways_l5 REAL NOT NULL,
                def_takeaways_season REAL NOT NULL,
                UNIQUE(team_id, game_id)
            );

            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS odds_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id INTEGER NOT NULL REFERENCES games(id),
                book_id INTEGER NOT NULL REFERENCES books(id),
                captured_at TEXT NOT NULL,
                market_type TEXT NOT NULL,
                side_type TEXT NOT NULL,
                line REAL,
                price INTEGER NOT NULL,
                is_closing INTEGER NOT NULL DEFAULT 0,
                provider TEXT NOT NULL,
                UNIQUE(game_id, book_id, market_type, side_type, captured_at)
            );

            CREATE TABLE IF NOT EXISTS ingested_payloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_key TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_games_season_start
                ON games(season_id, start_time);
            CREATE INDEX IF NOT EXISTS idx_team_game_stats_game
                ON team_game_stats(game_id);
            CREATE INDEX IF NOT EXISTS idx_team_aliases_team
                ON team_aliases(team_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== Transaction Helpers ====================
    //
    // Batch ingestion manages transactions explicitly: an outer deferred
    // transaction committed on a configurable cadence, and a named savepoint
    // around each item so one failure rolls back only that item.

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN DEFERRED")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Commit the current transaction and immediately open a new one
    pub fn commit_and_begin(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT; BEGIN DEFERRED")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn savepoint(&self, name: &str) -> Result<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        self.conn.execute_batch(&format!("RELEASE {}", name))?;
        Ok(())
    }

    /// Roll back everything since the savepoint and discard it
    pub fn rollback_savepoint(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name))?;
        Ok(())
    }

    // ==================== Leagues & Seasons ====================

    pub fn find_league(&self, league_key: &str) -> Result<Option<League>> {
        let league = self
            .conn
            .query_row(
                "SELECT id, league_key, name FROM leagues WHERE league_key = ?1",
                params![league_key],
                |row| {
                    Ok(League {
                        id: row.get(0)?,
                        league_key: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(league)
    }

    /// Like `find_league` but the league must exist (seeded beforehand)
    pub fn require_league(&self, league_key: &str) -> Result<League> {
        self.find_league(league_key)?.ok_or(OddsValueError::NotFound {
            entity: "league",
            key: league_key.to_string(),
        })
    }

    pub fn upsert_league(&self, league_key: &str, name: &str) -> Result<League> {
        self.conn.execute(
            "INSERT INTO leagues (league_key, name) VALUES (?1, ?2)
             ON CONFLICT(league_key) DO UPDATE SET name = excluded.name",
            params![league_key, name],
        )?;
        self.require_league(league_key)
    }

    pub fn find_season(&self, league_id: i64, year: i32) -> Result<Option<Season>> {
        let season = self
            .conn
            .query_row(
                "SELECT id, league_id, year, name FROM seasons
                 WHERE league_id = ?1 AND year = ?2",
                params![league_id, year],
                |row| {
                    Ok(Season {
                        id: row.get(0)?,
                        league_id: row.get(1)?,
                        year: row.get(2)?,
                        name: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(season)
    }

    pub fn require_season(&self, league_id: i64, year: i32) -> Result<Season> {
        self.find_season(league_id, year)?
            .ok_or(OddsValueError::NotFound {
                entity: "season",
                key: format!("league_id={} year={}", league_id, year),
            })
    }

    pub fn get_or_create_season(&self, league_id: i64, year: i32) -> Result<Season> {
        if let Some(season) = self.find_season(league_id, year)? {
            return Ok(season);
        }
        self.conn.execute(
            "INSERT INTO seasons (league_id, year, name) VALUES (?1, ?2, ?3)",
            params![league_id, year, year.to_string()],
        )?;
        Ok(Season {
            id: self.conn.last_insert_rowid(),
            league_id,
            year,
            name: year.to_string(),
        })
    }

    pub fn upsert_provider_league(
        &self,
        provider: Provider,
        league_id: i64,
        provider_league_id: &str,
        provider_league_name: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO provider_leagues (provider, league_id, provider_league_id, provider_league_name)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider, league_id) DO UPDATE SET
                 provider_league_id = excluded.provider_league_id,
                 provider_league_name = excluded.provider_league_name",
            params![provider.code(), league_id, provider_league_id, provider_league_name],
        )?;
        Ok(())
    }

    pub fn provider_league_id(&self, provider: Provider, league_id: i64) -> Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT provider_league_id FROM provider_leagues
                 WHERE provider = ?1 AND league_id = ?2",
                params![provider.code(), league_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // ==================== Teams, Mappings & Aliases ====================

    fn row_to_team(row: &rusqlite::Row) -> rusqlite::Result<Team> {
        Ok(Team {
            id: TeamId(row.get(0)?),
            league_id: row.get(1)?,
            provider_team_id: row.get(2)?,
            name: row.get(3)?,
            logo_url: row.get(4)?,
            is_active: row.get(5)?,
        })
    }

    const TEAM_COLS: &'static str =
        "id, league_id, provider_team_id, name, logo_url, is_active";

    pub fn get_team(&self, id: TeamId) -> Result<Team> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM teams WHERE id = ?1", Self::TEAM_COLS),
                params![id.0],
                Self::row_to_team,
            )
            .optional()?
            .ok_or(OddsValueError::NotFound {
                entity: "team",
                key: id.to_string(),
            })
    }

    pub fn find_team_by_provider_id(
        &self,
        league_id: i64,
        provider_team_id: &str,
    ) -> Result<Option<Team>> {
        let team = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM teams WHERE league_id = ?1 AND provider_team_id = ?2",
                    Self::TEAM_COLS
                ),
                params![league_id, provider_team_id],
                Self::row_to_team,
            )
            .optional()?;
        Ok(team)
    }

    pub fn insert_team(
        &self,
        league_id: i64,
        provider_team_id: &str,
        name: &str,
        logo_url: Option<&str>,
    ) -> Result<Team> {
        self.conn.execute(
            "INSERT INTO teams (league_id, provider_team_id, name, logo_url, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![league_id, provider_team_id, name, logo_url],
        )?;
        Ok(Team {
            id: TeamId(self.conn.last_insert_rowid()),
            league_id,
            provider_team_id: provider_team_id.to_string(),
            name: name.to_string(),
            logo_url: logo_url.map(|s| s.to_string()),
            is_active: true,
        })
    }

    /// Refresh mutable display fields to the latest-seen values
    pub fn refresh_team(&self, id: TeamId, name: &str, logo_url: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE teams SET name = ?1, logo_url = ?2, is_active = 1 WHERE id = ?3",
            params![name, logo_url, id.0],
        )?;
        Ok(())
    }

    /// Audit mapping lookup: (provider, provider-native id) -> canonical team
    pub fn find_provider_team_mapping(
        &self,
        provider: Provider,
        provider_team_id: &str,
    ) -> Result<Option<(TeamId, String)>> {
        let mapping = self
            .conn
            .query_row(
                "SELECT team_id, provider_team_name FROM provider_teams
                 WHERE provider = ?1 AND provider_team_id = ?2",
                params![provider.code(), provider_team_id],
                |row| Ok((TeamId(row.get(0)?), row.get(1)?)),
            )
            .optional()?;
        Ok(mapping)
    }

    pub fn insert_provider_team_mapping(
        &self,
        provider: Provider,
        team_id: TeamId,
        provider_team_id: &str,
        provider_team_name: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO provider_teams (provider, team_id, provider_team_id, provider_team_name)
             VALUES (?1, ?2, ?3, ?4)",
            params![provider.code(), team_id.0, provider_team_id, provider_team_name],
        )?;
        Ok(())
    }

    pub fn update_provider_team_name(
        &self,
        provider: Provider,
        provider_team_id: &str,
        provider_team_name: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE provider_teams SET provider_team_name = ?1
             WHERE provider = ?2 AND provider_team_id = ?3",
            params![provider_team_name, provider.code(), provider_team_id],
        )?;
        Ok(())
    }

    pub fn alias_exists(&self, league_id: i64, alias_norm: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM team_aliases WHERE league_id = ?1 AND alias_norm = ?2",
                params![league_id, alias_norm],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_alias(
        &self,
        league_id: i64,
        team_id: TeamId,
        alias: &str,
        alias_norm: &str,
        alias_type: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO team_aliases (league_id, team_id, alias, alias_norm, alias_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![league_id, team_id.0, alias, alias_norm, alias_type],
        )?;
        Ok(())
    }

    /// All normalized aliases for a team, including its current name's norm
    pub fn team_alias_norms(&self, league_id: i64, team_id: TeamId) -> Result<HashSet<String>> {
        let team = self.get_team(team_id)?;
        let mut norms = HashSet::new();
        norms.insert(crate::text::normalize_team_alias(&team.name));

        let mut stmt = self.conn.prepare(
            "SELECT alias_norm FROM team_aliases WHERE league_id = ?1 AND team_id = ?2",
        )?;
        let rows = stmt.query_map(params![league_id, team_id.0], |row| row.get::<_, String>(0))?;
        for norm in rows {
            norms.insert(norm?);
        }
        Ok(norms)
    }

    // ==================== Venues ====================

    pub fn find_venue(
        &self,
        league_id: i64,
        name: &str,
        city: Option<&str>,
    ) -> Result<Option<Venue>> {
        let venue = self
            .conn
            .query_row(
                "SELECT id, league_id, name, city FROM venues
                 WHERE league_id = ?1 AND name = ?2 AND city IS ?3",
                params![league_id, name, city],
                |row| {
                    Ok(Venue {
                        id: row.get(0)?,
                        league_id: row.get(1)?,
                        name: row.get(2)?,
                        city: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(venue)
    }

    pub fn insert_venue(&self, league_id: i64, name: &str, city: Option<&str>) -> Result<Venue> {
        self.conn.execute(
            "INSERT INTO venues (league_id, name, city) VALUES (?1, ?2, ?3)",
            params![league_id, name, city],
        )?;
        Ok(Venue {
            id: self.conn.last_insert_rowid(),
            league_id,
            name: name.to_string(),
            city: city.map(|s| s.to_string()),
        })
    }

    // ==================== Games ====================

    const GAME_COLS: &'static str = "id, league_id, season_id, provider, provider_game_id, \
         start_time, status, home_team_id, away_team_id, home_score, away_score, venue_id, \
         source_last_seen_at";

    fn row_to_game(row: &rusqlite::Row) -> rusqlite::Result<Game> {
        let provider_code: String = row.get(3)?;
        let status_code: String = row.get(6)?;
        let start_time: Option<String> = row.get(5)?;
        let last_seen: Option<String> = row.get(12)?;
        Ok(Game {
            id: GameId(row.get(0)?),
            league_id: row.get(1)?,
            season_id: row.get(2)?,
            provider: Provider::from_code(&provider_code).unwrap_or(Provider::ApiSports),
            provider_game_id: row.get(4)?,
            start_time: start_time.as_deref().map(dt_from_sql).transpose()?,
            status: GameStatus::from_code(&status_code),
            home_team_id: row.get::<_, Option<i64>>(7)?.map(TeamId),
            away_team_id: row.get::<_, Option<i64>>(8)?.map(TeamId),
            home_score: row.get(9)?,
            away_score: row.get(10)?,
            venue_id: row.get(11)?,
            source_last_seen_at: last_seen.as_deref().map(dt_from_sql).transpose()?,
        })
    }

    pub fn find_game_by_provider_id(
        &self,
        provider: Provider,
        provider_game_id: &str,
    ) -> Result<Option<Game>> {
        let game = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM games WHERE provider = ?1 AND provider_game_id = ?2",
                    Self::GAME_COLS
                ),
                params![provider.code(), provider_game_id],
                Self::row_to_game,
            )
            .optional()?;
        Ok(game)
    }

    pub fn require_game_by_provider_id(
        &self,
        provider: Provider,
        provider_game_id: &str,
    ) -> Result<Game> {
        self.find_game_by_provider_id(provider, provider_game_id)?
            .ok_or(OddsValueError::NotFound {
                entity: "game",
                key: provider_game_id.to_string(),
            })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_game(
        &self,
        league_id: i64,
        season_id: i64,
        provider: Provider,
        provider_game_id: &str,
        start_time: DateTime<Utc>,
        status: GameStatus,
        home_team_id: TeamId,
        away_team_id: TeamId,
        home_score: Option<i64>,
        away_score: Option<i64>,
        venue_id: Option<i64>,
        source_last_seen_at: DateTime<Utc>,
    ) -> Result<GameId> {
        self.conn.execute(
            "INSERT INTO games (league_id, season_id, provider, provider_game_id, start_time,
                                status, home_team_id, away_team_id, home_score, away_score,
                                venue_id, source_last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                league_id,
                season_id,
                provider.code(),
                provider_game_id,
                dt_to_sql(start_time),
                status.code(),
                home_team_id.0,
                away_team_id.0,
                home_score,
                away_score,
                venue_id,
                dt_to_sql(source_last_seen_at),
            ],
        )?;
        Ok(GameId(self.conn.last_insert_rowid()))
    }

    /// Overwrite every mutable field with the latest fetched values
    #[allow(clippy::too_many_arguments)]
    pub fn update_game(
        &self,
        id: GameId,
        season_id: i64,
        start_time: DateTime<Utc>,
        status: GameStatus,
        home_team_id: TeamId,
        away_team_id: TeamId,
        home_score: Option<i64>,
        away_score: Option<i64>,
        venue_id: Option<i64>,
        source_last_seen_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE games SET season_id = ?1, start_time = ?2, status = ?3, home_team_id = ?4,
                              away_team_id = ?5, home_score = ?6, away_score = ?7, venue_id = ?8,
                              source_last_seen_at = ?9
             WHERE id = ?10",
            params![
                season_id,
                dt_to_sql(start_time),
                status.code(),
                home_team_id.0,
                away_team_id.0,
                home_score,
                away_score,
                venue_id,
                dt_to_sql(source_last_seen_at),
                id.0,
            ],
        )?;
        Ok(())
    }

    /// All games of a season ordered by start time ascending.
    ///
    /// Start-time order is the correctness-critical invariant for the state
    /// builder: history must never include a game starting at or after the
    /// one being processed.
    pub fn season_games(&self, league_id: i64, season_id: i64) -> Result<Vec<Game>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM games WHERE league_id = ?1 AND season_id = ?2 ORDER BY start_time",
            Self::GAME_COLS
        ))?;
        let games = stmt
            .query_map(params![league_id, season_id], Self::row_to_game)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(games)
    }

    pub fn season_games_for_provider(
        &self,
        provider: Provider,
        league_id: i64,
        season_id: i64,
        only_final: bool,
        max_games: Option<usize>,
    ) -> Result<Vec<Game>> {
        let mut sql = format!(
            "SELECT {} FROM games WHERE provider = ?1 AND league_id = ?2 AND season_id = ?3",
            Self::GAME_COLS
        );
        if only_final {
            sql.push_str(" AND status = 'FINAL'");
        }
        sql.push_str(" ORDER BY start_time");
        if let Some(limit) = max_games {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let games = stmt
            .query_map(
                params![provider.code(), league_id, season_id],
                Self::row_to_game,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(games)
    }

    // ==================== Team Game Stats ====================

    fn row_to_team_game_stats(row: &rusqlite::Row) -> rusqlite::Result<TeamGameStats> {
        Ok(TeamGameStats {
            id: row.get(0)?,
            game_id: GameId(row.get(1)?),
            team_id: TeamId(row.get(2)?),
            is_home: row.get(3)?,
            score: row.get(4)?,
            yards_total: row.get(5)?,
            turnovers: row.get(6)?,
            stats_json: row.get(7)?,
        })
    }

    const TGS_COLS: &'static str =
        "id, game_id, team_id, is_home, score, yards_total, turnovers, stats_json";

    pub fn find_team_game_stats(
        &self,
        game_id: GameId,
        team_id: TeamId,
    ) -> Result<Option<TeamGameStats>> {
        let stats = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM team_game_stats WHERE game_id = ?1 AND team_id = ?2",
                    Self::TGS_COLS
                ),
                params![game_id.0, team_id.0],
                Self::row_to_team_game_stats,
            )
            .optional()?;
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_team_game_stats(
        &self,
        game_id: GameId,
        team_id: TeamId,
        is_home: bool,
        score: Option<i64>,
        yards_total: Option<i64>,
        turnovers: Option<i64>,
        stats_json: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO team_game_stats (game_id, team_id, is_home, score, yards_total,
                                          turnovers, stats_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![game_id.0, team_id.0, is_home, score, yards_total, turnovers, stats_json],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_team_game_stats(
        &self,
        id: i64,
        is_home: bool,
        score: Option<i64>,
        yards_total: Option<i64>,
        turnovers: Option<i64>,
        stats_json: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE team_game_stats SET is_home = ?1, score = ?2, yards_total = ?3,
                                        turnovers = ?4, stats_json = ?5
             WHERE id = ?6",
            params![is_home, score, yards_total, turnovers, stats_json, id],
        )?;
        Ok(())
    }

    /// All stats rows for a season's games
    pub fn season_team_game_stats(
        &self,
        league_id: i64,
        season_id: i64,
    ) -> Result<Vec<TeamGameStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.game_id, s.team_id, s.is_home, s.score, s.yards_total,
                    s.turnovers, s.stats_json
             FROM team_game_stats s
             JOIN games g ON g.id = s.game_id
             WHERE g.league_id = ?1 AND g.season_id = ?2",
        )?;
        let rows = stmt
            .query_map(params![league_id, season_id], Self::row_to_team_game_stats)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Games that already have stats rows for every participant.
    ///
    /// Used by the season stats batch to skip provider calls on reruns.
    pub fn games_with_complete_stats(
        &self,
        league_id: i64,
        season_id: i64,
        participants_per_game: i64,
    ) -> Result<HashSet<GameId>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.game_id
             FROM team_game_stats s
             JOIN games g ON g.id = s.game_id
             WHERE g.league_id = ?1 AND g.season_id = ?2
             GROUP BY s.game_id
             HAVING COUNT(s.id) >= ?3",
        )?;
        let ids = stmt
            .query_map(params![league_id, season_id, participants_per_game], |row| {
                Ok(GameId(row.get(0)?))
            })?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    // ==================== Team Game State ====================

    pub fn existing_state_keys(&self, season_id: i64) -> Result<HashSet<(TeamId, GameId)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT team_id, game_id FROM team_game_states WHERE season_id = ?1")?;
        let keys = stmt
            .query_map(params![season_id], |row| {
                Ok((TeamId(row.get(0)?), GameId(row.get(1)?)))
            })?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(keys)
    }

    pub fn delete_states_for_season(&self, season_id: i64) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM team_game_states WHERE season_id = ?1",
            params![season_id],
        )?;
        Ok(deleted)
    }

    /// Insert or overwrite the state row for (team, game).
    ///
    /// Returns true when a new row was created, false when an existing row
    /// was updated in place.
    pub fn upsert_team_game_state(&self, state: &TeamGameState) -> Result<bool> {
        let existed: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM team_game_states WHERE team_id = ?1 AND game_id = ?2",
                params![state.team_id.0, state.game_id.0],
                |row| row.get(0),
            )
            .optional()?;

        let created = existed.is_none();
        self.conn.execute(
            "INSERT INTO team_game_states (
                 team_id, game_id, season_id, start_time, week, games_played, rest_days,
                 games_l3, games_l5,
                 off_pts_l3, off_pts_l5, off_pts_season,
                 off_diff_l3, off_diff_l5, off_diff_season,
                 off_yards_l3, off_yards_l5, off_yards_season,
                 off_turnovers_l3, off_turnovers_l5, off_turnovers_season,
                 def_pa_l3, def_pa_l5, def_pa_season,
                 def_diff_l3, def_diff_l5, def_diff_season,
                 def_yards_allowed_l3, def_yards_allowed_l5, def_yards_allowed_season,
                 def_takeaways_l3, def_takeaways_l5, def_takeaways_season)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                     ?31, ?32, ?33)
             ON CONFLICT(team_id, game_id) DO UPDATE SET
                 season_id = excluded.season_id,
                 start_time = excluded.start_time,
                 week = excluded.week,
                 games_played = excluded.games_played,
                 rest_days = excluded.rest_days,
                 games_l3 = excluded.games_l3,
                 games_l5 = excluded.games_l5,
                 off_pts_l3 = excluded.off_pts_l3,
                 off_pts_l5 = excluded.off_pts_l5,
                 off_pts_season = excluded.off_pts_season,
                 off_diff_l3 = excluded.off_diff_l3,
                 off_diff_l5 = excluded.off_diff_l5,
                 off_diff_season = excluded.off_diff_season,
                 off_yards_l3 = excluded.off_yards_l3,
                 off_yards_l5 = excluded.off_yards_l5,
                 off_yards_season = excluded.off_yards_season,
                 off_turnovers_l3 = excluded.off_turnovers_l3,
                 off_turnovers_l5 = excluded.off_turnovers_l5,
                 off_turnovers_season = excluded.off_turnovers_season,
                 def_pa_l3 = excluded.def_pa_l3,
                 def_pa_l5 = excluded.def_pa_l5,
                 def_pa_season = excluded.def_pa_season,
                 def_diff_l3 = excluded.def_diff_l3,
                 def_diff_l5 = excluded.def_diff_l5,
                 def_diff_season = excluded.def_diff_season,
                 def_yards_allowed_l3 = excluded.def_yards_allowed_l3,
                 def_yards_allowed_l5 = excluded.def_yards_allowed_l5,
                 def_yards_allowed_season = excluded.def_yards_allowed_season,
                 def_takeaways_l3 = excluded.def_takeaways_l3,
                 def_takeaways_l5 = excluded.def_takeaways_l5,
                 def_takeaways_season = excluded.def_takeaways_season",
            params![
                state.team_id.0,
                state.game_id.0,
                state.season_id,
                dt_to_sql(state.start_time),
                state.week,
                state.games_played,
                state.rest_days,
                state.games_l3,
                state.games_l5,
                state.off_pts_l3,
                state.off_pts_l5,
                state.off_pts_season,
                state.off_diff_l3,
                state.off_diff_l5,
                state.off_diff_season,
                state.off_yards_l3,
                state.off_yards_l5,
                state.off_yards_season,
                state.off_turnovers_l3,
                state.off_turnovers_l5,
                state.off_turnovers_season,
                state.def_pa_l3,
                state.def_pa_l5,
                state.def_pa_season,
                state.def_diff_l3,
                state.def_diff_l5,
                state.def_diff_season,
                state.def_yards_allowed_l3,
                state.def_yards_allowed_l5,
                state.def_yards_allowed_season,
                state.def_takeaways_l3,
                state.def_takeaways_l5,
                state.def_takeaways_season,
            ],
        )?;
        Ok(created)
    }

    /// Load one state row (used by tests and the status command)
    pub fn find_team_game_state(
        &self,
        team_id: TeamId,
        game_id: GameId,
    ) -> Result<Option<TeamGameState>> {
        let state = self
            .conn
            .query_row(
                "SELECT team_id, game_id, season_id, start_time, week, games_played, rest_days,
                        games_l3, games_l5,
                        off_pts_l3, off_pts_l5, off_pts_season,
                        off_diff_l3, off_diff_l5, off_diff_season,
                        off_yards_l3, off_yards_l5, off_yards_season,
                        off_turnovers_l3, off_turnovers_l5, off_turnovers_season,
                        def_pa_l3, def_pa_l5, def_pa_season,
                        def_diff_l3, def_diff_l5, def_diff_season,
                        def_yards_allowed_l3, def_yards_allowed_l5, def_yards_allowed_season,
                        def_takeaways_l3, def_takeaways_l5, def_takeaways_season
                 FROM team_game_states WHERE team_id = ?1 AND game_id = ?2",
                params![team_id.0, game_id.0],
                |row| {
                    let start_time: String = row.get(3)?;
                    Ok(TeamGameState {
                        team_id: TeamId(row.get(0)?),
                        game_id: GameId(row.get(1)?),
                        season_id: row.get(2)?,
                        start_time: dt_from_sql(&start_time)?,
                        week: row.get(4)?,
                        games_played: row.get(5)?,
                        rest_days: row.get(6)?,
                        games_l3: row.get(7)?,
                        games_l5: row.get(8)?,
                        off_pts_l3: row.get(9)?,
                        off_pts_l5: row.get(10)?,
                        off_pts_season: row.get(11)?,
                        off_diff_l3: row.get(12)?,
                        off_diff_l5: row.get(13)?,
                        off_diff_season: row.get(14)?,
                        off_yards_l3: row.get(15)?,
                        off_yards_l5: row.get(16)?,
                        off_yards_season: row.get(17)?,
                        off_turnovers_l3: row.get(18)?,
                        off_turnovers_l5: row.get(19)?,
                        off_turnovers_season: row.get(20)?,
                        def_pa_l3: row.get(21)?,
                        def_pa_l5: row.get(22)?,
                        def_pa_season: row.get(23)?,
                        def_diff_l3: row.get(24)?,
                        def_diff_l5: row.get(25)?,
                        def_diff_season: row.get(26)?,
                        def_yards_allowed_l3: row.get(27)?,
                        def_yards_allowed_l5: row.get(28)?,
                        def_yards_allowed_season: row.get(29)?,
                        def_takeaways_l3: row.get(30)?,
                        def_takeaways_l5: row.get(31)?,
                        def_takeaways_season: row.get(32)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    // ==================== Books & Odds ====================

    pub fn all_books(&self) -> Result<Vec<Book>> {
        let mut stmt = self.conn.prepare("SELECT id, key, name FROM books")?;
        let books = stmt
            .query_map([], |row| {
                Ok(Book {
                    id: row.get(0)?,
                    key: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(books)
    }

    pub fn find_book_by_key(&self, key: &str) -> Result<Option<Book>> {
        let book = self
            .conn
            .query_row(
                "SELECT id, key, name FROM books WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Book {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(book)
    }

    pub fn insert_book(&self, key: &str, name: &str) -> Result<Book> {
        self.conn.execute(
            "INSERT INTO books (key, name) VALUES (?1, ?2)",
            params![key, name],
        )?;
        Ok(Book {
            id: self.conn.last_insert_rowid(),
            key: key.to_string(),
            name: name.to_string(),
        })
    }

    pub fn update_book_name(&self, id: i64, name: &str) -> Result<()> {
        self.conn
            .execute("UPDATE books SET name = ?1 WHERE id = ?2", params![name, id])?;
        Ok(())
    }

    pub fn odds_snapshot_exists(
        &self,
        game_id: GameId,
        book_id: i64,
        market_type: MarketType,
        side_type: SideType,
        captured_at: DateTime<Utc>,
    ) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM odds_snapshots
                 WHERE game_id = ?1 AND book_id = ?2 AND market_type = ?3
                   AND side_type = ?4 AND captured_at = ?5",
                params![
                    game_id.0,
                    book_id,
                    market_type.code(),
                    side_type.code(),
                    dt_to_sql(captured_at)
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_odds_snapshot(&self, snapshot: &OddsSnapshot) -> Result<()> {
        self.conn.execute(
            "INSERT INTO odds_snapshots (game_id, book_id, captured_at, market_type, side_type,
                                         line, price, is_closing, provider)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snapshot.game_id.0,
                snapshot.book_id,
                dt_to_sql(snapshot.captured_at),
                snapshot.market_type.code(),
                snapshot.side_type.code(),
                snapshot.line,
                snapshot.price,
                snapshot.is_closing,
                snapshot.provider.code(),
            ],
        )?;
        Ok(())
    }

    // ==================== Payload Audit ====================

    pub fn insert_ingested_payload(
        &self,
        provider: Provider,
        entity_type: &str,
        entity_key: &str,
        fetched_at: DateTime<Utc>,
        payload_json: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ingested_payloads (provider, entity_type, entity_key, fetched_at,
                                            payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![provider.code(), entity_type, entity_key, dt_to_sql(fetched_at), payload_json],
        )?;
        Ok(())
    }

    // ==================== Statistics ====================

    /// Row counts for the status command
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };

        let earliest: Option<String> = self
            .conn
            .query_row("SELECT MIN(start_time) FROM games", [], |row| row.get(0))
            .optional()?
            .flatten();
        let latest: Option<String> = self
            .conn
            .query_row("SELECT MAX(start_time) FROM games", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(DatabaseStats {
            league_count: count("leagues")?,
            team_count: count("teams")?,
            game_count: count("games")?,
            team_game_stats_count: count("team_game_stats")?,
            team_game_state_count: count("team_game_states")?,
            odds_snapshot_count: count("odds_snapshots")?,
            earliest_game: earliest.as_deref().and_then(|s| dt_from_sql(s).ok()),
            latest_game: latest.as_deref().and_then(|s| dt_from_sql(s).ok()),
        })
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub league_count: usize,
    pub team_count: usize,
    pub game_count: usize,
    pub team_game_stats_count: usize,
    pub team_game_state_count: usize,
    pub odds_snapshot_count: usize,
    pub earliest_game: Option<DateTime<Utc>>,
    pub latest_game: Option<DateTime<Utc>>,
}
