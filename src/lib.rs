//! NFL odds-value pipeline
//!
//! Ingests schedule/score/statistics data and betting-market odds into a local
//! SQLite store, then derives pre-game ("as of kickoff") team state features
//! with strict temporal leakage prevention.

pub mod calendar;
pub mod data;
pub mod features;
pub mod ingest;
pub mod text;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a canonical team row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamId(pub i64);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Team({})", self.0)
    }
}

/// Unique identifier for a game row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameId(pub i64);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Game({})", self.0)
    }
}

/// External data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    ApiSports,
    OddsApi,
}

impl Provider {
    pub fn code(&self) -> &'static str {
        match self {
            Provider::ApiSports => "api_sports",
            Provider::OddsApi => "odds_api",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "api_sports" => Some(Provider::ApiSports),
            "odds_api" => Some(Provider::OddsApi),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Canonical game status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
    Canceled,
    Unknown,
}

impl GameStatus {
    pub fn code(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "SCHEDULED",
            GameStatus::InProgress => "IN_PROGRESS",
            GameStatus::Final => "FINAL",
            GameStatus::Postponed => "POSTPONED",
            GameStatus::Canceled => "CANCELED",
            GameStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "SCHEDULED" => GameStatus::Scheduled,
            "IN_PROGRESS" => GameStatus::InProgress,
            "FINAL" => GameStatus::Final,
            "POSTPONED" => GameStatus::Postponed,
            "CANCELED" => GameStatus::Canceled,
            _ => GameStatus::Unknown,
        }
    }

    /// Map an API-Sports status short-code to the canonical status.
    ///
    /// Unrecognized codes count as in-progress (the provider uses many
    /// quarter/halftime codes); a missing code is unknown.
    pub fn from_provider_short(short: Option<&str>) -> Self {
        let Some(short) = short else {
            return GameStatus::Unknown;
        };
        match short.to_uppercase().as_str() {
            "NS" => GameStatus::Scheduled,
            "FT" | "AOT" | "FINAL" => GameStatus::Final,
            "PST" | "PPD" => GameStatus::Postponed,
            "CANC" | "CAN" | "ABD" => GameStatus::Canceled,
            "" => GameStatus::Unknown,
            _ => GameStatus::InProgress,
        }
    }
}

/// Betting market type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketType {
    Spread,
    Total,
    Moneyline,
}

impl MarketType {
    pub fn code(&self) -> &'static str {
        match self {
            MarketType::Spread => "SPREAD",
            MarketType::Total => "TOTAL",
            MarketType::Moneyline => "MONEYLINE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "SPREAD" => Some(MarketType::Spread),
            "TOTAL" => Some(MarketType::Total),
            "MONEYLINE" => Some(MarketType::Moneyline),
            _ => None,
        }
    }
}

/// Side of a market: home/away for spreads and moneylines, over/under for totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideType {
    Home,
    Away,
    Over,
    Under,
}

impl SideType {
    pub fn code(&self) -> &'static str {
        match self {
            SideType::Home => "HOME",
            SideType::Away => "AWAY",
            SideType::Over => "OVER",
            SideType::Under => "UNDER",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "HOME" => Some(SideType::Home),
            "AWAY" => Some(SideType::Away),
            "OVER" => Some(SideType::Over),
            "UNDER" => Some(SideType::Under),
            _ => None,
        }
    }
}

/// A league (e.g. NFL)
#[derive(Debug, Clone)]
pub struct League {
    pub id: i64,
    pub league_key: String,
    pub name: String,
}

/// One season of a league
#[derive(Debug, Clone)]
pub struct Season {
    pub id: i64,
    pub league_id: i64,
    pub year: i32,
    pub name: String,
}

/// A canonical franchise within a league
#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    pub league_id: i64,
    pub provider_team_id: String,
    pub name: String,
    pub logo_url: Option<String>,
    pub is_active: bool,
}

/// A venue a game is played at
#[derive(Debug, Clone)]
pub struct Venue {
    pub id: i64,
    pub league_id: i64,
    pub name: String,
    pub city: Option<String>,
}

/// A sporting event, upserted on every provider sighting.
///
/// Key fields are nullable because providers occasionally publish incomplete
/// records; downstream consumers must skip games missing them.
#[derive(Debug, Clone)]
pub struct Game {
    pub id: GameId,
    pub league_id: i64,
    pub season_id: i64,
    pub provider: Provider,
    pub provider_game_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub status: GameStatus,
    pub home_team_id: Option<TeamId>,
    pub away_team_id: Option<TeamId>,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub venue_id: Option<i64>,
    pub source_last_seen_at: Option<DateTime<Utc>>,
}

/// Observed final statistics for one team in one game
#[derive(Debug, Clone)]
pub struct TeamGameStats {
    pub id: i64,
    pub game_id: GameId,
    pub team_id: TeamId,
    pub is_home: bool,
    pub score: Option<i64>,
    pub yards_total: Option<i64>,
    pub turnovers: Option<i64>,
    pub stats_json: Option<String>,
}

/// A bookmaker
#[derive(Debug, Clone)]
pub struct Book {
    pub id: i64,
    pub key: String,
    pub name: String,
}

/// One market quote from one book at one capture time
#[derive(Debug, Clone)]
pub struct OddsSnapshot {
    pub game_id: GameId,
    pub book_id: i64,
    pub captured_at: DateTime<Utc>,
    pub market_type: MarketType,
    pub side_type: SideType,
    pub line: Option<f64>,
    pub price: i64,
    pub is_closing: bool,
    pub provider: Provider,
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum OddsValueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("provider rate limited the request (HTTP 429)")]
    RateLimited,

    #[error("provider returned errors: {0}")]
    ProviderResponse(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(
        "provider team mapping conflict: provider_team_id={provider_team_id} \
         mapped_team_id={mapped_team_id} existing_team_id={existing_team_id}"
    )]
    MappingConflict {
        provider_team_id: String,
        mapped_team_id: i64,
        existing_team_id: i64,
    },

    #[error("timestamp outside the {season_year} regular season window")]
    WeekOutOfRange { season_year: i32 },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OddsValueError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub api_sports: ApiSportsConfig,
    pub odds_api: OddsApiConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSportsConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsApiConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Keep raw provider payloads in the ingested_payloads audit table
    pub store_ingested_payloads: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                database_path: "data/oddsvalue.db".to_string(),
            },
            api_sports: ApiSportsConfig {
                base_url: "https://v1.american-football.api-sports.io".to_string(),
            },
            odds_api: OddsApiConfig {
                base_url: "https://api.the-odds-api.com/v4".to_string(),
            },
            ingest: IngestConfig {
                store_ingested_payloads: true,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OddsValueError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| OddsValueError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OddsValueError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// API-Sports key, from the environment only (never from config.toml)
    pub fn require_api_sports_key(&self) -> Result<String> {
        std::env::var("API_SPORTS_KEY").map_err(|_| {
            OddsValueError::Config("API_SPORTS_KEY is not set in the environment".to_string())
        })
    }

    /// The Odds API key, from the environment only
    pub fn require_odds_api_key(&self) -> Result<String> {
        std::env::var("ODDS_API_KEY").map_err(|_| {
            OddsValueError::Config("ODDS_API_KEY is not set in the environment".to_string())
        })
    }
}
