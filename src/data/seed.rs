//! Static provider reference data

use crate::data::Database;
use crate::{Provider, Result};
use log::info;

pub const NFL_LEAGUE_KEY: &str = "NFL";
pub const NFL_LEAGUE_NAME: &str = "National Football League";

/// API-Sports league id for the NFL on its american-football endpoint
pub const API_SPORTS_NFL_LEAGUE_ID: &str = "1";

/// Upsert the league rows and provider league mappings ingestion depends on.
///
/// Idempotent; run before any ingest command against a fresh database.
pub fn seed_provider_data(db: &Database) -> Result<()> {
    let league = db.upsert_league(NFL_LEAGUE_KEY, NFL_LEAGUE_NAME)?;
    db.upsert_provider_league(
        Provider::ApiSports,
        league.id,
        API_SPORTS_NFL_LEAGUE_ID,
        "NFL (API_SPORTS)",
    )?;
    info!("Seeded league {} (id={})", NFL_LEAGUE_KEY, league.id);
    Ok(())
}
