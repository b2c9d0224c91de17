//! Provider ingestion: HTTP clients, rate limiting, and upsert pipelines

pub mod api_sports;
pub mod dates;
pub mod http;
pub mod odds;
pub mod odds_api;
pub mod rate_limit;
pub mod season;
pub mod team_stats;
