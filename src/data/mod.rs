//! Data storage and seeding

pub mod database;
pub mod seed;

pub use database::{Database, DatabaseStats};
