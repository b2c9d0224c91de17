//! Provider timestamp parsing

use crate::{OddsValueError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Parse the API-Sports `game.date` field into a UTC timestamp.
///
/// The provider sends either an ISO string or a dict of
/// `{"date": "YYYY-MM-DD", "time": "HH:MM", "timestamp": 123}`. The epoch
/// timestamp wins when present; the date/time pair is treated as UTC.
pub fn parse_game_datetime(value: &Value, provider_game_id: &str) -> Result<DateTime<Utc>> {
    if let Some(obj) = value.as_object() {
        if let Some(ts) = obj.get("timestamp").and_then(Value::as_i64) {
            return Utc.timestamp_opt(ts, 0).single().ok_or_else(|| {
                OddsValueError::Parse(format!(
                    "Invalid game.date timestamp for provider_game_id={}: {}",
                    provider_game_id, ts
                ))
            });
        }

        let date_part = obj.get("date").and_then(Value::as_str);
        let time_part = obj
            .get("time")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or("00:00");
        let Some(date_part) = date_part else {
            return Err(OddsValueError::Parse(format!(
                "Missing/invalid game.date dict for provider_game_id={}: {}",
                provider_game_id, value
            )));
        };
        return parse_rfc3339(&format!("{}T{}:00+00:00", date_part, time_part), provider_game_id);
    }

    if let Some(s) = value.as_str() {
        return parse_rfc3339(&s.replace('Z', "+00:00"), provider_game_id);
    }

    Err(OddsValueError::Parse(format!(
        "Missing/invalid game.date for provider_game_id={}: {}",
        provider_game_id, value
    )))
}

fn parse_rfc3339(s: &str, provider_game_id: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            OddsValueError::Parse(format!(
                "Invalid game.date for provider_game_id={}: {} ({})",
                provider_game_id, s, e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_iso_string() {
        let dt = parse_game_datetime(&json!("2025-09-07T20:20:00Z"), "g1").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 9, 7, 20, 20, 0).unwrap());
    }

    #[test]
    fn test_parse_dict_prefers_timestamp() {
        let dt = parse_game_datetime(
            &json!({"date": "2025-09-07", "time": "20:20", "timestamp": 1757276400}),
            "g1",
        )
        .unwrap();
        assert_eq!(dt.timestamp(), 1757276400);
    }

    #[test]
    fn test_parse_dict_date_time_as_utc() {
        let dt = parse_game_datetime(&json!({"date": "2025-09-07", "time": "20:20"}), "g1").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 9, 7, 20, 20, 0).unwrap());

        // Missing time defaults to midnight.
        let dt = parse_game_datetime(&json!({"date": "2025-09-07"}), "g1").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 9, 7, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_game_datetime(&json!(null), "g1").is_err());
        assert!(parse_game_datetime(&json!({"time": "20:20"}), "g1").is_err());
        assert!(parse_game_datetime(&json!("not-a-date"), "g1").is_err());
    }
}
