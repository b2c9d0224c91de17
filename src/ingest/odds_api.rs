//! The Odds API client and event parsing

use crate::ingest::http::HttpClient;
use crate::text::normalize_team_alias;
use crate::{MarketType, OddsValueError, Result, SideType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashSet;

/// Parse a "2025-09-07T17:00:00Z" style timestamp
pub fn parse_iso_z(value: &str) -> Result<DateTime<Utc>> {
    let v = value.trim();
    DateTime::parse_from_rfc3339(v)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OddsValueError::Parse(format!("Invalid timestamp {:?}: {}", v, e)))
}

fn iso_z(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One historical snapshot from the provider's time machine endpoint
#[derive(Debug, Clone)]
pub struct HistoricalOddsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub next_timestamp: Option<DateTime<Utc>>,
    pub items: Vec<Value>,
}

pub struct OddsApiClient {
    http: HttpClient,
    api_key: String,
}

impl OddsApiClient {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        Ok(OddsApiClient {
            http: HttpClient::new(base_url)?,
            api_key,
        })
    }

    /// Historical odds as of `date`.
    ///
    /// The response wraps the event list in an object carrying the actual
    /// snapshot timestamp, which may differ from the requested date.
    pub fn get_historical_odds(
        &self,
        sport_key: &str,
        regions: &str,
        markets: &[String],
        date: DateTime<Utc>,
        bookmakers: Option<&[String]>,
    ) -> Result<HistoricalOddsSnapshot> {
        let mut params = vec![
            ("apiKey", self.api_key.clone()),
            ("regions", regions.to_string()),
            ("markets", markets.join(",")),
            ("oddsFormat", "american".to_string()),
            ("date", iso_z(date)),
        ];
        if let Some(books) = bookmakers.filter(|b| !b.is_empty()) {
            params.push(("bookmakers", books.join(",")));
        }

        let path = format!("/historical/sports/{}/odds", sport_key);
        let (payload, _headers) = self.http.get_json_with_headers(&path, &params, &[])?;

        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .map(parse_iso_z)
            .transpose()?
            .ok_or_else(|| {
                OddsValueError::Parse(
                    "Historical odds response missing/invalid timestamp".to_string(),
                )
            })?;
        let previous_timestamp = payload
            .get("previous_timestamp")
            .and_then(Value::as_str)
            .and_then(|s| parse_iso_z(s).ok());
        let next_timestamp = payload
            .get("next_timestamp")
            .and_then(Value::as_str)
            .and_then(|s| parse_iso_z(s).ok());

        let items = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                OddsValueError::Parse(
                    "Historical odds response missing/invalid data list".to_string(),
                )
            })?
            .iter()
            .filter(|v| v.is_object())
            .cloned()
            .collect();

        Ok(HistoricalOddsSnapshot {
            timestamp,
            previous_timestamp,
            next_timestamp,
            items,
        })
    }
}

/// One book/market/side quote parsed out of an event item
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSnapshot {
    pub book_key: String,
    pub book_name: String,
    pub market_type: MarketType,
    pub side_type: SideType,
    pub line: Option<f64>,
    pub price: i64,
}

/// Parse one event item into book/market snapshots.
///
/// The event's home/away names must resolve through the expected alias norm
/// sets, otherwise the whole event is rejected. Supported markets: h2h
/// (moneyline), spreads, totals.
pub fn parse_event_bookmaker_snapshots(
    event_item: &Value,
    expected_home_norms: &HashSet<String>,
    expected_away_norms: &HashSet<String>,
) -> Vec<ParsedSnapshot> {
    let mut parsed = Vec::new();

    let (Some(home_team), Some(away_team)) = (
        event_item.get("home_team").and_then(Value::as_str),
        event_item.get("away_team").and_then(Value::as_str),
    ) else {
        return parsed;
    };

    if !expected_home_norms.contains(&normalize_team_alias(home_team))
        || !expected_away_norms.contains(&normalize_team_alias(away_team))
    {
        return parsed;
    }

    let Some(bookmakers) = event_item.get("bookmakers").and_then(Value::as_array) else {
        return parsed;
    };

    for book in bookmakers {
        let (Some(book_key), Some(book_name)) = (
            book.get("key").and_then(Value::as_str),
            book.get("title").and_then(Value::as_str),
        ) else {
            continue;
        };
        let Some(markets) = book.get("markets").and_then(Value::as_array) else {
            continue;
        };

        for market in markets {
            let Some(market_key) = market.get("key").and_then(Value::as_str) else {
                continue;
            };
            let Some(outcomes) = market.get("outcomes").and_then(Value::as_array) else {
                continue;
            };

            for outcome in outcomes {
                let (Some(name), Some(price)) = (
                    outcome.get("name").and_then(Value::as_str),
                    outcome.get("price").and_then(Value::as_i64),
                ) else {
                    continue;
                };
                let point = outcome.get("point").and_then(Value::as_f64);

                let (market_type, side_type, line) = match market_key {
                    "h2h" => {
                        let Some(side) =
                            team_side(name, expected_home_norms, expected_away_norms)
                        else {
                            continue;
                        };
                        (MarketType::Moneyline, side, None)
                    }
                    "spreads" => {
                        let Some(point) = point else { continue };
                        let Some(side) =
                            team_side(name, expected_home_norms, expected_away_norms)
                        else {
                            continue;
                        };
                        (MarketType::Spread, side, Some(point))
                    }
                    "totals" => {
                        let Some(point) = point else { continue };
                        let side = match name.trim().to_lowercase().as_str() {
                            "over" => SideType::Over,
                            "under" => SideType::Under,
                            _ => continue,
                        };
                        (MarketType::Total, side, Some(point))
                    }
                    _ => continue,
                };

                parsed.push(ParsedSnapshot {
                    book_key: book_key.to_string(),
                    book_name: book_name.to_string(),
                    market_type,
                    side_type,
                    line,
                    price,
                });
            }
        }
    }

    parsed
}

fn team_side(
    name: &str,
    expected_home_norms: &HashSet<String>,
    expected_away_norms: &HashSet<String>,
) -> Option<SideType> {
    let norm = normalize_team_alias(name);
    if expected_home_norms.contains(&norm) {
        Some(SideType::Home)
    } else if expected_away_norms.contains(&norm) {
        Some(SideType::Away)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norms(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| normalize_team_alias(n)).collect()
    }

    fn event() -> Value {
        json!({
            "id": "abc123",
            "commence_time": "2025-09-07T17:00:00Z",
            "home_team": "Philadelphia Eagles",
            "away_team": "Cincinnati Bengals",
            "bookmakers": [{
                "key": "draftkings",
                "title": "DraftKings",
                "markets": [
                    {
                        "key": "h2h",
                        "outcomes": [
                            {"name": "Philadelphia Eagles", "price": -150},
                            {"name": "Cincinnati Bengals", "price": 130},
                        ],
                    },
                    {
                        "key": "spreads",
                        "outcomes": [
                            {"name": "Philadelphia Eagles", "price": -110, "point": -3.5},
                            {"name": "Cincinnati Bengals", "price": -110, "point": 3.5},
                        ],
                    },
                    {
                        "key": "totals",
                        "outcomes": [
                            {"name": "Over", "price": -105, "point": 47.5},
                            {"name": "Under", "price": -115, "point": 47.5},
                        ],
                    },
                ],
            }],
        })
    }

    #[test]
    fn test_parses_all_three_markets() {
        let parsed = parse_event_bookmaker_snapshots(
            &event(),
            &norms(&["Philadelphia Eagles"]),
            &norms(&["Cincinnati Bengals"]),
        );
        assert_eq!(parsed.len(), 6);

        let ml_home = parsed
            .iter()
            .find(|p| p.market_type == MarketType::Moneyline && p.side_type == SideType::Home)
            .unwrap();
        assert_eq!(ml_home.price, -150);
        assert_eq!(ml_home.line, None);

        let spread_away = parsed
            .iter()
            .find(|p| p.market_type == MarketType::Spread && p.side_type == SideType::Away)
            .unwrap();
        assert_eq!(spread_away.line, Some(3.5));

        let total_under = parsed
            .iter()
            .find(|p| p.market_type == MarketType::Total && p.side_type == SideType::Under)
            .unwrap();
        assert_eq!(total_under.line, Some(47.5));
        assert_eq!(total_under.price, -115);
        assert_eq!(total_under.book_key, "draftkings");
    }

    #[test]
    fn test_rejects_event_with_unexpected_teams() {
        let parsed = parse_event_bookmaker_snapshots(
            &event(),
            &norms(&["Dallas Cowboys"]),
            &norms(&["Cincinnati Bengals"]),
        );
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_alias_norm_resolves_name_variants() {
        // The alias set can carry historical or punctuation variants.
        let parsed = parse_event_bookmaker_snapshots(
            &event(),
            &norms(&["Philadelphia  Eagles!"]),
            &norms(&["cincinnati bengals"]),
        );
        assert_eq!(parsed.len(), 6);
    }

    #[test]
    fn test_spread_without_point_is_dropped() {
        let ev = json!({
            "home_team": "Philadelphia Eagles",
            "away_team": "Cincinnati Bengals",
            "bookmakers": [{
                "key": "fanduel",
                "title": "FanDuel",
                "markets": [{
                    "key": "spreads",
                    "outcomes": [{"name": "Philadelphia Eagles", "price": -110}],
                }],
            }],
        });
        let parsed = parse_event_bookmaker_snapshots(
            &ev,
            &norms(&["Philadelphia Eagles"]),
            &norms(&["Cincinnati Bengals"]),
        );
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_parse_iso_z() {
        let dt = parse_iso_z("2025-09-07T17:00:00Z").unwrap();
        assert_eq!(iso_z(dt), "2025-09-07T17:00:00Z");
        assert!(parse_iso_z("garbage").is_err());
    }
}
