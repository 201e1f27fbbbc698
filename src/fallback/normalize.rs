//! Secondary Payload Normalization
//!
//! Accepted shapes:
//! - `{"events": [...]}` (TheSportsDB event list)
//! - `{"games": [...]}` (canonical records)
//! - a bare array of canonical records
//!
//! A record that cannot be normalized is logged and skipped; it never sinks
//! the rest of the payload.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{is_season_tag, parse_timestamp, Record, RecordPayload, Team};

/// Team ids derived from TheSportsDB ids are cut to this many characters.
const TEAM_ID_MAX_CHARS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<Record>,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodablePayload(pub String);

impl std::fmt::Display for UndecodablePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "undecodable secondary payload: {}", self.0)
    }
}

impl std::error::Error for UndecodablePayload {}

pub fn normalize_body(body: &str, trace_id: &str) -> Result<Normalized, UndecodablePayload> {
    let value: Value = serde_json::from_str(body).map_err(|e| UndecodablePayload(e.to_string()))?;
    Ok(normalize_value(value, trace_id))
}

pub fn normalize_value(value: Value, trace_id: &str) -> Normalized {
    let (items, sportsdb) = match value {
        Value::Object(mut map) => {
            if map.contains_key("events") {
                (take_list(&mut map, "events"), true)
            } else {
                (take_list(&mut map, "games"), false)
            }
        }
        Value::Array(items) => (items, false),
        _ => (Vec::new(), false),
    };

    let mut normalized = Normalized::default();
    for (index, item) in items.iter().enumerate() {
        let converted = if sportsdb {
            from_sportsdb_event(item)
        } else {
            from_canonical(item)
        };
        match converted {
            Ok(record) => normalized.records.push(record),
            Err(e) => {
                normalized.skipped += 1;
                warn!(trace_id, index, error = %e, "⚠️ skipping secondary record");
            }
        }
    }
    normalized
}

fn take_list(map: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match map.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn from_canonical(item: &Value) -> Result<Record, String> {
    let payload = RecordPayload::from_value(item.clone());
    Record::from_payload(&payload).map_err(|e| e.to_string())
}

/// Map one TheSportsDB event onto the canonical record.
pub fn from_sportsdb_event(event: &Value) -> Result<Record, String> {
    let event = event.as_object().ok_or("event is not an object")?;

    let id = scalar(event, "idEvent").ok_or("missing idEvent")?;

    let raw_time = scalar(event, "strTimestamp")
        .or_else(|| scalar(event, "dateEvent"))
        .ok_or("missing event date")?;
    let scheduled = parse_timestamp(&raw_time).ok_or_else(|| format!("unparseable event date {:?}", raw_time))?;

    let season = match scalar(event, "strSeason").and_then(|s| season_from_label(&s)) {
        Some(season) => season,
        None => season_for(scheduled),
    };

    let mut record = Record {
        external_id: format!("tsdb-{}", id),
        home_team: sportsdb_team(event, "idHomeTeam", "strHomeTeam", "home", "Home Team"),
        away_team: sportsdb_team(event, "idAwayTeam", "strAwayTeam", "away", "Away Team"),
        scheduled_at: scheduled.to_rfc3339_opts(SecondsFormat::Secs, true),
        season,
        game_type: "regular".to_string(),
        status: scalar(event, "strStatus").map(|s| s.to_lowercase()),
        home_stats: None,
        away_stats: None,
    };
    record.canonicalize();
    record.check().map_err(|e| e.to_string())?;
    Ok(record)
}

fn sportsdb_team(
    event: &Map<String, Value>,
    id_key: &str,
    name_key: &str,
    default_id: &str,
    default_name: &str,
) -> Team {
    let id = scalar(event, id_key).unwrap_or_else(|| default_id.to_string());
    let name = scalar(event, name_key).unwrap_or_else(|| default_name.to_string());
    let city = name.split_whitespace().last().unwrap_or(default_id).to_string();
    Team {
        id: id.chars().take(TEAM_ID_MAX_CHARS).collect::<String>().to_lowercase(),
        name,
        city,
    }
}

/// Non-empty string or number field as a trimmed string.
fn scalar(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `2024-25` or `2024-2025` → `2024-25`.
fn season_from_label(label: &str) -> Option<String> {
    if is_season_tag(label) {
        return Some(label.to_string());
    }
    let (start, end) = label.split_once('-')?;
    let start_year: i32 = start.parse().ok()?;
    let end_year: i32 = end.parse().ok()?;
    (start.len() == 4 && end.len() == 4 && end_year == start_year + 1)
        .then(|| format!("{}-{:02}", start_year, end_year % 100))
}

/// Seasons start in July: a January 2025 game belongs to `2024-25`.
pub fn season_for(at: DateTime<Utc>) -> String {
    let start = if at.month() < 7 { at.year() - 1 } else { at.year() };
    format!("{}-{:02}", start, (start + 1) % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event() -> Value {
        json!({
            "idEvent": "1032723",
            "idHomeTeam": "134867",
            "strHomeTeam": "Los Angeles Lakers",
            "idAwayTeam": 134860,
            "strAwayTeam": "Boston Celtics",
            "strTimestamp": "2025-01-15T19:30:00",
            "dateEvent": "2025-01-15",
            "strSeason": "2024-2025",
            "strStatus": "Not Started"
        })
    }

    #[test]
    fn test_sportsdb_event_mapping() {
        let record = from_sportsdb_event(&event()).unwrap();
        assert_eq!(record.external_id, "tsdb-1032723");
        assert_eq!(record.home_team.id, "134867");
        assert_eq!(record.home_team.city, "Lakers");
        assert_eq!(record.away_team.id, "134860");
        assert_eq!(record.scheduled_at, "2025-01-15T19:30:00Z");
        assert_eq!(record.season, "2024-25");
        assert_eq!(record.status.as_deref(), Some("not started"));
        assert_eq!(record.game_type, "regular");
    }

    #[test]
    fn test_sportsdb_date_only_and_derived_season() {
        let mut value = event();
        let map = value.as_object_mut().unwrap();
        map.remove("strTimestamp");
        map.remove("strSeason");
        map.insert("dateEvent".into(), json!("2024-11-02"));

        let record = from_sportsdb_event(&value).unwrap();
        assert_eq!(record.scheduled_at, "2024-11-02T00:00:00Z");
        assert_eq!(record.season, "2024-25");
    }

    #[test]
    fn test_sportsdb_event_without_date_is_rejected() {
        let mut value = event();
        let map = value.as_object_mut().unwrap();
        map.remove("strTimestamp");
        map.remove("dateEvent");
        assert!(from_sportsdb_event(&value).is_err());
    }

    #[test]
    fn test_season_for() {
        assert_eq!(season_for(Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()), "2024-25");
        assert_eq!(season_for(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()), "2025-26");
        assert_eq!(season_for(Utc.with_ymd_and_hms(2099, 10, 1, 0, 0, 0).unwrap()), "2099-00");
    }

    #[test]
    fn test_season_labels() {
        assert_eq!(season_from_label("2023-24").as_deref(), Some("2023-24"));
        assert_eq!(season_from_label("2023-2024").as_deref(), Some("2023-24"));
        assert_eq!(season_from_label("2023-2025"), None);
        assert_eq!(season_from_label("2023"), None);
    }

    #[test]
    fn test_mixed_payload_skips_bad_records() {
        let body = json!({
            "games": [
                {
                    "external_id": "nba-2024-001",
                    "home_team": {"id": "lal", "name": "Lakers", "city": "Los Angeles"},
                    "away_team": {"id": "gsw", "name": "Warriors", "city": "Golden State"},
                    "scheduled_at": "2024-01-15T20:00:00Z",
                    "season": "2023-24"
                },
                {"external_id": "broken"},
                "not even an object"
            ]
        })
        .to_string();

        let normalized = normalize_body(&body, "trace").unwrap();
        assert_eq!(normalized.records.len(), 1);
        assert_eq!(normalized.skipped, 2);
    }

    #[test]
    fn test_shapes() {
        assert!(normalize_body("{\"events\": null}", "t").unwrap().records.is_empty());
        assert!(normalize_body("{\"unexpected\": []}", "t").unwrap().records.is_empty());
        assert_eq!(
            normalize_body(&json!({"events": [event()]}).to_string(), "t")
                .unwrap()
                .records
                .len(),
            1
        );
        assert!(normalize_body("{truncated", "t").is_err());
    }
}
