//! Canonical event records
//!
//! `RecordPayload` is the record exactly as a source delivered it; the rule engine
//! only ever reads it. `Record` is the typed, contract-checked shape that signal
//! generation and persistence work with.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw record as received from a source. Never rewritten by validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordPayload(Map<String, Value>);

impl RecordPayload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Non-object values become an empty payload so every rule still reports on them.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self(fields),
            _ => Self::default(),
        }
    }

    #[inline]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Present and not JSON `null`.
    #[inline]
    pub fn has_value(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    /// Identifier used in logs and outcomes, `"unknown"` when absent.
    pub fn external_id(&self) -> String {
        match self.0.get("external_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "unknown".to_string(),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for RecordPayload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub city: String,
}

/// Season-to-date aggregates used by the heuristic signal producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    #[serde(default)]
    pub wins_last_5: u32,
    #[serde(default)]
    pub avg_points: Option<f64>,
    #[serde(default)]
    pub avg_allowed: Option<f64>,
    #[serde(default)]
    pub games_played: u32,
}

fn default_game_type() -> String {
    "regular".to_string()
}

/// Canonical event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub external_id: String,
    pub home_team: Team,
    pub away_team: Team,
    /// ISO 8601 timestamp as delivered (kept verbatim for audit).
    pub scheduled_at: String,
    pub season: String,
    #[serde(default = "default_game_type")]
    pub game_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_stats: Option<TeamStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_stats: Option<TeamStats>,
}

impl Record {
    /// Decode and contract-check a raw payload.
    pub fn from_payload(payload: &RecordPayload) -> Result<Self, ContractError> {
        let mut record: Record = serde_json::from_value(payload.to_value())
            .map_err(|e| ContractError::Malformed(e.to_string()))?;
        record.canonicalize();
        record.check()?;
        Ok(record)
    }

    /// Trim identifiers and lower-case team ids.
    pub fn canonicalize(&mut self) {
        self.external_id = self.external_id.trim().to_string();
        for team in [&mut self.home_team, &mut self.away_team] {
            team.id = team.id.trim().to_lowercase();
            team.name = team.name.trim().to_string();
            team.city = team.city.trim().to_string();
        }
        self.season = self.season.trim().to_string();
    }

    pub fn check(&self) -> Result<(), ContractError> {
        if self.external_id.is_empty() {
            return Err(ContractError::EmptyField("external_id"));
        }
        for (field, team) in [("home_team", &self.home_team), ("away_team", &self.away_team)] {
            if team.id.is_empty() || team.name.is_empty() || team.city.is_empty() {
                return Err(ContractError::EmptyField(field));
            }
        }
        if self.home_team.id.eq_ignore_ascii_case(&self.away_team.id) {
            return Err(ContractError::SameTeam(self.home_team.id.clone()));
        }
        if parse_timestamp(&self.scheduled_at).is_none() {
            return Err(ContractError::InvalidTimestamp(self.scheduled_at.clone()));
        }
        if !is_season_tag(&self.season) {
            return Err(ContractError::InvalidSeason(self.season.clone()));
        }
        Ok(())
    }

    pub fn scheduled_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.scheduled_at)
    }

    /// Payload view, so secondary records can go through the same rule engine.
    pub fn to_payload(&self) -> RecordPayload {
        match serde_json::to_value(self) {
            Ok(value) => RecordPayload::from_value(value),
            Err(_) => RecordPayload::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    Malformed(String),
    EmptyField(&'static str),
    SameTeam(String),
    InvalidTimestamp(String),
    InvalidSeason(String),
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed record: {}", e),
            Self::EmptyField(field) => write!(f, "{} cannot be empty", field),
            Self::SameTeam(id) => write!(f, "home and away teams are identical ({})", id),
            Self::InvalidTimestamp(ts) => write!(f, "invalid scheduled_at: {} (expected ISO 8601)", ts),
            Self::InvalidSeason(s) => write!(f, "invalid season: {} (expected YYYY-YY)", s),
        }
    }
}

impl std::error::Error for ContractError {}

/// Parse an ISO 8601 timestamp. Naive values are taken as UTC; a bare date is midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `YYYY-YY`, e.g. `2024-25`.
pub fn is_season_tag(season: &str) -> bool {
    let bytes = season.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_digit)
}
