//! Signal eligibility checks.
//!
//! Checks run in a fixed order and the first failing one wins, so a record
//! carries exactly one exclusion reason.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::models::Record;

const SIGNALABLE_STATUSES: [&str; 2] = ["scheduled", "upcoming"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Record failed validation outright.
    InvalidContract,
    InvalidStatus,
    MissingData,
    InsufficientQuality,
    InsufficientHistory,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::InvalidContract => "invalid_contract",
            ExclusionReason::InvalidStatus => "invalid_status",
            ExclusionReason::MissingData => "missing_data",
            ExclusionReason::InsufficientQuality => "insufficient_quality",
            ExclusionReason::InsufficientHistory => "insufficient_history",
        }
    }
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub record_id: String,
    pub reason: ExclusionReason,
    pub details: String,
    pub excluded_at: DateTime<Utc>,
}

impl Exclusion {
    pub fn new(record_id: impl Into<String>, reason: ExclusionReason, details: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            reason,
            details: details.into(),
            excluded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExclusionChecker {
    pub min_quality_score: f64,
    pub min_history_games: u32,
}

impl Default for ExclusionChecker {
    fn default() -> Self {
        Self::new(80.0, 5)
    }
}

impl ExclusionChecker {
    pub fn new(min_quality_score: f64, min_history_games: u32) -> Self {
        Self {
            min_quality_score,
            min_history_games,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.min_quality_score, config.min_history_games)
    }

    /// `None` when the record may produce a signal.
    pub fn check(&self, record: &Record, quality_score: f64) -> Option<Exclusion> {
        let exclusion = self.first_failure(record, quality_score);
        if let Some(ref excluded) = exclusion {
            debug!(
                record = %excluded.record_id,
                reason = %excluded.reason,
                "🚫 Record excluded from signal generation"
            );
        }
        exclusion
    }

    fn first_failure(&self, record: &Record, quality_score: f64) -> Option<Exclusion> {
        let id = record.external_id.as_str();

        let status = record.status.as_deref().unwrap_or("scheduled").to_lowercase();
        if !SIGNALABLE_STATUSES.contains(&status.as_str()) {
            return Some(Exclusion::new(
                id,
                ExclusionReason::InvalidStatus,
                format!("status '{status}' is not signalable"),
            ));
        }

        let (home, away) = match (&record.home_stats, &record.away_stats) {
            (Some(home), Some(away)) => (home, away),
            _ => {
                return Some(Exclusion::new(
                    id,
                    ExclusionReason::MissingData,
                    "team stats missing",
                ))
            }
        };

        if quality_score < self.min_quality_score {
            return Some(Exclusion::new(
                id,
                ExclusionReason::InsufficientQuality,
                format!(
                    "quality score {quality_score:.1} below minimum {:.1}",
                    self.min_quality_score
                ),
            ));
        }

        let fewest = home.games_played.min(away.games_played);
        if fewest < self.min_history_games {
            return Some(Exclusion::new(
                id,
                ExclusionReason::InsufficientHistory,
                format!(
                    "{fewest} games played, need {}",
                    self.min_history_games
                ),
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Team, TeamStats};

    fn team(id: &str) -> Team {
        Team {
            id: id.into(),
            name: id.to_uppercase(),
            city: "City".into(),
        }
    }

    fn stats(games: u32) -> TeamStats {
        TeamStats {
            wins_last_5: 3,
            avg_points: Some(110.0),
            avg_allowed: Some(108.0),
            games_played: games,
        }
    }

    fn eligible() -> Record {
        Record {
            external_id: "nba-7".into(),
            home_team: team("lal"),
            away_team: team("bos"),
            scheduled_at: "2025-01-15T19:30:00Z".into(),
            season: "2024-25".into(),
            game_type: "regular".into(),
            status: None,
            home_stats: Some(stats(20)),
            away_stats: Some(stats(18)),
        }
    }

    #[test]
    fn test_eligible_record_passes() {
        let checker = ExclusionChecker::default();
        assert!(checker.check(&eligible(), 100.0).is_none());
        assert!(checker.check(&eligible(), 80.0).is_none());
    }

    #[test]
    fn test_status_gate() {
        let checker = ExclusionChecker::default();
        let mut record = eligible();
        record.status = Some("Upcoming".into());
        assert!(checker.check(&record, 100.0).is_none());

        record.status = Some("final".into());
        let excluded = checker.check(&record, 100.0).unwrap();
        assert_eq!(excluded.reason, ExclusionReason::InvalidStatus);
        assert_eq!(excluded.record_id, "nba-7");
    }

    #[test]
    fn test_missing_stats() {
        let checker = ExclusionChecker::default();
        let mut record = eligible();
        record.away_stats = None;
        assert_eq!(
            checker.check(&record, 100.0).unwrap().reason,
            ExclusionReason::MissingData
        );
    }

    #[test]
    fn test_quality_and_history_thresholds() {
        let checker = ExclusionChecker::from_config(&PipelineConfig::default());
        assert_eq!(
            checker.check(&eligible(), 79.9).unwrap().reason,
            ExclusionReason::InsufficientQuality
        );

        let mut record = eligible();
        record.home_stats = Some(stats(4));
        assert_eq!(
            checker.check(&record, 100.0).unwrap().reason,
            ExclusionReason::InsufficientHistory
        );
        record.home_stats = Some(stats(5));
        assert!(checker.check(&record, 100.0).is_none());
    }

    #[test]
    fn test_first_failure_wins() {
        let checker = ExclusionChecker::default();
        let mut record = eligible();
        record.status = Some("cancelled".into());
        record.home_stats = None;
        assert_eq!(
            checker.check(&record, 0.0).unwrap().reason,
            ExclusionReason::InvalidStatus
        );
    }
}
