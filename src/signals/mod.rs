//! Signal generation: the producer seam, the heuristic producer and the
//! eligibility checks run before a record may produce a signal.

pub mod exclusions;
pub mod heuristic;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Record, Team};

pub use exclusions::{Exclusion, ExclusionChecker, ExclusionReason};
pub use heuristic::{HeuristicSignalProducer, OverUnderGenerator, ScoreProjector, WinnerModel};

/// Which source a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    Primary,
    Secondary,
}

impl SignalOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalOrigin::Primary => "primary",
            SignalOrigin::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerPick {
    /// `home` or `away`
    pub prediction: String,
    pub confidence: f64,
    pub home_strength: f64,
    pub away_strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreProjection {
    pub total: f64,
    pub home: f64,
    pub away: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverUnderCall {
    /// `over`, `under` or `no_signal`
    pub signal: String,
    pub line: f64,
    pub projected_score: f64,
    pub confidence: f64,
    pub edge: f64,
}

/// One actionable decision for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub external_id: String,
    pub home_team: Team,
    pub away_team: Team,
    pub scheduled_at: String,
    pub winner: WinnerPick,
    pub score_projection: ScoreProjection,
    pub over_under: OverUnderCall,
    pub generated_at: DateTime<Utc>,
}

/// Turns one eligible record into a signal. `None` means no signal for this record.
pub trait SignalProducer: Send + Sync {
    fn produce(&self, record: &Record) -> Option<SignalPayload>;
}
