//! Heuristic Signal Producer
//!
//! Three independent heuristics over season aggregates:
//! - winner pick from recent form, offense, defense and home advantage
//! - total score projection from offensive and defensive averages
//! - over/under call against a fixed line
//!
//! No accuracy claims; these exist so the pipeline emits something concrete.

use chrono::Utc;
use tracing::debug;

use super::{OverUnderCall, ScoreProjection, SignalPayload, SignalProducer, WinnerPick};
use crate::config::PipelineConfig;
use crate::models::{Record, TeamStats};

#[inline]
fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone)]
pub struct WinnerModel {
    /// Strength points granted to the home team.
    pub home_advantage: f64,
}

impl Default for WinnerModel {
    fn default() -> Self {
        Self { home_advantage: 3.0 }
    }
}

impl WinnerModel {
    const BASELINE: f64 = 100.0;
    const MAX_CONFIDENCE: f64 = 0.95;

    fn strength(&self, stats: &TeamStats) -> f64 {
        let offense = stats.avg_points.unwrap_or(Self::BASELINE);
        let defense = stats.avg_allowed.unwrap_or(Self::BASELINE);
        f64::from(stats.wins_last_5) * 5.0 + (offense - Self::BASELINE) * 0.5 + (Self::BASELINE - defense) * 0.5
    }

    pub fn predict(&self, home: &TeamStats, away: &TeamStats) -> WinnerPick {
        let home_strength = self.strength(home) + self.home_advantage;
        let away_strength = self.strength(away);
        let gap = (home_strength - away_strength).abs();

        WinnerPick {
            prediction: if home_strength > away_strength { "home" } else { "away" }.to_string(),
            confidence: round_to((0.5 + gap / 20.0).min(Self::MAX_CONFIDENCE), 2),
            home_strength: round_to(home_strength, 2),
            away_strength: round_to(away_strength, 2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreProjector {
    pub league_average: f64,
    /// Points moved from away to home.
    pub home_adjustment: f64,
}

impl Default for ScoreProjector {
    fn default() -> Self {
        Self {
            league_average: 110.0,
            home_adjustment: 1.5,
        }
    }
}

impl ScoreProjector {
    pub fn project(&self, home: &TeamStats, away: &TeamStats) -> ScoreProjection {
        let avg = self.league_average;
        let home_points = (home.avg_points.unwrap_or(avg) + away.avg_allowed.unwrap_or(avg)) / 2.0
            + self.home_adjustment;
        let away_points = (away.avg_points.unwrap_or(avg) + home.avg_allowed.unwrap_or(avg)) / 2.0
            - self.home_adjustment;

        ScoreProjection {
            total: round_to(home_points + away_points, 1),
            home: round_to(home_points, 1),
            away: round_to(away_points, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverUnderGenerator {
    pub line: f64,
    /// Minimum |projected - line| before a call is made.
    pub edge_threshold: f64,
}

impl OverUnderGenerator {
    const MAX_CONFIDENCE: f64 = 0.9;

    pub fn new(line: f64) -> Self {
        Self {
            line,
            edge_threshold: 5.0,
        }
    }

    pub fn generate(&self, projection: &ScoreProjection) -> OverUnderCall {
        let edge = projection.total - self.line;
        let (signal, confidence) = if edge.abs() < self.edge_threshold {
            ("no_signal", 0.5)
        } else if edge > 0.0 {
            ("over", (0.5 + edge.abs() / 20.0).min(Self::MAX_CONFIDENCE))
        } else {
            ("under", (0.5 + edge.abs() / 20.0).min(Self::MAX_CONFIDENCE))
        };

        OverUnderCall {
            signal: signal.to_string(),
            line: self.line,
            projected_score: projection.total,
            confidence: round_to(confidence, 2),
            edge: round_to(edge, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeuristicSignalProducer {
    winner: WinnerModel,
    projector: ScoreProjector,
    over_under: OverUnderGenerator,
}

impl HeuristicSignalProducer {
    pub fn new(over_under_line: f64) -> Self {
        Self {
            winner: WinnerModel::default(),
            projector: ScoreProjector::default(),
            over_under: OverUnderGenerator::new(over_under_line),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.default_over_under_line)
    }
}

impl Default for HeuristicSignalProducer {
    fn default() -> Self {
        Self::new(220.5)
    }
}

impl SignalProducer for HeuristicSignalProducer {
    fn produce(&self, record: &Record) -> Option<SignalPayload> {
        let home = record.home_stats.as_ref()?;
        let away = record.away_stats.as_ref()?;

        let winner = self.winner.predict(home, away);
        let score_projection = self.projector.project(home, away);
        let over_under = self.over_under.generate(&score_projection);
        debug!(record = %record.external_id, pick = %winner.prediction, "signal generated");

        Some(SignalPayload {
            external_id: record.external_id.clone(),
            home_team: record.home_team.clone(),
            away_team: record.away_team.clone(),
            scheduled_at: record.scheduled_at.clone(),
            winner,
            score_projection,
            over_under,
            generated_at: Utc::now(),
        })
    }
}
