//! Pipeline Configuration
//!
//! One immutable value, resolved before a run starts and handed to every
//! component constructor. Resolution order: defaults, optional TOML file,
//! then `SIGNAL_GATE_*` environment variables (a `.env` file is honoured).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PRIMARY_URL: &str = "https://api.nba.com/v1/games/today";
pub const DEFAULT_FALLBACK_URL: &str =
    "https://api.thesportsdb.com/v1/json/3/eventsnextleague.php?id=4387";

/// Upper bound for source timeouts, in seconds.
pub const MAX_TIMEOUT_SECONDS: f64 = 3600.0;
/// Upper bound for the persistence backoff base, in seconds.
pub const MAX_BACKOFF_BASE_SECONDS: f64 = 60.0;
pub const MAX_PERSIST_RETRIES: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Share of failing records that trips the gate (0.20 = more than 20% failing).
    pub critical_failure_threshold: f64,
    pub timeliness_max_age_hours: u32,
    /// Fields the completeness rule requires.
    pub required_fields: Vec<String>,
    /// Count `warning` records as failures in the pass rate.
    pub count_warnings_as_failures: bool,

    pub primary_source_url: String,
    pub primary_timeout_seconds: f64,
    pub fallback_source_url: String,
    pub fallback_timeout_seconds: f64,

    pub max_persist_retries: u32,
    pub backoff_base_seconds: f64,

    /// Signal eligibility
    pub min_quality_score: f64,
    pub min_history_games: u32,
    pub default_over_under_line: f64,

    pub database_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            critical_failure_threshold: 0.20,
            timeliness_max_age_hours: 24,
            required_fields: default_required_fields(),
            count_warnings_as_failures: false,
            primary_source_url: DEFAULT_PRIMARY_URL.to_string(),
            primary_timeout_seconds: 30.0,
            fallback_source_url: DEFAULT_FALLBACK_URL.to_string(),
            fallback_timeout_seconds: 30.0,
            max_persist_retries: 3,
            backoff_base_seconds: 0.5,
            min_quality_score: 80.0,
            min_history_games: 5,
            default_over_under_line: 220.5,
            database_path: "./signal_gate.db".to_string(),
        }
    }
}

pub fn default_required_fields() -> Vec<String> {
    ["external_id", "home_team", "away_team", "scheduled_at", "season"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl PipelineConfig {
    /// Defaults, then the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `SIGNAL_GATE_*` variables. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = parsed("SIGNAL_GATE_CRITICAL_FAILURE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.critical_failure_threshold = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_TIMELINESS_MAX_AGE_HOURS").and_then(|v| v.parse().ok()) {
            self.timeliness_max_age_hours = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_REQUIRED_FIELDS") {
            self.required_fields = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = parsed("SIGNAL_GATE_COUNT_WARNINGS_AS_FAILURES") {
            self.count_warnings_as_failures = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
        if let Some(v) = parsed("SIGNAL_GATE_PRIMARY_URL") {
            self.primary_source_url = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_PRIMARY_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            self.primary_timeout_seconds = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_FALLBACK_URL") {
            self.fallback_source_url = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_FALLBACK_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            self.fallback_timeout_seconds = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_MAX_PERSIST_RETRIES").and_then(|v| v.parse().ok()) {
            self.max_persist_retries = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_BACKOFF_BASE_SECONDS").and_then(|v| v.parse().ok()) {
            self.backoff_base_seconds = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_MIN_QUALITY_SCORE").and_then(|v| v.parse().ok()) {
            self.min_quality_score = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_MIN_HISTORY_GAMES").and_then(|v| v.parse().ok()) {
            self.min_history_games = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_DEFAULT_OU_LINE").and_then(|v| v.parse().ok()) {
            self.default_over_under_line = v;
        }
        if let Some(v) = parsed("SIGNAL_GATE_DB_PATH").or_else(|| parsed("DATABASE_PATH")) {
            self.database_path = v;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut problems = Vec::new();

        if !(0.0..=1.0).contains(&self.critical_failure_threshold) {
            problems.push("critical_failure_threshold must be between 0 and 1".to_string());
        }
        if self.required_fields.is_empty() {
            problems.push("required_fields cannot be empty".to_string());
        }
        for (name, value) in [
            ("primary_timeout_seconds", self.primary_timeout_seconds),
            ("fallback_timeout_seconds", self.fallback_timeout_seconds),
        ] {
            if !(value > 0.0 && value <= MAX_TIMEOUT_SECONDS) {
                problems.push(format!("{name} must be in (0, {MAX_TIMEOUT_SECONDS}]"));
            }
        }
        if !(1..=MAX_PERSIST_RETRIES).contains(&self.max_persist_retries) {
            problems.push(format!("max_persist_retries must be between 1 and {MAX_PERSIST_RETRIES}"));
        }
        if !(0.0..=MAX_BACKOFF_BASE_SECONDS).contains(&self.backoff_base_seconds) {
            problems.push(format!("backoff_base_seconds must be in [0, {MAX_BACKOFF_BASE_SECONDS}]"));
        }
        if !(0.0..=100.0).contains(&self.min_quality_score) {
            problems.push("min_quality_score must be between 0 and 100".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }

    /// Lowest pass rate that still counts as acceptable quality.
    #[inline]
    pub fn minimum_pass_rate(&self) -> f64 {
        1.0 - self.critical_failure_threshold
    }

    /// Accessors clamp into the validated ranges, so an unvalidated value
    /// (NaN, infinite, huge) never panics.
    pub fn primary_timeout(&self) -> Duration {
        seconds(self.primary_timeout_seconds, 0.001, MAX_TIMEOUT_SECONDS)
    }

    pub fn fallback_timeout(&self) -> Duration {
        seconds(self.fallback_timeout_seconds, 0.001, MAX_TIMEOUT_SECONDS)
    }

    pub fn backoff_base(&self) -> Duration {
        seconds(self.backoff_base_seconds, 0.0, MAX_BACKOFF_BASE_SECONDS)
    }
}

fn seconds(value: f64, min: f64, max: f64) -> Duration {
    let clamped = if value.is_nan() { min } else { value.clamp(min, max) };
    Duration::try_from_secs_f64(clamped).unwrap_or(Duration::from_secs_f64(min))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub problems: Vec<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration validation failed: {}", self.problems.join("; "))
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_reference_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.critical_failure_threshold, 0.20);
        assert_eq!(config.timeliness_max_age_hours, 24);
        assert_eq!(config.fallback_timeout_seconds, 30.0);
        assert_eq!(config.max_persist_retries, 3);
        assert_eq!(config.backoff_base_seconds, 0.5);
        assert_eq!(config.required_fields.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            critical_failure_threshold = 0.1
            fallback_source_url = "http://backup.local/games"
            "#,
        )
        .unwrap();
        assert_eq!(config.critical_failure_threshold, 0.1);
        assert_eq!(config.fallback_source_url, "http://backup.local/games");
        assert_eq!(config.max_persist_retries, 3);
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SIGNAL_GATE_MAX_PERSIST_RETRIES", "5"),
            ("SIGNAL_GATE_REQUIRED_FIELDS", "external_id, season"),
            ("SIGNAL_GATE_BACKOFF_BASE_SECONDS", "not-a-number"),
            ("SIGNAL_GATE_COUNT_WARNINGS_AS_FAILURES", "true"),
        ]);
        let mut config = PipelineConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.max_persist_retries, 5);
        assert_eq!(config.required_fields, vec!["external_id", "season"]);
        assert_eq!(config.backoff_base_seconds, 0.5);
        assert!(config.count_warnings_as_failures);
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let config = PipelineConfig {
            critical_failure_threshold: 1.5,
            max_persist_retries: 0,
            required_fields: vec![],
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.problems.len(), 3);
        assert!(err.to_string().contains("critical_failure_threshold"));
    }

    #[test]
    fn test_validate_rejects_unbounded_timings() {
        let config = PipelineConfig {
            fallback_timeout_seconds: f64::INFINITY,
            primary_timeout_seconds: f64::NAN,
            backoff_base_seconds: 1e300,
            max_persist_retries: u32::MAX,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.problems.len(), 4);
        assert!(err.to_string().contains("fallback_timeout_seconds"));

        // accessors stay usable even without validation
        assert_eq!(config.fallback_timeout(), Duration::from_secs(3600));
        assert_eq!(config.primary_timeout(), Duration::from_millis(1));
        assert_eq!(config.backoff_base(), Duration::from_secs(60));
    }

    #[test]
    fn test_env_overlay_cannot_smuggle_infinite_timeout() {
        let mut config = PipelineConfig::default();
        config.apply_env(|k| (k == "SIGNAL_GATE_FALLBACK_TIMEOUT_SECONDS").then(|| "inf".to_string()));
        assert!(config.fallback_timeout_seconds.is_infinite());
        assert!(config.validate().is_err());
    }
}
