//! Secondary Source Fallback
//!
//! Invoked with the batch's `QualitySummary`. When the summary is not
//! critical nothing happens and no request is made. Otherwise the secondary
//! source is fetched once, normalized, and the outcome is appended to the
//! event log. A failed fetch after a critical primary batch is a cascading
//! failure: both sources are unusable for this run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::normalize::normalize_body;
use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use crate::models::Record;
use crate::quality::QualitySummary;
use crate::sources::{trace_headers, FetchError, SourceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackCause {
    Timeout,
    HttpError,
    Unavailable,
    EmptyResponse,
    /// Payload could not be decoded at all.
    Other,
}

impl FallbackCause {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FallbackCause::Timeout => ErrorKind::FallbackTimeout,
            FallbackCause::HttpError => ErrorKind::FallbackHttpError,
            FallbackCause::Unavailable => ErrorKind::FallbackUnavailable,
            FallbackCause::EmptyResponse => ErrorKind::FallbackEmptyResponse,
            FallbackCause::Other => ErrorKind::FallbackError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackFailure {
    pub cause: FallbackCause,
    pub details: String,
}

impl std::fmt::Display for FallbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.cause.kind(), self.details)
    }
}

impl std::error::Error for FallbackFailure {}

impl From<FetchError> for FallbackFailure {
    fn from(e: FetchError) -> Self {
        let cause = match &e {
            FetchError::Timeout => FallbackCause::Timeout,
            FetchError::Http { .. } => FallbackCause::HttpError,
            FetchError::Unavailable(_) => FallbackCause::Unavailable,
        };
        Self {
            cause,
            details: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStatus {
    Pending,
    Triggered,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackEventKind {
    #[serde(rename = "FALLBACK_TRIGGERED")]
    Triggered,
    #[serde(rename = "FALLBACK_SUCCESS")]
    Success,
    #[serde(rename = "FALLBACK_FAILED")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    #[serde(rename = "type")]
    pub kind: FallbackEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_recovered: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackReport {
    pub was_triggered: bool,
    pub cascading_failure: bool,
    pub status: FallbackStatus,
    pub cause: Option<ErrorKind>,
    pub details: Option<String>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub events: Vec<FallbackEvent>,
    pub trace_id: String,
}

pub struct FallbackCascade {
    client: Arc<dyn SourceClient>,
    url: String,
    timeout: Duration,
    trace_id: String,
    status: FallbackStatus,
    failure: Option<FallbackFailure>,
    was_triggered: bool,
    cascading_failure: bool,
    triggered_at: Option<DateTime<Utc>>,
    events: Vec<FallbackEvent>,
}

impl FallbackCascade {
    pub fn new(client: Arc<dyn SourceClient>, config: &PipelineConfig, trace_id: impl Into<String>) -> Self {
        Self {
            client,
            url: config.fallback_source_url.clone(),
            timeout: config.fallback_timeout(),
            trace_id: trace_id.into(),
            status: FallbackStatus::Pending,
            failure: None,
            was_triggered: false,
            cascading_failure: false,
            triggered_at: None,
            events: Vec::new(),
        }
    }

    /// Fetch and normalize the secondary dataset. Zero usable records is a failure.
    pub async fn fetch_secondary(&mut self) -> Result<Vec<Record>, FallbackFailure> {
        self.status = FallbackStatus::Triggered;
        info!(trace_id = %self.trace_id, url = %self.url, "🔁 fetching secondary source");

        match self.fetch_and_normalize().await {
            Ok(records) => {
                self.status = FallbackStatus::Success;
                self.failure = None;
                info!(
                    trace_id = %self.trace_id,
                    records = records.len(),
                    "✅ secondary source recovered {} records",
                    records.len()
                );
                Ok(records)
            }
            Err(failure) => {
                self.status = FallbackStatus::Failed;
                error!(
                    trace_id = %self.trace_id,
                    cause = %failure.cause.kind(),
                    details = %failure.details,
                    "❌ secondary source failed"
                );
                self.failure = Some(failure.clone());
                Err(failure)
            }
        }
    }

    async fn fetch_and_normalize(&self) -> Result<Vec<Record>, FallbackFailure> {
        let headers = trace_headers(&self.trace_id);
        let request = self.client.get(&self.url, self.timeout, &headers);
        let body = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FallbackFailure {
                    cause: FallbackCause::Timeout,
                    details: format!("no response within {:.1}s", self.timeout.as_secs_f64()),
                })
            }
        };

        let normalized = normalize_body(&body, &self.trace_id).map_err(|e| FallbackFailure {
            cause: FallbackCause::Other,
            details: e.to_string(),
        })?;

        if normalized.records.is_empty() {
            return Err(FallbackFailure {
                cause: FallbackCause::EmptyResponse,
                details: format!(
                    "secondary source returned no usable records ({} skipped)",
                    normalized.skipped
                ),
            });
        }
        if normalized.skipped > 0 {
            warn!(
                trace_id = %self.trace_id,
                skipped = normalized.skipped,
                kept = normalized.records.len(),
                "secondary payload partially normalized"
            );
        }
        Ok(normalized.records)
    }

    /// `None` without any request when the batch is not critical.
    pub async fn trigger_if_needed(&mut self, summary: &QualitySummary) -> Option<Vec<Record>> {
        if !summary.critical_failure {
            info!(
                trace_id = %self.trace_id,
                pass_rate = summary.pass_rate,
                "quality acceptable, fallback not needed"
            );
            return None;
        }

        let now = Utc::now();
        self.was_triggered = true;
        self.triggered_at = Some(now);
        warn!(trace_id = %self.trace_id, "🚨 critical quality failure, switching to secondary source");

        self.push_event(FallbackEventKind::Triggered, now, |event| {
            event.reason = Some(format!(
                "quality pass rate {:.1}% below minimum {:.0}% ({} of {} records failed)",
                summary.pass_rate * 100.0,
                (1.0 - summary.threshold) * 100.0,
                summary.failed,
                summary.total
            ));
        });

        match self.fetch_secondary().await {
            Ok(records) => {
                let recovered = records.len();
                self.push_event(FallbackEventKind::Success, Utc::now(), |event| {
                    event.records_recovered = Some(recovered);
                });
                Some(records)
            }
            Err(failure) => {
                self.cascading_failure = true;
                error!(
                    trace_id = %self.trace_id,
                    "🛑 CASCADING FAILURE: primary quality and secondary source both failed"
                );
                self.push_event(FallbackEventKind::Failed, Utc::now(), |event| {
                    event.cause = Some(failure.cause.kind());
                    event.details = Some(failure.details.clone());
                });
                None
            }
        }
    }

    fn push_event(&mut self, kind: FallbackEventKind, timestamp: DateTime<Utc>, fill: impl FnOnce(&mut FallbackEvent)) {
        let mut event = FallbackEvent {
            kind,
            timestamp,
            reason: None,
            records_recovered: None,
            cause: None,
            details: None,
            trace_id: self.trace_id.clone(),
        };
        fill(&mut event);
        self.events.push(event);
    }

    pub fn events(&self) -> &[FallbackEvent] {
        &self.events
    }

    pub fn status(&self) -> FallbackStatus {
        self.status
    }

    pub fn cascading_failure(&self) -> bool {
        self.cascading_failure
    }

    pub fn report(&self) -> FallbackReport {
        FallbackReport {
            was_triggered: self.was_triggered,
            cascading_failure: self.cascading_failure,
            status: self.status,
            cause: self.failure.as_ref().map(|f| f.cause.kind()),
            details: self.failure.as_ref().map(|f| f.details.clone()),
            triggered_at: self.triggered_at,
            events: self.events.clone(),
            trace_id: self.trace_id.clone(),
        }
    }
}
