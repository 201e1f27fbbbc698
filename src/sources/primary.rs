//! Primary Source Ingestion
//!
//! Pulls the day's batch from the primary feed. A failed fetch is reported
//! with a distinguished cause; it never looks like an empty, healthy batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::client::{trace_headers, FetchError, SourceClient};
use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use crate::models::RecordPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCause {
    Timeout,
    HttpError,
    Unavailable,
}

impl SourceCause {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceCause::Timeout => ErrorKind::SourceTimeout,
            SourceCause::HttpError => ErrorKind::SourceHttpError,
            SourceCause::Unavailable => ErrorKind::SourceUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub cause: SourceCause,
    pub details: String,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.cause.kind(), self.details)
    }
}

impl std::error::Error for SourceFailure {}

impl From<FetchError> for SourceFailure {
    fn from(e: FetchError) -> Self {
        let cause = match &e {
            FetchError::Timeout => SourceCause::Timeout,
            FetchError::Http { .. } => SourceCause::HttpError,
            FetchError::Unavailable(_) => SourceCause::Unavailable,
        };
        Self {
            cause,
            details: e.to_string(),
        }
    }
}

/// Decode a batch body: `{"games": [...]}` or a bare array of records.
pub fn decode_batch(body: &str) -> Result<Vec<RecordPayload>, String> {
    let value: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    batch_from_value(value)
}

pub fn batch_from_value(value: Value) -> Result<Vec<RecordPayload>, String> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("games") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err("\"games\" is not an array".to_string()),
        },
        _ => return Err("expected an object or an array".to_string()),
    };
    Ok(items.into_iter().map(RecordPayload::from_value).collect())
}

pub struct PrimarySource {
    client: Arc<dyn SourceClient>,
    url: String,
    timeout: Duration,
    trace_id: String,
}

impl PrimarySource {
    pub fn new(client: Arc<dyn SourceClient>, config: &PipelineConfig, trace_id: impl Into<String>) -> Self {
        Self {
            client,
            url: config.primary_source_url.clone(),
            timeout: config.primary_timeout(),
            trace_id: trace_id.into(),
        }
    }

    pub async fn fetch(&self) -> Result<Vec<RecordPayload>, SourceFailure> {
        info!(trace_id = %self.trace_id, url = %self.url, "📥 collecting batch from primary source");

        let headers = trace_headers(&self.trace_id);
        let request = self.client.get(&self.url, self.timeout, &headers);
        let body = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(_) => return Err(self.fail(FetchError::Timeout.into())),
        };

        match decode_batch(&body) {
            Ok(records) => {
                info!(trace_id = %self.trace_id, records = records.len(), "✅ primary batch collected");
                Ok(records)
            }
            Err(e) => Err(self.fail(SourceFailure {
                cause: SourceCause::Unavailable,
                details: format!("unreadable primary payload: {}", e),
            })),
        }
    }

    fn fail(&self, failure: SourceFailure) -> SourceFailure {
        error!(
            trace_id = %self.trace_id,
            cause = %failure.cause.kind(),
            details = %failure.details,
            "❌ primary source failed"
        );
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Canned(std::result::Result<String, FetchError>);

    #[async_trait::async_trait]
    impl SourceClient for Canned {
        async fn get(
            &self,
            _url: &str,
            _timeout: Duration,
            _headers: &[(String, String)],
        ) -> std::result::Result<String, FetchError> {
            self.0.clone()
        }
    }

    fn source(response: std::result::Result<String, FetchError>) -> PrimarySource {
        PrimarySource::new(Arc::new(Canned(response)), &PipelineConfig::default(), "trace-primary")
    }

    #[test]
    fn test_decode_batch_shapes() {
        assert_eq!(decode_batch(r#"{"games": [{"external_id": "a"}, {}]}"#).unwrap().len(), 2);
        assert_eq!(decode_batch(r#"[{"external_id": "a"}]"#).unwrap().len(), 1);
        assert!(decode_batch(r#"{"other": 1}"#).unwrap().is_empty());
        assert!(decode_batch(r#"{"games": 3}"#).is_err());
        assert!(decode_batch("<html>").is_err());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let body = json!({"games": [{"external_id": "nba-1"}]}).to_string();
        let records = source(Ok(body)).fetch().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id(), "nba-1");
    }

    struct HeaderEcho;

    #[async_trait::async_trait]
    impl SourceClient for HeaderEcho {
        async fn get(
            &self,
            _url: &str,
            _timeout: Duration,
            headers: &[(String, String)],
        ) -> std::result::Result<String, FetchError> {
            let echoed: Vec<Value> = headers
                .iter()
                .map(|(name, value)| json!({"external_id": format!("{name}={value}")}))
                .collect();
            Ok(json!({ "games": echoed }).to_string())
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_trace_headers() {
        let source = PrimarySource::new(Arc::new(HeaderEcho), &PipelineConfig::default(), "trace-hdr");
        let records = source.fetch().await.unwrap();
        let sent: Vec<String> = records.iter().map(|r| r.external_id()).collect();
        assert!(sent.contains(&"Accept=application/json".to_string()));
        assert!(sent.contains(&"X-Trace-Id=trace-hdr".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_failures_are_classified() {
        let err = source(Err(FetchError::Timeout)).fetch().await.unwrap_err();
        assert_eq!(err.cause.kind(), ErrorKind::SourceTimeout);

        let err = source(Err(FetchError::Http {
            status: 500,
            body: String::new(),
        }))
        .fetch()
        .await
        .unwrap_err();
        assert_eq!(err.cause.kind(), ErrorKind::SourceHttpError);
        assert_eq!(err.details, "HTTP 500");

        let err = source(Ok("not json".into())).fetch().await.unwrap_err();
        assert_eq!(err.cause, SourceCause::Unavailable);
    }
}
