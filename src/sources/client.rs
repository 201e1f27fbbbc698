//! Source HTTP Client
//!
//! The pipeline only needs one operation from a data source: GET a URL with a
//! bound on how long it may take. Failures are classified so callers can tell
//! a slow source from a broken one.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Characters of an error response body kept for diagnostics.
const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No complete response within the allowed time.
    Timeout,
    /// The source answered with a non-success status.
    Http { status: u16, body: String },
    /// Connection, DNS, TLS or body-read failure.
    Unavailable(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Http { status, body } if body.is_empty() => write!(f, "HTTP {}", status),
            Self::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            Self::Unavailable(e) => write!(f, "source unavailable: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    /// GET `url` and return the response body.
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        headers: &[(String, String)],
    ) -> std::result::Result<String, FetchError>;
}

/// `reqwest`-backed client shared by the primary and secondary sources.
#[derive(Clone)]
pub struct HttpSourceClient {
    client: Client,
}

impl HttpSourceClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("signal-gate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HttpSourceClient")?;
        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::Http {
            status: status.as_u16(),
            body: String::new(),
        }
    } else {
        FetchError::Unavailable(e.to_string())
    }
}

#[async_trait::async_trait]
impl SourceClient for HttpSourceClient {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        headers: &[(String, String)],
    ) -> std::result::Result<String, FetchError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request.send().await.map_err(classify)?;
        let status = resp.status();
        debug!(url, status = status.as_u16(), "source responded");

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }

        resp.text().await.map_err(classify)
    }
}

/// `Accept` and `X-Trace-Id` headers sent on every source request.
pub fn trace_headers(trace_id: &str) -> Vec<(String, String)> {
    vec![
        ("Accept".to_string(), "application/json".to_string()),
        ("X-Trace-Id".to_string(), trace_id.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(FetchError::Timeout.to_string(), "request timed out");
        assert_eq!(
            FetchError::Http {
                status: 503,
                body: String::new()
            }
            .to_string(),
            "HTTP 503"
        );
        assert!(FetchError::Unavailable("connection refused".into())
            .to_string()
            .contains("connection refused"));
    }

    #[test]
    fn test_trace_headers() {
        let headers = trace_headers("trace-1");
        assert!(headers.contains(&("Accept".to_string(), "application/json".to_string())));
        assert!(headers.contains(&("X-Trace-Id".to_string(), "trace-1".to_string())));
    }
}
