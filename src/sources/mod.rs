//! Data sources: the HTTP client seam and primary-feed ingestion.

pub mod client;
pub mod primary;

pub use client::{trace_headers, FetchError, HttpSourceClient, SourceClient};
pub use primary::{batch_from_value, decode_batch, PrimarySource, SourceCause, SourceFailure};
