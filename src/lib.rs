//! Signal Gate
//!
//! Quality-gated signal pipeline for sporting-event batches. A batch is
//! validated, swapped for a secondary source when too much of it fails, and
//! only turned into persisted signals when the degraded-mode guard allows it.

pub mod api;
pub mod config;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod signals;
pub mod sources;
pub mod storage;

pub use config::PipelineConfig;
pub use error::ErrorKind;
pub use pipeline::{Pipeline, RunReport, RunStatus};
