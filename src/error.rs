//! Error taxonomy for the extraction and scoring pipelines

use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the core pipelines.
///
/// Only a subset is fatal for a run: an unreachable log source aborts the
/// whole retrieval, while malformed records and failing strategies are
/// rejected or skipped without stopping the batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The log source did not respond to the healthcheck. Fatal for the
    /// current run, no partial retry.
    #[error("log source unreachable: {0}")]
    SourceUnavailable(String),

    /// A malformed session id, IP address, or content hash. Rejects only
    /// the offending record.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// One honeypot's strategy failed. The honeypot's chunk is skipped,
    /// the run continues.
    #[error("extraction failed for honeypot {honeypot}")]
    ExtractionStrategyFailure {
        honeypot: String,
        #[source]
        source: anyhow::Error,
    },

    /// The stored feature snapshot is not strictly older than the freshly
    /// fetched one. Training is aborted; the fresh snapshot is still saved.
    #[error("stored snapshot ({previous}) must be older than current snapshot ({current})")]
    TrainingDataOrderingViolation {
        previous: NaiveDate,
        current: NaiveDate,
    },

    /// Invalid window or interval configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
