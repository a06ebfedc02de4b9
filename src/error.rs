//! Error taxonomy for the sampling pipeline.
//!
//! Acquisition faults are recovered locally by skipping the tick. Persistence
//! and shutdown faults are surfaced to the operator.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Record;

/// The metric source could not produce a snapshot for this tick.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("{path} has no {field} entry")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// The persister failed to append, flush or close.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("persister already closed")]
    Closed,
}

/// The pipeline did not reach a clean exit.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("flush failed during shutdown: {0}")]
    Flush(#[source] PersistenceError),

    #[error("close failed during shutdown: {0}")]
    Close(#[source] PersistenceError),

    #[error("{lost} record(s) could not be persisted")]
    RecordsLost { lost: u64 },

    #[error("sampler task terminated abnormally: {0}")]
    SamplerPanicked(String),

    #[error("persister thread terminated abnormally: {0}")]
    PersisterPanicked(String),
}

/// The consumer side of the channel is gone; the record is handed back.
#[derive(Debug, Error)]
#[error("sample channel closed")]
pub struct ChannelClosed(pub Record);
