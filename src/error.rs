//! Error taxonomy of the generation pipeline.
//!
//! Per-file failures (`ExtractError`, `StorageError` while signing,
//! `StagingError`) are absorbed by the pipeline and recorded on the per-file
//! result. Only [`GenerationError`] ever reaches the caller.

use std::time::Duration;

use thiserror::Error;

/// Object storage failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage credentials unavailable: {0}")]
    Credentials(String),

    #[error("object '{key}' not found")]
    NotFound { key: String },

    #[error("storage request for '{key}' failed (HTTP {status})")]
    Http { key: String, status: u16 },

    #[error("storage request failed: {0}")]
    Request(String),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to produce text for a single document.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] StorageError),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Failure to upload a document to the reasoning service.
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("no storage reference for '{0}'")]
    MissingLocation(String),

    #[error("fetch failed: {0}")]
    Fetch(#[from] StorageError),

    #[error("upload rejected: {0}")]
    Upload(String),

    #[error("delete failed: {0}")]
    Delete(String),
}

/// Failure of the reasoning call itself.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("reasoning service credentials unavailable: {0}")]
    Credentials(String),

    #[error("reasoning service request failed: {0}")]
    Request(String),

    #[error("reasoning service returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("reasoning run ended in state '{state}': {message}")]
    RunFailed { state: String, message: String },

    #[error("reasoning run still pending after {0:?}")]
    PollTimeout(Duration),

    #[error("malformed reasoning service response: {0}")]
    MalformedResponse(String),
}

/// The reasoner's output did not match the report structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("response is empty")]
    Empty,

    #[error("response is not a valid report: {0}")]
    Malformed(String),

    #[error("report contains no root causes")]
    NoRootCauses,

    #[error("root cause ranking contradicts probabilities: {0}")]
    RankOrder(String),
}

/// The single failure surfaced by [`crate::pipeline::RcaGenerator::generate`].
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("invocation failed: {0}")]
    Invocation(#[from] InvocationError),

    #[error("invocation exceeded {0:?}")]
    Timeout(Duration),

    #[error("schema validation failed: {0}")]
    Schema(#[from] SchemaError),
}

impl GenerationError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Invocation(_) => "invocation_error",
            GenerationError::Timeout(_) => "timeout",
            GenerationError::Schema(_) => "schema_error",
        }
    }
}
