//! Error handling for chunked analysis.
//!
//! This module provides:
//! - `StoreError` - failures of the on-disk chunk store
//! - `AnalysisError` - why a chunk (or a whole analysis run) failed, with
//!   messages suitable for logs and persisted records
//!
//! Chunk-level failures are collected in the process report rather than
//! returned; only store and archive failures abort an analysis run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::backend::AnalyzerError;

/// Errors from the chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Chunk store at {0:?} is sealed; analysis has already begun")]
    Sealed(PathBuf),

    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corrupt persisted state at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Error type for analysis operations.
#[derive(Debug)]
pub enum AnalysisError {
    /// The chunk store could not be read or written.
    Store(StoreError),

    /// The analyzer kept rate limiting until attempts ran out.
    RateLimited {
        sequence_number: usize,
        retry_after: Option<Duration>,
        message: String,
    },

    /// The analyzer kept timing out until attempts ran out.
    Timeout {
        sequence_number: usize,
        timeout: Duration,
    },

    /// The analyzer failed permanently or returned an unusable result.
    ChunkFailed {
        sequence_number: usize,
        reason: String,
    },

    /// The batch was cancelled before this chunk finished.
    Cancelled { sequence_number: usize },

    /// The combined record could not be archived.
    Archive { path: PathBuf, message: String },
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Store(e) => write!(f, "Chunk store error: {}", e),
            AnalysisError::RateLimited {
                sequence_number,
                retry_after,
                message,
            } => {
                if let Some(duration) = retry_after {
                    write!(
                        f,
                        "Chunk {} rate limited: {}. Last suggested wait {:.1}s.",
                        sequence_number,
                        message,
                        duration.as_secs_f64()
                    )
                } else {
                    write!(f, "Chunk {} rate limited: {}", sequence_number, message)
                }
            }
            AnalysisError::Timeout {
                sequence_number,
                timeout,
            } => write!(
                f,
                "Chunk {} timed out after {} seconds. Consider increasing the call timeout or reducing chunk size.",
                sequence_number,
                timeout.as_secs()
            ),
            AnalysisError::ChunkFailed {
                sequence_number,
                reason,
            } => write!(f, "Chunk {} failed: {}", sequence_number, reason),
            AnalysisError::Cancelled { sequence_number } => {
                write!(f, "Chunk {} cancelled before completion", sequence_number)
            }
            AnalysisError::Archive { path, message } => {
                write!(f, "Failed to archive analysis record {:?}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for AnalysisError {
    fn from(e: StoreError) -> Self {
        AnalysisError::Store(e)
    }
}

impl AnalysisError {
    /// Map the final analyzer error of a chunk.
    pub fn from_analyzer_error(sequence_number: usize, error: &AnalyzerError) -> Self {
        match error {
            AnalyzerError::RateLimited(info) => AnalysisError::RateLimited {
                sequence_number,
                retry_after: info.retry_after,
                message: info.message.clone(),
            },
            AnalyzerError::Timeout(timeout) => AnalysisError::Timeout {
                sequence_number,
                timeout: *timeout,
            },
            other => AnalysisError::ChunkFailed {
                sequence_number,
                reason: other.to_string(),
            },
        }
    }

    /// Whether a later run could succeed for the same chunk.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AnalysisError::RateLimited { .. }
                | AnalysisError::Timeout { .. }
                | AnalysisError::Cancelled { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AnalysisError::RateLimited { .. })
    }

    /// Last wait suggested by the analyzer.
    pub fn retry_after(&self) -> Option<Duration> {
        if let AnalysisError::RateLimited { retry_after, .. } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Sequence number of the chunk this error belongs to, if any.
    pub fn sequence_number(&self) -> Option<usize> {
        match self {
            AnalysisError::RateLimited {
                sequence_number, ..
            }
            | AnalysisError::Timeout {
                sequence_number, ..
            }
            | AnalysisError::ChunkFailed {
                sequence_number, ..
            }
            | AnalysisError::Cancelled { sequence_number } => Some(*sequence_number),
            AnalysisError::Store(_) | AnalysisError::Archive { .. } => None,
        }
    }
}
