//! Errors recorded by the pipeline.
//!
//! `PipelineError` values are data: they are appended to the investigation
//! state as they happen and only some of them end the run. `StageError` is
//! what a stage returns when it cannot produce a structurally valid update.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::Stage;
use crate::analysis::{AnalysisError, AnalysisKind};

/// Error recorded in the investigation state.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("Plan validation failed on attempt {attempt}: {}", .errors.join("; "))]
    ValidationFailure { attempt: usize, errors: Vec<String> },

    #[error("Plan rejected by evaluator on attempt {attempt}: {feedback}")]
    EvaluationRejection { attempt: usize, feedback: String },

    #[error("Evidence collection failed: {message}")]
    ExecutionFailure { message: String },

    #[error("{pass} chunk {sequence_number} failed: {reason}")]
    ChunkFailure {
        pass: AnalysisKind,
        sequence_number: usize,
        reason: String,
    },

    #[error("{pass} chunk {sequence_number} still rate limited after retries: {message}")]
    RateLimitFailure {
        pass: AnalysisKind,
        sequence_number: usize,
        message: String,
    },

    #[error("Deeper investigation failed: {message}")]
    DeeperInvestigationFailure { message: String },

    #[error("Gave up on planning after {retries} retries")]
    MaxRetriesExceeded { retries: usize },

    #[error("Corrupt persisted state at {path:?}: {reason}")]
    CorruptPersistedState { path: PathBuf, reason: String },

    #[error("{stage} stage failed: {message}")]
    StageFatal { stage: Stage, message: String },
}

impl PipelineError {
    /// Whether this error terminates the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ExecutionFailure { .. }
                | PipelineError::MaxRetriesExceeded { .. }
                | PipelineError::StageFatal { .. }
        )
    }

    /// Record a chunk that produced no result.
    pub fn from_chunk_error(pass: AnalysisKind, sequence_number: usize, error: &AnalysisError) -> Self {
        match error {
            AnalysisError::RateLimited { message, .. } => PipelineError::RateLimitFailure {
                pass,
                sequence_number,
                message: message.clone(),
            },
            other => PipelineError::ChunkFailure {
                pass,
                sequence_number,
                reason: other.to_string(),
            },
        }
    }
}

/// A stage could not produce a structurally valid update.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Collaborator(String),

    #[error("Missing required input: {0}")]
    MissingInput(&'static str),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

impl StageError {
    pub fn collaborator(message: impl Into<String>) -> Self {
        StageError::Collaborator(message.into())
    }
}
