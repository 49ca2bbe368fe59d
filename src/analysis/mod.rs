//! Chunked, resumable threat analysis.
//!
//! This module scales analysis to evidence larger than one analyzer call can
//! take: the corpus is split on line boundaries, persisted, analyzed chunk by
//! chunk with bounded concurrency and recombined into one result.
//!
//! # Architecture
//!
//! ```text
//! AnalysisStage
//!     |-- TokenCounter     (fits in one call?)
//!     |-- ChunkSplitter    (line-preserving split)
//!     |-- ChunkStore       (chunks, manifest, per-chunk results)
//!     |-- ChunkProcessor   (existing results + analyze missing, retries)
//!     `-- combine          (max threat, mean confidence, unions)
//! ```
//!
//! An interrupted run resumes from the results already on disk; chunks are
//! only resplit when the input or the split configuration changes.

pub mod backend;
pub mod combiner;
pub mod error;
pub mod processor;
pub mod retry;
pub mod splitter;
pub mod stage;
pub mod store;
pub mod tokens;
pub mod tracker;
pub mod types;

pub use backend::{
    parse_assessment, parse_rate_limit_hint, AnalysisRequest, Analyzer, AnalyzerError,
    AnalyzerResult, ChunkPosition, RateLimitInfo,
};
pub use combiner::combine;
pub use error::{AnalysisError, StoreError};
pub use processor::{
    CallPermits, ChunkFailure, ChunkProcessor, ProcessReport, ProcessorConfig, ProgressReporter,
};
pub use retry::{CancellationToken, RetryPolicy};
pub use splitter::ChunkSplitter;
pub use stage::{AnalysisMode, AnalysisOutcome, AnalysisStage, CombinedRecord, StageConfig};
pub use store::{ChunkManifest, ChunkStore, LoadedResults, PrepareOutcome, SkippedResult};
pub use tokens::{HeuristicTokenCounter, TokenCounter};
pub use tracker::{ChunkOutcome, ChunkUsage, TokenTracker, UsageSummary};
pub use types::{
    AnalysisKind, Assessment, Chunk, ChunkResult, CombinedResult, Finding, Severity,
};
