//! memtriage Library
//!
//! Drives a staged memory-forensics investigation (plan, validate, evaluate,
//! execute, triage, deeper analysis) and scales the analysis of collected
//! evidence past a single call's input limit by splitting it into persisted,
//! resumable chunks.

pub mod analysis;
pub mod case;
pub mod config;
pub mod logging;
pub mod pipeline;

pub use analysis::{
    AnalysisKind, AnalysisStage, Analyzer, AnalyzerError, ChunkSplitter, ChunkStore,
    CombinedResult, HeuristicTokenCounter, TokenCounter,
};
pub use case::CaseInputs;
pub use config::Settings;
pub use pipeline::{InvestigationState, Phase, PipelineEngine, TerminalStatus};
