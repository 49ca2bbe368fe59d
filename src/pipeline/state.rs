//! Investigation state threaded through the pipeline.
//!
//! The engine owns the single [`InvestigationState`]. Stages read it through a
//! shared reference and return a [`StateUpdate`]; the engine merges the update
//! and then decides the next phase.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::collaborators::{Evaluation, ExecutionReport, InvestigationPlan, ValidationReport};
use super::error::PipelineError;
use crate::analysis::{AnalysisMode, AnalysisOutcome, CombinedResult};
use crate::case::CaseInputs;

/// The fixed set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Validate,
    Evaluate,
    Execute,
    Triage,
    DeeperAnalysis,
}

impl Stage {
    /// Stage run while the pipeline is in `phase`; `None` once terminated.
    pub fn for_phase(phase: Phase) -> Option<Stage> {
        match phase {
            Phase::Planning => Some(Stage::Plan),
            Phase::Validating => Some(Stage::Validate),
            Phase::Evaluating => Some(Stage::Evaluate),
            Phase::Executing => Some(Stage::Execute),
            Phase::Triaging => Some(Stage::Triage),
            Phase::DeeperAnalyzing => Some(Stage::DeeperAnalysis),
            Phase::Terminated(_) => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Plan => "plan",
            Stage::Validate => "validate",
            Stage::Evaluate => "evaluate",
            Stage::Execute => "execute",
            Stage::Triage => "triage",
            Stage::DeeperAnalysis => "deeper analysis",
        };
        write!(f, "{}", name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Analysis finished
    Complete,
    /// Stopped early without a fatal fault (plan retries exhausted)
    Partial,
    /// A fatal error ended the run
    Failed,
}

/// Pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Validating,
    Evaluating,
    Executing,
    Triaging,
    DeeperAnalyzing,
    Terminated(TerminalStatus),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminated(_))
    }

    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        match self {
            Phase::Terminated(status) => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Planning => write!(f, "planning"),
            Phase::Validating => write!(f, "validating"),
            Phase::Evaluating => write!(f, "evaluating"),
            Phase::Executing => write!(f, "executing"),
            Phase::Triaging => write!(f, "triaging"),
            Phase::DeeperAnalyzing => write!(f, "deeper analyzing"),
            Phase::Terminated(status) => write!(f, "terminated ({:?})", status),
        }
    }
}

/// Serializable digest of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub combined: CombinedResult,
    /// 0 for an empty corpus, 1 for single-shot analysis
    pub total_chunks: usize,
    pub chunked: bool,
    pub reused_chunks: usize,
    pub failed_sequence_numbers: Vec<usize>,
    pub record_path: Option<PathBuf>,
}

impl From<&AnalysisOutcome> for AnalysisSummary {
    fn from(outcome: &AnalysisOutcome) -> Self {
        let (chunked, reused_chunks) = match outcome.mode {
            AnalysisMode::Chunked { reused, .. } => (true, reused),
            AnalysisMode::SingleShot | AnalysisMode::Empty => (false, 0),
        };
        Self {
            combined: outcome.combined.clone(),
            total_chunks: outcome.total_chunks,
            chunked,
            reused_chunks,
            failed_sequence_numbers: outcome.failed_sequence_numbers(),
            record_path: outcome.record_path.clone(),
        }
    }
}

/// One applied phase change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// 1-based step counter
    pub step: usize,
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
    /// Retry count after the transition
    pub retry_count: usize,
    /// RFC 3339
    pub at: String,
}

/// The record threaded through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationState {
    pub inputs: CaseInputs,
    pub phase: Phase,
    /// Completed plan retries; the only counter carried across iterations
    pub retry_count: usize,
    pub plan: Option<InvestigationPlan>,
    pub validation: Option<ValidationReport>,
    pub evaluation: Option<Evaluation>,
    pub execution: Option<ExecutionReport>,
    pub analysis: Option<AnalysisSummary>,
    pub deeper_execution: Option<ExecutionReport>,
    pub deeper_analysis: Option<AnalysisSummary>,
    pub errors: Vec<PipelineError>,
    pub history: Vec<TransitionRecord>,
}

impl InvestigationState {
    pub fn new(inputs: CaseInputs) -> Self {
        Self {
            inputs,
            phase: Phase::Planning,
            retry_count: 0,
            plan: None,
            validation: None,
            evaluation: None,
            execution: None,
            analysis: None,
            deeper_execution: None,
            deeper_analysis: None,
            errors: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Merge a stage's update. Present fields replace, errors append.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(plan) = update.plan {
            self.plan = Some(plan);
        }
        if let Some(validation) = update.validation {
            self.validation = Some(validation);
        }
        if let Some(evaluation) = update.evaluation {
            self.evaluation = Some(evaluation);
        }
        if let Some(execution) = update.execution {
            self.execution = Some(execution);
        }
        if let Some(analysis) = update.analysis {
            self.analysis = Some(analysis);
        }
        if let Some(deeper_execution) = update.deeper_execution {
            self.deeper_execution = Some(deeper_execution);
        }
        if let Some(deeper_analysis) = update.deeper_analysis {
            self.deeper_analysis = Some(deeper_analysis);
        }
        self.errors.extend(update.errors);
    }

    /// 1-based planning attempt currently in progress.
    pub fn attempt(&self) -> usize {
        self.retry_count + 1
    }

    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        self.phase.terminal_status()
    }

    /// Combined result of the last analysis pass that ran.
    pub fn final_result(&self) -> Option<&CombinedResult> {
        self.deeper_analysis
            .as_ref()
            .or(self.analysis.as_ref())
            .map(|a| &a.combined)
    }

    pub fn fatal_errors(&self) -> impl Iterator<Item = &PipelineError> {
        self.errors.iter().filter(|e| e.is_fatal())
    }
}

/// Changes a stage wants merged into the state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub plan: Option<InvestigationPlan>,
    pub validation: Option<ValidationReport>,
    pub evaluation: Option<Evaluation>,
    pub execution: Option<ExecutionReport>,
    pub analysis: Option<AnalysisSummary>,
    pub deeper_execution: Option<ExecutionReport>,
    pub deeper_analysis: Option<AnalysisSummary>,
    pub errors: Vec<PipelineError>,
}

impl StateUpdate {
    pub fn with_error(mut self, error: PipelineError) -> Self {
        self.errors.push(error);
        self
    }
}
