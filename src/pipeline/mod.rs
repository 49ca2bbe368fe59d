//! Investigation pipeline.
//!
//! A fixed sequence of stages driven by an explicit state machine:
//!
//! ```text
//! Planning -> Validating -> Evaluating -+-> Executing -> Triaging -+-> DeeperAnalyzing
//!    ^                                  |        |                 |          |
//!    `----------- retry ----------------+        v                 v          v
//!                                       `---> Terminated <---------+----------'
//! ```
//!
//! Stages read the [`InvestigationState`] and return a [`StateUpdate`]; the
//! [`PipelineEngine`] merges it and asks [`next_phase`] where to go next.

pub mod collaborators;
pub mod engine;
pub mod error;
pub mod state;
pub mod transition;

pub use collaborators::{
    DeeperInvestigator, Evaluation, EvidenceArtifact, ExecutionReport, ExecutionStatus, Executor,
    InvestigationPlan, PlanEvaluator, PlanGenerator, PlanPhase, PlanStep, PlanValidator,
    StructuralValidator, ValidationReport,
};
pub use engine::{Collaborators, PipelineEngine};
pub use error::{PipelineError, StageError};
pub use state::{
    AnalysisSummary, InvestigationState, Phase, Stage, StateUpdate, TerminalStatus,
    TransitionRecord,
};
pub use transition::{next_phase, GuardInputs, Transition, TransitionPolicy, TriageSignal};
