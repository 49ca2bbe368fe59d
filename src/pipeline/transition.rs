//! The pipeline's transition table.
//!
//! [`next_phase`] is a pure, total function of the current phase and a small
//! set of guard inputs extracted from the state. The engine applies its
//! result; nothing else moves the pipeline.

use serde::{Deserialize, Serialize};

use super::collaborators::ExecutionStatus;
use super::error::PipelineError;
use super::state::{InvestigationState, Phase, Stage, TerminalStatus};
use crate::analysis::{CombinedResult, Severity};

/// Default number of plan retries before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Default threat score at which triage escalates to deeper analysis.
pub const DEFAULT_THREAT_THRESHOLD: f64 = 7.0;

/// Default confidence below which triage escalates to deeper analysis.
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.8;

/// Thresholds consulted by the guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionPolicy {
    pub max_retries: usize,
    pub threat_threshold: f64,
    pub confidence_floor: f64,
    /// A finding at or above this severity also escalates
    pub escalate_on_severity: Option<Severity>,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            threat_threshold: DEFAULT_THREAT_THRESHOLD,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            escalate_on_severity: None,
        }
    }
}

impl TransitionPolicy {
    /// Length of the longest legal run: every planning attempt plus
    /// execution, triage and deeper analysis.
    pub fn longest_run(&self) -> usize {
        3 * (self.max_retries + 1) + 3
    }
}

/// What triage produced, reduced to what the guard needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriageSignal {
    pub threat_score: f64,
    pub confidence: f64,
    pub source_chunk_count: usize,
    pub highest_severity: Option<Severity>,
}

impl From<&CombinedResult> for TriageSignal {
    fn from(combined: &CombinedResult) -> Self {
        Self {
            threat_score: combined.threat_score,
            confidence: combined.confidence,
            source_chunk_count: combined.source_chunk_count,
            highest_severity: combined.highest_severity(),
        }
    }
}

/// Inputs to the guards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardInputs {
    pub retry_count: usize,
    pub validation_passed: bool,
    pub evaluation_accepted: bool,
    pub execution_status: Option<ExecutionStatus>,
    pub execution_error: Option<String>,
    pub triage: Option<TriageSignal>,
}

impl GuardInputs {
    pub fn from_state(state: &InvestigationState) -> Self {
        Self {
            retry_count: state.retry_count,
            validation_passed: state.validation.as_ref().is_some_and(|v| v.passed),
            evaluation_accepted: state.evaluation.as_ref().is_some_and(|e| e.accepted),
            execution_status: state.execution.as_ref().map(|e| e.status),
            execution_error: state.execution.as_ref().and_then(|e| e.error.clone()),
            triage: state.analysis.as_ref().map(|a| TriageSignal::from(&a.combined)),
        }
    }
}

/// A decided phase change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: Phase,
    /// Whether this transition starts another planning attempt
    pub retry: bool,
    /// Error to record alongside the transition
    pub error: Option<PipelineError>,
    pub reason: String,
}

impl Transition {
    fn to(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            to: phase,
            retry: false,
            error: None,
            reason: reason.into(),
        }
    }

    fn with_error(mut self, error: PipelineError) -> Self {
        self.error = Some(error);
        self
    }

    /// Terminate after a stage could not produce a valid update.
    pub fn fatal(stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::to(
            Phase::Terminated(TerminalStatus::Failed),
            format!("{} stage failed", stage),
        )
        .with_error(PipelineError::StageFatal { stage, message })
    }
}

/// Decide where the pipeline goes from `phase`.
pub fn next_phase(phase: Phase, guards: &GuardInputs, policy: &TransitionPolicy) -> Transition {
    match phase {
        Phase::Planning => Transition::to(Phase::Validating, "plan generated"),
        Phase::Validating => Transition::to(Phase::Evaluating, "plan checked"),
        Phase::Evaluating => after_evaluation(guards, policy),
        Phase::Executing => after_execution(guards),
        Phase::Triaging => after_triage(guards, policy),
        Phase::DeeperAnalyzing => Transition::to(
            Phase::Terminated(TerminalStatus::Complete),
            "deeper analysis finished",
        ),
        Phase::Terminated(status) => Transition::to(Phase::Terminated(status), "already terminated"),
    }
}

fn after_evaluation(guards: &GuardInputs, policy: &TransitionPolicy) -> Transition {
    if guards.validation_passed && guards.evaluation_accepted {
        return Transition::to(Phase::Executing, "plan accepted");
    }

    let why = if guards.validation_passed {
        "plan rejected by evaluator"
    } else {
        "plan failed validation"
    };

    if guards.retry_count >= policy.max_retries {
        return Transition::to(
            Phase::Terminated(TerminalStatus::Partial),
            format!("{}; retries exhausted", why),
        )
        .with_error(PipelineError::MaxRetriesExceeded {
            retries: guards.retry_count,
        });
    }

    Transition {
        retry: true,
        ..Transition::to(
            Phase::Planning,
            format!("{}; replanning ({}/{})", why, guards.retry_count + 1, policy.max_retries),
        )
    }
}

fn after_execution(guards: &GuardInputs) -> Transition {
    match guards.execution_status {
        Some(status) if status.is_usable() => Transition::to(Phase::Triaging, "evidence collected"),
        status => {
            let message = guards.execution_error.clone().unwrap_or_else(|| match status {
                Some(status) => format!("evidence collection ended with status {:?}", status),
                None => "no execution report".to_string(),
            });
            Transition::to(
                Phase::Terminated(TerminalStatus::Failed),
                "no usable evidence",
            )
            .with_error(PipelineError::ExecutionFailure { message })
        }
    }
}

fn after_triage(guards: &GuardInputs, policy: &TransitionPolicy) -> Transition {
    let triage = match guards.triage {
        Some(t) if t.source_chunk_count > 0 => t,
        _ => {
            return Transition::to(
                Phase::Terminated(TerminalStatus::Failed),
                "triage produced no result",
            )
            .with_error(PipelineError::StageFatal {
                stage: Stage::Triage,
                message: "no chunk produced an analysis result".to_string(),
            })
        }
    };

    if triage.threat_score >= policy.threat_threshold {
        return Transition::to(
            Phase::DeeperAnalyzing,
            format!(
                "threat score {:.1} at or above {:.1}",
                triage.threat_score, policy.threat_threshold
            ),
        );
    }
    if triage.confidence < policy.confidence_floor {
        return Transition::to(
            Phase::DeeperAnalyzing,
            format!(
                "confidence {:.2} below {:.2}",
                triage.confidence, policy.confidence_floor
            ),
        );
    }
    if let (Some(found), Some(floor)) = (triage.highest_severity, policy.escalate_on_severity) {
        if found >= floor {
            return Transition::to(
                Phase::DeeperAnalyzing,
                format!("{} severity finding", found),
            );
        }
    }

    Transition::to(
        Phase::Terminated(TerminalStatus::Complete),
        "triage conclusive",
    )
}
