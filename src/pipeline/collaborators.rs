//! Stage collaborators and the data they exchange with the pipeline.
//!
//! Plan generation, plan evaluation, evidence collection and follow-up
//! investigation are external concerns. The pipeline only relies on the
//! traits below; [`StructuralValidator`] is the one collaborator shipped here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::StageError;
use super::state::InvestigationState;
use crate::case::CaseInputs;

/// One step of an investigation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    /// Forensics tool invocations
    #[serde(default)]
    pub commands: Vec<String>,
    /// What the output should look like
    #[serde(default)]
    pub parse_expectations: String,
    #[serde(default)]
    pub suspicion_heuristics: Vec<String>,
}

/// A named group of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

/// Structured investigation plan produced by a [`PlanGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationPlan {
    #[serde(default)]
    pub plan_version: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Steps run before any OS-specific phase
    #[serde(default)]
    pub global_triage: Vec<PlanStep>,
    #[serde(default)]
    pub phases: Vec<PlanPhase>,
}

impl InvestigationPlan {
    /// Every step, triage first, paired with its phase name.
    pub fn steps(&self) -> impl Iterator<Item = (&str, &PlanStep)> {
        self.global_triage
            .iter()
            .map(|s| ("global triage", s))
            .chain(
                self.phases
                    .iter()
                    .flat_map(|p| p.steps.iter().map(move |s| (p.name.as_str(), s))),
            )
    }
}

/// Outcome of plan validation. A failed report is a recoverable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn passed() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            passed: false,
            errors,
        }
    }

    /// Passed exactly when `errors` is empty.
    pub fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::passed()
        } else {
            Self::failed(errors)
        }
    }
}

/// Evaluator verdict on a validated plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accepted: bool,
    /// Fed back to the planner on retry
    pub feedback: String,
    #[serde(default)]
    pub user_input_needed: bool,
}

impl Evaluation {
    pub fn accepted(feedback: impl Into<String>) -> Self {
        Self {
            accepted: true,
            feedback: feedback.into(),
            user_input_needed: false,
        }
    }

    pub fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            accepted: false,
            feedback: feedback.into(),
            user_input_needed: false,
        }
    }
}

/// Overall status of evidence collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Partial,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    /// Classify by command success rate: 80% and up completed, 50% partial.
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 0.8 {
            ExecutionStatus::Completed
        } else if rate >= 0.5 {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        }
    }

    /// Whether the collected evidence is worth analyzing.
    pub fn is_usable(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Partial)
    }
}

/// One captured tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    /// Step or plugin that produced it
    pub name: String,
    pub content: String,
}

/// What the executor collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    /// Root for chunk stores and archived analysis records
    pub evidence_dir: PathBuf,
    #[serde(default)]
    pub artifacts: Vec<EvidenceArtifact>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionReport {
    /// Concatenate all artifacts into one analysis corpus.
    ///
    /// Each artifact gets a header line and ends with a newline, so the
    /// splitter never joins two artifacts on one line.
    pub fn corpus(&self) -> String {
        let mut corpus = String::new();
        for artifact in &self.artifacts {
            corpus.push_str("=== ");
            corpus.push_str(&artifact.name);
            corpus.push_str(" ===\n");
            corpus.push_str(&artifact.content);
            if !artifact.content.ends_with('\n') {
                corpus.push('\n');
            }
        }
        corpus
    }
}

/// Produces an investigation plan.
///
/// On retries the state carries the previous validation errors and
/// evaluator feedback.
pub trait PlanGenerator {
    fn generate(&self, state: &InvestigationState) -> Result<InvestigationPlan, StageError>;
}

/// Checks a plan's structure. Never fails; problems go in the report.
pub trait PlanValidator {
    fn validate(&self, plan: &InvestigationPlan, inputs: &CaseInputs) -> ValidationReport;
}

/// Judges whether a structurally valid plan is fit to execute.
pub trait PlanEvaluator {
    fn evaluate(
        &self,
        plan: &InvestigationPlan,
        state: &InvestigationState,
    ) -> Result<Evaluation, StageError>;
}

/// Runs the plan against the dump and collects evidence.
pub trait Executor {
    fn execute(
        &self,
        plan: &InvestigationPlan,
        inputs: &CaseInputs,
    ) -> Result<ExecutionReport, StageError>;
}

/// Runs a follow-up investigation driven by triage findings.
pub trait DeeperInvestigator {
    fn investigate(&self, state: &InvestigationState) -> Result<ExecutionReport, StageError>;
}

/// Minimum number of goals a plan must state.
pub const MIN_GOALS: usize = 2;

const ANALYSIS_STEP_KEYWORDS: [&str; 4] = ["analysis", "investigation", "detection", "hunting"];

/// Validator enforcing the plan's structural minimum.
///
/// - at least [`MIN_GOALS`] goals
/// - at least one global triage step
/// - every phase has steps
/// - every step has commands and parse expectations
/// - analysis-type steps carry suspicion heuristics
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator;

impl PlanValidator for StructuralValidator {
    fn validate(&self, plan: &InvestigationPlan, _inputs: &CaseInputs) -> ValidationReport {
        let mut errors = Vec::new();

        if plan.goals.len() < MIN_GOALS {
            errors.push(format!(
                "Insufficient goals: {} (minimum {} required)",
                plan.goals.len(),
                MIN_GOALS
            ));
        }
        if plan.global_triage.is_empty() {
            errors.push("No global triage steps (minimum 1 required)".to_string());
        }
        for phase in &plan.phases {
            if phase.steps.is_empty() {
                errors.push(format!("Phase '{}' has no steps", phase.name));
            }
        }

        for (phase, step) in plan.steps() {
            if step.commands.iter().all(|c| c.trim().is_empty()) {
                errors.push(format!("Step '{}' in {} has no commands", step.name, phase));
            }
            if step.parse_expectations.trim().is_empty() {
                errors.push(format!("Step '{}' missing parse_expectations", step.name));
            }
            let lower = step.name.to_lowercase();
            if step.suspicion_heuristics.is_empty()
                && ANALYSIS_STEP_KEYWORDS.iter().any(|k| lower.contains(k))
            {
                errors.push(format!(
                    "Analysis step '{}' missing suspicion_heuristics",
                    step.name
                ));
            }
        }

        ValidationReport::from_errors(errors)
    }
}
