//! Drives one investigation from planning to a terminal phase.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::collaborators::{
    DeeperInvestigator, Executor, PlanEvaluator, PlanGenerator, PlanValidator, StructuralValidator,
};
use super::error::{PipelineError, StageError};
use super::state::{
    AnalysisSummary, InvestigationState, Stage, StateUpdate, TerminalStatus, TransitionRecord,
};
use super::transition::{next_phase, GuardInputs, Transition, TransitionPolicy};
use crate::analysis::{AnalysisKind, AnalysisOutcome, AnalysisStage, Analyzer};
use crate::case::CaseInputs;

/// The external parties each stage calls into.
pub struct Collaborators {
    pub planner: Box<dyn PlanGenerator>,
    pub validator: Box<dyn PlanValidator>,
    pub evaluator: Box<dyn PlanEvaluator>,
    pub executor: Box<dyn Executor>,
    pub deeper: Box<dyn DeeperInvestigator>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl Collaborators {
    /// Collaborators using the built-in [`StructuralValidator`].
    pub fn new(
        planner: Box<dyn PlanGenerator>,
        evaluator: Box<dyn PlanEvaluator>,
        executor: Box<dyn Executor>,
        deeper: Box<dyn DeeperInvestigator>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            planner,
            validator: Box::new(StructuralValidator),
            evaluator,
            executor,
            deeper,
            analyzer,
        }
    }

    pub fn with_validator(mut self, validator: Box<dyn PlanValidator>) -> Self {
        self.validator = validator;
        self
    }
}

/// Runs the fixed stage sequence over an [`InvestigationState`].
pub struct PipelineEngine {
    collaborators: Collaborators,
    analysis: AnalysisStage,
    policy: TransitionPolicy,
    step_ceiling: usize,
}

impl PipelineEngine {
    pub fn new(collaborators: Collaborators, analysis: AnalysisStage, policy: TransitionPolicy) -> Self {
        let step_ceiling = policy.longest_run();
        Self {
            collaborators,
            analysis,
            policy,
            step_ceiling,
        }
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    pub fn analysis(&self) -> &AnalysisStage {
        &self.analysis
    }

    /// Run the investigation to a terminal phase.
    ///
    /// Never fails: every fault is recorded in the returned state, which
    /// always ends in a terminated phase.
    pub fn run(&self, inputs: CaseInputs) -> InvestigationState {
        let mut state = InvestigationState::new(inputs);
        info!(case = %state.inputs.case_id, dump = ?state.inputs.dump_path, "Investigation started");

        while let Some(stage) = Stage::for_phase(state.phase) {
            if state.history.len() >= self.step_ceiling {
                error!(steps = state.history.len(), "Step ceiling reached");
                let transition = Transition::fatal(stage, "step ceiling reached");
                self.commit(&mut state, transition);
                break;
            }

            debug!(%stage, attempt = state.attempt(), "Running stage");
            let transition = match self.run_stage(stage, &state) {
                Ok(update) => {
                    state.apply(update);
                    next_phase(state.phase, &GuardInputs::from_state(&state), &self.policy)
                }
                Err(e) => {
                    error!(%stage, error = %e, "Stage failed");
                    Transition::fatal(stage, e.to_string())
                }
            };
            self.commit(&mut state, transition);
        }

        match state.terminal_status() {
            Some(TerminalStatus::Complete) => info!(
                case = %state.inputs.case_id,
                threat_score = state.final_result().map(|r| r.threat_score),
                "Investigation complete"
            ),
            status => warn!(
                case = %state.inputs.case_id,
                ?status,
                errors = state.errors.len(),
                "Investigation ended early"
            ),
        }
        state
    }

    fn commit(&self, state: &mut InvestigationState, transition: Transition) {
        let from = state.phase;
        if transition.retry {
            state.retry_count += 1;
        }
        if let Some(error) = transition.error {
            state.errors.push(error);
        }
        state.history.push(TransitionRecord {
            step: state.history.len() + 1,
            from,
            to: transition.to,
            reason: transition.reason.clone(),
            retry_count: state.retry_count,
            at: chrono::Utc::now().to_rfc3339(),
        });
        state.phase = transition.to;
        info!(%from, to = %transition.to, reason = %transition.reason, "Transition");
    }

    fn run_stage(&self, stage: Stage, state: &InvestigationState) -> Result<StateUpdate, StageError> {
        match stage {
            Stage::Plan => self.plan(state),
            Stage::Validate => self.validate(state),
            Stage::Evaluate => self.evaluate(state),
            Stage::Execute => self.execute(state),
            Stage::Triage => self.triage(state),
            Stage::DeeperAnalysis => self.deeper_analysis(state),
        }
    }

    fn plan(&self, state: &InvestigationState) -> Result<StateUpdate, StageError> {
        let plan = self.collaborators.planner.generate(state)?;
        Ok(StateUpdate {
            plan: Some(plan),
            ..Default::default()
        })
    }

    fn validate(&self, state: &InvestigationState) -> Result<StateUpdate, StageError> {
        let plan = state.plan.as_ref().ok_or(StageError::MissingInput("plan"))?;
        let report = self.collaborators.validator.validate(plan, &state.inputs);

        let mut update = StateUpdate::default();
        if !report.passed {
            warn!(attempt = state.attempt(), errors = report.errors.len(), "Plan failed validation");
            update.errors.push(PipelineError::ValidationFailure {
                attempt: state.attempt(),
                errors: report.errors.clone(),
            });
        }
        update.validation = Some(report);
        Ok(update)
    }

    fn evaluate(&self, state: &InvestigationState) -> Result<StateUpdate, StageError> {
        if !state.validation.as_ref().is_some_and(|v| v.passed) {
            debug!("Skipping evaluation of an invalid plan");
            return Ok(StateUpdate::default());
        }
        let plan = state.plan.as_ref().ok_or(StageError::MissingInput("plan"))?;
        let evaluation = self.collaborators.evaluator.evaluate(plan, state)?;

        let mut update = StateUpdate::default();
        if !evaluation.accepted {
            warn!(attempt = state.attempt(), feedback = %evaluation.feedback, "Plan rejected");
            update.errors.push(PipelineError::EvaluationRejection {
                attempt: state.attempt(),
                feedback: evaluation.feedback.clone(),
            });
        }
        update.evaluation = Some(evaluation);
        Ok(update)
    }

    fn execute(&self, state: &InvestigationState) -> Result<StateUpdate, StageError> {
        let plan = state.plan.as_ref().ok_or(StageError::MissingInput("plan"))?;
        let report = self.collaborators.executor.execute(plan, &state.inputs)?;
        info!(
            status = ?report.status,
            artifacts = report.artifacts.len(),
            evidence = ?report.evidence_dir,
            "Evidence collected"
        );
        Ok(StateUpdate {
            execution: Some(report),
            ..Default::default()
        })
    }

    fn triage(&self, state: &InvestigationState) -> Result<StateUpdate, StageError> {
        let execution = state
            .execution
            .as_ref()
            .ok_or(StageError::MissingInput("execution report"))?;
        let outcome = self.analysis.run(
            &execution.corpus(),
            &execution.evidence_dir,
            AnalysisKind::Triage,
            &state.inputs,
            self.collaborators.analyzer.as_ref(),
        )?;

        let mut update = StateUpdate {
            analysis: Some(AnalysisSummary::from(&outcome)),
            ..Default::default()
        };
        update.errors = analysis_errors(AnalysisKind::Triage, &outcome);
        Ok(update)
    }

    fn deeper_analysis(&self, state: &InvestigationState) -> Result<StateUpdate, StageError> {
        let mut update = StateUpdate::default();

        let report = match self.collaborators.deeper.investigate(state) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Deeper investigation failed; keeping triage result");
                return Ok(update.with_error(PipelineError::DeeperInvestigationFailure {
                    message: e.to_string(),
                }));
            }
        };

        if !report.status.is_usable() {
            let message = report
                .error
                .clone()
                .unwrap_or_else(|| format!("status {:?}", report.status));
            warn!(%message, "Deeper investigation produced no usable evidence");
            update.deeper_execution = Some(report);
            return Ok(update.with_error(PipelineError::DeeperInvestigationFailure { message }));
        }

        let corpus = report.corpus();
        let outcome = match self.analysis.run(
            &corpus,
            &report.evidence_dir,
            AnalysisKind::Deeper,
            &state.inputs,
            self.collaborators.analyzer.as_ref(),
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Deeper analysis failed; keeping triage result");
                update.deeper_execution = Some(report);
                return Ok(update.with_error(PipelineError::DeeperInvestigationFailure {
                    message: e.to_string(),
                }));
            }
        };
        update.errors = analysis_errors(AnalysisKind::Deeper, &outcome);
        update.deeper_analysis = Some(AnalysisSummary::from(&outcome));
        update.deeper_execution = Some(report);
        Ok(update)
    }
}

/// Non-fatal errors worth recording from one analysis pass.
fn analysis_errors(kind: AnalysisKind, outcome: &AnalysisOutcome) -> Vec<PipelineError> {
    let skipped = outcome
        .skipped_results
        .iter()
        .map(|s| PipelineError::CorruptPersistedState {
            path: s.path.clone(),
            reason: s.reason.clone(),
        });
    let failed = outcome
        .failures
        .iter()
        .map(|f| PipelineError::from_chunk_error(kind, f.sequence_number, &f.error));
    skipped.chain(failed).collect()
}
