//! Test helper utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use memtriage::analysis::{
    AnalysisKind, AnalysisRequest, AnalysisStage, Analyzer, AnalyzerError, AnalyzerResult,
    Assessment, Finding, HeuristicTokenCounter, ProcessorConfig, RetryPolicy, Severity,
    StageConfig,
};
use memtriage::pipeline::{
    Collaborators, DeeperInvestigator, Evaluation, EvidenceArtifact, ExecutionReport,
    ExecutionStatus, Executor, InvestigationPlan, InvestigationState, PipelineEngine,
    PlanEvaluator, PlanGenerator, PlanPhase, PlanStep, StageError, TransitionPolicy,
    ValidationReport,
};
use memtriage::CaseInputs;

// ============================================
// Analysis fixtures
// ============================================

/// Token limit used by `stage_config`; `corpus_lines` lines are 10 tokens each.
pub const TEST_MAX_CHUNK_TOKENS: usize = 50;

pub fn case() -> CaseInputs {
    CaseInputs::new("case-42", "/dumps/workstation.raw", "windows", "find the implant")
}

pub fn stage_config() -> StageConfig {
    StageConfig {
        max_chunk_tokens: TEST_MAX_CHUNK_TOKENS,
        processor: ProcessorConfig {
            concurrency_limit: 2,
            call_timeout: Duration::from_secs(5),
            retry: RetryPolicy::immediate(3),
        },
    }
}

pub fn stage() -> AnalysisStage {
    AnalysisStage::new(stage_config(), Arc::new(HeuristicTokenCounter::new(4.0)))
}

/// `n` lines of exactly 40 characters (10 heuristic tokens) each.
///
/// With `TEST_MAX_CHUNK_TOKENS` every chunk holds five lines.
pub fn corpus_lines(n: usize) -> String {
    (0..n)
        .map(|i| format!("{:04} 0x7ff6a000 svchost.exe suspicious.\n", i))
        .collect()
}

pub fn assessment(threat_score: f64, confidence: f64) -> Assessment {
    Assessment {
        threat_score,
        confidence,
        findings: vec![],
        indicators: Default::default(),
        recommended_actions: Default::default(),
        executive_summary: String::new(),
        raw: serde_json::Value::Null,
    }
}

pub fn finding(description: &str, severity: Severity) -> Finding {
    Finding {
        category: "process".to_string(),
        description: description.to_string(),
        severity,
        evidence_text: String::new(),
        score: 5.0,
    }
}

pub fn chunk_sequence(request: &AnalysisRequest) -> Option<usize> {
    request.position.map(|p| p.sequence_number)
}

type Responder =
    dyn Fn(&str, &AnalysisRequest, usize) -> AnalyzerResult<Assessment> + Send + Sync;

/// Analyzer driven by a closure, recording every call.
///
/// The closure receives the context, the request and the 1-based attempt
/// number for that chunk.
pub struct MockAnalyzer {
    responder: Box<Responder>,
    delay: Duration,
    calls: Mutex<Vec<(AnalysisKind, Option<usize>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &AnalysisRequest, usize) -> AnalyzerResult<Assessment> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always returns the same scores.
    pub fn constant(threat_score: f64, confidence: f64) -> Self {
        Self::new(move |_, _, _| Ok(assessment(threat_score, confidence)))
    }

    /// Threat score equals the chunk's sequence number.
    pub fn by_sequence() -> Self {
        Self::new(|_, request, _| {
            let seq = chunk_sequence(request).unwrap_or(0);
            Ok(assessment(seq as f64, 0.5))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, sequence_number: usize) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, seq)| *seq == Some(sequence_number))
            .count()
    }

    pub fn calls_of_kind(&self, kind: AnalysisKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn positions(&self) -> Vec<Option<usize>> {
        self.calls.lock().unwrap().iter().map(|(_, seq)| *seq).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Analyzer for MockAnalyzer {
    fn name(&self) -> &str {
        "mock"
    }

    fn analyze(
        &self,
        context: &str,
        request: &AnalysisRequest,
        _timeout: Duration,
    ) -> AnalyzerResult<Assessment> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let seq = chunk_sequence(request);
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((request.kind, seq));
            calls
                .iter()
                .filter(|(k, s)| *k == request.kind && *s == seq)
                .count()
        };

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let response = (self.responder)(context, request, attempt);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

pub fn rate_limited() -> AnalyzerError {
    AnalyzerError::RateLimited(memtriage::analysis::RateLimitInfo {
        retry_after: Some(Duration::ZERO),
        message: "429 Too Many Requests".to_string(),
    })
}

// ============================================
// Pipeline fixtures
// ============================================

pub fn step(name: &str) -> PlanStep {
    PlanStep {
        name: name.to_string(),
        commands: vec!["windows.pslist".to_string()],
        parse_expectations: "PID, PPID and image name per process".to_string(),
        suspicion_heuristics: vec!["unsigned image in system path".to_string()],
    }
}

pub fn valid_plan() -> InvestigationPlan {
    InvestigationPlan {
        plan_version: "1.0".to_string(),
        goals: vec![
            "identify injected code".to_string(),
            "identify persistence".to_string(),
        ],
        constraints: vec!["read-only".to_string()],
        global_triage: vec![step("System info")],
        phases: vec![PlanPhase {
            name: "processes".to_string(),
            steps: vec![step("Process analysis")],
        }],
    }
}

/// Fails structural validation: a single goal.
pub fn invalid_plan() -> InvestigationPlan {
    InvestigationPlan {
        goals: vec!["look around".to_string()],
        ..valid_plan()
    }
}

/// What the planner saw on each call.
#[derive(Debug, Clone)]
pub struct PlannerCall {
    pub retry_count: usize,
    pub validation: Option<ValidationReport>,
    pub evaluation: Option<Evaluation>,
}

/// Planner returning a fixed plan (or error), logging each call.
pub struct FixedPlanner {
    plan: Result<InvestigationPlan, String>,
    pub log: Arc<Mutex<Vec<PlannerCall>>>,
}

impl FixedPlanner {
    pub fn new(plan: InvestigationPlan) -> Self {
        Self {
            plan: Ok(plan),
            log: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plan: Err(message.to_string()),
            log: Arc::default(),
        }
    }
}

impl PlanGenerator for FixedPlanner {
    fn generate(&self, state: &InvestigationState) -> Result<InvestigationPlan, StageError> {
        self.log.lock().unwrap().push(PlannerCall {
            retry_count: state.retry_count,
            validation: state.validation.clone(),
            evaluation: state.evaluation.clone(),
        });
        self.plan.clone().map_err(StageError::collaborator)
    }
}

/// Evaluator replaying scripted verdicts, then accepting.
pub struct ScriptedEvaluator {
    verdicts: Mutex<VecDeque<Evaluation>>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedEvaluator {
    pub fn accepting() -> Self {
        Self::new(vec![])
    }

    pub fn new(verdicts: Vec<Evaluation>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            calls: Arc::default(),
        }
    }
}

impl PlanEvaluator for ScriptedEvaluator {
    fn evaluate(
        &self,
        _plan: &InvestigationPlan,
        _state: &InvestigationState,
    ) -> Result<Evaluation, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Evaluation::accepted("plan covers the goals")))
    }
}

pub fn report(evidence_dir: &Path, status: ExecutionStatus, corpus: &str) -> ExecutionReport {
    ExecutionReport {
        status,
        evidence_dir: evidence_dir.to_path_buf(),
        artifacts: vec![EvidenceArtifact {
            name: "windows.pslist".to_string(),
            content: corpus.to_string(),
        }],
        summary: String::new(),
        error: None,
    }
}

/// Executor returning a prepared report.
pub struct FixedExecutor {
    report: ExecutionReport,
}

impl FixedExecutor {
    pub fn new(report: ExecutionReport) -> Self {
        Self { report }
    }
}

impl Executor for FixedExecutor {
    fn execute(
        &self,
        _plan: &InvestigationPlan,
        _inputs: &CaseInputs,
    ) -> Result<ExecutionReport, StageError> {
        Ok(self.report.clone())
    }
}

/// Deeper investigator returning a prepared report (or error).
pub struct FixedDeeper {
    report: Result<ExecutionReport, String>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedDeeper {
    pub fn new(report: ExecutionReport) -> Self {
        Self {
            report: Ok(report),
            calls: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            report: Err(message.to_string()),
            calls: Arc::default(),
        }
    }
}

impl DeeperInvestigator for FixedDeeper {
    fn investigate(&self, _state: &InvestigationState) -> Result<ExecutionReport, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.report.clone().map_err(StageError::collaborator)
    }
}

/// Evidence directory inside a temp dir.
pub fn evidence_dir(root: &Path) -> PathBuf {
    root.join("evidence").join("case-42")
}

pub fn engine(collaborators: Collaborators, policy: TransitionPolicy) -> PipelineEngine {
    PipelineEngine::new(collaborators, stage(), policy)
}
