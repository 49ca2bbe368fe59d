//! Bounded-concurrency chunk analysis using Rayon.
//!
//! # Design
//!
//! - Chunks with a persisted result are accepted as-is and never re-sent
//! - Remaining chunks run on a dedicated Rayon pool
//! - `CallPermits` bounds the number of analyzer calls in flight; a permit is
//!   held only for the duration of one call, so a worker sleeping through a
//!   backoff does not block its siblings
//! - Every success is written to the chunk store before the worker moves on
//! - A failed chunk is recorded in the report and never aborts the batch
//!
//! # Retry Strategy
//!
//! Rate limits and timeouts are retried per [`RetryPolicy`]. Any other
//! analyzer error fails the chunk immediately. Backoff waits observe the
//! batch's [`CancellationToken`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::backend::{AnalysisRequest, Analyzer};
use super::error::AnalysisError;
use super::retry::{CancellationToken, RetryPolicy};
use super::store::ChunkStore;
use super::tracker::{ChunkOutcome, ChunkUsage, TokenTracker, UsageSummary};
use super::types::{Assessment, Chunk, ChunkResult};

/// Default number of concurrent analyzer calls.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 2;

/// Counting semaphore for analyzer calls.
#[derive(Debug)]
pub struct CallPermits {
    available: Mutex<usize>,
    cvar: Condvar,
    limit: usize,
}

impl CallPermits {
    /// Create permits for up to `limit` concurrent calls (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            available: Mutex::new(limit),
            cvar: Condvar::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block until a permit is free.
    pub fn acquire(&self) -> CallPermit<'_> {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        while *available == 0 {
            available = self
                .cvar
                .wait(available)
                .unwrap_or_else(|e| e.into_inner());
        }
        *available -= 1;
        CallPermit { permits: self }
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        *available += 1;
        self.cvar.notify_one();
    }
}

/// Held for the duration of one analyzer call; released on drop.
#[derive(Debug)]
pub struct CallPermit<'a> {
    permits: &'a CallPermits,
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        self.permits.release();
    }
}

/// Thread-safe completion counter with an optional callback.
pub struct ProgressReporter {
    completed: Arc<AtomicUsize>,
    total: AtomicUsize,
    callback: Option<Box<dyn Fn(usize, usize) + Send + Sync>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            total: AtomicUsize::new(0),
            callback: None,
        }
    }

    /// Call `callback(completed, total)` after every finished chunk.
    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            ..Self::new()
        }
    }

    /// Reset for a batch of `total` chunks.
    pub fn start(&self, total: usize) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Report one finished chunk; returns the new completed count.
    pub fn report_progress(&self) -> usize {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(ref callback) = self.callback {
            callback(completed, self.total.load(Ordering::SeqCst));
        }
        completed
    }

    /// Current (completed, total).
    pub fn get_progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (completed, total) = self.get_progress();
        f.debug_struct("ProgressReporter")
            .field("completed", &completed)
            .field("total", &total)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum analyzer calls in flight
    pub concurrency_limit: usize,
    /// Budget passed to each analyzer call
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            call_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// A chunk that produced no usable result.
#[derive(Debug)]
pub struct ChunkFailure {
    pub sequence_number: usize,
    pub error: AnalysisError,
    /// Analyzer calls made before giving up
    pub attempts: usize,
}

/// Outcome of one processing batch.
#[derive(Debug)]
pub struct ProcessReport {
    /// Successful results (reused and fresh), ascending by sequence number
    pub results: Vec<ChunkResult>,
    /// Failed chunks, ascending by sequence number
    pub failures: Vec<ChunkFailure>,
    pub total_chunks: usize,
    /// Results taken from disk instead of the analyzer
    pub reused: usize,
    pub usage: UsageSummary,
}

impl ProcessReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.results.len() == self.total_chunks
    }

    pub fn failed_sequence_numbers(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.sequence_number).collect()
    }
}

/// Per-chunk outcome before it is folded into the report.
struct Attempted {
    sequence_number: usize,
    tokens: usize,
    duration: Duration,
    attempts: usize,
    result: Result<ChunkResult, AnalysisError>,
}

/// Drives an [`Analyzer`] over a fixed list of chunks.
pub struct ChunkProcessor<'a> {
    config: ProcessorConfig,
    store: Option<&'a ChunkStore>,
    /// Attach chunk positions to analyzer requests
    scope_requests: bool,
    cancel: CancellationToken,
    progress: Option<&'a ProgressReporter>,
}

impl<'a> ChunkProcessor<'a> {
    /// Processor that persists each success to `store`.
    pub fn new(config: ProcessorConfig, store: &'a ChunkStore) -> Self {
        Self {
            config,
            store: Some(store),
            scope_requests: true,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Processor without persistence (single-shot analysis).
    pub fn ephemeral(config: ProcessorConfig) -> Self {
        Self {
            config,
            store: None,
            scope_requests: false,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Analyze every chunk without a result in `existing`.
    ///
    /// Results in `existing` whose sequence number is not in `chunks` are
    /// ignored.
    pub fn process(
        &self,
        chunks: &[Chunk],
        mut existing: BTreeMap<usize, ChunkResult>,
        analyzer: &dyn Analyzer,
        request: &AnalysisRequest,
    ) -> ProcessReport {
        let mut tracker = TokenTracker::new();
        let total_chunks = chunks.len();

        let mut results = Vec::with_capacity(total_chunks);
        let mut pending = Vec::new();
        for chunk in chunks {
            match existing.remove(&chunk.sequence_number) {
                Some(result) => {
                    tracker.record_reused(chunk.sequence_number, chunk.token_count);
                    results.push(result);
                }
                None => pending.push(chunk),
            }
        }
        if !existing.is_empty() {
            debug!(
                stale = existing.len(),
                "Ignoring persisted results without a matching chunk"
            );
        }
        let reused = results.len();

        info!(
            analyzer = analyzer.name(),
            total = total_chunks,
            reused,
            pending = pending.len(),
            concurrency = self.config.concurrency_limit,
            "Starting chunk analysis"
        );

        if let Some(progress) = self.progress {
            progress.start(pending.len());
        }

        let permits = CallPermits::new(self.config.concurrency_limit);
        let attempted = self.run_pending(&pending, total_chunks, &permits, analyzer, request);

        let mut failures = Vec::new();
        for outcome in attempted {
            let outcome_kind = match outcome.result {
                Ok(result) => {
                    results.push(result);
                    ChunkOutcome::Analyzed
                }
                Err(error) => {
                    warn!(
                        sequence_number = outcome.sequence_number,
                        attempts = outcome.attempts,
                        error = %error,
                        "Chunk analysis failed"
                    );
                    failures.push(ChunkFailure {
                        sequence_number: outcome.sequence_number,
                        error,
                        attempts: outcome.attempts,
                    });
                    ChunkOutcome::Failed
                }
            };
            tracker.record(ChunkUsage {
                sequence_number: outcome.sequence_number,
                tokens: outcome.tokens,
                duration: outcome.duration,
                outcome: outcome_kind,
                attempts: outcome.attempts,
            });
        }

        results.sort_by_key(|r| r.sequence_number);
        failures.sort_by_key(|f| f.sequence_number);

        info!("{}", tracker.format_summary().trim_end());

        ProcessReport {
            results,
            failures,
            total_chunks,
            reused,
            usage: tracker.summary(),
        }
    }

    fn run_pending(
        &self,
        pending: &[&Chunk],
        total_chunks: usize,
        permits: &CallPermits,
        analyzer: &dyn Analyzer,
        request: &AnalysisRequest,
    ) -> Vec<Attempted> {
        if pending.is_empty() {
            return Vec::new();
        }

        let run_one = |chunk: &&Chunk| {
            let scoped = if self.scope_requests {
                request.for_chunk(chunk.sequence_number, total_chunks)
            } else {
                request.clone()
            };
            let outcome = self.analyze_chunk(chunk, permits, analyzer, &scoped);
            if let Some(progress) = self.progress {
                progress.report_progress();
            }
            outcome
        };

        // Single chunk: no thread pool needed
        if pending.len() == 1 {
            return pending.iter().map(run_one).collect();
        }

        // Workers in backoff hold no permit, so allow twice as many threads
        let threads = pending
            .len()
            .min(permits.limit().saturating_mul(2))
            .max(1);

        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chunk-analyzer-{}", i))
            .build()
        {
            Ok(pool) => pool.install(|| pending.par_iter().map(run_one).collect()),
            Err(e) => {
                warn!(error = %e, "Failed to create thread pool; processing sequentially");
                pending.iter().map(run_one).collect()
            }
        }
    }

    fn analyze_chunk(
        &self,
        chunk: &Chunk,
        permits: &CallPermits,
        analyzer: &dyn Analyzer,
        request: &AnalysisRequest,
    ) -> Attempted {
        let start = Instant::now();
        let sequence_number = chunk.sequence_number;
        let policy = &self.config.retry;
        let mut attempts = 0usize;

        let result = loop {
            if self.cancel.is_cancelled() {
                break Err(AnalysisError::Cancelled { sequence_number });
            }

            let response = {
                let _permit = permits.acquire();
                if self.cancel.is_cancelled() {
                    break Err(AnalysisError::Cancelled { sequence_number });
                }
                attempts += 1;
                analyzer.analyze(&chunk.content, request, self.config.call_timeout)
            };

            match response {
                Ok(assessment) => {
                    break self.accept(sequence_number, assessment);
                }
                Err(e) if e.is_transient() && policy.should_retry(attempts) => {
                    let wait = policy.wait_duration(attempts - 1, e.retry_after());
                    warn!(
                        sequence_number,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Transient analyzer error; backing off"
                    );
                    if self.cancel.sleep(wait) {
                        break Err(AnalysisError::Cancelled { sequence_number });
                    }
                }
                Err(e) => break Err(AnalysisError::from_analyzer_error(sequence_number, &e)),
            }
        };

        Attempted {
            sequence_number,
            tokens: chunk.token_count,
            duration: start.elapsed(),
            attempts,
            result,
        }
    }

    /// Validate, normalize and persist a fresh assessment.
    fn accept(
        &self,
        sequence_number: usize,
        mut assessment: Assessment,
    ) -> Result<ChunkResult, AnalysisError> {
        if !assessment.has_finite_scores() {
            return Err(AnalysisError::ChunkFailed {
                sequence_number,
                reason: "analyzer returned non-finite scores".to_string(),
            });
        }
        if assessment.clamp_scores() {
            warn!(sequence_number, "Clamped out-of-range scores from analyzer");
        }

        let result = ChunkResult::from_assessment(sequence_number, assessment);
        if let Some(store) = self.store {
            if let Err(e) = store.write_result(&result) {
                // The result is still usable for this run; only resumability suffers
                warn!(sequence_number, error = %e, "Failed to persist chunk result");
            }
        }
        debug!(
            sequence_number,
            threat_score = result.threat_score,
            confidence = result.confidence,
            "Chunk analyzed"
        );
        Ok(result)
    }
}
