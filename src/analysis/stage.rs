//! Analysis of one evidence corpus, end to end.
//!
//! A corpus that fits the token limit is analyzed in a single call. A larger
//! corpus is split, persisted, analyzed chunk by chunk (resuming from any
//! results already on disk) and recombined. Either way the combined result is
//! archived under `<evidence>/analysis_results/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::backend::{AnalysisRequest, Analyzer};
use super::combiner::combine;
use super::error::AnalysisError;
use super::processor::{ChunkFailure, ChunkProcessor, ProcessorConfig, ProgressReporter};
use super::retry::CancellationToken;
use super::splitter::ChunkSplitter;
use super::store::{
    sha256_hex, write_atomic, ChunkManifest, ChunkStore, PrepareOutcome, SkippedResult,
    SourceInfo, SplitParams,
};
use super::tokens::TokenCounter;
use super::tracker::UsageSummary;
use super::types::{AnalysisKind, Chunk, CombinedResult};
use crate::case::CaseInputs;

/// Directory holding archived combined records.
pub const RESULTS_ARCHIVE_DIR: &str = "analysis_results";

/// Default token limit for a single analyzer call.
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 20_000;

#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Corpora above this many tokens are chunked
    pub max_chunk_tokens: usize,
    pub processor: ProcessorConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: DEFAULT_MAX_CHUNK_TOKENS,
            processor: ProcessorConfig::default(),
        }
    }
}

/// How the corpus was analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Nothing to analyze
    Empty,
    SingleShot,
    Chunked { prepare: PrepareOutcome, reused: usize },
}

/// Archived record of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRecord {
    /// RFC 3339 time the record was written
    pub timestamp: String,
    pub kind: AnalysisKind,
    pub case: CaseInputs,
    pub analyzed_chunks: usize,
    pub total_chunks: usize,
    pub failed_sequence_numbers: Vec<usize>,
    pub result: CombinedResult,
}

/// Everything a caller learns from one analysis pass.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub combined: CombinedResult,
    pub mode: AnalysisMode,
    pub total_chunks: usize,
    pub failures: Vec<ChunkFailure>,
    pub usage: Option<UsageSummary>,
    /// Persisted results that were unusable; their chunks were reanalyzed
    pub skipped_results: Vec<SkippedResult>,
    /// Where the combined record was archived, if archiving succeeded
    pub record_path: Option<PathBuf>,
}

impl AnalysisOutcome {
    pub fn analyzed_chunks(&self) -> usize {
        self.combined.source_chunk_count
    }

    pub fn failed_sequence_numbers(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.sequence_number).collect()
    }
}

/// Result of one pass before archiving.
struct Pass {
    combined: CombinedResult,
    mode: AnalysisMode,
    total_chunks: usize,
    failures: Vec<ChunkFailure>,
    usage: Option<UsageSummary>,
    skipped_results: Vec<SkippedResult>,
}

/// Size check, split, persist, process, combine and archive.
pub struct AnalysisStage {
    config: StageConfig,
    counter: Arc<dyn TokenCounter>,
    cancel: CancellationToken,
    progress: Option<Arc<ProgressReporter>>,
}

impl AnalysisStage {
    pub fn new(config: StageConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            config,
            counter,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Token cancelling any batch run by this stage.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Chunk directory for `kind` under `evidence_dir`.
    pub fn chunk_dir(evidence_dir: &Path, kind: AnalysisKind) -> PathBuf {
        evidence_dir.join(kind.chunk_dir_name())
    }

    /// Analyze `corpus` and archive the combined result under `evidence_dir`.
    ///
    /// Chunk-level failures are reported in the outcome, not as errors. Only
    /// store failures abort; a failed archive write is logged and leaves
    /// `record_path` empty.
    pub fn run(
        &self,
        corpus: &str,
        evidence_dir: &Path,
        kind: AnalysisKind,
        case: &CaseInputs,
        analyzer: &dyn Analyzer,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let request = AnalysisRequest::new(kind, case.clone());
        let total_tokens = self.counter.count(corpus);

        let pass = if corpus.trim().is_empty() {
            warn!(%kind, "No evidence text to analyze");
            Pass {
                combined: CombinedResult::empty(),
                mode: AnalysisMode::Empty,
                total_chunks: 0,
                failures: Vec::new(),
                usage: None,
                skipped_results: Vec::new(),
            }
        } else if total_tokens <= self.config.max_chunk_tokens {
            info!(%kind, tokens = total_tokens, "Corpus fits a single call");
            let chunk = Chunk::new(0, total_tokens, corpus.to_string());
            let processor = self.processor(ChunkProcessor::ephemeral(self.config.processor.clone()));
            let report = processor.process(
                std::slice::from_ref(&chunk),
                Default::default(),
                analyzer,
                &request,
            );
            Pass {
                combined: combine(&report.results),
                mode: AnalysisMode::SingleShot,
                total_chunks: 1,
                failures: report.failures,
                usage: Some(report.usage),
                skipped_results: Vec::new(),
            }
        } else {
            self.run_chunked(corpus, total_tokens, evidence_dir, kind, case, analyzer, &request)?
        };

        let Pass {
            combined,
            mode,
            total_chunks,
            failures,
            usage,
            skipped_results,
        } = pass;

        let record = CombinedRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
            case: case.clone(),
            analyzed_chunks: combined.source_chunk_count,
            total_chunks,
            failed_sequence_numbers: failures.iter().map(|f| f.sequence_number).collect(),
            result: combined,
        };
        // The combined result stands even if the archive copy cannot be written
        let record_path = match archive_record(evidence_dir, &record) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(%kind, error = %e, "Failed to archive combined record");
                None
            }
        };

        info!(
            %kind,
            analyzed = record.analyzed_chunks,
            total = total_chunks,
            threat_score = record.result.threat_score,
            confidence = record.result.confidence,
            path = ?record_path,
            "Analysis complete"
        );

        Ok(AnalysisOutcome {
            combined: record.result,
            mode,
            total_chunks,
            failures,
            usage,
            skipped_results,
            record_path,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_chunked(
        &self,
        corpus: &str,
        total_tokens: usize,
        evidence_dir: &Path,
        kind: AnalysisKind,
        case: &CaseInputs,
        analyzer: &dyn Analyzer,
        request: &AnalysisRequest,
    ) -> Result<Pass, AnalysisError> {
        let splitter = ChunkSplitter::new(self.config.max_chunk_tokens, Arc::clone(&self.counter));
        let chunks = splitter.split(corpus);
        info!(
            %kind,
            tokens = total_tokens,
            chunks = chunks.len(),
            max_tokens = self.config.max_chunk_tokens,
            "Corpus exceeds single-call limit; chunking"
        );

        let manifest = ChunkManifest::new(
            &chunks,
            SplitParams {
                max_tokens_per_chunk: self.config.max_chunk_tokens,
                counter: self.counter.identity(),
            },
            SourceInfo {
                case_id: case.case_id.clone(),
                dump_path: case.dump_path.clone(),
                content_sha256: sha256_hex(corpus),
            },
        );

        let store = ChunkStore::open(Self::chunk_dir(evidence_dir, kind))?;
        let prepare = store.prepare(&chunks, &manifest)?;
        store.begin_analysis();

        let loaded = match prepare {
            PrepareOutcome::Reused => store.load_results()?,
            PrepareOutcome::Written => Default::default(),
        };

        let processor = self.processor(ChunkProcessor::new(self.config.processor.clone(), &store));
        let report = processor.process(&chunks, loaded.results, analyzer, request);

        if !report.failures.is_empty() {
            warn!(
                %kind,
                failed = report.failures.len(),
                total = report.total_chunks,
                "Some chunks failed; combining the rest. Rerun to resume."
            );
        }

        Ok(Pass {
            combined: combine(&report.results),
            mode: AnalysisMode::Chunked {
                prepare,
                reused: report.reused,
            },
            total_chunks: report.total_chunks,
            failures: report.failures,
            usage: Some(report.usage),
            skipped_results: loaded.skipped,
        })
    }

    fn processor<'a>(&'a self, processor: ChunkProcessor<'a>) -> ChunkProcessor<'a> {
        let processor = processor.with_cancellation(self.cancel.clone());
        match self.progress.as_deref() {
            Some(progress) => processor.with_progress(progress),
            None => processor,
        }
    }
}

/// Write `record` to `<evidence>/analysis_results/<kind>_analysis_<time>.json`.
pub fn archive_record(
    evidence_dir: &Path,
    record: &CombinedRecord,
) -> Result<PathBuf, AnalysisError> {
    let dir = evidence_dir.join(RESULTS_ARCHIVE_DIR);
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
    let path = dir.join(format!(
        "{}_analysis_{}.json",
        record.kind.record_prefix(),
        stamp
    ));

    let archive_err = |message: String| AnalysisError::Archive {
        path: path.clone(),
        message,
    };

    std::fs::create_dir_all(&dir).map_err(|e| archive_err(e.to_string()))?;
    let json = serde_json::to_string_pretty(record).map_err(|e| archive_err(e.to_string()))?;
    write_atomic(&path, json.as_bytes()).map_err(|e| archive_err(e.to_string()))?;
    Ok(path)
}
