//! Integration tests for chunked, resumable analysis

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use memtriage::analysis::{
    AnalysisError, AnalysisKind, AnalysisMode, AnalysisStage, AnalyzerError, CombinedRecord,
    PrepareOutcome, ProgressReporter, Severity,
};
use tempfile::TempDir;

use super::helpers::{
    assessment, case, chunk_sequence, corpus_lines, finding, rate_limited, stage, MockAnalyzer,
};

fn chunk_dir(temp: &TempDir) -> std::path::PathBuf {
    AnalysisStage::chunk_dir(temp.path(), AnalysisKind::Triage)
}

// ============================================
// Chunking and combination
// ============================================

#[test]
#[cfg_attr(miri, ignore)]
fn oversized_corpus_is_chunked_persisted_and_combined() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::by_sequence();

    let outcome = stage()
        .run(&corpus_lines(25), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(
        outcome.mode,
        AnalysisMode::Chunked {
            prepare: PrepareOutcome::Written,
            reused: 0
        }
    );
    assert_eq!(outcome.total_chunks, 5);
    assert_eq!(outcome.analyzed_chunks(), 5);
    assert_eq!(outcome.combined.threat_score, 4.0);
    assert_eq!(outcome.combined.max_score_source_index, Some(4));
    assert_eq!(outcome.combined.source_sequence_numbers, vec![0, 1, 2, 3, 4]);
    assert!((outcome.combined.confidence - 0.5).abs() < 1e-9);

    let dir = chunk_dir(&temp);
    assert!(dir.join("chunks_metadata.json").exists());
    for seq in 0..5 {
        assert!(dir.join(format!("chunk_{:06}.txt", seq)).exists());
        assert!(dir.join("results").join(format!("chunk_{:06}.json", seq)).exists());
    }

    let mut rejoined = String::new();
    for seq in 0..5 {
        rejoined.push_str(&fs::read_to_string(dir.join(format!("chunk_{:06}.txt", seq))).unwrap());
    }
    assert_eq!(rejoined, corpus_lines(25));
}

#[test]
#[cfg_attr(miri, ignore)]
fn analyzer_sees_chunk_positions() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new(|_, request, _| {
        let position = request.position.expect("chunked calls carry a position");
        assert_eq!(position.total_chunks, 3);
        assert_eq!(request.case.case_id, "case-42");
        Ok(assessment(1.0, 0.9))
    });

    stage()
        .run(&corpus_lines(15), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    let mut positions = analyzer.positions();
    positions.sort();
    assert_eq!(positions, vec![Some(0), Some(1), Some(2)]);
}

#[test]
#[cfg_attr(miri, ignore)]
fn combined_record_is_archived() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new(|_, request, _| {
        let mut a = assessment(6.0, 0.8);
        a.findings = vec![finding(
            &format!("hollowed process in chunk {}", chunk_sequence(request).unwrap()),
            Severity::High,
        )];
        Ok(a)
    });

    let outcome = stage()
        .run(&corpus_lines(10), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    let record_path = outcome.record_path.as_ref().unwrap();
    assert!(record_path.starts_with(temp.path().join("analysis_results")));
    let name = record_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("triage_analysis_"), "{}", name);

    let record: CombinedRecord =
        serde_json::from_str(&fs::read_to_string(record_path).unwrap()).unwrap();
    assert_eq!(record.kind, AnalysisKind::Triage);
    assert_eq!(record.total_chunks, 2);
    assert_eq!(record.analyzed_chunks, 2);
    assert!(record.failed_sequence_numbers.is_empty());
    assert_eq!(record.result, outcome.combined);
    assert_eq!(record.result.findings.len(), 2);
    assert_eq!(record.result.highest_severity(), Some(Severity::High));
}

#[test]
#[cfg_attr(miri, ignore)]
fn deeper_pass_uses_its_own_chunk_directory() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::constant(3.0, 0.9);

    let outcome = stage()
        .run(&corpus_lines(10), temp.path(), AnalysisKind::Deeper, &case(), &analyzer)
        .unwrap();

    assert!(temp.path().join("deeper_analysis_chunks/chunks_metadata.json").exists());
    assert!(!temp.path().join("analysis_chunks").exists());
    let name = outcome
        .record_path
        .as_ref()
        .and_then(|p| p.file_name())
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert!(name.starts_with("deeper_analysis_"));
}

#[test]
#[cfg_attr(miri, ignore)]
fn archive_failure_keeps_combined_result() {
    let temp = TempDir::new().unwrap();
    // A file where the archive directory belongs makes every archive write fail
    fs::write(temp.path().join("analysis_results"), "not a directory").unwrap();
    let analyzer = MockAnalyzer::by_sequence();

    let outcome = stage()
        .run(&corpus_lines(15), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert!(outcome.record_path.is_none());
    assert_eq!(outcome.combined.source_chunk_count, 3);
    assert_eq!(outcome.combined.threat_score, 2.0);
    assert!(chunk_dir(&temp).join("results").join("chunk_000002.json").exists());
}

// ============================================
// Resumability
// ============================================

#[test]
#[cfg_attr(miri, ignore)]
fn rerun_reuses_every_persisted_result() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::by_sequence();
    let corpus = corpus_lines(25);

    let first = stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();
    assert_eq!(analyzer.call_count(), 5);

    let second = stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(analyzer.call_count(), 5, "no chunk may be analyzed twice");
    assert_eq!(
        second.mode,
        AnalysisMode::Chunked {
            prepare: PrepareOutcome::Reused,
            reused: 5
        }
    );
    assert_eq!(first.combined, second.combined);
    assert_eq!(second.usage.as_ref().unwrap().reused_chunks, 5);
    assert_eq!(second.usage.as_ref().unwrap().tokens_sent, 0);
}

#[test]
#[cfg_attr(miri, ignore)]
fn failed_chunk_is_resumed_on_rerun() {
    let temp = TempDir::new().unwrap();
    let corpus = corpus_lines(25);

    let flaky = MockAnalyzer::new(|_, request, _| match chunk_sequence(request) {
        Some(2) => Err(AnalyzerError::Failed("model returned garbage".to_string())),
        Some(seq) => Ok(assessment(seq as f64, 0.5)),
        None => unreachable!(),
    });
    let first = stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &flaky)
        .unwrap();

    assert_eq!(first.combined.source_chunk_count, 4);
    assert_eq!(first.combined.source_sequence_numbers, vec![0, 1, 3, 4]);
    assert_eq!(first.failed_sequence_numbers(), vec![2]);
    assert_eq!(flaky.calls_for(2), 1, "permanent errors are not retried");
    assert!(matches!(
        first.failures[0].error,
        AnalysisError::ChunkFailed { sequence_number: 2, .. }
    ));

    let healthy = MockAnalyzer::by_sequence();
    let second = stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &healthy)
        .unwrap();

    assert_eq!(healthy.call_count(), 1);
    assert_eq!(healthy.calls_for(2), 1);
    assert_eq!(second.combined.source_chunk_count, 5);
    assert!(second.failures.is_empty());

    // Same corpus analyzed in one uninterrupted run
    let baseline_dir = TempDir::new().unwrap();
    let uninterrupted = stage()
        .run(
            &corpus,
            baseline_dir.path(),
            AnalysisKind::Triage,
            &case(),
            &MockAnalyzer::by_sequence(),
        )
        .unwrap();
    assert_eq!(second.combined, uninterrupted.combined);
}

#[test]
#[cfg_attr(miri, ignore)]
fn corrupt_result_file_is_reported_and_reanalyzed() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::by_sequence();
    let corpus = corpus_lines(15);

    stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();
    let corrupt = chunk_dir(&temp).join("results").join("chunk_000001.json");
    fs::write(&corrupt, "{\"sequence_number\": 1, \"threat_sc").unwrap();

    let outcome = stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(analyzer.calls_for(1), 2);
    assert_eq!(analyzer.calls_for(0), 1);
    assert_eq!(outcome.skipped_results.len(), 1);
    assert_eq!(outcome.skipped_results[0].path, corrupt);
    assert_eq!(outcome.combined.source_chunk_count, 3);
}

#[test]
#[cfg_attr(miri, ignore)]
fn changed_split_configuration_resplits() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::by_sequence();
    let corpus = corpus_lines(25);

    stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    let mut config = super::helpers::stage_config();
    config.max_chunk_tokens = 100;
    let wider = AnalysisStage::new(
        config,
        Arc::new(memtriage::HeuristicTokenCounter::new(4.0)),
    );
    let outcome = wider
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(
        outcome.mode,
        AnalysisMode::Chunked {
            prepare: PrepareOutcome::Written,
            reused: 0
        }
    );
    assert_eq!(outcome.total_chunks, 3);
    let results = fs::read_dir(chunk_dir(&temp).join("results")).unwrap().count();
    assert_eq!(results, 3, "stale results from the old split are removed");
}

#[test]
#[cfg_attr(miri, ignore)]
fn changed_input_resplits() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::by_sequence();

    stage()
        .run(&corpus_lines(25), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();
    let mut changed = corpus_lines(25);
    changed.push_str("9999 0x00000000 evil.exe injected code!\n");
    let outcome = stage()
        .run(&changed, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert!(matches!(
        outcome.mode,
        AnalysisMode::Chunked {
            prepare: PrepareOutcome::Written,
            ..
        }
    ));
    assert_eq!(outcome.total_chunks, 6);
    assert_eq!(analyzer.call_count(), 11);
}

// ============================================
// Retries and cancellation
// ============================================

#[test]
#[cfg_attr(miri, ignore)]
fn rate_limited_chunk_is_retried() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new(|_, request, attempt| {
        if chunk_sequence(request) == Some(1) && attempt == 1 {
            Err(rate_limited())
        } else {
            Ok(assessment(2.0, 0.9))
        }
    });

    let outcome = stage()
        .run(&corpus_lines(15), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.combined.source_chunk_count, 3);
    assert_eq!(analyzer.calls_for(1), 2);
    assert_eq!(outcome.usage.as_ref().unwrap().total_retries, 1);
}

#[test]
#[cfg_attr(miri, ignore)]
fn persistent_rate_limit_exhausts_attempts() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new(|_, request, _| {
        if chunk_sequence(request) == Some(0) {
            Err(rate_limited())
        } else {
            Ok(assessment(2.0, 0.9))
        }
    });

    let outcome = stage()
        .run(&corpus_lines(15), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(analyzer.calls_for(0), 3);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].attempts, 3);
    assert!(outcome.failures[0].error.is_rate_limited());
    assert_eq!(outcome.combined.source_sequence_numbers, vec![1, 2]);
}

#[test]
#[cfg_attr(miri, ignore)]
fn timeouts_are_retried() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new(|_, _, attempt| {
        if attempt < 3 {
            Err(AnalyzerError::Timeout(Duration::from_secs(5)))
        } else {
            Ok(assessment(1.0, 0.9))
        }
    });

    let outcome = stage()
        .run(&corpus_lines(10), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.combined.source_chunk_count, 2);
    assert_eq!(analyzer.call_count(), 6);
}

#[test]
#[cfg_attr(miri, ignore)]
fn cancelled_batch_fails_chunks_and_resumes_later() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::by_sequence();
    let corpus = corpus_lines(15);

    let cancelled = stage();
    cancelled.cancellation_token().cancel();
    let outcome = cancelled
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(analyzer.call_count(), 0);
    assert_eq!(outcome.combined.source_chunk_count, 0);
    assert_eq!(outcome.failed_sequence_numbers(), vec![0, 1, 2]);
    assert!(outcome.failures.iter().all(|f| f.error.is_retriable()));

    let resumed = stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();
    assert_eq!(resumed.combined.source_chunk_count, 3);
}

// ============================================
// Concurrency
// ============================================

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_calls_never_exceed_limit() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::constant(1.0, 0.9).with_delay(Duration::from_millis(20));

    let outcome = stage()
        .run(&corpus_lines(50), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.combined.source_chunk_count, 10);
    assert!(analyzer.max_in_flight() <= 2, "saw {}", analyzer.max_in_flight());
    assert!(analyzer.max_in_flight() >= 1);
}

#[test]
#[cfg_attr(miri, ignore)]
fn progress_reports_every_pending_chunk() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::constant(1.0, 0.9);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_cb = Arc::clone(&seen);
    let progress = Arc::new(ProgressReporter::with_callback(move |_, total| {
        assert_eq!(total, 4);
        seen_cb.fetch_add(1, Ordering::SeqCst);
    }));

    let stage = stage().with_progress(Arc::clone(&progress));
    stage
        .run(&corpus_lines(20), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 4);
    assert_eq!(progress.get_progress(), (4, 4));
}

// ============================================
// Small and degenerate corpora
// ============================================

#[test]
fn small_corpus_is_analyzed_in_one_call() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::constant(5.5, 0.7);

    let outcome = stage()
        .run(&corpus_lines(3), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.mode, AnalysisMode::SingleShot);
    assert_eq!(outcome.total_chunks, 1);
    assert_eq!(analyzer.positions(), vec![None]);
    assert_eq!(outcome.combined.source_chunk_count, 1);
    assert_eq!(outcome.combined.threat_score, 5.5);
    assert!(!chunk_dir(&temp).exists(), "single-shot analysis persists no chunks");
    assert!(outcome.record_path.as_ref().unwrap().exists());
}

#[test]
fn single_shot_retries_transient_errors() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new(|_, _, attempt| {
        if attempt == 1 {
            Err(rate_limited())
        } else {
            Ok(assessment(3.0, 0.9))
        }
    });

    let outcome = stage()
        .run(&corpus_lines(2), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(analyzer.call_count(), 2);
    assert_eq!(outcome.combined.source_chunk_count, 1);
}

#[test]
fn empty_corpus_skips_analyzer() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::constant(9.0, 1.0);

    let outcome = stage()
        .run("  \n\n", temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.mode, AnalysisMode::Empty);
    assert_eq!(analyzer.call_count(), 0);
    assert_eq!(outcome.combined.source_chunk_count, 0);
    assert_eq!(outcome.combined.threat_score, 0.0);
    assert!(outcome.record_path.as_ref().unwrap().exists());
}

#[test]
#[cfg_attr(miri, ignore)]
fn oversized_line_is_analyzed_as_its_own_chunk() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::constant(1.0, 0.9);
    let long_line = format!("{}\n", "A".repeat(399));
    let corpus = format!("{}{}{}", corpus_lines(3), long_line, corpus_lines(3));

    let outcome = stage()
        .run(&corpus, temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.total_chunks, 3);
    let middle = fs::read_to_string(chunk_dir(&temp).join("chunk_000001.txt")).unwrap();
    assert_eq!(middle, long_line);
}

#[test]
#[cfg_attr(miri, ignore)]
fn out_of_range_scores_are_clamped() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::constant(14.0, 1.3);

    let outcome = stage()
        .run(&corpus_lines(10), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.combined.threat_score, 10.0);
    assert_eq!(outcome.combined.confidence, 1.0);
}

#[test]
#[cfg_attr(miri, ignore)]
fn non_finite_scores_fail_the_chunk() {
    let temp = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new(|_, request, _| {
        if chunk_sequence(request) == Some(1) {
            Ok(assessment(f64::NAN, 0.5))
        } else {
            Ok(assessment(2.0, 0.5))
        }
    });

    let outcome = stage()
        .run(&corpus_lines(10), temp.path(), AnalysisKind::Triage, &case(), &analyzer)
        .unwrap();

    assert_eq!(outcome.failed_sequence_numbers(), vec![1]);
    assert_eq!(outcome.combined.source_chunk_count, 1);
}
