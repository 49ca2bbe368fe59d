//! Per-chunk usage accounting for a processing batch.
//!
//! The processor records one [`ChunkUsage`] per chunk it touched, including
//! chunks whose results were reused from disk. The summary is logged after
//! each batch and returned in the process report.

use std::time::{Duration, Instant};

/// How a chunk ended up in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Analyzed in this run
    Analyzed,
    /// Result loaded from a previous run
    Reused,
    /// Gave up after retries or a permanent error
    Failed,
}

/// Usage information for a single chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUsage {
    pub sequence_number: usize,
    /// Token count as recorded by the splitter
    pub tokens: usize,
    /// Wall time spent on this chunk, waits included
    pub duration: Duration,
    pub outcome: ChunkOutcome,
    /// Analyzer calls made; zero for reused chunks
    pub attempts: usize,
}

/// Summary report of a processing batch.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSummary {
    pub chunks_processed: usize,
    pub analyzed_chunks: usize,
    pub reused_chunks: usize,
    pub failed_chunks: usize,
    /// Tokens sent to the analyzer in this run (reused chunks excluded)
    pub tokens_sent: usize,
    pub total_duration: Duration,
    /// Share of chunks with a usable result, 0.0 - 1.0
    pub success_rate: f64,
    /// Calls beyond the first attempt of each chunk
    pub total_retries: usize,
}

/// Collects [`ChunkUsage`] records for one batch.
#[derive(Debug)]
pub struct TokenTracker {
    chunk_usage: Vec<ChunkUsage>,
    start_time: Instant,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self {
            chunk_usage: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record(&mut self, usage: ChunkUsage) {
        self.chunk_usage.push(usage);
    }

    /// Record a chunk whose result was already on disk.
    pub fn record_reused(&mut self, sequence_number: usize, tokens: usize) {
        self.record(ChunkUsage {
            sequence_number,
            tokens,
            duration: Duration::ZERO,
            outcome: ChunkOutcome::Reused,
            attempts: 0,
        });
    }

    pub fn get(&self, sequence_number: usize) -> Option<&ChunkUsage> {
        self.chunk_usage
            .iter()
            .find(|u| u.sequence_number == sequence_number)
    }

    pub fn all_chunks(&self) -> &[ChunkUsage] {
        &self.chunk_usage
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn summary(&self) -> UsageSummary {
        let count = |outcome: ChunkOutcome| {
            self.chunk_usage
                .iter()
                .filter(|u| u.outcome == outcome)
                .count()
        };

        let chunks_processed = self.chunk_usage.len();
        let analyzed_chunks = count(ChunkOutcome::Analyzed);
        let reused_chunks = count(ChunkOutcome::Reused);
        let failed_chunks = count(ChunkOutcome::Failed);

        let tokens_sent = self
            .chunk_usage
            .iter()
            .filter(|u| u.outcome != ChunkOutcome::Reused)
            .map(|u| u.tokens)
            .sum();

        let success_rate = if chunks_processed > 0 {
            (analyzed_chunks + reused_chunks) as f64 / chunks_processed as f64
        } else {
            0.0
        };

        let total_retries = self
            .chunk_usage
            .iter()
            .map(|u| u.attempts.saturating_sub(1))
            .sum();

        UsageSummary {
            chunks_processed,
            analyzed_chunks,
            reused_chunks,
            failed_chunks,
            tokens_sent,
            total_duration: self.elapsed(),
            success_rate,
            total_retries,
        }
    }

    /// Multi-line human-readable summary.
    pub fn format_summary(&self) -> String {
        let summary = self.summary();
        let mut output = String::new();

        output.push_str("Chunk analysis summary:\n");
        output.push_str(&format!(
            "   Chunks: {} ({} analyzed, {} reused, {} failed)\n",
            summary.chunks_processed,
            summary.analyzed_chunks,
            summary.reused_chunks,
            summary.failed_chunks
        ));
        output.push_str(&format!(
            "   Tokens sent: ~{}\n",
            format_number(summary.tokens_sent)
        ));
        output.push_str(&format!(
            "   Duration: {}\n",
            format_duration(summary.total_duration)
        ));
        output.push_str(&format!(
            "   Success rate: {:.0}%\n",
            summary.success_rate * 100.0
        ));
        if summary.total_retries > 0 {
            output.push_str(&format!("   Retries: {}\n", summary.total_retries));
        }

        output
    }
}

impl Default for TokenTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
