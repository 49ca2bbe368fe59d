//! Data structures for chunked threat analysis.
//!
//! These types flow from the splitter through the processor and combiner.
//! All of them are immutable once constructed; persisted copies on disk are
//! the same serde shapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound of the threat score scale.
pub const MAX_THREAT_SCORE: f64 = 10.0;

/// Which investigation pass an analysis belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// First-pass analysis of the primary evidence
    Triage,
    /// Follow-up analysis of targeted evidence
    Deeper,
}

impl AnalysisKind {
    /// Directory name holding this pass's chunks under the evidence root.
    pub fn chunk_dir_name(&self) -> &'static str {
        match self {
            AnalysisKind::Triage => "analysis_chunks",
            AnalysisKind::Deeper => "deeper_analysis_chunks",
        }
    }

    /// File name prefix for archived combined records.
    pub fn record_prefix(&self) -> &'static str {
        match self {
            AnalysisKind::Triage => "triage",
            AnalysisKind::Deeper => "deeper",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisKind::Triage => write!(f, "triage"),
            AnalysisKind::Deeper => write!(f, "deeper analysis"),
        }
    }
}

/// A bounded-size, sequence-numbered slice of the analysis corpus.
///
/// The sequence number is the sole identity key. Splitting the same text with
/// the same configuration always yields byte-identical chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position in the split
    pub sequence_number: usize,
    /// Token count as measured by the splitter's counter
    pub token_count: usize,
    /// Raw text, line terminators included
    pub content: String,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(sequence_number: usize, token_count: usize, content: String) -> Self {
        Self {
            sequence_number,
            token_count,
            content,
        }
    }

    /// Number of characters in the chunk.
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A suspicious finding reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Kind of finding (process, network, persistence, injection, ...)
    pub category: String,
    /// What was observed
    pub description: String,
    pub severity: Severity,
    /// Artifact text supporting the finding
    #[serde(default)]
    pub evidence_text: String,
    /// Individual score on the 0-10 scale
    #[serde(default)]
    pub score: f64,
}

impl Finding {
    /// Key used for exact duplicate detection across chunks.
    pub fn dedup_key(&self) -> (&str, &str) {
        (self.description.as_str(), self.evidence_text.as_str())
    }
}

/// Structured assessment returned by an analyzer for one piece of context.
///
/// This is the analyzer-facing shape; the processor attaches the sequence
/// number to produce a [`ChunkResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub threat_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub indicators: BTreeSet<String>,
    #[serde(default)]
    pub recommended_actions: BTreeSet<String>,
    #[serde(default)]
    pub executive_summary: String,
    /// Opaque analyzer payload kept for auditing
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Assessment {
    /// Check that both scores are finite numbers.
    pub fn has_finite_scores(&self) -> bool {
        self.threat_score.is_finite() && self.confidence.is_finite()
    }

    /// Clamp scores into their documented ranges.
    ///
    /// Returns true if any value had to be adjusted.
    pub fn clamp_scores(&mut self) -> bool {
        let threat = self.threat_score.clamp(0.0, MAX_THREAT_SCORE);
        let confidence = self.confidence.clamp(0.0, 1.0);
        let adjusted = threat != self.threat_score || confidence != self.confidence;
        self.threat_score = threat;
        self.confidence = confidence;
        adjusted
    }
}

/// Analysis result of a single chunk.
///
/// Produced once per chunk and never mutated. May be loaded from the chunk
/// store instead of recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub sequence_number: usize,
    /// 0-10
    pub threat_score: f64,
    /// 0-1
    pub confidence: f64,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub indicators: BTreeSet<String>,
    #[serde(default)]
    pub recommended_actions: BTreeSet<String>,
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl ChunkResult {
    /// Attach a sequence number to an analyzer assessment.
    pub fn from_assessment(sequence_number: usize, assessment: Assessment) -> Self {
        Self {
            sequence_number,
            threat_score: assessment.threat_score,
            confidence: assessment.confidence,
            findings: assessment.findings,
            indicators: assessment.indicators,
            recommended_actions: assessment.recommended_actions,
            executive_summary: assessment.executive_summary,
            raw: assessment.raw,
        }
    }

    /// Check the score ranges of a persisted or freshly built result.
    pub fn is_well_formed(&self) -> bool {
        self.threat_score.is_finite()
            && (0.0..=MAX_THREAT_SCORE).contains(&self.threat_score)
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Aggregate of all successfully analyzed chunks of a corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    /// Maximum threat score over all sources
    pub threat_score: f64,
    /// Mean confidence over all sources
    pub confidence: f64,
    pub findings: Vec<Finding>,
    pub indicators: BTreeSet<String>,
    pub recommended_actions: BTreeSet<String>,
    pub executive_summary: String,
    /// Number of chunk results that contributed
    pub source_chunk_count: usize,
    /// Sequence number of the chunk that produced `threat_score`
    pub max_score_source_index: Option<usize>,
    /// Sequence numbers of all contributing chunks, ascending
    pub source_sequence_numbers: Vec<usize>,
}

impl CombinedResult {
    /// Result for a corpus where nothing could be analyzed.
    pub fn empty() -> Self {
        Self {
            threat_score: 0.0,
            confidence: 0.0,
            findings: Vec::new(),
            indicators: BTreeSet::new(),
            recommended_actions: BTreeSet::new(),
            executive_summary: "No analysis results were available to combine.".to_string(),
            source_chunk_count: 0,
            max_score_source_index: None,
            source_sequence_numbers: Vec::new(),
        }
    }

    /// Highest severity across all findings, if any.
    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}
