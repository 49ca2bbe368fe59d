//! Merge per-chunk results into one corpus-level result.
//!
//! Aggregation policy:
//! - threat score: maximum, ties go to the lowest sequence number
//! - confidence: arithmetic mean
//! - findings: concatenated in sequence order, exact duplicates of
//!   (description, evidence text) dropped
//! - indicators and recommended actions: set union
//!
//! The combiner is pure; input order does not matter.

use std::collections::{BTreeSet, HashSet};

use super::types::{ChunkResult, CombinedResult, Finding};

/// Number of findings named in the executive summary.
const SUMMARY_TOP_FINDINGS: usize = 3;

/// Combine chunk results. Empty input yields [`CombinedResult::empty`].
pub fn combine(results: &[ChunkResult]) -> CombinedResult {
    if results.is_empty() {
        return CombinedResult::empty();
    }

    let mut ordered: Vec<&ChunkResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.sequence_number);

    let mut threat_score = f64::NEG_INFINITY;
    let mut max_score_source_index = None;
    for result in &ordered {
        if result.threat_score > threat_score {
            threat_score = result.threat_score;
            max_score_source_index = Some(result.sequence_number);
        }
    }

    let confidence =
        ordered.iter().map(|r| r.confidence).sum::<f64>() / ordered.len() as f64;

    let mut seen = HashSet::new();
    let mut findings: Vec<Finding> = Vec::new();
    for finding in ordered.iter().flat_map(|r| r.findings.iter()) {
        let key = (finding.description.clone(), finding.evidence_text.clone());
        if seen.insert(key) {
            findings.push(finding.clone());
        }
    }

    let indicators: BTreeSet<String> = ordered
        .iter()
        .flat_map(|r| r.indicators.iter().cloned())
        .collect();
    let recommended_actions: BTreeSet<String> = ordered
        .iter()
        .flat_map(|r| r.recommended_actions.iter().cloned())
        .collect();

    let source_sequence_numbers: Vec<usize> = ordered.iter().map(|r| r.sequence_number).collect();

    let mut combined = CombinedResult {
        threat_score,
        confidence,
        findings,
        indicators,
        recommended_actions,
        executive_summary: String::new(),
        source_chunk_count: ordered.len(),
        max_score_source_index,
        source_sequence_numbers,
    };
    combined.executive_summary = executive_summary(&combined);
    combined
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Deterministic summary text for a combined result.
pub fn executive_summary(combined: &CombinedResult) -> String {
    let chunks = combined.source_chunk_count;
    let mut summary = format!(
        "Analyzed {} chunk{}. Overall threat score {:.1}/10",
        chunks,
        plural(chunks),
        combined.threat_score
    );
    if let Some(index) = combined.max_score_source_index {
        if chunks > 1 {
            summary.push_str(&format!(" (highest in chunk {})", index));
        }
    }
    summary.push_str(&format!(
        ", mean confidence {:.2}. {} unique finding{}, {} indicator{}.",
        combined.confidence,
        combined.findings.len(),
        plural(combined.findings.len()),
        combined.indicators.len(),
        plural(combined.indicators.len())
    ));

    if let Some(severity) = combined.highest_severity() {
        let mut ranked: Vec<&Finding> = combined.findings.iter().collect();
        // Stable sort keeps sequence order within a severity
        ranked.sort_by(|a, b| b.severity.cmp(&a.severity));
        let top: Vec<&str> = ranked
            .iter()
            .take(SUMMARY_TOP_FINDINGS)
            .map(|f| f.description.as_str())
            .collect();
        summary.push_str(&format!(
            " Highest severity: {}. Top findings: {}.",
            severity,
            top.join("; ")
        ));
    }

    summary
}
