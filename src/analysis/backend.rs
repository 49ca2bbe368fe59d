//! Analyzer contract and response parsing helpers.
//!
//! The analyzer is the external language-model collaborator. This crate never
//! talks to a model directly; callers provide an [`Analyzer`] implementation
//! and the processor drives it with retries and bounded concurrency.
//!
//! # Design
//!
//! Implementations must be thread-safe: the processor calls `analyze` from
//! several worker threads at once. Transient conditions (rate limiting,
//! timeouts) are reported through dedicated error variants so the retry
//! policy can tell them apart from permanent failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{AnalysisKind, Assessment};
use crate::case::CaseInputs;

/// Result type for analyzer calls.
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// Where a piece of context sits within a chunked corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub sequence_number: usize,
    pub total_chunks: usize,
}

/// Everything an analyzer needs besides the context text itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub kind: AnalysisKind,
    pub case: CaseInputs,
    /// `None` for single-shot analysis of the whole corpus
    pub position: Option<ChunkPosition>,
}

impl AnalysisRequest {
    pub fn new(kind: AnalysisKind, case: CaseInputs) -> Self {
        Self {
            kind,
            case,
            position: None,
        }
    }

    /// Copy of this request scoped to one chunk.
    pub fn for_chunk(&self, sequence_number: usize, total_chunks: usize) -> Self {
        Self {
            position: Some(ChunkPosition {
                sequence_number,
                total_chunks,
            }),
            ..self.clone()
        }
    }
}

/// The analysis collaborator.
pub trait Analyzer: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Analyze `context` and return a structured assessment.
    ///
    /// `timeout` is the per-call budget. Implementations should give up and
    /// return [`AnalyzerError::Timeout`] once it is exceeded.
    fn analyze(
        &self,
        context: &str,
        request: &AnalysisRequest,
        timeout: Duration,
    ) -> AnalyzerResult<Assessment>;
}

/// Errors reported by an analyzer.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Rate limited: {0}")]
    RateLimited(RateLimitInfo),

    #[error("Analyzer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Analyzer unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to parse response as JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to extract assessment from response: {}", truncate(.response, 120))]
    InvalidResponse { response: String },

    #[error("Analyzer failed: {0}")]
    Failed(String),
}

impl AnalyzerError {
    /// Rate limits and timeouts may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalyzerError::RateLimited(_) | AnalyzerError::Timeout(_))
    }

    /// Wait suggested by the analyzer, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AnalyzerError::RateLimited(info) => info.retry_after,
            _ => None,
        }
    }
}

/// Rate limit information extracted from an analyzer response.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// Suggested wait before the next attempt
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(retry_after) = self.retry_after {
            write!(f, "{} (retry after {:?})", self.message, retry_after)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Parse an assessment out of raw analyzer text.
///
/// Accepts, in order: a bare JSON object, a fenced ```json block, or the
/// outermost `{`..`}` span embedded in prose. The parsed object is kept in
/// `raw` when the payload does not carry its own.
pub fn parse_assessment(response: &str) -> AnalyzerResult<Assessment> {
    let trimmed = response.trim();

    let mut candidates: Vec<&str> = vec![trimmed];
    if let Some(block) = extract_from_code_block(trimmed) {
        candidates.push(block);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }

    let mut last_json_error = None;
    for candidate in candidates {
        let value: serde_json::Value = match serde_json::from_str(candidate.trim()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        match serde_json::from_value::<Assessment>(value.clone()) {
            Ok(mut assessment) => {
                if assessment.raw.is_null() {
                    assessment.raw = value;
                }
                return Ok(assessment);
            }
            // Valid JSON with the wrong shape; remember why
            Err(e) => last_json_error = Some(e),
        }
    }

    match last_json_error {
        Some(e) => Err(AnalyzerError::JsonParse(e)),
        None => Err(AnalyzerError::InvalidResponse {
            response: response.to_string(),
        }),
    }
}

fn extract_from_code_block(text: &str) -> Option<&str> {
    let patterns = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for pattern in patterns {
        if let Some(start) = text.find(pattern) {
            let json_start = start + pattern.len();
            if let Some(end) = text[json_start..].find("```") {
                return Some(&text[json_start..json_start + end]);
            }
        }
    }
    None
}

/// Recognize rate-limit wording in an analyzer error message.
///
/// Returns `None` if the text does not look like a rate limit. The extracted
/// wait is a best-effort hint; callers cap it.
pub fn parse_rate_limit_hint(text: &str) -> Option<RateLimitInfo> {
    let lower = text.to_lowercase();

    let is_rate_limited = lower.contains("rate limit")
        || lower.contains("rate_limit")
        || contains_status_code(&lower, "429")
        || lower.contains("too many requests")
        || lower.contains("quota exceeded")
        || lower.contains("resource_exhausted");

    if !is_rate_limited {
        return None;
    }

    Some(RateLimitInfo {
        retry_after: extract_retry_wait(&lower),
        message: text
            .lines()
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("Rate limited")
            .to_string(),
    })
}

/// Whether `code` appears as a standalone number, not inside a longer one.
fn contains_status_code(text: &str, code: &str) -> bool {
    text.match_indices(code).any(|(pos, _)| {
        let before = text[..pos].chars().next_back();
        let after = text[pos + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
    })
}

fn extract_retry_wait(lower: &str) -> Option<Duration> {
    const KEYWORDS: [&str; 5] = [
        "try again in ",
        "retry after ",
        "retry-after:",
        "retry_after",
        "retry in ",
    ];

    KEYWORDS.iter().find_map(|keyword| {
        let pos = lower.find(keyword)?;
        parse_leading_duration(&lower[pos + keyword.len()..])
    })
}

/// Parse "2.5s", "250ms", "45 seconds", ": 30" at the start of `s`.
fn parse_leading_duration(s: &str) -> Option<Duration> {
    let s = s.trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == '=');
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let number: f64 = s[..end].trim_end_matches('.').parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }

    let unit = s[end..].trim_start();
    let secs = if unit.starts_with("ms") || unit.starts_with("millisecond") {
        number / 1000.0
    } else if unit.starts_with("min") {
        number * 60.0
    } else {
        number
    };
    // Absurd waits are not a usable hint
    Duration::try_from_secs_f64(secs).ok()
}

fn truncate(text: &str, max_len: usize) -> String {
    let first_line = text.trim().lines().next().unwrap_or("");
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}
