//! Configuration type definitions and defaults

use serde::{Deserialize, Serialize};

use crate::analysis::Severity;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Chunked analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Corpora above this many tokens are split into chunks
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    /// Heuristic token counter ratio
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,
    /// Maximum analyzer calls in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Timeout per analyzer call in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

pub fn default_max_chunk_tokens() -> usize {
    20_000
}

pub fn default_chars_per_token() -> f64 {
    4.0
}

pub fn default_concurrency() -> usize {
    2
}

pub fn default_call_timeout() -> u64 {
    120
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_chunk_tokens: default_max_chunk_tokens(),
            chars_per_token: default_chars_per_token(),
            concurrency: default_concurrency(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Per-chunk retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per chunk, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the wait
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

pub fn default_max_attempts() -> usize {
    5
}

pub fn default_base_delay_ms() -> u64 {
    1_000
}

pub fn default_max_delay_ms() -> u64 {
    60_000
}

pub fn default_jitter_ratio() -> f64 {
    0.25
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// Pipeline transition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Plan retries before the run ends as partial
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Triage threat score that triggers deeper analysis
    #[serde(default = "default_threat_threshold")]
    pub threat_threshold: f64,
    /// Triage confidence below which deeper analysis runs
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    /// Also escalate on a finding at or above this severity
    #[serde(default)]
    pub escalate_on_severity: Option<Severity>,
}

pub fn default_max_retries() -> usize {
    5
}

pub fn default_threat_threshold() -> f64 {
    7.0
}

pub fn default_confidence_floor() -> f64 {
    0.8
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            threat_threshold: default_threat_threshold(),
            confidence_floor: default_confidence_floor(),
            escalate_on_severity: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root for per-case evidence directories
    #[serde(default = "default_evidence_directory")]
    pub evidence_directory: String,
}

pub fn default_evidence_directory() -> String {
    "~/memtriage_evidence".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            evidence_directory: default_evidence_directory(),
        }
    }
}
