//! Configuration management for memtriage

mod io;
mod types;

pub use types::*;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{HeuristicTokenCounter, ProcessorConfig, RetryPolicy, StageConfig};
use crate::pipeline::TransitionPolicy;

impl Settings {
    /// Get the config file path (~/.config/memtriage/config.toml)
    pub fn config_path() -> Result<PathBuf> {
        io::config_path()
    }

    /// Get the config directory path (~/.config/memtriage)
    pub fn config_dir() -> Result<PathBuf> {
        io::config_dir()
    }

    /// Load configuration from the default path, or return defaults if not found
    pub fn load() -> Result<Self> {
        io::load_from(&io::config_path()?)
    }

    /// Load configuration from `path`, or return defaults if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        io::load_from(path)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        io::save_to(self, &io::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        io::save_to(self, path)
    }

    /// Validate configuration values.
    ///
    /// Returns `Ok(())` if all values are within acceptable bounds,
    /// or an error describing the first invalid value found.
    pub fn validate(&self) -> Result<(), String> {
        let analysis = &self.analysis;
        if analysis.max_chunk_tokens == 0 {
            return Err("analysis.max_chunk_tokens must be > 0".to_string());
        }
        if !analysis.chars_per_token.is_finite() || analysis.chars_per_token <= 0.0 {
            return Err(format!(
                "analysis.chars_per_token {} must be a positive number",
                analysis.chars_per_token
            ));
        }
        if analysis.concurrency == 0 {
            return Err("analysis.concurrency must be > 0".to_string());
        }
        if analysis.concurrency > 32 {
            return Err(format!(
                "analysis.concurrency {} exceeds maximum (32)",
                analysis.concurrency
            ));
        }
        if analysis.call_timeout_secs == 0 {
            return Err("analysis.call_timeout_secs must be > 0".to_string());
        }
        if analysis.call_timeout_secs > 3600 {
            return Err(format!(
                "analysis.call_timeout_secs {} exceeds maximum (3600s)",
                analysis.call_timeout_secs
            ));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".to_string());
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(format!(
                "retry.base_delay_ms {} exceeds retry.max_delay_ms {}",
                retry.base_delay_ms, retry.max_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_ratio) {
            return Err(format!(
                "retry.jitter_ratio {} must be between 0.0 and 1.0",
                retry.jitter_ratio
            ));
        }

        let pipeline = &self.pipeline;
        if !(0.0..=10.0).contains(&pipeline.threat_threshold) {
            return Err(format!(
                "pipeline.threat_threshold {} must be between 0 and 10",
                pipeline.threat_threshold
            ));
        }
        if !(0.0..=1.0).contains(&pipeline.confidence_floor) {
            return Err(format!(
                "pipeline.confidence_floor {} must be between 0.0 and 1.0",
                pipeline.confidence_floor
            ));
        }
        Ok(())
    }

    /// Expand ~ in the evidence directory path
    pub fn evidence_directory(&self) -> PathBuf {
        let dir = &self.storage.evidence_directory;
        if let Some(stripped) = dir.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        }
        PathBuf::from(dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
            self.retry.jitter_ratio,
        )
    }

    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            max_chunk_tokens: self.analysis.max_chunk_tokens,
            processor: ProcessorConfig {
                concurrency_limit: self.analysis.concurrency,
                call_timeout: Duration::from_secs(self.analysis.call_timeout_secs),
                retry: self.retry_policy(),
            },
        }
    }

    pub fn token_counter(&self) -> Arc<HeuristicTokenCounter> {
        Arc::new(HeuristicTokenCounter::new(self.analysis.chars_per_token))
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        TransitionPolicy {
            max_retries: self.pipeline.max_retries,
            threat_threshold: self.pipeline.threat_threshold,
            confidence_floor: self.pipeline.confidence_floor,
            escalate_on_severity: self.pipeline.escalate_on_severity,
        }
    }
}
