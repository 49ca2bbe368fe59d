//! Token counting for size decisions.
//!
//! The splitter and the single-shot check only need a monotone estimate of how
//! much of the analyzer's input budget a piece of text consumes. Counting is
//! pluggable so a real tokenizer can replace the heuristic without touching
//! the splitter.

/// Counts tokens in a piece of text.
///
/// Implementations must be deterministic: the same text always yields the same
/// count. Chunk identity across runs depends on it.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in `text`. Empty text counts as zero.
    fn count(&self, text: &str) -> usize;

    /// Stable identity recorded in the chunk manifest.
    ///
    /// Two counters with the same identity must count identically. A changed
    /// identity forces a resplit of persisted chunks.
    fn identity(&self) -> String;
}

/// Default characters per token for forensic tool output.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Character-ratio token estimate.
///
/// `ceil(chars / chars_per_token)`; no tokenizer dependency.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    chars_per_token: f64,
}

impl HeuristicTokenCounter {
    /// Create a counter with a custom ratio.
    ///
    /// Non-positive or non-finite ratios fall back to the default.
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let char_count = text.chars().count();
        if char_count == 0 {
            return 0;
        }
        (char_count as f64 / self.chars_per_token).ceil() as usize
    }

    fn identity(&self) -> String {
        format!("heuristic:chars_per_token={}", self.chars_per_token)
    }
}
