//! Line-preserving splitter for oversized corpora.
//!
//! Forensic tool output is line oriented, so chunks always end on a line
//! boundary. Concatenating the chunk contents in sequence order reproduces the
//! input byte for byte.

use std::sync::Arc;

use tracing::debug;

use super::tokens::TokenCounter;
use super::types::Chunk;

/// Splits text into chunks of at most `max_tokens_per_chunk` tokens.
#[derive(Clone)]
pub struct ChunkSplitter {
    max_tokens_per_chunk: usize,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for ChunkSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSplitter")
            .field("max_tokens_per_chunk", &self.max_tokens_per_chunk)
            .field("counter", &self.counter.identity())
            .finish()
    }
}

impl ChunkSplitter {
    pub fn new(max_tokens_per_chunk: usize, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            max_tokens_per_chunk,
            counter,
        }
    }

    pub fn max_tokens_per_chunk(&self) -> usize {
        self.max_tokens_per_chunk
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Split `text` into sequence-numbered chunks.
    ///
    /// Lines keep their `\n` terminator. A line is appended to the current
    /// chunk unless that would push it past the maximum, in which case the
    /// current chunk is closed first. A single line larger than the maximum
    /// becomes a chunk of its own and is never cut. Empty input yields no
    /// chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for line in text.split_inclusive('\n') {
            let line_tokens = self.counter.count(line);

            if !current.is_empty() && current_tokens + line_tokens > self.max_tokens_per_chunk {
                let seq = chunks.len();
                chunks.push(Chunk::new(seq, current_tokens, std::mem::take(&mut current)));
                current_tokens = 0;
            }

            if line_tokens > self.max_tokens_per_chunk {
                debug!(
                    sequence_number = chunks.len(),
                    tokens = line_tokens,
                    max = self.max_tokens_per_chunk,
                    "Line exceeds chunk limit; emitting as its own chunk"
                );
            }

            current.push_str(line);
            current_tokens += line_tokens;
        }

        if !current.is_empty() {
            let seq = chunks.len();
            chunks.push(Chunk::new(seq, current_tokens, current));
        }

        chunks
    }
}
