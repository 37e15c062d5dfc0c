//! Engine-neutral token batch.

use crate::engine::Token;

/// One position submitted to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: Token,
    /// Absolute position in sequence 0.
    pub pos: i32,
    /// Request logits output for this position.
    pub logits: bool,
}

/// Tokens to feed into the decoder in one call.
#[derive(Debug, Clone, Default)]
pub struct TokenBatch {
    entries: Vec<BatchEntry>,
}

impl TokenBatch {
    pub fn with_capacity(n_tokens_max: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n_tokens_max),
        }
    }

    /// A batch holding a single logit-bearing token.
    pub fn single(token: Token, pos: i32) -> Self {
        let mut batch = Self::with_capacity(1);
        batch.add(token, pos, true);
        batch
    }

    pub fn add(&mut self, token: Token, pos: i32, logits: bool) {
        self.entries.push(BatchEntry { token, pos, logits });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn n_tokens(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&BatchEntry> {
        self.entries.last()
    }
}
