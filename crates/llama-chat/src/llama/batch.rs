//! [`TokenBatch`] copied into a `llama_batch`.

use crate::batch::TokenBatch;

/// A `llama_batch` sized for one [`TokenBatch`]; `llama_batch_free` runs on
/// drop.
pub struct LlamaBatch {
    raw: llama_sys::llama_batch,
}

impl LlamaBatch {
    /// Every entry goes to sequence 0.
    pub fn from_tokens(batch: &TokenBatch) -> Self {
        let capacity = batch.n_tokens().max(1);
        let mut raw = unsafe { llama_sys::llama_batch_init(capacity as i32, 0, 1) };

        for (i, entry) in batch.entries().iter().enumerate() {
            // Safety: llama_batch_init allocated `capacity` slots per array
            // and one seq_id slot per token.
            unsafe {
                *raw.token.add(i) = entry.token;
                *raw.pos.add(i) = entry.pos;
                *raw.n_seq_id.add(i) = 1;
                **raw.seq_id.add(i) = 0;
                *raw.logits.add(i) = i8::from(entry.logits);
            }
        }
        raw.n_tokens = batch.n_tokens() as i32;

        Self { raw }
    }

    /// The struct by value, as `llama_decode` takes it.
    pub fn raw(&self) -> llama_sys::llama_batch {
        self.raw
    }
}

impl Drop for LlamaBatch {
    fn drop(&mut self) {
        unsafe { llama_sys::llama_batch_free(self.raw) }
    }
}
