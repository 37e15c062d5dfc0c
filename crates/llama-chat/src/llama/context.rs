//! Inference context: the KV cache and decode entry point.

use std::sync::Arc;

use tracing::{debug, warn};

use super::batch::LlamaBatch;
use super::model::LlamaModel;
use crate::config::SessionConfig;
use crate::error::{ChatError, Result};

/// A `llama_context` plus the model it was created from.
///
/// `raw` is freed in `drop` before the `Arc<LlamaModel>` field is released,
/// so the model always outlives its context.
pub struct LlamaContext {
    raw: *mut llama_sys::llama_context,
    model: Arc<LlamaModel>,
}

// Safety: every mutating call goes through `&mut self`.
unsafe impl Send for LlamaContext {}

impl LlamaContext {
    pub fn new(model: Arc<LlamaModel>, config: &SessionConfig) -> Result<Self> {
        let n_threads = config.threads();
        let n_ctx_train = model.n_ctx_train();
        if n_ctx_train > 0 && config.n_ctx > n_ctx_train {
            warn!(
                n_ctx = config.n_ctx,
                n_ctx_train, "Requested context is longer than the model was trained on"
            );
        }

        let mut params = unsafe { llama_sys::llama_context_default_params() };
        params.n_ctx = config.n_ctx;
        params.n_batch = config.n_batch;
        // physical micro-batch; llama.cpp splits n_batch into these
        params.n_ubatch = config.n_batch.min(512);
        params.n_threads = n_threads;
        params.n_threads_batch = n_threads;

        let raw = unsafe { llama_sys::llama_init_from_model(model.as_ptr(), params) };
        if raw.is_null() {
            return Err(ChatError::ContextCreationFailed(format!(
                "could not allocate a {}-token context",
                config.n_ctx
            )));
        }

        debug!(n_ctx = config.n_ctx, n_batch = config.n_batch, n_threads, "Context ready");
        Ok(Self { raw, model })
    }

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_context {
        self.raw
    }

    pub fn model(&self) -> &LlamaModel {
        &self.model
    }

    pub fn n_ctx(&self) -> u32 {
        unsafe { llama_sys::llama_n_ctx(self.raw) }
    }

    pub fn n_batch(&self) -> u32 {
        unsafe { llama_sys::llama_n_batch(self.raw) }
    }

    /// Run the model over `batch`. Non-zero llama.cpp status codes become
    /// [`ChatError::Decode`].
    pub fn decode(&mut self, batch: &LlamaBatch) -> Result<()> {
        match unsafe { llama_sys::llama_decode(self.raw, batch.raw()) } {
            0 => Ok(()),
            rc => Err(ChatError::Decode(rc)),
        }
    }

    fn memory(&self) -> Option<llama_sys::llama_memory_t> {
        let mem = unsafe { llama_sys::llama_get_memory(self.raw) };
        (!mem.is_null()).then_some(mem)
    }

    /// Drop every cached position of every sequence.
    pub fn clear_memory(&mut self) {
        if let Some(mem) = self.memory() {
            unsafe { llama_sys::llama_memory_clear(mem, false) }
        }
    }

    /// Cached positions of sequence 0, which always start at 0.
    pub fn cached_tokens(&self) -> i32 {
        self.memory()
            .map_or(0, |mem| unsafe { llama_sys::llama_memory_seq_pos_max(mem, 0) } + 1)
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        unsafe { llama_sys::llama_free(self.raw) }
        debug!("Context freed");
    }
}
