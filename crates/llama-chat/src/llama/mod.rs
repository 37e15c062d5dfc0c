//! llama.cpp-backed [`Engine`].

mod backend;
mod batch;
mod context;
mod model;
mod sampler;
mod template;
mod token;

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

pub use backend::LlamaBackend;
pub use batch::LlamaBatch;
pub use context::LlamaContext;
pub use model::LlamaModel;
pub use sampler::SamplerChain;

use crate::batch::TokenBatch;
use crate::config::SessionConfig;
use crate::engine::{ChatMessage, Engine, SamplingParams, Token};
use crate::error::Result;

/// A loaded model and its inference context.
pub struct LlamaEngine {
    // Declared first so the context (and with it the model `Arc`) drops
    // before anything else.
    ctx: LlamaContext,
    vocab: *const llama_sys::llama_vocab,
    template: Option<CString>,
    _backend: LlamaBackend,
}

// Safety: the vocab pointer belongs to the model owned by `ctx`, and the
// engine is only used through `&mut self` by one session.
unsafe impl Send for LlamaEngine {}

impl LlamaEngine {
    /// Load `path` with every layer offloaded as configured and create a
    /// context sized by `config`.
    pub fn load(path: &Path, config: &SessionConfig) -> Result<Self> {
        let backend = LlamaBackend::init();
        let model = Arc::new(LlamaModel::load(path, config.n_gpu_layers)?);
        let vocab = model.vocab();
        let template = model.chat_template();
        let ctx = LlamaContext::new(model, config)?;

        Ok(Self {
            ctx,
            vocab,
            template,
            _backend: backend,
        })
    }

    pub fn model(&self) -> &LlamaModel {
        self.ctx.model()
    }
}

impl Engine for LlamaEngine {
    fn n_ctx(&self) -> u32 {
        self.ctx.n_ctx()
    }

    fn n_batch(&self) -> u32 {
        self.ctx.n_batch()
    }

    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_assistant: bool,
        buf: &mut [u8],
    ) -> i32 {
        template::apply_into(self.template.as_deref(), messages, add_assistant, buf)
    }

    fn tokenize(
        &self,
        text: &[u8],
        buf: &mut [Token],
        add_bos: bool,
        parse_special: bool,
    ) -> i32 {
        token::tokenize_into(self.vocab, text, buf, add_bos, parse_special)
    }

    fn token_to_piece(&self, token: Token, buf: &mut [u8], render_special: bool) -> i32 {
        token::token_to_piece_into(self.vocab, token, buf, render_special)
    }

    fn is_eog(&self, token: Token) -> bool {
        token::is_eog(self.vocab, token)
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<()> {
        let batch = LlamaBatch::from_tokens(batch);
        self.ctx.decode(&batch)
    }

    fn sample(&mut self, params: &SamplingParams) -> Token {
        SamplerChain::new(params).sample(&self.ctx)
    }

    fn kv_clear(&mut self) {
        self.ctx.clear_memory();
    }

    fn kv_tokens(&self) -> i32 {
        self.ctx.cached_tokens()
    }
}
