//! Temperature + seeded-categorical sampler pipeline.

use super::context::LlamaContext;
use crate::engine::{SamplingParams, Token};

/// A `llama_sampler` chain, built for one draw and freed on drop.
pub struct SamplerChain {
    raw: *mut llama_sys::llama_sampler,
}

impl SamplerChain {
    pub fn new(params: &SamplingParams) -> Self {
        let raw = unsafe {
            let chain = llama_sys::llama_sampler_chain_init(llama_sys::llama_sampler_chain_params {
                no_perf: true,
            });
            llama_sys::llama_sampler_chain_add(
                chain,
                llama_sys::llama_sampler_init_temp(params.temperature),
            );
            llama_sys::llama_sampler_chain_add(chain, llama_sys::llama_sampler_init_dist(params.seed));
            chain
        };
        Self { raw }
    }

    /// Draw from the logits of the last decoded position.
    pub fn sample(&mut self, ctx: &LlamaContext) -> Token {
        unsafe { llama_sys::llama_sampler_sample(self.raw, ctx.as_ptr(), -1) }
    }
}

impl Drop for SamplerChain {
    fn drop(&mut self) {
        unsafe { llama_sys::llama_sampler_free(self.raw) }
    }
}
