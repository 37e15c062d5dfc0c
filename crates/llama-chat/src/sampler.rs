//! Per-turn sampling settings.

use crate::engine::{Engine, SamplingParams, Token};

/// Temperature followed by a seeded categorical draw.
///
/// Holds no cross-token state: each [`Sampler::draw`] asks the engine for a
/// fresh pipeline over its latest logits.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    params: SamplingParams,
}

impl Sampler {
    /// Negative (and NaN) temperatures are treated as 0.
    pub fn new(temperature: f32, seed: u32) -> Self {
        let temperature = if temperature > 0.0 { temperature } else { 0.0 };
        Self {
            params: SamplingParams { temperature, seed },
        }
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    pub fn draw<E: Engine + ?Sized>(&self, engine: &mut E) -> Token {
        engine.sample(&self.params)
    }
}
