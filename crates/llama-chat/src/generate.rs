//! The sample → detokenize → stream → decode loop of a chat turn.

use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::batch::TokenBatch;
use crate::engine::{Engine, Token};
use crate::error::Result;
use crate::sampler::Sampler;

/// Minimum size of the detokenizer output buffer.
pub const PIECE_BUF_MIN: usize = 256;

/// Per-turn generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnOptions {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature; negative values act as 0.
    pub temperature: f32,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
        }
    }
}

/// Events emitted when a turn is streamed over a channel.
#[derive(Debug, Clone)]
pub enum GenerateEvent {
    /// A detokenized piece; may hold a partial UTF-8 sequence.
    Token(Vec<u8>),
    /// Generation finished.
    Done {
        finish_reason: FinishReason,
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The turn failed.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// End-of-generation token.
    Stop,
    /// Reached `max_tokens`.
    Length,
    /// The context window is full.
    ContextFull,
    /// The sink asked to stop.
    Cancelled,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ContextFull => write!(f, "context_full"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The assistant's reply for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Concatenation of every streamed piece.
    pub bytes: Vec<u8>,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    /// Tokens sampled and decoded, end-of-generation excluded.
    pub completion_tokens: u32,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Write the piece for `token` into `buf`, growing it once if the engine
/// reports a larger size. Returns the piece length.
fn token_to_piece<E: Engine + ?Sized>(engine: &E, token: Token, buf: &mut Vec<u8>) -> usize {
    let mut n = engine.token_to_piece(token, buf, true);
    if n < 0 {
        buf.resize((-n) as usize, 0);
        n = engine.token_to_piece(token, buf, true);
    }
    n.max(0) as usize
}

/// Generate from an engine whose cache holds exactly the `n_prompt` prompt
/// tokens.
///
/// Stops on end-of-generation, then `max_tokens`, then a full context. Every
/// non-empty piece reaches `sink` before the token is decoded; a `Break`
/// from the sink ends the turn after that decode.
pub fn decode_loop<E, F>(
    engine: &mut E,
    n_prompt: usize,
    opts: &TurnOptions,
    seed: u32,
    sink: &mut F,
) -> Result<Reply>
where
    E: Engine + ?Sized,
    F: FnMut(&[u8]) -> ControlFlow<()>,
{
    let n_ctx = engine.n_ctx() as usize;
    let sampler = Sampler::new(opts.temperature, seed);

    let mut bytes = Vec::new();
    let mut piece = vec![0u8; PIECE_BUF_MIN];
    let mut n_pos = n_prompt;
    let mut generated = 0u32;
    let mut cancelled = false;

    let finish_reason = loop {
        if cancelled {
            break FinishReason::Cancelled;
        }
        if generated >= opts.max_tokens {
            break FinishReason::Length;
        }
        if n_pos >= n_ctx {
            break FinishReason::ContextFull;
        }

        let token = sampler.draw(engine);
        if engine.is_eog(token) {
            break FinishReason::Stop;
        }

        let n = token_to_piece(engine, token, &mut piece);
        if n > 0 {
            let p = &piece[..n];
            bytes.extend_from_slice(p);
            cancelled = sink(p).is_break();
        }

        engine
            .decode(&TokenBatch::single(token, n_pos as i32))
            .inspect_err(|e| warn!(n_pos, generated, "Decode failed mid-turn: {e}"))?;
        n_pos += 1;
        generated += 1;
    };

    debug!(
        %finish_reason,
        prompt_tokens = n_prompt,
        completion_tokens = generated,
        "Turn finished"
    );

    Ok(Reply {
        bytes,
        finish_reason,
        prompt_tokens: n_prompt as u32,
        completion_tokens: generated,
    })
}
