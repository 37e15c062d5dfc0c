//! Deterministic in-memory engine.
//!
//! The vocabulary has two control tokens ([`BOS`], [`EOG`]) followed by one
//! token per byte value, so tokenization is exact and reversible. The chat
//! template is `<|role|>\ncontent\n` per message plus `<|assistant|>\n`. By
//! default the sampler echoes the prompt token ids (BOS excluded) and emits
//! [`EOG`] once the prompt is exhausted; [`MockEngine::with_reply`] replaces
//! the echo with a fixed script.

use std::cell::Cell;

use crate::batch::TokenBatch;
use crate::engine::{ChatMessage, Engine, SamplingParams, Token};
use crate::error::{ChatError, Result};

pub const BOS: Token = 1;
pub const EOG: Token = 2;
const BYTE_BASE: Token = 3;

/// Token id of a single byte.
pub fn byte_token(b: u8) -> Token {
    BYTE_BASE + Token::from(b)
}

/// Token ids of `text`, one per byte.
pub fn text_tokens(text: &[u8]) -> Vec<Token> {
    text.iter().copied().map(byte_token).collect()
}

#[derive(Debug, Clone)]
enum Reply {
    Echo,
    Script(Vec<Token>),
}

#[derive(Debug)]
pub struct MockEngine {
    n_ctx: u32,
    n_batch: u32,
    kv: Vec<Token>,
    reply: Reply,
    /// Index of the next reply token, reset by every prefill.
    cursor: usize,
    /// Length of the prompt as seen by the first logit-bearing decode.
    prompt_len: Option<usize>,
    logits_ready: bool,
    fail_template: bool,
    fail_tokenize: bool,
    fail_decode_at: Option<usize>,
    template_calls: Cell<usize>,
    decode_calls: usize,
    kv_clears: usize,
    sampled: Vec<Token>,
    last_params: Option<SamplingParams>,
}

impl MockEngine {
    pub fn new(n_ctx: u32) -> Self {
        Self {
            n_ctx,
            n_batch: n_ctx,
            kv: Vec::new(),
            reply: Reply::Echo,
            cursor: 0,
            prompt_len: None,
            logits_ready: false,
            fail_template: false,
            fail_tokenize: false,
            fail_decode_at: None,
            template_calls: Cell::new(0),
            decode_calls: 0,
            kv_clears: 0,
            sampled: Vec::new(),
            last_params: None,
        }
    }

    /// Sample `tokens` in order, then [`EOG`].
    pub fn with_reply(mut self, tokens: Vec<Token>) -> Self {
        self.reply = Reply::Script(tokens);
        self
    }

    pub fn with_batch(mut self, n_batch: u32) -> Self {
        self.n_batch = n_batch;
        self
    }

    pub fn fail_template(&mut self) {
        self.fail_template = true;
    }

    pub fn fail_tokenize(&mut self) {
        self.fail_tokenize = true;
    }

    /// Make the `n`-th decode call from now (0-based) fail.
    pub fn fail_decode_at(&mut self, n: usize) {
        self.fail_decode_at = Some(self.decode_calls + n);
    }

    pub fn template_calls(&self) -> usize {
        self.template_calls.get()
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls
    }

    pub fn kv_clears(&self) -> usize {
        self.kv_clears
    }

    /// Every token drawn since construction, EOG included.
    pub fn sampled(&self) -> &[Token] {
        &self.sampled
    }

    pub fn last_params(&self) -> Option<SamplingParams> {
        self.last_params
    }

    /// Contents of the key-value cache.
    pub fn kv(&self) -> &[Token] {
        &self.kv
    }

    fn next_reply_token(&self) -> Token {
        match &self.reply {
            Reply::Script(tokens) => tokens.get(self.cursor).copied().unwrap_or(EOG),
            Reply::Echo => {
                let end = self.prompt_len.unwrap_or(0);
                // skip BOS at index 0
                self.kv
                    .get(self.cursor + 1)
                    .copied()
                    .filter(|_| self.cursor + 1 < end)
                    .unwrap_or(EOG)
            }
        }
    }
}

impl Engine for MockEngine {
    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn n_batch(&self) -> u32 {
        self.n_batch
    }

    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_assistant: bool,
        buf: &mut [u8],
    ) -> i32 {
        self.template_calls.set(self.template_calls.get() + 1);
        if self.fail_template {
            return -1;
        }

        let mut out = Vec::new();
        for m in messages {
            out.extend_from_slice(format!("<|{}|>\n", m.role).as_bytes());
            out.extend_from_slice(m.content.as_bytes());
            out.push(b'\n');
        }
        if add_assistant {
            out.extend_from_slice(b"<|assistant|>\n");
        }

        let n = out.len().min(buf.len());
        buf[..n].copy_from_slice(&out[..n]);
        out.len() as i32
    }

    fn tokenize(
        &self,
        text: &[u8],
        buf: &mut [Token],
        add_bos: bool,
        _parse_special: bool,
    ) -> i32 {
        if self.fail_tokenize {
            return -1;
        }
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if add_bos {
            tokens.push(BOS);
        }
        tokens.extend(text_tokens(text));
        if tokens.len() > buf.len() {
            return -(tokens.len() as i32);
        }
        buf[..tokens.len()].copy_from_slice(&tokens);
        tokens.len() as i32
    }

    fn token_to_piece(&self, token: Token, buf: &mut [u8], render_special: bool) -> i32 {
        let piece: &[u8] = match token {
            BOS if render_special => b"<s>",
            EOG if render_special => b"</s>",
            BOS | EOG => b"",
            t if (BYTE_BASE..BYTE_BASE + 256).contains(&t) => {
                let b = (t - BYTE_BASE) as u8;
                return if buf.is_empty() {
                    -1
                } else {
                    buf[0] = b;
                    1
                };
            }
            _ => b"",
        };
        if piece.len() > buf.len() {
            return -(piece.len() as i32);
        }
        buf[..piece.len()].copy_from_slice(piece);
        piece.len() as i32
    }

    fn is_eog(&self, token: Token) -> bool {
        token == EOG
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<()> {
        let call = self.decode_calls;
        self.decode_calls += 1;

        if self.fail_decode_at == Some(call) {
            return Err(ChatError::Decode(-3));
        }
        if batch.is_empty() {
            return Err(ChatError::Decode(-1));
        }
        if batch.n_tokens() > self.n_batch as usize {
            return Err(ChatError::Decode(-1));
        }
        if self.kv.len() + batch.n_tokens() > self.n_ctx as usize {
            // no free KV slot
            return Err(ChatError::Decode(1));
        }
        for (i, e) in batch.entries().iter().enumerate() {
            assert_eq!(
                e.pos as usize,
                self.kv.len() + i,
                "batch position does not extend the cache"
            );
        }

        let prefill = self.prompt_len.is_none();
        self.kv.extend(batch.entries().iter().map(|e| e.token));
        self.logits_ready = batch.last().is_some_and(|e| e.logits);
        if prefill && self.logits_ready {
            self.prompt_len = Some(self.kv.len());
            self.cursor = 0;
        }
        Ok(())
    }

    fn sample(&mut self, params: &SamplingParams) -> Token {
        assert!(self.logits_ready, "sampled without fresh logits");
        self.logits_ready = false;
        self.last_params = Some(*params);

        let token = self.next_reply_token();
        self.cursor += 1;
        self.sampled.push(token);
        token
    }

    fn kv_clear(&mut self) {
        self.kv.clear();
        self.prompt_len = None;
        self.cursor = 0;
        self.logits_ready = false;
        self.kv_clears += 1;
    }

    fn kv_tokens(&self) -> i32 {
        self.kv.len() as i32
    }
}
