//! The seam between the chat pipeline and an inference engine.
//!
//! Every engine primitive the turn pipeline consumes is listed here. The
//! buffer-filling calls keep llama.cpp's conventions: they write into a
//! caller-owned buffer and return an `i32` whose sign carries failure or
//! the size the caller should have provided.

use serde::{Deserialize, Serialize};

use crate::batch::TokenBatch;
use crate::error::Result;

/// Vocabulary token id.
pub type Token = i32;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message (role + content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling settings for one draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub seed: u32,
}

/// Inference engine primitives used by a chat turn.
pub trait Engine {
    /// Context window in tokens.
    fn n_ctx(&self) -> u32;

    /// Largest batch accepted by one [`Engine::decode`] call.
    fn n_batch(&self) -> u32;

    /// Render `messages` with the engine's default chat template.
    ///
    /// Returns the full rendered length, which may exceed `buf.len()` (the
    /// buffer then holds a truncated render). Negative on failure.
    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_assistant: bool,
        buf: &mut [u8],
    ) -> i32;

    /// Tokenize `text` into `buf`. Returns the token count, or a negative
    /// value when `buf` is too small or tokenization fails.
    fn tokenize(&self, text: &[u8], buf: &mut [Token], add_bos: bool, parse_special: bool)
    -> i32;

    /// Write the text piece of `token` into `buf`. Returns the byte count,
    /// or the negated required size when `buf` is too small.
    fn token_to_piece(&self, token: Token, buf: &mut [u8], render_special: bool) -> i32;

    /// True for end-of-generation markers of this vocabulary.
    fn is_eog(&self, token: Token) -> bool;

    /// Process a batch, extending the key-value cache.
    fn decode(&mut self, batch: &TokenBatch) -> Result<()>;

    /// Draw one token from the logits of the most recent decode.
    fn sample(&mut self, params: &SamplingParams) -> Token;

    /// Drop every entry of the key-value cache.
    fn kv_clear(&mut self);

    /// Tokens currently resident in the key-value cache.
    fn kv_tokens(&self) -> i32;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn n_ctx(&self) -> u32 {
        (**self).n_ctx()
    }
    fn n_batch(&self) -> u32 {
        (**self).n_batch()
    }
    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_assistant: bool,
        buf: &mut [u8],
    ) -> i32 {
        (**self).apply_chat_template(messages, add_assistant, buf)
    }
    fn tokenize(
        &self,
        text: &[u8],
        buf: &mut [Token],
        add_bos: bool,
        parse_special: bool,
    ) -> i32 {
        (**self).tokenize(text, buf, add_bos, parse_special)
    }
    fn token_to_piece(&self, token: Token, buf: &mut [u8], render_special: bool) -> i32 {
        (**self).token_to_piece(token, buf, render_special)
    }
    fn is_eog(&self, token: Token) -> bool {
        (**self).is_eog(token)
    }
    fn decode(&mut self, batch: &TokenBatch) -> Result<()> {
        (**self).decode(batch)
    }
    fn sample(&mut self, params: &SamplingParams) -> Token {
        (**self).sample(params)
    }
    fn kv_clear(&mut self) {
        (**self).kv_clear()
    }
    fn kv_tokens(&self) -> i32 {
        (**self).kv_tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::new(Role::System, "be brief");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_role_does_not_deserialize() {
        assert!(serde_json::from_str::<ChatMessage>(r#"{"role":"tool","content":"x"}"#).is_err());
    }
}
