//! Chat history → rendered prompt → prompt tokens.

use tracing::debug;

use crate::engine::{ChatMessage, Engine, Token};
use crate::error::{ChatError, Result};

/// Initial size of the template output buffer.
pub const TEMPLATE_BUF_INIT: usize = 8 * 1024;

/// Extra token slots beyond one per rendered byte.
const TOKEN_BUF_SLACK: usize = 16;

/// Render `history` with an assistant-turn prefix.
///
/// Renders at most twice: once into an 8 KiB buffer and, if the engine
/// reports a larger size, once more into a buffer of exactly that size + 1.
pub fn render<E: Engine + ?Sized>(engine: &E, history: &[ChatMessage]) -> Result<Vec<u8>> {
    if history.is_empty() {
        return Err(ChatError::EmptyHistory);
    }

    let mut buf = vec![0u8; TEMPLATE_BUF_INIT];
    let mut len = engine.apply_chat_template(history, true, &mut buf);
    if len < 0 {
        return Err(ChatError::Template(format!(
            "renderer returned {len} for {} messages",
            history.len()
        )));
    }

    if len as usize > buf.len() {
        buf.resize(len as usize + 1, 0);
        len = engine.apply_chat_template(history, true, &mut buf);
        if len < 0 || len as usize > buf.len() {
            return Err(ChatError::Template(format!(
                "second render returned {len} for a {} byte buffer",
                buf.len()
            )));
        }
    }

    buf.truncate(len as usize);
    Ok(buf)
}

/// Tokenize a rendered prompt with BOS added and special-token parsing off.
pub fn tokenize<E: Engine + ?Sized>(engine: &E, prompt: &[u8]) -> Result<Vec<Token>> {
    let mut tokens = vec![0 as Token; prompt.len() + TOKEN_BUF_SLACK];
    let n = engine.tokenize(prompt, &mut tokens, true, false);
    if n < 0 {
        return Err(ChatError::Tokenization(format!(
            "tokenizer returned {n} for {} bytes",
            prompt.len()
        )));
    }
    if n == 0 {
        return Err(ChatError::Tokenization("prompt produced no tokens".into()));
    }
    tokens.truncate(n as usize);
    Ok(tokens)
}

/// Render and tokenize `history`, rejecting prompts larger than the window.
pub fn build<E: Engine + ?Sized>(engine: &E, history: &[ChatMessage]) -> Result<Vec<Token>> {
    let rendered = render(engine, history)?;
    let tokens = tokenize(engine, &rendered)?;

    let n_ctx = engine.n_ctx();
    if tokens.len() > n_ctx as usize {
        return Err(ChatError::ContextOverflow {
            prompt_tokens: tokens.len(),
            n_ctx,
        });
    }

    debug!(
        messages = history.len(),
        bytes = rendered.len(),
        tokens = tokens.len(),
        "Prompt built"
    );
    Ok(tokens)
}
